//! The GPU surface the hardware backend draws through.
//!
//! [`TileDevice`] is deliberately small: atlas textures with sub-region
//! uploads, vertex buffers, one shared quad index buffer, compiled programs and
//! an indexed draw. `tilebatch_wgpu` implements it over wgpu; [`RecordingDevice`]
//! implements it in memory for headless use.

use crate::error::TileResult;
use crate::shader::{TileShaderSource, TileUniforms};
use crate::vertex::VertexLayout;
use image::RgbaImage;

/// Backend capability constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Textures a single draw can sample from.
    pub max_texture_units: usize,
    /// Largest texture side the device accepts.
    pub max_texture_dimension: u32,
    /// Whether a draw may bind a plain texture from
    /// [`TileDevice::create_texture`] instead of an atlas.
    pub direct_binding: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_texture_dimension: 8192,
            direct_binding: true,
        }
    }
}

/// One indexed draw over a layer's vertex buffer.
pub struct DrawCall<'call, D: TileDevice + ?Sized> {
    pub program: &'call D::Program,
    pub vertices: &'call D::Buffer,
    /// Textures bound to units `0..atlases.len()`: atlases, or a single
    /// directly bound texture.
    pub atlases: &'call [D::Texture],
    pub index_count: u32,
    pub uniforms: TileUniforms,
}

pub trait TileDevice {
    type Texture;
    type Buffer;
    type Program;

    fn limits(&self) -> DeviceLimits;

    /// Changes whenever the underlying context is lost or reset. Every handle
    /// created under an older generation is invalid.
    fn context_generation(&self) -> u64;

    /// Square RGBA atlas texture of `size` pixels per side, initially transparent.
    ///
    /// # Errors
    /// Fails if the device cannot allocate the texture.
    fn create_atlas(&mut self, size: u32) -> TileResult<Self::Texture>;

    /// Texture holding all of `pixels`, sized to match, for direct binding.
    ///
    /// # Errors
    /// Fails if the device cannot allocate or fill the texture.
    fn create_texture(&mut self, pixels: &RgbaImage) -> TileResult<Self::Texture>;

    /// Copy the top-left `extent` of `pixels` into `atlas` at `origin`.
    ///
    /// # Errors
    /// Fails if the upload is rejected by the device.
    fn write_region(
        &mut self,
        atlas: &Self::Texture,
        origin: [u32; 2],
        extent: [u32; 2],
        pixels: &RgbaImage,
    ) -> TileResult<()>;

    /// Fill a `size`×`size` region at `origin` with transparent black.
    ///
    /// # Errors
    /// Fails if the upload is rejected by the device.
    fn clear_region(&mut self, atlas: &Self::Texture, origin: [u32; 2], size: u32)
    -> TileResult<()>;

    /// # Errors
    /// Fails if the device cannot allocate the buffer.
    fn create_vertex_buffer(&mut self, size: u64) -> TileResult<Self::Buffer>;

    /// # Errors
    /// Fails if the write is rejected by the device.
    fn write_vertex_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> TileResult<()>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Replace the shared quad index buffer.
    ///
    /// # Errors
    /// Fails if the device cannot allocate the buffer.
    fn write_index_buffer(&mut self, indices: &[u32]) -> TileResult<()>;

    /// # Errors
    /// Fails if the shader does not compile.
    fn compile_program(
        &mut self,
        source: &TileShaderSource,
        layout: &VertexLayout,
    ) -> TileResult<Self::Program>;

    /// # Errors
    /// Fails if the draw cannot be recorded.
    fn draw(&mut self, call: DrawCall<'_, Self>) -> TileResult<()>;
}

/// Opaque handle issued by [`RecordingDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordedHandle(pub u64);

/// A call observed by [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateAtlas {
        atlas: RecordedHandle,
        size: u32,
    },
    CreateTexture {
        texture: RecordedHandle,
        size: [u32; 2],
    },
    WriteRegion {
        atlas: RecordedHandle,
        origin: [u32; 2],
        extent: [u32; 2],
    },
    ClearRegion {
        atlas: RecordedHandle,
        origin: [u32; 2],
        size: u32,
    },
    CreateVertexBuffer {
        buffer: RecordedHandle,
        size: u64,
    },
    WriteVertexBuffer {
        buffer: RecordedHandle,
        len: usize,
    },
    DestroyBuffer {
        buffer: RecordedHandle,
    },
    WriteIndexBuffer {
        count: usize,
    },
    CompileProgram {
        program: RecordedHandle,
        max_textures: usize,
    },
    Draw {
        program: RecordedHandle,
        vertices: RecordedHandle,
        atlases: Vec<RecordedHandle>,
        index_count: u32,
        uniforms: TileUniforms,
    },
}

/// In-memory [`TileDevice`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    calls: Vec<DeviceCall>,
    next_handle: u64,
    generation: u64,
    limits: DeviceLimits,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        core::mem::take(&mut self.calls)
    }

    /// Simulate a device reset.
    pub fn lose_context(&mut self) {
        self.generation += 1;
    }

    pub fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn draws(&self) -> impl Iterator<Item = &DeviceCall> {
        self.calls
            .iter()
            .filter(|call| matches!(call, DeviceCall::Draw { .. }))
    }

    fn issue(&mut self) -> RecordedHandle {
        self.next_handle += 1;
        RecordedHandle(self.next_handle)
    }
}

impl TileDevice for RecordingDevice {
    type Texture = RecordedHandle;
    type Buffer = RecordedHandle;
    type Program = RecordedHandle;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn context_generation(&self) -> u64 {
        self.generation
    }

    fn create_atlas(&mut self, size: u32) -> TileResult<Self::Texture> {
        let atlas = self.issue();
        self.calls.push(DeviceCall::CreateAtlas { atlas, size });
        Ok(atlas)
    }

    fn create_texture(&mut self, pixels: &RgbaImage) -> TileResult<Self::Texture> {
        let texture = self.issue();
        self.calls.push(DeviceCall::CreateTexture {
            texture,
            size: [pixels.width(), pixels.height()],
        });
        Ok(texture)
    }

    fn write_region(
        &mut self,
        atlas: &Self::Texture,
        origin: [u32; 2],
        extent: [u32; 2],
        _pixels: &RgbaImage,
    ) -> TileResult<()> {
        self.calls.push(DeviceCall::WriteRegion {
            atlas: *atlas,
            origin,
            extent,
        });
        Ok(())
    }

    fn clear_region(
        &mut self,
        atlas: &Self::Texture,
        origin: [u32; 2],
        size: u32,
    ) -> TileResult<()> {
        self.calls.push(DeviceCall::ClearRegion {
            atlas: *atlas,
            origin,
            size,
        });
        Ok(())
    }

    fn create_vertex_buffer(&mut self, size: u64) -> TileResult<Self::Buffer> {
        let buffer = self.issue();
        self.calls
            .push(DeviceCall::CreateVertexBuffer { buffer, size });
        Ok(buffer)
    }

    fn write_vertex_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> TileResult<()> {
        self.calls.push(DeviceCall::WriteVertexBuffer {
            buffer: *buffer,
            len: bytes.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        self.calls.push(DeviceCall::DestroyBuffer { buffer });
    }

    fn write_index_buffer(&mut self, indices: &[u32]) -> TileResult<()> {
        self.calls.push(DeviceCall::WriteIndexBuffer {
            count: indices.len(),
        });
        Ok(())
    }

    fn compile_program(
        &mut self,
        source: &TileShaderSource,
        _layout: &VertexLayout,
    ) -> TileResult<Self::Program> {
        let program = self.issue();
        self.calls.push(DeviceCall::CompileProgram {
            program,
            max_textures: source.max_textures(),
        });
        Ok(program)
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) -> TileResult<()> {
        self.calls.push(DeviceCall::Draw {
            program: *call.program,
            vertices: *call.vertices,
            atlases: call.atlases.to_vec(),
            index_count: call.index_count,
            uniforms: call.uniforms,
        });
        Ok(())
    }
}

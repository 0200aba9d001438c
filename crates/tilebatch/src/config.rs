//! Renderer configuration.
//!
//! Capability constants (texture units, atlas geometry) and policies (clear
//! before write, leak window) are injected once at construction. The host can
//! build a [`TileConfig`] in code or deserialize it from JSON; missing fields
//! take the defaults below.

use crate::error::{TileError, TileResult};
use serde::Deserialize;

/// Which rendering path a [`crate::TileRenderer`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Batched draws through a [`crate::TileDevice`].
    #[default]
    Hardware,
    /// Software rasterization into an RGBA buffer.
    Raster,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    pub backend: BackendKind,
    /// Atlas textures (texture units) bound per draw.
    pub max_textures: usize,
    /// Side of one atlas texture in pixels.
    pub buffer_size: u32,
    /// Side of one atlas region in pixels.
    pub bound_size: u32,
    /// Distinct textures one layer may reference. Zero means
    /// `max_textures * bound_count_per_buffer`.
    pub tex_per_child: usize,
    /// Clear a region to transparent black before uploading into it.
    pub clear_before_write: bool,
    /// Bind the texture of a single-texture layer directly instead of copying
    /// it into an atlas region. Composite children always use atlases.
    pub direct_binding: bool,
    /// Idle time after which a vertex buffer is considered leaked.
    pub leak_window_ms: u64,
    /// Quads the index buffer is sized for before it first grows.
    pub initial_index_quads: usize,
    /// Colour of tiles placed with a negative texture index.
    pub shadow_color: [f32; 4],
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Hardware,
            max_textures: 4,
            buffer_size: 2048,
            bound_size: 1024,
            tex_per_child: 0,
            clear_before_write: false,
            direct_binding: true,
            leak_window_ms: 10_000,
            initial_index_quads: 2000,
            shadow_color: [0.0, 0.0, 0.0, 0.5],
        }
    }
}

impl TileConfig {
    /// Parse a configuration from JSON and validate it.
    ///
    /// # Errors
    /// Returns [`TileError::InvalidConfig`] if the JSON is malformed or the
    /// atlas geometry is inconsistent.
    pub fn from_json(json: &str) -> TileResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| TileError::invalid_config(format!("malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`TileError::InvalidConfig`] describing the first violated constraint.
    pub fn validate(&self) -> TileResult<()> {
        if self.max_textures == 0 {
            return Err(TileError::invalid_config("max_textures must be at least 1"));
        }
        if self.bound_size == 0 || self.buffer_size < self.bound_size {
            return Err(TileError::invalid_config(format!(
                "bound_size {} must be nonzero and fit in buffer_size {}",
                self.bound_size, self.buffer_size
            )));
        }
        if self.buffer_size % self.bound_size != 0 {
            return Err(TileError::invalid_config(format!(
                "buffer_size {} is not a multiple of bound_size {}",
                self.buffer_size, self.bound_size
            )));
        }
        if self.leak_window_ms == 0 {
            return Err(TileError::invalid_config("leak_window_ms must be nonzero"));
        }
        Ok(())
    }

    /// Regions along one side of an atlas texture.
    #[must_use]
    pub const fn atlas_columns(&self) -> usize {
        (self.buffer_size / self.bound_size) as usize
    }

    /// Regions held by one atlas texture.
    #[must_use]
    pub const fn bound_count_per_buffer(&self) -> usize {
        self.atlas_columns() * self.atlas_columns()
    }

    /// Textures the whole slot pool can hold at once.
    #[must_use]
    pub const fn slot_capacity(&self) -> usize {
        self.max_textures * self.bound_count_per_buffer()
    }

    /// Per-layer texture capacity, resolving the zero default.
    #[must_use]
    pub const fn default_tex_per_child(&self) -> usize {
        if self.tex_per_child == 0 {
            self.slot_capacity()
        } else {
            self.tex_per_child
        }
    }
}

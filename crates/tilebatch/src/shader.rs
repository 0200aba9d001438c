//! WGSL program for batched tile draws.
//!
//! WGSL cannot index an array of textures with a per-fragment value, so the
//! fragment stage selects among `max_textures` fixed bindings with an `if`
//! chain. The chain is generated once per `max_textures` value.

use bytemuck::{Pod, Zeroable};
use core::fmt::Write as _;
use kurbo::Affine;

/// Binding of the first atlas texture; bindings 0 and 1 are the uniforms and sampler.
pub const FIRST_ATLAS_BINDING: u32 = 2;

const TILE_SHADER_WGSL: &str = r#"
struct TileUniforms {
    projection: mat3x3<f32>,
    shadow_color: vec4<f32>,
    animation_frame: vec2<f32>,
    inv_atlas_size: vec2<f32>,
};

@group(0) @binding(0) var<uniform> u_tile: TileUniforms;
@group(0) @binding(1) var u_sampler: sampler;
%bindings%
struct VertexOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) texture_coord: vec2<f32>,
    @location(1) frame: vec4<f32>,
    @location(2) @interpolate(flat) texture_id: f32,
};

@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) frame: vec4<f32>,
    @location(3) anim: vec2<f32>,
    @location(4) texture_id: f32,
) -> VertexOut {
    var out: VertexOut;
    let clip = u_tile.projection * vec3<f32>(position, 1.0);
    out.pos = vec4<f32>(clip.xy, 0.0, 1.0);
    let shift = anim * u_tile.animation_frame;
    out.texture_coord = uv + shift;
    out.frame = frame + vec4<f32>(shift, shift);
    out.texture_id = texture_id;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let coord = clamp(in.texture_coord, in.frame.xy, in.frame.zw) * u_tile.inv_atlas_size;
    let texture_id = floor(in.texture_id + 0.5);
    var color: vec4<f32>;
%chain%
    return color;
}
"#;

/// Fragment branch chain: one shadow branch, then one sampling branch per
/// atlas unit. The last unit takes the unconditional `else`.
pub fn generate_sample_chain(max_textures: usize) -> String {
    let count = max_textures.max(1);
    let mut chain = String::from("    if (texture_id < 0.0) {\n        color = u_tile.shadow_color;\n    }");
    for unit in 0..count {
        if unit + 1 == count {
            chain.push_str(" else {\n");
        } else {
            let _ = write!(chain, " else if (texture_id == {unit}.0) {{\n");
        }
        let _ = write!(
            chain,
            "        color = textureSampleLevel(u_atlas_{unit}, u_sampler, coord, 0.0);\n    }}"
        );
    }
    chain.push('\n');
    chain
}

fn generate_bindings(max_textures: usize) -> String {
    let mut bindings = String::new();
    for unit in 0..max_textures.max(1) {
        let binding = FIRST_ATLAS_BINDING as usize + unit;
        let _ = writeln!(
            bindings,
            "@group(0) @binding({binding}) var u_atlas_{unit}: texture_2d<f32>;"
        );
    }
    bindings
}

/// Generated program text for a fixed number of atlas units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileShaderSource {
    max_textures: usize,
    wgsl: String,
}

impl TileShaderSource {
    pub fn generate(max_textures: usize) -> Self {
        let max_textures = max_textures.max(1);
        let wgsl = TILE_SHADER_WGSL
            .replace("%bindings%", &generate_bindings(max_textures))
            .replace("%chain%", &generate_sample_chain(max_textures));
        Self { max_textures, wgsl }
    }

    pub const fn max_textures(&self) -> usize {
        self.max_textures
    }

    pub fn wgsl(&self) -> &str {
        &self.wgsl
    }

    pub const fn vertex_entry(&self) -> &'static str {
        "vs_main"
    }

    pub const fn fragment_entry(&self) -> &'static str {
        "fs_main"
    }
}

/// Compiled program cached per `max_textures` value.
#[derive(Debug)]
pub struct ShaderCache<P> {
    source: Option<TileShaderSource>,
    program: Option<P>,
}

impl<P> Default for ShaderCache<P> {
    fn default() -> Self {
        Self {
            source: None,
            program: None,
        }
    }
}

impl<P> ShaderCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source for `max_textures`, regenerated only when the count changed.
    /// Regenerating drops the compiled program.
    pub fn source(&mut self, max_textures: usize) -> &TileShaderSource {
        let max_textures = max_textures.max(1);
        let stale = self
            .source
            .as_ref()
            .is_none_or(|source| source.max_textures() != max_textures);
        if stale {
            self.program = None;
            self.source = Some(TileShaderSource::generate(max_textures));
        }
        self.source
            .get_or_insert_with(|| TileShaderSource::generate(max_textures))
    }

    pub fn program(&self) -> Option<&P> {
        self.program.as_ref()
    }

    pub fn set_program(&mut self, program: P) {
        self.program = Some(program);
    }

    /// Forget the compiled program; the source stays valid.
    pub fn invalidate(&mut self) {
        self.program = None;
    }
}

/// Uniform block shared by both shader stages.
///
/// `projection` is a column-major 3×3 matrix; each column is padded to 16
/// bytes to match WGSL uniform layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TileUniforms {
    pub projection: [[f32; 4]; 3],
    pub shadow_color: [f32; 4],
    pub animation_frame: [f32; 2],
    pub inv_atlas_size: [f32; 2],
}

impl TileUniforms {
    /// `shadow_color` is straight alpha and is premultiplied here, matching
    /// the premultiplied atlas contents. `sampled_size` is the pixel size of
    /// every bound texture: the atlas side, or the source size of a directly
    /// bound texture.
    pub fn new(
        transform: Affine,
        shadow_color: [f32; 4],
        animation_frame: [f32; 2],
        sampled_size: [u32; 2],
    ) -> Self {
        let [scale_x, skew_y, skew_x, scale_y, translate_x, translate_y] =
            transform.as_coeffs().map(|coeff| coeff as f32);
        let [red, green, blue, alpha] = shadow_color;
        Self {
            projection: [
                [scale_x, skew_y, 0.0, 0.0],
                [skew_x, scale_y, 0.0, 0.0],
                [translate_x, translate_y, 1.0, 0.0],
            ],
            shadow_color: [red * alpha, green * alpha, blue * alpha, alpha],
            animation_frame,
            inv_atlas_size: sampled_size.map(|side| 1.0 / side.max(1) as f32),
        }
    }
}

/// Map pixel coordinates of a `width`×`height` target to clip space, y down.
pub fn pixel_to_clip(width: u32, height: u32) -> Affine {
    let width = f64::from(width.max(1));
    let height = f64::from(height.max(1));
    Affine::new([2.0 / width, 0.0, 0.0, -2.0 / height, -1.0, 1.0])
}

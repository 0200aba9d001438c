//! Vertex encoding for batched tile draws.
//!
//! Every tile record becomes four [`TileVertex`] values in corner order
//! top-left, top-right, bottom-right, bottom-left, drawn through the shared
//! index pattern from [`quad_indices`].

use crate::config::TileConfig;
use crate::record::TileRecord;
use bytemuck::{Pod, Zeroable};

/// Inset applied to the sampling clamp rectangle so filtering never reads
/// across a region edge.
pub const FRAME_EPSILON: f32 = 0.5;

pub const VERTICES_PER_QUAD: usize = 4;
pub const INDICES_PER_QUAD: usize = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TileVertex {
    pub position: [f32; 2],
    /// Atlas pixel coordinate, before the animation shift.
    pub uv: [f32; 2],
    /// Clamp rectangle `[u0, v0, u1, v1]` in atlas pixels.
    pub frame: [f32; 4],
    /// Baked animation offset, scaled by the frame's animation phase.
    pub anim: [f32; 2],
    /// Atlas texture unit, or negative for a shadow tile.
    pub texture_id: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeFormat {
    Float32,
    Float32x2,
    Float32x4,
}

impl AttributeFormat {
    pub const fn size(self) -> u64 {
        match self {
            Self::Float32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u64,
    pub format: AttributeFormat,
}

/// Backend-neutral description of the interleaved vertex format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: &'static [VertexAttribute],
}

impl TileVertex {
    pub const FLOATS: usize = 11;

    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: size_of::<Self>() as u64,
        attributes: &[
            VertexAttribute {
                location: 0,
                offset: 0,
                format: AttributeFormat::Float32x2,
            },
            VertexAttribute {
                location: 1,
                offset: 8,
                format: AttributeFormat::Float32x2,
            },
            VertexAttribute {
                location: 2,
                offset: 16,
                format: AttributeFormat::Float32x4,
            },
            VertexAttribute {
                location: 3,
                offset: 32,
                format: AttributeFormat::Float32x2,
            },
            VertexAttribute {
                location: 4,
                offset: 40,
                format: AttributeFormat::Float32,
            },
        ],
    };
}

/// How local texture indices map onto atlas textures and regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasGeometry {
    pub bound_size: u32,
    pub columns: usize,
}

impl AtlasGeometry {
    pub const fn from_config(config: &TileConfig) -> Self {
        Self {
            bound_size: config.bound_size,
            columns: config.atlas_columns(),
        }
    }

    pub const fn regions_per_atlas(&self) -> usize {
        self.columns * self.columns
    }

    /// Pixel origin of `region` inside its atlas texture.
    pub const fn region_origin(&self, region: usize) -> [u32; 2] {
        let column = (region % self.columns) as u32;
        let row = (region / self.columns) as u32;
        [column * self.bound_size, row * self.bound_size]
    }
}

impl Default for AtlasGeometry {
    fn default() -> Self {
        Self::from_config(&TileConfig::default())
    }
}

/// Split a local texture index into `(texture unit, region within the atlas)`.
#[inline]
pub const fn decompose_composite_index(
    index: usize,
    regions_per_atlas: usize,
) -> (usize, usize) {
    (index / regions_per_atlas, index % regions_per_atlas)
}

/// Append four vertices per record.
pub fn write_quads(out: &mut Vec<TileVertex>, records: &[TileRecord], geometry: AtlasGeometry) {
    out.reserve(records.len() * VERTICES_PER_QUAD);
    for tile in records {
        let (texture_id, shift) = match usize::try_from(tile.texture_index) {
            Ok(index) => {
                let (unit, region) =
                    decompose_composite_index(index, geometry.regions_per_atlas());
                let origin = geometry.region_origin(region);
                (unit as f32, [origin[0] as f32, origin[1] as f32])
            }
            Err(_) => (-1.0, [0.0, 0.0]),
        };

        let source_u = tile.source_u + shift[0];
        let source_v = tile.source_v + shift[1];
        let (width, height) = (tile.width, tile.height);
        let frame = [
            source_u + FRAME_EPSILON,
            source_v + FRAME_EPSILON,
            source_u + width - FRAME_EPSILON,
            source_v + height - FRAME_EPSILON,
        ];
        let anim = [tile.anim_x, tile.anim_y];
        let corner = |dx: f32, dy: f32| TileVertex {
            position: [tile.dest_x + dx, tile.dest_y + dy],
            uv: [source_u + dx, source_v + dy],
            frame,
            anim,
            texture_id,
        };
        out.extend([
            corner(0.0, 0.0),
            corner(width, 0.0),
            corner(width, height),
            corner(0.0, height),
        ]);
    }
}

/// Index pattern for `quads` quads: `0,1,2,0,2,3` offset by four per quad.
pub fn quad_indices(quads: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity(quads * INDICES_PER_QUAD);
    for quad in 0..quads as u32 {
        let base = quad * VERTICES_PER_QUAD as u32;
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    indices
}

//! Tile records and square decomposition.

/// One quad: where to read, where to draw, how it animates, which texture.
///
/// A negative `texture_index` marks a shadow tile, filled with the layer's
/// shadow colour instead of sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRecord {
    pub source_u: f32,
    pub source_v: f32,
    pub dest_x: f32,
    pub dest_y: f32,
    pub width: f32,
    pub height: f32,
    pub anim_x: f32,
    pub anim_y: f32,
    pub texture_index: i32,
}

impl TileRecord {
    /// Numeric fields per record in the flat point-buffer form.
    pub const FIELDS: usize = 9;

    /// Flat form, in point-buffer field order.
    #[must_use]
    pub fn to_array(&self) -> [f32; Self::FIELDS] {
        [
            self.source_u,
            self.source_v,
            self.dest_x,
            self.dest_y,
            self.width,
            self.height,
            self.anim_x,
            self.anim_y,
            self.texture_index as f32,
        ]
    }

    pub const fn is_shadow(&self) -> bool {
        self.texture_index < 0
    }

    pub fn is_animated(&self) -> bool {
        self.anim_x != 0.0 || self.anim_y != 0.0
    }
}

/// Source and destination of a tile placement before decomposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRect {
    pub source_u: f32,
    pub source_v: f32,
    pub dest_x: f32,
    pub dest_y: f32,
    pub width: f32,
    pub height: f32,
}

/// Append the records for one placement.
///
/// Squares pass through. A strip whose long side is a multiple of its short side
/// becomes a run of squares, left to right or top to bottom. Anything else,
/// including degenerate sizes, stays one record.
pub fn push_decomposed(
    out: &mut Vec<TileRecord>,
    texture_index: i32,
    rect: TileRect,
    anim: [f32; 2],
) {
    let TileRect {
        source_u,
        source_v,
        dest_x,
        dest_y,
        width,
        height,
    } = rect;
    // offsets are whole tiles' worth of animation steps
    let anim_x = anim[0].trunc();
    let anim_y = anim[1].trunc();
    let record = |du: f32, dv: f32, side_w: f32, side_h: f32| TileRecord {
        source_u: source_u + du,
        source_v: source_v + dv,
        dest_x: dest_x + du,
        dest_y: dest_y + dv,
        width: side_w,
        height: side_h,
        anim_x,
        anim_y,
        texture_index,
    };

    let degenerate = width <= 0.0 || height <= 0.0;
    if degenerate || width == height {
        out.push(record(0.0, 0.0, width, height));
    } else if width % height == 0.0 {
        let count = (width / height) as usize;
        out.reserve(count);
        for step in 0..count {
            out.push(record(step as f32 * height, 0.0, height, height));
        }
    } else if height % width == 0.0 {
        let count = (height / width) as usize;
        out.reserve(count);
        for step in 0..count {
            // vertical run: only v and y advance
            let mut tile = record(0.0, 0.0, width, width);
            tile.source_v += step as f32 * width;
            tile.dest_y += step as f32 * width;
            out.push(tile);
        }
    } else {
        out.push(record(0.0, 0.0, width, height));
    }
}

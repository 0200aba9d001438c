//! Geometry builder: a drawable batch of tile records sharing a bounded
//! texture set.

use crate::buffer_pool::VertexBufferId;
use crate::config::TileConfig;
use crate::record::{TileRecord, TileRect, push_decomposed};
use crate::texture::{TextureRef, TileTexture};

/// Outcome of a tile placement.
///
/// Placements never fail loudly; the status tells valid routing apart from a
/// dropped request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Records were appended to `child` (always 0 for a plain layer) using its
    /// local texture index.
    Placed { child: usize, local_index: usize },
    /// The texture identity is not bound and there is no room to bind it.
    Unresolved,
    /// A numeric index named a child or texture that does not exist.
    OutOfRange,
}

impl Placement {
    pub const fn is_placed(self) -> bool {
        matches!(self, Self::Placed { .. })
    }
}

/// Shadow colour used when nothing else is configured.
pub const DEFAULT_SHADOW_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.5];

#[derive(Debug)]
pub struct TileLayer {
    records: Vec<TileRecord>,
    textures: Vec<TileTexture>,
    tex_per_child: usize,
    has_anim: bool,
    /// Record count at the last `clear_modify`; `None` forces a redraw.
    modification_marker: Option<usize>,
    /// Bumped on every mutation of `records`.
    revision: u64,
    shadow_color: [f32; 4],
    pub(crate) vertex_buffer: Option<VertexBufferId>,
}

// A lease belongs to exactly one layer. A copy starts without one so its
// uploads never land in the original's buffer.
impl Clone for TileLayer {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            textures: self.textures.clone(),
            tex_per_child: self.tex_per_child,
            has_anim: self.has_anim,
            modification_marker: self.modification_marker,
            revision: self.revision,
            shadow_color: self.shadow_color,
            vertex_buffer: None,
        }
    }
}

impl TileLayer {
    pub fn new(tex_per_child: usize) -> Self {
        Self {
            records: Vec::new(),
            textures: Vec::new(),
            tex_per_child: tex_per_child.max(1),
            has_anim: false,
            modification_marker: None,
            revision: 0,
            shadow_color: DEFAULT_SHADOW_COLOR,
            vertex_buffer: None,
        }
    }

    /// Empty layer sized and coloured from `config`.
    pub fn from_config(config: &TileConfig) -> Self {
        let mut layer = Self::new(config.default_tex_per_child());
        layer.shadow_color = config.shadow_color;
        layer
    }

    /// Layer bound to `textures`, keeping at most `tex_per_child` of them.
    pub fn with_textures(textures: &[TileTexture], tex_per_child: usize) -> Self {
        let mut layer = Self::new(tex_per_child);
        layer.set_textures(textures);
        layer
    }

    /// Replace the bound texture list. Records are untouched.
    pub fn set_textures(&mut self, textures: &[TileTexture]) {
        self.textures = textures.iter().take(self.tex_per_child).cloned().collect();
    }

    pub fn textures(&self) -> &[TileTexture] {
        &self.textures
    }

    pub const fn tex_per_child(&self) -> usize {
        self.tex_per_child
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.textures.len() < self.tex_per_child
    }

    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    /// The flat point buffer, [`TileRecord::FIELDS`] numbers per record.
    pub fn point_buffer(&self) -> Vec<f32> {
        self.records.iter().flat_map(TileRecord::to_array).collect()
    }

    pub const fn has_anim(&self) -> bool {
        self.has_anim
    }

    pub const fn revision(&self) -> u64 {
        self.revision
    }

    pub const fn shadow_color(&self) -> [f32; 4] {
        self.shadow_color
    }

    pub fn set_shadow_color(&mut self, color: [f32; 4]) {
        self.shadow_color = color;
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record and re-arm change detection.
    pub fn clear(&mut self) {
        self.records.clear();
        self.has_anim = false;
        self.modification_marker = None;
        self.revision += 1;
    }

    /// Append the records for one tile.
    ///
    /// Non-square strips are split into squares; see
    /// [`crate::record::push_decomposed`].
    pub fn add_rect(
        &mut self,
        texture_index: i32,
        source_u: f32,
        source_v: f32,
        dest_x: f32,
        dest_y: f32,
        width: f32,
        height: f32,
        anim_x: f32,
        anim_y: f32,
    ) {
        let rect = TileRect {
            source_u,
            source_v,
            dest_x,
            dest_y,
            width,
            height,
        };
        let before = self.records.len();
        push_decomposed(&mut self.records, texture_index, rect, [anim_x, anim_y]);
        self.has_anim =
            self.has_anim || self.records[before..].iter().any(TileRecord::is_animated);
        self.revision += 1;
    }

    /// [`Self::add_rect`] without animation.
    pub fn add_rect_static(
        &mut self,
        texture_index: i32,
        source_u: f32,
        source_v: f32,
        dest_x: f32,
        dest_y: f32,
        width: f32,
        height: f32,
    ) {
        self.add_rect(
            texture_index,
            source_u,
            source_v,
            dest_x,
            dest_y,
            width,
            height,
            0.0,
            0.0,
        );
    }

    /// Place a texture's frame at `(dest_x, dest_y)`.
    ///
    /// An identity lookup that misses binds the texture if the layer has room.
    pub fn add_frame<'tex>(
        &mut self,
        texture: impl Into<TextureRef<'tex>>,
        dest_x: f32,
        dest_y: f32,
        anim_x: f32,
        anim_y: f32,
    ) -> Placement {
        let Some(local_index) = self.resolve(texture.into()) else {
            return Placement::Unresolved;
        };
        let frame = self.textures[local_index].frame();
        self.add_rect(
            local_index as i32,
            frame.x,
            frame.y,
            dest_x,
            dest_y,
            frame.width,
            frame.height,
            anim_x,
            anim_y,
        );
        Placement::Placed {
            child: 0,
            local_index,
        }
    }

    fn resolve(&mut self, texture: TextureRef<'_>) -> Option<usize> {
        match texture {
            TextureRef::Index(index) => (index < self.textures.len()).then_some(index),
            TextureRef::Texture(texture) => {
                self.find_texture(texture)
                    .or_else(|| self.push_texture(texture.clone()))
            }
        }
    }

    /// Local index of a texture with the same pixel source.
    pub fn find_texture(&self, texture: &TileTexture) -> Option<usize> {
        self.textures
            .iter()
            .position(|bound| bound.same_source(texture))
    }

    pub(crate) fn push_texture(&mut self, texture: TileTexture) -> Option<usize> {
        if !self.has_spare_capacity() {
            return None;
        }
        self.textures.push(texture);
        Some(self.textures.len() - 1)
    }

    /// Whether the layer changed since the last [`Self::clear_modify`].
    ///
    /// Animated content counts as modified whenever the animation phase advanced.
    pub fn is_modified(&self, animation_advanced: bool) -> bool {
        self.modification_marker != Some(self.records.len())
            || (animation_advanced && self.has_anim)
    }

    pub fn clear_modify(&mut self) {
        self.modification_marker = Some(self.records.len());
    }

    pub const fn vertex_buffer(&self) -> Option<VertexBufferId> {
        self.vertex_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::FrameRect;
    use image::RgbaImage;
    use std::sync::Arc;

    fn texture(size: u32) -> TileTexture {
        TileTexture::new(Arc::new(RgbaImage::new(size, size)))
    }

    #[test]
    fn strip_scenario_emits_four_squares() {
        let mut layer = TileLayer::new(4);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 64.0, 16.0);
        let xs: Vec<f32> = layer.records().iter().map(|tile| tile.dest_x).collect();
        assert_eq!(xs, vec![0.0, 16.0, 32.0, 48.0]);
        assert!(
            layer
                .records()
                .iter()
                .all(|tile| tile.width == 16.0 && tile.height == 16.0)
        );
        assert_eq!(layer.point_buffer().len(), 4 * TileRecord::FIELDS);
    }

    #[test]
    fn clear_then_rebuild_matches_fresh_layer() {
        let build = |layer: &mut TileLayer| {
            layer.add_rect(1, 0.0, 0.0, 10.0, 10.0, 32.0, 16.0, 1.0, 0.0);
            layer.add_rect_static(0, 16.0, 16.0, 0.0, 0.0, 16.0, 48.0);
            layer.add_rect_static(-1, 0.0, 0.0, 5.0, 5.0, 12.0, 10.0);
        };
        let mut reused = TileLayer::new(4);
        reused.add_rect(2, 1.0, 1.0, 1.0, 1.0, 8.0, 8.0, 3.0, 3.0);
        reused.clear();
        assert!(!reused.has_anim());
        build(&mut reused);

        let mut fresh = TileLayer::new(4);
        build(&mut fresh);
        assert_eq!(reused.records(), fresh.records());
        assert_eq!(reused.has_anim(), fresh.has_anim());
    }

    #[test]
    fn modification_tracking() {
        let mut layer = TileLayer::new(4);
        layer.clear_modify();
        assert!(!layer.is_modified(false));
        assert!(!layer.is_modified(true));

        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        assert!(layer.is_modified(false));
        layer.clear_modify();
        assert!(!layer.is_modified(false));

        layer.add_rect(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0, 1.0, 0.0);
        layer.clear_modify();
        assert!(!layer.is_modified(false));
        assert!(layer.is_modified(true));
    }

    #[test]
    fn clear_reports_modified_even_when_already_empty() {
        let mut layer = TileLayer::new(4);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        layer.clear_modify();
        layer.clear();
        assert!(layer.is_modified(false));
    }

    #[test]
    fn add_frame_binds_unknown_texture_while_room_remains() {
        let mut layer = TileLayer::new(2);
        let grass = texture(16);
        let stone = texture(16);
        let water = texture(16);

        assert_eq!(
            layer.add_frame(&grass, 0.0, 0.0, 0.0, 0.0),
            Placement::Placed {
                child: 0,
                local_index: 0
            }
        );
        assert_eq!(
            layer.add_frame(&stone, 16.0, 0.0, 0.0, 0.0),
            Placement::Placed {
                child: 0,
                local_index: 1
            }
        );
        // same source, different frame: resolves to the bound slot
        let grass_corner = grass.sub_frame(FrameRect::new(0.0, 0.0, 8.0, 8.0));
        assert!(layer.add_frame(&grass_corner, 0.0, 16.0, 0.0, 0.0).is_placed());

        let before = layer.records().len();
        assert_eq!(
            layer.add_frame(&water, 0.0, 0.0, 0.0, 0.0),
            Placement::Unresolved
        );
        assert_eq!(layer.records().len(), before);
        assert_eq!(layer.textures().len(), 2);
    }

    #[test]
    fn add_frame_by_index_uses_texture_frame() {
        let source = Arc::new(RgbaImage::new(64, 64));
        let frame = FrameRect::new(16.0, 32.0, 16.0, 16.0);
        let mut layer =
            TileLayer::with_textures(&[TileTexture::with_frame(source, frame)], 4);
        assert!(layer.add_frame(0_usize, 100.0, 50.0, 0.0, 0.0).is_placed());
        let tile = layer.records()[0];
        assert_eq!((tile.source_u, tile.source_v), (16.0, 32.0));
        assert_eq!((tile.dest_x, tile.dest_y), (100.0, 50.0));
        assert_eq!(layer.add_frame(3_usize, 0.0, 0.0, 0.0, 0.0), Placement::Unresolved);
    }

    #[test]
    fn from_config_uses_slot_capacity_and_shadow() {
        let config = TileConfig {
            max_textures: 2,
            shadow_color: [0.0, 0.0, 0.0, 0.25],
            ..TileConfig::default()
        };
        let layer = TileLayer::from_config(&config);
        assert_eq!(layer.tex_per_child(), 8);
        assert_eq!(layer.shadow_color(), [0.0, 0.0, 0.0, 0.25]);
    }

    #[test]
    fn set_textures_truncates_to_capacity() {
        let bound: Vec<TileTexture> = (0..5).map(|_| texture(4)).collect();
        let layer = TileLayer::with_textures(&bound, 3);
        assert_eq!(layer.textures().len(), 3);
        assert!(!layer.has_spare_capacity());
    }

    #[test]
    fn clone_does_not_share_the_vertex_buffer_lease() {
        let mut layer = TileLayer::new(4);
        layer.add_rect_static(0, 0.0, 0.0, 0.0, 0.0, 16.0, 16.0);
        layer.vertex_buffer = Some(VertexBufferId(7));
        let copy = layer.clone();
        assert_eq!(copy.vertex_buffer(), None);
        assert_eq!(copy.records(), layer.records());
        assert_eq!(copy.revision(), layer.revision());
        assert_eq!(layer.vertex_buffer(), Some(VertexBufferId(7)));
    }
}

//! Composite router: fans one logical tile layer out over several physical
//! layers so that no child references more than `tex_per_child` textures.
//!
//! Global texture index `g` lives in child `g / tex_per_child` at local index
//! `g % tex_per_child`. Identity placements use greedy first fit, which keeps
//! the child count at `ceil(distinct / tex_per_child)` for ordered input but
//! can fragment under adversarial binding order. There is no repacking.

use crate::config::TileConfig;
use crate::layer::{DEFAULT_SHADOW_COLOR, Placement, TileLayer};
use crate::texture::{TextureRef, TileTexture};

#[derive(Debug, Clone)]
pub struct CompositeTileLayer {
    children: Vec<TileLayer>,
    tex_per_child: usize,
    /// Child count at the last `clear_modify`.
    modification_marker: usize,
    shadow_color: [f32; 4],
}

impl CompositeTileLayer {
    pub fn new(tex_per_child: usize) -> Self {
        Self {
            children: Vec::new(),
            tex_per_child: tex_per_child.max(1),
            modification_marker: 0,
            shadow_color: DEFAULT_SHADOW_COLOR,
        }
    }

    /// Empty composite whose children take `config`'s capacity and shadow colour.
    pub fn from_config(config: &TileConfig) -> Self {
        let mut composite = Self::new(config.default_tex_per_child());
        composite.shadow_color = config.shadow_color;
        composite
    }

    pub fn with_textures(textures: &[TileTexture], tex_per_child: usize) -> Self {
        let mut composite = Self::new(tex_per_child);
        composite.set_textures(textures);
        composite
    }

    pub const fn tex_per_child(&self) -> usize {
        self.tex_per_child
    }

    pub fn children(&self) -> &[TileLayer] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [TileLayer] {
        &mut self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub const fn shadow_color(&self) -> [f32; 4] {
        self.shadow_color
    }

    pub fn set_shadow_color(&mut self, color: [f32; 4]) {
        self.shadow_color = color;
        for child in &mut self.children {
            child.set_shadow_color(color);
        }
    }

    /// Partition `textures` into groups of `tex_per_child`.
    ///
    /// Existing children take the first groups (surplus children end up with no
    /// textures); missing children are created. Records are never touched.
    pub fn set_textures(&mut self, textures: &[TileTexture]) {
        let mut groups = textures.chunks(self.tex_per_child);
        for child in &mut self.children {
            child.set_textures(groups.next().unwrap_or_default());
        }
        for group in groups {
            let child = self.new_child(group);
            self.children.push(child);
        }
    }

    fn new_child(&self, textures: &[TileTexture]) -> TileLayer {
        let mut child = TileLayer::with_textures(textures, self.tex_per_child);
        child.set_shadow_color(self.shadow_color);
        child
    }

    /// Split a global texture index into `(child, local)`.
    pub const fn route(&self, global_index: usize) -> (usize, usize) {
        (
            global_index / self.tex_per_child,
            global_index % self.tex_per_child,
        )
    }

    /// Forward a tile to the child owning `global_index`.
    ///
    /// Returns [`Placement::OutOfRange`] without side effects when that child
    /// does not exist or has no texture bound at the local index.
    pub fn add_rect(
        &mut self,
        global_index: i32,
        source_u: f32,
        source_v: f32,
        dest_x: f32,
        dest_y: f32,
        width: f32,
        height: f32,
        anim_x: f32,
        anim_y: f32,
    ) -> Placement {
        let Ok(global) = usize::try_from(global_index) else {
            return Placement::OutOfRange;
        };
        let (child_index, local_index) = self.route(global);
        let Some(child) = self
            .children
            .get_mut(child_index)
            .filter(|child| local_index < child.textures().len())
        else {
            return Placement::OutOfRange;
        };
        child.add_rect(
            local_index as i32,
            source_u,
            source_v,
            dest_x,
            dest_y,
            width,
            height,
            anim_x,
            anim_y,
        );
        Placement::Placed {
            child: child_index,
            local_index,
        }
    }

    /// Place a texture's frame, routing by global index or by identity.
    pub fn add_frame<'tex>(
        &mut self,
        texture: impl Into<TextureRef<'tex>>,
        dest_x: f32,
        dest_y: f32,
        anim_x: f32,
        anim_y: f32,
    ) -> Placement {
        let (child_index, local_index) = match texture.into() {
            TextureRef::Index(global) => {
                let (child_index, local_index) = self.route(global);
                let bound = self
                    .children
                    .get(child_index)
                    .is_some_and(|child| local_index < child.textures().len());
                if !bound {
                    return Placement::OutOfRange;
                }
                (child_index, local_index)
            }
            TextureRef::Texture(texture) => self.place_by_identity(texture),
        };

        let child = &mut self.children[child_index];
        let frame = child.textures()[local_index].frame();
        child.add_rect(
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
            child: child_index,
            local_index,
        }
    }

    /// First child holding the texture, else first child with room, else a new child.
    fn place_by_identity(&mut self, texture: &TileTexture) -> (usize, usize) {
        let holder = self
            .children
            .iter()
            .enumerate()
            .find_map(|(child_index, child)| {
                child
                    .find_texture(texture)
                    .map(|local_index| (child_index, local_index))
            });
        if let Some(found) = holder {
            return found;
        }

        for (child_index, child) in self.children.iter_mut().enumerate() {
            if let Some(local_index) = child.push_texture(texture.clone()) {
                return (child_index, local_index);
            }
        }

        let child = self.new_child(core::slice::from_ref(texture));
        self.children.push(child);
        (self.children.len() - 1, 0)
    }

    pub fn clear(&mut self) {
        for child in &mut self.children {
            child.clear();
        }
        self.modification_marker = 0;
    }

    pub fn is_modified(&self, animation_advanced: bool) -> bool {
        self.modification_marker != self.children.len()
            || self
                .children
                .iter()
                .any(|child| child.is_modified(animation_advanced))
    }

    pub fn clear_modify(&mut self) {
        self.modification_marker = self.children.len();
        for child in &mut self.children {
            child.clear_modify();
        }
    }
}

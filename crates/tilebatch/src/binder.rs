//! Texture slot binder: packs a layer's textures into fixed regions of a few
//! shared atlas textures.
//!
//! Local texture `i` always lands in region `i`, which lives in atlas
//! `i / regions_per_atlas`. A region is re-uploaded only when the pixel source
//! it holds is not the one being bound.
//!
//! Layers that sample a single texture skip the atlas: [`DirectTextures`]
//! uploads the whole pixel source once and binds it as is.

use crate::config::TileConfig;
use crate::device::TileDevice;
use crate::error::{TileError, TileResult};
use crate::texture::TileTexture;
use crate::vertex::AtlasGeometry;

/// Atlas units a draw must bind, always `0..count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundUnits {
    count: usize,
}

impl BoundUnits {
    pub const fn count(self) -> usize {
        self.count
    }

    pub const fn is_empty(self) -> bool {
        self.count == 0
    }
}

pub struct TextureSlotBinder<T> {
    atlases: Vec<T>,
    /// Pixel source held by each region. Holding the `Arc` keeps the identity
    /// from being reused by another allocation.
    residents: Vec<Option<TileTexture>>,
    max_textures: usize,
    buffer_size: u32,
    geometry: AtlasGeometry,
    clear_before_write: bool,
}

impl<T> TextureSlotBinder<T> {
    /// `max_textures` is the effective unit count, possibly clamped below the
    /// configured one by device limits.
    pub fn new(config: &TileConfig, max_textures: usize) -> Self {
        let geometry = AtlasGeometry::from_config(config);
        let max_textures = max_textures.max(1);
        Self {
            atlases: Vec::new(),
            residents: vec![None; max_textures * geometry.regions_per_atlas()],
            max_textures,
            buffer_size: config.buffer_size,
            geometry,
            clear_before_write: config.clear_before_write,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.max_textures * self.geometry.regions_per_atlas()
    }

    pub const fn geometry(&self) -> AtlasGeometry {
        self.geometry
    }

    /// Upload whatever `textures` needs and report the units to bind.
    ///
    /// # Errors
    /// [`TileError::CapacityExceeded`] if more textures are requested than
    /// there are regions; nothing is modified in that case. Device failures
    /// propagate.
    pub fn bind<D>(&mut self, device: &mut D, textures: &[TileTexture]) -> TileResult<BoundUnits>
    where
        D: TileDevice<Texture = T> + ?Sized,
    {
        let capacity = self.capacity();
        if textures.len() > capacity {
            log::warn!(
                target: "tilebatch",
                "refusing to bind {} textures, slot capacity is {capacity}",
                textures.len()
            );
            return Err(TileError::CapacityExceeded {
                requested: textures.len(),
                capacity,
            });
        }

        if self.atlases.is_empty() {
            for _ in 0..self.max_textures {
                self.atlases.push(device.create_atlas(self.buffer_size)?);
            }
            log::debug!(
                target: "tilebatch",
                "created {} atlas textures of {}px",
                self.max_textures,
                self.buffer_size
            );
        }

        let regions_per_atlas = self.geometry.regions_per_atlas();
        for (region, texture) in textures.iter().enumerate() {
            if !texture.is_valid() || self.holds(region, texture) {
                continue;
            }
            let atlas = &self.atlases[region / regions_per_atlas];
            let origin = self.geometry.region_origin(region % regions_per_atlas);
            let bound = self.geometry.bound_size;
            if self.clear_before_write {
                device.clear_region(atlas, origin, bound)?;
            }
            let source = texture.source();
            let extent = [source.width().min(bound), source.height().min(bound)];
            device.write_region(atlas, origin, extent, source)?;
            self.residents[region] = Some(texture.clone());
        }

        Ok(BoundUnits {
            count: textures.len().div_ceil(regions_per_atlas),
        })
    }

    fn holds(&self, region: usize, texture: &TileTexture) -> bool {
        self.residents[region]
            .as_ref()
            .is_some_and(|resident| resident.same_source(texture))
    }

    /// Whether the texture's pixel source currently occupies some region.
    pub fn is_resident(&self, texture: &TileTexture) -> bool {
        self.residents
            .iter()
            .flatten()
            .any(|resident| resident.same_source(texture))
    }

    pub fn resident_count(&self) -> usize {
        self.residents.iter().flatten().count()
    }

    /// Atlas unit and pixel origin of `region`.
    pub const fn region_origin(&self, region: usize) -> (usize, [u32; 2]) {
        let regions_per_atlas = self.geometry.regions_per_atlas();
        (
            region / regions_per_atlas,
            self.geometry.region_origin(region % regions_per_atlas),
        )
    }

    /// The first `units` atlas textures.
    pub fn atlases(&self, units: BoundUnits) -> &[T] {
        &self.atlases[..units.count().min(self.atlases.len())]
    }

    /// Forget every atlas and resident without touching the device.
    pub fn invalidate(&mut self) {
        self.atlases.clear();
        self.residents.fill(None);
    }
}

/// A whole-source texture handed out by [`DirectTextures::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectSlot {
    index: usize,
    /// Source size in pixels, the sampling scale for this texture.
    pub size: [u32; 2],
}

struct DirectEntry<T> {
    source: TileTexture,
    texture: T,
    size: [u32; 2],
    last_use: u64,
}

/// Device textures for directly bound pixel sources, least recently used
/// evicted first.
pub struct DirectTextures<T> {
    entries: Vec<DirectEntry<T>>,
    capacity: usize,
    uses: u64,
}

impl<T> DirectTextures<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            uses: 0,
        }
    }

    /// The device texture for `texture`'s pixel source, uploading it on first use.
    ///
    /// # Errors
    /// Device failures propagate; the cache is unchanged in that case.
    pub fn bind<D>(&mut self, device: &mut D, texture: &TileTexture) -> TileResult<DirectSlot>
    where
        D: TileDevice<Texture = T> + ?Sized,
    {
        self.uses += 1;
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.source.same_source(texture))
        {
            let entry = &mut self.entries[index];
            entry.last_use = self.uses;
            return Ok(DirectSlot {
                index,
                size: entry.size,
            });
        }

        let source = texture.source();
        let created = device.create_texture(source)?;
        let entry = DirectEntry {
            source: texture.clone(),
            texture: created,
            size: [source.width(), source.height()],
            last_use: self.uses,
        };
        let index = if self.entries.len() < self.capacity {
            self.entries.push(entry);
            self.entries.len() - 1
        } else {
            let (oldest, _) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, cached)| cached.last_use)
                .ok_or_else(|| anyhow::anyhow!("direct texture cache has no entries"))?;
            log::trace!(target: "tilebatch", "evicting direct texture slot {oldest}");
            self.entries[oldest] = entry;
            oldest
        };
        Ok(DirectSlot {
            index,
            size: [source.width(), source.height()],
        })
    }

    /// The texture of `slot` as a one-unit binding.
    pub fn textures(&self, slot: DirectSlot) -> &[T] {
        self.entries
            .get(slot.index)
            .map_or(&[], |entry| core::slice::from_ref(&entry.texture))
    }

    pub fn is_resident(&self, texture: &TileTexture) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.source.same_source(texture))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every texture without touching the device.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, RecordingDevice};
    use image::RgbaImage;
    use std::sync::Arc;

    fn textures(count: usize) -> Vec<TileTexture> {
        (0..count)
            .map(|_| TileTexture::new(Arc::new(RgbaImage::new(32, 32))))
            .collect()
    }

    fn is_upload(call: &DeviceCall) -> bool {
        matches!(call, DeviceCall::WriteRegion { .. })
    }

    #[test]
    fn capacity_refusal_modifies_nothing() {
        let config = TileConfig::default();
        let mut device = RecordingDevice::new();
        let mut binder = TextureSlotBinder::new(&config, config.max_textures);
        let err = binder.bind(&mut device, &textures(17));
        assert!(matches!(
            err,
            Err(TileError::CapacityExceeded {
                requested: 17,
                capacity: 16
            })
        ));
        assert!(device.calls().is_empty());
        assert_eq!(binder.resident_count(), 0);
    }

    #[test]
    fn rebinding_same_sources_uploads_nothing() {
        let config = TileConfig::default();
        let mut device = RecordingDevice::new();
        let mut binder = TextureSlotBinder::new(&config, config.max_textures);
        let set = textures(5);

        let units = binder.bind(&mut device, &set).unwrap();
        assert_eq!(units.count(), 2);
        assert_eq!(device.count(is_upload), 5);
        assert_eq!(binder.atlases(units).len(), 2);

        device.take_calls();
        binder.bind(&mut device, &set).unwrap();
        assert_eq!(device.count(is_upload), 0);

        // replacing one texture re-uploads only its region
        let mut changed = set.clone();
        changed[3] = textures(1).remove(0);
        binder.bind(&mut device, &changed).unwrap();
        assert_eq!(device.count(is_upload), 1);
        assert!(!binder.is_resident(&set[3]));
        assert!(binder.is_resident(&changed[3]));
    }

    #[test]
    fn regions_follow_quadrant_order() {
        let config = TileConfig::default();
        let mut device = RecordingDevice::new();
        let mut binder = TextureSlotBinder::new(&config, config.max_textures);
        binder.bind(&mut device, &textures(6)).unwrap();

        let origins: Vec<[u32; 2]> = device
            .calls()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::WriteRegion { origin, .. } => Some(*origin),
                _ => None,
            })
            .collect();
        assert_eq!(
            origins,
            vec![[0, 0], [1024, 0], [0, 1024], [1024, 1024], [0, 0], [1024, 0]]
        );
        assert_eq!(binder.region_origin(5), (1, [1024, 0]));
    }

    #[test]
    fn clear_before_write_precedes_upload() {
        let config = TileConfig {
            clear_before_write: true,
            ..TileConfig::default()
        };
        let mut device = RecordingDevice::new();
        let mut binder = TextureSlotBinder::new(&config, config.max_textures);
        binder.bind(&mut device, &textures(1)).unwrap();
        let tail: Vec<&DeviceCall> = device.calls().iter().rev().take(2).collect();
        assert!(is_upload(tail[0]));
        assert!(matches!(
            tail[1],
            DeviceCall::ClearRegion { size: 1024, .. }
        ));
    }

    #[test]
    fn oversized_source_is_clipped_to_region() {
        let config = TileConfig {
            buffer_size: 64,
            bound_size: 32,
            ..TileConfig::default()
        };
        let mut device = RecordingDevice::new();
        let mut binder = TextureSlotBinder::new(&config, 1);
        let big = TileTexture::new(Arc::new(RgbaImage::new(100, 20)));
        binder.bind(&mut device, &[big]).unwrap();
        assert!(device.calls().iter().any(|call| matches!(
            call,
            DeviceCall::WriteRegion {
                extent: [32, 20],
                ..
            }
        )));
    }

    #[test]
    fn invalidate_forces_recreation() {
        let config = TileConfig::default();
        let mut device = RecordingDevice::new();
        let mut binder = TextureSlotBinder::new(&config, config.max_textures);
        let set = textures(2);
        binder.bind(&mut device, &set).unwrap();
        binder.invalidate();
        assert_eq!(binder.resident_count(), 0);

        device.take_calls();
        binder.bind(&mut device, &set).unwrap();
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::CreateAtlas { .. })),
            4
        );
        assert_eq!(device.count(is_upload), 2);
    }

    fn is_texture_upload(call: &DeviceCall) -> bool {
        matches!(call, DeviceCall::CreateTexture { .. })
    }

    #[test]
    fn direct_textures_upload_each_source_once() {
        let mut device = RecordingDevice::new();
        let mut direct = DirectTextures::new(4);
        let grass = TileTexture::new(Arc::new(RgbaImage::new(48, 16)));

        let slot = direct.bind(&mut device, &grass).unwrap();
        assert_eq!(slot.size, [48, 16]);
        assert_eq!(direct.textures(slot).len(), 1);
        let again = direct.bind(&mut device, &grass).unwrap();
        assert_eq!(again, slot);
        assert_eq!(device.count(is_texture_upload), 1);
        assert!(device.calls().iter().any(|call| matches!(
            call,
            DeviceCall::CreateTexture { size: [48, 16], .. }
        )));
    }

    #[test]
    fn direct_textures_evict_least_recently_used() {
        let mut device = RecordingDevice::new();
        let mut direct = DirectTextures::new(2);
        let set = textures(3);
        direct.bind(&mut device, &set[0]).unwrap();
        direct.bind(&mut device, &set[1]).unwrap();
        direct.bind(&mut device, &set[0]).unwrap();
        direct.bind(&mut device, &set[2]).unwrap();

        assert_eq!(direct.len(), 2);
        assert!(direct.is_resident(&set[0]));
        assert!(!direct.is_resident(&set[1]));
        assert!(direct.is_resident(&set[2]));

        direct.invalidate();
        assert!(direct.is_empty());
    }
}

//! Vertex buffer pool keyed by layer.
//!
//! A layer leases one buffer id on its first hardware draw and keeps it. Layers
//! are dropped by the host without notice, so entries that go untouched for
//! longer than the leak window are swept and their storage destroyed. The
//! sweep runs at most once per window.

use crate::device::TileDevice;
use crate::error::TileResult;
use crate::vertex::{TileVertex, VertexLayout};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::rc::Rc;
use std::time::Instant;

/// Millisecond time source for the leak sweep.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock, counted from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.set(self.now.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexBufferId(pub u64);

/// What was last written into an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadKey {
    pub vertices: usize,
    pub revision: u64,
}

#[derive(Debug)]
pub struct VertexBufferEntry<B> {
    pub id: VertexBufferId,
    pub buffer: B,
    pub capacity_bytes: u64,
    pub layout: VertexLayout,
    pub uploaded: Option<UploadKey>,
    pub last_access_ms: u64,
}

impl<B> VertexBufferEntry<B> {
    pub fn needs_upload(&self, key: UploadKey) -> bool {
        self.uploaded != Some(key)
    }

    /// Rewrite the buffer with `vertices` unless `key` matches the last upload.
    ///
    /// Storage doubles until it fits and is never shrunk. Returns whether
    /// anything was written.
    ///
    /// # Errors
    /// Propagates device allocation and write failures; the entry then keeps
    /// no upload key so the next draw retries.
    pub fn upload<D>(
        &mut self,
        device: &mut D,
        key: UploadKey,
        vertices: &[TileVertex],
    ) -> TileResult<bool>
    where
        D: TileDevice<Buffer = B> + ?Sized,
    {
        if !self.needs_upload(key) {
            return Ok(false);
        }
        self.uploaded = None;

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let needed = bytes.len() as u64;
        if needed > self.capacity_bytes {
            let mut capacity = self.capacity_bytes.max(self.layout.stride);
            while capacity < needed {
                capacity *= 2;
            }
            let grown = device.create_vertex_buffer(capacity)?;
            let old = core::mem::replace(&mut self.buffer, grown);
            device.destroy_buffer(old);
            log::debug!(
                target: "tilebatch",
                "vertex buffer {:?} grew {} -> {capacity} bytes",
                self.id,
                self.capacity_bytes
            );
            self.capacity_bytes = capacity;
        }
        if !bytes.is_empty() {
            device.write_vertex_buffer(&self.buffer, bytes)?;
        }
        self.uploaded = Some(key);
        Ok(true)
    }
}

pub struct VertexBufferPool<B> {
    entries: BTreeMap<VertexBufferId, VertexBufferEntry<B>>,
    next_id: u64,
    last_sweep_ms: u64,
    leak_window_ms: u64,
    clock: Box<dyn Clock>,
}

impl<B> VertexBufferPool<B> {
    pub fn new(leak_window_ms: u64) -> Self {
        Self::with_clock(leak_window_ms, Box::new(SystemClock::default()))
    }

    pub fn with_clock(leak_window_ms: u64, clock: Box<dyn Clock>) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
            last_sweep_ms: 0,
            leak_window_ms,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: VertexBufferId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Entry for `id`, or a fresh one when `id` is `None` or was swept.
    ///
    /// # Errors
    /// Propagates device allocation failures.
    pub fn get_or_create<D>(
        &mut self,
        device: &mut D,
        id: Option<VertexBufferId>,
    ) -> TileResult<&mut VertexBufferEntry<B>>
    where
        D: TileDevice<Buffer = B> + ?Sized,
    {
        let now = self.sweep(device);
        let id = id
            .filter(|id| self.entries.contains_key(id))
            .unwrap_or(VertexBufferId(self.next_id));
        let entry = match self.entries.entry(id) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let layout = TileVertex::LAYOUT;
                let buffer = device.create_vertex_buffer(layout.stride)?;
                self.next_id += 1;
                vacant.insert(VertexBufferEntry {
                    id,
                    buffer,
                    capacity_bytes: layout.stride,
                    layout,
                    uploaded: None,
                    last_access_ms: now,
                })
            }
        };
        entry.last_access_ms = now;
        Ok(entry)
    }

    /// Existing entry for `id`, refreshing its access time.
    pub fn get<D>(&mut self, device: &mut D, id: VertexBufferId) -> Option<&mut VertexBufferEntry<B>>
    where
        D: TileDevice<Buffer = B> + ?Sized,
    {
        let now = self.sweep(device);
        let entry = self.entries.get_mut(&id)?;
        entry.last_access_ms = now;
        Some(entry)
    }

    /// Release an entry's storage. Unknown ids are ignored.
    pub fn remove<D>(&mut self, device: &mut D, id: VertexBufferId)
    where
        D: TileDevice<Buffer = B> + ?Sized,
    {
        if let Some(entry) = self.entries.remove(&id) {
            device.destroy_buffer(entry.buffer);
        }
    }

    /// Forget every entry without touching the device.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    /// Drop entries idle for longer than the leak window. Returns the current time.
    fn sweep<D>(&mut self, device: &mut D) -> u64
    where
        D: TileDevice<Buffer = B> + ?Sized,
    {
        let now = self.clock.now_ms();
        let horizon = now.saturating_sub(self.leak_window_ms);
        // a last sweep in the future means the clock went backwards
        if self.last_sweep_ms < horizon || self.last_sweep_ms > now {
            self.last_sweep_ms = now;
            let stale: Vec<VertexBufferId> = self
                .entries
                .values()
                .filter(|entry| entry.last_access_ms < horizon)
                .map(|entry| entry.id)
                .collect();
            if !stale.is_empty() {
                log::debug!(
                    target: "tilebatch",
                    "sweeping {} idle vertex buffers",
                    stale.len()
                );
            }
            for id in stale {
                self.remove(device, id);
            }
        }
        now
    }
}

//! Memory bounded LRU cache for decompressed point chunks, plus the
//! flattened per-attribute view a renderer uploads to the GPU.

use crate::copc::{Node, VoxelKey};
use crate::error::Result;
use crate::point::{append_extra_components, CopcPoint};
use crate::vlr::ExtraDimension;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Fixed bookkeeping cost charged per cached entry on top of the
/// per-point estimate.
pub const ENTRY_OVERHEAD_BYTES: u64 = 24;

/// One cached chunk: the points plus access metadata.
///
/// `memory_size` is fixed at insertion time from the point count and
/// the cache's per-point estimate.
#[derive(Debug)]
pub struct CachedNodeData {
    pub key: VoxelKey,
    pub points: Arc<Vec<CopcPoint>>,
    pub memory_size: u64,
    pub last_access: Instant,
    pub access_count: u64,
}

/// Map slot: the entry plus its position in the recency list.
///
/// The list is intrusive; `prev`/`next` are keys into the same map, so
/// the map owns every entry and the list holds no second owner.
#[derive(Debug)]
struct CacheSlot {
    data: CachedNodeData,
    /// towards the head (more recently used)
    prev: Option<VoxelKey>,
    /// towards the tail (eviction end)
    next: Option<VoxelKey>,
}

/// Cache statistics snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub current_memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub memory_usage_percent: f64,
    pub count: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_evictions: u64,
    pub hit_rate: f64,
}

/// Memory bounded LRU cache of decompressed chunks, keyed by voxel.
///
/// Every hit splices the entry to the front of the recency list; when
/// an insertion would exceed the memory cap, tail entries are evicted
/// first. Point arrays are handed out as shared references, so holding
/// one across an eviction is safe.
#[derive(Debug)]
pub struct PointCache {
    slots: HashMap<VoxelKey, CacheSlot>,
    head: Option<VoxelKey>,
    tail: Option<VoxelKey>,
    max_memory_bytes: u64,
    bytes_per_point: u64,
    current_memory_bytes: u64,
    total_hits: u64,
    total_misses: u64,
    total_evictions: u64,
    stride_dirty: bool,
    stride: Option<Arc<StrideData>>,
}

impl PointCache {
    /// Creates a cache capped at `max_memory_bytes`, accounting
    /// `bytes_per_point` per stored point. Both must be positive.
    pub fn new(max_memory_bytes: u64, bytes_per_point: u64) -> Result<Self> {
        if max_memory_bytes == 0 {
            return Err(crate::Error::InvalidArgument(
                "cache size must be positive".to_string(),
            ));
        }
        if bytes_per_point == 0 {
            return Err(crate::Error::InvalidArgument(
                "bytes per point estimate must be positive".to_string(),
            ));
        }
        Ok(PointCache {
            slots: HashMap::new(),
            head: None,
            tail: None,
            max_memory_bytes,
            bytes_per_point,
            current_memory_bytes: 0,
            total_hits: 0,
            total_misses: 0,
            total_evictions: 0,
            stride_dirty: true,
            stride: None,
        })
    }

    /// [PointCache::new] with the cap given in megabytes.
    pub fn with_megabytes(megabytes: u64, bytes_per_point: u64) -> Result<Self> {
        Self::new(megabytes * 1024 * 1024, bytes_per_point)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the key is cached, without touching recency or statistics.
    pub fn contains(&self, key: &VoxelKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Looks up a cached chunk. A hit moves the entry to the front of
    /// the recency list and updates its access metadata.
    pub fn try_get(&mut self, key: &VoxelKey) -> Option<Arc<Vec<CopcPoint>>> {
        if !self.slots.contains_key(key) {
            self.total_misses += 1;
            return None;
        }
        self.move_to_front(*key);
        self.total_hits += 1;
        let slot = self.slots.get_mut(key).expect("checked above");
        slot.data.access_count += 1;
        slot.data.last_access = Instant::now();
        Some(Arc::clone(&slot.data.points))
    }

    /// Inserts a chunk, evicting from the tail until it fits. A chunk
    /// larger than the whole cache is dropped without evicting anything.
    pub fn put(&mut self, key: VoxelKey, points: Arc<Vec<CopcPoint>>) {
        let memory_size = ENTRY_OVERHEAD_BYTES + points.len() as u64 * self.bytes_per_point;
        if memory_size > self.max_memory_bytes {
            log::debug!(
                "not caching {key}: {memory_size} bytes exceed the {} byte cap",
                self.max_memory_bytes
            );
            return;
        }

        if self.slots.contains_key(&key) {
            self.unlink(&key);
            let old = self.slots.remove(&key).expect("checked above");
            self.current_memory_bytes -= old.data.memory_size;
        }
        while self.current_memory_bytes + memory_size > self.max_memory_bytes {
            self.evict_tail();
        }

        self.slots.insert(
            key,
            CacheSlot {
                data: CachedNodeData {
                    key,
                    points,
                    memory_size,
                    last_access: Instant::now(),
                    access_count: 0,
                },
                prev: None,
                next: None,
            },
        );
        self.push_front(key);
        self.current_memory_bytes += memory_size;
        self.stride_dirty = true;
    }

    /// Drops one entry; absent keys are a no-op.
    pub fn remove(&mut self, key: &VoxelKey) -> Option<Arc<Vec<CopcPoint>>> {
        if !self.slots.contains_key(key) {
            return None;
        }
        self.unlink(key);
        let slot = self.slots.remove(key).expect("checked above");
        self.current_memory_bytes -= slot.data.memory_size;
        self.stride_dirty = true;
        Some(slot.data.points)
    }

    /// Drops everything; statistics are kept.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = None;
        self.tail = None;
        self.current_memory_bytes = 0;
        self.stride_dirty = true;
    }

    /// Returns the cached points for a node, or loads, caches and
    /// returns them via `loader`.
    pub fn get_or_load_points<F>(&mut self, node: &Node, loader: F) -> Result<Arc<Vec<CopcPoint>>>
    where
        F: FnOnce() -> Result<Vec<CopcPoint>>,
    {
        if let Some(points) = self.try_get(&node.key) {
            return Ok(points);
        }
        let points = Arc::new(loader()?);
        self.put(node.key, Arc::clone(&points));
        Ok(points)
    }

    /// Resolves a batch of nodes: cached chunks first, then the misses
    /// loaded sequentially. A loader failure skips that node with a
    /// warning instead of failing the batch.
    pub fn get_or_load_points_from_nodes<F>(
        &mut self,
        nodes: &[Node],
        mut loader: F,
    ) -> Vec<Arc<Vec<CopcPoint>>>
    where
        F: FnMut(&Node) -> Result<Vec<CopcPoint>>,
    {
        let mut output = Vec::with_capacity(nodes.len());
        let mut misses = Vec::new();
        for node in nodes {
            match self.try_get(&node.key) {
                Some(points) => output.push(points),
                None => misses.push(*node),
            }
        }
        for node in &misses {
            match loader(node) {
                Ok(points) => {
                    let points = Arc::new(points);
                    self.put(node.key, Arc::clone(&points));
                    output.push(points);
                }
                Err(err) => {
                    log::warn!("skipping node {}: {err}", node.key);
                }
            }
        }
        output
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.total_hits + self.total_misses;
        CacheStats {
            current_memory_bytes: self.current_memory_bytes,
            max_memory_bytes: self.max_memory_bytes,
            memory_usage_percent: self.current_memory_bytes as f64
                / self.max_memory_bytes as f64
                * 100.0,
            count: self.slots.len(),
            total_hits: self.total_hits,
            total_misses: self.total_misses,
            total_evictions: self.total_evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.total_hits as f64 / lookups as f64
            },
        }
    }

    /// Cached entries, most recently used first.
    pub fn entries(&self) -> EntryIter {
        EntryIter {
            cache: self,
            next: self.head,
        }
    }

    /// The flattened per-attribute view of everything currently cached,
    /// in recency order at the moment of rebuild.
    ///
    /// The view is rebuilt only after a mutation (put, remove, clear or
    /// eviction); untouched callers get the same shared instance back.
    pub fn stride_data(&mut self, extra_dimensions: &[ExtraDimension]) -> Arc<StrideData> {
        if !self.stride_dirty {
            if let Some(stride) = &self.stride {
                return Arc::clone(stride);
            }
        }
        let stride = Arc::new(StrideData::build(self.entries(), extra_dimensions));
        self.stride = Some(Arc::clone(&stride));
        self.stride_dirty = false;
        stride
    }

    fn evict_tail(&mut self) {
        let Some(key) = self.tail else {
            return;
        };
        self.unlink(&key);
        let slot = self.slots.remove(&key).expect("tail key is present");
        self.current_memory_bytes -= slot.data.memory_size;
        self.total_evictions += 1;
        self.stride_dirty = true;
        log::debug!("evicted {key} ({} bytes)", slot.data.memory_size);
    }

    /// Detaches a slot from the recency list, patching neighbors and the
    /// head/tail anchors. The slot stays in the map.
    fn unlink(&mut self, key: &VoxelKey) {
        let slot = self.slots.get_mut(key).expect("unlink of present key");
        let prev = slot.prev.take();
        let next = slot.next.take();

        match prev {
            Some(prev_key) => {
                self.slots.get_mut(&prev_key).expect("list link").next = next;
            }
            None => self.head = next,
        }
        match next {
            Some(next_key) => {
                self.slots.get_mut(&next_key).expect("list link").prev = prev;
            }
            None => self.tail = prev,
        }
    }

    /// Attaches a detached slot at the head of the recency list.
    fn push_front(&mut self, key: VoxelKey) {
        let old_head = self.head.replace(key);
        {
            let slot = self.slots.get_mut(&key).expect("push of present key");
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(old_key) => {
                self.slots.get_mut(&old_key).expect("list link").prev = Some(key);
            }
            None => self.tail = Some(key),
        }
    }

    fn move_to_front(&mut self, key: VoxelKey) {
        if self.head == Some(key) {
            return;
        }
        self.unlink(&key);
        self.push_front(key);
    }
}

/// Iterator over cached entries in recency order.
pub struct EntryIter<'a> {
    cache: &'a PointCache,
    next: Option<VoxelKey>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = &'a CachedNodeData;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.next?;
        let slot = self.cache.slots.get(&key).expect("list key is present");
        self.next = slot.next;
        Some(&slot.data)
    }
}

/// Separated attribute arrays over all cached points, one value (or
/// short vector) per point, ready for vertex buffer upload.
#[derive(Debug, Default, PartialEq)]
pub struct StrideData {
    /// `(x, y, z, 1)` per point
    pub positions: Vec<[f32; 4]>,
    /// `(r, g, b, 1)` per point; channels default to 1 where the format
    /// carries no color
    pub colors: Vec<[f32; 4]>,
    /// intensity normalized by u16::MAX
    pub intensities: Vec<f32>,
    pub classifications: Vec<f32>,
    pub return_numbers: Vec<f32>,
    pub number_of_returns: Vec<f32>,
    pub scan_angles: Vec<f32>,
    pub user_data: Vec<f32>,
    pub point_source_ids: Vec<f32>,
    pub gps_times: Vec<f32>,
    /// Per declared extra dimension: components interleaved per point
    pub extra_dimensions: HashMap<String, Vec<f32>>,
}

impl StrideData {
    pub fn point_count(&self) -> usize {
        self.positions.len()
    }

    fn build<'a>(
        entries: impl Iterator<Item = &'a CachedNodeData>,
        extra_dimensions: &[ExtraDimension],
    ) -> StrideData {
        let mut data = StrideData::default();
        for dimension in extra_dimensions {
            data.extra_dimensions
                .insert(dimension.name.clone(), Vec::new());
        }

        for entry in entries {
            for point in entry.points.iter() {
                data.positions
                    .push([point.x as f32, point.y as f32, point.z as f32, 1.0]);
                let color = point.color.unwrap_or(crate::point::PointColor {
                    red: 1.0,
                    green: 1.0,
                    blue: 1.0,
                });
                data.colors.push([color.red, color.green, color.blue, 1.0]);
                data.intensities
                    .push(point.intensity as f32 / u16::MAX as f32);
                data.classifications.push(point.classification as f32);
                data.return_numbers.push(point.return_number as f32);
                data.number_of_returns.push(point.number_of_returns as f32);
                data.scan_angles.push(point.scan_angle as f32);
                data.user_data.push(point.user_data as f32);
                data.point_source_ids.push(point.point_source_id as f32);
                data.gps_times.push(point.gps_time.unwrap_or(0.0) as f32);

                for (index, dimension) in extra_dimensions.iter().enumerate() {
                    let values = data
                        .extra_dimensions
                        .get_mut(&dimension.name)
                        .expect("inserted above");
                    append_extra_components(point, extra_dimensions, index, values);
                }
            }
        }
        data
    }
}

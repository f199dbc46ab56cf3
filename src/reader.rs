//! COPC file reader facade: hierarchy store, decompressor and point
//! cache wired together behind the spatial query API.

use crate::cache::{CacheStats, PointCache, StrideData};
use crate::copc::{CopcInfo, Node, VoxelKey, COPC_INFO_SIZE};
use crate::decompressor::LazDecompressor;
use crate::error::{Error, Result};
use crate::geometry::{Bounds, Frustum, Sphere};
use crate::header::LasHeader;
use crate::hierarchy::HierarchyStore;
use crate::point::CopcPoint;
use crate::traversal::{
    box_query, distance_query, frustum_query, sphere_query, traverse, TraversalContext,
    TraversalDecision, TraversalResult,
};
use crate::vlr::{ExtraDimension, Vlr, EXTRA_DIMENSION_RECORD_SIZE};
use laz::LazVlr;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

/// Tunables of a [CachedReader].
#[derive(Clone, Copy, Debug)]
pub struct CachedReaderOptions {
    /// Point cache cap in megabytes
    pub cache_size_mb: u64,
    /// Memory accounting constant per cached point
    pub estimated_bytes_per_point: u64,
}

impl Default for CachedReaderOptions {
    fn default() -> Self {
        CachedReaderOptions {
            cache_size_mb: 512,
            estimated_bytes_per_point: 100,
        }
    }
}

/// COPC reader with a bounded in-memory point cache.
///
/// All spatial queries run a predicate traversal over the lazily loaded
/// hierarchy, then resolve the selected nodes through the cache,
/// decompressing only chunks that are not resident yet.
///
/// The reader is single threaded by design: the byte source is a
/// stateful seekable stream and the chunk decoder is not reentrant.
#[derive(Debug)]
pub struct CachedReader<R> {
    src: R,
    header: LasHeader,
    copc_info: CopcInfo,
    wkt: Option<String>,
    hierarchy: HierarchyStore,
    decompressor: LazDecompressor,
    cache: PointCache,
}

impl<R: Read + Seek> CachedReader<R> {
    /// Opens a COPC byte source with default options.
    pub fn open(src: R) -> Result<Self> {
        Self::open_with(src, CachedReaderOptions::default())
    }

    /// Opens a COPC byte source: LAS 1.4 header, the COPC info VLR
    /// (which must be the first VLR), then the remaining VLRs to find
    /// the laszip record, an optional WKT CRS and optional extra-bytes
    /// descriptors.
    pub fn open_with(mut src: R, options: CachedReaderOptions) -> Result<Self> {
        let header = LasHeader::read_from(&mut src)?;

        let copc_vlr = Vlr::read_from(&mut src)?;
        if copc_vlr.user_id != "copc" || copc_vlr.record_id != 1 {
            return Err(Error::MissingCopcVlr);
        }
        if copc_vlr.data.len() != COPC_INFO_SIZE {
            return Err(Error::BadVlrLength {
                user_id: copc_vlr.user_id.clone(),
                record_id: copc_vlr.record_id,
                expected: COPC_INFO_SIZE,
                actual: copc_vlr.data.len(),
            });
        }
        let copc_info = CopcInfo::read_from(Cursor::new(&copc_vlr.data))?;

        let mut laszip_vlr = None;
        let mut wkt = None;
        let mut extra_dimensions: Vec<ExtraDimension> = Vec::new();
        for _ in 1..header.number_of_variable_length_records {
            let vlr = Vlr::read_from(&mut src)?;
            match (vlr.user_id.as_str(), vlr.record_id) {
                ("laszip encoded", 22204) => {
                    laszip_vlr = Some(LazVlr::read_from(vlr.data.as_slice())?)
                }
                ("LASF_Projection", 2112) => wkt = Some(vlr.data_as_string()),
                ("LASF_Spec", 4) => {
                    if vlr.data.len() % EXTRA_DIMENSION_RECORD_SIZE != 0 {
                        return Err(Error::BadVlrLength {
                            user_id: vlr.user_id.clone(),
                            record_id: vlr.record_id,
                            expected: EXTRA_DIMENSION_RECORD_SIZE,
                            actual: vlr.data.len(),
                        });
                    }
                    extra_dimensions = ExtraDimension::read_set(&vlr.data)?;
                }
                (user_id, record_id) => {
                    log::debug!("ignoring VLR {user_id}/{record_id}");
                }
            }
        }
        let laz_vlr = laszip_vlr.ok_or(Error::LasZipVlrNotFound)?;

        Ok(CachedReader {
            decompressor: LazDecompressor::new(laz_vlr, &header, extra_dimensions)?,
            hierarchy: HierarchyStore::new(&copc_info),
            cache: PointCache::with_megabytes(
                options.cache_size_mb,
                options.estimated_bytes_per_point,
            )?,
            src,
            header,
            copc_info,
            wkt,
        })
    }

    /// LAS header
    pub fn header(&self) -> &LasHeader {
        &self.header
    }

    /// COPC info VLR content
    pub fn copc_info(&self) -> &CopcInfo {
        &self.copc_info
    }

    /// WKT of the `LASF_Projection` VLR, when the file carries one.
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Declared extra-bytes dimensions, in declaration order.
    pub fn extra_dimensions(&self) -> &[ExtraDimension] {
        self.decompressor.extra_dimensions()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &PointCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PointCache {
        &mut self.cache
    }

    /// The flattened per-attribute view of everything currently cached.
    pub fn stride_data(&mut self) -> Arc<StrideData> {
        self.cache.stride_data(self.decompressor.extra_dimensions())
    }

    /// Runs a caller supplied predicate traversal over the octree.
    pub fn query_nodes<F>(&mut self, predicate: F) -> Result<TraversalResult>
    where
        F: FnMut(&TraversalContext) -> TraversalDecision,
    {
        traverse(
            &mut self.hierarchy,
            &mut self.src,
            &self.header,
            &self.copc_info,
            predicate,
        )
    }

    /// Resolves a single octree key to its node, if it has point data.
    pub fn node(&mut self, key: VoxelKey) -> Result<Option<Node>> {
        self.hierarchy.get_node(&mut self.src, key)
    }

    /// All nodes of the octree; loads the complete hierarchy.
    /// The order of the returned nodes is unspecified.
    pub fn all_nodes(&mut self) -> Result<Vec<Node>> {
        self.hierarchy.all_nodes(&mut self.src)
    }

    /// Points of all nodes overlapping the box, cached or freshly
    /// decompressed, one array per node.
    pub fn points_in_box(
        &mut self,
        bounds: Bounds,
        resolution: f64,
    ) -> Result<Vec<Arc<Vec<CopcPoint>>>> {
        let nodes = self.query_nodes(box_query(bounds, resolution))?.cached_nodes;
        Ok(self.load_nodes(&nodes))
    }

    /// Points of all nodes overlapping the sphere.
    pub fn points_in_sphere(
        &mut self,
        sphere: Sphere,
        resolution: f64,
    ) -> Result<Vec<Arc<Vec<CopcPoint>>>> {
        let nodes = self
            .query_nodes(sphere_query(sphere, resolution))?
            .cached_nodes;
        Ok(self.load_nodes(&nodes))
    }

    /// Points of all nodes within `distance` of a point.
    pub fn points_within_distance(
        &mut self,
        center_x: f64,
        center_y: f64,
        center_z: f64,
        distance: f64,
        resolution: f64,
    ) -> Result<Vec<Arc<Vec<CopcPoint>>>> {
        let nodes = self
            .query_nodes(distance_query(
                center_x, center_y, center_z, distance, resolution,
            ))?
            .cached_nodes;
        Ok(self.load_nodes(&nodes))
    }

    /// Points of all nodes intersecting the frustum.
    pub fn points_in_frustum(
        &mut self,
        frustum: Frustum,
        resolution: f64,
    ) -> Result<Vec<Arc<Vec<CopcPoint>>>> {
        let nodes = self
            .query_nodes(frustum_query(frustum, resolution))?
            .cached_nodes;
        Ok(self.load_nodes(&nodes))
    }

    /// [CachedReader::points_in_frustum] for a column-major
    /// view-projection matrix.
    pub fn points_in_view_projection(
        &mut self,
        matrix: &[f64; 16],
        resolution: f64,
    ) -> Result<Vec<Arc<Vec<CopcPoint>>>> {
        let frustum = Frustum::from_matrix(matrix).ok_or_else(|| {
            Error::InvalidArgument("view projection matrix is not invertible".to_string())
        })?;
        self.points_in_frustum(frustum, resolution)
    }

    /// [CachedReader::points_in_frustum] for a single-precision
    /// column-major view-projection matrix.
    pub fn points_in_view_projection_f32(
        &mut self,
        matrix: &[f32; 16],
        resolution: f64,
    ) -> Result<Vec<Arc<Vec<CopcPoint>>>> {
        let frustum = Frustum::from_matrix_f32(matrix).ok_or_else(|| {
            Error::InvalidArgument("view projection matrix is not invertible".to_string())
        })?;
        self.points_in_frustum(frustum, resolution)
    }

    /// The raw LAZ chunk of a node, read straight from the source.
    pub fn point_data_compressed(&mut self, node: &Node) -> Result<Vec<u8>> {
        read_compressed(&mut self.src, node)
    }

    /// Warms the cache: decompresses the listed nodes that are not
    /// resident yet, without materializing any point arrays for the
    /// caller. Node failures are logged and skipped.
    ///
    /// The stream and the chunk decoder are not reentrant, so the work
    /// runs sequentially; `_degree_of_parallelism` is accepted for call
    /// site compatibility and ignored.
    ///
    /// Returns the number of nodes newly loaded into the cache.
    pub fn update(&mut self, nodes: &[Node], _degree_of_parallelism: usize) -> usize {
        let mut missing: Vec<Node> = nodes
            .iter()
            .filter(|node| !self.cache.contains(&node.key))
            .copied()
            .collect();
        missing.sort_by_key(|node| node.offset);

        let mut loaded = 0;
        for node in &missing {
            let compressed = match read_compressed(&mut self.src, node) {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!("skipping node {}: {err}", node.key);
                    continue;
                }
            };
            match self
                .decompressor
                .decompress(&compressed, node.point_count as usize)
            {
                Ok(points) => {
                    self.cache.put(node.key, Arc::new(points));
                    loaded += 1;
                }
                Err(err) => {
                    log::warn!("skipping node {}: {err}", node.key);
                }
            }
        }
        loaded
    }

    /// Funnels nodes through the cache, decompressing misses in file
    /// offset order for sequential reads.
    fn load_nodes(&mut self, nodes: &[Node]) -> Vec<Arc<Vec<CopcPoint>>> {
        let mut ordered = nodes.to_vec();
        ordered.sort_by_key(|node| node.offset);

        let Self {
            src,
            decompressor,
            cache,
            ..
        } = self;
        cache.get_or_load_points_from_nodes(&ordered, |node| {
            let compressed = read_compressed(src, node)?;
            decompressor.decompress(&compressed, node.point_count as usize)
        })
    }
}

/// Reads a node's compressed chunk; empty nodes yield an empty blob
/// without touching the source.
fn read_compressed<R: Read + Seek>(src: &mut R, node: &Node) -> Result<Vec<u8>> {
    if node.point_count == 0 || node.byte_size == 0 {
        return Ok(Vec::new());
    }
    src.seek(SeekFrom::Start(node.offset))?;
    let mut compressed = vec![0u8; node.byte_size as usize];
    src.read_exact(&mut compressed)?;
    Ok(compressed)
}

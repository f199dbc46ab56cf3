//! Predicate driven octree traversal.
//!
//! A traversal walks the hierarchy from the root and asks a caller
//! supplied predicate at every entry whether to keep the node for
//! caching, hand it to the viewer, and/or descend further. Pages are
//! only read from the file when the predicate asks to go below them,
//! so a pruning predicate keeps cold subtrees entirely off disk.

use crate::copc::{CopcInfo, Node, VoxelKey};
use crate::error::Result;
use crate::geometry::{Bounds, Frustum, Sphere};
use crate::header::LasHeader;
use crate::hierarchy::HierarchyStore;
use std::io::{Read, Seek};

/// What the predicate sees for one hierarchy entry.
pub struct TraversalContext<'a> {
    pub key: VoxelKey,
    /// World-space box of the voxel
    pub bounds: Bounds,
    /// Points in the node; `None` while the entry is an unloaded page
    /// reference whose node record is not known yet
    pub point_count: Option<u64>,
    pub header: &'a LasHeader,
    pub info: &'a CopcInfo,
}

impl TraversalContext<'_> {
    /// Nominal point spacing at this entry's level.
    pub fn resolution(&self) -> f64 {
        self.key.resolution(self.info)
    }

    /// Whether this entry is a page reference rather than a node.
    pub fn is_page(&self) -> bool {
        self.point_count.is_none()
    }
}

/// The predicate's verdict for one entry.
///
/// For page references only `descend` is honored; `approve` and
/// `display` take effect on nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraversalDecision {
    /// Keep the node in the cached result set
    pub approve: bool,
    /// Hand the node to the viewer result set
    pub display: bool,
    /// Walk into the entry's children
    pub descend: bool,
}

impl TraversalDecision {
    /// Prune the subtree: nothing is kept, nothing below is visited.
    pub const SKIP: TraversalDecision = TraversalDecision {
        approve: false,
        display: false,
        descend: false,
    };

    /// Cascade: keep, show and refine across all depths.
    pub const ALL: TraversalDecision = TraversalDecision {
        approve: true,
        display: true,
        descend: true,
    };
}

/// Nodes selected by a traversal, in visit order.
#[derive(Debug, Default)]
pub struct TraversalResult {
    /// Nodes the predicate approved for caching
    pub cached_nodes: Vec<Node>,
    /// Nodes the predicate selected for display
    pub viewed_nodes: Vec<Node>,
}

/// Walks the octree from the root, consulting `predicate` at every
/// entry. Hierarchy pages are loaded lazily while descending.
pub fn traverse<R, F>(
    store: &mut HierarchyStore,
    src: &mut R,
    header: &LasHeader,
    info: &CopcInfo,
    mut predicate: F,
) -> Result<TraversalResult>
where
    R: Read + Seek,
    F: FnMut(&TraversalContext) -> TraversalDecision,
{
    let mut result = TraversalResult::default();
    visit(
        store,
        src,
        header,
        info,
        &mut predicate,
        VoxelKey::ROOT,
        &mut result,
    )?;
    Ok(result)
}

fn visit<R, F>(
    store: &mut HierarchyStore,
    src: &mut R,
    header: &LasHeader,
    info: &CopcInfo,
    predicate: &mut F,
    key: VoxelKey,
    result: &mut TraversalResult,
) -> Result<()>
where
    R: Read + Seek,
    F: FnMut(&TraversalContext) -> TraversalDecision,
{
    // A key behind an unloaded page reference is asked about first as a
    // page; its node record only exists after the page is read.
    if store.node(&key).is_none() {
        let needs_load = match store.page(&key) {
            Some(page) => !page.loaded,
            None => return Ok(()),
        };
        if needs_load {
            let context = TraversalContext {
                key,
                bounds: key.bounds(header, info),
                point_count: None,
                header,
                info,
            };
            if !predicate(&context).descend {
                return Ok(());
            }
            store.load_page(src, key)?;
        }
    }

    let Some(node) = store.node(&key).copied() else {
        // A loaded page without a node record for its own key: the
        // octree has no point data here and nothing below it.
        return Ok(());
    };

    let context = TraversalContext {
        key,
        bounds: key.bounds(header, info),
        point_count: Some(node.point_count),
        header,
        info,
    };
    let decision = predicate(&context);
    if decision.approve {
        result.cached_nodes.push(node);
    }
    if decision.display {
        result.viewed_nodes.push(node);
    }
    if decision.descend {
        for child in node.key.children() {
            if store.has_entry(&child) {
                visit(store, src, header, info, predicate, child, result)?;
            }
        }
    }
    Ok(())
}

/// Resolution cutoff shared by the preset predicates: keep descending
/// while the level is still coarser than the requested spacing; the
/// first level at or below it is the last one taken. A non-positive
/// `resolution` disables the cutoff and refines to full depth.
fn decide(intersects: bool, context: &TraversalContext, resolution: f64) -> TraversalDecision {
    if !intersects {
        return TraversalDecision::SKIP;
    }
    TraversalDecision {
        approve: true,
        display: true,
        descend: resolution <= 0.0 || context.resolution() > resolution,
    }
}

/// Selects nodes overlapping `query`, down to the requested resolution.
pub fn box_query(query: Bounds, resolution: f64) -> impl Fn(&TraversalContext) -> TraversalDecision {
    move |context| decide(context.bounds.intersects(&query), context, resolution)
}

/// Selects nodes overlapping the sphere, down to the requested resolution.
pub fn sphere_query(
    query: Sphere,
    resolution: f64,
) -> impl Fn(&TraversalContext) -> TraversalDecision {
    move |context| decide(query.intersects_bounds(&context.bounds), context, resolution)
}

/// Selects nodes intersecting the view frustum, down to the requested
/// resolution.
pub fn frustum_query(
    query: Frustum,
    resolution: f64,
) -> impl Fn(&TraversalContext) -> TraversalDecision {
    move |context| decide(query.intersects_bounds(&context.bounds), context, resolution)
}

/// Selects nodes within `distance` of a point, down to the requested
/// resolution.
pub fn distance_query(
    center_x: f64,
    center_y: f64,
    center_z: f64,
    distance: f64,
    resolution: f64,
) -> impl Fn(&TraversalContext) -> TraversalDecision {
    sphere_query(Sphere::new(center_x, center_y, center_z, distance), resolution)
}

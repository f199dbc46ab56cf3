//! Library for reading Cloud Optimized Point Cloud
//! ([COPC](https://copc.io/)) data with a bounded in-memory point cache,
//! built for interactive viewers.
//!
//! A [CachedReader] discovers the sparse octree embedded in a COPC
//! file, answers spatial queries (box, sphere, view frustum) with an
//! adaptive level-of-detail cutoff, decompresses the LAZ chunks of the
//! selected nodes on demand and keeps them in an LRU cache. The cache
//! can hand out a flattened per-attribute [cache::StrideData] view for
//! vertex buffer upload.
//!
//! Usage example:
//! ```no_run
//! use copc_view::{Bounds, CachedReader};
//! # use std::fs::File;
//! # use std::io::BufReader;
//!
//! fn main() -> copc_view::Result<()> {
//!     let file = BufReader::new(File::open("autzen-classified.copc.laz")?);
//!     let mut reader = CachedReader::open(file)?;
//!     let query = Bounds::new(635577.0, 848882.0, 406.0, 639003.0, 853537.0, 616.0);
//!     for chunk in reader.points_in_box(query, 0.5)? {
//!         for point in chunk.iter() {
//!             println!("{}, {}, {}", point.x, point.y, point.z);
//!         }
//!     }
//!     println!("{:?}", reader.cache_stats());
//!     Ok(())
//! }
//! ```

pub mod cache;
mod copc;
mod decompressor;
mod error;
pub mod geometry;
pub mod header;
mod hierarchy;
mod point;
mod reader;
pub mod traversal;
mod vlr;

#[cfg(test)]
pub(crate) mod test_util;

pub use cache::{CacheStats, CachedNodeData, PointCache, StrideData};
pub use copc::{CopcInfo, Entry, Node, VoxelKey};
pub use decompressor::LazDecompressor;
pub use error::{Error, Result};
pub use geometry::{Bounds, Frustum, Sphere};
pub use header::LasHeader;
pub use hierarchy::{HierarchyStore, Page};
pub use point::{CopcPoint, PointColor};
pub use reader::{CachedReader, CachedReaderOptions};
pub use traversal::{TraversalContext, TraversalDecision, TraversalResult};
pub use vlr::{ExtraDimension, Vlr};

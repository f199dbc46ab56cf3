//! Lazy loading store for COPC hierarchy pages and octree nodes.

use crate::copc::{CopcInfo, Entry, Node, VoxelKey, ENTRY_SIZE};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// One hierarchy page: a block of 32 byte entries somewhere in the file.
///
/// Pages are registered when discovered (the root from the COPC info
/// VLR, sub-pages from their parent page) and loaded on demand;
/// `loaded` flips to true exactly once.
#[derive(Clone, Debug)]
pub struct Page {
    /// Key of the entry this page was referenced by
    pub key: VoxelKey,
    /// Absolute file offset of the page
    pub offset: u64,
    /// Size of the page in bytes, a multiple of 32
    pub byte_size: u64,
    pub loaded: bool,
    /// Entries in file order, empty until loaded
    pub children: Vec<Entry>,
}

impl Page {
    fn new(key: VoxelKey, offset: u64, byte_size: u64) -> Self {
        Page {
            key,
            offset,
            byte_size,
            loaded: false,
            children: Vec::new(),
        }
    }
}

/// Owns the page and node caches and resolves keys against the file.
///
/// All lookups go through the caches; the file is only touched when a
/// page that has not been seen yet is needed.
#[derive(Debug)]
pub struct HierarchyStore {
    pages: HashMap<VoxelKey, Page>,
    nodes: HashMap<VoxelKey, Node>,
}

impl HierarchyStore {
    /// Creates the store with the root page registered but not loaded.
    pub fn new(info: &CopcInfo) -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            VoxelKey::ROOT,
            Page::new(VoxelKey::ROOT, info.root_hier_offset, info.root_hier_size),
        );
        HierarchyStore {
            pages,
            nodes: HashMap::new(),
        }
    }

    pub fn node(&self, key: &VoxelKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn page(&self, key: &VoxelKey) -> Option<&Page> {
        self.pages.get(key)
    }

    /// Whether any record (node or page reference) is known for the key.
    pub fn has_entry(&self, key: &VoxelKey) -> bool {
        self.nodes.contains_key(key) || self.pages.contains_key(key)
    }

    /// Number of pages whose bytes have been read, for diagnostics.
    pub fn loaded_page_count(&self) -> usize {
        self.pages.values().filter(|p| p.loaded).count()
    }

    /// Loads and caches the root hierarchy page.
    pub fn load_root_page<R: Read + Seek>(&mut self, src: &mut R) -> Result<&Page> {
        self.load_page(src, VoxelKey::ROOT)?;
        Ok(&self.pages[&VoxelKey::ROOT])
    }

    /// Loads the page registered under `key`. Idempotent: a page is read
    /// from the file at most once.
    ///
    /// Either the page and everything it contains is inserted, or (on
    /// any I/O or format error) the caches are left untouched.
    pub fn load_page<R: Read + Seek>(&mut self, src: &mut R, key: VoxelKey) -> Result<()> {
        let (offset, byte_size) = match self.pages.get(&key) {
            Some(page) if page.loaded => return Ok(()),
            Some(page) => (page.offset, page.byte_size),
            None => {
                return Err(Error::BadHierarchyPage {
                    key,
                    reason: "page is not registered in the hierarchy".to_string(),
                })
            }
        };
        if byte_size % ENTRY_SIZE as u64 != 0 {
            return Err(Error::BadHierarchyPage {
                key,
                reason: format!("page size {byte_size} is not a multiple of {ENTRY_SIZE}"),
            });
        }

        log::debug!("loading hierarchy page {key} ({byte_size} bytes at {offset})");
        src.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; byte_size as usize];
        src.read_exact(&mut bytes)?;

        // Parse everything before mutating any cache.
        let mut entries = Vec::with_capacity(bytes.len() / ENTRY_SIZE);
        let mut cursor = Cursor::new(bytes.as_slice());
        for _ in 0..bytes.len() / ENTRY_SIZE {
            let entry = Entry::read_from(&mut cursor)?;
            if entry.point_count < -1 {
                return Err(Error::BadHierarchyPage {
                    key,
                    reason: format!(
                        "entry {} has point count {}",
                        entry.key, entry.point_count
                    ),
                });
            }
            entries.push(entry);
        }

        for entry in &entries {
            if entry.is_page() {
                self.pages.entry(entry.key).or_insert_with(|| {
                    Page::new(entry.key, entry.offset, entry.byte_size as u64)
                });
            } else {
                self.nodes.insert(entry.key, Node::from_entry(entry, key));
            }
        }
        let page = self.pages.get_mut(&key).expect("page was checked above");
        page.children = entries;
        page.loaded = true;
        Ok(())
    }

    /// Resolves a key to its node, loading ancestor pages on demand.
    ///
    /// Returns `None` when the octree has no point data for the key.
    pub fn get_node<R: Read + Seek>(
        &mut self,
        src: &mut R,
        key: VoxelKey,
    ) -> Result<Option<Node>> {
        if let Some(node) = self.nodes.get(&key) {
            return Ok(Some(*node));
        }
        if !key.is_valid() {
            return Ok(None);
        }

        // The record can only live in a page keyed by an ancestor (or by
        // the key itself); walk them root-first, loading as needed.
        for level in 0..=key.level {
            let ancestor = key.parent_at_depth(level);
            let needs_load = matches!(self.pages.get(&ancestor), Some(page) if !page.loaded);
            if needs_load {
                self.load_page(src, ancestor)?;
                if let Some(node) = self.nodes.get(&key) {
                    return Ok(Some(*node));
                }
            }
        }
        Ok(self.nodes.get(&key).copied())
    }

    /// Loads every page and returns all nodes of the octree.
    ///
    /// The order of the returned nodes is unspecified.
    pub fn all_nodes<R: Read + Seek>(&mut self, src: &mut R) -> Result<Vec<Node>> {
        loop {
            let pending: Vec<VoxelKey> = self
                .pages
                .values()
                .filter(|page| !page.loaded)
                .map(|page| page.key)
                .collect();
            if pending.is_empty() {
                break;
            }
            for key in pending {
                self.load_page(src, key)?;
            }
        }
        Ok(self.nodes.values().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use std::io::Cursor;

    fn two_page_fixture() -> (Cursor<Vec<u8>>, CopcInfo) {
        // root page at 64 with a root node, one child node and a
        // sub-page reference; the sub-page at 256 holds one node.
        let child_page_key = VoxelKey::new(1, 0, 0, 0);
        let root_entries = vec![
            test_util::node_entry(VoxelKey::ROOT, 1024, 10, 100),
            test_util::node_entry(VoxelKey::new(1, 1, 1, 1), 2048, 10, 50),
            test_util::page_entry(child_page_key, 256, 2 * ENTRY_SIZE as i32),
        ];
        let sub_entries = vec![
            test_util::node_entry(child_page_key, 4096, 10, 25),
            test_util::node_entry(VoxelKey::new(2, 0, 0, 1), 8192, 10, 12),
        ];

        let mut file = vec![0u8; 512];
        test_util::write_page(&mut file, 64, &root_entries);
        test_util::write_page(&mut file, 256, &sub_entries);

        let info = CopcInfo {
            root_hier_offset: 64,
            root_hier_size: (root_entries.len() * ENTRY_SIZE) as u64,
            ..Default::default()
        };
        (Cursor::new(file), info)
    }

    #[test]
    fn root_page_load_registers_nodes_and_subpages() {
        let (mut src, info) = two_page_fixture();
        let mut store = HierarchyStore::new(&info);
        assert_eq!(store.loaded_page_count(), 0);

        store.load_root_page(&mut src).unwrap();
        assert_eq!(store.loaded_page_count(), 1);
        assert!(store.node(&VoxelKey::ROOT).is_some());
        assert!(store.node(&VoxelKey::new(1, 1, 1, 1)).is_some());
        // the sub-page is registered but untouched
        let sub = store.page(&VoxelKey::new(1, 0, 0, 0)).unwrap();
        assert!(!sub.loaded);
        assert_eq!(sub.offset, 256);
    }

    #[test]
    fn load_page_is_idempotent() {
        let (mut src, info) = two_page_fixture();
        let mut store = HierarchyStore::new(&info);
        store.load_root_page(&mut src).unwrap();
        let children_before = store.page(&VoxelKey::ROOT).unwrap().children.len();
        store.load_page(&mut src, VoxelKey::ROOT).unwrap();
        assert_eq!(
            store.page(&VoxelKey::ROOT).unwrap().children.len(),
            children_before
        );
        assert_eq!(store.loaded_page_count(), 1);
    }

    #[test]
    fn get_node_descends_through_subpages() {
        let (mut src, info) = two_page_fixture();
        let mut store = HierarchyStore::new(&info);

        let node = store
            .get_node(&mut src, VoxelKey::new(2, 0, 0, 1))
            .unwrap()
            .expect("node behind sub-page");
        assert_eq!(node.offset, 8192);
        assert_eq!(node.point_count, 12);
        assert_eq!(node.page_key, VoxelKey::new(1, 0, 0, 0));
        assert_eq!(store.loaded_page_count(), 2);

        assert!(store
            .get_node(&mut src, VoxelKey::new(3, 7, 7, 7))
            .unwrap()
            .is_none());
    }

    #[test]
    fn all_nodes_loads_every_page() {
        let (mut src, info) = two_page_fixture();
        let mut store = HierarchyStore::new(&info);
        let mut nodes = store.all_nodes(&mut src).unwrap();
        nodes.sort_by_key(|n| n.offset);
        assert_eq!(nodes.len(), 4);
        assert_eq!(store.loaded_page_count(), 2);
        assert_eq!(nodes[3].point_count, 12);
    }

    #[test]
    fn ragged_page_size_is_rejected() {
        let info = CopcInfo {
            root_hier_offset: 0,
            root_hier_size: 33,
            ..Default::default()
        };
        let mut store = HierarchyStore::new(&info);
        let mut src = Cursor::new(vec![0u8; 64]);
        let err = store.load_root_page(&mut src).unwrap_err();
        assert!(matches!(err, Error::BadHierarchyPage { .. }));
        assert_eq!(store.loaded_page_count(), 0);
    }

    #[test]
    fn negative_point_count_is_rejected_atomically() {
        let entries = vec![
            test_util::node_entry(VoxelKey::ROOT, 1024, 10, 100),
            Entry {
                key: VoxelKey::new(1, 0, 0, 0),
                offset: 0,
                byte_size: 0,
                point_count: -2,
            },
        ];
        let mut file = vec![0u8; 128];
        test_util::write_page(&mut file, 0, &entries);
        let info = CopcInfo {
            root_hier_offset: 0,
            root_hier_size: (entries.len() * ENTRY_SIZE) as u64,
            ..Default::default()
        };

        let mut store = HierarchyStore::new(&info);
        let err = store.load_root_page(&mut Cursor::new(file)).unwrap_err();
        assert!(matches!(err, Error::BadHierarchyPage { .. }));
        // nothing from the bad page leaked into the caches
        assert!(store.node(&VoxelKey::ROOT).is_none());
        assert_eq!(store.loaded_page_count(), 0);
    }

    #[test]
    fn empty_page_is_well_formed() {
        let info = CopcInfo {
            root_hier_offset: 8,
            root_hier_size: 0,
            ..Default::default()
        };
        let mut store = HierarchyStore::new(&info);
        let mut src = Cursor::new(vec![0u8; 16]);
        store.load_root_page(&mut src).unwrap();
        assert_eq!(store.loaded_page_count(), 1);
        assert!(store.all_nodes(&mut src).unwrap().is_empty());
    }
}

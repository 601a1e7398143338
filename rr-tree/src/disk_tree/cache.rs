//! LRU cache for node pages.
//!
//! Pages are loaded only when first accessed; nothing is preloaded. Dirty
//! pages are written back when evicted or flushed.

use std::collections::HashMap;
use std::collections::VecDeque;

use super::node::RRDiskNode;
use super::types::PageId;

/// A cached page with its data and dirty flag
pub struct CachedPage {
    pub node: RRDiskNode,
    pub dirty: bool,
}

/// LRU cache for node pages
pub struct PageCache {
    pages: HashMap<PageId, CachedPage>,
    /// LRU order (front = oldest, back = newest)
    lru_order: VecDeque<PageId>,
    max_pages: usize,
}

impl PageCache {
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: HashMap::new(),
            lru_order: VecDeque::new(),
            max_pages,
        }
    }

    /// Get a page from cache, updating LRU order.
    /// Returns None if the page must be loaded from disk.
    pub fn get(&mut self, page_id: PageId) -> Option<&RRDiskNode> {
        if !self.pages.contains_key(&page_id) {
            return None;
        }
        self.touch(page_id);
        self.pages.get(&page_id).map(|cached| &cached.node)
    }

    /// Peek at a cached page without touching the LRU order
    pub fn peek(&self, page_id: PageId) -> Option<&CachedPage> {
        self.pages.get(&page_id)
    }

    /// Insert a page into cache (after loading from disk or creating new).
    /// A page that is already dirty stays dirty.
    pub fn insert(&mut self, page_id: PageId, node: RRDiskNode, dirty: bool) {
        let was_dirty = match self.pages.get(&page_id) {
            Some(cached) => {
                self.lru_order.retain(|&id| id != page_id);
                cached.dirty
            }
            None => false,
        };
        self.lru_order.push_back(page_id);
        self.pages.insert(
            page_id,
            CachedPage {
                node,
                dirty: dirty || was_dirty,
            },
        );
    }

    /// Check if inserting a page not yet cached needs an eviction first
    pub fn needs_eviction(&self) -> bool {
        self.pages.len() >= self.max_pages
    }

    /// Remove the least recently used page (returns page_id, node, dirty flag)
    pub fn evict_oldest(&mut self) -> Option<(PageId, RRDiskNode, bool)> {
        while let Some(page_id) = self.lru_order.pop_front() {
            if let Some(cached) = self.pages.remove(&page_id) {
                return Some((page_id, cached.node, cached.dirty));
            }
        }
        None
    }

    /// Get all dirty pages for flushing
    pub fn dirty_pages(&self) -> Vec<PageId> {
        let mut dirty: Vec<PageId> = self
            .pages
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    pub fn mark_clean(&mut self, page_id: PageId) {
        if let Some(cached) = self.pages.get_mut(&page_id) {
            cached.dirty = false;
        }
    }

    /// Remove a page from cache, discarding any unwritten changes
    pub fn remove(&mut self, page_id: PageId) -> Option<(RRDiskNode, bool)> {
        self.lru_order.retain(|&id| id != page_id);
        self.pages.remove(&page_id).map(|c| (c.node, c.dirty))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    fn touch(&mut self, page_id: PageId) {
        self.lru_order.retain(|&id| id != page_id);
        self.lru_order.push_back(page_id);
    }
}

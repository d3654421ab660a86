use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{PageId, PagePtr, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::HeaderPage;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::{ReadLatch, WriteLatch};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{
    deserialize_node, max_internal_capacity, max_leaf_capacity, serialize_node, set_parent_in_page,
};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

/// Latches retained during a mutating descent: the tree-level root latch and
/// the write-latched ancestors of the current node, in root-to-parent order.
/// Everything releases (latch, then pin) on drop.
struct Ancestors<'a> {
    root_guard: Option<MutexGuard<'a, PageId>>,
    latches: Vec<WriteLatch>,
}

impl Ancestors<'_> {
    fn release_all(&mut self) {
        self.latches.clear();
        self.root_guard = None;
    }
}

/// A disk-resident B+ tree with unique fixed-width keys.
///
/// Nodes are pages fetched through the buffer pool. Readers descend with
/// read-latch crabbing; writers retain write latches on every ancestor that
/// could be touched by a bubbling split or merge and release them the moment
/// a safe node is reached. The root page id is guarded by a tree-level latch
/// and persisted in the header page under the index name.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: Mutex<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open (or register) the index named `index_name`, with explicit
    /// fan-outs. The root page id is recovered from the header page when the
    /// index already exists.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        let index_name = index_name.into();

        if leaf_max_size < 3 || internal_max_size < 3 {
            return Err(BTreeError::Corrupted(format!(
                "fan-out too small for index '{}'",
                index_name
            )));
        }
        if leaf_max_size as usize > max_leaf_capacity::<K>()
            || internal_max_size as usize > max_internal_capacity::<K>()
        {
            return Err(BTreeError::NodeTooLarge);
        }

        // Recover the root from the header page, registering the index on
        // first use.
        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut guard = header.write();
            match HeaderPage::get_record(&guard, &index_name) {
                Some(root) => root,
                None => {
                    HeaderPage::insert_record(&mut guard, &index_name, INVALID_PAGE_ID);
                    INVALID_PAGE_ID
                }
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Open an index with fan-outs derived from the page size.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = max_leaf_capacity::<K>() as u32;
        let internal_max = max_internal_capacity::<K>() as u32;
        Self::new(index_name, buffer_pool, leaf_max, internal_max)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        match self.find_leaf_read(key, false)? {
            Some((_latch, node)) => Ok(node.lookup(key)),
            None => Ok(None),
        }
    }

    /// Insert a unique key. Returns false (leaving the tree untouched) when
    /// the key already exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_guard = self.root_page_id.lock();

        if *root_guard == INVALID_PAGE_ID {
            let (page, page_id) = self.new_tree_page()?;
            let mut root = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            root.insert(key, rid);
            self.write_unlatched_node(&root, &page, page_id)?;
            *root_guard = page_id;
            self.write_header_root(page_id)?;
            debug!("index '{}': started new tree at root {}", self.index_name, page_id);
            return Ok(true);
        }

        let root_pid = *root_guard;
        let mut ancestors = Ancestors {
            root_guard: Some(root_guard),
            latches: Vec::new(),
        };

        let mut current = self.latch_write(root_pid)?;
        let mut node = deserialize_node::<K>(&current)?;
        if node.is_insert_safe() {
            ancestors.release_all();
        }

        while !node.is_leaf {
            let child_pid = node.lookup_child(&key);
            let child_latch = self.latch_write(child_pid)?;
            let child_node = deserialize_node::<K>(&child_latch)?;
            ancestors.latches.push(current);
            current = child_latch;
            node = child_node;
            if node.is_insert_safe() {
                ancestors.release_all();
            }
        }

        if node.lookup(&key).is_some() {
            return Ok(false);
        }

        let new_size = node.insert(key, rid);
        if new_size == self.leaf_max_size as usize {
            let (new_page, new_pid) = self.new_tree_page()?;
            let mut new_leaf = BTreeNode::new_leaf(new_pid, node.parent_page_id, self.leaf_max_size);
            let separator = node.move_half_to(&mut new_leaf);
            self.write_unlatched_node(&new_leaf, &new_page, new_pid)?;
            self.write_node(&node, &mut current)?;
            debug!(
                "index '{}': split leaf {} -> {}",
                self.index_name,
                current.page_id(),
                new_pid
            );

            let parent_id = node.parent_page_id;
            self.insert_into_parent(&mut ancestors, &mut current, parent_id, separator, new_pid)?;
        } else {
            self.write_node(&node, &mut current)?;
        }

        Ok(true)
    }

    /// Remove a key; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let root_guard = self.root_page_id.lock();
        let root_pid = *root_guard;
        if root_pid == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ancestors = Ancestors {
            root_guard: Some(root_guard),
            latches: Vec::new(),
        };

        let mut current = self.latch_write(root_pid)?;
        let mut node = deserialize_node::<K>(&current)?;
        if node.is_remove_safe() {
            ancestors.release_all();
        }

        while !node.is_leaf {
            let child_pid = node.lookup_child(key);
            let child_latch = self.latch_write(child_pid)?;
            let child_node = deserialize_node::<K>(&child_latch)?;
            ancestors.latches.push(current);
            current = child_latch;
            node = child_node;
            if node.is_remove_safe() {
                ancestors.release_all();
            }
        }

        if !node.remove(key) {
            return Ok(());
        }
        self.write_node(&node, &mut current)?;

        let mut deleted_pages = Vec::new();
        if node.size() < node.min_size() {
            self.coalesce_or_redistribute(&mut ancestors, current, node, &mut deleted_pages)?;
        } else {
            drop(current);
        }
        drop(ancestors);

        // Deallocate after every latch is gone so the pages are unpinned. A
        // page still pinned by a lagging iterator just leaks until restart.
        for page_id in deleted_pages {
            if let Err(e) = self.buffer_pool.delete_page(page_id) {
                warn!("index '{}': could not delete page {}: {}", self.index_name, page_id, e);
            }
        }

        Ok(())
    }

    /// Iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        self.make_iter(None)
    }

    /// Iterator starting at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        self.make_iter(Some(key))
    }

    fn make_iter(&self, key: Option<&K>) -> Result<TreeIterator<K>, BTreeError> {
        let start = K::default();
        let (probe, leftmost) = match key {
            Some(k) => (k, false),
            None => (&start, true),
        };

        match self.find_leaf_read(probe, leftmost)? {
            None => Ok(TreeIterator::empty(self.buffer_pool.clone())),
            Some((latch, node)) => {
                let index = match key {
                    Some(k) => node.key_index(k),
                    None => 0,
                };
                Ok(TreeIterator::new(self.buffer_pool.clone(), latch, node, index))
            }
        }
    }

    // ---- descent helpers ----

    /// Read-crab from the root to the leaf covering `key` (or the leftmost
    /// leaf). Returns the latched leaf and its decoded node.
    fn find_leaf_read(
        &self,
        key: &K,
        leftmost: bool,
    ) -> Result<Option<(ReadLatch, BTreeNode<K>)>, BTreeError> {
        let root_guard = self.root_page_id.lock();
        let root_pid = *root_guard;
        if root_pid == INVALID_PAGE_ID {
            return Ok(None);
        }

        let page = self.buffer_pool.fetch_page(root_pid)?;
        let mut latch = ReadLatch::acquire(self.buffer_pool.clone(), root_pid, page);
        drop(root_guard);

        loop {
            let node = deserialize_node::<K>(&latch)?;
            if node.is_leaf {
                return Ok(Some((latch, node)));
            }

            let child_pid = if leftmost { node.value_at(0) } else { node.lookup_child(key) };
            let page = self.buffer_pool.fetch_page(child_pid)?;
            let child_latch = ReadLatch::acquire(self.buffer_pool.clone(), child_pid, page);
            latch = child_latch;
        }
    }

    fn latch_write(&self, page_id: PageId) -> Result<WriteLatch, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        Ok(WriteLatch::acquire(self.buffer_pool.clone(), page_id, page))
    }

    // ---- structure changes ----

    /// Push a separator for a freshly split node into its parent, splitting
    /// upward as needed. `left` stays latched by the caller; the parent (and
    /// above) latches come from the ancestor stack.
    fn insert_into_parent(
        &self,
        ancestors: &mut Ancestors<'_>,
        left: &mut WriteLatch,
        left_parent: PageId,
        key: K,
        right_pid: PageId,
    ) -> Result<(), BTreeError> {
        if left_parent == INVALID_PAGE_ID {
            // The root split: grow the tree by one level.
            let (root_page, root_pid) = self.new_tree_page()?;
            let mut root = BTreeNode::<K>::new_internal(root_pid, INVALID_PAGE_ID, self.internal_max_size);
            root.populate_new_root(left.page_id(), key, right_pid);
            self.write_unlatched_node(&root, &root_page, root_pid)?;

            set_parent_in_page(left, root_pid);
            left.mark_dirty();
            self.set_parent(right_pid, root_pid)?;

            self.update_root(ancestors, root_pid)?;
            debug!("index '{}': new root {}", self.index_name, root_pid);
            return Ok(());
        }

        let mut parent_latch = ancestors.latches.pop().ok_or_else(|| {
            BTreeError::Corrupted("split bubbled into an unlatched ancestor".to_string())
        })?;
        let mut parent = deserialize_node::<K>(&parent_latch)?;
        let new_size = parent.insert_node_after(left.page_id(), key, right_pid);

        if new_size == self.internal_max_size as usize {
            let (new_page, new_pid) = self.new_tree_page()?;
            let mut new_internal =
                BTreeNode::<K>::new_internal(new_pid, parent.parent_page_id, self.internal_max_size);
            let promoted = parent.move_half_to(&mut new_internal);
            self.write_unlatched_node(&new_internal, &new_page, new_pid)?;
            self.reparent_children(&new_internal, left)?;
            self.write_node(&parent, &mut parent_latch)?;
            debug!(
                "index '{}': split internal {} -> {}",
                self.index_name,
                parent_latch.page_id(),
                new_pid
            );

            let grandparent = parent.parent_page_id;
            self.insert_into_parent(ancestors, &mut parent_latch, grandparent, promoted, new_pid)?;
        } else {
            self.write_node(&parent, &mut parent_latch)?;
        }

        Ok(())
    }

    /// Repair an underflowed node by borrowing from or merging with a
    /// sibling, walking up while parents underflow in turn. Consumes the
    /// node's latch; merged-away pages are collected into `deleted`.
    fn coalesce_or_redistribute(
        &self,
        ancestors: &mut Ancestors<'_>,
        latch: WriteLatch,
        node: BTreeNode<K>,
        deleted: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        let mut latch = latch;
        let mut node = node;

        loop {
            if node.is_root() {
                self.adjust_root(ancestors, &node, deleted)?;
                return Ok(());
            }

            let mut parent_latch = ancestors.latches.pop().ok_or_else(|| {
                BTreeError::Corrupted("underflow bubbled into an unlatched ancestor".to_string())
            })?;
            let mut parent = deserialize_node::<K>(&parent_latch)?;

            let index = parent.value_index(latch.page_id()).ok_or_else(|| {
                BTreeError::Corrupted(format!(
                    "page {} missing from its parent {}",
                    latch.page_id(),
                    parent_latch.page_id()
                ))
            })?;

            // Prefer the left sibling; the leftmost child must use its right
            // sibling. The separator between the pair sits at max(1, index).
            let sibling_index = if index > 0 { index - 1 } else { 1 };
            let middle_index = if index > 0 { index } else { 1 };
            let sibling_pid = parent.value_at(sibling_index);

            let sibling_page = self.buffer_pool.fetch_page(sibling_pid)?;
            let mut sibling_latch =
                WriteLatch::acquire(self.buffer_pool.clone(), sibling_pid, sibling_page);
            let mut sibling = deserialize_node::<K>(&sibling_latch)?;

            if sibling.size() + node.size() > node.max_size as usize - 1 {
                // Redistribute a single entry and fix the separator.
                let middle_key = parent.key_at(middle_index).clone();
                let moved_child = if index == 0 {
                    let moved = sibling.move_first_to_end_of(&mut node, middle_key);
                    parent.set_key_at(middle_index, sibling.key_at(0).clone());
                    moved
                } else {
                    let moved = sibling.move_last_to_front_of(&mut node, middle_key);
                    parent.set_key_at(middle_index, node.key_at(0).clone());
                    moved
                };
                if let Some(child) = moved_child {
                    self.set_parent(child, node.page_id)?;
                }

                self.write_node(&node, &mut latch)?;
                self.write_node(&sibling, &mut sibling_latch)?;
                self.write_node(&parent, &mut parent_latch)?;
                debug!(
                    "index '{}': redistributed between {} and {}",
                    self.index_name,
                    latch.page_id(),
                    sibling_latch.page_id()
                );
                return Ok(());
            }

            // Coalesce. Data always moves right -> left, so swap roles when
            // the underflowed node has no left sibling.
            let middle_key = parent.key_at(middle_index).clone();
            let (mut left_latch, mut left_node, right_latch, mut right_node) = if index == 0 {
                (latch, node, sibling_latch, sibling)
            } else {
                (sibling_latch, sibling, latch, node)
            };

            let moved_children = right_node.children.clone();
            right_node.move_all_to(&mut left_node, middle_key);
            for child in moved_children {
                self.set_parent(child, left_node.page_id)?;
            }

            self.write_node(&left_node, &mut left_latch)?;
            deleted.push(right_node.page_id);
            debug!(
                "index '{}': coalesced {} into {}",
                self.index_name,
                right_node.page_id,
                left_node.page_id
            );
            drop(right_latch);
            drop(left_latch);

            parent.remove_at(middle_index);
            self.write_node(&parent, &mut parent_latch)?;

            if parent.size() < parent.min_size() {
                latch = parent_latch;
                node = parent;
                continue;
            }

            return Ok(());
        }
    }

    /// Shrink the tree at the root: promote a lone child, or mark the tree
    /// empty when the last key is gone.
    fn adjust_root(
        &self,
        ancestors: &mut Ancestors<'_>,
        root: &BTreeNode<K>,
        deleted: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        if !root.is_leaf && root.size() == 1 {
            let child = root.value_at(0);
            self.set_parent(child, INVALID_PAGE_ID)?;
            self.update_root(ancestors, child)?;
            deleted.push(root.page_id);
            debug!("index '{}': root collapsed into {}", self.index_name, child);
        } else if root.is_leaf && root.size() == 0 {
            self.update_root(ancestors, INVALID_PAGE_ID)?;
            deleted.push(root.page_id);
            debug!("index '{}': tree is now empty", self.index_name);
        }

        Ok(())
    }

    // ---- small helpers ----

    /// Allocate a fresh tree page, mapping pool exhaustion to OUT_OF_MEMORY.
    fn new_tree_page(&self) -> Result<(PagePtr, PageId), BTreeError> {
        match self.buffer_pool.new_page() {
            Ok(result) => Ok(result),
            Err(BufferPoolError::BufferPoolFull) => Err(BTreeError::OutOfMemory),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize a node into the page behind its write latch.
    fn write_node(&self, node: &BTreeNode<K>, latch: &mut WriteLatch) -> Result<(), BTreeError> {
        serialize_node(node, latch)?;
        latch.mark_dirty();
        Ok(())
    }

    /// Serialize a node into a freshly allocated (unlatched) page and unpin.
    fn write_unlatched_node(
        &self,
        node: &BTreeNode<K>,
        page: &PagePtr,
        page_id: PageId,
    ) -> Result<(), BTreeError> {
        let result = {
            let mut guard = page.write();
            serialize_node(node, &mut guard)
        };
        self.buffer_pool.unpin_page(page_id, true)?;
        result
    }

    /// Rewrite the parent pointer of an unlatched page.
    fn set_parent(&self, page_id: PageId, parent: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut guard = page.write();
            set_parent_in_page(&mut guard, parent);
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Re-parent every child of a freshly split internal node. The one child
    /// we may still hold latched is updated through that latch.
    fn reparent_children(
        &self,
        node: &BTreeNode<K>,
        held: &mut WriteLatch,
    ) -> Result<(), BTreeError> {
        for &child in &node.children {
            if child == held.page_id() {
                set_parent_in_page(held, node.page_id);
                held.mark_dirty();
            } else {
                self.set_parent(child, node.page_id)?;
            }
        }
        Ok(())
    }

    /// Publish a new root id under the still-held tree latch and persist it.
    fn update_root(&self, ancestors: &mut Ancestors<'_>, new_root: PageId) -> Result<(), BTreeError> {
        match ancestors.root_guard.as_mut() {
            Some(guard) => **guard = new_root,
            None => {
                return Err(BTreeError::Corrupted(
                    "root changed without the tree latch".to_string(),
                ))
            }
        }
        self.write_header_root(new_root)
    }

    /// Record the root id in the header page under the index name.
    fn write_header_root(&self, root: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = page.write();
            if !HeaderPage::update_record(&mut guard, &self.index_name, root) {
                HeaderPage::insert_record(&mut guard, &self.index_name, root);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    // ---- integrity checking (used heavily by tests) ----

    /// Walk the whole tree checking ordering, size bounds, parent pointers,
    /// separator placement and uniform leaf depth.
    pub fn verify_integrity(&self) -> Result<(), BTreeError> {
        let root_pid = *self.root_page_id.lock();
        if root_pid == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaf_depth = None;
        self.check_node(root_pid, INVALID_PAGE_ID, None, None, 0, &mut leaf_depth)?;

        // Leaf chain must agree with the key order.
        let mut last: Option<K> = None;
        for entry in self.iter()? {
            let (key, _rid) = entry?;
            if let Some(prev) = &last {
                if prev >= &key {
                    return Err(BTreeError::Integrity(format!(
                        "leaf chain out of order near {:?}",
                        key
                    )));
                }
            }
            last = Some(key);
        }

        Ok(())
    }

    fn check_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<Option<K>, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = {
            let guard = page.read();
            deserialize_node::<K>(&guard)
        };
        self.buffer_pool.unpin_page(page_id, false)?;
        let node = node?;

        let fail = |msg: String| Err(BTreeError::Integrity(format!("page {}: {}", page_id, msg)));

        if node.page_id != page_id {
            return fail(format!("stored page id {}", node.page_id));
        }
        if node.parent_page_id != expected_parent {
            return fail(format!(
                "parent is {}, expected {}",
                node.parent_page_id, expected_parent
            ));
        }

        let size = node.size();
        if expected_parent == INVALID_PAGE_ID {
            let min_root = if node.is_leaf { 1 } else { 2 };
            if size < min_root {
                return fail(format!("root has size {}", size));
            }
        } else if size < node.min_size() || size > node.max_size as usize - 1 {
            return fail(format!(
                "size {} outside [{}, {}]",
                size,
                node.min_size(),
                node.max_size - 1
            ));
        }

        let payload_keys: &[K] = if node.is_leaf { &node.keys } else { &node.keys[1..] };
        for pair in payload_keys.windows(2) {
            if pair[0] >= pair[1] {
                return fail("keys out of order".to_string());
            }
        }
        for key in payload_keys {
            if let Some(lo) = lower {
                if key < lo {
                    return fail(format!("key {:?} below lower bound {:?}", key, lo));
                }
            }
            if let Some(hi) = upper {
                if key >= hi {
                    return fail(format!("key {:?} above upper bound {:?}", key, hi));
                }
            }
        }

        if node.is_leaf {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return fail(format!("leaf at depth {}, expected {}", depth, expected));
                }
                _ => {}
            }
            return Ok(node.keys.first().cloned());
        }

        let mut subtree_min: Option<K> = None;
        for i in 0..size {
            let child_lower = if i == 0 { lower } else { Some(&node.keys[i]) };
            let child_upper = if i + 1 < size { Some(&node.keys[i + 1]) } else { upper };
            let child_min = self.check_node(
                node.children[i],
                page_id,
                child_lower,
                child_upper,
                depth + 1,
                leaf_depth,
            )?;

            // The separator must equal the smallest key of its right subtree.
            if i > 0 {
                match &child_min {
                    Some(min) if min == &node.keys[i] => {}
                    other => {
                        return fail(format!(
                            "separator {:?} does not match subtree minimum {:?}",
                            node.keys[i], other
                        ));
                    }
                }
            }
            if i == 0 {
                subtree_min = child_min;
            }
        }

        Ok(subtree_min)
    }
}

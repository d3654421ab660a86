use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;

// Common node header, fixed offsets.
const OFFSET_PAGE_TYPE: usize = 0;
const OFFSET_SIZE: usize = 4;
const OFFSET_MAX_SIZE: usize = 8;
const OFFSET_PARENT: usize = 12;
const OFFSET_PAGE_ID: usize = 16;
const COMMON_HEADER_SIZE: usize = 20;

// Leaf pages carry the next-leaf link after the common header.
const OFFSET_NEXT: usize = 20;
const LEAF_HEADER_SIZE: usize = 24;
const INTERNAL_HEADER_SIZE: usize = COMMON_HEADER_SIZE;

const PAGE_TYPE_LEAF: u32 = 1;
const PAGE_TYPE_INTERNAL: u32 = 2;

const RID_LEN: usize = 8;
const CHILD_LEN: usize = 4;

/// Largest leaf fan-out that fits a page for key type `K`.
pub fn max_leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_LEN + RID_LEN)
}

/// Largest internal fan-out that fits a page for key type `K`.
pub fn max_internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_LEN + CHILD_LEN)
}

/// Quick page-type probe without a full decode.
pub fn page_is_leaf(page: &Page) -> bool {
    LittleEndian::read_u32(&page.data[OFFSET_PAGE_TYPE..OFFSET_PAGE_TYPE + 4]) == PAGE_TYPE_LEAF
}

/// Rewrite only the parent pointer of an encoded node.
pub fn set_parent_in_page(page: &mut Page, parent_page_id: PageId) {
    LittleEndian::write_u32(&mut page.data[OFFSET_PARENT..OFFSET_PARENT + 4], parent_page_id);
}

/// Encode a node into its page at the fixed offsets.
pub fn serialize_node<K: IndexKey>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError> {
    let size = node.size();
    let page_type = if node.is_leaf { PAGE_TYPE_LEAF } else { PAGE_TYPE_INTERNAL };

    let header_size = if node.is_leaf { LEAF_HEADER_SIZE } else { INTERNAL_HEADER_SIZE };
    let pair_len = K::ENCODED_LEN + if node.is_leaf { RID_LEN } else { CHILD_LEN };
    if header_size + size * pair_len > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    let data = &mut page.data;
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_TYPE..OFFSET_PAGE_TYPE + 4], page_type);
    LittleEndian::write_u32(&mut data[OFFSET_SIZE..OFFSET_SIZE + 4], size as u32);
    LittleEndian::write_u32(&mut data[OFFSET_MAX_SIZE..OFFSET_MAX_SIZE + 4], node.max_size);
    LittleEndian::write_u32(&mut data[OFFSET_PARENT..OFFSET_PARENT + 4], node.parent_page_id);
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4], node.page_id);

    if node.is_leaf {
        LittleEndian::write_u32(&mut data[OFFSET_NEXT..OFFSET_NEXT + 4], node.next_page_id);
        let mut offset = LEAF_HEADER_SIZE;
        for (key, rid) in node.keys.iter().zip(node.rids.iter()) {
            key.encode(&mut data[offset..offset + K::ENCODED_LEN]);
            offset += K::ENCODED_LEN;
            LittleEndian::write_u32(&mut data[offset..offset + 4], rid.page_id);
            LittleEndian::write_u32(&mut data[offset + 4..offset + 8], rid.slot_num);
            offset += RID_LEN;
        }
    } else {
        let mut offset = INTERNAL_HEADER_SIZE;
        for (key, child) in node.keys.iter().zip(node.children.iter()) {
            key.encode(&mut data[offset..offset + K::ENCODED_LEN]);
            offset += K::ENCODED_LEN;
            LittleEndian::write_u32(&mut data[offset..offset + 4], *child);
            offset += CHILD_LEN;
        }
    }

    Ok(())
}

/// Decode the node stored in a page.
pub fn deserialize_node<K: IndexKey>(page: &Page) -> Result<BTreeNode<K>, BTreeError> {
    let data = &page.data;
    let page_type = LittleEndian::read_u32(&data[OFFSET_PAGE_TYPE..OFFSET_PAGE_TYPE + 4]);
    let size = LittleEndian::read_u32(&data[OFFSET_SIZE..OFFSET_SIZE + 4]) as usize;
    let max_size = LittleEndian::read_u32(&data[OFFSET_MAX_SIZE..OFFSET_MAX_SIZE + 4]);
    let parent_page_id = LittleEndian::read_u32(&data[OFFSET_PARENT..OFFSET_PARENT + 4]);
    let page_id = LittleEndian::read_u32(&data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4]);

    let is_leaf = match page_type {
        PAGE_TYPE_LEAF => true,
        PAGE_TYPE_INTERNAL => false,
        other => {
            return Err(BTreeError::Corrupted(format!(
                "page {} has unknown node type {}",
                page.page_id, other
            )))
        }
    };

    let header_size = if is_leaf { LEAF_HEADER_SIZE } else { INTERNAL_HEADER_SIZE };
    let pair_len = K::ENCODED_LEN + if is_leaf { RID_LEN } else { CHILD_LEN };
    if header_size + size * pair_len > PAGE_SIZE {
        return Err(BTreeError::Corrupted(format!(
            "page {} claims {} entries, more than fit in a page",
            page.page_id, size
        )));
    }

    let mut node = if is_leaf {
        BTreeNode::new_leaf(page_id, parent_page_id, max_size)
    } else {
        BTreeNode::new_internal(page_id, parent_page_id, max_size)
    };

    if is_leaf {
        node.next_page_id = LittleEndian::read_u32(&data[OFFSET_NEXT..OFFSET_NEXT + 4]);
        let mut offset = LEAF_HEADER_SIZE;
        for _ in 0..size {
            node.keys.push(K::decode(&data[offset..offset + K::ENCODED_LEN]));
            offset += K::ENCODED_LEN;
            let rid_page = LittleEndian::read_u32(&data[offset..offset + 4]);
            let rid_slot = LittleEndian::read_u32(&data[offset + 4..offset + 8]);
            node.rids.push(Rid::new(rid_page, rid_slot));
            offset += RID_LEN;
        }
    } else {
        let mut offset = INTERNAL_HEADER_SIZE;
        for _ in 0..size {
            node.keys.push(K::decode(&data[offset..offset + K::ENCODED_LEN]));
            offset += K::ENCODED_LEN;
            node.children.push(LittleEndian::read_u32(&data[offset..offset + 4]));
            offset += CHILD_LEN;
        }
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_leaf_round_trip() {
        let mut node = BTreeNode::<i64>::new_leaf(3, 7, 16);
        node.next_page_id = 11;
        node.insert(5, Rid::new(1, 0));
        node.insert(9, Rid::new(1, 1));

        let mut page = Page::new(3);
        serialize_node(&node, &mut page).unwrap();
        let decoded: BTreeNode<i64> = deserialize_node(&page).unwrap();

        assert!(decoded.is_leaf);
        assert_eq!(decoded.page_id, 3);
        assert_eq!(decoded.parent_page_id, 7);
        assert_eq!(decoded.max_size, 16);
        assert_eq!(decoded.next_page_id, 11);
        assert_eq!(decoded.keys, vec![5, 9]);
        assert_eq!(decoded.rids, vec![Rid::new(1, 0), Rid::new(1, 1)]);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node = BTreeNode::<i64>::new_internal(4, INVALID_PAGE_ID, 16);
        node.populate_new_root(1, 10, 2);

        let mut page = Page::new(4);
        serialize_node(&node, &mut page).unwrap();
        let decoded: BTreeNode<i64> = deserialize_node(&page).unwrap();

        assert!(!decoded.is_leaf);
        assert!(decoded.is_root());
        assert_eq!(decoded.keys[1], 10);
        assert_eq!(decoded.children, vec![1, 2]);
    }

    #[test]
    fn test_garbage_page_is_rejected() {
        let mut page = Page::new(9);
        page.data[0] = 0xAB;
        assert!(matches!(
            deserialize_node::<i64>(&page),
            Err(BTreeError::Corrupted(_))
        ));
    }
}

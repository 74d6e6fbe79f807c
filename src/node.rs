use zerocopy::{
    byteorder::{U16, U32},
    FromBytes, IntoBytes,
};

use crate::{
    error::io_invalid_data,
    repr::{
        page_ref, Key, NodeHeader, PageBuf, PageId, CHILDREN_SIZE, CHILD_SIZE, IS_BRANCH_FLAG,
        IS_LEAF_FLAG, KEYS_OFFSET, KEYS_SIZE, KEY_SIZE, NODE_HEADER_SIZE, NO_PAGE, SLOTS_OFFSET,
        VALUES_SIZE, VALUE_LEN_SIZE, VALUE_SLOT_SIZE,
    },
    utils::EscapedBytes,
    Error, MAX_KEYS, MAX_VALUE_LEN, PAGE_SIZE,
};

/// Decoded form of a tree page.
///
/// Nodes are transient: the tree decodes them from the page store, mutates them and encodes
/// them back. `id` is the page the node lives in and never changes, neither does its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Node {
    pub id: PageId,
    /// Strictly ascending
    pub keys: Vec<Key>,
    pub body: NodeBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeBody {
    Leaf(LeafBody),
    Branch(BranchBody),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LeafBody {
    /// `values[i]` belongs to `keys[i]`
    #[debug("{:?}", values.iter().map(|v| EscapedBytes(v)).collect::<Vec<_>>())]
    pub values: Vec<Vec<u8>>,
    pub next: Option<PageId>,
    pub prev: Option<PageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BranchBody {
    /// `children[i]` holds the keys in `keys[i - 1]..keys[i]`, always `keys.len() + 1` long
    pub children: Vec<PageId>,
}

impl Node {
    pub fn new_leaf(id: PageId) -> Self {
        Self {
            id,
            keys: Vec::with_capacity(MAX_KEYS + 1),
            body: NodeBody::Leaf(LeafBody::default()),
        }
    }

    pub fn new_branch(id: PageId, keys: Vec<Key>, children: Vec<PageId>) -> Self {
        assert_eq!(keys.len() + 1, children.len());
        Self {
            id,
            keys,
            body: NodeBody::Branch(BranchBody { children }),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf(_))
    }

    #[inline]
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Whether the node went over capacity and must be split before being written.
    #[inline]
    pub fn is_overfull(&self) -> bool {
        self.keys.len() > MAX_KEYS
    }

    #[track_caller]
    pub fn leaf(&self) -> &LeafBody {
        match &self.body {
            NodeBody::Leaf(leaf) => leaf,
            NodeBody::Branch(_) => panic!("leaf operation on branch node {}", self.id),
        }
    }

    #[track_caller]
    pub fn leaf_mut(&mut self) -> &mut LeafBody {
        match &mut self.body {
            NodeBody::Leaf(leaf) => leaf,
            NodeBody::Branch(_) => panic!("leaf operation on branch node {}", self.id),
        }
    }

    #[track_caller]
    pub fn branch(&self) -> &BranchBody {
        match &self.body {
            NodeBody::Branch(branch) => branch,
            NodeBody::Leaf(_) => panic!("branch operation on leaf node {}", self.id),
        }
    }

    #[track_caller]
    pub fn branch_mut(&mut self) -> &mut BranchBody {
        match &mut self.body {
            NodeBody::Branch(branch) => branch,
            NodeBody::Leaf(_) => panic!("branch operation on leaf node {}", self.id),
        }
    }

    /// Index of the child that covers `key`, the number of separators `<= key`.
    ///
    /// Leaf splits copy the first key of the new right node up as the separator,
    /// so a key equal to a separator lives in the right subtree.
    #[inline]
    pub fn child_index(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    #[inline]
    pub fn child_for(&self, key: Key) -> PageId {
        self.branch().children[self.child_index(key)]
    }

    pub fn leaf_get(&self, key: Key) -> Option<&[u8]> {
        let leaf = self.leaf();
        self.keys
            .binary_search(&key)
            .ok()
            .map(|i| leaf.values[i].as_slice())
    }

    /// Inserts or overwrites `key`. Values longer than [MAX_VALUE_LEN] are truncated.
    ///
    /// Returns `Ok(idx)` if an existing value was replaced or `Err(idx)` with the position
    /// of the new key. The node may be left overfull.
    pub fn leaf_upsert(&mut self, key: Key, value: &[u8]) -> Result<usize, usize> {
        let value = value[..value.len().min(MAX_VALUE_LEN)].to_vec();
        let search = self.keys.binary_search(&key);
        match search {
            Ok(i) => self.leaf_mut().values[i] = value,
            Err(i) => {
                self.leaf_mut().values.insert(i, value);
                self.keys.insert(i, key);
            }
        }
        search
    }

    /// Absorbs a split of `children[child_idx]`: `separator` goes at `child_idx` and the new
    /// right sibling right after the split child.
    pub fn branch_insert_child(&mut self, child_idx: usize, separator: Key, right: PageId) {
        debug_assert!(child_idx == 0 || self.keys[child_idx - 1] < separator);
        debug_assert!(child_idx == self.keys.len() || separator < self.keys[child_idx]);
        self.branch_mut().children.insert(child_idx + 1, right);
        self.keys.insert(child_idx, separator);
    }

    /// Moves keys `[at..]` and their values into a new leaf `right_id` and links it after
    /// this one. The caller must fix the `prev` pointer of the old right sibling, if any.
    pub fn split_leaf(&mut self, right_id: PageId, at: usize) -> Node {
        assert!(at > 0 && at < self.keys.len(), "bad split point {at}");
        let left_id = self.id;
        let keys = self.keys.split_off(at);
        let leaf = self.leaf_mut();
        let right = LeafBody {
            values: leaf.values.split_off(at),
            next: leaf.next,
            prev: Some(left_id),
        };
        leaf.next = Some(right_id);
        Node {
            id: right_id,
            keys,
            body: NodeBody::Leaf(right),
        }
    }

    /// Splits a branch around its middle key, which is removed from both halves and returned
    /// alongside the new right node.
    pub fn split_branch(&mut self, right_id: PageId) -> (Key, Node) {
        assert!(self.keys.len() >= 3, "branch {} too small to split", self.id);
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let separator = self.keys.pop().unwrap();
        let right_children = self.branch_mut().children.split_off(mid + 1);
        (
            separator,
            Node::new_branch(right_id, right_keys, right_children),
        )
    }

    pub fn to_page(&self) -> PageBuf {
        let mut page = [0u8; PAGE_SIZE];
        self.encode(&mut page);
        page
    }

    /// Encodes the node into `page`, which is fully overwritten.
    pub fn encode(&self, page: &mut PageBuf) {
        assert!(
            !self.is_overfull(),
            "node {} has {} keys",
            self.id,
            self.keys.len()
        );
        page.fill(0);
        let (flag, next, prev) = match &self.body {
            NodeBody::Leaf(leaf) => (
                IS_LEAF_FLAG,
                leaf.next.unwrap_or(NO_PAGE),
                leaf.prev.unwrap_or(NO_PAGE),
            ),
            NodeBody::Branch(_) => (IS_BRANCH_FLAG, 0, 0),
        };
        let header = NodeHeader {
            is_leaf: flag,
            id: U32::new(self.id),
            next: U32::new(next),
            prev: U32::new(prev),
            num_keys: U16::new(self.keys.len() as u16),
        };
        page[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());

        let key_slots = page[KEYS_OFFSET..][..KEYS_SIZE].chunks_exact_mut(KEY_SIZE);
        for (slot, key) in key_slots.zip(&self.keys) {
            slot.copy_from_slice(&key.to_be_bytes());
        }

        match &self.body {
            NodeBody::Leaf(leaf) => {
                debug_assert_eq!(leaf.values.len(), self.keys.len());
                let value_slots =
                    page[SLOTS_OFFSET..][..VALUES_SIZE].chunks_exact_mut(VALUE_SLOT_SIZE);
                for (slot, value) in value_slots.zip(&leaf.values) {
                    let len = value.len().min(MAX_VALUE_LEN);
                    let (len_bytes, data) = slot.split_at_mut(VALUE_LEN_SIZE);
                    len_bytes.copy_from_slice(&(len as u16).to_be_bytes());
                    data[..len].copy_from_slice(&value[..len]);
                }
            }
            NodeBody::Branch(branch) => {
                debug_assert_eq!(branch.children.len(), self.keys.len() + 1);
                let child_slots =
                    page[SLOTS_OFFSET..][..CHILDREN_SIZE].chunks_exact_mut(CHILD_SIZE);
                for (slot, child) in child_slots.zip(&branch.children) {
                    slot.copy_from_slice(&child.to_be_bytes());
                }
            }
        }
    }

    /// Decodes a node page.
    ///
    /// The stored key count decides how many slots are populated, nothing else is validated.
    /// Counts and lengths that can't fit the layout are reported as invalid data.
    pub fn decode(page: &PageBuf) -> Result<Self, Error> {
        let (header, _) = NodeHeader::read_from_prefix(&page[..])
            .map_err(|_| io_invalid_data!("Node page shorter than its header"))?;
        let id = header.id.get();
        let num_keys = usize::from(header.num_keys.get());
        if num_keys > MAX_KEYS {
            return Err(io_invalid_data!(
                "Node page {id} has {num_keys} keys, max is {MAX_KEYS}"
            ));
        }

        let keys = page[KEYS_OFFSET..]
            .chunks_exact(KEY_SIZE)
            .take(num_keys)
            .map(|b| Key::from_be_bytes(b.try_into().unwrap()))
            .collect::<Vec<_>>();

        let body = match header.is_leaf {
            IS_LEAF_FLAG => {
                let mut values = Vec::with_capacity(num_keys);
                for slot in page[SLOTS_OFFSET..].chunks_exact(VALUE_SLOT_SIZE).take(num_keys) {
                    let (len_bytes, data) = slot.split_at(VALUE_LEN_SIZE);
                    let len = usize::from(u16::from_be_bytes(len_bytes.try_into().unwrap()));
                    if len > MAX_VALUE_LEN {
                        return Err(io_invalid_data!(
                            "Node page {id} has a value of {len} bytes, max is {MAX_VALUE_LEN}"
                        ));
                    }
                    values.push(data[..len].to_vec());
                }
                NodeBody::Leaf(LeafBody {
                    values,
                    next: page_ref(header.next.get()),
                    prev: page_ref(header.prev.get()),
                })
            }
            IS_BRANCH_FLAG => {
                let children = page[SLOTS_OFFSET..]
                    .chunks_exact(CHILD_SIZE)
                    .take(num_keys + 1)
                    .map(|b| PageId::from_be_bytes(b.try_into().unwrap()))
                    .collect();
                NodeBody::Branch(BranchBody { children })
            }
            other => {
                return Err(io_invalid_data!(
                    "Node page {id} has an unknown kind flag {other}"
                ))
            }
        };
        Ok(Self { id, keys, body })
    }
}

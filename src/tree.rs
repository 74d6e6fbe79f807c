use std::collections::HashSet;

use crate::{
    error::{error_validation, io_invalid_data},
    node::Node,
    page_store::PageStore,
    repr::{Key, PageId},
    Error,
};

/// B+ tree over the page store, the only state is the root page id.
///
/// Nodes are read from the store on every access and written back as soon as they change,
/// nothing is cached at this level.
#[derive(Debug, Default)]
pub(crate) struct Tree {
    root: Option<PageId>,
}

/// Outcome of inserting into a subtree
#[derive(Debug)]
enum MutateResult {
    Ok,
    /// The subtree root split, `right` must be inserted right after it in the parent
    Split { separator: Key, right: PageId },
}

/// Shape of a tree, as gathered by [Tree::check]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, `0` for an empty tree and `1` for a lone root leaf
    pub height: usize,
    /// Number of key-value pairs
    pub num_keys: usize,
    pub num_leaves: usize,
    pub num_branches: usize,
}

impl Tree {
    pub fn new(root: Option<PageId>) -> Self {
        Self { root }
    }

    #[inline]
    pub fn root(&self) -> Option<PageId> {
        self.root
    }

    pub fn get(&self, store: &PageStore, key: Key) -> Result<Option<Vec<u8>>, Error> {
        let Some(mut page_id) = self.root else {
            return Ok(None);
        };
        // Every level of a valid tree is a distinct page
        let max_depth = store.num_pages();
        for _ in 0..max_depth {
            let node = read_node(store, page_id)?;
            if node.is_leaf() {
                return Ok(node.leaf_get(key).map(<[u8]>::to_vec));
            }
            page_id = node.child_for(key);
        }
        Err(descent_too_deep(max_depth))
    }

    /// Inserts or overwrites `key`, values longer than [crate::MAX_VALUE_LEN] are truncated.
    ///
    /// On error the pages written so far stay written, the tree may be left inconsistent.
    pub fn insert(&mut self, store: &PageStore, key: Key, value: &[u8]) -> Result<(), Error> {
        let root_id = match self.root {
            Some(root_id) => root_id,
            None => {
                let root_id = store.allocate()?;
                write_node(store, &Node::new_leaf(root_id))?;
                debug!("Created root leaf {root_id}");
                self.root = Some(root_id);
                root_id
            }
        };
        if let MutateResult::Split { separator, right } =
            insert_recursive(store, root_id, key, value, store.num_pages())?
        {
            let new_root_id = store.allocate()?;
            let new_root = Node::new_branch(new_root_id, vec![separator], vec![root_id, right]);
            write_node(store, &new_root)?;
            debug!("Root {root_id} split, new root {new_root_id} with separator {separator}");
            self.root = Some(new_root_id);
        }
        Ok(())
    }

    /// Walks the whole tree validating its structure.
    ///
    /// Checks key order and separator bounds, uniform leaf depth, that only the root may be
    /// empty, and that the leaf sibling chain matches the in-order leaf sequence.
    pub fn check(&self, store: &PageStore) -> Result<TreeStats, Error> {
        let mut stats = TreeStats::default();
        let Some(root_id) = self.root else {
            return Ok(stats);
        };
        let mut walk = CheckWalk {
            store,
            visited: HashSet::new(),
            leaves: Vec::new(),
            leaf_depth: None,
            stats: &mut stats,
        };
        walk.visit(root_id, None, None, 1)?;
        let leaves = walk.leaves;
        let height = walk.leaf_depth.unwrap_or(0);
        stats.height = height;

        let first = &leaves[0];
        if first.prev.is_some() {
            return Err(error_validation!(
                "Leftmost leaf {} has prev {:?}",
                first.id,
                first.prev
            ));
        }
        for pair in leaves.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.next != Some(right.id) || right.prev != Some(left.id) {
                return Err(error_validation!(
                    "Broken leaf chain between {left:?} and {right:?}"
                ));
            }
        }
        let last = &leaves[leaves.len() - 1];
        if last.next.is_some() {
            return Err(error_validation!(
                "Rightmost leaf {} has next {:?}",
                last.id,
                last.next
            ));
        }
        Ok(stats)
    }
}

fn read_node(store: &PageStore, page_id: PageId) -> Result<Node, Error> {
    let node = Node::decode(&store.read_page(page_id)?)?;
    if node.id != page_id {
        return Err(io_invalid_data!(
            "Page {page_id} holds a node with id {}",
            node.id
        ));
    }
    Ok(node)
}

#[cold]
fn descent_too_deep(max_depth: PageId) -> Error {
    io_invalid_data!("No leaf reached after {max_depth} levels, the tree has a cycle")
}

#[inline]
fn write_node(store: &PageStore, node: &Node) -> Result<(), Error> {
    store.write_page(node.id, &node.to_page())
}

fn insert_recursive(
    store: &PageStore,
    page_id: PageId,
    key: Key,
    value: &[u8],
    depth_left: PageId,
) -> Result<MutateResult, Error> {
    if depth_left == 0 {
        return Err(descent_too_deep(store.num_pages()));
    }
    let mut node = read_node(store, page_id)?;
    if node.is_leaf() {
        let search = node.leaf_upsert(key, value);
        if !node.is_overfull() {
            write_node(store, &node)?;
            return Ok(MutateResult::Ok);
        }
        return split_leaf(store, node, search);
    }

    let child_idx = node.child_index(key);
    let child_id = node.branch().children[child_idx];
    match insert_recursive(store, child_id, key, value, depth_left - 1)? {
        MutateResult::Ok => Ok(MutateResult::Ok),
        MutateResult::Split { separator, right } => {
            node.branch_insert_child(child_idx, separator, right);
            if node.is_overfull() {
                split_branch(store, node)
            } else {
                write_node(store, &node)?;
                Ok(MutateResult::Ok)
            }
        }
    }
}

/// Splits an overfull leaf, `search` is the upsert position of the key that overflowed it.
fn split_leaf(
    store: &PageStore,
    mut node: Node,
    search: Result<usize, usize>,
) -> Result<MutateResult, Error> {
    let num_keys = node.num_keys();
    // Optimize for sequential inserts, only the appended key moves to the new leaf
    let split_at = if search == Err(num_keys - 1) && node.leaf().next.is_none() {
        num_keys - 1
    } else {
        num_keys / 2
    };
    let right_id = store.allocate()?;
    let right = node.split_leaf(right_id, split_at);
    let separator = right.keys[0];
    trace!(
        "Split leaf {} at {split_at}, right sibling {right_id}, separator {separator}",
        node.id
    );

    write_node(store, &right)?;
    if let Some(next_id) = right.leaf().next {
        let mut next = read_node(store, next_id)?;
        if !next.is_leaf() {
            return Err(io_invalid_data!(
                "Leaf {} links to branch {next_id} as its next sibling",
                node.id
            ));
        }
        next.leaf_mut().prev = Some(right_id);
        write_node(store, &next)?;
    }
    write_node(store, &node)?;
    Ok(MutateResult::Split {
        separator,
        right: right_id,
    })
}

fn split_branch(store: &PageStore, mut node: Node) -> Result<MutateResult, Error> {
    let right_id = store.allocate()?;
    let (separator, right) = node.split_branch(right_id);
    trace!(
        "Split branch {}, right sibling {right_id}, separator {separator}",
        node.id
    );
    write_node(store, &right)?;
    write_node(store, &node)?;
    Ok(MutateResult::Split {
        separator,
        right: right_id,
    })
}

#[derive(Debug)]
struct LeafLinks {
    id: PageId,
    next: Option<PageId>,
    prev: Option<PageId>,
}

struct CheckWalk<'a> {
    store: &'a PageStore,
    visited: HashSet<PageId>,
    leaves: Vec<LeafLinks>,
    leaf_depth: Option<usize>,
    stats: &'a mut TreeStats,
}

impl CheckWalk<'_> {
    /// Visits the subtree at `page_id`, which must only hold keys in `lower..upper`.
    fn visit(
        &mut self,
        page_id: PageId,
        lower: Option<Key>,
        upper: Option<Key>,
        depth: usize,
    ) -> Result<(), Error> {
        if !self.visited.insert(page_id) {
            return Err(error_validation!("Page {page_id} is reachable twice"));
        }
        let node = read_node(self.store, page_id)?;
        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(error_validation!(
                "Node {page_id} keys aren't sorted: {:?}",
                node.keys
            ));
        }
        if let (Some(&first), Some(&last)) = (node.keys.first(), node.keys.last()) {
            if lower.is_some_and(|lb| first < lb) || upper.is_some_and(|ub| last >= ub) {
                return Err(error_validation!(
                    "Node {page_id} keys {:?} outside of bounds {lower:?}..{upper:?}",
                    node.keys
                ));
            }
        } else if depth != 1 || !node.is_leaf() {
            return Err(error_validation!("Node {page_id} is empty"));
        }

        if node.is_leaf() {
            match self.leaf_depth {
                None => self.leaf_depth = Some(depth),
                Some(d) if d != depth => {
                    return Err(error_validation!(
                        "Leaf {page_id} at depth {depth}, other leaves at depth {d}"
                    ));
                }
                Some(_) => (),
            }
            let leaf = node.leaf();
            self.stats.num_leaves += 1;
            self.stats.num_keys += node.num_keys();
            self.leaves.push(LeafLinks {
                id: page_id,
                next: leaf.next,
                prev: leaf.prev,
            });
            return Ok(());
        }

        self.stats.num_branches += 1;
        let children = &node.branch().children;
        for (i, &child_id) in children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1]) };
            let child_upper = node.keys.get(i).copied().or(upper);
            self.visit(child_id, child_lower, child_upper, depth + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};

    use super::*;
    use crate::{options::DbOptions, MAX_KEYS};

    fn new_store(dir: &tempfile::TempDir) -> PageStore {
        let mut options = DbOptions::new(dir.path().join("tree"));
        options.disable_fsync = true;
        PageStore::open(&options).unwrap()
    }

    fn value_for(key: Key) -> Vec<u8> {
        format!("value-{key}").into_bytes()
    }

    fn fill(tree: &mut Tree, store: &PageStore, keys: impl IntoIterator<Item = Key>) {
        for key in keys {
            tree.insert(store, key, &value_for(key)).unwrap();
        }
    }

    fn leaf_keys(store: &PageStore, tree: &Tree) -> Vec<Vec<Key>> {
        // leftmost leaf then follow the chain
        let mut page_id = tree.root().unwrap();
        let mut node = read_node(store, page_id).unwrap();
        while !node.is_leaf() {
            page_id = node.branch().children[0];
            node = read_node(store, page_id).unwrap();
        }
        let mut result = vec![node.keys.clone()];
        while let Some(next) = node.leaf().next {
            node = read_node(store, next).unwrap();
            result.push(node.keys.clone());
        }
        result
    }

    #[test]
    fn empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let tree = Tree::default();
        assert_eq!(tree.get(&store, 1).unwrap(), None);
        assert_eq!(tree.check(&store).unwrap(), TreeStats::default());
        assert_eq!(store.num_pages(), 0);
    }

    #[test]
    fn one_to_five() {
        let _ = env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        for (key, value) in (1..=3).zip([b"a", b"b", b"c"]) {
            tree.insert(&store, key, value).unwrap();
        }
        let root = read_node(&store, tree.root().unwrap()).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.keys, vec![1, 2, 3]);

        tree.insert(&store, 4, b"d").unwrap();
        let root = read_node(&store, tree.root().unwrap()).unwrap();
        assert!(!root.is_leaf());
        assert_eq!(root.keys, vec![4]);
        let children = &root.branch().children;
        assert_eq!(children.len(), 2);
        assert_eq!(read_node(&store, children[0]).unwrap().keys, vec![1, 2, 3]);
        assert_eq!(read_node(&store, children[1]).unwrap().keys, vec![4]);

        tree.insert(&store, 5, b"e").unwrap();
        assert_eq!(tree.get(&store, 5).unwrap().as_deref(), Some(&b"e"[..]));
        assert_eq!(tree.get(&store, 4).unwrap().as_deref(), Some(&b"d"[..]));
        assert_eq!(tree.get(&store, 1).unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(tree.get(&store, 6).unwrap(), None);
        assert_eq!(leaf_keys(&store, &tree), vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn four_keys_split_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, [40, 10, 30, 20]);
        let root = read_node(&store, tree.root().unwrap()).unwrap();
        assert!(!root.is_leaf());
        assert_eq!(root.num_keys(), 1);
        assert_eq!(root.branch().children.len(), 2);
        let stats = tree.check(&store).unwrap();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.num_keys, 4);
        for leaf in leaf_keys(&store, &tree) {
            assert!(leaf.len() <= MAX_KEYS);
        }
    }

    #[test]
    fn middle_insert_splits_at_midpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, [10, 20, 30, 15]);
        let root = read_node(&store, tree.root().unwrap()).unwrap();
        assert_eq!(root.keys, vec![20]);
        assert_eq!(leaf_keys(&store, &tree), vec![vec![10, 15], vec![20, 30]]);
    }

    #[test]
    fn split_relinks_next_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, [10, 20, 30, 40]);
        // the left leaf {10, 20, 30} splits while it has a right sibling
        fill(&mut tree, &store, [15]);
        assert_eq!(
            leaf_keys(&store, &tree),
            vec![vec![10, 15], vec![20, 30], vec![40]]
        );
        tree.check(&store).unwrap();
    }

    #[test]
    fn upsert_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, 0..20);
        let pages = store.num_pages();
        tree.insert(&store, 7, b"new").unwrap();
        tree.insert(&store, 7, b"newer").unwrap();
        assert_eq!(tree.get(&store, 7).unwrap().as_deref(), Some(&b"newer"[..]));
        assert_eq!(tree.check(&store).unwrap().num_keys, 20);
        assert_eq!(store.num_pages(), pages);
    }

    #[test]
    fn branch_splits() {
        let _ = env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, 0..200);
        let stats = tree.check(&store).unwrap();
        assert_eq!(stats.num_keys, 200);
        assert!(stats.height >= 4, "{stats:?}");
        assert!(stats.num_branches > 1);
        // every separator is reachable by equality
        for key in 0..200 {
            assert_eq!(tree.get(&store, key).unwrap(), Some(value_for(key)), "{key}");
        }
        assert_eq!(tree.get(&store, -1).unwrap(), None);
        assert_eq!(tree.get(&store, 200).unwrap(), None);
    }

    #[test]
    fn sequential_inserts_fill_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, 0..99);
        let leaves = leaf_keys(&store, &tree);
        assert_eq!(leaves.len(), 33);
        assert!(leaves.iter().all(|l| l.len() == MAX_KEYS));
    }

    #[test]
    fn reverse_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, (-100..100).rev());
        assert_eq!(tree.check(&store).unwrap().num_keys, 200);
        let all = leaf_keys(&store, &tree).concat();
        assert_eq!(all, (-100..100).collect::<Vec<_>>());
        for key in -100..100 {
            assert_eq!(tree.get(&store, key).unwrap(), Some(value_for(key)));
        }
    }

    #[test]
    fn shuffled_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        let mut keys = (0..500).map(|i| i * 7 - 1000).collect::<Vec<Key>>();
        keys.shuffle(&mut SmallRng::seed_from_u64(7));
        for (i, &key) in keys.iter().enumerate() {
            tree.insert(&store, key, &value_for(key)).unwrap();
            if i % 50 == 0 {
                tree.check(&store).unwrap();
            }
        }
        assert_eq!(tree.check(&store).unwrap().num_keys, keys.len());
        keys.sort();
        assert_eq!(leaf_keys(&store, &tree).concat(), keys);
        for &key in &keys {
            assert_eq!(tree.get(&store, key).unwrap(), Some(value_for(key)));
            assert_eq!(tree.get(&store, key + 1).unwrap(), None);
        }
    }

    #[test]
    fn extreme_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, [i32::MAX, i32::MIN, 0, -1, 1, i32::MAX - 1, i32::MIN + 1]);
        tree.check(&store).unwrap();
        for key in [i32::MAX, i32::MIN, 0, -1, 1, i32::MAX - 1, i32::MIN + 1] {
            assert_eq!(tree.get(&store, key).unwrap(), Some(value_for(key)));
        }
    }

    #[test]
    fn cyclic_branch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        for _ in 0..3 {
            store.allocate().unwrap();
        }
        // page 2 points back at itself on both sides
        write_node(&store, &Node::new_branch(2, vec![10], vec![2, 2])).unwrap();
        let mut tree = Tree::new(Some(2));
        assert!(matches!(
            tree.get(&store, 1),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData
        ));
        assert!(matches!(
            tree.insert(&store, 11, b"x"),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData
        ));
        assert!(matches!(tree.check(&store), Err(Error::Validation(_))));

        // a cycle through an ancestor further up
        write_node(&store, &Node::new_branch(0, vec![10], vec![1, 1])).unwrap();
        write_node(&store, &Node::new_branch(1, vec![10], vec![0, 0])).unwrap();
        let mut tree = Tree::new(Some(0));
        assert!(tree.get(&store, 20).is_err());
        assert!(tree.insert(&store, 20, b"x").is_err());
        assert_eq!(store.num_pages(), 3);
    }

    #[test]
    fn check_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir);
        let mut tree = Tree::default();
        fill(&mut tree, &store, 0..10);
        tree.check(&store).unwrap();

        // break the chain by unlinking a leaf's prev pointer
        let first_leaf = {
            let mut node = read_node(&store, tree.root().unwrap()).unwrap();
            while !node.is_leaf() {
                node = read_node(&store, node.branch().children[0]).unwrap();
            }
            node
        };
        let second_id = first_leaf.leaf().next.unwrap();
        let mut second = read_node(&store, second_id).unwrap();
        second.leaf_mut().prev = None;
        write_node(&store, &second).unwrap();
        assert!(matches!(tree.check(&store), Err(Error::Validation(_))));

        // a node stored under the wrong page
        second.leaf_mut().prev = Some(first_leaf.id);
        second.id = first_leaf.id;
        store.write_page(second_id, &second.to_page()).unwrap();
        assert!(matches!(tree.check(&store), Err(Error::Io(_))));
        assert!(tree.get(&store, 4).is_err());
        assert_eq!(tree.get(&store, 0).unwrap(), Some(value_for(0)));
    }
}

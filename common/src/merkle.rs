//! Binary hash tree over an ordered leaf sequence.
//!
//! Both the manager and the decision makers derive a root over the same
//! canonically serialized intent set; equal roots mean the two sides hold
//! identical intents for a node.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A node in the tree. Leaves carry the hash they were built from;
/// interior nodes carry the hash of their children's concatenated bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub hash: String,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(hash: String) -> Self {
        Self {
            hash,
            left: None,
            right: None,
        }
    }
}

/// Root hash of the empty tree: SHA-256 of the empty string.
pub fn empty_root() -> String {
    hex::encode(Sha256::digest(b""))
}

/// Build a tree bottom-up from ordered leaf hashes.
///
/// The last node of an odd-sized level is paired with itself. Returns a
/// single empty-string leaf when no hashes are given.
pub fn build(leaf_hashes: &[String]) -> MerkleNode {
    if leaf_hashes.is_empty() {
        return MerkleNode::leaf(empty_root());
    }

    let mut level: Vec<MerkleNode> = leaf_hashes
        .iter()
        .map(|h| MerkleNode::leaf(h.clone()))
        .collect();

    while level.len() > 1 {
        let mut parents = Vec::with_capacity(level.len().div_ceil(2));
        let mut nodes = level.into_iter();
        while let Some(left) = nodes.next() {
            let right = nodes.next().unwrap_or_else(|| left.clone());
            let hash = combine(&left.hash, &right.hash);
            parents.push(MerkleNode {
                hash,
                left: Some(Box::new(left)),
                right: Some(Box::new(right)),
            });
        }
        level = parents;
    }

    level.into_iter().next().expect("non-empty level")
}

/// Parent hash: SHA-256 over the raw-byte concatenation of the children's
/// hex-decoded hashes. Non-hex child hashes fall back to hashing the
/// concatenated hex strings themselves.
fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    match (hex::decode(left), hex::decode(right)) {
        (Ok(l), Ok(r)) => {
            hasher.update(&l);
            hasher.update(&r);
        }
        _ => {
            hasher.update(left.as_bytes());
            hasher.update(right.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Pre-order search for the first node carrying `hash`.
pub fn find<'a>(root: &'a MerkleNode, hash: &str) -> Option<&'a MerkleNode> {
    if root.hash == hash {
        return Some(root);
    }
    if let Some(left) = root.left.as_deref()
        && let Some(found) = find(left, hash)
    {
        return Some(found);
    }
    if let Some(right) = root.right.as_deref()
        && let Some(found) = find(right, hash)
    {
        return Some(found);
    }
    None
}

/// Detached copy of `root` pruned to `depth` levels below it.
/// Depth 0 keeps only the root's hash.
pub fn truncate(root: &MerkleNode, depth: usize) -> MerkleNode {
    if depth == 0 {
        return MerkleNode::leaf(root.hash.clone());
    }
    MerkleNode {
        hash: root.hash.clone(),
        left: root
            .left
            .as_deref()
            .map(|n| Box::new(truncate(n, depth - 1))),
        right: root
            .right
            .as_deref()
            .map(|n| Box::new(truncate(n, depth - 1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_hashes(values: &[&str]) -> Vec<String> {
        values
            .iter()
            .map(|v| hex::encode(Sha256::digest(v.as_bytes())))
            .collect()
    }

    #[test]
    fn empty_tree_root_is_hash_of_empty_string() {
        let root = build(&[]);
        assert_eq!(root.hash, empty_root());
        assert_eq!(
            root.hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(root.left.is_none());
        assert!(root.right.is_none());
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let hashes = leaf_hashes(&["only"]);
        let root = build(&hashes);
        assert_eq!(root.hash, hashes[0]);
        assert!(root.left.is_none());
    }

    #[test]
    fn odd_level_pairs_last_node_with_itself() {
        let hashes = leaf_hashes(&["a", "b", "c"]);
        let root = build(&hashes);

        // Level 1: (a,b) and (c,c); root = combine of those two.
        let ab = combine(&hashes[0], &hashes[1]);
        let cc = combine(&hashes[2], &hashes[2]);
        assert_eq!(root.hash, combine(&ab, &cc));
        assert_eq!(root.right.as_ref().unwrap().hash, cc);
    }

    #[test]
    fn non_hex_leaves_fall_back_to_string_hashing() {
        let hashes = vec!["not-hex!".to_string(), "also not hex".to_string()];
        let root = build(&hashes);
        let expected = hex::encode(Sha256::digest(b"not-hex!also not hex"));
        assert_eq!(root.hash, expected);
    }

    #[test]
    fn find_locates_interior_and_leaf_nodes() {
        let hashes = leaf_hashes(&["a", "b", "c", "d"]);
        let root = build(&hashes);
        let ab = combine(&hashes[0], &hashes[1]);

        assert_eq!(find(&root, &root.hash).unwrap().hash, root.hash);
        assert_eq!(find(&root, &ab).unwrap().hash, ab);
        assert_eq!(find(&root, &hashes[3]).unwrap().hash, hashes[3]);
        assert!(find(&root, "0000").is_none());
    }

    #[test]
    fn truncate_preserves_root_hash() {
        let hashes = leaf_hashes(&["a", "b", "c", "d"]);
        let root = build(&hashes);

        let top = truncate(find(&root, &root.hash).unwrap(), 0);
        assert_eq!(top.hash, root.hash);
        assert!(top.left.is_none());
        assert!(top.right.is_none());

        let one = truncate(&root, 1);
        assert_eq!(one.hash, root.hash);
        assert!(one.left.as_ref().unwrap().left.is_none());
    }
}

//! The authenticated UTXO Merkle trie: a binary radix trie over outpoint
//! keys, copy-on-write via `Rc`, whose root hash commits to the entire
//! unspent set the way a Merkle root commits to a block's transactions.
//!
//! This is a from-scratch Rust rendition of the original C++ `MerkleTrie`'s
//! node shape (`Branch`/`Leaf`, clone-on-write when a node is shared) rather
//! than a line-for-line port: path compression and the iterator/branch
//! audit-path machinery are simplified to what the claims pool and reorg
//! logic actually consume — membership, insertion, removal, and the root
//! hash itself. A removed branch's surviving leaf child collapses straight
//! back into its parent slot, since a leaf's identity does not depend on
//! its depth; a surviving branch child is left wrapped, since its internal
//! bit tests are depth-relative and promoting it would misroute them.
//!
//! The key is the literal 36-byte `txid ‖ big-endian output index` wire
//! encoding (not a digest of it), and a leaf's contribution to the root is
//! `H(value ‖ script ‖ key)` — both externally observable, since this root
//! is the spendables-root committed into every v3 block's coinbase and a
//! light client's audit path must re-derive the same hashes the trie does.

use coin_primitives::hash::Hash256;
use std::rc::Rc;

/// 36-byte trie key: `txid(32) ‖ output index, big-endian(4)`.
pub type Key = [u8; 36];

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        key: Key,
        value: i64,
        script: Vec<u8>,
    },
    Branch {
        left: Option<Rc<Node>>,
        right: Option<Rc<Node>>,
    },
}

fn bit(key: &Key, depth: usize) -> bool {
    let byte = key[depth / 8];
    (byte >> (7 - (depth % 8))) & 1 == 1
}

/// `H(value ‖ script ‖ key)`, the leaf's contribution to the trie's root.
fn leaf_hash(key: &Key, value: i64, script: &[u8]) -> Hash256 {
    let mut buf = Vec::with_capacity(8 + script.len() + key.len());
    buf.extend_from_slice(&value.to_le_bytes());
    buf.extend_from_slice(script);
    buf.extend_from_slice(key);
    Hash256::double_sha256(&buf)
}

fn hash_of(node: Option<&Rc<Node>>) -> Hash256 {
    match node {
        None => Hash256::zero(),
        Some(n) => match &**n {
            Node::Leaf { key, value, script } => leaf_hash(key, *value, script),
            Node::Branch { left, right } => {
                let mut buf = [0u8; 64];
                buf[0..32].copy_from_slice(hash_of(left.as_ref()).as_bytes());
                buf[32..64].copy_from_slice(hash_of(right.as_ref()).as_bytes());
                Hash256::double_sha256(&buf)
            }
        },
    }
}

fn leaves_from_two(
    existing_key: Key,
    existing_value: i64,
    existing_script: Vec<u8>,
    new_key: Key,
    new_value: i64,
    new_script: Vec<u8>,
    depth: usize,
) -> Rc<Node> {
    let existing_bit = bit(&existing_key, depth);
    let new_bit = bit(&new_key, depth);
    if existing_bit == new_bit {
        let child = leaves_from_two(
            existing_key,
            existing_value,
            existing_script,
            new_key,
            new_value,
            new_script,
            depth + 1,
        );
        if existing_bit {
            Rc::new(Node::Branch {
                left: None,
                right: Some(child),
            })
        } else {
            Rc::new(Node::Branch {
                left: Some(child),
                right: None,
            })
        }
    } else {
        let existing_leaf = Rc::new(Node::Leaf {
            key: existing_key,
            value: existing_value,
            script: existing_script,
        });
        let new_leaf = Rc::new(Node::Leaf {
            key: new_key,
            value: new_value,
            script: new_script,
        });
        if new_bit {
            Rc::new(Node::Branch {
                left: Some(existing_leaf),
                right: Some(new_leaf),
            })
        } else {
            Rc::new(Node::Branch {
                left: Some(new_leaf),
                right: Some(existing_leaf),
            })
        }
    }
}

fn insert(node: Option<Rc<Node>>, key: Key, value: i64, script: Vec<u8>, depth: usize) -> Rc<Node> {
    match node {
        None => Rc::new(Node::Leaf { key, value, script }),
        Some(existing) => match &*existing {
            Node::Leaf {
                key: existing_key, ..
            } if *existing_key == key => Rc::new(Node::Leaf { key, value, script }),
            Node::Leaf {
                key: existing_key,
                value: existing_value,
                script: existing_script,
            } => leaves_from_two(
                *existing_key,
                *existing_value,
                existing_script.clone(),
                key,
                value,
                script,
                depth,
            ),
            Node::Branch { left, right } => {
                if bit(&key, depth) {
                    Rc::new(Node::Branch {
                        left: left.clone(),
                        right: Some(insert(right.clone(), key, value, script, depth + 1)),
                    })
                } else {
                    Rc::new(Node::Branch {
                        left: Some(insert(left.clone(), key, value, script, depth + 1)),
                        right: right.clone(),
                    })
                }
            }
        },
    }
}

/// Removes `key` from the subtree rooted at `node`. Returns `None` if the
/// subtree is now empty, collapsing a single surviving leaf child straight
/// into the parent slot (safe, since leaf lookup doesn't depend on depth)
/// while leaving a surviving branch child wrapped (its bit tests are
/// depth-relative and promoting it would misroute them).
fn remove(node: Rc<Node>, key: &Key, depth: usize) -> Option<Rc<Node>> {
    match &*node {
        Node::Leaf { key: k, .. } => {
            if k == key {
                None
            } else {
                Some(node)
            }
        }
        Node::Branch { left, right } => {
            let (new_left, new_right) = if bit(key, depth) {
                let new_right = right
                    .clone()
                    .and_then(|r| remove(r, key, depth + 1));
                (left.clone(), new_right)
            } else {
                let new_left = left.clone().and_then(|l| remove(l, key, depth + 1));
                (new_left, right.clone())
            };

            match (new_left, new_right) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child))
                    if matches!(*child, Node::Leaf { .. }) =>
                {
                    Some(child)
                }
                (left, right) => Some(Rc::new(Node::Branch { left, right })),
            }
        }
    }
}

fn find<'a>(node: &'a Node, key: &Key, depth: usize) -> Option<&'a Node> {
    match node {
        Node::Leaf { key: k, .. } => {
            if k == key {
                Some(node)
            } else {
                None
            }
        }
        Node::Branch { left, right } => {
            let next = if bit(key, depth) { right } else { left };
            next.as_deref().and_then(|n| find(n, key, depth + 1))
        }
    }
}

/// An authenticated key/value trie over the literal 36-byte outpoint
/// encoding. `root_hash()` commits to the entire UTXO set the way the
/// original node's spendables-root does: a v3 block's coinbase carries this
/// value, and `branch`/`MerkleBranch::validate` let a light client confirm
/// one output's membership without holding the rest of the set.
#[derive(Debug, Clone, Default)]
pub struct MerkleTrie {
    root: Option<Rc<Node>>,
    len: usize,
}

impl MerkleTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key, value: i64, script: Vec<u8>) {
        if self.get(&key).is_none() {
            self.len += 1;
        }
        self.root = Some(insert(self.root.take(), key, value, script, 0));
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        match self.root.take() {
            Some(node) if find(&node, key, 0).is_some() => {
                self.len -= 1;
                self.root = remove(node, key, 0);
                true
            }
            other => {
                self.root = other;
                false
            }
        }
    }

    /// The `(value, script)` pair committed at `key`, if present.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<(i64, &[u8])> {
        self.root.as_deref().and_then(|n| find(n, key, 0)).map(|n| match n {
            Node::Leaf { value, script, .. } => (*value, script.as_slice()),
            Node::Branch { .. } => unreachable!("find only returns leaves"),
        })
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The authenticated root hash: `Hash256::zero()` for an empty trie.
    #[must_use]
    pub fn root_hash(&self) -> Hash256 {
        hash_of(self.root.as_ref())
    }

    /// Takes an O(1) copy-on-write snapshot of the current trie. Because
    /// every node is reached through `Rc`, cloning the handful of fields
    /// here shares all existing nodes with the snapshot; subsequent
    /// mutation of either copy only allocates the nodes on its own path,
    /// leaving the other copy's view of the tree untouched.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Restores this trie to a previously taken `snapshot`, discarding any
    /// mutations made since. Used by the block chain engine to undo a
    /// partially-applied block or reorganisation.
    pub fn restore(&mut self, snapshot: &Self) {
        self.root = snapshot.root.clone();
        self.len = snapshot.len;
    }

    /// Builds an authentication path (audit branch) for `key`: the sibling
    /// hash at each level from the leaf up to the root, ordered leaf-first.
    /// Returns `None` if `key` is absent. `validate` re-derives the root
    /// from a branch produced this way.
    #[must_use]
    pub fn branch(&self, key: &Key) -> Option<MerkleBranch> {
        let mut siblings = Vec::new();
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        let leaf_hash = loop {
            match &**node {
                Node::Leaf { key: k, .. } => {
                    if k != key {
                        return None;
                    }
                    break hash_of(Some(node));
                }
                Node::Branch { left, right } => {
                    let (next, sibling) = if bit(key, depth) {
                        (right, left)
                    } else {
                        (left, right)
                    };
                    siblings.push(hash_of(sibling.as_ref()));
                    node = next.as_ref()?;
                    depth += 1;
                }
            }
        };
        Some(MerkleBranch {
            leaf_hash,
            siblings,
            key: *key,
        })
    }
}

/// An authentication path produced by `MerkleTrie::branch`: enough to
/// re-derive the trie's root hash from a single leaf without the rest of
/// the tree, the way an SPV client confirms a UTXO's membership.
#[derive(Debug, Clone)]
pub struct MerkleBranch {
    leaf_hash: Hash256,
    /// Sibling hashes from the leaf's depth up to the root, leaf-first.
    siblings: Vec<Hash256>,
    key: Key,
}

impl MerkleBranch {
    /// Re-hashes this branch up to the root and compares it with
    /// `expected_root`, returning whether the leaf is proven to be a
    /// member of the trie that root commits to.
    #[must_use]
    pub fn validate(&self, expected_root: Hash256) -> bool {
        let mut depth = self.siblings.len();
        let mut acc = self.leaf_hash;
        for sibling in self.siblings.iter().rev() {
            depth -= 1;
            let mut buf = [0u8; 64];
            if bit(&self.key, depth) {
                buf[0..32].copy_from_slice(sibling.as_bytes());
                buf[32..64].copy_from_slice(acc.as_bytes());
            } else {
                buf[0..32].copy_from_slice(acc.as_bytes());
                buf[32..64].copy_from_slice(sibling.as_bytes());
            }
            acc = Hash256::double_sha256(&buf);
        }
        acc == expected_root
    }
}

/// Derives the trie key for an unspent output: the literal 36-byte
/// `txid ‖ big-endian output index` wire encoding `OutPoint` serialises to
/// in every other authenticated structure in this crate (the block
/// locator's hashes excepted), not a digest of it.
#[must_use]
pub fn key_for_outpoint(outpoint: &coin_primitives::types::OutPoint) -> Key {
    let mut key = [0u8; 36];
    key[0..32].copy_from_slice(outpoint.txid.as_bytes());
    key[32..36].copy_from_slice(&outpoint.vout.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(tag: &[u8]) -> Key {
        key_for_outpoint(&coin_primitives::types::OutPoint::new(
            Hash256::double_sha256(tag),
            0,
        ))
    }

    #[test]
    fn key_is_the_literal_outpoint_encoding() {
        let outpoint = coin_primitives::types::OutPoint::new(Hash256::double_sha256(b"tx"), 7);
        let key = key_for_outpoint(&outpoint);
        assert_eq!(&key[0..32], outpoint.txid.as_bytes());
        assert_eq!(&key[32..36], &7u32.to_be_bytes());
    }

    #[test]
    fn leaf_hash_matches_value_script_key_formula() {
        let key = k(b"a");
        let script = vec![1, 2, 3];
        let mut trie = MerkleTrie::new();
        trie.insert(key, 500, script.clone());
        let mut expected = Vec::new();
        expected.extend_from_slice(&500i64.to_le_bytes());
        expected.extend_from_slice(&script);
        expected.extend_from_slice(&key);
        assert_eq!(trie.root_hash(), Hash256::double_sha256(&expected));
    }

    #[test]
    fn empty_trie_has_zero_root() {
        assert_eq!(MerkleTrie::new().root_hash(), Hash256::zero());
    }

    #[test]
    fn insert_changes_root_and_is_findable() {
        let mut trie = MerkleTrie::new();
        let key = k(b"outpoint-1");
        let empty_root = trie.root_hash();
        trie.insert(key, 10, vec![9]);
        assert_ne!(trie.root_hash(), empty_root);
        assert_eq!(trie.get(&key), Some((10, &[9][..])));
    }

    #[test]
    fn remove_restores_previous_root() {
        let mut trie = MerkleTrie::new();
        let key_a = k(b"a");
        let key_b = k(b"b");
        trie.insert(key_a, 1, vec![1]);
        let root_after_a = trie.root_hash();
        trie.insert(key_b, 2, vec![2]);
        assert!(trie.remove(&key_b));
        assert_eq!(trie.root_hash(), root_after_a);
    }

    #[test]
    fn root_is_order_independent() {
        let a = k(b"a");
        let b = k(b"b");

        let mut trie_ab = MerkleTrie::new();
        trie_ab.insert(a, 1, vec![1]);
        trie_ab.insert(b, 2, vec![2]);

        let mut trie_ba = MerkleTrie::new();
        trie_ba.insert(b, 2, vec![2]);
        trie_ba.insert(a, 1, vec![1]);

        assert_eq!(trie_ab.root_hash(), trie_ba.root_hash());
    }

    #[test]
    fn attach_then_detach_is_identity() {
        let mut trie = MerkleTrie::new();
        let initial_root = trie.root_hash();
        let key = k(b"round-trip");
        trie.insert(key, 1, vec![9]);
        trie.remove(&key);
        assert_eq!(trie.root_hash(), initial_root);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let mut trie = MerkleTrie::new();
        let key = k(b"before");
        trie.insert(key, 1, vec![1]);
        let snapshot = trie.snapshot();
        trie.insert(k(b"after"), 2, vec![2]);
        assert_ne!(trie.root_hash(), snapshot.root_hash());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn restore_undoes_mutations_since_the_snapshot() {
        let mut trie = MerkleTrie::new();
        trie.insert(k(b"a"), 1, vec![1]);
        let snapshot = trie.snapshot();
        trie.insert(k(b"b"), 2, vec![2]);
        trie.restore(&snapshot);
        assert_eq!(trie.root_hash(), snapshot.root_hash());
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn branch_validates_against_the_root_it_was_cut_from() {
        let mut trie = MerkleTrie::new();
        let keys: Vec<Key> = (0..8).map(|i| k(format!("key-{i}").as_bytes())).collect();
        for (i, key) in keys.iter().enumerate() {
            trie.insert(*key, i as i64, vec![i as u8]);
        }
        let root = trie.root_hash();
        for key in &keys {
            let branch = trie.branch(key).expect("key was inserted");
            assert!(branch.validate(root));
        }
    }

    #[test]
    fn branch_is_none_for_an_absent_key() {
        let mut trie = MerkleTrie::new();
        trie.insert(k(b"present"), 1, vec![]);
        assert!(trie.branch(&k(b"absent")).is_none());
    }

    #[test]
    fn branch_fails_validation_against_the_wrong_root() {
        let mut trie = MerkleTrie::new();
        let key = k(b"solo");
        trie.insert(key, 1, vec![1]);
        let branch = trie.branch(&key).unwrap();
        assert!(!branch.validate(Hash256::zero()));
    }

    #[test]
    fn len_tracks_insertions_and_removals() {
        let mut trie = MerkleTrie::new();
        let key = k(b"solo");
        trie.insert(key, 1, vec![]);
        assert_eq!(trie.len(), 1);
        trie.remove(&key);
        assert_eq!(trie.len(), 0);
        assert!(trie.is_empty());
    }
}

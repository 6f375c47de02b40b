// SPDX-License-Identifier: GPL-3.0

//! Trie node representation.
//!
//! Nodes are a tagged sum of three variants: leaves, branches with up to
//! sixteen children, and dummies. A dummy stands in for a child that has
//! been written to (or not yet read from) the backend; it carries only the
//! child's Merkle value. The serializer materializes dummies on demand and
//! collapses stored subtrees back into dummies to keep memory bounded.

use crate::{primitives::blake2_256, trie::nibbles::Nibbles};
use sp_core::H256;

/// The reference to a node embedded in its parent's encoding: the encoding
/// itself when shorter than 32 bytes, otherwise its BLAKE2b-256 hash.
///
/// This doubles as the node's key in the backend.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MerkleValue(Vec<u8>);

impl MerkleValue {
	/// Compute the Merkle value of a node encoding.
	pub fn from_encoding(encoding: &[u8]) -> Self {
		if encoding.len() < 32 {
			Self(encoding.to_vec())
		} else {
			Self(blake2_256(encoding).0.to_vec())
		}
	}

	/// A Merkle value known to be a hash.
	pub fn from_hash(hash: H256) -> Self {
		Self(hash.0.to_vec())
	}

	/// Wrap raw reference bytes read from a parent's encoding.
	pub fn from_raw(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	/// The raw bytes: an inline encoding or a 32-byte hash.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Whether this reference is a hash rather than an inline encoding.
	pub fn is_hash(&self) -> bool {
		self.0.len() == 32
	}

	/// The hash, when this reference is one.
	pub fn as_hash(&self) -> Option<H256> {
		self.is_hash().then(|| H256::from_slice(&self.0))
	}
}

impl From<MerkleValue> for Vec<u8> {
	fn from(value: MerkleValue) -> Self {
		value.0
	}
}

impl core::fmt::Debug for MerkleValue {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// A value stored in a node: inline bytes, or a hash referencing an
/// out-of-line value (state version V1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
	/// The value bytes, embedded in the node encoding.
	Inline(Vec<u8>),
	/// BLAKE2b-256 of the value; the value itself lives in the value column.
	Hashed(H256),
}

impl NodeValue {
	/// The inline bytes, when present.
	pub fn as_inline(&self) -> Option<&[u8]> {
		match self {
			NodeValue::Inline(bytes) => Some(bytes),
			NodeValue::Hashed(_) => None,
		}
	}
}

/// A leaf: a partial key and a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
	/// Nibbles between the parent and this node.
	pub partial_key: Nibbles,
	/// The stored value.
	pub value: NodeValue,
}

/// A branch: a partial key, up to sixteen children and an optional value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
	/// Nibbles between the parent and this node.
	pub partial_key: Nibbles,
	/// Children indexed by the next nibble after the partial key.
	pub children: [Option<Box<Node>>; 16],
	/// The value stored at the branch itself, if any.
	pub value: Option<NodeValue>,
}

impl Branch {
	/// A branch with the given partial key and no children or value.
	pub fn empty(partial_key: Nibbles) -> Self {
		Self { partial_key, children: Default::default(), value: None }
	}

	/// Number of present children.
	pub fn child_count(&self) -> usize {
		self.children.iter().filter(|child| child.is_some()).count()
	}

	/// Bitmap with bit `i` set when child `i` is present.
	pub fn children_bitmap(&self) -> u16 {
		let mut bitmap = 0u16;
		for (index, child) in self.children.iter().enumerate() {
			if child.is_some() {
				bitmap |= 1 << index;
			}
		}
		bitmap
	}
}

/// A placeholder for a stored, not-yet-loaded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dummy {
	/// The stored node's Merkle value.
	pub merkle_value: MerkleValue,
}

/// A trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	/// A leaf node.
	Leaf(Leaf),
	/// A branch node.
	Branch(Branch),
	/// A stored child known only by its Merkle value.
	Dummy(Dummy),
}

impl Node {
	/// Construct a leaf.
	pub fn leaf(partial_key: Nibbles, value: NodeValue) -> Self {
		Node::Leaf(Leaf { partial_key, value })
	}

	/// Whether this node is a dummy.
	pub fn is_dummy(&self) -> bool {
		matches!(self, Node::Dummy(_))
	}

	/// Whether this node is a branch.
	pub fn is_branch(&self) -> bool {
		matches!(self, Node::Branch(_))
	}

	/// The partial key of a transparent node; empty for dummies.
	pub fn partial_key(&self) -> &[u8] {
		match self {
			Node::Leaf(leaf) => &leaf.partial_key,
			Node::Branch(branch) => &branch.partial_key,
			Node::Dummy(_) => &[],
		}
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Merkle proof generation and verification.
//!
//! A [`StorageProof`] is the set of encoded trie nodes touched while
//! looking up a set of keys at a state root, plus any out-of-line values
//! met on the way. Every blob in the set is addressed by its BLAKE2b-256
//! hash, so a verifier holding only the root can replay the lookup:
//! nodes resolve hash by hash, and a tampered blob simply fails to
//! resolve.
//!
//! Inline child references carry their encoding inside the parent and
//! need no separate proof entry.
//!
//! # Example
//!
//! ```ignore
//! use haven_core::trie::proof::{generate_proof, verify_proof};
//!
//! let proof = generate_proof(storage.serializer(), root, &[b"balance"])?;
//! // Elsewhere, with only `root` and the proof:
//! assert!(verify_proof(root, &proof, b"balance", Some(b"100"))?);
//! ```
//!
//! Verification distinguishes *absence* from *insufficiency*: a key whose
//! lookup path is covered by the proof and ends nowhere reads as `None`,
//! while a path that dead-ends on a blob the proof does not contain is an
//! error.

use crate::{
	error::TrieError,
	primitives::blake2_256,
	trie::{
		codec,
		nibbles::Nibbles,
		node::{MerkleValue, Node, NodeValue},
		serializer::TrieSerializer,
		tree::{NodeLoader, Trie},
	},
};
use sp_core::H256;
use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

/// A set of encoded trie nodes and out-of-line values proving reads
/// against a state root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageProof {
	nodes: Vec<Vec<u8>>,
}

impl StorageProof {
	/// Build a proof from raw blobs, dropping duplicates but keeping the
	/// first-seen order.
	pub fn new(nodes: impl IntoIterator<Item = Vec<u8>>) -> Self {
		let mut seen = HashSet::new();
		let mut unique = Vec::new();
		for node in nodes {
			if seen.insert(blake2_256(&node)) {
				unique.push(node);
			}
		}
		Self { nodes: unique }
	}

	/// The proof blobs.
	pub fn iter_nodes(&self) -> impl Iterator<Item = &[u8]> {
		self.nodes.iter().map(Vec::as_slice)
	}

	/// Number of blobs in the proof.
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Whether the proof holds no blobs.
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// Consume the proof into its blobs.
	pub fn into_nodes(self) -> Vec<Vec<u8>> {
		self.nodes
	}

	fn index(&self) -> HashMap<H256, Vec<u8>> {
		self.nodes.iter().map(|node| (blake2_256(node), node.clone())).collect()
	}
}

/// Generate a proof for reading `keys` at `root`.
///
/// Records the encodings of all hash-referenced nodes on each key's
/// lookup path, and the payloads of hashed values the lookups end at.
/// Keys absent from the trie are covered too: their path up to the
/// divergence point is part of the proof.
pub fn generate_proof(
	serializer: &TrieSerializer,
	root: H256,
	keys: &[&[u8]],
) -> Result<StorageProof, TrieError> {
	if root == TrieSerializer::empty_root() {
		return Ok(StorageProof::default());
	}
	let root_encoding = match serializer.retrieve_encoding(&MerkleValue::from_hash(root)) {
		Ok(encoding) => encoding,
		Err(TrieError::NodeNotFound(_)) => return Err(TrieError::RootNotFound(root)),
		Err(error) => return Err(error),
	};

	let mut recorder = Recorder::default();
	recorder.record(root_encoding.clone());

	for key in keys {
		let nibbles = Nibbles::from_bytes(key);
		record_lookup(serializer, &mut recorder, &root_encoding, &nibbles)?;
	}
	Ok(StorageProof { nodes: recorder.nodes })
}

/// Read the value of `key` out of a proof, exactly as a lookup at `root`
/// would.
///
/// `Ok(None)` proves absence. An error means the proof does not cover the
/// key's path (or the root itself) and proves nothing either way.
pub fn read_proof_value(
	root: H256,
	proof: &StorageProof,
	key: &[u8],
) -> Result<Option<Vec<u8>>, TrieError> {
	if root == TrieSerializer::empty_root() {
		return Ok(None);
	}
	let blobs = proof.index();
	let root_encoding = blobs.get(&root).ok_or(TrieError::RootNotFound(root))?;
	let node = codec::decode_node(root_encoding)?;

	let loader: Arc<dyn NodeLoader> = Arc::new(ProofBlobs { blobs });
	Trie::from_root(node, loader).get(key)
}

/// Whether the proof shows `key` holding `expected` at `root` (`None`
/// asserts absence).
pub fn verify_proof(
	root: H256,
	proof: &StorageProof,
	key: &[u8],
	expected: Option<&[u8]>,
) -> Result<bool, TrieError> {
	Ok(read_proof_value(root, proof, key)?.as_deref() == expected)
}

#[derive(Default)]
struct Recorder {
	seen: HashSet<H256>,
	nodes: Vec<Vec<u8>>,
}

impl Recorder {
	fn record(&mut self, blob: Vec<u8>) {
		if self.seen.insert(blake2_256(&blob)) {
			self.nodes.push(blob);
		}
	}
}

/// Walk one key's lookup path, recording every hash-resolved blob.
fn record_lookup(
	serializer: &TrieSerializer,
	recorder: &mut Recorder,
	root_encoding: &[u8],
	key: &[u8],
) -> Result<(), TrieError> {
	let mut node = codec::decode_node(root_encoding)?;
	let mut rest = key;

	loop {
		match node {
			Node::Leaf(leaf) => {
				if leaf.partial_key.as_slice() == rest {
					record_value(serializer, recorder, &leaf.value)?;
				}
				return Ok(());
			},
			Node::Branch(mut branch) => {
				if !rest.starts_with(&branch.partial_key) {
					// Divergence: the recorded path proves absence.
					return Ok(());
				}
				let after = &rest[branch.partial_key.len()..];
				let Some((index, after)) = after.split_first() else {
					if let Some(value) = &branch.value {
						record_value(serializer, recorder, value)?;
					}
					return Ok(());
				};
				let Some(child) = branch.children[*index as usize].take() else {
					return Ok(());
				};
				let Node::Dummy(dummy) = *child else {
					// Decoded branches only hold dummy children.
					return Ok(());
				};
				if dummy.merkle_value.is_hash() {
					let encoding = serializer.retrieve_encoding(&dummy.merkle_value)?;
					recorder.record(encoding.clone());
					node = codec::decode_node(&encoding)?;
				} else {
					node = codec::decode_node(dummy.merkle_value.as_bytes())?;
				}
				rest = after;
			},
			Node::Dummy(_) => return Ok(()),
		}
	}
}

fn record_value(
	serializer: &TrieSerializer,
	recorder: &mut Recorder,
	value: &NodeValue,
) -> Result<(), TrieError> {
	if let NodeValue::Hashed(hash) = value {
		recorder.record(serializer.load_value(hash)?);
	}
	Ok(())
}

/// Node loader backed by the proof's blob set.
struct ProofBlobs {
	blobs: HashMap<H256, Vec<u8>>,
}

impl NodeLoader for ProofBlobs {
	fn load_node(&self, merkle_value: &MerkleValue) -> Result<Node, TrieError> {
		if !merkle_value.is_hash() {
			return Ok(codec::decode_node(merkle_value.as_bytes())?);
		}
		let blob = self
			.blobs
			.get(&H256::from_slice(merkle_value.as_bytes()))
			.ok_or_else(|| TrieError::NodeNotFound(merkle_value.as_bytes().to_vec()))?;
		Ok(codec::decode_node(blob)?)
	}

	fn load_value(&self, hash: &H256) -> Result<Vec<u8>, TrieError> {
		self.blobs.get(hash).cloned().ok_or(TrieError::ValueNotFound(*hash))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		database::{Database, MemoryDatabase, WriteBatch},
		trie::StateVersion,
	};

	fn committed(entries: &[(&[u8], &[u8])]) -> (TrieSerializer, H256) {
		let db = Arc::new(MemoryDatabase::new());
		let serializer = TrieSerializer::new(db.clone() as Arc<dyn Database>);
		let mut trie = Trie::new();
		for (key, value) in entries {
			trie.put(key, value.to_vec()).unwrap();
		}
		let mut batch = WriteBatch::new();
		let root = serializer.store_trie(&mut trie, StateVersion::V1, &mut batch).unwrap();
		db.commit(batch).unwrap();
		(serializer, root)
	}

	// Values long enough that sibling subtrees are hash-referenced, so a
	// proof for one key genuinely excludes the others.
	fn spread() -> Vec<(Vec<u8>, Vec<u8>)> {
		(0u8..8).map(|byte| (vec![byte << 4], vec![byte; 40])).collect()
	}

	#[test]
	fn proven_keys_read_back_and_verify() {
		let entries = spread();
		let borrowed: Vec<(&[u8], &[u8])> =
			entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
		let (serializer, root) = committed(&borrowed);

		let proof =
			generate_proof(&serializer, root, &[&entries[0].0, &entries[3].0]).unwrap();
		assert!(!proof.is_empty());

		assert_eq!(
			read_proof_value(root, &proof, &entries[0].0).unwrap(),
			Some(entries[0].1.clone()),
		);
		assert!(verify_proof(root, &proof, &entries[3].0, Some(&entries[3].1)).unwrap());
		assert!(!verify_proof(root, &proof, &entries[3].0, Some(b"other")).unwrap());
	}

	#[test]
	fn absence_is_provable() {
		let (serializer, root) = committed(&[(&[0x11][..], b"one"), (&[0x22][..], b"two")]);
		let absent = [0x11, 0x99];
		let proof = generate_proof(&serializer, root, &[&absent]).unwrap();

		assert_eq!(read_proof_value(root, &proof, &absent).unwrap(), None);
		assert!(verify_proof(root, &proof, &absent, None).unwrap());
	}

	#[test]
	fn unproven_keys_are_an_error_not_an_absence() {
		let entries = spread();
		let borrowed: Vec<(&[u8], &[u8])> =
			entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
		let (serializer, root) = committed(&borrowed);

		let proof = generate_proof(&serializer, root, &[&entries[0].0]).unwrap();
		assert!(matches!(
			read_proof_value(root, &proof, &entries[5].0),
			Err(TrieError::NodeNotFound(_)),
		));
	}

	#[test]
	fn wrong_root_is_rejected() {
		let (serializer, root) = committed(&[(&[0x01][..], b"v")]);
		let proof = generate_proof(&serializer, root, &[&[0x01]]).unwrap();
		assert!(matches!(
			read_proof_value(H256::repeat_byte(0x99), &proof, &[0x01]),
			Err(TrieError::RootNotFound(_)),
		));
	}

	#[test]
	fn hashed_values_travel_with_the_proof() {
		let big = vec![0xcd; 200];
		let (serializer, root) = committed(&[(&[0x01][..], big.as_slice())]);
		let proof = generate_proof(&serializer, root, &[&[0x01]]).unwrap();

		// The value blob itself is part of the proof.
		assert!(proof.iter_nodes().any(|blob| blob == big.as_slice()));
		assert_eq!(read_proof_value(root, &proof, &[0x01]).unwrap(), Some(big));
	}

	#[test]
	fn empty_root_needs_no_proof() {
		let proof = StorageProof::default();
		assert_eq!(
			read_proof_value(TrieSerializer::empty_root(), &proof, b"any").unwrap(),
			None,
		);
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Reference-counted trie pruner.
//!
//! Every registered state contributes one reference to each node reachable
//! from its root. Registering a new state increments counts top-down,
//! stopping at subtrees that are already counted; pruning a state mirrors
//! the walk with decrements and deletes nodes whose count reaches zero in
//! the same atomic batch that persists the pruner's own metadata.
//!
//! Counts key on the node's database key: the Merkle value for inner
//! nodes, the hash for roots. The map survives restarts in the
//! `trie_pruner` column.

use crate::{
	blockchain::BlockTree,
	database::{Cursor as _, Database, Space, WriteBatch},
	error::{PrunerError, TrieError},
	primitives::BlockInfo,
	trie::{
		node::{MerkleValue, Node},
		serializer::TrieSerializer,
	},
};
use parking_lot::RwLock;
use scale::{Decode, Encode};
use sp_core::H256;
use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

/// Key of the persisted pruner record.
const PRUNER_INFO_KEY: &[u8] = b"trie_pruner_info";

/// Prefix of persisted refcount entries, ahead of the node key.
const REFCOUNT_PREFIX: &[u8] = b"rc:";

/// Persisted pruner metadata.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct PrunerInfo {
	/// The last block whose state was pruned.
	last_pruned: Option<BlockInfo>,
	/// Number of finalized blocks behind the head whose states are kept.
	depth: u32,
}

/// Pruner policy.
#[derive(Debug, Clone, Copy)]
pub struct PrunerConfig {
	/// Number of finalized blocks behind the head to retain.
	pub depth: u32,
	/// Also reclaim the states of discarded forks.
	pub thorough: bool,
}

impl Default for PrunerConfig {
	fn default() -> Self {
		Self { depth: 256, thorough: false }
	}
}

#[derive(Default)]
struct PrunerState {
	ref_count: HashMap<Vec<u8>, u32>,
	last_pruned: Option<BlockInfo>,
}

/// Reference-counting pruner over the trie node column.
pub struct TriePruner {
	db: Arc<dyn Database>,
	serializer: TrieSerializer,
	config: PrunerConfig,
	/// Mutations take the write lock for their whole duration, so at most
	/// one add/prune operation runs at a time.
	state: RwLock<PrunerState>,
}

impl TriePruner {
	/// Open the pruner, loading persisted refcounts and metadata.
	///
	/// Fails with [`PrunerError::CreatePrunerOnNonPrunedNonEmptyStorage`]
	/// when the database already holds blocks but no pruner record.
	pub fn open(
		db: Arc<dyn Database>,
		serializer: TrieSerializer,
		config: PrunerConfig,
	) -> Result<Self, PrunerError> {
		let mut state = PrunerState::default();

		match db.try_get(Space::TriePruner, PRUNER_INFO_KEY)? {
			Some(encoded) => {
				let info = PrunerInfo::decode(&mut encoded.as_slice())
					.map_err(|_| PrunerError::OutdatedPruneBase)?;
				state.last_pruned = info.last_pruned;
			},
			None => {
				let first_block_key = 1u32.to_be_bytes();
				if db.contains(Space::LookupKey, &first_block_key)? {
					return Err(PrunerError::CreatePrunerOnNonPrunedNonEmptyStorage);
				}
			},
		}

		// Load the persisted refcount snapshot.
		let mut cursor = db.cursor(Space::TriePruner)?;
		let mut valid = cursor.seek_lower_bound(REFCOUNT_PREFIX);
		while valid {
			let Some(key) = cursor.key() else { break };
			if !key.starts_with(REFCOUNT_PREFIX) {
				break;
			}
			if let Some(value) = cursor.value() {
				if let Ok(count) = u32::decode(&mut &value[..]) {
					state.ref_count.insert(key[REFCOUNT_PREFIX.len()..].to_vec(), count);
				}
			}
			valid = cursor.next();
		}

		Ok(Self { db, serializer, config, state: RwLock::new(state) })
	}

	/// The pruner policy.
	pub fn config(&self) -> PrunerConfig {
		self.config
	}

	/// The last block whose state was pruned, if any.
	pub fn last_pruned(&self) -> Option<BlockInfo> {
		self.state.read().last_pruned
	}

	/// The current reference count of a node, by its database key.
	pub fn ref_count(&self, merkle_value: &MerkleValue) -> u32 {
		self.state.read().ref_count.get(merkle_value.as_bytes()).copied().unwrap_or(0)
	}

	/// Number of tracked nodes.
	pub fn tracked_nodes(&self) -> usize {
		self.state.read().ref_count.len()
	}

	/// Sum of all reference counts.
	pub fn total_references(&self) -> u64 {
		self.state.read().ref_count.values().map(|count| *count as u64).sum()
	}

	/// Register the state rooted at `state_root`: every reachable node
	/// gains one reference. Subtrees whose top was already counted are not
	/// descended into again.
	pub fn add_new_state(&self, state_root: H256) -> Result<(), PrunerError> {
		if state_root == TrieSerializer::empty_root() {
			return Ok(());
		}
		let mut state = self.state.write();

		let mut staged: HashMap<Vec<u8>, u32> = HashMap::new();
		let mut queue = vec![state_root.as_bytes().to_vec()];
		let mut referenced = 0usize;

		while let Some(key) = queue.pop() {
			let count = staged
				.get(&key)
				.or_else(|| state.ref_count.get(&key))
				.copied()
				.unwrap_or(0) + 1;
			staged.insert(key.clone(), count);
			referenced += 1;

			if count == 1 {
				// First reference: the subtree below is new as well.
				let node = self.serializer.retrieve_node(&MerkleValue::from_raw(key))?;
				push_children(&node, &mut queue);
			}
		}

		let mut batch = WriteBatch::new();
		for (key, count) in &staged {
			batch.put(Space::TriePruner, refcount_key(key), count.encode());
		}
		self.db.commit(batch)?;

		state.ref_count.extend(staged);
		log::debug!(
			"Registered state {state_root:?}: {referenced} nodes referenced, \
			 {} tracked in total",
			state.ref_count.len(),
		);
		Ok(())
	}

	/// Prune the state of a finalized block: decrement every reachable
	/// node, delete the ones reaching zero and advance the persisted
	/// last-pruned record — all in one atomic batch.
	pub fn prune_finalized(
		&self,
		state_root: H256,
		block: BlockInfo,
	) -> Result<(), PrunerError> {
		self.prune_state(state_root, Some(block))
	}

	/// Prune the state of a block discarded with its fork. A no-op unless
	/// thorough pruning is enabled.
	pub fn prune_discarded(
		&self,
		state_root: H256,
		block: BlockInfo,
	) -> Result<(), PrunerError> {
		if !self.config.thorough {
			log::trace!("Skipping discarded state of {block}: thorough pruning is off");
			return Ok(());
		}
		self.prune_state(state_root, None)
	}

	/// Restore pruner state on startup.
	///
	/// With no persisted record over a non-empty chain, the current
	/// finalized state is registered so that future prunes balance out;
	/// over a fresh chain the genesis state is registered. With a record,
	/// pruning resumes from it.
	pub fn recover_state(&self, block_tree: &BlockTree) -> Result<(), PrunerError> {
		let last_pruned = self.last_pruned();
		let finalized = block_tree.last_finalized();

		match last_pruned {
			None => {
				let header = block_tree.header(&finalized.hash)?.ok_or(
					PrunerError::BlockTree(crate::error::BlockTreeError::HeaderNotFound(
						finalized.hash,
					)),
				)?;
				if block_tree.deepest_leaf().number != 0 {
					log::warn!(
						"Running the pruner on a non-empty non-pruned storage may \
						 skip some stored states",
					);
				}
				self.add_new_state(header.state_root)?;
			},
			Some(base) => {
				if finalized.number < base.number {
					return Err(PrunerError::OutdatedPruneBase);
				}
			},
		}
		Ok(())
	}

	fn prune_state(
		&self,
		state_root: H256,
		advance_to: Option<BlockInfo>,
	) -> Result<(), PrunerError> {
		if state_root == TrieSerializer::empty_root() {
			if let Some(block) = advance_to {
				self.persist_last_pruned(block)?;
			}
			return Ok(());
		}
		let mut state = self.state.write();

		let mut staged: HashMap<Vec<u8>, u32> = HashMap::new();
		let mut removals: HashSet<Vec<u8>> = HashSet::new();
		let mut queue = vec![state_root.as_bytes().to_vec()];
		let mut removed = 0usize;
		let mut unknown = 0usize;

		while let Some(key) = queue.pop() {
			let current = match staged.get(&key).or_else(|| state.ref_count.get(&key)) {
				Some(count) => *count,
				None => {
					// The same Merkle value can reach zero through multiple
					// paths; a missing entry means an earlier path already
					// collapsed it.
					unknown += 1;
					continue;
				},
			};
			if current == 0 {
				unknown += 1;
				continue;
			}
			let count = current - 1;
			staged.insert(key.clone(), count);

			if count == 0 {
				removed += 1;
				removals.insert(key.clone());
				match self.serializer.retrieve_node(&MerkleValue::from_raw(key)) {
					Ok(node) => push_children(&node, &mut queue),
					Err(TrieError::NodeNotFound(missing)) => {
						// Already deleted through another state's prune.
						log::debug!(
							"Node 0x{} missing during prune walk",
							hex::encode(&missing),
						);
						unknown += 1;
					},
					Err(error) => return Err(error.into()),
				}
			}
		}

		let mut batch = WriteBatch::new();
		for (key, count) in &staged {
			if removals.contains(key) {
				batch.remove(Space::TrieNode, key.clone());
				batch.remove(Space::TriePruner, refcount_key(key));
			} else {
				batch.put(Space::TriePruner, refcount_key(key), count.encode());
			}
		}
		if let Some(block) = advance_to {
			let info = PrunerInfo { last_pruned: Some(block), depth: self.config.depth };
			batch.put(Space::TriePruner, PRUNER_INFO_KEY.to_vec(), info.encode());
		}
		// A failed commit leaves the in-memory counts untouched; the caller
		// may retry the whole prune.
		self.db.commit(batch)?;

		for (key, count) in staged {
			if count == 0 {
				state.ref_count.remove(&key);
			} else {
				state.ref_count.insert(key, count);
			}
		}
		if let Some(block) = advance_to {
			state.last_pruned = Some(block);
		}

		log::debug!("Pruned state {state_root:?}: removed {removed} nodes, {unknown} unknown");
		Ok(())
	}

	fn persist_last_pruned(&self, block: BlockInfo) -> Result<(), PrunerError> {
		let mut state = self.state.write();
		let info = PrunerInfo { last_pruned: Some(block), depth: self.config.depth };
		self.db.put(Space::TriePruner, PRUNER_INFO_KEY, &info.encode())?;
		state.last_pruned = Some(block);
		Ok(())
	}
}

fn refcount_key(node_key: &[u8]) -> Vec<u8> {
	let mut key = REFCOUNT_PREFIX.to_vec();
	key.extend_from_slice(node_key);
	key
}

fn push_children(node: &Node, queue: &mut Vec<Vec<u8>>) {
	if let Node::Branch(branch) = node {
		for child in branch.children.iter().flatten() {
			if let Node::Dummy(dummy) = child.as_ref() {
				queue.push(dummy.merkle_value.as_bytes().to_vec());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		database::MemoryDatabase,
		trie::{StateVersion, tree::Trie},
	};

	fn setup() -> (Arc<MemoryDatabase>, TrieSerializer, TriePruner) {
		let db = Arc::new(MemoryDatabase::new());
		let serializer = TrieSerializer::new(db.clone() as Arc<dyn Database>);
		let pruner = TriePruner::open(
			db.clone() as Arc<dyn Database>,
			serializer.clone(),
			PrunerConfig::default(),
		)
		.unwrap();
		(db, serializer, pruner)
	}

	fn commit_trie(
		db: &Arc<MemoryDatabase>,
		serializer: &TrieSerializer,
		entries: &[(&[u8], &[u8])],
	) -> H256 {
		let mut trie = Trie::new();
		for (key, value) in entries {
			trie.put(key, value.to_vec()).unwrap();
		}
		let mut batch = WriteBatch::new();
		let root = serializer.store_trie(&mut trie, StateVersion::V1, &mut batch).unwrap();
		db.commit(batch).unwrap();
		root
	}

	#[test]
	fn add_then_prune_returns_to_empty() {
		let (db, serializer, pruner) = setup();
		let root = commit_trie(&db, &serializer, &[(b"a", b"1"), (b"b", b"2")]);

		pruner.add_new_state(root).unwrap();
		assert!(pruner.tracked_nodes() > 0);

		pruner
			.prune_finalized(root, BlockInfo::new(1, H256::repeat_byte(1)))
			.unwrap();
		assert_eq!(pruner.tracked_nodes(), 0);
		assert_eq!(db.space_len(Space::TrieNode), 0);
		assert_eq!(pruner.last_pruned(), Some(BlockInfo::new(1, H256::repeat_byte(1))));
	}

	#[test]
	fn shared_nodes_survive_pruning_one_state() {
		let (db, serializer, pruner) = setup();
		// Two states sharing a subtree: the second adds a key under a
		// different top-level branch, leaving the `0x10..` subtree intact.
		let root_a = commit_trie(
			&db,
			&serializer,
			&[(&[0x10, 0x01][..], b"a"), (&[0x10, 0x02][..], b"b")],
		);
		let root_b = commit_trie(
			&db,
			&serializer,
			&[(&[0x10, 0x01][..], b"a"), (&[0x10, 0x02][..], b"b"), (&[0x20][..], b"c")],
		);

		pruner.add_new_state(root_a).unwrap();
		let after_a = pruner.tracked_nodes();
		pruner.add_new_state(root_b).unwrap();
		assert!(pruner.tracked_nodes() > after_a);

		pruner
			.prune_finalized(root_a, BlockInfo::new(1, H256::repeat_byte(1)))
			.unwrap();

		// State B must remain fully readable.
		let mut trie = serializer.retrieve_trie(root_b).unwrap();
		assert_eq!(trie.get(&[0x10, 0x01]).unwrap(), Some(b"a".to_vec()));
		assert_eq!(trie.get(&[0x10, 0x02]).unwrap(), Some(b"b".to_vec()));
		assert_eq!(trie.get(&[0x20]).unwrap(), Some(b"c".to_vec()));

		pruner
			.prune_finalized(root_b, BlockInfo::new(2, H256::repeat_byte(2)))
			.unwrap();
		assert_eq!(pruner.tracked_nodes(), 0);
		assert_eq!(db.space_len(Space::TrieNode), 0);
	}

	#[test]
	fn refcounts_survive_restart() {
		let db = Arc::new(MemoryDatabase::new());
		let serializer = TrieSerializer::new(db.clone() as Arc<dyn Database>);
		let root = commit_trie(&db, &serializer, &[(b"key", b"value")]);

		{
			let pruner = TriePruner::open(
				db.clone() as Arc<dyn Database>,
				serializer.clone(),
				PrunerConfig::default(),
			)
			.unwrap();
			pruner.add_new_state(root).unwrap();
			pruner
				.prune_finalized(root, BlockInfo::new(1, H256::repeat_byte(1)))
				.unwrap();
			pruner.add_new_state(root).unwrap();
			assert_eq!(pruner.tracked_nodes(), 1);
		}

		// Re-opened pruner sees the persisted counts and record.
		let reopened = TriePruner::open(
			db.clone() as Arc<dyn Database>,
			serializer,
			PrunerConfig::default(),
		)
		.unwrap();
		assert_eq!(reopened.tracked_nodes(), 1);
		assert_eq!(reopened.last_pruned(), Some(BlockInfo::new(1, H256::repeat_byte(1))));
	}

	#[test]
	fn double_prune_is_tolerated() {
		let (db, serializer, pruner) = setup();
		let root = commit_trie(&db, &serializer, &[(b"a", b"1")]);
		pruner.add_new_state(root).unwrap();
		pruner
			.prune_finalized(root, BlockInfo::new(1, H256::repeat_byte(1)))
			.unwrap();
		// Pruning an already-pruned state succeeds and changes nothing.
		pruner
			.prune_finalized(root, BlockInfo::new(2, H256::repeat_byte(2)))
			.unwrap();
		assert_eq!(pruner.tracked_nodes(), 0);
	}

	#[test]
	fn discarded_states_are_skipped_without_thorough_pruning() {
		let (db, serializer, pruner) = setup();
		let root = commit_trie(&db, &serializer, &[(b"a", b"1")]);
		pruner.add_new_state(root).unwrap();

		pruner.prune_discarded(root, BlockInfo::new(5, H256::repeat_byte(5))).unwrap();
		assert!(pruner.tracked_nodes() > 0);

		// With thorough pruning on, the same call reclaims the state.
		let thorough = TriePruner::open(
			db.clone() as Arc<dyn Database>,
			serializer,
			PrunerConfig { thorough: true, ..PrunerConfig::default() },
		)
		.unwrap();
		thorough.prune_discarded(root, BlockInfo::new(5, H256::repeat_byte(5))).unwrap();
		assert_eq!(thorough.tracked_nodes(), 0);
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Runtime-code upgrade tracker.
//!
//! Maps any block to the state root at which the runtime code was last
//! changed, so runtime instances can be cached per code version instead of
//! per block. The tracker watches imported headers: a
//! `RuntimeEnvironmentUpdated` digest marks the block as carrying a code
//! change, and the `(block, state_root)` pair joins a vector kept sorted
//! by block number and persisted in the default column.

use crate::{
	blockchain::BlockTree,
	database::{Database, Space},
	primitives::{BlockHeader, BlockInfo, Hash},
};
use parking_lot::RwLock;
use scale::{Decode, Encode};
use std::sync::Arc;

/// Key of the persisted upgrade list in the default column.
const RUNTIME_HASHES_KEY: &[u8] = b":runtime_hashes_lookup";

/// Tracks blocks that changed the runtime code.
pub struct RuntimeUpgradeTracker {
	db: Arc<dyn Database>,
	block_tree: Arc<BlockTree>,
	genesis_state_root: Hash,
	/// Sorted by block number. Insertions in the middle are possible but
	/// rare, since upgrades are observed roughly in import order.
	upgrades: RwLock<Vec<(BlockInfo, Hash)>>,
}

impl RuntimeUpgradeTracker {
	/// Create a tracker, loading any persisted upgrade list.
	pub fn new(db: Arc<dyn Database>, block_tree: Arc<BlockTree>, genesis_state_root: Hash) -> Self {
		let upgrades = db
			.try_get(Space::Default, RUNTIME_HASHES_KEY)
			.ok()
			.flatten()
			.and_then(|encoded| Vec::<(BlockInfo, Hash)>::decode(&mut encoded.as_slice()).ok())
			.unwrap_or_default();
		Self { db, block_tree, genesis_state_root, upgrades: RwLock::new(upgrades) }
	}

	/// Number of recorded upgrades.
	pub fn len(&self) -> usize {
		self.upgrades.read().len()
	}

	/// Whether no upgrade has been recorded yet.
	pub fn is_empty(&self) -> bool {
		self.upgrades.read().is_empty()
	}

	/// Observe an imported header; records the block when its digest marks
	/// a runtime environment change.
	pub fn on_block_imported(&self, header: &BlockHeader) {
		if !header.digest.runtime_environment_updated() {
			return;
		}
		self.record(header.block_info(), header.state_root);
	}

	/// Record a code change at `block`, whose state holds the new code.
	pub fn record(&self, block: BlockInfo, state_root: Hash) {
		let mut upgrades = self.upgrades.write();
		if upgrades.iter().any(|(known, _)| known.hash == block.hash) {
			return;
		}
		let position = upgrades.partition_point(|(known, _)| known.number <= block.number);
		upgrades.insert(position, (block, state_root));
		log::debug!("Runtime code change recorded at {block}");

		if let Err(error) =
			self.db.put(Space::Default, RUNTIME_HASHES_KEY, &upgrades.encode())
		{
			log::warn!("Failed to persist the runtime upgrade list: {error}");
		}
	}

	/// The state root holding the runtime code that `block` runs with:
	/// the root recorded at the closest upgrade at or below `block` that is
	/// an ancestor of it. Falls back to the genesis state root.
	pub fn last_code_update_state(&self, block: &BlockInfo) -> Hash {
		let upgrades = self.upgrades.read();
		for (upgrade, state_root) in upgrades.iter().rev() {
			if upgrade.number > block.number {
				continue;
			}
			if self.is_ancestor(upgrade, block) {
				return *state_root;
			}
		}
		self.genesis_state_root
	}

	/// Ancestry through the block tree; blocks below the in-memory graph
	/// resolve through the canonical finalized lookup.
	fn is_ancestor(&self, ancestor: &BlockInfo, descendant: &BlockInfo) -> bool {
		if ancestor.hash == descendant.hash {
			return true;
		}
		if self.block_tree.is_ancestor(&ancestor.hash, &descendant.hash) {
			return true;
		}
		if ancestor.number <= self.block_tree.last_finalized().number {
			return self
				.block_tree
				.number_to_hash(ancestor.number)
				.ok()
				.flatten()
				.is_some_and(|canonical| canonical == ancestor.hash);
		}
		false
	}
}

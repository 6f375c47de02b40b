// SPDX-License-Identifier: GPL-3.0

//! Fork-aware block tree.
//!
//! The tree holds every known header from the last finalized block up to
//! the fork tips. Adding a block requires its parent to be present;
//! finalizing a block prunes every fork that does not descend from it and
//! advances the last-finalized pointer, which never moves backwards.
//!
//! Headers, bodies, justifications and the canonical number→hash lookup
//! are persisted through the backend as the tree changes.
//!
//! A block's lifecycle: unknown → in-chain (`add_block`) → finalized
//! (`finalize`); a finalized block never leaves that state.

use crate::{
	database::{Database, Space, WriteBatch},
	error::BlockTreeError,
	primitives::{BlockBody, BlockHeader, BlockInfo, BlockNumber, Hash, Justification},
};
use parking_lot::RwLock;
use scale::{Decode, Encode};
use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

struct BlockEntry {
	header: BlockHeader,
	body: Option<BlockBody>,
	children: Vec<Hash>,
	finalized: bool,
}

struct TreeInner {
	blocks: HashMap<Hash, BlockEntry>,
	leaves: HashSet<Hash>,
	finalized: BlockInfo,
}

/// The in-memory header graph rooted at the last finalized block.
///
/// Reads may run concurrently; `add_block` and `finalize` take the write
/// lock.
pub struct BlockTree {
	db: Arc<dyn Database>,
	inner: RwLock<TreeInner>,
}

impl BlockTree {
	/// Create a tree rooted at an already-finalized block (usually
	/// genesis). The root header is persisted immediately.
	pub fn create(db: Arc<dyn Database>, root: BlockHeader) -> Result<Self, BlockTreeError> {
		let info = root.block_info();

		let mut batch = WriteBatch::new();
		batch.put(Space::Header, info.hash.as_bytes().to_vec(), root.encode());
		batch.put(Space::LookupKey, info.number.to_be_bytes().to_vec(), info.hash.as_bytes().to_vec());
		db.commit(batch)?;

		let mut blocks = HashMap::new();
		blocks.insert(
			info.hash,
			BlockEntry { header: root, body: None, children: Vec::new(), finalized: true },
		);
		let mut leaves = HashSet::new();
		leaves.insert(info.hash);

		Ok(Self { db, inner: RwLock::new(TreeInner { blocks, leaves, finalized: info }) })
	}

	/// The last finalized block.
	pub fn last_finalized(&self) -> BlockInfo {
		self.inner.read().finalized
	}

	/// All current fork tips.
	pub fn leaves(&self) -> Vec<Hash> {
		self.inner.read().leaves.iter().copied().collect()
	}

	/// The deepest fork tip; ties break towards the lowest hash.
	pub fn deepest_leaf(&self) -> BlockInfo {
		let inner = self.inner.read();
		let mut best = inner.finalized;
		for leaf in &inner.leaves {
			if let Some(entry) = inner.blocks.get(leaf) {
				let number = entry.header.number;
				if number > best.number || (number == best.number && *leaf < best.hash) {
					best = BlockInfo::new(number, *leaf);
				}
			}
		}
		best
	}

	/// Direct children of a block.
	pub fn children(&self, hash: &Hash) -> Result<Vec<Hash>, BlockTreeError> {
		let inner = self.inner.read();
		let entry = inner.blocks.get(hash).ok_or(BlockTreeError::BlockNotFound(*hash))?;
		Ok(entry.children.clone())
	}

	/// The header of a block, from memory or the backend.
	pub fn header(&self, hash: &Hash) -> Result<Option<BlockHeader>, BlockTreeError> {
		if let Some(entry) = self.inner.read().blocks.get(hash) {
			return Ok(Some(entry.header.clone()));
		}
		match self.db.try_get(Space::Header, hash.as_bytes())? {
			Some(encoded) => {
				let header = BlockHeader::decode(&mut encoded.as_slice())
					.map_err(|error| BlockTreeError::Corrupted(error.to_string()))?;
				Ok(Some(header))
			},
			None => Ok(None),
		}
	}

	/// The body of a block, from memory or the backend.
	pub fn block_body(&self, hash: &Hash) -> Result<Option<BlockBody>, BlockTreeError> {
		if let Some(entry) = self.inner.read().blocks.get(hash) {
			if entry.body.is_some() {
				return Ok(entry.body.clone());
			}
		}
		match self.db.try_get(Space::BlockBody, hash.as_bytes())? {
			Some(encoded) => {
				let body = BlockBody::decode(&mut encoded.as_slice())
					.map_err(|error| BlockTreeError::Corrupted(error.to_string()))?;
				Ok(Some(body))
			},
			None => Ok(None),
		}
	}

	/// The justification stored for a finalized block.
	pub fn justification(&self, hash: &Hash) -> Result<Option<Justification>, BlockTreeError> {
		match self.db.try_get(Space::Justification, hash.as_bytes())? {
			Some(encoded) => {
				let justification = Justification::decode(&mut encoded.as_slice())
					.map_err(|error| BlockTreeError::Corrupted(error.to_string()))?;
				Ok(Some(justification))
			},
			None => Ok(None),
		}
	}

	/// The canonical block hash at a finalized height.
	pub fn number_to_hash(&self, number: BlockNumber) -> Result<Option<Hash>, BlockTreeError> {
		match self.db.try_get(Space::LookupKey, &number.to_be_bytes())? {
			Some(bytes) if bytes.len() == 32 => Ok(Some(Hash::from_slice(&bytes))),
			Some(_) => Err(BlockTreeError::Corrupted("lookup key is not a hash".into())),
			None => Ok(None),
		}
	}

	/// The number of a known block.
	pub fn hash_to_number(&self, hash: &Hash) -> Result<Option<BlockNumber>, BlockTreeError> {
		Ok(self.header(hash)?.map(|header| header.number))
	}

	/// The canonical header at a finalized height.
	pub fn header_by_number(
		&self,
		number: BlockNumber,
	) -> Result<Option<BlockHeader>, BlockTreeError> {
		match self.number_to_hash(number)? {
			Some(hash) => self.header(&hash),
			None => Ok(None),
		}
	}

	/// Whether `ancestor` is an ancestor of (or equal to) `descendant`,
	/// within the in-memory tree.
	pub fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> bool {
		let inner = self.inner.read();
		let mut current = *descendant;
		loop {
			if current == *ancestor {
				return true;
			}
			match inner.blocks.get(&current) {
				Some(entry) if current != inner.finalized.hash => {
					current = entry.header.parent_hash;
				},
				_ => return false,
			}
		}
	}

	/// Add a block to the tree. The parent must already be present.
	pub fn add_block(
		&self,
		header: BlockHeader,
		body: Option<BlockBody>,
	) -> Result<BlockInfo, BlockTreeError> {
		let info = header.block_info();
		let parent_hash = header.parent_hash;

		let mut inner = self.inner.write();
		if inner.blocks.contains_key(&info.hash) {
			// Re-adding a known block is idempotent.
			return Ok(info);
		}
		if !inner.blocks.contains_key(&parent_hash) {
			return Err(BlockTreeError::NoParent(parent_hash));
		}

		let mut batch = WriteBatch::new();
		batch.put(Space::Header, info.hash.as_bytes().to_vec(), header.encode());
		if let Some(body) = &body {
			batch.put(Space::BlockBody, info.hash.as_bytes().to_vec(), body.encode());
		}
		self.db.commit(batch)?;

		inner.blocks.insert(
			info.hash,
			BlockEntry { header, body, children: Vec::new(), finalized: false },
		);
		if let Some(parent) = inner.blocks.get_mut(&parent_hash) {
			parent.children.push(info.hash);
		}
		inner.leaves.remove(&parent_hash);
		inner.leaves.insert(info.hash);

		Ok(info)
	}

	/// Finalize a block: it must descend from the current finalized block.
	///
	/// Every fork that does not pass through the block is removed; the
	/// headers of the discarded blocks are returned so their states can be
	/// released by the pruner. Finalizing the currently finalized block
	/// again is a no-op.
	pub fn finalize(
		&self,
		hash: &Hash,
		justification: Option<Justification>,
	) -> Result<Vec<BlockHeader>, BlockTreeError> {
		let mut inner = self.inner.write();
		if *hash == inner.finalized.hash {
			return Ok(Vec::new());
		}
		let entry = inner.blocks.get(hash).ok_or(BlockTreeError::BlockNotFound(*hash))?;
		let target = BlockInfo::new(entry.header.number, *hash);

		// Walk back to the currently finalized block to prove descent.
		let mut path = vec![*hash];
		let mut current = entry.header.parent_hash;
		loop {
			if current == inner.finalized.hash {
				break;
			}
			match inner.blocks.get(&current) {
				Some(entry) => {
					path.push(current);
					current = entry.header.parent_hash;
				},
				None => return Err(BlockTreeError::NotDescendantOfFinalized(*hash)),
			}
		}
		path.reverse();

		// Discard every branch that leaves the finalized path.
		let retained: HashSet<Hash> =
			path.iter().copied().chain(std::iter::once(inner.finalized.hash)).collect();
		let mut discarded = Vec::new();
		let mut stale_roots = Vec::new();
		for on_path in retained.iter() {
			if let Some(entry) = inner.blocks.get(on_path) {
				// Children of the new finalized block stay; everything
				// branching off below it goes.
				if *on_path == target.hash {
					continue;
				}
				for child in &entry.children {
					if !retained.contains(child) {
						stale_roots.push(*child);
					}
				}
			}
		}
		for stale in stale_roots {
			remove_subtree(&mut inner, &stale, &mut discarded);
		}

		let mut batch = WriteBatch::new();
		for hash in &path {
			if let Some(entry) = inner.blocks.get_mut(hash) {
				entry.finalized = true;
				batch.put(
					Space::LookupKey,
					entry.header.number.to_be_bytes().to_vec(),
					hash.as_bytes().to_vec(),
				);
			}
		}
		if let Some(justification) = &justification {
			batch.put(Space::Justification, target.hash.as_bytes().to_vec(), justification.encode());
		}
		self.db.commit(batch)?;

		// Blocks below the new finalized block stay readable through the
		// backend but leave the in-memory graph.
		let old_finalized = inner.finalized.hash;
		let mut current = old_finalized;
		while current != target.hash {
			let next = inner
				.blocks
				.get(&current)
				.and_then(|entry| {
					entry.children.iter().find(|child| retained.contains(*child)).copied()
				});
			inner.blocks.remove(&current);
			inner.leaves.remove(&current);
			match next {
				Some(next) => current = next,
				None => break,
			}
		}

		inner.finalized = target;
		if inner.blocks.get(&target.hash).is_some_and(|entry| entry.children.is_empty()) {
			inner.leaves.insert(target.hash);
		}

		log::debug!(
			"Finalized {target}; {} fork blocks discarded, {} leaves remain",
			discarded.len(),
			inner.leaves.len(),
		);
		Ok(discarded)
	}

	/// The tip of the longest chain passing through `hash` whose number
	/// does not exceed `max_number`. Ties break towards the lowest hash.
	pub fn best_containing(
		&self,
		hash: &Hash,
		max_number: Option<BlockNumber>,
	) -> Result<BlockInfo, BlockTreeError> {
		let inner = self.inner.read();
		let entry = inner.blocks.get(hash).ok_or(BlockTreeError::BlockNotFound(*hash))?;
		if let Some(max) = max_number {
			if entry.header.number > max {
				return Err(BlockTreeError::TargetIsPastMax {
					target: entry.header.number,
					max,
				});
			}
		}

		let mut best = BlockInfo::new(entry.header.number, *hash);
		let mut queue = vec![*hash];
		while let Some(current) = queue.pop() {
			let Some(entry) = inner.blocks.get(&current) else { continue };
			let number = entry.header.number;
			if max_number.is_none_or(|max| number <= max) {
				if number > best.number || (number == best.number && current < best.hash) {
					best = BlockInfo::new(number, current);
				}
				queue.extend(entry.children.iter().copied());
			}
		}
		Ok(best)
	}

	/// Up to `length` block hashes along the chain containing `hash`.
	///
	/// Descending walks towards parents; ascending follows the chain
	/// towards the deepest descendant of `hash`. The result starts at
	/// `hash` itself.
	pub fn chain_by_block(
		&self,
		hash: &Hash,
		ascending: bool,
		length: usize,
	) -> Result<Vec<Hash>, BlockTreeError> {
		let inner = self.inner.read();
		if !inner.blocks.contains_key(hash) {
			return Err(BlockTreeError::BlockNotFound(*hash));
		}

		let mut chain = Vec::with_capacity(length.min(16));
		let mut current = *hash;
		while chain.len() < length {
			chain.push(current);
			if !ascending {
				if current == inner.finalized.hash {
					break;
				}
				match inner.blocks.get(&current) {
					Some(entry) => current = entry.header.parent_hash,
					None => break,
				}
			} else {
				// Follow the deepest child; ties towards the lowest hash.
				let next = inner.blocks.get(&current).and_then(|entry| {
					entry
						.children
						.iter()
						.filter_map(|child| {
							inner.blocks.get(child).map(|e| (e.header.number, *child))
						})
						.max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
						.map(|(_, child)| child)
				});
				match next {
					Some(next) => current = next,
					None => break,
				}
			}
		}
		Ok(chain)
	}
}

fn remove_subtree(inner: &mut TreeInner, root: &Hash, discarded: &mut Vec<BlockHeader>) {
	let mut queue = vec![*root];
	while let Some(hash) = queue.pop() {
		if let Some(entry) = inner.blocks.remove(&hash) {
			queue.extend(entry.children.iter().copied());
			inner.leaves.remove(&hash);
			discarded.push(entry.header);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{database::MemoryDatabase, primitives::Digest};
	use sp_core::H256;

	fn header(parent: &BlockHeader, state_byte: u8) -> BlockHeader {
		BlockHeader {
			parent_hash: parent.hash(),
			number: parent.number + 1,
			state_root: H256::repeat_byte(state_byte),
			extrinsics_root: H256::zero(),
			digest: Digest::default(),
		}
	}

	fn genesis() -> BlockHeader {
		BlockHeader {
			parent_hash: H256::zero(),
			number: 0,
			state_root: H256::repeat_byte(0xee),
			extrinsics_root: H256::zero(),
			digest: Digest::default(),
		}
	}

	fn tree() -> (BlockTree, BlockHeader) {
		let root = genesis();
		let tree = BlockTree::create(Arc::new(MemoryDatabase::new()), root.clone()).unwrap();
		(tree, root)
	}

	#[test]
	fn add_block_requires_a_parent() {
		let (tree, root) = tree();
		let block_a = header(&root, 1);
		let orphan = header(&block_a, 2);

		assert!(matches!(
			tree.add_block(orphan.clone(), None),
			Err(BlockTreeError::NoParent(_))
		));
		tree.add_block(block_a, None).unwrap();
		tree.add_block(orphan, None).unwrap();
	}

	#[test]
	fn leaves_track_fork_tips() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let b = header(&a, 2);
		let fork = {
			let mut fork = header(&root, 3);
			fork.extrinsics_root = H256::repeat_byte(1);
			fork
		};

		tree.add_block(a.clone(), None).unwrap();
		tree.add_block(b.clone(), None).unwrap();
		tree.add_block(fork.clone(), None).unwrap();

		let mut leaves = tree.leaves();
		leaves.sort();
		let mut expected = vec![b.hash(), fork.hash()];
		expected.sort();
		assert_eq!(leaves, expected);
		assert_eq!(tree.deepest_leaf(), BlockInfo::new(2, b.hash()));
	}

	#[test]
	fn finalize_prunes_competing_forks() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let b = header(&a, 2);
		let fork = {
			let mut fork = header(&root, 9);
			fork.extrinsics_root = H256::repeat_byte(2);
			fork
		};
		tree.add_block(a.clone(), None).unwrap();
		tree.add_block(b.clone(), None).unwrap();
		tree.add_block(fork.clone(), None).unwrap();

		let justification = Justification { engine: *b"FRNK", data: vec![1, 2, 3] };
		let discarded = tree.finalize(&b.hash(), Some(justification.clone())).unwrap();

		assert_eq!(tree.last_finalized(), BlockInfo::new(2, b.hash()));
		assert_eq!(discarded.len(), 1);
		assert_eq!(discarded[0].hash(), fork.hash());
		assert_eq!(tree.leaves(), vec![b.hash()]);
		assert_eq!(tree.justification(&b.hash()).unwrap(), Some(justification));

		// The canonical lookup covers the finalized path.
		assert_eq!(tree.number_to_hash(1).unwrap(), Some(a.hash()));
		assert_eq!(tree.number_to_hash(2).unwrap(), Some(b.hash()));

		// Finalization is monotonic: going back to `a` is rejected.
		assert!(matches!(
			tree.finalize(&a.hash(), None),
			Err(BlockTreeError::NotDescendantOfFinalized(_) | BlockTreeError::BlockNotFound(_))
		));
	}

	#[test]
	fn finalized_headers_stay_readable_from_the_backend() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let b = header(&a, 2);
		tree.add_block(a.clone(), None).unwrap();
		tree.add_block(b.clone(), None).unwrap();
		tree.finalize(&b.hash(), None).unwrap();

		// `a` left the in-memory graph but is still readable.
		assert_eq!(tree.header(&a.hash()).unwrap(), Some(a.clone()));
		assert_eq!(tree.header_by_number(1).unwrap(), Some(a));
	}

	#[test]
	fn best_containing_respects_the_number_cap() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let b = header(&a, 2);
		let c = header(&b, 3);
		for block in [&a, &b, &c] {
			tree.add_block(block.clone(), None).unwrap();
		}

		assert_eq!(
			tree.best_containing(&a.hash(), None).unwrap(),
			BlockInfo::new(3, c.hash()),
		);
		assert_eq!(
			tree.best_containing(&a.hash(), Some(2)).unwrap(),
			BlockInfo::new(2, b.hash()),
		);
		assert!(matches!(
			tree.best_containing(&c.hash(), Some(2)),
			Err(BlockTreeError::TargetIsPastMax { target: 3, max: 2 })
		));
		assert!(matches!(
			tree.best_containing(&H256::repeat_byte(7), None),
			Err(BlockTreeError::BlockNotFound(_))
		));
	}

	#[test]
	fn chains_walk_both_directions() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let b = header(&a, 2);
		let c = header(&b, 3);
		for block in [&a, &b, &c] {
			tree.add_block(block.clone(), None).unwrap();
		}

		assert_eq!(
			tree.chain_by_block(&c.hash(), false, 3).unwrap(),
			vec![c.hash(), b.hash(), a.hash()],
		);
		assert_eq!(
			tree.chain_by_block(&a.hash(), true, 10).unwrap(),
			vec![a.hash(), b.hash(), c.hash()],
		);
		assert_eq!(tree.chain_by_block(&a.hash(), true, 1).unwrap(), vec![a.hash()]);
	}

	#[test]
	fn ancestry_terminates_at_the_finalized_block() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let b = header(&a, 2);
		tree.add_block(a.clone(), None).unwrap();
		tree.add_block(b.clone(), None).unwrap();

		assert!(tree.is_ancestor(&root.hash(), &b.hash()));
		assert!(tree.is_ancestor(&a.hash(), &b.hash()));
		assert!(!tree.is_ancestor(&b.hash(), &a.hash()));

		tree.finalize(&a.hash(), None).unwrap();
		assert!(tree.is_ancestor(&a.hash(), &b.hash()));
	}

	#[test]
	fn bodies_roundtrip_through_the_backend() {
		let (tree, root) = tree();
		let a = header(&root, 1);
		let body = vec![vec![1, 2, 3], vec![4]];
		tree.add_block(a.clone(), Some(body.clone())).unwrap();
		assert_eq!(tree.block_body(&a.hash()).unwrap(), Some(body));
		assert_eq!(tree.block_body(&H256::repeat_byte(3)).unwrap(), None);
	}
}

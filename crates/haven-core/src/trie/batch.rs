// SPDX-License-Identifier: GPL-3.0

//! Trie batches: the access layer over stored state roots.
//!
//! Three flavours exist:
//!
//! - [`EphemeralBatch`] — a read-only view of the trie at a root. Multiple
//!   ephemeral batches over the same or different roots may be held
//!   concurrently; loaded nodes are cached for the batch's lifetime and
//!   dropped with it.
//! - [`PersistentBatch`] — a single-owner copy-on-write view: mutations
//!   build up in memory and [`PersistentBatch::commit`] atomically writes
//!   the new nodes, returning the new state root. Committing unchanged
//!   content returns the same root.
//! - [`TopperBatch`] — an overlay on top of another batch. Writes are held
//!   in an in-memory map (`None` marks a deletion) and replayed into the
//!   parent by [`TopperBatch::write_back`]; dropping the topper instead
//!   discards them. Toppers nest.
//!
//! Keys under the reserved prefix `:child_storage:default:` address child
//! tries: a child batch commits to its own root, which is then stored
//! under that key in the parent.

use crate::{
	database::{Database, WriteBatch},
	error::{CodecError, TrieError},
	trie::{StateVersion, serializer::TrieSerializer, tree::Trie},
};
use parking_lot::Mutex;
use sp_core::H256;
use std::{collections::BTreeMap, sync::Arc};

/// Reserved key prefix under which child trie roots live in their parent.
pub const CHILD_STORAGE_PREFIX: &[u8] = b":child_storage:default:";

/// The full parent-trie key holding the root of the child trie `child_key`.
pub fn child_trie_key(child_key: &[u8]) -> Vec<u8> {
	let mut key = CHILD_STORAGE_PREFIX.to_vec();
	key.extend_from_slice(child_key);
	key
}

/// Read surface common to all batches.
pub trait TrieBatch {
	/// Read the value under `key`, `None` when absent.
	fn try_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError>;

	/// Whether a value exists under `key`.
	fn contains(&mut self, key: &[u8]) -> Result<bool, TrieError>;

	/// Keys with the given prefix in sorted order, starting strictly after
	/// `prev`, up to `limit`.
	fn get_keys_paged(
		&mut self,
		prefix: &[u8],
		prev: Option<&[u8]>,
		limit: usize,
	) -> Result<Vec<Vec<u8>>, TrieError>;

	/// Read a required value.
	fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
		self.try_get(key)?.ok_or_else(|| TrieError::NoValue(key.to_vec()))
	}
}

/// Write surface of mutable batches.
pub trait TrieBatchMut: TrieBatch {
	/// Insert or replace the value under `key`.
	fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError>;

	/// Remove the value under `key`, returning whether one was present.
	fn remove(&mut self, key: &[u8]) -> Result<bool, TrieError>;

	/// Remove up to `limit` values under `prefix`; returns whether the
	/// prefix was fully cleared and the number of removed values.
	fn clear_prefix(
		&mut self,
		prefix: &[u8],
		limit: Option<u32>,
	) -> Result<(bool, u32), TrieError>;
}

/// Entry point for opening batches at state roots.
#[derive(Clone)]
pub struct TrieStorage {
	serializer: TrieSerializer,
	db: Arc<dyn Database>,
}

impl TrieStorage {
	/// Create the storage over a backend.
	pub fn new(db: Arc<dyn Database>) -> Self {
		Self { serializer: TrieSerializer::new(db.clone()), db }
	}

	/// The state root of the empty trie.
	pub fn empty_root() -> H256 {
		TrieSerializer::empty_root()
	}

	/// The serializer backing this storage.
	pub fn serializer(&self) -> &TrieSerializer {
		&self.serializer
	}

	/// Open a read-only view at `root`. Fails when the root is absent.
	pub fn ephemeral_batch(&self, root: H256) -> Result<EphemeralBatch, TrieError> {
		let trie = self.serializer.retrieve_trie(root)?;
		Ok(EphemeralBatch { trie: Mutex::new(trie), serializer: self.serializer.clone() })
	}

	/// Open a copy-on-write batch at `root`. Fails when the root is absent.
	pub fn persistent_batch(&self, root: H256) -> Result<PersistentBatch, TrieError> {
		let trie = self.serializer.retrieve_trie(root)?;
		Ok(PersistentBatch {
			trie,
			serializer: self.serializer.clone(),
			db: self.db.clone(),
		})
	}
}

/// A read-only snapshot of the trie at a root.
///
/// Reads take `&self`; the inner trie is only mutated to cache lazily
/// loaded nodes.
pub struct EphemeralBatch {
	trie: Mutex<Trie>,
	serializer: TrieSerializer,
}

impl EphemeralBatch {
	/// Read the value under `key`, `None` when absent.
	pub fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
		self.trie.lock().get(key)
	}

	/// Read a required value.
	pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
		self.try_get(key)?.ok_or_else(|| TrieError::NoValue(key.to_vec()))
	}

	/// Whether a value exists under `key`.
	pub fn contains(&self, key: &[u8]) -> Result<bool, TrieError> {
		self.trie.lock().contains(key)
	}

	/// Keys with the given prefix, paged.
	pub fn get_keys_paged(
		&self,
		prefix: &[u8],
		prev: Option<&[u8]>,
		limit: usize,
	) -> Result<Vec<Vec<u8>>, TrieError> {
		self.trie.lock().get_keys_paged(prefix, prev, limit)
	}

	/// Open a read-only view of the child trie stored under `child_key`.
	pub fn child_batch(&self, child_key: &[u8]) -> Result<EphemeralBatch, TrieError> {
		let root = match self.try_get(&child_trie_key(child_key))? {
			Some(bytes) => decode_child_root(&bytes)?,
			None => TrieSerializer::empty_root(),
		};
		let trie = self.serializer.retrieve_trie(root)?;
		Ok(EphemeralBatch { trie: Mutex::new(trie), serializer: self.serializer.clone() })
	}
}

impl TrieBatch for EphemeralBatch {
	fn try_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
		EphemeralBatch::try_get(self, key)
	}

	fn contains(&mut self, key: &[u8]) -> Result<bool, TrieError> {
		EphemeralBatch::contains(self, key)
	}

	fn get_keys_paged(
		&mut self,
		prefix: &[u8],
		prev: Option<&[u8]>,
		limit: usize,
	) -> Result<Vec<Vec<u8>>, TrieError> {
		EphemeralBatch::get_keys_paged(self, prefix, prev, limit)
	}
}

/// A single-owner copy-on-write batch over a state root.
pub struct PersistentBatch {
	trie: Trie,
	serializer: TrieSerializer,
	db: Arc<dyn Database>,
}

impl PersistentBatch {
	/// Serialize the accumulated changes, write them atomically and return
	/// the new state root.
	///
	/// Committing twice without intermediate changes returns the same root.
	/// The batch stays usable over the committed state.
	pub fn commit(&mut self, version: StateVersion) -> Result<H256, TrieError> {
		let mut batch = WriteBatch::new();
		let root = self.serializer.store_trie(&mut self.trie, version, &mut batch)?;
		self.db.commit(batch).map_err(TrieError::Database)?;
		Ok(root)
	}

	/// Open a copy-on-write batch over the child trie stored under
	/// `child_key`. An absent child key yields an empty child trie.
	pub fn child_batch(&mut self, child_key: &[u8]) -> Result<PersistentBatch, TrieError> {
		let root = match self.try_get(&child_trie_key(child_key))? {
			Some(bytes) => decode_child_root(&bytes)?,
			None => TrieSerializer::empty_root(),
		};
		let trie = self.serializer.retrieve_trie(root)?;
		Ok(PersistentBatch {
			trie,
			serializer: self.serializer.clone(),
			db: self.db.clone(),
		})
	}

	/// Commit a child batch and store its new root under `child_key` in
	/// this batch. Returns the child root.
	pub fn commit_child(
		&mut self,
		child_key: &[u8],
		mut child: PersistentBatch,
		version: StateVersion,
	) -> Result<H256, TrieError> {
		let root = child.commit(version)?;
		self.put(&child_trie_key(child_key), root.as_bytes().to_vec())?;
		Ok(root)
	}
}

impl TrieBatch for PersistentBatch {
	fn try_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
		self.trie.get(key)
	}

	fn contains(&mut self, key: &[u8]) -> Result<bool, TrieError> {
		self.trie.contains(key)
	}

	fn get_keys_paged(
		&mut self,
		prefix: &[u8],
		prev: Option<&[u8]>,
		limit: usize,
	) -> Result<Vec<Vec<u8>>, TrieError> {
		self.trie.get_keys_paged(prefix, prev, limit)
	}
}

impl TrieBatchMut for PersistentBatch {
	fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
		self.trie.put(key, value)
	}

	fn remove(&mut self, key: &[u8]) -> Result<bool, TrieError> {
		self.trie.remove(key)
	}

	fn clear_prefix(
		&mut self,
		prefix: &[u8],
		limit: Option<u32>,
	) -> Result<(bool, u32), TrieError> {
		self.trie.clear_prefix(prefix, limit, &mut |_, _| Ok(()))
	}
}

fn decode_child_root(bytes: &[u8]) -> Result<H256, TrieError> {
	if bytes.len() != 32 {
		return Err(TrieError::Codec(CodecError::TooFewBytes {
			needed: 32,
			available: bytes.len(),
		}));
	}
	Ok(H256::from_slice(bytes))
}

/// An in-memory overlay over another batch.
///
/// Reads consult the overlay first; writes never touch the parent until
/// [`TopperBatch::write_back`] replays them. Dropping the topper without
/// writing back discards the overlay.
pub struct TopperBatch<'a> {
	parent: &'a mut dyn TrieBatchMut,
	/// `None` marks a deletion of the parent's value.
	overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> TopperBatch<'a> {
	/// Create an overlay over `parent`.
	pub fn new(parent: &'a mut dyn TrieBatchMut) -> Self {
		Self { parent, overlay: BTreeMap::new() }
	}

	/// Spawn a nested topper over this one.
	pub fn topper(&mut self) -> TopperBatch<'_> {
		TopperBatch::new(self)
	}

	/// Replay the overlay into the parent and clear it.
	pub fn write_back(&mut self) -> Result<(), TrieError> {
		for (key, value) in std::mem::take(&mut self.overlay) {
			match value {
				Some(value) => self.parent.put(&key, value)?,
				None => {
					self.parent.remove(&key)?;
				},
			}
		}
		Ok(())
	}

	/// Number of pending overlay entries.
	pub fn pending(&self) -> usize {
		self.overlay.len()
	}
}

impl TrieBatch for TopperBatch<'_> {
	fn try_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
		if let Some(entry) = self.overlay.get(key) {
			return Ok(entry.clone());
		}
		self.parent.try_get(key)
	}

	fn contains(&mut self, key: &[u8]) -> Result<bool, TrieError> {
		if let Some(entry) = self.overlay.get(key) {
			return Ok(entry.is_some());
		}
		self.parent.contains(key)
	}

	fn get_keys_paged(
		&mut self,
		prefix: &[u8],
		prev: Option<&[u8]>,
		limit: usize,
	) -> Result<Vec<Vec<u8>>, TrieError> {
		// Merge the parent's view with the overlay: overlay insertions are
		// added, overlay deletions are filtered out.
		let mut keys: Vec<Vec<u8>> = self
			.parent
			.get_keys_paged(prefix, None, usize::MAX)?
			.into_iter()
			.filter(|key| !matches!(self.overlay.get(key), Some(None)))
			.collect();
		for (key, value) in self.overlay.range(prefix.to_vec()..) {
			if !key.starts_with(prefix) {
				break;
			}
			if value.is_some() && !keys.contains(key) {
				keys.push(key.clone());
			}
		}
		keys.sort();
		if let Some(prev) = prev {
			keys.retain(|key| key.as_slice() > prev);
		}
		keys.truncate(limit);
		Ok(keys)
	}
}

impl TrieBatchMut for TopperBatch<'_> {
	fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
		self.overlay.insert(key.to_vec(), Some(value));
		Ok(())
	}

	fn remove(&mut self, key: &[u8]) -> Result<bool, TrieError> {
		let existed = self.contains(key)?;
		self.overlay.insert(key.to_vec(), None);
		Ok(existed)
	}

	fn clear_prefix(
		&mut self,
		prefix: &[u8],
		limit: Option<u32>,
	) -> Result<(bool, u32), TrieError> {
		let keys = self.get_keys_paged(prefix, None, usize::MAX)?;
		let cap = limit.map(|l| l as usize).unwrap_or(keys.len());
		let mut removed = 0u32;
		for key in keys.iter().take(cap) {
			self.overlay.insert(key.clone(), None);
			removed += 1;
		}
		Ok((keys.len() <= cap, removed))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::database::MemoryDatabase;

	fn storage() -> TrieStorage {
		TrieStorage::new(Arc::new(MemoryDatabase::new()))
	}

	fn committed(storage: &TrieStorage, entries: &[(&[u8], &[u8])]) -> H256 {
		let mut batch = storage.persistent_batch(TrieStorage::empty_root()).unwrap();
		for (key, value) in entries {
			batch.put(key, value.to_vec()).unwrap();
		}
		batch.commit(StateVersion::V1).unwrap()
	}

	#[test]
	fn ephemeral_batch_requires_a_known_root() {
		let storage = storage();
		assert!(matches!(
			storage.ephemeral_batch(H256::repeat_byte(9)),
			Err(TrieError::RootNotFound(_))
		));
		// The empty root is always available.
		storage.ephemeral_batch(TrieStorage::empty_root()).unwrap();
	}

	#[test]
	fn persistent_commit_then_ephemeral_read() {
		let storage = storage();
		let root = committed(&storage, &[(b"one", b"1"), (b"two", b"2")]);

		let reader = storage.ephemeral_batch(root).unwrap();
		assert_eq!(reader.try_get(b"one").unwrap(), Some(b"1".to_vec()));
		assert_eq!(reader.try_get(b"two").unwrap(), Some(b"2".to_vec()));
		assert_eq!(reader.try_get(b"three").unwrap(), None);
		assert!(matches!(reader.get(b"three"), Err(TrieError::NoValue(_))));
	}

	#[test]
	fn commit_is_idempotent_on_unchanged_content() {
		let storage = storage();
		let mut batch = storage.persistent_batch(TrieStorage::empty_root()).unwrap();
		batch.put(b"key", b"value".to_vec()).unwrap();
		let first = batch.commit(StateVersion::V1).unwrap();
		let second = batch.commit(StateVersion::V1).unwrap();
		assert_eq!(first, second);

		// A later change produces a new root; reverting it restores the old.
		batch.put(b"key", b"other".to_vec()).unwrap();
		let third = batch.commit(StateVersion::V1).unwrap();
		assert_ne!(first, third);
		batch.put(b"key", b"value".to_vec()).unwrap();
		assert_eq!(batch.commit(StateVersion::V1).unwrap(), first);
	}

	#[test]
	fn topper_overlay_reads_and_write_back() {
		let storage = storage();
		let root = committed(&storage, &[(b"kept", b"parent"), (b"gone", b"parent")]);
		let mut parent = storage.persistent_batch(root).unwrap();

		let mut topper = TopperBatch::new(&mut parent);
		topper.put(b"added", b"topper".to_vec()).unwrap();
		assert!(topper.remove(b"gone").unwrap());

		// Overlay shadows the parent.
		assert_eq!(topper.try_get(b"gone").unwrap(), None);
		assert_eq!(topper.try_get(b"added").unwrap(), Some(b"topper".to_vec()));
		assert_eq!(topper.try_get(b"kept").unwrap(), Some(b"parent".to_vec()));

		topper.write_back().unwrap();
		drop(topper);

		assert_eq!(parent.try_get(b"added").unwrap(), Some(b"topper".to_vec()));
		assert_eq!(parent.try_get(b"gone").unwrap(), None);
	}

	#[test]
	fn dropping_a_topper_discards_its_overlay() {
		let storage = storage();
		let root = committed(&storage, &[(b"key", b"parent")]);
		let mut parent = storage.persistent_batch(root).unwrap();

		{
			let mut topper = TopperBatch::new(&mut parent);
			topper.put(b"key", b"topper".to_vec()).unwrap();
		}
		assert_eq!(parent.try_get(b"key").unwrap(), Some(b"parent".to_vec()));
	}

	#[test]
	fn nested_toppers_promote_into_each_other() {
		let storage = storage();
		let mut parent = storage.persistent_batch(TrieStorage::empty_root()).unwrap();

		let mut outer = TopperBatch::new(&mut parent);
		outer.put(b"outer", b"1".to_vec()).unwrap();
		{
			let mut inner = outer.topper();
			inner.put(b"inner", b"2".to_vec()).unwrap();
			// The inner topper sees through to the outer overlay.
			assert_eq!(inner.try_get(b"outer").unwrap(), Some(b"1".to_vec()));
			inner.write_back().unwrap();
		}
		assert_eq!(outer.try_get(b"inner").unwrap(), Some(b"2".to_vec()));

		outer.write_back().unwrap();
		drop(outer);
		assert_eq!(parent.try_get(b"inner").unwrap(), Some(b"2".to_vec()));
	}

	#[test]
	fn topper_paged_keys_merge_overlay_and_parent() {
		let storage = storage();
		let root = committed(&storage, &[(&[0x10][..], b"a"), (&[0x12][..], b"b")]);
		let mut parent = storage.persistent_batch(root).unwrap();

		let mut topper = TopperBatch::new(&mut parent);
		topper.put(&[0x11], b"c".to_vec()).unwrap();
		topper.remove(&[0x12]).unwrap();

		assert_eq!(
			topper.get_keys_paged(&[], None, 10).unwrap(),
			vec![vec![0x10], vec![0x11]],
		);
	}

	#[test]
	fn child_tries_commit_to_their_own_root() {
		let storage = storage();
		let mut parent = storage.persistent_batch(TrieStorage::empty_root()).unwrap();
		parent.put(b"top", b"level".to_vec()).unwrap();

		let mut child = parent.child_batch(b"tokens").unwrap();
		child.put(b"balance", b"100".to_vec()).unwrap();
		let child_root = parent.commit_child(b"tokens", child, StateVersion::V1).unwrap();
		let parent_root = parent.commit(StateVersion::V1).unwrap();

		// The child root is stored under the reserved prefix.
		let reader = storage.ephemeral_batch(parent_root).unwrap();
		assert_eq!(
			reader.try_get(&child_trie_key(b"tokens")).unwrap(),
			Some(child_root.as_bytes().to_vec()),
		);

		// And the child trie reads back through a child batch.
		let child_reader = reader.child_batch(b"tokens").unwrap();
		assert_eq!(child_reader.try_get(b"balance").unwrap(), Some(b"100".to_vec()));
	}
}

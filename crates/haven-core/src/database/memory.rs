// SPDX-License-Identifier: GPL-3.0

//! In-memory reference implementation of the [`Database`] trait.
//!
//! Each space is an ordered map guarded by a single `RwLock`, which makes
//! batch commits trivially atomic: the lock is held for the whole batch.
//! Cursors copy a snapshot of their space at creation, so they observe a
//! stable view regardless of later writes.

use crate::{
	database::{BatchOp, Cursor, Database, Space, WriteBatch},
	error::DatabaseError,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Column = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory column store.
///
/// Intended for tests and for nodes that do not need persistence across
/// restarts; a file-backed store implements the same trait.
#[derive(Default)]
pub struct MemoryDatabase {
	columns: RwLock<[Column; Space::ALL.len()]>,
}

impl MemoryDatabase {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Total number of entries across all spaces.
	pub fn len(&self) -> usize {
		self.columns.read().iter().map(BTreeMap::len).sum()
	}

	/// Whether the store holds no entries at all.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of entries in one space.
	pub fn space_len(&self, space: Space) -> usize {
		self.columns.read()[space.index()].len()
	}
}

impl Database for MemoryDatabase {
	fn try_get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
		Ok(self.columns.read()[space.index()].get(key).cloned())
	}

	fn contains(&self, space: Space, key: &[u8]) -> Result<bool, DatabaseError> {
		Ok(self.columns.read()[space.index()].contains_key(key))
	}

	fn put(&self, space: Space, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
		self.columns.write()[space.index()].insert(key.to_vec(), value.to_vec());
		Ok(())
	}

	fn remove(&self, space: Space, key: &[u8]) -> Result<(), DatabaseError> {
		self.columns.write()[space.index()].remove(key);
		Ok(())
	}

	fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
		let mut columns = self.columns.write();
		for op in batch.into_ops() {
			match op {
				BatchOp::Put { space, key, value } => {
					columns[space.index()].insert(key, value);
				},
				BatchOp::Remove { space, key } => {
					columns[space.index()].remove(&key);
				},
			}
		}
		Ok(())
	}

	fn cursor(&self, space: Space) -> Result<Box<dyn Cursor>, DatabaseError> {
		let snapshot: Vec<(Vec<u8>, Vec<u8>)> =
			self.columns.read()[space.index()].iter().map(|(k, v)| (k.clone(), v.clone())).collect();
		Ok(Box::new(SnapshotCursor { entries: snapshot, position: None }))
	}
}

/// Cursor over a sorted snapshot of one space.
struct SnapshotCursor {
	entries: Vec<(Vec<u8>, Vec<u8>)>,
	/// Index into `entries`; `None` when invalid.
	position: Option<usize>,
}

impl Cursor for SnapshotCursor {
	fn seek_first(&mut self) -> bool {
		self.position = if self.entries.is_empty() { None } else { Some(0) };
		self.is_valid()
	}

	fn seek(&mut self, key: &[u8]) -> bool {
		self.position = self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)).ok();
		self.is_valid()
	}

	fn seek_lower_bound(&mut self, key: &[u8]) -> bool {
		let index = self.entries.partition_point(|(k, _)| k.as_slice() < key);
		self.position = (index < self.entries.len()).then_some(index);
		self.is_valid()
	}

	fn seek_upper_bound(&mut self, key: &[u8]) -> bool {
		let index = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
		self.position = index.checked_sub(1);
		self.is_valid()
	}

	fn next(&mut self) -> bool {
		self.position = match self.position {
			Some(index) if index + 1 < self.entries.len() => Some(index + 1),
			_ => None,
		};
		self.is_valid()
	}

	fn is_valid(&self) -> bool {
		self.position.is_some()
	}

	fn key(&self) -> Option<&[u8]> {
		self.position.map(|index| self.entries[index].0.as_slice())
	}

	fn value(&self) -> Option<&[u8]> {
		self.position.map(|index| self.entries[index].1.as_slice())
	}
}

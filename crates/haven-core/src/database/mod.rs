// SPDX-License-Identifier: GPL-3.0

//! Column-keyed byte store underpinning the persistent state.
//!
//! The backend is deliberately opaque: everything above it talks to the
//! [`Database`] trait, which exposes per-column reads and writes, atomic
//! [`WriteBatch`]es that may span columns, and ordered [`Cursor`]s over a
//! read snapshot. The concrete store is interchangeable; an in-memory
//! reference implementation lives in [`memory`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Database                                │
//! │                                                                 │
//! │   get/put ──────► one column ("space") at a time                │
//! │   commit(batch) ─► all writes land atomically, across columns   │
//! │   cursor() ─────► ordered iteration over a read snapshot        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod audi;
pub mod memory;

pub use audi::{AuthorityId, AuthorityPeerInfo, AuthorityPeerStore};
pub use memory::MemoryDatabase;

use crate::error::DatabaseError;

/// A column family of the backend.
///
/// Each space is an independent keyspace; batches may mix spaces and still
/// commit atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
	/// Miscellaneous records, such as the runtime-upgrade lookup.
	Default,
	/// Trie nodes: `merkle_value → encoding`.
	TrieNode,
	/// Out-of-line trie values: `blake2b_256(value) → value`.
	TrieValue,
	/// Block number (big-endian `u32`) → block hash.
	LookupKey,
	/// Block hash → SCALE-encoded header.
	Header,
	/// Block hash → SCALE-encoded body.
	BlockBody,
	/// Block hash → SCALE-encoded justification.
	Justification,
	/// Pruner metadata and the refcount snapshot.
	TriePruner,
	/// Authority id → discovered peer info.
	AudiPeers,
}

impl Space {
	/// All spaces, in a stable order.
	pub const ALL: [Space; 9] = [
		Space::Default,
		Space::TrieNode,
		Space::TrieValue,
		Space::LookupKey,
		Space::Header,
		Space::BlockBody,
		Space::Justification,
		Space::TriePruner,
		Space::AudiPeers,
	];

	/// Stable name of the space, used in diagnostics and by file-backed
	/// implementations as the column-family name.
	pub fn as_str(&self) -> &'static str {
		match self {
			Space::Default => "default",
			Space::TrieNode => "trie_node",
			Space::TrieValue => "trie_value",
			Space::LookupKey => "lookup_key",
			Space::Header => "header",
			Space::BlockBody => "block_body",
			Space::Justification => "justification",
			Space::TriePruner => "trie_pruner",
			Space::AudiPeers => "audi_peers",
		}
	}

	pub(crate) fn index(&self) -> usize {
		match self {
			Space::Default => 0,
			Space::TrieNode => 1,
			Space::TrieValue => 2,
			Space::LookupKey => 3,
			Space::Header => 4,
			Space::BlockBody => 5,
			Space::Justification => 6,
			Space::TriePruner => 7,
			Space::AudiPeers => 8,
		}
	}
}

/// A single operation within a [`WriteBatch`].
#[derive(Debug, Clone)]
enum BatchOp {
	Put { space: Space, key: Vec<u8>, value: Vec<u8> },
	Remove { space: Space, key: Vec<u8> },
}

/// An ordered set of writes committed atomically.
///
/// Later operations on the same key override earlier ones. A batch is
/// inert until passed to [`Database::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
	ops: Vec<BatchOp>,
}

impl WriteBatch {
	/// Create an empty batch.
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue a value write.
	pub fn put(&mut self, space: Space, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
		self.ops.push(BatchOp::Put { space, key: key.into(), value: value.into() });
	}

	/// Queue a key removal.
	pub fn remove(&mut self, space: Space, key: impl Into<Vec<u8>>) {
		self.ops.push(BatchOp::Remove { space, key: key.into() });
	}

	/// Whether the batch holds no operations.
	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}

	/// Number of queued operations.
	pub fn len(&self) -> usize {
		self.ops.len()
	}

	/// Append all operations of `other` after this batch's own.
	pub fn extend(&mut self, other: WriteBatch) {
		self.ops.extend(other.ops);
	}

	pub(crate) fn into_ops(self) -> Vec<BatchOp> {
		self.ops
	}
}

/// An ordered cursor over one space.
///
/// Cursors iterate a read snapshot taken at creation and must not outlive
/// the batch/transaction they were created under.
pub trait Cursor {
	/// Position on the first entry. Returns whether the cursor is valid.
	fn seek_first(&mut self) -> bool;

	/// Position on `key` exactly. Returns whether such an entry exists.
	fn seek(&mut self, key: &[u8]) -> bool;

	/// Position on the first entry with key `>= key`.
	fn seek_lower_bound(&mut self, key: &[u8]) -> bool;

	/// Position on the last entry with key `<= key`.
	fn seek_upper_bound(&mut self, key: &[u8]) -> bool;

	/// Advance to the next entry. Returns whether the cursor is valid.
	fn next(&mut self) -> bool;

	/// Whether the cursor points at an entry.
	fn is_valid(&self) -> bool;

	/// Key under the cursor, if valid.
	fn key(&self) -> Option<&[u8]>;

	/// Value under the cursor, if valid.
	fn value(&self) -> Option<&[u8]>;
}

/// Column-keyed byte store with atomic batches and snapshot cursors.
pub trait Database: Send + Sync {
	/// Read a required value. Absence is an error; use [`Database::try_get`]
	/// for lookups that tolerate missing keys.
	fn get(&self, space: Space, key: &[u8]) -> Result<Vec<u8>, DatabaseError> {
		self.try_get(space, key)?.ok_or_else(|| DatabaseError::NotFound {
			space: space.as_str(),
			key: key.to_vec(),
		})
	}

	/// Read a value, `None` when absent.
	fn try_get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

	/// Whether the key is present.
	fn contains(&self, space: Space, key: &[u8]) -> Result<bool, DatabaseError> {
		Ok(self.try_get(space, key)?.is_some())
	}

	/// Write a single value.
	fn put(&self, space: Space, key: &[u8], value: &[u8]) -> Result<(), DatabaseError>;

	/// Remove a single key. Removing an absent key succeeds.
	fn remove(&self, space: Space, key: &[u8]) -> Result<(), DatabaseError>;

	/// Apply a batch atomically: either every operation lands or none does.
	fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError>;

	/// Open an ordered cursor over a read snapshot of the space.
	fn cursor(&self, space: Space) -> Result<Box<dyn Cursor>, DatabaseError>;
}

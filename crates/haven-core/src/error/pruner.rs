// SPDX-License-Identifier: GPL-3.0

use crate::error::{BlockTreeError, DatabaseError, TrieError};
use thiserror::Error;

/// Errors that can occur in the trie pruner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrunerError {
	/// The persisted pruner record does not match the last finalized block,
	/// which usually means a corrupted database.
	#[error("Pruner info record is outdated with respect to the last finalized block")]
	OutdatedPruneBase,

	/// The database already holds blocks but no pruner record, so refcounts
	/// for the stored states cannot be reconstructed safely.
	#[error("Attempt to create a trie pruner on a non-pruned non-empty database")]
	CreatePrunerOnNonPrunedNonEmptyStorage,

	/// Trie walk failure while counting or releasing nodes.
	#[error("Trie error: {0}")]
	Trie(#[from] TrieError),

	/// Backend failure while persisting pruner state.
	#[error("Database error: {0}")]
	Database(#[from] DatabaseError),

	/// Block tree lookup failure during state recovery.
	#[error("Block tree error: {0}")]
	BlockTree(#[from] BlockTreeError),
}

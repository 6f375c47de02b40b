// SPDX-License-Identifier: GPL-3.0

use crate::error::DatabaseError;
use sp_core::H256;
use thiserror::Error;

/// Errors that can occur when working with the block tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockTreeError {
	/// The parent of the block being added is not in the tree.
	#[error("Parent not found for block: {0:?}")]
	NoParent(H256),

	/// The referenced block is not in the tree.
	#[error("Block not found: {0:?}")]
	BlockNotFound(H256),

	/// A header required for the operation is absent.
	#[error("Header not found: {0:?}")]
	HeaderNotFound(H256),

	/// The target block's number already exceeds the requested maximum.
	#[error("Target block #{target} is past the maximum allowed number #{max}")]
	TargetIsPastMax {
		/// Number of the target block.
		target: u32,
		/// Maximum number requested by the caller.
		max: u32,
	},

	/// The block to finalize does not descend from the finalized chain.
	#[error("Block {0:?} does not descend from the last finalized block")]
	NotDescendantOfFinalized(H256),

	/// Backend failure while persisting chain data.
	#[error("Database error: {0}")]
	Database(#[from] DatabaseError),

	/// Persisted chain data failed to decode.
	#[error("Chain data corrupted: {0}")]
	Corrupted(String),
}

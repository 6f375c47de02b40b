// SPDX-License-Identifier: GPL-3.0

use crate::error::{CodecError, DatabaseError};
use sp_core::H256;
use thiserror::Error;

/// Errors that can occur when working with tries and trie batches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrieError {
	/// No value is stored under the requested key.
	#[error("No value found for key 0x{}", hex::encode(.0))]
	NoValue(Vec<u8>),

	/// A node failed to decode.
	#[error("Node decoding error: {0}")]
	Codec(#[from] CodecError),

	/// Backend failure while loading or storing nodes.
	#[error("Database error: {0}")]
	Database(#[from] DatabaseError),

	/// The requested state root has no node in the backend.
	#[error("State root not found: {0:?}")]
	RootNotFound(H256),

	/// A referenced node is absent from the backend.
	#[error("Trie node not found: 0x{}", hex::encode(.0))]
	NodeNotFound(Vec<u8>),

	/// A hashed value referenced by a node is absent from the backend.
	#[error("Trie value not found: {0:?}")]
	ValueNotFound(H256),
}

// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors that can occur when working with the column-keyed backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
	/// An I/O failure in the underlying store. Fatal for the operation in
	/// progress; in-memory state is left untouched.
	#[error("Database I/O error: {0}")]
	Io(String),

	/// A key required by the caller was absent. Lookups that tolerate
	/// absence go through `try_get` and return `None` instead.
	#[error("Key not found in column {space}: 0x{}", hex::encode(.key))]
	NotFound {
		/// Column the lookup targeted.
		space: &'static str,
		/// The missing key.
		key: Vec<u8>,
	},

	/// A stored value failed to decode.
	#[error("Stored value corrupted in column {space}: {reason}")]
	Corrupted {
		/// Column the value was read from.
		space: &'static str,
		/// Decoder diagnostics.
		reason: String,
	},
}

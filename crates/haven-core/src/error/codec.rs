// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors that can occur while encoding or decoding trie nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
	/// The node header does not describe a known node variant.
	#[error("Invalid node type (header byte {0:#04x})")]
	InvalidNodeType(u8),

	/// The input ended before the structure it announced was complete.
	#[error("Too few bytes: need {needed}, have {available}")]
	TooFewBytes {
		/// Bytes required by the announced structure.
		needed: usize,
		/// Bytes actually available.
		available: usize,
	},

	/// The partial key length overflows the supported maximum.
	#[error("Invalid partial key length")]
	InvalidKeyLength,

	/// The input ended in the middle of a varint or compact prefix.
	#[error("Unexpected end of input")]
	UnexpectedEof,
}

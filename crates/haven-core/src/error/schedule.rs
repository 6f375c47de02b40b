// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors raised while observing authority-change digests and maintaining
/// the schedule-node tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
	/// The consensus message variant is not one the observer understands.
	#[error("Unsupported message type")]
	UnsupportedMessageType,

	/// An authority index in the message is out of bounds.
	#[error("Wrong authority index (out of bound)")]
	WrongAuthorityIndex,

	/// A new scheduled change arrived before the previous one applied.
	#[error("No previous change (scheduled) applied yet")]
	NoScheduledChangeAppliedYet,

	/// A new forced change arrived before the previous one applied.
	#[error("No previous change (forced) applied yet")]
	NoForcedChangeAppliedYet,

	/// A pause arrived before the previous one applied.
	#[error("No previous change (pause) applied yet")]
	NoPauseAppliedYet,

	/// A resume arrived before the previous one applied.
	#[error("No previous change (resume) applied yet")]
	NoResumeAppliedYet,

	/// The digest payload failed to decode.
	#[error("Digest decoding error: {0}")]
	Decode(String),

	/// The referenced schedule node is not in the tree.
	#[error("Schedule node not found")]
	NodeNotFound,
}

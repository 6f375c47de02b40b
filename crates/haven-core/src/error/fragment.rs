// SPDX-License-Identifier: GPL-3.0

use crate::{fragment::ParaId, primitives::BlockNumber};
use sp_core::H256;
use thiserror::Error;

/// Errors that can occur when constructing a [`crate::fragment::Scope`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
	/// The ancestors were not in strictly descending order with step 1.
	#[error("Unexpected ancestor #{number} after #{prev}")]
	UnexpectedAncestor {
		/// The block number the error occurred at.
		number: BlockNumber,
		/// The previously seen block number, which did not match.
		prev: BlockNumber,
	},
}

/// Errors that can occur when building a candidate entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateEntryError {
	/// The candidate does not match the persisted validation data provided
	/// alongside it.
	#[error("Candidate does not match the persisted validation data provided alongside it")]
	PersistedValidationDataMismatch,

	/// The candidate's output head equals its parent head.
	#[error("Candidate would introduce a zero-length cycle")]
	ZeroLengthCycle,
}

/// Errors that can occur while framing upward messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UmpError {
	/// More than one UMP signal followed the separator.
	#[error("Too many UMP signals")]
	TooManyUmpSignals,

	/// The UMP signal payload failed to decode.
	#[error("Malformed UMP signal")]
	MalformedUmpSignal,
}

/// Errors that can occur when applying or checking constraint modifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModificationError {
	/// The HRMP watermark is not a valid value for this relay parent.
	#[error("Disallowed HRMP watermark: #{0}")]
	DisallowedHrmpWatermark(BlockNumber),

	/// No outbound HRMP channel exists towards the recipient.
	#[error("No such HRMP channel towards para {0:?}")]
	NoSuchHrmpChannel(ParaId),

	/// More HRMP messages submitted than the channel has room for.
	#[error(
		"HRMP messages overflow towards para {para_id:?}: {messages_submitted} submitted, {messages_remaining} remaining"
	)]
	HrmpMessagesOverflow {
		/// The channel recipient.
		para_id: ParaId,
		/// Messages the channel can still take.
		messages_remaining: u32,
		/// Messages the candidate submitted.
		messages_submitted: u32,
	},

	/// More HRMP bytes submitted than the channel has room for.
	#[error(
		"HRMP bytes overflow towards para {para_id:?}: {bytes_submitted} submitted, {bytes_remaining} remaining"
	)]
	HrmpBytesOverflow {
		/// The channel recipient.
		para_id: ParaId,
		/// Bytes the channel can still take.
		bytes_remaining: u32,
		/// Bytes the candidate submitted.
		bytes_submitted: u32,
	},

	/// More UMP messages submitted than the queue has room for.
	#[error("UMP messages overflow: {messages_submitted} submitted, {messages_remaining} remaining")]
	UmpMessagesOverflow {
		/// Messages the queue can still take.
		messages_remaining: u32,
		/// Messages the candidate submitted.
		messages_submitted: u32,
	},

	/// More UMP bytes submitted than the queue has room for.
	#[error("UMP bytes overflow: {bytes_submitted} submitted, {bytes_remaining} remaining")]
	UmpBytesOverflow {
		/// Bytes the queue can still take.
		bytes_remaining: u32,
		/// Bytes the candidate submitted.
		bytes_submitted: u32,
	},

	/// More DMP messages processed than were pending.
	#[error("DMP messages underflow: {messages_processed} processed, {messages_remaining} remaining")]
	DmpMessagesUnderflow {
		/// Messages pending in the downward queue.
		messages_remaining: u32,
		/// Messages the candidate claims to have processed.
		messages_processed: u32,
	},

	/// A code upgrade was applied with none pending.
	#[error("Applied a nonexistent code upgrade")]
	AppliedNonexistentCodeUpgrade,
}

/// Errors that can occur when validating a fragment against constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentValidityError {
	/// The provided persisted validation data does not match the one
	/// expected from the constraints and relay parent.
	#[error("Persisted validation data mismatch")]
	PersistedValidationDataMismatch,

	/// The validation code hash differs from the constraint's.
	#[error("Validation code mismatch: expected {expected:?}, got {got:?}")]
	ValidationCodeMismatch {
		/// Code hash the constraints require.
		expected: H256,
		/// Code hash the candidate declares.
		got: H256,
	},

	/// The relay parent precedes the minimum allowed by the constraints.
	#[error("Relay parent #{actual} is older than the minimum #{min}")]
	RelayParentTooOld {
		/// The minimum allowed relay-parent number.
		min: BlockNumber,
		/// The candidate's relay-parent number.
		actual: BlockNumber,
	},

	/// The candidate announces new code while upgrades are restricted.
	#[error("Code upgrade restricted")]
	CodeUpgradeRestricted,

	/// The announced code exceeds the maximum allowed size.
	#[error("Announced code size {announced} exceeds the maximum {max}")]
	CodeSizeTooLarge {
		/// Maximum code size the constraints allow.
		max: u32,
		/// Size of the announced code.
		announced: u32,
	},

	/// Pending downward messages were not processed when required.
	#[error("DMP advancement rule violated")]
	DmpAdvancementRule,

	/// Outbound HRMP recipients are not ascending or contain a duplicate.
	#[error("Horizontal message at index {0} has descending order or duplicate recipient")]
	HrmpMessagesDescendingOrDuplicate(usize),

	/// More outbound HRMP messages than allowed per candidate.
	#[error("HRMP messages per candidate overflow: {submitted} submitted, {max} allowed")]
	HrmpMessagesPerCandidateOverflow {
		/// Maximum messages per candidate.
		max: u32,
		/// Messages the candidate submitted.
		submitted: u32,
	},

	/// More upward messages than allowed per candidate.
	#[error("UMP messages per candidate overflow: {submitted} submitted, {max} allowed")]
	UmpMessagesPerCandidateOverflow {
		/// Maximum messages per candidate.
		max: u32,
		/// Messages the candidate submitted.
		submitted: u32,
	},

	/// Upward message framing failure.
	#[error("UMP signal error: {0}")]
	UmpSignals(#[from] UmpError),

	/// The candidate outputs violate the constraint state.
	#[error("Invalid outputs: {0}")]
	OutputsInvalid(#[from] ModificationError),
}

/// Fragment chain related errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentChainError {
	/// The candidate is already present in the chain or its storage.
	#[error("Candidate already known: {0:?}")]
	CandidateAlreadyKnown(H256),

	/// The candidate's output head equals its parent head.
	#[error("Candidate would introduce a zero-length cycle")]
	ZeroLengthCycle,

	/// The candidate's output closes a loop back into the chain.
	#[error("Candidate would introduce a cycle")]
	Cycle,

	/// The candidate's output duplicates a state already reached.
	#[error("Candidate would introduce two paths to the same state")]
	MultiplePaths,

	/// A backed candidate must first be introduced as seconded.
	#[error(
		"Attempting to directly introduce a Backed candidate. It should first be introduced as Seconded: {0:?}"
	)]
	IntroduceBackedCandidate(H256),

	/// The chain plus unconnected storage is at capacity.
	#[error("Too many candidates")]
	TooManyCandidates,

	/// The candidate's relay parent is not in the scope.
	#[error("Relay parent {0:?} not in scope")]
	RelayParentNotInScope(H256),

	/// The candidate's relay parent precedes the earliest relay parent of a
	/// candidate pending availability.
	#[error("Relay parent precedes a candidate pending availability")]
	RelayParentPrecedesCandidatePendingAvailability,

	/// The candidate forks off a candidate pending availability.
	#[error("Fork with a candidate pending availability")]
	ForkWithCandidatePendingAvailability,

	/// A sibling with a lower candidate hash already occupies the position.
	#[error("Fork choice rule")]
	ForkChoiceRule,

	/// The candidate's parent is referenced but absent from the chain.
	#[error("Parent candidate not found")]
	ParentCandidateNotFound,

	/// Constraints could not be computed for the candidate's position.
	#[error("Compute constraints: {0}")]
	ComputeConstraints(#[source] ModificationError),

	/// The candidate failed validation against its constraints.
	#[error("Check against constraints: {0}")]
	CheckAgainstConstraints(#[source] FragmentValidityError),

	/// The candidate's relay parent precedes its parent candidate's.
	#[error("Relay parent moved backwards")]
	RelayParentMovedBackwards,

	/// The candidate entry itself is malformed.
	#[error("Candidate entry: {0}")]
	CandidateEntry(#[from] CandidateEntryError),
}

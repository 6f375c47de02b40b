// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

/// Errors that can occur in the ticket lottery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LotteryError {
	/// A ring-VRF signature failed to verify.
	#[error("Ring VRF signature verification failed")]
	SignatureVerificationFailed,

	/// The ticket returned by the runtime does not match its ticket id.
	#[error("Ticket does not match its ticket id")]
	TicketMismatch,

	/// The lottery was queried before an epoch was installed.
	#[error("Lottery epoch is not initialized")]
	EpochNotInitialized,

	/// Submitting tickets to the chain failed.
	#[error("Ticket submission failed: {0}")]
	SubmissionFailed(String),

	/// The runtime query for slot ticket data failed.
	#[error("Runtime query failed: {0}")]
	RuntimeQueryFailed(String),
}

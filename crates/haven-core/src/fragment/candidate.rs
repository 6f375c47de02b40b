// SPDX-License-Identifier: GPL-3.0

//! Parachain candidate primitives and upward-message framing.

use crate::{
	error::UmpError,
	fragment::ParaId,
	primitives::{BlockNumber, Hash, blake2_256},
};
use scale::{Decode, Encode};

/// A candidate's hash: BLAKE2b-256 of its SCALE-encoded receipt.
pub type CandidateHash = Hash;

/// Parachain head data: an opaque blob interpreted only by the parachain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct HeadData(pub Vec<u8>);

impl HeadData {
	/// Hash of the head data.
	pub fn hash(&self) -> Hash {
		blake2_256(&self.0)
	}
}

/// The validation inputs persisted on the relay chain for a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PersistedValidationData {
	/// The parachain head the candidate builds on.
	pub parent_head: HeadData,
	/// Number of the candidate's relay parent.
	pub relay_parent_number: BlockNumber,
	/// Storage root of the candidate's relay parent.
	pub relay_parent_storage_root: Hash,
	/// Maximum proof-of-validity size in bytes.
	pub max_pov_size: u32,
}

impl PersistedValidationData {
	/// Hash of the SCALE encoding.
	pub fn hash(&self) -> Hash {
		blake2_256(&self.encode())
	}
}

/// An outbound horizontal (para-to-para) message.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct OutboundHrmpMessage {
	/// The message recipient.
	pub recipient: ParaId,
	/// The message payload.
	pub data: Vec<u8>,
}

/// The outputs a candidate commits to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct CandidateCommitments {
	/// Upward messages, possibly followed by UMP signals after the
	/// reserved separator.
	pub upward_messages: Vec<Vec<u8>>,
	/// Outbound horizontal messages, by ascending recipient.
	pub horizontal_messages: Vec<OutboundHrmpMessage>,
	/// New runtime code announced by the candidate, if any.
	pub new_validation_code: Option<Vec<u8>>,
	/// The head data produced by the candidate.
	pub head_data: HeadData,
	/// Number of downward messages the candidate processed.
	pub processed_downward_messages: u32,
	/// The HRMP watermark the candidate advanced to.
	pub hrmp_watermark: BlockNumber,
}

/// The descriptor half of a candidate receipt.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CandidateDescriptor {
	/// The parachain the candidate belongs to.
	pub para_id: ParaId,
	/// The relay-chain block the candidate is built on.
	pub relay_parent: Hash,
	/// Hash of the persisted validation data.
	pub persisted_validation_data_hash: Hash,
	/// Hash of the proof-of-validity block.
	pub pov_hash: Hash,
	/// Hash of the validation code the candidate is validated against.
	pub validation_code_hash: Hash,
}

/// A candidate receipt together with its commitments.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CommittedCandidateReceipt {
	/// The candidate descriptor.
	pub descriptor: CandidateDescriptor,
	/// The candidate's committed outputs.
	pub commitments: CandidateCommitments,
}

impl CommittedCandidateReceipt {
	/// The candidate hash.
	pub fn hash(&self) -> CandidateHash {
		blake2_256(&self.encode())
	}
}

/// Separator between plain upward messages and UMP signals: the empty
/// buffer.
pub const UMP_SEPARATOR: &[u8] = &[];

/// A signal a parachain sends to the relay chain via the UMP queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum UmpSignal {
	/// Selects the core the candidate is committed to.
	#[codec(index = 0)]
	SelectCore {
		/// Index into the sequence of assigned cores.
		core_selector: u8,
		/// The claim queue offset the selector applies at.
		claim_queue_offset: u8,
	},
}

/// The upward messages ahead of the first separator, i.e. with any UMP
/// signals stripped.
pub fn skip_ump_signals(messages: &[Vec<u8>]) -> &[Vec<u8>] {
	let end = messages
		.iter()
		.position(|message| message.as_slice() == UMP_SEPARATOR)
		.unwrap_or(messages.len());
	&messages[..end]
}

/// The UMP signal committed by the candidate, if any. At most one signal
/// may follow the separator.
pub fn core_selector(
	commitments: &CandidateCommitments,
) -> Result<Option<UmpSignal>, UmpError> {
	let mut after = commitments
		.upward_messages
		.iter()
		.skip_while(|message| message.as_slice() != UMP_SEPARATOR);
	if after.next().is_none() {
		// No separator at all.
		return Ok(None);
	}
	let Some(raw) = after.next() else { return Ok(None) };
	let signal =
		UmpSignal::decode(&mut raw.as_slice()).map_err(|_| UmpError::MalformedUmpSignal)?;
	if after.next().is_some() {
		return Err(UmpError::TooManyUmpSignals);
	}
	Ok(Some(signal))
}

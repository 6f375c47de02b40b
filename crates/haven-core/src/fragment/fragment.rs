// SPDX-License-Identifier: GPL-3.0

//! A validated prospective candidate and its constraint check.

use crate::{
	error::FragmentValidityError,
	fragment::{
		candidate::{
			CandidateCommitments, HeadData, PersistedValidationData, skip_ump_signals,
		},
		constraints::{
			ConstraintModifications, Constraints, HrmpWatermarkUpdate,
			OutboundHrmpChannelModification, UpgradeRestriction,
		},
		core_selector,
	},
	primitives::{BlockNumber, Hash},
};
use std::{collections::HashMap, sync::Arc};

/// Relay-chain block information a fragment is anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayChainBlockInfo {
	/// The block hash.
	pub hash: Hash,
	/// The block number.
	pub number: BlockNumber,
	/// The block's storage root.
	pub storage_root: Hash,
}

/// The candidate data a fragment chain works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProspectiveCandidate {
	/// The candidate's committed outputs.
	pub commitments: CandidateCommitments,
	/// The persisted validation data the candidate was built against.
	pub persisted_validation_data: PersistedValidationData,
	/// Hash of the proof-of-validity block.
	pub pov_hash: Hash,
	/// Hash of the validation code.
	pub validation_code_hash: Hash,
}

/// A candidate validated against, and modifying, on-chain constraints.
#[derive(Debug, Clone)]
pub struct Fragment {
	relay_parent: RelayChainBlockInfo,
	operating_constraints: Constraints,
	candidate: Arc<ProspectiveCandidate>,
	modifications: ConstraintModifications,
}

impl Fragment {
	/// Validate `candidate` against `operating_constraints` under
	/// `relay_parent` and wrap it as a fragment.
	pub fn new(
		relay_parent: RelayChainBlockInfo,
		operating_constraints: Constraints,
		candidate: Arc<ProspectiveCandidate>,
	) -> Result<Self, FragmentValidityError> {
		let modifications = Self::check_against_constraints(
			&relay_parent,
			&operating_constraints,
			&candidate.commitments,
			&candidate.validation_code_hash,
			&candidate.persisted_validation_data,
		)?;
		Ok(Self { relay_parent, operating_constraints, candidate, modifications })
	}

	/// The fragment's relay parent.
	pub fn relay_parent(&self) -> &RelayChainBlockInfo {
		&self.relay_parent
	}

	/// The constraints the fragment was validated against.
	pub fn operating_constraints(&self) -> &Constraints {
		&self.operating_constraints
	}

	/// The underlying candidate.
	pub fn candidate(&self) -> &ProspectiveCandidate {
		&self.candidate
	}

	/// A cheap clone of the candidate handle.
	pub fn candidate_clone(&self) -> Arc<ProspectiveCandidate> {
		self.candidate.clone()
	}

	/// The modifications this fragment applies to its constraints.
	pub fn constraint_modifications(&self) -> &ConstraintModifications {
		&self.modifications
	}

	/// Compute the modifications the commitments imply and validate them
	/// against `constraints`.
	pub fn check_against_constraints(
		relay_parent: &RelayChainBlockInfo,
		constraints: &Constraints,
		commitments: &CandidateCommitments,
		validation_code_hash: &Hash,
		persisted_validation_data: &PersistedValidationData,
	) -> Result<ConstraintModifications, FragmentValidityError> {
		// Outbound HRMP must name ascending, unique recipients.
		let mut outbound_hrmp: HashMap<_, OutboundHrmpChannelModification> = HashMap::new();
		let mut last_recipient = None;
		for (index, message) in commitments.horizontal_messages.iter().enumerate() {
			if last_recipient.is_some_and(|last| last >= message.recipient) {
				return Err(FragmentValidityError::HrmpMessagesDescendingOrDuplicate(index));
			}
			last_recipient = Some(message.recipient);
			let record = outbound_hrmp.entry(message.recipient).or_default();
			record.bytes_submitted += message.data.len() as u32;
			record.messages_submitted += 1;
		}

		// Signals after the separator do not count towards UMP usage, but
		// their framing must be valid.
		core_selector(commitments).map_err(FragmentValidityError::UmpSignals)?;
		let upward_messages = skip_ump_signals(&commitments.upward_messages);
		let ump_bytes_sent = upward_messages.iter().map(|message| message.len() as u32).sum();

		let modifications = ConstraintModifications {
			required_parent: Some(commitments.head_data.clone()),
			hrmp_watermark: Some(if commitments.hrmp_watermark == relay_parent.number {
				HrmpWatermarkUpdate::Head(commitments.hrmp_watermark)
			} else {
				HrmpWatermarkUpdate::Trunk(commitments.hrmp_watermark)
			}),
			outbound_hrmp,
			ump_messages_sent: upward_messages.len() as u32,
			ump_bytes_sent,
			dmp_messages_processed: commitments.processed_downward_messages,
			code_upgrade_applied: constraints
				.future_validation_code
				.is_some_and(|(applies_at, _)| relay_parent.number >= applies_at),
		};

		validate_against_constraints(
			constraints,
			relay_parent,
			commitments,
			persisted_validation_data,
			validation_code_hash,
			&modifications,
		)?;
		Ok(modifications)
	}
}

fn validate_against_constraints(
	constraints: &Constraints,
	relay_parent: &RelayChainBlockInfo,
	commitments: &CandidateCommitments,
	persisted_validation_data: &PersistedValidationData,
	validation_code_hash: &Hash,
	modifications: &ConstraintModifications,
) -> Result<(), FragmentValidityError> {
	let expected_pvd = PersistedValidationData {
		parent_head: constraints.required_parent.clone(),
		relay_parent_number: relay_parent.number,
		relay_parent_storage_root: relay_parent.storage_root,
		max_pov_size: constraints.max_pov_size,
	};
	if expected_pvd != *persisted_validation_data {
		return Err(FragmentValidityError::PersistedValidationDataMismatch);
	}

	if constraints.validation_code_hash != *validation_code_hash {
		return Err(FragmentValidityError::ValidationCodeMismatch {
			expected: constraints.validation_code_hash,
			got: *validation_code_hash,
		});
	}

	if relay_parent.number < constraints.min_relay_parent_number {
		return Err(FragmentValidityError::RelayParentTooOld {
			min: constraints.min_relay_parent_number,
			actual: relay_parent.number,
		});
	}

	if commitments.new_validation_code.is_some()
		&& matches!(constraints.upgrade_restriction, Some(UpgradeRestriction::Present))
	{
		return Err(FragmentValidityError::CodeUpgradeRestricted);
	}

	let announced_code_size =
		commitments.new_validation_code.as_ref().map_or(0, |code| code.len() as u32);
	if announced_code_size > constraints.max_code_size {
		return Err(FragmentValidityError::CodeSizeTooLarge {
			max: constraints.max_code_size,
			announced: announced_code_size,
		});
	}

	if modifications.dmp_messages_processed == 0 {
		if let Some(first) = constraints.dmp_remaining_messages.first() {
			if *first <= relay_parent.number {
				return Err(FragmentValidityError::DmpAdvancementRule);
			}
		}
	}

	if commitments.horizontal_messages.len() as u32 > constraints.max_hrmp_num_per_candidate {
		return Err(FragmentValidityError::HrmpMessagesPerCandidateOverflow {
			max: constraints.max_hrmp_num_per_candidate,
			submitted: commitments.horizontal_messages.len() as u32,
		});
	}

	if modifications.ump_messages_sent > constraints.max_ump_num_per_candidate {
		return Err(FragmentValidityError::UmpMessagesPerCandidateOverflow {
			max: constraints.max_ump_num_per_candidate,
			submitted: modifications.ump_messages_sent,
		});
	}

	constraints.check_modifications(modifications)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fragment::{
		UmpSignal,
		candidate::{OutboundHrmpMessage, UMP_SEPARATOR},
		constraints::{InboundHrmpLimitations, OutboundHrmpChannelLimitations},
	};
	use scale::Encode;

	fn constraints() -> Constraints {
		Constraints {
			min_relay_parent_number: 4,
			max_pov_size: 1024,
			max_code_size: 100,
			ump_remaining: 10,
			ump_remaining_bytes: 1000,
			max_ump_num_per_candidate: 3,
			dmp_remaining_messages: Vec::new(),
			hrmp_inbound: InboundHrmpLimitations { valid_watermarks: vec![5, 6] },
			hrmp_channels_out: HashMap::from([(
				8,
				OutboundHrmpChannelLimitations { bytes_remaining: 50, messages_remaining: 5 },
			)]),
			max_hrmp_num_per_candidate: 2,
			required_parent: HeadData(vec![7]),
			validation_code_hash: Hash::repeat_byte(0xcc),
			upgrade_restriction: None,
			future_validation_code: None,
		}
	}

	fn relay_parent() -> RelayChainBlockInfo {
		RelayChainBlockInfo {
			hash: Hash::repeat_byte(1),
			number: 6,
			storage_root: Hash::repeat_byte(2),
		}
	}

	fn candidate() -> ProspectiveCandidate {
		ProspectiveCandidate {
			commitments: CandidateCommitments {
				head_data: HeadData(vec![8]),
				hrmp_watermark: 6,
				..Default::default()
			},
			persisted_validation_data: PersistedValidationData {
				parent_head: HeadData(vec![7]),
				relay_parent_number: 6,
				relay_parent_storage_root: Hash::repeat_byte(2),
				max_pov_size: 1024,
			},
			pov_hash: Hash::repeat_byte(3),
			validation_code_hash: Hash::repeat_byte(0xcc),
		}
	}

	#[test]
	fn a_conforming_candidate_becomes_a_fragment() {
		let fragment =
			Fragment::new(relay_parent(), constraints(), Arc::new(candidate())).unwrap();
		let modifications = fragment.constraint_modifications();
		assert_eq!(modifications.required_parent, Some(HeadData(vec![8])));
		assert_eq!(modifications.hrmp_watermark, Some(HrmpWatermarkUpdate::Head(6)));
	}

	#[test]
	fn wrong_pvd_is_rejected() {
		let mut candidate = candidate();
		candidate.persisted_validation_data.max_pov_size = 1;
		assert_eq!(
			Fragment::new(relay_parent(), constraints(), Arc::new(candidate)).unwrap_err(),
			FragmentValidityError::PersistedValidationDataMismatch,
		);
	}

	#[test]
	fn old_relay_parent_is_rejected() {
		let mut relay_parent = relay_parent();
		relay_parent.number = 3;
		let mut candidate = candidate();
		candidate.persisted_validation_data.relay_parent_number = 3;
		candidate.commitments.hrmp_watermark = 3;
		assert_eq!(
			Fragment::new(relay_parent, constraints(), Arc::new(candidate)).unwrap_err(),
			FragmentValidityError::RelayParentTooOld { min: 4, actual: 3 },
		);
	}

	#[test]
	fn code_upgrades_respect_the_restriction() {
		let mut constraints = constraints();
		constraints.upgrade_restriction = Some(UpgradeRestriction::Present);
		let mut candidate = candidate();
		candidate.commitments.new_validation_code = Some(vec![0; 10]);
		assert_eq!(
			Fragment::new(relay_parent(), constraints, Arc::new(candidate)).unwrap_err(),
			FragmentValidityError::CodeUpgradeRestricted,
		);
	}

	#[test]
	fn oversized_code_is_rejected() {
		let mut candidate = candidate();
		candidate.commitments.new_validation_code = Some(vec![0; 101]);
		assert_eq!(
			Fragment::new(relay_parent(), constraints(), Arc::new(candidate)).unwrap_err(),
			FragmentValidityError::CodeSizeTooLarge { max: 100, announced: 101 },
		);
	}

	#[test]
	fn hrmp_recipients_must_ascend() {
		let mut candidate = candidate();
		candidate.commitments.horizontal_messages = vec![
			OutboundHrmpMessage { recipient: 8, data: vec![1] },
			OutboundHrmpMessage { recipient: 8, data: vec![2] },
		];
		assert_eq!(
			Fragment::new(relay_parent(), constraints(), Arc::new(candidate)).unwrap_err(),
			FragmentValidityError::HrmpMessagesDescendingOrDuplicate(1),
		);
	}

	#[test]
	fn dmp_must_advance_when_messages_are_due() {
		let mut constraints = constraints();
		constraints.dmp_remaining_messages = vec![5];
		assert_eq!(
			Fragment::new(relay_parent(), constraints, Arc::new(candidate())).unwrap_err(),
			FragmentValidityError::DmpAdvancementRule,
		);
	}

	#[test]
	fn ump_signals_do_not_count_towards_the_cap() {
		let mut candidate = candidate();
		candidate.commitments.upward_messages = vec![
			vec![1],
			vec![2],
			vec![3],
			UMP_SEPARATOR.to_vec(),
			UmpSignal::SelectCore { core_selector: 0, claim_queue_offset: 0 }.encode(),
		];
		let fragment =
			Fragment::new(relay_parent(), constraints(), Arc::new(candidate)).unwrap();
		assert_eq!(fragment.constraint_modifications().ump_messages_sent, 3);
		assert_eq!(fragment.constraint_modifications().ump_bytes_sent, 3);
	}
}

// SPDX-License-Identifier: GPL-3.0

//! On-chain inclusion constraints and the modifications candidates apply
//! to them.
//!
//! [`Constraints`] capture the relay-chain state a parachain candidate
//! must respect; [`ConstraintModifications`] describe what a chained
//! prospective candidate changes about that state. Modifications stack, so
//! the constraints for the n-th candidate in a fragment chain are the base
//! constraints with the cumulative modifications of its predecessors
//! applied.

use crate::{
	error::ModificationError,
	fragment::{ParaId, candidate::HeadData},
	primitives::{BlockNumber, Hash},
};
use std::collections::HashMap;

/// Restrictions on inbound HRMP watermark advancement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundHrmpLimitations {
	/// Relay-chain block numbers a watermark may legally advance to, in
	/// ascending order.
	pub valid_watermarks: Vec<BlockNumber>,
}

/// Remaining capacity of one outbound HRMP channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundHrmpChannelLimitations {
	/// Bytes the channel can still take.
	pub bytes_remaining: u32,
	/// Messages the channel can still take.
	pub messages_remaining: u32,
}

/// An active restriction on runtime upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRestriction {
	/// Upgrades are disallowed at the moment.
	Present,
}

/// Constraints on the actions of a prospective parachain candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
	/// Minimum allowed relay-parent number.
	pub min_relay_parent_number: BlockNumber,
	/// Maximum proof-of-validity size in bytes.
	pub max_pov_size: u32,
	/// Maximum new validation code size in bytes.
	pub max_code_size: u32,
	/// Upward messages the relay chain can still accept.
	pub ump_remaining: u32,
	/// Upward-message bytes the relay chain can still accept.
	pub ump_remaining_bytes: u32,
	/// Maximum upward messages a single candidate may send.
	pub max_ump_num_per_candidate: u32,
	/// Relay-chain numbers of the pending downward messages, ascending.
	pub dmp_remaining_messages: Vec<BlockNumber>,
	/// Inbound HRMP watermark restrictions.
	pub hrmp_inbound: InboundHrmpLimitations,
	/// Remaining capacity per outbound HRMP channel.
	pub hrmp_channels_out: HashMap<ParaId, OutboundHrmpChannelLimitations>,
	/// Maximum horizontal messages a single candidate may send.
	pub max_hrmp_num_per_candidate: u32,
	/// The parachain head the next candidate must build on.
	pub required_parent: HeadData,
	/// Hash of the validation code in force.
	pub validation_code_hash: Hash,
	/// Whether runtime upgrades are currently restricted.
	pub upgrade_restriction: Option<UpgradeRestriction>,
	/// A code upgrade already scheduled on chain: the block it applies at
	/// and the hash of the code taking over.
	pub future_validation_code: Option<(BlockNumber, Hash)>,
}

impl Constraints {
	/// Apply `modifications`, producing the constraints seen by the next
	/// candidate in the chain.
	pub fn apply_modifications(
		&self,
		modifications: &ConstraintModifications,
	) -> Result<Self, ModificationError> {
		let mut new = self.clone();

		if let Some(required_parent) = &modifications.required_parent {
			new.required_parent = required_parent.clone();
		}

		if let Some(update) = &modifications.hrmp_watermark {
			let watermark = update.watermark();
			match update {
				HrmpWatermarkUpdate::Head(_) => {},
				HrmpWatermarkUpdate::Trunk(_) => {
					// A trunk update must land on a valid watermark.
					if !new.hrmp_inbound.valid_watermarks.contains(&watermark) {
						return Err(ModificationError::DisallowedHrmpWatermark(watermark));
					}
				},
			}
			new.hrmp_inbound.valid_watermarks.retain(|valid| *valid > watermark);
		}

		for (recipient, outbound) in &modifications.outbound_hrmp {
			let channel = new
				.hrmp_channels_out
				.get_mut(recipient)
				.ok_or(ModificationError::NoSuchHrmpChannel(*recipient))?;
			channel.bytes_remaining = channel
				.bytes_remaining
				.checked_sub(outbound.bytes_submitted)
				.ok_or(ModificationError::HrmpBytesOverflow {
					para_id: *recipient,
					bytes_remaining: channel.bytes_remaining,
					bytes_submitted: outbound.bytes_submitted,
				})?;
			channel.messages_remaining = channel
				.messages_remaining
				.checked_sub(outbound.messages_submitted)
				.ok_or(ModificationError::HrmpMessagesOverflow {
					para_id: *recipient,
					messages_remaining: channel.messages_remaining,
					messages_submitted: outbound.messages_submitted,
				})?;
		}

		new.ump_remaining = new.ump_remaining.checked_sub(modifications.ump_messages_sent).ok_or(
			ModificationError::UmpMessagesOverflow {
				messages_remaining: new.ump_remaining,
				messages_submitted: modifications.ump_messages_sent,
			},
		)?;
		new.ump_remaining_bytes = new
			.ump_remaining_bytes
			.checked_sub(modifications.ump_bytes_sent)
			.ok_or(ModificationError::UmpBytesOverflow {
				bytes_remaining: new.ump_remaining_bytes,
				bytes_submitted: modifications.ump_bytes_sent,
			})?;

		let processed = modifications.dmp_messages_processed as usize;
		if processed > new.dmp_remaining_messages.len() {
			return Err(ModificationError::DmpMessagesUnderflow {
				messages_remaining: new.dmp_remaining_messages.len() as u32,
				messages_processed: modifications.dmp_messages_processed,
			});
		}
		new.dmp_remaining_messages.drain(..processed);

		if modifications.code_upgrade_applied {
			let (_, code_hash) = new
				.future_validation_code
				.take()
				.ok_or(ModificationError::AppliedNonexistentCodeUpgrade)?;
			new.validation_code_hash = code_hash;
		}

		Ok(new)
	}

	/// Whether `modifications` could legally be applied.
	pub fn check_modifications(
		&self,
		modifications: &ConstraintModifications,
	) -> Result<(), ModificationError> {
		self.apply_modifications(modifications).map(|_| ())
	}
}

/// An update to the inbound HRMP watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrmpWatermarkUpdate {
	/// The watermark advanced to the relay parent itself.
	Head(BlockNumber),
	/// The watermark advanced to an earlier relay-chain block.
	Trunk(BlockNumber),
}

impl HrmpWatermarkUpdate {
	/// The watermark value.
	pub fn watermark(&self) -> BlockNumber {
		match self {
			HrmpWatermarkUpdate::Head(number) | HrmpWatermarkUpdate::Trunk(number) => *number,
		}
	}
}

/// What one candidate submitted on one outbound HRMP channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundHrmpChannelModification {
	/// Bytes submitted on the channel.
	pub bytes_submitted: u32,
	/// Messages submitted on the channel.
	pub messages_submitted: u32,
}

/// The modifications a prospective candidate applies to its constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintModifications {
	/// The head the next candidate builds on, when changed.
	pub required_parent: Option<HeadData>,
	/// The HRMP watermark update, when advanced.
	pub hrmp_watermark: Option<HrmpWatermarkUpdate>,
	/// Per-recipient outbound HRMP usage.
	pub outbound_hrmp: HashMap<ParaId, OutboundHrmpChannelModification>,
	/// Upward messages sent.
	pub ump_messages_sent: u32,
	/// Upward-message bytes sent.
	pub ump_bytes_sent: u32,
	/// Downward messages processed.
	pub dmp_messages_processed: u32,
	/// Whether a scheduled code upgrade was applied.
	pub code_upgrade_applied: bool,
}

impl ConstraintModifications {
	/// The modification that does nothing.
	pub fn identity() -> Self {
		Self::default()
	}

	/// Stack `other` on top of this one, as if applied afterwards.
	pub fn stack(&mut self, other: &Self) {
		if let Some(required_parent) = &other.required_parent {
			self.required_parent = Some(required_parent.clone());
		}
		if let Some(watermark) = other.hrmp_watermark {
			self.hrmp_watermark = Some(watermark);
		}
		for (recipient, outbound) in &other.outbound_hrmp {
			let record = self.outbound_hrmp.entry(*recipient).or_default();
			record.bytes_submitted += outbound.bytes_submitted;
			record.messages_submitted += outbound.messages_submitted;
		}
		self.ump_messages_sent += other.ump_messages_sent;
		self.ump_bytes_sent += other.ump_bytes_sent;
		self.dmp_messages_processed += other.dmp_messages_processed;
		self.code_upgrade_applied |= other.code_upgrade_applied;
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Ticket types and the ticket-id threshold.

use crate::sassafras::vrf::{RingVrfSignature, VrfPublic, VrfSignature};
use scale::{Decode, Encode};
use sp_core::U256;

/// A ticket identifier: the low 128 bits of the ticket VRF output.
pub type TicketId = u128;

/// The public part of a ticket, submitted on chain.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TicketBody {
	/// The attempt index the ticket was generated with.
	pub attempt_index: u32,
	/// Ephemeral public key, erased after the slot is claimed.
	pub erased_public: VrfPublic,
	/// Public key revealed when claiming the slot.
	pub revealed_public: VrfPublic,
}

/// A ticket body plus the ring signature proving it came from some
/// epoch validator.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TicketEnvelope {
	/// The ticket body.
	pub body: TicketBody,
	/// Ring-VRF signature over the body.
	pub signature: RingVrfSignature,
}

/// A proof of the right to author a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotLeadership {
	/// Claim via a ticket won in the lottery.
	Primary {
		/// Signature over the claim transcript and the revealed key input.
		signature: VrfSignature,
		/// The ticket being redeemed.
		ticket: TicketBody,
	},
	/// Claim via the fallback author rotation.
	Secondary {
		/// Signature over the slot-claim transcript.
		signature: VrfSignature,
	},
}

/// Maximum ticket-id value eligible for slot assignment in an epoch.
///
/// Computed as `TicketId::MAX · (redundancy · slots) / (attempts ·
/// validators)`, saturating at `TicketId::MAX`; zero when
/// `attempts · validators` is zero.
pub fn ticket_id_threshold(
	redundancy: u32,
	slots: u32,
	attempts: u32,
	validators: u32,
) -> TicketId {
	let denominator = attempts as u64 * validators as u64;
	if denominator == 0 {
		return 0;
	}
	let numerator = redundancy as u64 * slots as u64;
	let scaled = U256::from(TicketId::MAX) * U256::from(numerator) / U256::from(denominator);
	scaled.try_into().unwrap_or(TicketId::MAX)
}

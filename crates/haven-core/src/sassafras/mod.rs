// SPDX-License-Identifier: GPL-3.0

//! SASSAFRAS slot lottery: anonymous slot assignment via ring-VRF
//! tickets.
//!
//! # Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       SassafrasLottery                          │
//! │                                                                 │
//! │  change_epoch ──► generate tickets for the NEXT epoch           │
//! │                        │                                        │
//! │                        ▼                                        │
//! │     ticket-id VRF ──► threshold filter ──► ring-sign bodies     │
//! │                        │                                        │
//! │                        ▼                                        │
//! │            submit TicketEnvelopes (unsigned extrinsic)          │
//! │                                                                 │
//! │  slot_leadership ──► our ticket? primary claim : secondary      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The VRF transcript composition is fixed in [`vrf`]; the proof system
//! is pluggable behind [`vrf::VrfProvider`].

pub mod lottery;
pub mod tickets;
pub mod vrf;

pub use lottery::{
	AuthorityIndex, EpochNumber, SassafrasApi, SassafrasLottery, SlotNumber,
	secondary_slot_author,
};
pub use tickets::{SlotLeadership, TicketBody, TicketEnvelope, TicketId, ticket_id_threshold};
pub use vrf::{
	DevVrfProvider, RingProver, RingVrfSignature, VrfInput, VrfKeypair, VrfPreOutput, VrfProvider,
	VrfPublic, VrfSecret, VrfSignData, VrfSignature,
};

/// Epoch randomness, as produced by the randomness beacon.
pub type Randomness = [u8; 32];

// SPDX-License-Identifier: GPL-3.0

//! Prospective-parachains fragment chains.
//!
//! A validator keeps, per parachain and per relay-chain leaf, a chain of
//! backed candidate fragments that satisfy the on-chain inclusion
//! constraints, plus an "unconnected" storage of candidates that may join
//! the chain later. Parachains refer to their parent by head data, not by
//! candidate hash, so the chain guards against forks, cycles and multiple
//! paths to the same head state.
//!
//! # Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        FragmentChain                            │
//! │                                                                 │
//! │   Scope ─────► relay parent + ancestors + base constraints      │
//! │                                                                 │
//! │   BackedChain ────► best linear chain of validated fragments    │
//! │                                                                 │
//! │   CandidateStorage ─► unconnected potential candidates          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Candidates enter as seconded, become backed via
//! [`FragmentChain::candidate_backed`], and leave the chain when the
//! relay-chain leaf advances and a new chain is populated under the new
//! scope.

pub mod candidate;
pub mod chain;
pub mod constraints;
pub mod fragment;
pub mod scope;
pub mod storage;

pub use candidate::{
	CandidateCommitments, CandidateDescriptor, CandidateHash, CommittedCandidateReceipt, HeadData,
	OutboundHrmpMessage, PersistedValidationData, UMP_SEPARATOR, UmpSignal, core_selector,
	skip_ump_signals,
};
pub use chain::{
	Ancestors, BackedChain, FragmentChain, FragmentNode, HypotheticalCandidate,
	HypotheticalOrConcreteCandidate,
};
pub use constraints::{
	ConstraintModifications, Constraints, HrmpWatermarkUpdate, InboundHrmpLimitations,
	OutboundHrmpChannelLimitations, OutboundHrmpChannelModification, UpgradeRestriction,
};
pub use fragment::{Fragment, ProspectiveCandidate, RelayChainBlockInfo};
pub use scope::{PendingAvailability, Scope};
pub use storage::{CandidateEntry, CandidateState, CandidateStorage};

/// A parachain identifier.
pub type ParaId = u32;

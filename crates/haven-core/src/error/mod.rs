// SPDX-License-Identifier: GPL-3.0

//! Error types for the storage and consensus core.
//!
//! This module contains all error types used throughout the crate,
//! organized by subsystem:
//!
//! - [`codec::CodecError`] - Errors from trie node encoding/decoding.
//! - [`database::DatabaseError`] - Errors from the column-keyed backend.
//! - [`trie::TrieError`] - Errors from trie operations and batches.
//! - [`pruner::PrunerError`] - Errors from the trie pruner.
//! - [`blockchain::BlockTreeError`] - Errors from the block tree.
//! - [`schedule::ScheduleError`] - Errors from the authority schedule tree.
//! - [`fragment::FragmentChainError`] - Errors from the fragment chain.
//! - [`lottery::LotteryError`] - Errors from the ticket lottery.
//!
//! Each layer returns its own kind; higher layers wrap lower errors with
//! `#[from]` instead of translating them, so root causes remain visible.

pub mod blockchain;
pub mod codec;
pub mod database;
pub mod fragment;
pub mod lottery;
pub mod pruner;
pub mod schedule;
pub mod trie;

pub use blockchain::BlockTreeError;
pub use codec::CodecError;
pub use database::DatabaseError;
pub use fragment::{
	CandidateEntryError, FragmentChainError, FragmentValidityError, ModificationError, ScopeError,
	UmpError,
};
pub use lottery::LotteryError;
pub use pruner::PrunerError;
pub use schedule::ScheduleError;
pub use trie::TrieError;

// SPDX-License-Identifier: GPL-3.0

//! Storage and consensus core for a Polkadot-compatible blockchain host.
//!
//! This crate provides the state and consensus machinery a host node is
//! built around, leaving networking, RPC and runtime execution to its
//! embedders:
//!
//! - a Merkle-Patricia [`trie`] with the Polkadot binary node codec,
//!   hash-addressed persistence, copy-on-write batches, Merkle proofs and
//!   a reference-counted pruner;
//! - a column-keyed [`database`] abstraction with atomic batches and
//!   ordered cursors;
//! - the fork-aware [`blockchain`] block tree with finalization;
//! - the [`runtime_upgrades`] tracker mapping blocks to the state their
//!   runtime code was last changed at;
//! - the GRANDPA authority [`schedule`] tree;
//! - the prospective-parachains [`fragment`] chain engine;
//! - the [`sassafras`] ring-VRF ticket lottery.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌─────────────────────┐
//! │  blockchain  │──►│ runtime_upgrades │   │  fragment chains    │
//! │ (block tree) │   └──────────────────┘   │  (per relay leaf)   │
//! │      │       │──►┌──────────────────┐   └─────────────────────┘
//! │  finalize    │   │     schedule     │   ┌─────────────────────┐
//! └──────┬───────┘   └──────────────────┘   │  sassafras lottery  │
//!        ▼                                  └─────────────────────┘
//! ┌──────────────────────────────────────────────────────────────┐
//! │   trie: batches ─► serializer ─► codec;  pruner on finalize  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    database (columns, batches)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod blockchain;
pub mod database;
pub mod error;
pub mod fragment;
pub mod primitives;
pub mod runtime_upgrades;
pub mod sassafras;
pub mod schedule;
pub mod trie;

pub use blockchain::BlockTree;
pub use database::{Database, MemoryDatabase, Space, WriteBatch};
pub use error::{
	BlockTreeError, CodecError, DatabaseError, FragmentChainError, LotteryError, PrunerError,
	ScheduleError, TrieError,
};
pub use fragment::{FragmentChain, Scope};
pub use primitives::{BlockHeader, BlockInfo, BlockNumber, Digest, DigestItem, Hash};
pub use runtime_upgrades::RuntimeUpgradeTracker;
pub use sassafras::SassafrasLottery;
pub use schedule::ScheduleTree;
pub use trie::{
	EphemeralBatch, PersistentBatch, StateVersion, StorageProof, TopperBatch, Trie, TriePruner,
	TrieStorage,
};

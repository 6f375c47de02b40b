// SPDX-License-Identifier: GPL-3.0

//! The Merkle-Patricia state trie and its persistence machinery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Trie batches                              │
//! │     ephemeral (read) · persistent (copy-on-write) · topper      │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     In-memory trie (tree)                       │
//! │        leaves · branches · dummies, lazily materialized         │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │ codec (encode/decode)           │
//!                 ▼                                 ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────────┐
//! │          Serializer           │  │      Pruner · Proofs         │
//! │  children-first store, lazy   │  │  refcounts per node; node-   │
//! │  retrieve                     │  │  set proofs over lookups     │
//! └───────────────┬───────────────┘  └──────────────┬───────────────┘
//!                 └────────────────┬────────────────┘
//!                                  ▼
//!                         Database (columns)
//! ```

pub mod batch;
pub mod codec;
pub mod nibbles;
pub mod node;
pub mod proof;
pub mod pruner;
pub mod serializer;
pub mod tree;

pub use batch::{
	CHILD_STORAGE_PREFIX, EphemeralBatch, PersistentBatch, TopperBatch, TrieBatch, TrieBatchMut,
	TrieStorage, child_trie_key,
};
pub use codec::empty_trie_root;
pub use nibbles::Nibbles;
pub use node::{Branch, Dummy, Leaf, MerkleValue, Node, NodeValue};
pub use proof::{StorageProof, generate_proof, read_proof_value, verify_proof};
pub use pruner::{PrunerConfig, TriePruner};
pub use serializer::TrieSerializer;
pub use tree::{NodeLoader, Trie, TrieCursor};

/// The state version governing how values are stored.
///
/// V0 always embeds values in the node encoding; V1 moves values longer
/// than 32 bytes out of line, referenced by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateVersion {
	/// Values are always inline.
	V0,
	/// Long values are stored separately, referenced by hash.
	V1,
}

// SPDX-License-Identifier: GPL-3.0

//! Core blockchain primitives shared by every subsystem in the crate.
//!
//! These types mirror the wire-visible Substrate structures: a block header
//! SCALE-encodes with a compact block number, and its hash is the
//! BLAKE2b-256 of that encoding.

use scale::{Decode, Encode};
use sp_core::H256;

/// Block height within a chain.
pub type BlockNumber = u32;

/// A 256-bit hash, used for block hashes, state roots and candidate hashes.
pub type Hash = H256;

/// Engine identifier carried by consensus-related digest items.
pub type ConsensusEngineId = [u8; 4];

/// The `GRANDPA` finality engine id.
pub const GRANDPA_ENGINE_ID: ConsensusEngineId = *b"FRNK";

/// The `BEEFY` payload engine id.
pub const BEEFY_ENGINE_ID: ConsensusEngineId = *b"BEEF";

/// The `SASSAFRAS` block production engine id.
pub const SASSAFRAS_ENGINE_ID: ConsensusEngineId = *b"SASS";

/// BLAKE2b-256 of `data`, as a [`Hash`].
pub fn blake2_256(data: &[u8]) -> Hash {
	H256(sp_core::hashing::blake2_256(data))
}

/// Compact reference to a block: its height and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct BlockInfo {
	/// The block number (height).
	pub number: BlockNumber,
	/// The block hash.
	pub hash: Hash,
}

impl BlockInfo {
	/// Create a new block reference.
	pub fn new(number: BlockNumber, hash: Hash) -> Self {
		Self { number, hash }
	}
}

impl core::fmt::Debug for BlockInfo {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "#{} ({:?})", self.number, self.hash)
	}
}

impl core::fmt::Display for BlockInfo {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "#{} (0x{})", self.number, hex::encode(&self.hash.0[..4]))
	}
}

/// A single digest item attached to a block header.
///
/// Only the items the core reacts to are modelled; anything else decodes
/// into [`DigestItem::Other`]. Codec indices match the Substrate layout so
/// headers produced elsewhere decode unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum DigestItem {
	/// Opaque digest item, ignored by the core.
	#[codec(index = 0)]
	Other(Vec<u8>),
	/// A consensus message from the runtime to the consensus engine.
	#[codec(index = 4)]
	Consensus(ConsensusEngineId, Vec<u8>),
	/// The seal placed by the block author.
	#[codec(index = 5)]
	Seal(ConsensusEngineId, Vec<u8>),
	/// A pre-runtime digest placed by the block author for its engine.
	#[codec(index = 6)]
	PreRuntime(ConsensusEngineId, Vec<u8>),
	/// Marks a change of the runtime environment (e.g. a `:code` upgrade).
	#[codec(index = 8)]
	RuntimeEnvironmentUpdated,
}

/// The ordered list of digest items of a header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Digest {
	/// Digest items in the order they were pushed.
	pub logs: Vec<DigestItem>,
}

impl Digest {
	/// Whether any item marks a runtime environment change.
	pub fn runtime_environment_updated(&self) -> bool {
		self.logs.iter().any(|item| matches!(item, DigestItem::RuntimeEnvironmentUpdated))
	}

	/// Iterate the payloads of `Consensus` items for the given engine.
	pub fn consensus_payloads(&self, engine: ConsensusEngineId) -> impl Iterator<Item = &[u8]> {
		self.logs.iter().filter_map(move |item| match item {
			DigestItem::Consensus(id, payload) if *id == engine => Some(payload.as_slice()),
			_ => None,
		})
	}
}

/// A block header.
///
/// The block number encodes as a SCALE compact integer, which makes the
/// encoding (and therefore the block hash) identical to the one produced
/// by Substrate-based hosts.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlockHeader {
	/// Hash of the parent block.
	pub parent_hash: Hash,
	/// The block number (height).
	#[codec(compact)]
	pub number: BlockNumber,
	/// Root of the state trie after executing this block.
	pub state_root: Hash,
	/// Merkle root of the block's extrinsics.
	pub extrinsics_root: Hash,
	/// Auxiliary consensus data.
	pub digest: Digest,
}

impl BlockHeader {
	/// The hash of this header: BLAKE2b-256 of its SCALE encoding.
	pub fn hash(&self) -> Hash {
		blake2_256(&self.encode())
	}

	/// The `(number, hash)` reference of this header.
	pub fn block_info(&self) -> BlockInfo {
		BlockInfo { number: self.number, hash: self.hash() }
	}
}

/// An opaque extrinsic within a block body.
pub type Extrinsic = Vec<u8>;

/// A block body: the ordered extrinsics.
pub type BlockBody = Vec<Extrinsic>;

/// A finality justification, tagged with the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Justification {
	/// The consensus engine the justification belongs to.
	pub engine: ConsensusEngineId,
	/// The engine-specific encoded justification.
	pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_hash_covers_digest() {
		let mut header = BlockHeader {
			parent_hash: H256::repeat_byte(1),
			number: 7,
			state_root: H256::repeat_byte(2),
			extrinsics_root: H256::repeat_byte(3),
			digest: Digest::default(),
		};
		let base = header.hash();
		header.digest.logs.push(DigestItem::RuntimeEnvironmentUpdated);
		assert_ne!(base, header.hash());
	}

	#[test]
	fn header_roundtrips_through_scale() {
		let header = BlockHeader {
			parent_hash: H256::repeat_byte(9),
			number: 123_456,
			state_root: H256::repeat_byte(8),
			extrinsics_root: H256::repeat_byte(7),
			digest: Digest {
				logs: vec![
					DigestItem::PreRuntime(SASSAFRAS_ENGINE_ID, vec![1, 2, 3]),
					DigestItem::Consensus(GRANDPA_ENGINE_ID, vec![4, 5]),
					DigestItem::RuntimeEnvironmentUpdated,
				],
			},
		};
		let decoded = BlockHeader::decode(&mut header.encode().as_slice()).unwrap();
		assert_eq!(header, decoded);
	}

	#[test]
	fn digest_filters_consensus_payloads_by_engine() {
		let digest = Digest {
			logs: vec![
				DigestItem::Consensus(GRANDPA_ENGINE_ID, vec![1]),
				DigestItem::Consensus(BEEFY_ENGINE_ID, vec![2]),
				DigestItem::Consensus(GRANDPA_ENGINE_ID, vec![3]),
			],
		};
		let grandpa: Vec<_> = digest.consensus_payloads(GRANDPA_ENGINE_ID).collect();
		assert_eq!(grandpa, vec![&[1][..], &[3][..]]);
	}
}

// SPDX-License-Identifier: GPL-3.0

//! The scope a fragment chain operates under.

use crate::{
	error::ScopeError,
	fragment::{candidate::CandidateHash, constraints::Constraints, fragment::RelayChainBlockInfo},
	primitives::{BlockNumber, Hash},
};
use std::collections::{BTreeMap, HashMap};

/// A candidate existing on-chain but pending availability, for special
/// treatment in the [`Scope`].
#[derive(Debug, Clone)]
pub struct PendingAvailability {
	/// The candidate hash.
	pub candidate_hash: CandidateHash,
	/// The block info of the candidate's relay parent.
	pub relay_parent: RelayChainBlockInfo,
}

/// The scope of a fragment chain: the relay parent being built on, the
/// ancestors candidates may anchor to, the candidates pending
/// availability and the base constraints.
#[derive(Debug, Clone)]
pub struct Scope {
	relay_parent: RelayChainBlockInfo,
	ancestors: BTreeMap<BlockNumber, RelayChainBlockInfo>,
	ancestors_by_hash: HashMap<Hash, RelayChainBlockInfo>,
	pending_availability: Vec<PendingAvailability>,
	base_constraints: Constraints,
	max_depth: usize,
}

impl Scope {
	/// Define a new scope.
	///
	/// Ancestors must be in reverse order, starting with the parent of
	/// `relay_parent` and proceeding backwards in block-number steps of
	/// one; anything else is rejected. Ancestors are only consumed down to
	/// the base constraints' `min_relay_parent_number`. Zero ancestors are
	/// allowed.
	pub fn with_ancestors(
		relay_parent: RelayChainBlockInfo,
		base_constraints: Constraints,
		pending_availability: Vec<PendingAvailability>,
		max_depth: usize,
		ancestors: impl IntoIterator<Item = RelayChainBlockInfo>,
	) -> Result<Self, ScopeError> {
		let mut ancestors_map = BTreeMap::new();
		let mut ancestors_by_hash = HashMap::new();

		let mut prev = relay_parent.number;
		for ancestor in ancestors {
			if prev == 0 || ancestor.number != prev - 1 {
				return Err(ScopeError::UnexpectedAncestor { number: ancestor.number, prev });
			}
			if prev == base_constraints.min_relay_parent_number {
				break;
			}
			prev = ancestor.number;
			ancestors_by_hash.insert(ancestor.hash, ancestor.clone());
			ancestors_map.insert(ancestor.number, ancestor);
		}

		Ok(Self {
			relay_parent,
			ancestors: ancestors_map,
			ancestors_by_hash,
			pending_availability,
			base_constraints,
			max_depth,
		})
	}

	/// The relay parent the chain is built on.
	pub fn relay_parent(&self) -> &RelayChainBlockInfo {
		&self.relay_parent
	}

	/// The base constraints of the scope.
	pub fn base_constraints(&self) -> &Constraints {
		&self.base_constraints
	}

	/// The maximum number of chained candidates past the base.
	pub fn max_depth(&self) -> usize {
		self.max_depth
	}

	/// The earliest relay parent a candidate may anchor to.
	pub fn earliest_relay_parent(&self) -> RelayChainBlockInfo {
		self.ancestors
			.iter()
			.next()
			.map(|(_, info)| info.clone())
			.unwrap_or_else(|| self.relay_parent.clone())
	}

	/// Resolve a relay parent within the scope by hash.
	pub fn ancestor(&self, hash: &Hash) -> Option<RelayChainBlockInfo> {
		if *hash == self.relay_parent.hash {
			return Some(self.relay_parent.clone());
		}
		self.ancestors_by_hash.get(hash).cloned()
	}

	/// The pending-availability record of a candidate, if it has one.
	pub fn get_pending_availability(
		&self,
		candidate_hash: &CandidateHash,
	) -> Option<&PendingAvailability> {
		self.pending_availability.iter().find(|entry| entry.candidate_hash == *candidate_hash)
	}

	/// All pending-availability records.
	pub fn pending_availability(&self) -> &[PendingAvailability] {
		&self.pending_availability
	}
}

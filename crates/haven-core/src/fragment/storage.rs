// SPDX-License-Identifier: GPL-3.0

//! Content-addressed storage of candidates and their backing state.

use crate::{
	error::{CandidateEntryError, FragmentChainError},
	fragment::{
		candidate::{
			CandidateHash, CommittedCandidateReceipt, HeadData, PersistedValidationData,
		},
		fragment::ProspectiveCandidate,
	},
	primitives::Hash,
};
use std::{
	collections::{HashMap, HashSet, hash_map::Entry},
	sync::Arc,
};

/// The backing state of a candidate.
///
/// Candidates are not considered at all until they have been seconded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
	/// The candidate has been seconded.
	Seconded,
	/// The candidate has been completely backed by the group.
	Backed,
}

/// A candidate plus the indexing data the fragment chain needs.
#[derive(Debug, Clone)]
pub struct CandidateEntry {
	pub(crate) candidate_hash: CandidateHash,
	pub(crate) parent_head_data_hash: Hash,
	pub(crate) output_head_data_hash: Hash,
	pub(crate) relay_parent: Hash,
	pub(crate) candidate: Arc<ProspectiveCandidate>,
	pub(crate) state: CandidateState,
}

impl CandidateEntry {
	/// Build a seconded entry from a receipt and its validation data.
	pub fn new_seconded(
		candidate_hash: CandidateHash,
		candidate: CommittedCandidateReceipt,
		persisted_validation_data: PersistedValidationData,
	) -> Result<Self, CandidateEntryError> {
		Self::new(candidate_hash, candidate, persisted_validation_data, CandidateState::Seconded)
	}

	/// Build an entry in the given state.
	pub fn new(
		candidate_hash: CandidateHash,
		candidate: CommittedCandidateReceipt,
		persisted_validation_data: PersistedValidationData,
		state: CandidateState,
	) -> Result<Self, CandidateEntryError> {
		if persisted_validation_data.hash() != candidate.descriptor.persisted_validation_data_hash
		{
			return Err(CandidateEntryError::PersistedValidationDataMismatch);
		}
		let parent_head_data_hash = persisted_validation_data.parent_head.hash();
		let output_head_data_hash = candidate.commitments.head_data.hash();
		if parent_head_data_hash == output_head_data_hash {
			return Err(CandidateEntryError::ZeroLengthCycle);
		}

		Ok(Self {
			candidate_hash,
			parent_head_data_hash,
			output_head_data_hash,
			relay_parent: candidate.descriptor.relay_parent,
			state,
			candidate: Arc::new(ProspectiveCandidate {
				commitments: candidate.commitments,
				persisted_validation_data,
				pov_hash: candidate.descriptor.pov_hash,
				validation_code_hash: candidate.descriptor.validation_code_hash,
			}),
		})
	}

	/// The candidate hash.
	pub fn hash(&self) -> CandidateHash {
		self.candidate_hash
	}

	/// Hash of the head data the candidate builds on.
	pub fn parent_head_data_hash(&self) -> Hash {
		self.parent_head_data_hash
	}

	/// Hash of the head data the candidate outputs.
	pub fn output_head_data_hash(&self) -> Hash {
		self.output_head_data_hash
	}

	/// The candidate's relay parent.
	pub fn relay_parent(&self) -> Hash {
		self.relay_parent
	}

	/// The candidate payload.
	pub fn candidate(&self) -> &Arc<ProspectiveCandidate> {
		&self.candidate
	}

	/// The backing state.
	pub fn state(&self) -> CandidateState {
		self.state
	}
}

/// Stores candidate entries and secondary indices over their head data.
///
/// Parachains may not fork under a single relay-chain leaf, but forks can
/// appear across relay-chain forks, so the parent-head index maps to a
/// set.
#[derive(Clone, Default)]
pub struct CandidateStorage {
	by_parent_head: HashMap<Hash, HashSet<CandidateHash>>,
	by_output_head: HashMap<Hash, HashSet<CandidateHash>>,
	by_candidate_hash: HashMap<CandidateHash, CandidateEntry>,
}

impl CandidateStorage {
	/// Introduce a new candidate entry.
	pub fn add_candidate_entry(&mut self, candidate: CandidateEntry) -> Result<(), FragmentChainError> {
		let candidate_hash = candidate.candidate_hash;
		if self.by_candidate_hash.contains_key(&candidate_hash) {
			return Err(FragmentChainError::CandidateAlreadyKnown(candidate_hash));
		}

		self.by_parent_head
			.entry(candidate.parent_head_data_hash)
			.or_default()
			.insert(candidate_hash);
		self.by_output_head
			.entry(candidate.output_head_data_hash)
			.or_default()
			.insert(candidate_hash);
		self.by_candidate_hash.insert(candidate_hash, candidate);
		Ok(())
	}

	/// Remove a candidate and its index entries.
	pub fn remove_candidate(&mut self, candidate_hash: &CandidateHash) {
		let Some(entry) = self.by_candidate_hash.remove(candidate_hash) else { return };
		if let Entry::Occupied(mut index) = self.by_parent_head.entry(entry.parent_head_data_hash)
		{
			index.get_mut().remove(candidate_hash);
			if index.get().is_empty() {
				index.remove();
			}
		}
		if let Entry::Occupied(mut index) = self.by_output_head.entry(entry.output_head_data_hash)
		{
			index.get_mut().remove(candidate_hash);
			if index.get().is_empty() {
				index.remove();
			}
		}
	}

	/// Note that a stored candidate has been backed. Returns whether the
	/// candidate was present.
	pub fn mark_backed(&mut self, candidate_hash: &CandidateHash) -> bool {
		match self.by_candidate_hash.get_mut(candidate_hash) {
			Some(entry) => {
				log::trace!("Candidate {candidate_hash:?} marked as backed");
				entry.state = CandidateState::Backed;
				true
			},
			None => {
				log::trace!("Candidate {candidate_hash:?} not found while marking as backed");
				false
			},
		}
	}

	/// Whether the candidate is stored.
	pub fn contains(&self, candidate_hash: &CandidateHash) -> bool {
		self.by_candidate_hash.contains_key(candidate_hash)
	}

	/// The stored entry for a candidate, if any.
	pub fn get(&self, candidate_hash: &CandidateHash) -> Option<&CandidateEntry> {
		self.by_candidate_hash.get(candidate_hash)
	}

	/// Iterate over all stored entries, in no particular order.
	pub fn candidates(&self) -> impl Iterator<Item = &CandidateEntry> {
		self.by_candidate_hash.values()
	}

	/// Number of stored candidates.
	pub fn len(&self) -> usize {
		self.by_candidate_hash.len()
	}

	/// Whether the storage is empty.
	pub fn is_empty(&self) -> bool {
		self.by_candidate_hash.is_empty()
	}

	/// Whether any stored candidate outputs the given head-data hash.
	pub fn has_output_head(&self, head_data_hash: &Hash) -> bool {
		self.by_output_head.contains_key(head_data_hash)
	}

	/// Candidate hashes building on the given parent head, if any.
	pub fn children_of_parent_head(
		&self,
		parent_head_hash: &Hash,
	) -> impl Iterator<Item = &CandidateHash> {
		self.by_parent_head.get(parent_head_hash).into_iter().flat_map(|set| set.iter())
	}

	/// Head data resolved by hash, from either side of stored candidates.
	pub fn head_data_by_hash(&self, hash: &Hash) -> Option<&HeadData> {
		self.by_output_head
			.get(hash)
			.and_then(|set| set.iter().next())
			.and_then(|candidate| self.by_candidate_hash.get(candidate))
			.map(|entry| &entry.candidate.commitments.head_data)
			.or_else(|| {
				self.by_parent_head
					.get(hash)
					.and_then(|set| set.iter().next())
					.and_then(|candidate| self.by_candidate_hash.get(candidate))
					.map(|entry| &entry.candidate.persisted_validation_data.parent_head)
			})
	}

	/// Backed candidates whose parent head-data hash is `parent_head_hash`.
	///
	/// Forks are invalid under one relay parent but may exist across
	/// relay-chain forks, hence the iterator; only one child will end up
	/// chained.
	pub fn possible_backed_para_children<'a>(
		&'a self,
		parent_head_hash: &'a Hash,
	) -> impl Iterator<Item = &'a CandidateEntry> + 'a {
		let by_candidate_hash = &self.by_candidate_hash;
		self.by_parent_head
			.get(parent_head_hash)
			.into_iter()
			.flat_map(|set| set.iter())
			.filter_map(move |hash| {
				by_candidate_hash
					.get(hash)
					.filter(|candidate| candidate.state == CandidateState::Backed)
			})
	}
}

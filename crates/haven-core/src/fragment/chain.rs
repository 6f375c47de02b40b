// SPDX-License-Identifier: GPL-3.0

//! The fragment chain proper: the best backed chain and the unconnected
//! potential candidates around it.

use crate::{
	error::FragmentChainError,
	fragment::{
		candidate::{CandidateCommitments, CandidateHash, HeadData, PersistedValidationData},
		constraints::ConstraintModifications,
		fragment::{Fragment, RelayChainBlockInfo},
		scope::Scope,
		storage::{CandidateEntry, CandidateState, CandidateStorage},
	},
	primitives::Hash,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// How many unconnected candidates may be kept beyond the chain depth.
const EXTRA_UNCONNECTED_COUNT: usize = 10;

/// The set of candidate hashes assumed to already be on chain when
/// querying for backable candidates.
pub type Ancestors = HashSet<CandidateHash>;

/// A candidate that may be missing some of its data: queries about
/// prospective membership arrive before the full receipt is known.
pub trait HypotheticalOrConcreteCandidate {
	/// The commitments, when known.
	fn commitments(&self) -> Option<&CandidateCommitments>;
	/// The persisted validation data, when known.
	fn persisted_validation_data(&self) -> Option<&PersistedValidationData>;
	/// The validation code hash, when known.
	fn validation_code_hash(&self) -> Option<&Hash>;
	/// Hash of the head data the candidate builds on.
	fn parent_head_data_hash(&self) -> Hash;
	/// Hash of the produced head data, when known.
	fn output_head_data_hash(&self) -> Option<Hash>;
	/// The candidate's relay parent.
	fn relay_parent(&self) -> Hash;
	/// The candidate hash.
	fn candidate_hash(&self) -> CandidateHash;
}

/// A candidate known only by its surrounding hashes.
#[derive(Debug, Clone)]
pub struct HypotheticalCandidate {
	/// The candidate hash.
	pub candidate_hash: CandidateHash,
	/// Hash of the head data the candidate builds on.
	pub parent_head_data_hash: Hash,
	/// Hash of the produced head data, when known.
	pub output_head_data_hash: Option<Hash>,
	/// The candidate's relay parent.
	pub relay_parent: Hash,
}

impl HypotheticalOrConcreteCandidate for HypotheticalCandidate {
	fn commitments(&self) -> Option<&CandidateCommitments> {
		None
	}

	fn persisted_validation_data(&self) -> Option<&PersistedValidationData> {
		None
	}

	fn validation_code_hash(&self) -> Option<&Hash> {
		None
	}

	fn parent_head_data_hash(&self) -> Hash {
		self.parent_head_data_hash
	}

	fn output_head_data_hash(&self) -> Option<Hash> {
		self.output_head_data_hash
	}

	fn relay_parent(&self) -> Hash {
		self.relay_parent
	}

	fn candidate_hash(&self) -> CandidateHash {
		self.candidate_hash
	}
}

impl HypotheticalOrConcreteCandidate for &CandidateEntry {
	fn commitments(&self) -> Option<&CandidateCommitments> {
		Some(&self.candidate().commitments)
	}

	fn persisted_validation_data(&self) -> Option<&PersistedValidationData> {
		Some(&self.candidate().persisted_validation_data)
	}

	fn validation_code_hash(&self) -> Option<&Hash> {
		Some(&self.candidate().validation_code_hash)
	}

	fn parent_head_data_hash(&self) -> Hash {
		CandidateEntry::parent_head_data_hash(*self)
	}

	fn output_head_data_hash(&self) -> Option<Hash> {
		Some(CandidateEntry::output_head_data_hash(*self))
	}

	fn relay_parent(&self) -> Hash {
		CandidateEntry::relay_parent(*self)
	}

	fn candidate_hash(&self) -> CandidateHash {
		self.hash()
	}
}

/// One chained, validated fragment.
pub struct FragmentNode {
	fragment: Fragment,
	candidate_hash: CandidateHash,
	cumulative_modifications: ConstraintModifications,
	parent_head_data_hash: Hash,
	output_head_data_hash: Hash,
}

impl FragmentNode {
	/// The candidate hash.
	pub fn candidate_hash(&self) -> CandidateHash {
		self.candidate_hash
	}

	/// The fragment's relay parent hash.
	pub fn relay_parent(&self) -> Hash {
		self.fragment.relay_parent().hash
	}

	fn into_candidate_entry(self) -> CandidateEntry {
		CandidateEntry {
			candidate_hash: self.candidate_hash,
			parent_head_data_hash: self.parent_head_data_hash,
			output_head_data_hash: self.output_head_data_hash,
			relay_parent: self.fragment.relay_parent().hash,
			candidate: self.fragment.candidate_clone(),
			state: CandidateState::Backed,
		}
	}
}

/// The ordered list of backed fragments with head-data indices.
#[derive(Default)]
pub struct BackedChain {
	chain: Vec<FragmentNode>,
	by_parent_head: HashMap<Hash, CandidateHash>,
	by_output_head: HashMap<Hash, CandidateHash>,
	candidates: HashSet<CandidateHash>,
}

impl BackedChain {
	/// Append a fragment to the chain.
	pub fn push(&mut self, node: FragmentNode) {
		self.candidates.insert(node.candidate_hash);
		self.by_parent_head.insert(node.parent_head_data_hash, node.candidate_hash);
		self.by_output_head.insert(node.output_head_data_hash, node.candidate_hash);
		self.chain.push(node);
	}

	/// Whether the chain contains a candidate.
	pub fn contains(&self, candidate_hash: &CandidateHash) -> bool {
		self.candidates.contains(candidate_hash)
	}

	/// Remove and return every fragment.
	pub fn clear(&mut self) -> Vec<FragmentNode> {
		self.by_parent_head.clear();
		self.by_output_head.clear();
		self.candidates.clear();
		std::mem::take(&mut self.chain)
	}

	/// Remove the suffix after the first fragment whose output head-data
	/// hash equals `parent_head_data_hash`, returning the removed tail.
	pub fn revert_to_parent_hash(&mut self, parent_head_data_hash: &Hash) -> Vec<FragmentNode> {
		let Some(index) = self
			.chain
			.iter()
			.position(|node| node.output_head_data_hash == *parent_head_data_hash)
		else {
			return Vec::new();
		};
		let removed = self.chain.split_off(index + 1);
		for node in &removed {
			self.by_parent_head.remove(&node.parent_head_data_hash);
			self.by_output_head.remove(&node.output_head_data_hash);
			self.candidates.remove(&node.candidate_hash);
		}
		removed
	}

	/// The fragments in order.
	pub fn iter(&self) -> impl Iterator<Item = &FragmentNode> {
		self.chain.iter()
	}

	/// Number of chained fragments.
	pub fn len(&self) -> usize {
		self.chain.len()
	}

	/// Whether the chain is empty.
	pub fn is_empty(&self) -> bool {
		self.chain.is_empty()
	}
}

/// The prospective chain of one parachain at one relay-chain leaf.
///
/// Holds the current best chain of backed fragments satisfying the
/// scope's constraints, and the unconnected storage of candidates that
/// may join it. No candidate appears in both.
pub struct FragmentChain {
	scope: Scope,
	best_chain: BackedChain,
	unconnected: CandidateStorage,
}

impl FragmentChain {
	/// Create a chain under `scope`, populated from `candidates`.
	pub fn populate(scope: Scope, mut candidates: CandidateStorage) -> Self {
		let mut chain = Self {
			scope,
			best_chain: BackedChain::default(),
			unconnected: CandidateStorage::default(),
		};

		chain.populate_chain(&mut candidates);
		// Drop the forks that can no longer make it on chain before
		// keeping the rest as potential candidates.
		chain.trim_uneligible_forks(&mut candidates, None);
		chain.populate_unconnected_potential_candidates(candidates);
		chain
	}

	/// The scope of the chain.
	pub fn scope(&self) -> &Scope {
		&self.scope
	}

	/// Number of candidates in the best chain.
	pub fn best_chain_len(&self) -> usize {
		self.best_chain.len()
	}

	/// Number of unconnected potential candidates.
	pub fn unconnected_len(&self) -> usize {
		self.unconnected.len()
	}

	/// Whether the candidate is part of the best chain.
	pub fn contains_candidate(&self, candidate_hash: &CandidateHash) -> bool {
		self.best_chain.contains(candidate_hash)
	}

	/// Whether the candidate is in the unconnected storage.
	pub fn contains_unconnected_candidate(&self, candidate_hash: &CandidateHash) -> bool {
		self.unconnected.contains(candidate_hash)
	}

	/// The best chain's candidate hashes, in order.
	pub fn best_chain_vec(&self) -> Vec<CandidateHash> {
		self.best_chain.iter().map(|node| node.candidate_hash).collect()
	}

	/// Iterate the unconnected candidates.
	pub fn unconnected(&self) -> impl Iterator<Item = &CandidateEntry> {
		self.unconnected.candidates()
	}

	/// Resolve head data by hash from the chain, the scope's required
	/// parent or the unconnected storage.
	pub fn get_head_data_by_hash(&self, head_data_hash: &Hash) -> Option<HeadData> {
		let required_parent = &self.scope.base_constraints().required_parent;
		if required_parent.hash() == *head_data_hash {
			return Some(required_parent.clone());
		}

		let has_head_data_in_chain = self.best_chain.by_parent_head.contains_key(head_data_hash)
			|| self.best_chain.by_output_head.contains_key(head_data_hash);
		if has_head_data_in_chain {
			return self.best_chain.iter().find_map(|node| {
				if node.parent_head_data_hash == *head_data_hash {
					Some(
						node.fragment
							.candidate()
							.persisted_validation_data
							.parent_head
							.clone(),
					)
				} else if node.output_head_data_hash == *head_data_hash {
					Some(node.fragment.candidate().commitments.head_data.clone())
				} else {
					None
				}
			});
		}

		self.unconnected.head_data_by_hash(head_data_hash).cloned()
	}

	/// Select up to `count` backable candidates following `ancestors`.
	///
	/// The ancestors allow querying on the basis of candidates that were
	/// pending availability becoming available or timing out; the walk
	/// stops at the first candidate still pending availability.
	pub fn find_backable_chain(
		&self,
		ancestors: Ancestors,
		count: u32,
	) -> Vec<(CandidateHash, Hash)> {
		if count == 0 {
			return Vec::new();
		}
		let base_pos = self.find_ancestor_path(ancestors);
		let end = std::cmp::min(base_pos + count as usize, self.best_chain.len());

		let mut result = Vec::with_capacity(end.saturating_sub(base_pos));
		for node in &self.best_chain.chain[base_pos..end] {
			if self.scope.get_pending_availability(&node.candidate_hash).is_some() {
				break;
			}
			result.push((node.candidate_hash, node.relay_parent()));
		}
		result
	}

	/// Mark a candidate as backed. If it was waiting in the unconnected
	/// storage this may connect it — and any of its descendants — to the
	/// best chain, potentially reorganizing it in place.
	pub fn candidate_backed(&mut self, newly_backed_candidate: &CandidateHash) {
		if self.best_chain.contains(newly_backed_candidate) {
			// Marking a chained candidate backed twice is a no-op.
			return;
		}
		let Some(parent_head_data_hash) = self
			.unconnected
			.get(newly_backed_candidate)
			.map(|entry| entry.parent_head_data_hash())
		else {
			return;
		};
		self.unconnected.mark_backed(newly_backed_candidate);

		if !self.revert_to(&parent_head_data_hash) {
			// The candidate is not connected to the chain yet.
			return;
		}

		let mut prev_storage = std::mem::take(&mut self.unconnected);
		self.populate_chain(&mut prev_storage);
		self.trim_uneligible_forks(&mut prev_storage, Some(parent_head_data_hash));
		self.populate_unconnected_potential_candidates(prev_storage);
	}

	/// Check whether a candidate could be added in the future.
	pub fn can_add_candidate_as_potential(
		&self,
		candidate: &impl HypotheticalOrConcreteCandidate,
	) -> Result<(), FragmentChainError> {
		let candidate_hash = candidate.candidate_hash();
		if self.best_chain.contains(&candidate_hash) || self.unconnected.contains(&candidate_hash)
		{
			return Err(FragmentChainError::CandidateAlreadyKnown(candidate_hash));
		}

		if self.best_chain.len() + self.unconnected.len()
			> self.scope.max_depth() + EXTRA_UNCONNECTED_COUNT
		{
			return Err(FragmentChainError::TooManyCandidates);
		}

		self.check_potential(candidate)
	}

	/// Introduce a seconded candidate into the unconnected storage, after
	/// checking its potential. Backed candidates must not enter this way.
	pub fn try_adding_seconded_candidate(
		&mut self,
		candidate: &CandidateEntry,
	) -> Result<(), FragmentChainError> {
		if candidate.state() == CandidateState::Backed {
			return Err(FragmentChainError::IntroduceBackedCandidate(candidate.hash()));
		}

		self.can_add_candidate_as_potential(&candidate)?;
		self.unconnected.add_candidate_entry(candidate.clone())
	}

	/// The chain and unconnected candidates as one storage, used when
	/// moving to a new scope.
	pub fn as_candidate_storage(&self) -> CandidateStorage {
		let mut storage = self.unconnected.clone();
		for node in self.best_chain.iter() {
			let entry = CandidateEntry {
				candidate_hash: node.candidate_hash,
				parent_head_data_hash: node.parent_head_data_hash,
				output_head_data_hash: node.output_head_data_hash,
				relay_parent: node.relay_parent(),
				candidate: node.fragment.candidate_clone(),
				state: CandidateState::Backed,
			};
			if storage.add_candidate_entry(entry).is_err() {
				continue;
			}
		}
		storage
	}

	// Orders the ancestors into a viable path from the chain start and
	// returns the index where the match stopped.
	fn find_ancestor_path(&self, mut ancestors: Ancestors) -> usize {
		if self.best_chain.is_empty() {
			return 0;
		}
		for (index, node) in self.best_chain.iter().enumerate() {
			if !ancestors.remove(&node.candidate_hash) {
				return index;
			}
		}
		self.best_chain.len()
	}

	// The earliest relay parent a new chained candidate may anchor to:
	// the relay parent of the last candidate, which may be out of scope
	// only for candidates pending availability.
	fn earliest_relay_parent(&self) -> Option<RelayChainBlockInfo> {
		match self.best_chain.chain.last() {
			Some(last) => self.scope.ancestor(&last.relay_parent()).or_else(|| {
				self.scope
					.get_pending_availability(&last.candidate_hash)
					.map(|pending| pending.relay_parent.clone())
			}),
			None => Some(self.scope.earliest_relay_parent()),
		}
	}

	// The relay parent of the most recent candidate pending availability,
	// bounding how far back a new candidate may anchor.
	fn earliest_relay_parent_pending_availability(&self) -> RelayChainBlockInfo {
		self.best_chain
			.chain
			.iter()
			.rev()
			.find_map(|node| {
				self.scope
					.get_pending_availability(&node.candidate_hash)
					.map(|pending| pending.relay_parent.clone())
			})
			.unwrap_or_else(|| self.scope.earliest_relay_parent())
	}

	fn check_cycles_or_invalid_tree(
		&self,
		output_head_hash: &Hash,
	) -> Result<(), FragmentChainError> {
		// The output would point back at the parent of a chained candidate.
		if self.best_chain.by_parent_head.contains_key(output_head_hash) {
			return Err(FragmentChainError::Cycle);
		}
		// The output duplicates a state already reached by the chain.
		if self.best_chain.by_output_head.contains_key(output_head_hash) {
			return Err(FragmentChainError::MultiplePaths);
		}
		Ok(())
	}

	// The full potential ladder: relay parent in scope and not moving
	// backwards, no forks against pending availability or better chained
	// siblings, no cycles or duplicate paths, and constraint-validity for
	// complete candidates.
	fn check_potential(
		&self,
		candidate: &impl HypotheticalOrConcreteCandidate,
	) -> Result<(), FragmentChainError> {
		let relay_parent_hash = candidate.relay_parent();
		let parent_head_hash = candidate.parent_head_data_hash();

		if let Some(output_head_hash) = candidate.output_head_data_hash() {
			if parent_head_hash == output_head_hash {
				return Err(FragmentChainError::ZeroLengthCycle);
			}
		}

		let Some(relay_parent) = self.scope.ancestor(&relay_parent_hash) else {
			return Err(FragmentChainError::RelayParentNotInScope(relay_parent_hash));
		};
		let earliest_pending = self.earliest_relay_parent_pending_availability();
		if relay_parent.number < earliest_pending.number {
			return Err(FragmentChainError::RelayParentPrecedesCandidatePendingAvailability);
		}

		// Fork checks against a chained sibling.
		if let Some(other_candidate) = self.best_chain.by_parent_head.get(&parent_head_hash) {
			if self.scope.get_pending_availability(other_candidate).is_some() {
				return Err(FragmentChainError::ForkWithCandidatePendingAvailability);
			}
			// Forks tie-break on the lower candidate hash.
			if *other_candidate < candidate.candidate_hash() {
				return Err(FragmentChainError::ForkChoiceRule);
			}
		}

		if let Some(output_head_hash) = candidate.output_head_data_hash() {
			self.check_cycles_or_invalid_tree(&output_head_hash)?;
		}

		let constraints = if let Some(parent_candidate_hash) =
			self.best_chain.by_output_head.get(&parent_head_hash)
		{
			let Some(parent_candidate) = self
				.best_chain
				.iter()
				.find(|node| node.candidate_hash == *parent_candidate_hash)
			else {
				return Err(FragmentChainError::ParentCandidateNotFound);
			};
			self.scope
				.base_constraints()
				.apply_modifications(&parent_candidate.cumulative_modifications)
				.map_err(FragmentChainError::ComputeConstraints)?
		} else if self.scope.base_constraints().required_parent.hash() == parent_head_hash {
			self.scope.base_constraints().clone()
		} else {
			// The parent is not part of the chain yet; nothing more can be
			// checked at this point.
			return Ok(());
		};

		if let (Some(commitments), Some(pvd), Some(validation_code_hash)) = (
			candidate.commitments(),
			candidate.persisted_validation_data(),
			candidate.validation_code_hash(),
		) {
			Fragment::check_against_constraints(
				&relay_parent,
				&constraints,
				commitments,
				validation_code_hash,
				pvd,
			)
			.map_err(FragmentChainError::CheckAgainstConstraints)?;
		} else if relay_parent.number < constraints.min_relay_parent_number {
			return Err(FragmentChainError::RelayParentMovedBackwards);
		}

		Ok(())
	}

	// Walk the storage from the chain outwards and drop candidates that
	// lost their potential, so they stop occupying unconnected capacity.
	fn trim_uneligible_forks(&self, storage: &mut CandidateStorage, starting_point: Option<Hash>) {
		let mut queue: VecDeque<(Hash, bool)> = match starting_point {
			Some(head) => [(head, true)].into(),
			None => {
				if self.best_chain.is_empty() {
					[(self.scope.base_constraints().required_parent.hash(), true)].into()
				} else {
					self.best_chain
						.iter()
						.map(|node| (node.parent_head_data_hash, true))
						.collect()
				}
			},
		};

		let mut visited = HashSet::new();
		while let Some((parent_head_hash, parent_has_potential)) = queue.pop_front() {
			visited.insert(parent_head_hash);

			let children: Vec<CandidateHash> =
				storage.children_of_parent_head(&parent_head_hash).copied().collect();
			let mut to_remove = Vec::new();

			for child_hash in children {
				let Some(child) = storage.get(&child_hash) else { continue };

				// A cycle: remove the candidate that would close it.
				if visited.contains(&child.output_head_data_hash()) {
					to_remove.push(child_hash);
					continue;
				}

				if parent_has_potential && self.check_potential(&child).is_ok() {
					queue.push_back((child.output_head_data_hash(), true));
				} else {
					to_remove.push(child_hash);
					queue.push_back((child.output_head_data_hash(), false));
				}
			}

			for hash in to_remove {
				storage.remove_candidate(&hash);
			}
		}
	}

	// Keep the storage candidates that could still join the chain, capped
	// by the unconnected capacity.
	fn populate_unconnected_potential_candidates(&mut self, old_storage: CandidateStorage) {
		for candidate in old_storage.candidates() {
			// Sanity: candidates pending availability are always already in
			// the chain.
			if self.scope.get_pending_availability(&candidate.hash()).is_some() {
				continue;
			}

			match self.can_add_candidate_as_potential(&candidate) {
				Ok(()) => {
					if self.unconnected.add_candidate_entry(candidate.clone()).is_err() {
						continue;
					}
				},
				Err(FragmentChainError::TooManyCandidates) => break,
				// Other errors are routine when pruning stale candidates.
				Err(_) => {},
			}
		}
	}

	// Revert the best chain to the fragment outputting the given head,
	// returning the removed candidates to the unconnected storage.
	fn revert_to(&mut self, parent_head_data_hash: &Hash) -> bool {
		let removed = if self.scope.base_constraints().required_parent.hash()
			== *parent_head_data_hash
		{
			self.best_chain.clear()
		} else if self.best_chain.by_output_head.contains_key(parent_head_data_hash) {
			self.best_chain.revert_to_parent_hash(parent_head_data_hash)
		} else {
			return false;
		};

		for node in removed {
			let _ = self.unconnected.add_candidate_entry(node.into_candidate_entry());
		}
		true
	}

	// Repeatedly chain the best backed candidate building on the current
	// required parent, until constraints fail, depth is reached or no
	// candidate fits.
	fn populate_chain(&mut self, storage: &mut CandidateStorage) {
		let mut cumulative_modifications = match self.best_chain.chain.last() {
			Some(last) => last.cumulative_modifications.clone(),
			None => ConstraintModifications::identity(),
		};
		let Some(mut earliest_rp) = self.earliest_relay_parent() else { return };

		loop {
			if self.best_chain.len() > self.scope.max_depth() {
				break;
			}

			let child_constraints = match self
				.scope
				.base_constraints()
				.apply_modifications(&cumulative_modifications)
			{
				Ok(constraints) => constraints,
				Err(error) => {
					log::debug!("Failed to apply modifications: {error}");
					break;
				},
			};

			let required_head_hash = child_constraints.required_parent.hash();

			// Select the best candidate building on the required head. A
			// candidate pending availability always wins; otherwise the
			// lowest candidate hash does.
			let best_candidate = storage
				.possible_backed_para_children(&required_head_hash)
				.filter_map(|candidate| {
					let pending =
						self.scope.get_pending_availability(&candidate.hash());
					let Some(relay_parent) = pending
						.map(|pending| pending.relay_parent.clone())
						.or_else(|| self.scope.ancestor(&candidate.relay_parent()))
					else {
						return None;
					};

					if self
						.check_cycles_or_invalid_tree(&candidate.output_head_data_hash())
						.is_err()
					{
						return None;
					}

					// Candidates cannot move the relay parent backwards; only
					// pending availability candidates may sit out of scope.
					let min_relay_parent_number = pending
						.map(|pending| match self.best_chain.len() {
							0 => pending.relay_parent.number,
							_ => earliest_rp.number,
						})
						.unwrap_or(earliest_rp.number);
					if relay_parent.number < min_relay_parent_number {
						return None;
					}

					if self.best_chain.contains(&candidate.hash()) {
						return None;
					}

					let constraints = {
						let mut constraints = child_constraints.clone();
						if let Some(pending) = pending {
							// Candidates pending availability have already
							// been accepted on chain under older constraints.
							constraints.min_relay_parent_number =
								pending.relay_parent.number;
						}
						constraints
					};
					let fragment = match Fragment::new(
						relay_parent,
						constraints,
						candidate.candidate().clone(),
					) {
						Ok(fragment) => fragment,
						Err(error) => {
							log::debug!(
								"Failed to instantiate fragment for {:?}: {error}",
								candidate.hash(),
							);
							return None;
						},
					};

					Some((
						fragment,
						candidate.hash(),
						candidate.output_head_data_hash(),
						candidate.parent_head_data_hash(),
					))
				})
				.min_by(|a, b| {
					use std::cmp::Ordering;
					if self.scope.get_pending_availability(&a.1).is_some() {
						Ordering::Less
					} else if self.scope.get_pending_availability(&b.1).is_some() {
						Ordering::Greater
					} else {
						a.1.cmp(&b.1)
					}
				});

			let Some((fragment, candidate_hash, output_head_data_hash, parent_head_data_hash)) =
				best_candidate
			else {
				break;
			};

			storage.remove_candidate(&candidate_hash);

			cumulative_modifications.stack(fragment.constraint_modifications());
			earliest_rp = fragment.relay_parent().clone();

			self.best_chain.push(FragmentNode {
				fragment,
				candidate_hash,
				parent_head_data_hash,
				output_head_data_hash,
				cumulative_modifications: cumulative_modifications.clone(),
			});
		}
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Per-fork authority-set schedule tree.
//!
//! Each node carries the authority set in force at a block, an enabled
//! flag and at most one pending action (scheduled change, forced change,
//! pause or resume). Nodes mirror the relevant part of the block tree:
//! creating a descendant clones the parent's state and applies whatever
//! action has come due at the target block. Scheduled changes, pauses and
//! resumes only apply on finalized blocks; forced changes are immediate.
//!
//! Actions enter the tree through GRANDPA consensus digest messages.

use crate::{
	error::ScheduleError,
	primitives::{BlockInfo, BlockNumber, Hash},
};
use scale::{Decode, Encode};
use std::{collections::HashMap, sync::Arc};

/// A single authority: its id and voting weight.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Authority {
	/// The authority's public key.
	pub id: [u8; 32],
	/// The authority's voting weight.
	pub weight: u64,
}

/// A versioned set of authorities.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct AuthoritySet {
	/// Monotonically increasing set id; each applied change bumps it.
	pub id: u64,
	/// The authorities of this set.
	pub authorities: Vec<Authority>,
}

impl AuthoritySet {
	/// The successor set with the given authorities.
	pub fn next(&self, authorities: Vec<Authority>) -> Self {
		Self { id: self.id + 1, authorities }
	}
}

/// A GRANDPA consensus digest message, as carried in `Consensus` digest
/// items under the `FRNK` engine id.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum GrandpaDigestMessage {
	/// Schedule an authority change after `delay` finalized blocks.
	#[codec(index = 1)]
	ScheduledChange {
		/// The new authorities.
		authorities: Vec<Authority>,
		/// Blocks until the change applies.
		delay: u32,
	},
	/// Force an authority change, effective without finalization.
	#[codec(index = 2)]
	ForcedChange {
		/// The block number the delay starts counting from.
		delay_start: BlockNumber,
		/// The new authorities.
		authorities: Vec<Authority>,
		/// Length of the delay in blocks.
		delay: u32,
	},
	/// Disable a single authority by index.
	#[codec(index = 3)]
	OnDisabled {
		/// Index into the current authority set.
		authority_index: u64,
	},
	/// Pause the authority set after `delay` blocks.
	#[codec(index = 4)]
	Pause {
		/// Blocks until the pause applies.
		delay: u32,
	},
	/// Resume a paused authority set after `delay` blocks.
	#[codec(index = 5)]
	Resume {
		/// Blocks until the resume applies.
		delay: u32,
	},
}

impl GrandpaDigestMessage {
	/// Decode a consensus digest payload.
	pub fn from_payload(payload: &[u8]) -> Result<Self, ScheduleError> {
		Self::decode(&mut &payload[..]).map_err(|_| ScheduleError::UnsupportedMessageType)
	}
}

/// The pending action of a schedule node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleAction {
	/// Nothing pending.
	None,
	/// An authority change applying at `applied_block` once finalized.
	ScheduledChange {
		/// First block number the change applies at.
		applied_block: BlockNumber,
		/// The authorities taking over.
		new_authorities: Arc<AuthoritySet>,
	},
	/// An authority change applying without finalization.
	ForcedChange {
		/// The block number the delay starts counting from.
		delay_start: BlockNumber,
		/// Length of the delay in blocks.
		delay_length: BlockNumber,
		/// The authorities taking over.
		new_authorities: Arc<AuthoritySet>,
	},
	/// A pause applying at `applied_block` once finalized.
	Pause {
		/// First block number the pause applies at.
		applied_block: BlockNumber,
	},
	/// A resume applying at `applied_block` once finalized.
	Resume {
		/// First block number the resume applies at.
		applied_block: BlockNumber,
	},
}

/// Authority-set state for one block and its descendants until the next
/// change.
#[derive(Debug, Clone)]
pub struct ScheduleNode {
	/// The block this node is keyed by.
	pub block: BlockInfo,
	/// The node's parent block, if any.
	pub parent: Option<Hash>,
	/// The authority set in force.
	pub authorities: Arc<AuthoritySet>,
	/// Whether the set is currently enabled (not paused).
	pub enabled: bool,
	/// The pending action, if any.
	pub action: ScheduleAction,
	/// Blocks that carried forced-change digests on this branch.
	pub forced_digests: Vec<BlockInfo>,
}

impl ScheduleNode {
	/// Apply whatever action has come due at this node's block.
	fn adjust(&mut self, finalized: bool) {
		match std::mem::replace(&mut self.action, ScheduleAction::None) {
			ScheduleAction::ScheduledChange { applied_block, new_authorities } => {
				if finalized && applied_block <= self.block.number {
					self.authorities = new_authorities;
					self.forced_digests.clear();
				} else {
					self.action =
						ScheduleAction::ScheduledChange { applied_block, new_authorities };
				}
			},
			ScheduleAction::ForcedChange { delay_start, delay_length, new_authorities } => {
				// Forced changes are immediate; finalization is not needed.
				if delay_start + delay_length <= self.block.number {
					self.authorities = new_authorities;
				} else {
					self.action = ScheduleAction::ForcedChange {
						delay_start,
						delay_length,
						new_authorities,
					};
				}
			},
			ScheduleAction::Pause { applied_block } => {
				if finalized && applied_block <= self.block.number {
					self.enabled = false;
				} else {
					self.action = ScheduleAction::Pause { applied_block };
				}
			},
			ScheduleAction::Resume { applied_block } => {
				if finalized && applied_block <= self.block.number {
					self.enabled = true;
				} else {
					self.action = ScheduleAction::Resume { applied_block };
				}
			},
			ScheduleAction::None => {},
		}
	}
}

/// The schedule tree: one node per block that changed authority state,
/// mirroring the block tree's shape.
pub struct ScheduleTree {
	root: Hash,
	nodes: HashMap<Hash, ScheduleNode>,
	children: HashMap<Hash, Vec<Hash>>,
}

impl ScheduleTree {
	/// Create the tree with the initial authority set at `block`.
	pub fn create(initial: AuthoritySet, block: BlockInfo) -> Self {
		let root = ScheduleNode {
			block,
			parent: None,
			authorities: Arc::new(initial),
			enabled: true,
			action: ScheduleAction::None,
			forced_digests: Vec::new(),
		};
		let mut nodes = HashMap::new();
		nodes.insert(block.hash, root);
		Self { root: block.hash, nodes, children: HashMap::new() }
	}

	/// The root node's block hash.
	pub fn root(&self) -> Hash {
		self.root
	}

	/// The node keyed by `hash`, if present.
	pub fn node(&self, hash: &Hash) -> Option<&ScheduleNode> {
		self.nodes.get(hash)
	}

	/// Create a descendant of the node at `parent`: the child clones the
	/// parent's state and applies any action due at `target`.
	pub fn make_descendant(
		&mut self,
		parent: &Hash,
		target: BlockInfo,
		finalized: bool,
	) -> Result<&ScheduleNode, ScheduleError> {
		let parent_node = self.nodes.get(parent).ok_or(ScheduleError::NodeNotFound)?;
		let mut node = ScheduleNode {
			block: target,
			parent: Some(*parent),
			authorities: parent_node.authorities.clone(),
			enabled: parent_node.enabled,
			action: parent_node.action.clone(),
			forced_digests: parent_node.forced_digests.clone(),
		};
		node.adjust(finalized);

		self.children.entry(*parent).or_default().push(target.hash);
		Ok(self.nodes.entry(target.hash).or_insert(node))
	}

	/// Apply a GRANDPA digest message observed at `block` to the node at
	/// `node_hash`.
	pub fn on_consensus_message(
		&mut self,
		node_hash: &Hash,
		block: BlockInfo,
		message: GrandpaDigestMessage,
	) -> Result<(), ScheduleError> {
		let node = self.nodes.get_mut(node_hash).ok_or(ScheduleError::NodeNotFound)?;

		match message {
			GrandpaDigestMessage::ScheduledChange { authorities, delay } => {
				if matches!(node.action, ScheduleAction::ScheduledChange { .. }) {
					return Err(ScheduleError::NoScheduledChangeAppliedYet);
				}
				node.action = ScheduleAction::ScheduledChange {
					applied_block: block.number + delay,
					new_authorities: Arc::new(node.authorities.next(authorities)),
				};
			},
			GrandpaDigestMessage::ForcedChange { delay_start, authorities, delay } => {
				if matches!(node.action, ScheduleAction::ForcedChange { .. }) {
					return Err(ScheduleError::NoForcedChangeAppliedYet);
				}
				node.action = ScheduleAction::ForcedChange {
					delay_start,
					delay_length: delay,
					new_authorities: Arc::new(node.authorities.next(authorities)),
				};
				node.forced_digests.push(block);
			},
			GrandpaDigestMessage::OnDisabled { authority_index } => {
				if authority_index as usize >= node.authorities.authorities.len() {
					return Err(ScheduleError::WrongAuthorityIndex);
				}
				log::debug!(
					"Authority {authority_index} disabled at {block} (set id {})",
					node.authorities.id,
				);
			},
			GrandpaDigestMessage::Pause { delay } => {
				if matches!(node.action, ScheduleAction::Pause { .. }) {
					return Err(ScheduleError::NoPauseAppliedYet);
				}
				node.action = ScheduleAction::Pause { applied_block: block.number + delay };
			},
			GrandpaDigestMessage::Resume { delay } => {
				if matches!(node.action, ScheduleAction::Resume { .. }) {
					return Err(ScheduleError::NoResumeAppliedYet);
				}
				node.action = ScheduleAction::Resume { applied_block: block.number + delay };
			},
		}
		Ok(())
	}

	/// Re-root the tree at the node for a newly finalized block, dropping
	/// every branch that does not pass through it.
	pub fn reroot(&mut self, finalized: &Hash) {
		if !self.nodes.contains_key(finalized) || *finalized == self.root {
			return;
		}

		// Keep the finalized node and everything below it.
		let mut keep = std::collections::HashSet::new();
		let mut queue = vec![*finalized];
		while let Some(hash) = queue.pop() {
			if keep.insert(hash) {
				if let Some(children) = self.children.get(&hash) {
					queue.extend(children.iter().copied());
				}
			}
		}

		self.nodes.retain(|hash, _| keep.contains(hash));
		self.children.retain(|hash, _| keep.contains(hash));
		for children in self.children.values_mut() {
			children.retain(|child| keep.contains(child));
		}
		if let Some(node) = self.nodes.get_mut(finalized) {
			node.parent = None;
		}
		self.root = *finalized;
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Typed store for authority-discovery peer records.
//!
//! Maps a 32-byte authority discovery id to the peer info last published
//! for it, persisted in the [`Space::AudiPeers`] column.

use crate::{
	database::{Cursor as _, Database, Space},
	error::DatabaseError,
};
use scale::{Decode, Encode};
use std::sync::Arc;

/// A 32-byte authority discovery identifier.
pub type AuthorityId = [u8; 32];

/// Peer record published by an authority on the discovery DHT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct AuthorityPeerInfo {
	/// The raw signed discovery record.
	pub raw: Vec<u8>,
	/// Creation time of the record, if the record carried one.
	pub time: Option<u64>,
	/// The peer id the record resolves to.
	pub peer_id: Vec<u8>,
	/// Multiaddresses the peer is reachable at.
	pub addresses: Vec<Vec<u8>>,
}

/// Store for authority-discovery data.
#[derive(Clone)]
pub struct AuthorityPeerStore {
	db: Arc<dyn Database>,
}

impl AuthorityPeerStore {
	/// Create a store over the given backend.
	pub fn new(db: Arc<dyn Database>) -> Self {
		Self { db }
	}

	/// Persist the peer record of an authority, replacing any previous one.
	pub fn store(&self, authority: &AuthorityId, info: &AuthorityPeerInfo) {
		if let Err(error) = self.db.put(Space::AudiPeers, authority, &info.encode()) {
			log::error!("Failed to store peer info for authority: {error}");
		}
	}

	/// Fetch the peer record of an authority, `None` when absent or
	/// undecodable.
	pub fn get(&self, authority: &AuthorityId) -> Option<AuthorityPeerInfo> {
		let raw = match self.db.try_get(Space::AudiPeers, authority) {
			Ok(raw) => raw?,
			Err(error) => {
				log::error!("Failed to read peer info for authority: {error}");
				return None;
			},
		};
		match AuthorityPeerInfo::decode(&mut raw.as_slice()) {
			Ok(info) => Some(info),
			Err(_) => {
				log::error!("Failed to decode stored peer info");
				None
			},
		}
	}

	/// Remove the record of an authority.
	pub fn remove(&self, authority: &AuthorityId) -> Result<(), DatabaseError> {
		self.db.remove(Space::AudiPeers, authority)
	}

	/// Whether a record exists for the authority.
	pub fn contains(&self, authority: &AuthorityId) -> bool {
		self.db.contains(Space::AudiPeers, authority).unwrap_or(false)
	}

	/// Visit every stored record in authority order.
	pub fn for_each(&self, mut f: impl FnMut(&AuthorityId, &AuthorityPeerInfo)) {
		let Ok(mut cursor) = self.db.cursor(Space::AudiPeers) else { return };
		let mut valid = cursor.seek_first();
		while valid {
			if let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
				if let Ok(authority) = AuthorityId::try_from(key) {
					match AuthorityPeerInfo::decode(&mut &value[..]) {
						Ok(info) => f(&authority, &info),
						Err(_) => log::error!("Failed to decode stored peer info"),
					}
				}
			}
			valid = cursor.next();
		}
	}

	/// Drop every record the predicate rejects.
	pub fn retain_if(&self, mut f: impl FnMut(&AuthorityId, &AuthorityPeerInfo) -> bool) {
		let mut to_remove = Vec::new();
		self.for_each(|authority, info| {
			if !f(authority, info) {
				to_remove.push(*authority);
			}
		});
		for authority in &to_remove {
			if let Err(error) = self.remove(authority) {
				log::error!("Failed to remove authority record: {error}");
			}
		}
	}
}

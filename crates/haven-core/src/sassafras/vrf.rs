// SPDX-License-Identifier: GPL-3.0

//! VRF inputs, outputs and signing seams for the ticket lottery.
//!
//! The transcript composition — domain labels, input framing and output
//! byte derivation — is fixed here and shared by every implementation.
//! The proof system itself sits behind [`VrfProvider`]: a production
//! deployment plugs in a ring-VRF, while [`DevVrfProvider`] derives
//! everything from BLAKE2b hashes. The dev provider is deterministic and
//! carries no zero-knowledge properties; it exists for tests and
//! development networks.

use crate::{error::LotteryError, primitives::blake2_256, sassafras::Randomness};
use scale::{Decode, Encode};

/// VRF input domain for ticket identifiers.
pub const TICKET_LABEL: &[u8] = b"sassafras-ticket-v1.0";

/// VRF input domain for revealed-key derivation.
pub const REVEALED_LABEL: &[u8] = b"sassafras-revealed-v1.0";

/// VRF input domain for slot claims.
pub const CLAIM_LABEL: &[u8] = b"sassafras-claim-v1.0";

/// Transcript label for secondary slot claims.
pub const SLOT_CLAIM_TRANSCRIPT_LABEL: &[u8] = b"sassafras-slot-claim-transcript-v1.0";

/// Transcript label for ring-signing ticket bodies.
pub const TICKET_BODY_TRANSCRIPT_LABEL: &[u8] = b"sassafras-ticket-body-transcript-v1.0";

/// Output context for deriving ticket ids.
pub const TICKET_ID_CONTEXT: &[u8] = b"ticket-id";

/// Output context for deriving revealed-key seeds.
pub const REVEALED_SEED_CONTEXT: &[u8] = b"revealed-seed";

/// A VRF public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct VrfPublic(pub [u8; 32]);

/// A VRF secret key.
#[derive(Clone)]
pub struct VrfSecret(pub [u8; 32]);

impl core::fmt::Debug for VrfSecret {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str("VrfSecret(..)")
	}
}

/// A VRF keypair.
#[derive(Debug, Clone)]
pub struct VrfKeypair {
	/// The public key.
	pub public: VrfPublic,
	/// The secret key.
	pub secret: VrfSecret,
}

/// A domain-separated VRF input point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrfInput {
	/// The input domain.
	pub domain: Vec<u8>,
	/// Length-framed input items.
	pub data: Vec<u8>,
}

impl VrfInput {
	/// Build an input from a domain and a sequence of data items.
	pub fn new(domain: &[u8], items: &[&[u8]]) -> Self {
		let mut data = Vec::new();
		for item in items {
			(item.len() as u32).encode_to(&mut data);
			data.extend_from_slice(item);
		}
		Self { domain: domain.to_vec(), data }
	}

	fn frame(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.domain.len() + self.data.len() + 8);
		(self.domain.len() as u32).encode_to(&mut out);
		out.extend_from_slice(&self.domain);
		out.extend_from_slice(&self.data);
		out
	}
}

/// A VRF pre-output point, from which output bytes are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct VrfPreOutput(pub [u8; 32]);

/// Everything signed by a (ring-)VRF signature: a transcript label, extra
/// transcript data and the VRF inputs whose pre-outputs the signature
/// commits to.
#[derive(Debug, Clone)]
pub struct VrfSignData {
	/// The transcript label.
	pub label: Vec<u8>,
	/// Additional transcript data items.
	pub transcript_data: Vec<Vec<u8>>,
	/// The VRF inputs.
	pub inputs: Vec<VrfInput>,
}

impl VrfSignData {
	/// Build sign data from its parts.
	pub fn new(label: &[u8], transcript_data: &[&[u8]], inputs: Vec<VrfInput>) -> Self {
		Self {
			label: label.to_vec(),
			transcript_data: transcript_data.iter().map(|item| item.to_vec()).collect(),
			inputs,
		}
	}

	fn challenge(&self) -> [u8; 32] {
		let mut transcript = Transcript::new(&self.label);
		for item in &self.transcript_data {
			transcript.append(b"td", item);
		}
		for input in &self.inputs {
			transcript.append(b"vrf-input", &input.frame());
		}
		transcript.finish()
	}
}

/// A plain VRF signature over some sign data.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct VrfSignature {
	/// The signature bytes.
	pub signature: [u8; 64],
	/// Pre-outputs for each signed input, in order.
	pub pre_outputs: Vec<VrfPreOutput>,
}

/// A ring-VRF signature: proves membership of the ring without revealing
/// which member signed.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RingVrfSignature {
	/// The opaque ring proof.
	pub signature: Vec<u8>,
	/// Pre-outputs for each signed input, in order.
	pub pre_outputs: Vec<VrfPreOutput>,
}

/// The prover side of a ring context: the ordered ring of public keys.
#[derive(Debug, Clone, Default)]
pub struct RingProver {
	/// The ring members.
	pub ring: Vec<VrfPublic>,
}

impl RingProver {
	/// A commitment to the ring membership.
	pub fn ring_root(&self) -> [u8; 32] {
		let mut transcript = Transcript::new(b"ring-root");
		for member in &self.ring {
			transcript.append(b"member", &member.0);
		}
		transcript.finish()
	}
}

/// The VRF scheme used by the lottery.
pub trait VrfProvider: Send + Sync {
	/// Derive a keypair from a 32-byte seed.
	fn keypair_from_seed(&self, seed: &[u8; 32]) -> VrfKeypair;

	/// The pre-output of `secret` on `input`.
	fn vrf_pre_output(&self, secret: &VrfSecret, input: &VrfInput) -> VrfPreOutput;

	/// Sign `data`, committing to the pre-outputs of its inputs.
	fn vrf_sign(&self, secret: &VrfSecret, data: &VrfSignData) -> VrfSignature;

	/// Ring-sign `data` as an anonymous member of the prover's ring.
	fn ring_vrf_sign(
		&self,
		secret: &VrfSecret,
		data: &VrfSignData,
		prover: &RingProver,
	) -> Result<RingVrfSignature, LotteryError>;
}

/// Derive `N` output bytes from an input/pre-output pair under a context
/// label.
pub fn vrf_bytes<const N: usize>(
	context: &[u8],
	input: &VrfInput,
	pre_output: &VrfPreOutput,
) -> [u8; N] {
	let mut transcript = Transcript::new(context);
	transcript.append(b"vrf-input", &input.frame());
	transcript.append(b"VrfOutput", &pre_output.0);
	transcript.bytes()
}

/// A minimal domain-separated transcript over BLAKE2b-256.
///
/// Messages are absorbed with length framing; output expands the final
/// state block by block.
struct Transcript {
	state: [u8; 32],
}

impl Transcript {
	fn new(label: &[u8]) -> Self {
		let mut framed = Vec::with_capacity(label.len() + 4);
		(label.len() as u32).encode_to(&mut framed);
		framed.extend_from_slice(label);
		Self { state: blake2_256(&framed).0 }
	}

	fn append(&mut self, label: &[u8], message: &[u8]) {
		let mut framed = Vec::with_capacity(32 + label.len() + message.len() + 8);
		framed.extend_from_slice(&self.state);
		(label.len() as u32).encode_to(&mut framed);
		framed.extend_from_slice(label);
		(message.len() as u32).encode_to(&mut framed);
		framed.extend_from_slice(message);
		self.state = blake2_256(&framed).0;
	}

	fn finish(self) -> [u8; 32] {
		self.state
	}

	fn bytes<const N: usize>(&self) -> [u8; N] {
		let mut out = [0u8; N];
		let mut block_index = 0u32;
		let mut offset = 0;
		while offset < N {
			let mut framed = Vec::with_capacity(36);
			framed.extend_from_slice(&self.state);
			block_index.encode_to(&mut framed);
			let block = blake2_256(&framed).0;
			let take = (N - offset).min(32);
			out[offset..offset + take].copy_from_slice(&block[..take]);
			offset += take;
			block_index += 1;
		}
		out
	}
}

/// Deterministic hash-based VRF provider.
///
/// Outputs are unpredictable only to parties without the secret; there is
/// no proof of correctness, so this must not be used where third parties
/// verify claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevVrfProvider;

impl VrfProvider for DevVrfProvider {
	fn keypair_from_seed(&self, seed: &[u8; 32]) -> VrfKeypair {
		let mut transcript = Transcript::new(b"dev-vrf-public");
		transcript.append(b"seed", seed);
		VrfKeypair { public: VrfPublic(transcript.finish()), secret: VrfSecret(*seed) }
	}

	fn vrf_pre_output(&self, secret: &VrfSecret, input: &VrfInput) -> VrfPreOutput {
		let mut transcript = Transcript::new(b"dev-vrf-pre-output");
		transcript.append(b"secret", &secret.0);
		transcript.append(b"input", &input.frame());
		VrfPreOutput(transcript.finish())
	}

	fn vrf_sign(&self, secret: &VrfSecret, data: &VrfSignData) -> VrfSignature {
		let pre_outputs =
			data.inputs.iter().map(|input| self.vrf_pre_output(secret, input)).collect();
		let mut transcript = Transcript::new(b"dev-vrf-signature");
		transcript.append(b"secret", &secret.0);
		transcript.append(b"challenge", &data.challenge());
		VrfSignature { signature: transcript.bytes(), pre_outputs }
	}

	fn ring_vrf_sign(
		&self,
		secret: &VrfSecret,
		data: &VrfSignData,
		prover: &RingProver,
	) -> Result<RingVrfSignature, LotteryError> {
		let public = {
			let mut transcript = Transcript::new(b"dev-vrf-public");
			transcript.append(b"seed", &secret.0);
			VrfPublic(transcript.finish())
		};
		if !prover.ring.contains(&public) {
			return Err(LotteryError::SignatureVerificationFailed);
		}

		let pre_outputs =
			data.inputs.iter().map(|input| self.vrf_pre_output(secret, input)).collect();
		let mut transcript = Transcript::new(b"dev-ring-vrf-signature");
		transcript.append(b"secret", &secret.0);
		transcript.append(b"ring-root", &prover.ring_root());
		transcript.append(b"challenge", &data.challenge());
		Ok(RingVrfSignature {
			signature: transcript.bytes::<64>().to_vec(),
			pre_outputs,
		})
	}
}

/// VRF input claiming ownership of a ticket slot.
pub fn ticket_id_input(randomness: &Randomness, attempt: u32, epoch: u64) -> VrfInput {
	VrfInput::new(
		TICKET_LABEL,
		&[randomness.as_slice(), &attempt.to_le_bytes(), &epoch.to_le_bytes()],
	)
}

/// VRF input for deriving the revealed key of a ticket.
pub fn revealed_key_input(randomness: &Randomness, attempt: u32, epoch: u64) -> VrfInput {
	VrfInput::new(
		REVEALED_LABEL,
		&[randomness.as_slice(), &attempt.to_le_bytes(), &epoch.to_le_bytes()],
	)
}

/// VRF input for claiming slot ownership during block production.
pub fn slot_claim_input(randomness: &Randomness, slot: u64, epoch: u64) -> VrfInput {
	VrfInput::new(
		CLAIM_LABEL,
		&[randomness.as_slice(), &slot.to_le_bytes(), &epoch.to_le_bytes()],
	)
}

/// Sign data for a secondary slot claim: only the epoch randomness is
/// committed to.
pub fn slot_claim_sign_data(randomness: &Randomness, slot: u64, epoch: u64) -> VrfSignData {
	VrfSignData::new(
		SLOT_CLAIM_TRANSCRIPT_LABEL,
		&[],
		vec![slot_claim_input(randomness, slot, epoch)],
	)
}

/// Ticket id derived from a ticket input/pre-output pair.
pub fn make_ticket_id(input: &VrfInput, pre_output: &VrfPreOutput) -> u128 {
	let bytes = vrf_bytes::<16>(TICKET_ID_CONTEXT, input, pre_output);
	u128::from_le_bytes(bytes)
}

/// Seed of the revealed keypair, derived from the revealed input and
/// pre-output.
pub fn make_revealed_key_seed(input: &VrfInput, pre_output: &VrfPreOutput) -> [u8; 32] {
	vrf_bytes::<32>(REVEALED_SEED_CONTEXT, input, pre_output)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vrf_bytes_are_deterministic_and_context_separated() {
		let input = ticket_id_input(&[1u8; 32], 0, 7);
		let pre_output = VrfPreOutput([2u8; 32]);

		let first: [u8; 16] = vrf_bytes(TICKET_ID_CONTEXT, &input, &pre_output);
		let second: [u8; 16] = vrf_bytes(TICKET_ID_CONTEXT, &input, &pre_output);
		assert_eq!(first, second);

		let other_context: [u8; 16] = vrf_bytes(REVEALED_SEED_CONTEXT, &input, &pre_output);
		assert_ne!(first, other_context);
	}

	#[test]
	fn inputs_differ_by_domain_and_data() {
		let randomness = [3u8; 32];
		assert_ne!(ticket_id_input(&randomness, 0, 1), revealed_key_input(&randomness, 0, 1));
		assert_ne!(ticket_id_input(&randomness, 0, 1), ticket_id_input(&randomness, 1, 1));
		assert_ne!(ticket_id_input(&randomness, 0, 1), ticket_id_input(&randomness, 0, 2));
	}

	#[test]
	fn dev_provider_is_deterministic() {
		let provider = DevVrfProvider;
		let keypair = provider.keypair_from_seed(&[7u8; 32]);
		let again = provider.keypair_from_seed(&[7u8; 32]);
		assert_eq!(keypair.public, again.public);

		let input = ticket_id_input(&[1u8; 32], 2, 3);
		assert_eq!(
			provider.vrf_pre_output(&keypair.secret, &input),
			provider.vrf_pre_output(&keypair.secret, &input),
		);

		let other = provider.keypair_from_seed(&[8u8; 32]);
		assert_ne!(
			provider.vrf_pre_output(&keypair.secret, &input),
			provider.vrf_pre_output(&other.secret, &input),
		);
	}

	#[test]
	fn ring_signing_requires_ring_membership() {
		let provider = DevVrfProvider;
		let member = provider.keypair_from_seed(&[1u8; 32]);
		let outsider = provider.keypair_from_seed(&[2u8; 32]);
		let prover = RingProver { ring: vec![member.public] };

		let data = slot_claim_sign_data(&[0u8; 32], 5, 1);
		assert!(provider.ring_vrf_sign(&member.secret, &data, &prover).is_ok());
		assert!(matches!(
			provider.ring_vrf_sign(&outsider.secret, &data, &prover),
			Err(LotteryError::SignatureVerificationFailed),
		));
	}

	#[test]
	fn signatures_carry_pre_outputs_in_input_order() {
		let provider = DevVrfProvider;
		let keypair = provider.keypair_from_seed(&[9u8; 32]);
		let randomness = [4u8; 32];
		let inputs =
			vec![slot_claim_input(&randomness, 1, 2), revealed_key_input(&randomness, 0, 2)];
		let data = VrfSignData::new(CLAIM_LABEL, &[b"extra"], inputs.clone());

		let signature = provider.vrf_sign(&keypair.secret, &data);
		assert_eq!(signature.pre_outputs.len(), 2);
		assert_eq!(
			signature.pre_outputs[0],
			provider.vrf_pre_output(&keypair.secret, &inputs[0]),
		);
		assert_eq!(
			signature.pre_outputs[1],
			provider.vrf_pre_output(&keypair.secret, &inputs[1]),
		);
	}
}

// SPDX-License-Identifier: GPL-3.0

//! Binary codec for trie nodes.
//!
//! The first byte of a node encoding identifies the variant in its high
//! bits and starts the partial-key length in its low bits:
//!
//! ```text
//! 01xx_xxxx  leaf                          (6-bit length)
//! 10xx_xxxx  branch without value          (6-bit length)
//! 11xx_xxxx  branch with value             (6-bit length)
//! 001x_xxxx  leaf with hashed value        (5-bit length)
//! 0001_xxxx  branch with hashed value      (4-bit length)
//! 0000_0000  empty trie
//! ```
//!
//! A saturated length field spills into subsequent bytes, each adding up
//! to 255 nibbles, terminated by the first byte below 255. Then follow the
//! packed partial key, a little-endian 16-bit children bitmap (branches
//! only), the value (SCALE length-prefixed when inline, raw 32 bytes when
//! hashed) and the present children's references as SCALE byte-vectors.
//!
//! The Merkle value of an encoding is the encoding itself when shorter
//! than 32 bytes, otherwise its BLAKE2b-256 hash; roots are always
//! referenced by hash.

use crate::{
	error::CodecError,
	primitives::blake2_256,
	trie::{
		StateVersion,
		nibbles::Nibbles,
		node::{Branch, Dummy, Leaf, MerkleValue, Node, NodeValue},
	},
};
use scale::{Compact, Decode, Encode};
use sp_core::H256;

/// Values longer than this are stored out of line under state version V1.
const HASHED_VALUE_THRESHOLD: usize = 32;

/// Partial keys longer than this are rejected.
const MAX_PARTIAL_KEY_LEN: usize = u16::MAX as usize;

/// The encoding of the empty trie.
pub const EMPTY_TRIE_ENCODING: [u8; 1] = [0x00];

/// The state root of the empty trie.
pub fn empty_trie_root() -> H256 {
	blake2_256(&EMPTY_TRIE_ENCODING)
}

/// BLAKE2b-256 of a node encoding. This is the database key of a root.
pub fn hash256(encoding: &[u8]) -> H256 {
	blake2_256(encoding)
}

/// The Merkle value of a node encoding.
pub fn merkle_value(encoding: &[u8]) -> MerkleValue {
	MerkleValue::from_encoding(encoding)
}

/// Encode a node.
///
/// Non-dummy children are encoded recursively, since their Merkle values
/// are part of the parent's encoding; dummy children contribute their
/// stored Merkle value directly. Whenever a value moves out of line
/// (state version V1, length above 32), `on_hashed_value` receives the
/// value hash and bytes so the caller can persist the value separately.
pub fn encode_node(
	node: &Node,
	version: StateVersion,
	on_hashed_value: &mut dyn FnMut(H256, &[u8]),
) -> Result<Vec<u8>, CodecError> {
	match node {
		Node::Leaf(leaf) => encode_leaf(leaf, version, on_hashed_value),
		Node::Branch(branch) => encode_branch(branch, version, on_hashed_value),
		// Dummies are references, not nodes; their encoding already lives
		// in the backend.
		Node::Dummy(_) => Err(CodecError::InvalidNodeType(0x01)),
	}
}

/// Decode a node. Children of a decoded branch are dummies carrying the
/// Merkle values read from the encoding.
pub fn decode_node(bytes: &[u8]) -> Result<Node, CodecError> {
	let mut input = bytes;
	let header = take(&mut input, 1)?[0];

	let (variant, first_len_bits) = match header >> 6 {
		0b01 => (Variant::Leaf, header & 0x3f),
		0b10 => (Variant::BranchNoValue, header & 0x3f),
		0b11 => (Variant::BranchWithValue, header & 0x3f),
		_ if header >> 5 == 0b001 => (Variant::LeafHashed, header & 0x1f),
		_ if header >> 4 == 0b0001 => (Variant::BranchHashed, header & 0x0f),
		_ => return Err(CodecError::InvalidNodeType(header)),
	};

	let partial_key = decode_partial_key(&mut input, variant, first_len_bits)?;

	if !variant.is_branch() {
		let Some(value) = decode_value(&mut input, variant)? else {
			return Err(CodecError::InvalidNodeType(header));
		};
		return Ok(Node::Leaf(Leaf { partial_key, value }));
	}

	let bitmap_bytes = take(&mut input, 2)?;
	let bitmap = u16::from_le_bytes([bitmap_bytes[0], bitmap_bytes[1]]);
	if bitmap == 0 {
		// A branch without children would have been encoded as a leaf.
		return Err(CodecError::InvalidNodeType(header));
	}

	let value = decode_value(&mut input, variant)?;

	let mut children: [Option<Box<Node>>; 16] = Default::default();
	for (index, child) in children.iter_mut().enumerate() {
		if bitmap & (1 << index) == 0 {
			continue;
		}
		let len = decode_compact_len(&mut input)?;
		let reference = take(&mut input, len)?;
		*child = Some(Box::new(Node::Dummy(Dummy {
			merkle_value: MerkleValue::from_raw(reference.to_vec()),
		})));
	}

	Ok(Node::Branch(Branch { partial_key, children, value }))
}

#[derive(Clone, Copy, PartialEq)]
enum Variant {
	Leaf,
	BranchNoValue,
	BranchWithValue,
	LeafHashed,
	BranchHashed,
}

impl Variant {
	fn is_branch(&self) -> bool {
		matches!(self, Variant::BranchNoValue | Variant::BranchWithValue | Variant::BranchHashed)
	}

	/// The saturation point of the first byte's length field.
	fn len_threshold(&self) -> u8 {
		match self {
			Variant::Leaf | Variant::BranchNoValue | Variant::BranchWithValue => 0x3f,
			Variant::LeafHashed => 0x1f,
			Variant::BranchHashed => 0x0f,
		}
	}

	fn header_bits(&self) -> u8 {
		match self {
			Variant::Leaf => 0b01 << 6,
			Variant::BranchNoValue => 0b10 << 6,
			Variant::BranchWithValue => 0b11 << 6,
			Variant::LeafHashed => 0b001 << 5,
			Variant::BranchHashed => 0b0001 << 4,
		}
	}
}

fn encode_leaf(
	leaf: &Leaf,
	version: StateVersion,
	on_hashed_value: &mut dyn FnMut(H256, &[u8]),
) -> Result<Vec<u8>, CodecError> {
	let value = prepare_value(&leaf.value, version, on_hashed_value);
	let variant = match value {
		PreparedValue::Inline(_) => Variant::Leaf,
		PreparedValue::Hashed(_) => Variant::LeafHashed,
	};

	let mut out = encode_header(variant, leaf.partial_key.len())?;
	out.extend_from_slice(&leaf.partial_key.pack());
	value.write(&mut out);
	Ok(out)
}

fn encode_branch(
	branch: &Branch,
	version: StateVersion,
	on_hashed_value: &mut dyn FnMut(H256, &[u8]),
) -> Result<Vec<u8>, CodecError> {
	let value = branch.value.as_ref().map(|value| prepare_value(value, version, on_hashed_value));
	let variant = match &value {
		None => Variant::BranchNoValue,
		Some(PreparedValue::Inline(_)) => Variant::BranchWithValue,
		Some(PreparedValue::Hashed(_)) => Variant::BranchHashed,
	};

	let mut out = encode_header(variant, branch.partial_key.len())?;
	out.extend_from_slice(&branch.partial_key.pack());
	out.extend_from_slice(&branch.children_bitmap().to_le_bytes());
	if let Some(value) = value {
		value.write(&mut out);
	}

	for child in branch.children.iter().flatten() {
		let reference = match child.as_ref() {
			Node::Dummy(dummy) => dummy.merkle_value.clone(),
			transparent => {
				let encoding = encode_node(transparent, version, on_hashed_value)?;
				merkle_value(&encoding)
			},
		};
		Compact(reference.as_bytes().len() as u32).encode_to(&mut out);
		out.extend_from_slice(reference.as_bytes());
	}
	Ok(out)
}

enum PreparedValue<'a> {
	Inline(&'a [u8]),
	Hashed(H256),
}

impl PreparedValue<'_> {
	fn write(&self, out: &mut Vec<u8>) {
		match self {
			PreparedValue::Inline(bytes) => {
				Compact(bytes.len() as u32).encode_to(out);
				out.extend_from_slice(bytes);
			},
			PreparedValue::Hashed(hash) => out.extend_from_slice(hash.as_bytes()),
		}
	}
}

fn prepare_value<'a>(
	value: &'a NodeValue,
	version: StateVersion,
	on_hashed_value: &mut dyn FnMut(H256, &[u8]),
) -> PreparedValue<'a> {
	match value {
		NodeValue::Hashed(hash) => PreparedValue::Hashed(*hash),
		NodeValue::Inline(bytes) => {
			if version == StateVersion::V1 && bytes.len() > HASHED_VALUE_THRESHOLD {
				let hash = blake2_256(bytes);
				on_hashed_value(hash, bytes);
				PreparedValue::Hashed(hash)
			} else {
				PreparedValue::Inline(bytes)
			}
		},
	}
}

fn encode_header(variant: Variant, partial_key_len: usize) -> Result<Vec<u8>, CodecError> {
	if partial_key_len > MAX_PARTIAL_KEY_LEN {
		return Err(CodecError::InvalidKeyLength);
	}
	let threshold = variant.len_threshold() as usize;
	if partial_key_len < threshold {
		return Ok(vec![variant.header_bits() | partial_key_len as u8]);
	}
	let mut out = vec![variant.header_bits() | threshold as u8];
	let mut remaining = partial_key_len - threshold;
	while remaining >= 255 {
		out.push(255);
		remaining -= 255;
	}
	out.push(remaining as u8);
	Ok(out)
}

fn decode_partial_key(
	input: &mut &[u8],
	variant: Variant,
	first_len_bits: u8,
) -> Result<Nibbles, CodecError> {
	let mut len = first_len_bits as usize;
	if first_len_bits == variant.len_threshold() {
		loop {
			let byte = take(input, 1)?[0];
			len += byte as usize;
			if len > MAX_PARTIAL_KEY_LEN {
				return Err(CodecError::InvalidKeyLength);
			}
			if byte < 255 {
				break;
			}
		}
	}

	let packed = take(input, len.div_ceil(2))?;
	// The padding half-byte of an odd-length key must be zero.
	if len % 2 == 1 && packed[0] >> 4 != 0 {
		return Err(CodecError::InvalidKeyLength);
	}
	Ok(Nibbles::unpack(len, packed))
}

fn decode_value(input: &mut &[u8], variant: Variant) -> Result<Option<NodeValue>, CodecError> {
	match variant {
		Variant::BranchNoValue => Ok(None),
		Variant::Leaf | Variant::BranchWithValue => {
			let len = decode_compact_len(input)?;
			let bytes = take(input, len)?;
			Ok(Some(NodeValue::Inline(bytes.to_vec())))
		},
		Variant::LeafHashed | Variant::BranchHashed => {
			let bytes = take(input, 32)?;
			Ok(Some(NodeValue::Hashed(H256::from_slice(bytes))))
		},
	}
}

fn decode_compact_len(input: &mut &[u8]) -> Result<usize, CodecError> {
	let len = Compact::<u32>::decode(input).map_err(|_| CodecError::UnexpectedEof)?;
	Ok(len.0 as usize)
}

fn take<'a>(input: &mut &'a [u8], count: usize) -> Result<&'a [u8], CodecError> {
	if input.len() < count {
		return Err(CodecError::TooFewBytes { needed: count, available: input.len() });
	}
	let (taken, rest) = input.split_at(count);
	*input = rest;
	Ok(taken)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn no_values(_: H256, _: &[u8]) {}

	#[test]
	fn empty_trie_root_is_the_known_constant() {
		assert_eq!(
			hex::encode(empty_trie_root()),
			"03170a2e7597b7b7e3d84c05391d139a62b157e78786d8c082f29dcf4c111314",
		);
	}

	#[test]
	fn leaf_roundtrip() {
		let leaf = Node::leaf(
			Nibbles::from_bytes(&[0x01, 0x02]),
			NodeValue::Inline(b"value".to_vec()),
		);
		let encoding = encode_node(&leaf, StateVersion::V0, &mut no_values).unwrap();
		assert_eq!(encoding[0] >> 6, 0b01);
		assert_eq!(decode_node(&encoding).unwrap(), leaf);
	}

	#[test]
	fn odd_partial_key_roundtrip() {
		let leaf = Node::leaf(
			Nibbles::from_nibbles(vec![0x3, 0x0a, 0x0b]),
			NodeValue::Inline(vec![0xff]),
		);
		let encoding = encode_node(&leaf, StateVersion::V0, &mut no_values).unwrap();
		assert_eq!(decode_node(&encoding).unwrap(), leaf);
	}

	#[test]
	fn long_partial_key_spills_length_bytes() {
		let nibbles = Nibbles::from_nibbles(vec![1u8; 400]);
		let leaf = Node::leaf(nibbles.clone(), NodeValue::Inline(vec![7]));
		let encoding = encode_node(&leaf, StateVersion::V0, &mut no_values).unwrap();
		// 0x3f saturated, then 255, then the remainder.
		assert_eq!(encoding[0] & 0x3f, 0x3f);
		assert_eq!(encoding[1], 255);
		assert_eq!(encoding[2], (400 - 0x3f - 255) as u8);
		let decoded = decode_node(&encoding).unwrap();
		assert_eq!(decoded.partial_key(), nibbles.as_slice());
	}

	#[test]
	fn branch_children_decode_as_dummies() {
		let mut branch = Branch::empty(Nibbles::new());
		branch.value = Some(NodeValue::Inline(vec![9]));
		branch.children[2] =
			Some(Box::new(Node::leaf(Nibbles::new(), NodeValue::Inline(vec![1]))));
		branch.children[11] =
			Some(Box::new(Node::leaf(Nibbles::new(), NodeValue::Inline(vec![2]))));
		let node = Node::Branch(branch);

		let encoding = encode_node(&node, StateVersion::V0, &mut no_values).unwrap();
		assert_eq!(encoding[0] >> 6, 0b11);

		let Node::Branch(decoded) = decode_node(&encoding).unwrap() else {
			panic!("expected a branch");
		};
		assert_eq!(decoded.children_bitmap(), (1 << 2) | (1 << 11));
		assert!(decoded.children[2].as_ref().unwrap().is_dummy());
		assert!(decoded.children[11].as_ref().unwrap().is_dummy());
	}

	#[test]
	fn v1_hashes_large_values_out_of_line() {
		let value = vec![0xaa; 64];
		let leaf = Node::leaf(Nibbles::from_bytes(&[0x01]), NodeValue::Inline(value.clone()));

		let mut emitted = Vec::new();
		let encoding = encode_node(&leaf, StateVersion::V1, &mut |hash, bytes| {
			emitted.push((hash, bytes.to_vec()));
		})
		.unwrap();

		assert_eq!(encoding[0] >> 5, 0b001);
		assert_eq!(emitted, vec![(blake2_256(&value), value.clone())]);
		let Node::Leaf(decoded) = decode_node(&encoding).unwrap() else {
			panic!("expected a leaf");
		};
		assert_eq!(decoded.value, NodeValue::Hashed(blake2_256(&value)));

		// V0 keeps the same value inline.
		let mut emitted = Vec::new();
		let encoding = encode_node(&leaf, StateVersion::V0, &mut |hash, bytes| {
			emitted.push((hash, bytes.to_vec()));
		})
		.unwrap();
		assert_eq!(encoding[0] >> 6, 0b01);
		assert!(emitted.is_empty());
	}

	#[test]
	fn merkle_value_inlines_short_encodings() {
		let short = vec![1u8; 31];
		assert_eq!(merkle_value(&short).as_bytes(), short.as_slice());
		let long = vec![1u8; 32];
		assert_eq!(merkle_value(&long).as_bytes(), blake2_256(&long).as_bytes());
	}

	#[test]
	fn truncated_inputs_are_rejected() {
		let leaf = Node::leaf(Nibbles::from_bytes(&[0x01]), NodeValue::Inline(vec![1, 2, 3]));
		let encoding = encode_node(&leaf, StateVersion::V0, &mut no_values).unwrap();
		assert!(matches!(
			decode_node(&encoding[..encoding.len() - 1]),
			Err(CodecError::TooFewBytes { .. })
		));
		assert!(matches!(decode_node(&[]), Err(CodecError::TooFewBytes { .. })));
		assert!(matches!(decode_node(&[0x00]), Err(CodecError::InvalidNodeType(0))));
	}
}

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ethers::types::{Address, H256};
use ethers::utils::keccak256;

/// Reduces a big-endian byte string into the scalar field.
pub fn reduce_bytes(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// `reduce(keccak(data))`.
pub fn keccak_to_field(data: &[u8]) -> Fr {
    reduce_bytes(&keccak256(data))
}

/// Encodes a field element as a 32-byte big-endian word, the width of an EVM slot.
pub fn field_to_word(value: &Fr) -> H256 {
    let bytes = value.into_bigint().to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    H256(word)
}

/// Decodes a 32-byte big-endian word, refusing anything at or above the field modulus.
pub fn word_to_field(word: &H256) -> Option<Fr> {
    let value = reduce_bytes(word.as_bytes());
    (field_to_word(&value) == *word).then_some(value)
}

pub fn address_to_field(address: &Address) -> Fr {
    reduce_bytes(address.as_bytes())
}

pub fn u64_to_word(value: u64) -> H256 {
    field_to_word(&Fr::from(value))
}

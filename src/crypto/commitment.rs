use crate::crypto::hash::{FieldHash, HashError};
use crate::generic::object::Com;
use crate::util::{field_to_word, keccak_to_field};
use ark_bn254::Fr;
use ethers::types::H256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The publisher's revocation password.
///
/// Held only while a commitment is derived from it; derivation consumes the secret and the
/// backing buffer is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RevocationSecret(String);

impl RevocationSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `reduce(keccak(secret))`, the value the circuit sees as `revoker_secret`.
    fn reduce(&self) -> Fr {
        keccak_to_field(self.0.as_bytes())
    }
}

impl fmt::Debug for RevocationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevocationSecret(..)")
    }
}

impl From<&str> for RevocationSecret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The two-step revocation commitment `(revoker, revokerHash)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commitment {
    pub revoker: Com<Fr>,
    pub revoker_hash: Com<Fr>,
}

/// A commitment together with the reduced secret it was opened from.
pub(crate) struct Opening {
    pub reduced_secret: Fr,
    pub commitment: Commitment,
}

impl Commitment {
    /// `revoker = H(ref, reduce(keccak(secret)))`, `revokerHash = H(revoker, revoker)`.
    pub fn derive<H: FieldHash<Fr>>(secret: RevocationSecret, reference: Fr) -> Result<Self, HashError> {
        Ok(Self::open::<H>(secret, reference)?.commitment)
    }

    pub(crate) fn open<H: FieldHash<Fr>>(secret: RevocationSecret, reference: Fr) -> Result<Opening, HashError> {
        let reduced_secret = secret.reduce();
        drop(secret);

        let revoker = H::hash2(reference, reduced_secret)?;
        let revoker_hash = H::hash2(revoker, revoker)?;

        Ok(Opening {
            reduced_secret,
            commitment: Commitment {
                revoker,
                revoker_hash,
            },
        })
    }

    pub fn revoker_word(&self) -> H256 {
        field_to_word(&self.revoker)
    }

    pub fn revoker_hash_word(&self) -> H256 {
        field_to_word(&self.revoker_hash)
    }

    /// Bit-for-bit comparison against a revoker hash read back from ledger storage.
    pub fn opens(&self, stored: &H256) -> bool {
        self.revoker_hash_word() == *stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::hash::CircomPoseidon;
    use ark_ff::Zero;
    use proptest::prelude::*;

    type H = CircomPoseidon;

    #[test]
    fn scenario_pw1_with_zero_reference() {
        let c = Commitment::derive::<H>("pw1".into(), Fr::zero()).unwrap();
        let expected_revoker = H::hash2(Fr::zero(), keccak_to_field(b"pw1")).unwrap();
        assert_eq!(c.revoker, expected_revoker);
        assert_eq!(c.revoker_hash, H::hash2(expected_revoker, expected_revoker).unwrap());
        assert!(c.opens(&field_to_word(&c.revoker_hash)));

        let other = Commitment::derive::<H>("pw2".into(), Fr::zero()).unwrap();
        assert!(!other.opens(&c.revoker_hash_word()));
    }

    #[test]
    fn reference_changes_commitment() {
        let a = Commitment::derive::<H>("same".into(), Fr::zero()).unwrap();
        let b = Commitment::derive::<H>("same".into(), Fr::from(1u64)).unwrap();
        assert_ne!(a.revoker_hash, b.revoker_hash);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let s = RevocationSecret::new("hunter2");
        assert!(!format!("{s:?}").contains("hunter2"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn derivation_is_deterministic(secret in ".{1,40}", reference in any::<u64>()) {
            let r = Fr::from(reference);
            let a = Commitment::derive::<H>(secret.as_str().into(), r).unwrap();
            let b = Commitment::derive::<H>(secret.as_str().into(), r).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn distinct_secrets_give_distinct_commitments(a in ".{1,40}", b in ".{1,40}") {
            prop_assume!(a != b);
            let ca = Commitment::derive::<H>(a.as_str().into(), Fr::zero()).unwrap();
            let cb = Commitment::derive::<H>(b.as_str().into(), Fr::zero()).unwrap();
            prop_assert_ne!(ca.revoker, cb.revoker);
            prop_assert_ne!(ca.revoker_hash, cb.revoker_hash);
        }

        #[test]
        fn single_bit_flip_breaks_opening(secret in "[a-z0-9]{1,24}", byte in 0usize..24, bit in 0u8..7) {
            let mut mutated = secret.clone().into_bytes();
            let i = byte % mutated.len();
            mutated[i] ^= 1 << bit;
            prop_assume!(mutated.is_ascii());
            let mutated = String::from_utf8(mutated).unwrap();

            let stored = Commitment::derive::<H>(secret.as_str().into(), Fr::zero()).unwrap().revoker_hash_word();
            let attempt = Commitment::derive::<H>(mutated.as_str().into(), Fr::zero()).unwrap();
            prop_assert!(!attempt.opens(&stored));
        }
    }
}

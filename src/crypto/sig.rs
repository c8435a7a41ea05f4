use crate::crypto::hash::{FieldHash, HashError};
use crate::error::{AttestError, Result};
use crate::util::{field_to_word, word_to_field};
use ark_bn254::Fr;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::constraints::EdwardsVar;
use ark_ed_on_bn254::{EdwardsAffine, EdwardsProjective, Fr as EdScalar};
use ark_ff::{BigInteger, PrimeField, UniformRand};
use ark_r1cs_std::convert::ToBitsGadget;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::{AllocVar, AllocationMode, Boolean, CurveVar, EqGadget};
use ark_relations::ns;
use ark_relations::r1cs::{Namespace, SynthesisError};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ethers::types::H256;
use rand::{CryptoRng, RngCore};
use std::borrow::Borrow;

/// The message an authorization signature covers: `H(address, role, timestamp, random_nonce)`.
pub fn identity<H: FieldHash<Fr>>(
    address: Fr,
    role: Fr,
    timestamp: Fr,
    random_nonce: Fr,
) -> Result<Fr, HashError> {
    H::hash(&[address, role, timestamp, random_nonce])
}

pub fn identity_zk<H: FieldHash<Fr>>(
    address: &FpVar<Fr>,
    role: &FpVar<Fr>,
    timestamp: &FpVar<Fr>,
    random_nonce: &FpVar<Fr>,
) -> Result<FpVar<Fr>, SynthesisError> {
    H::hash_in_zk(&[
        address.clone(),
        role.clone(),
        timestamp.clone(),
        random_nonce.clone(),
    ])
}

fn challenge<H: FieldHash<Fr>>(r: &EdwardsAffine, pk: &EdwardsAffine, msg: Fr) -> Result<Fr, HashError> {
    H::hash(&[r.x, r.y, pk.x, pk.y, msg])
}

fn to_scalar(value: Fr) -> EdScalar {
    EdScalar::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

fn point_from_words(x: &H256, y: &H256, field: &'static str) -> Result<EdwardsAffine> {
    let x = word_to_field(x).ok_or(AttestError::InvalidWitness { field })?;
    let y = word_to_field(y).ok_or(AttestError::InvalidWitness { field })?;
    let point = EdwardsAffine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(AttestError::validation(field, "not a point of the signing subgroup"));
    }
    Ok(point)
}

/// EdDSA signature over the twisted Edwards curve embedded in BN254, with circom Poseidon as the hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, CanonicalSerialize, CanonicalDeserialize)]
pub struct EdSignature {
    pub r: EdwardsAffine,
    pub s: EdScalar,
}

impl EdSignature {
    pub fn s_word(&self) -> H256 {
        let bytes = self.s.into_bigint().to_bytes_be();
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(&bytes);
        H256(word)
    }

    pub fn r_words(&self) -> (H256, H256) {
        (field_to_word(&self.r.x), field_to_word(&self.r.y))
    }

    /// Rebuilds a signature from wire words, rejecting anything that is not canonical.
    pub fn from_words(rx: &H256, ry: &H256, s: &H256) -> Result<Self> {
        let r = point_from_words(rx, ry, "sig_r")?;
        let s_field = word_to_field(s).ok_or(AttestError::InvalidWitness { field: "sig_s" })?;
        let s_scalar = to_scalar(s_field);
        if s_scalar.into_bigint().to_bytes_le() != s_field.into_bigint().to_bytes_le() {
            return Err(AttestError::validation("sig_s", "not reduced modulo the subgroup order"));
        }
        Ok(Self { r, s: s_scalar })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, CanonicalSerialize, CanonicalDeserialize)]
pub struct VerifyingKey(pub EdwardsAffine);

impl VerifyingKey {
    pub fn from_words(x: &H256, y: &H256) -> Result<Self> {
        point_from_words(x, y, "pubkey").map(VerifyingKey)
    }

    pub fn words(&self) -> (H256, H256) {
        (field_to_word(&self.0.x), field_to_word(&self.0.y))
    }

    /// Checks `s·G == R + h·pk` with `h = H(R.x, R.y, pk.x, pk.y, msg)`.
    pub fn verify<H: FieldHash<Fr>>(&self, msg: Fr, signature: &EdSignature) -> bool {
        let Ok(h) = challenge::<H>(&signature.r, &self.0, msg).map(to_scalar) else {
            return false;
        };
        let lhs = EdwardsAffine::generator() * signature.s;
        let rhs = self.0 * h + signature.r;
        lhs == rhs
    }

    pub fn verify_zk<H: FieldHash<Fr>>(
        pubkey: &VerifyingKeyVar,
        signature: &EdSignatureVar,
        msg: &FpVar<Fr>,
    ) -> Result<Boolean<Fr>, SynthesisError> {
        let h = H::hash_in_zk(&[
            signature.r.x.clone(),
            signature.r.y.clone(),
            pubkey.0.x.clone(),
            pubkey.0.y.clone(),
            msg.clone(),
        ])?;

        let generator = EdwardsVar::constant(EdwardsProjective::from(EdwardsAffine::generator()));
        let lhs = generator.scalar_mul_le(signature.s.to_bits_le()?.iter())?;
        let rhs = pubkey.0.scalar_mul_le(h.to_bits_le()?.iter())? + signature.r.clone();

        lhs.is_eq(&rhs)
    }
}

/// The authorization service's key. Issues role signatures; never leaves the service.
#[derive(Clone)]
pub struct SigningKey(EdScalar);

impl SigningKey {
    pub fn generate(rng: &mut (impl CryptoRng + RngCore)) -> Self {
        Self(EdScalar::rand(rng))
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        Self(EdScalar::from_be_bytes_mod_order(bytes))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey((EdwardsAffine::generator() * self.0).into_affine())
    }

    /// Deterministic nonce `r = H(sk, msg)`, then `s = r + h·sk`.
    pub fn sign<H: FieldHash<Fr>>(&self, msg: Fr) -> Result<EdSignature, HashError> {
        let sk_base = Fr::from_le_bytes_mod_order(&self.0.into_bigint().to_bytes_le());
        let r = to_scalar(H::hash2(sk_base, msg)?);
        let big_r = (EdwardsAffine::generator() * r).into_affine();
        let pk = self.verifying_key();
        let h = to_scalar(challenge::<H>(&big_r, &pk.0, msg)?);

        Ok(EdSignature {
            r: big_r,
            s: r + h * self.0,
        })
    }
}

#[derive(Clone)]
pub struct VerifyingKeyVar(pub EdwardsVar);

impl AllocVar<VerifyingKey, Fr> for VerifyingKeyVar {
    fn new_variable<T: Borrow<VerifyingKey>>(
        cs: impl Into<Namespace<Fr>>,
        f: impl FnOnce() -> Result<T, SynthesisError>,
        mode: AllocationMode,
    ) -> Result<Self, SynthesisError> {
        let ns = cs.into();
        let cs = ns.cs();
        let res = f();
        res.and_then(|rec| {
            let rec = rec.borrow();
            let point = EdwardsVar::new_variable(
                ns!(cs, "pubkey"),
                || Ok(EdwardsProjective::from(rec.0)),
                mode,
            )?;
            Ok(VerifyingKeyVar(point))
        })
    }
}

#[derive(Clone)]
pub struct EdSignatureVar {
    pub r: EdwardsVar,
    pub s: FpVar<Fr>,
}

impl AllocVar<EdSignature, Fr> for EdSignatureVar {
    fn new_variable<T: Borrow<EdSignature>>(
        cs: impl Into<Namespace<Fr>>,
        f: impl FnOnce() -> Result<T, SynthesisError>,
        mode: AllocationMode,
    ) -> Result<Self, SynthesisError> {
        let ns = cs.into();
        let cs = ns.cs();
        let res = f();
        res.and_then(|rec| {
            let rec = rec.borrow();
            let r = EdwardsVar::new_variable(
                ns!(cs, "sig_r"),
                || Ok(EdwardsProjective::from(rec.r)),
                mode,
            )?;
            let s = FpVar::new_variable(
                ns!(cs, "sig_s"),
                || Ok(Fr::from_le_bytes_mod_order(&rec.s.into_bigint().to_bytes_le())),
                mode,
            )?;
            Ok(EdSignatureVar { r, s })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::hash::CircomPoseidon;
    use ark_r1cs_std::R1CSVar;
    use ark_relations::r1cs::ConstraintSystem;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type H = CircomPoseidon;

    fn message() -> Fr {
        identity::<H>(Fr::from(0xabcdu64), Fr::from(1u64), Fr::from(1_700_000_000u64), Fr::from(99u64)).unwrap()
    }

    #[test]
    fn signatures_verify_and_bind_the_message() {
        let mut rng = StdRng::seed_from_u64(7);
        let sk = SigningKey::generate(&mut rng);
        let pk = sk.verifying_key();
        let sig = sk.sign::<H>(message()).unwrap();

        assert!(pk.verify::<H>(message(), &sig));
        assert!(!pk.verify::<H>(message() + Fr::from(1u64), &sig));

        let other = SigningKey::generate(&mut rng).verifying_key();
        assert!(!other.verify::<H>(message(), &sig));
    }

    #[test]
    fn wire_words_round_trip_through_checks() {
        let sk = SigningKey::from_be_bytes(&[3u8; 32]);
        let sig = sk.sign::<H>(message()).unwrap();
        let (rx, ry) = sig.r_words();
        let back = EdSignature::from_words(&rx, &ry, &sig.s_word()).unwrap();
        assert_eq!(back, sig);

        let (x, y) = sk.verifying_key().words();
        assert!(VerifyingKey::from_words(&x, &y).is_ok());
        assert!(VerifyingKey::from_words(&x, &x).is_err());
    }

    #[test]
    fn gadget_accepts_valid_and_rejects_forged() {
        let sk = SigningKey::from_be_bytes(&[5u8; 32]);
        let pk = sk.verifying_key();
        let sig = sk.sign::<H>(message()).unwrap();

        let cs = ConstraintSystem::<Fr>::new_ref();
        let pk_var = VerifyingKeyVar::new_input(ns!(cs, "pk"), || Ok(pk)).unwrap();
        let sig_var = EdSignatureVar::new_witness(ns!(cs, "sig"), || Ok(sig)).unwrap();
        let msg_var = FpVar::new_witness(ns!(cs, "msg"), || Ok(message())).unwrap();
        let ok = VerifyingKey::verify_zk::<H>(&pk_var, &sig_var, &msg_var).unwrap();
        assert!(ok.value().unwrap());

        let bad_msg = FpVar::new_witness(ns!(cs, "bad"), || Ok(Fr::from(1u64))).unwrap();
        let bad = VerifyingKey::verify_zk::<H>(&pk_var, &sig_var, &bad_msg).unwrap();
        assert!(!bad.value().unwrap());
        assert!(cs.is_satisfied().unwrap());
    }
}

use crate::crypto::hash::FieldHash;
use crate::crypto::sig::{
    identity, identity_zk, EdSignature, EdSignatureVar, VerifyingKey, VerifyingKeyVar,
};
use crate::error::{AttestError, Result};
use crate::util::{field_to_word, word_to_field};
use ark_bn254::Fr;
use ark_ff::Zero;
use ark_r1cs_std::alloc::AllocVar;
use ark_r1cs_std::eq::EqGadget;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::Boolean;
use ark_relations::{
    ns,
    r1cs::{ConstraintSynthesizer, ConstraintSystemRef, Result as ArkResult},
};
use ark_snark::SNARK;
use ethers::types::{Bytes, H256};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Version of the attestation circuit's public I/O layout.
pub const CIRCUIT_VERSION: u32 = 1;

/// Positions of the circuit's public inputs.
///
/// Any reordering is a breaking change of the circuit and must bump the version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitAbi {
    pub version: u32,
    pub num_public: usize,
    pub pubkey_x: usize,
    pub pubkey_y: usize,
    pub role: usize,
    pub msg: usize,
    pub nonce: usize,
    pub timestamp: usize,
    pub revoker_hash: usize,
}

pub const CIRCUIT_ABI_V1: CircuitAbi = CircuitAbi {
    version: CIRCUIT_VERSION,
    num_public: 7,
    pubkey_x: 0,
    pubkey_y: 1,
    role: 2,
    msg: 3,
    nonce: 4,
    timestamp: 5,
    revoker_hash: 6,
};

impl CircuitAbi {
    pub fn for_version(version: u32) -> Result<Self> {
        match version {
            1 => Ok(CIRCUIT_ABI_V1),
            v => Err(AttestError::ProofGeneration(format!(
                "unsupported circuit version {v}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointWords {
    pub x: H256,
    pub y: H256,
}

/// The circuit's named inputs, as 32-byte big-endian words.
///
/// Words come from several sources (the authorization service, local hashing, configuration),
/// so nothing here is trusted to be in range until [`Witness::to_inputs`] has checked it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub address: H256,
    pub msg: H256,
    pub nonce: H256,
    pub revoker_secret: H256,
    pub role: H256,
    pub sig_s: H256,
    pub timestamp: H256,
    pub random_nonce: H256,
    pub pubkey: PointWords,
    pub sig_r: PointWords,
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Witness")
            .field("address", &self.address)
            .field("msg", &self.msg)
            .field("nonce", &self.nonce)
            .field("revoker_secret", &"..")
            .field("role", &self.role)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

fn checked(word: &H256, field: &'static str) -> Result<Fr> {
    word_to_field(word).ok_or(AttestError::InvalidWitness { field })
}

fn as_witness_error(err: AttestError, fallback: &'static str) -> AttestError {
    match err {
        AttestError::InvalidWitness { field } | AttestError::Validation { field, .. } => {
            AttestError::InvalidWitness { field }
        }
        _ => AttestError::InvalidWitness { field: fallback },
    }
}

impl Witness {
    /// Range-checks every word against the field modulus and decodes the curve points.
    pub fn to_inputs(&self) -> Result<CircuitInputs> {
        let pubkey = VerifyingKey::from_words(&self.pubkey.x, &self.pubkey.y)
            .map_err(|e| as_witness_error(e, "pubkey"))?;
        let signature = EdSignature::from_words(&self.sig_r.x, &self.sig_r.y, &self.sig_s)
            .map_err(|e| as_witness_error(e, "sig_r"))?;

        Ok(CircuitInputs {
            address: checked(&self.address, "address")?,
            msg: checked(&self.msg, "msg")?,
            nonce: checked(&self.nonce, "nonce")?,
            revoker_secret: checked(&self.revoker_secret, "revoker_secret")?,
            role: checked(&self.role, "role")?,
            timestamp: checked(&self.timestamp, "timestamp")?,
            random_nonce: checked(&self.random_nonce, "random_nonce")?,
            pubkey,
            signature,
        })
    }
}

/// Range-checked circuit inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitInputs {
    pub address: Fr,
    pub msg: Fr,
    pub nonce: Fr,
    pub revoker_secret: Fr,
    pub role: Fr,
    pub timestamp: Fr,
    pub random_nonce: Fr,
    pub pubkey: VerifyingKey,
    pub signature: EdSignature,
}

impl CircuitInputs {
    /// Evaluates the circuit relation natively. Returns the revoker hash the circuit would
    /// expose, or `None` if the role signature does not verify.
    pub fn evaluate<H: FieldHash<Fr>>(&self) -> Option<Fr> {
        let message = identity::<H>(self.address, self.role, self.timestamp, self.random_nonce).ok()?;
        if !self.pubkey.verify::<H>(message, &self.signature) {
            return None;
        }
        let revoker = H::hash2(Fr::zero(), self.revoker_secret).ok()?;
        H::hash2(revoker, revoker).ok()
    }

    /// The public inputs in ABI order, given the revoker hash the circuit recomputes.
    pub fn public_inputs(&self, revoker_hash: Fr) -> Vec<Fr> {
        vec![
            self.pubkey.0.x,
            self.pubkey.0.y,
            self.role,
            self.msg,
            self.nonce,
            self.timestamp,
            revoker_hash,
        ]
    }
}

/// What a proving backend hands back: proof bytes and its declared public outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofArtifact {
    pub proof: Bytes,
    pub public_inputs: Vec<Fr>,
    pub version: u32,
}

/// Proof plus the public values the attester contract re-derives its verification inputs from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationProof {
    pub proof: Bytes,
    pub revoker_hash: H256,
    pub nonce: H256,
    pub timestamp: H256,
}

impl ProofArtifact {
    /// Checks the artifact was produced by the circuit layout `expected`.
    pub fn abi(&self, expected: u32) -> Result<CircuitAbi> {
        if self.version != expected {
            return Err(AttestError::ProofGeneration(format!(
                "circuit version {} does not match expected {}",
                self.version, expected
            )));
        }
        let abi = CircuitAbi::for_version(self.version)?;
        if self.public_inputs.len() != abi.num_public {
            return Err(AttestError::ProofGeneration(format!(
                "expected {} public inputs, got {}",
                abi.num_public,
                self.public_inputs.len()
            )));
        }
        Ok(abi)
    }

    fn output(&self, index: usize) -> H256 {
        field_to_word(&self.public_inputs[index])
    }

    pub fn revoker_hash(&self, expected: u32) -> Result<H256> {
        let abi = self.abi(expected)?;
        Ok(self.output(abi.revoker_hash))
    }

    pub fn nonce(&self, expected: u32) -> Result<H256> {
        let abi = self.abi(expected)?;
        Ok(self.output(abi.nonce))
    }

    pub fn timestamp(&self, expected: u32) -> Result<H256> {
        let abi = self.abi(expected)?;
        Ok(self.output(abi.timestamp))
    }

    /// Repacks the artifact into fixed-width contract arguments.
    pub fn attestation_proof(&self, expected: u32) -> Result<AttestationProof> {
        Ok(AttestationProof {
            proof: self.proof.clone(),
            revoker_hash: self.revoker_hash(expected)?,
            nonce: self.nonce(expected)?,
            timestamp: self.timestamp(expected)?,
        })
    }
}

/// A fixed, versioned circuit able to prove attestation witnesses.
pub trait ProvingBackend: Send + Sync + 'static {
    fn version(&self) -> u32;

    fn prove(&self, inputs: &CircuitInputs) -> Result<ProofArtifact>;
}

/// Checks a proof against public inputs the verifier assembled itself.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, public_inputs: &[Fr], proof: &[u8]) -> bool;
}

/// The attestation statement.
///
/// Public: the authorization key, role, message hash, nonce, timestamp and revoker hash, in
/// [`CIRCUIT_ABI_V1`] order. Private: the attested address, the role signature and its random
/// nonce, and the reduced revocation secret. The circuit enforces that the key signed
/// `H(address, role, timestamp, random_nonce)` and that
/// `revoker_hash == H(H(0, revoker_secret), H(0, revoker_secret))`.
#[derive(Clone)]
pub struct AttestationCircuit<H: FieldHash<Fr>> {
    // Private Inputs
    pub priv_address: Fr,
    pub priv_revoker_secret: Fr,
    pub priv_random_nonce: Fr,
    pub priv_signature: EdSignature,

    // Public Inputs
    pub pub_key: VerifyingKey,
    pub pub_role: Fr,
    pub pub_msg: Fr,
    pub pub_nonce: Fr,
    pub pub_timestamp: Fr,
    pub pub_revoker_hash: Fr,

    pub _phantom_hash: PhantomData<H>,
}

impl<H: FieldHash<Fr>> AttestationCircuit<H> {
    pub fn new(inputs: &CircuitInputs, revoker_hash: Fr) -> Self {
        Self {
            priv_address: inputs.address,
            priv_revoker_secret: inputs.revoker_secret,
            priv_random_nonce: inputs.random_nonce,
            priv_signature: inputs.signature,
            pub_key: inputs.pubkey,
            pub_role: inputs.role,
            pub_msg: inputs.msg,
            pub_nonce: inputs.nonce,
            pub_timestamp: inputs.timestamp,
            pub_revoker_hash: revoker_hash,
            _phantom_hash: PhantomData,
        }
    }

    /// A shape-only instance for key generation.
    pub fn blank() -> Self {
        Self {
            priv_address: Fr::zero(),
            priv_revoker_secret: Fr::zero(),
            priv_random_nonce: Fr::zero(),
            priv_signature: EdSignature::default(),
            pub_key: VerifyingKey::default(),
            pub_role: Fr::zero(),
            pub_msg: Fr::zero(),
            pub_nonce: Fr::zero(),
            pub_timestamp: Fr::zero(),
            pub_revoker_hash: Fr::zero(),
            _phantom_hash: PhantomData,
        }
    }

    pub fn generate_keys<Snark: SNARK<Fr>>(
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<(Snark::ProvingKey, Snark::VerifyingKey)> {
        Snark::circuit_specific_setup(Self::blank(), rng)
            .map_err(|e| AttestError::ProofGeneration(format!("setup: {e:?}")))
    }
}

impl<H: FieldHash<Fr>> ConstraintSynthesizer<Fr> for AttestationCircuit<H> {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> ArkResult<()> {
        // Public inputs, allocated in ABI order.
        let pubkey = VerifyingKeyVar::new_input(ns!(cs, "pubkey"), || Ok(self.pub_key))?;
        let role = FpVar::new_input(ns!(cs, "role"), || Ok(self.pub_role))?;
        let _msg = FpVar::new_input(ns!(cs, "msg"), || Ok(self.pub_msg))?;
        let _nonce = FpVar::new_input(ns!(cs, "nonce"), || Ok(self.pub_nonce))?;
        let timestamp = FpVar::new_input(ns!(cs, "timestamp"), || Ok(self.pub_timestamp))?;
        let revoker_hash =
            FpVar::new_input(ns!(cs, "revoker_hash"), || Ok(self.pub_revoker_hash))?;

        let address = FpVar::new_witness(ns!(cs, "address"), || Ok(self.priv_address))?;
        let random_nonce =
            FpVar::new_witness(ns!(cs, "random_nonce"), || Ok(self.priv_random_nonce))?;
        let revoker_secret =
            FpVar::new_witness(ns!(cs, "revoker_secret"), || Ok(self.priv_revoker_secret))?;
        let signature = EdSignatureVar::new_witness(ns!(cs, "sig"), || Ok(self.priv_signature))?;

        let identity = identity_zk::<H>(&address, &role, &timestamp, &random_nonce)?;
        VerifyingKey::verify_zk::<H>(&pubkey, &signature, &identity)?
            .enforce_equal(&Boolean::TRUE)?;

        let revoker = H::hash_in_zk(&[FpVar::Constant(Fr::zero()), revoker_secret])?;
        H::hash_in_zk(&[revoker.clone(), revoker])?.enforce_equal(&revoker_hash)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::commitment::Commitment;
    use crate::crypto::sig::SigningKey;
    use crate::impls::hash::CircomPoseidon;
    use ark_relations::r1cs::ConstraintSystem;

    type H = CircomPoseidon;

    fn inputs() -> (CircuitInputs, Fr) {
        let sk = SigningKey::from_be_bytes(&[1u8; 32]);
        let address = Fr::from(0x1234u64);
        let role = Fr::from(1u64);
        let timestamp = Fr::from(1_700_000_000u64);
        let random_nonce = Fr::from(42u64);
        let signature = sk.sign::<H>(identity::<H>(address, role, timestamp, random_nonce).unwrap()).unwrap();
        let opening = Commitment::open::<H>("pw1".into(), Fr::zero()).unwrap();

        let inputs = CircuitInputs {
            address,
            msg: Fr::from(5u64),
            nonce: Fr::from(6u64),
            revoker_secret: opening.reduced_secret,
            role,
            timestamp,
            random_nonce,
            pubkey: sk.verifying_key(),
            signature,
        };
        (inputs, opening.commitment.revoker_hash)
    }

    #[test]
    fn circuit_is_satisfied_by_honest_inputs() {
        let (inputs, revoker_hash) = inputs();
        let cs = ConstraintSystem::<Fr>::new_ref();
        AttestationCircuit::<H>::new(&inputs, revoker_hash)
            .generate_constraints(cs.clone())
            .unwrap();
        assert!(cs.is_satisfied().unwrap());
        assert_eq!(cs.num_instance_variables(), CIRCUIT_ABI_V1.num_public + 1);
    }

    #[test]
    fn native_evaluation_matches_commitment() {
        let (inputs, revoker_hash) = inputs();
        assert_eq!(inputs.evaluate::<H>(), Some(revoker_hash));

        let mut forged = inputs;
        forged.address += Fr::from(1u64);
        assert_eq!(forged.evaluate::<H>(), None);
    }

    #[test]
    fn circuit_rejects_wrong_revoker_hash() {
        let (inputs, revoker_hash) = inputs();
        let cs = ConstraintSystem::<Fr>::new_ref();
        AttestationCircuit::<H>::new(&inputs, revoker_hash + Fr::from(1u64))
            .generate_constraints(cs.clone())
            .unwrap();
        assert!(!cs.is_satisfied().unwrap());
    }

    #[test]
    fn circuit_rejects_signature_for_other_role() {
        let (mut inputs, revoker_hash) = inputs();
        inputs.role = Fr::from(2u64);
        let cs = ConstraintSystem::<Fr>::new_ref();
        AttestationCircuit::<H>::new(&inputs, revoker_hash)
            .generate_constraints(cs.clone())
            .unwrap();
        assert!(!cs.is_satisfied().unwrap());
    }

    #[test]
    fn out_of_range_words_name_the_field() {
        let (inputs, _) = inputs();
        let (rx, ry) = inputs.signature.r_words();
        let (px, py) = inputs.pubkey.words();
        let mut witness = Witness {
            address: field_to_word(&inputs.address),
            msg: field_to_word(&inputs.msg),
            nonce: field_to_word(&inputs.nonce),
            revoker_secret: field_to_word(&inputs.revoker_secret),
            role: field_to_word(&inputs.role),
            sig_s: inputs.signature.s_word(),
            timestamp: field_to_word(&inputs.timestamp),
            random_nonce: field_to_word(&inputs.random_nonce),
            pubkey: PointWords { x: px, y: py },
            sig_r: PointWords { x: rx, y: ry },
        };
        assert_eq!(witness.to_inputs().unwrap(), inputs);

        witness.msg = H256::repeat_byte(0xff);
        assert_eq!(
            witness.to_inputs(),
            Err(AttestError::InvalidWitness { field: "msg" })
        );

        witness.msg = field_to_word(&inputs.msg);
        witness.sig_s = H256::repeat_byte(0xff);
        assert_eq!(
            witness.to_inputs(),
            Err(AttestError::InvalidWitness { field: "sig_s" })
        );
    }

    #[test]
    fn artifact_accessors_check_the_layout() {
        let outputs: Vec<Fr> = (0..7u64).map(Fr::from).collect();
        let artifact = ProofArtifact {
            proof: Bytes::from(vec![1, 2, 3]),
            public_inputs: outputs,
            version: CIRCUIT_VERSION,
        };
        assert_eq!(artifact.revoker_hash(CIRCUIT_VERSION).unwrap(), field_to_word(&Fr::from(6u64)));
        assert_eq!(artifact.nonce(CIRCUIT_VERSION).unwrap(), field_to_word(&Fr::from(4u64)));
        assert!(matches!(artifact.revoker_hash(2), Err(AttestError::ProofGeneration(_))));

        let short = ProofArtifact {
            public_inputs: vec![Fr::from(1u64)],
            ..artifact
        };
        assert!(short.attestation_proof(CIRCUIT_VERSION).is_err());
    }
}

use crate::crypto::hash::FieldHash;
use crate::error::{AttestError, Result};
use crate::generic::interaction::{
    CircuitInputs, ProofArtifact, ProofVerifier, ProvingBackend, CIRCUIT_VERSION,
};
use crate::util::field_to_word;
use ark_bn254::Fr;
use ethers::types::Bytes;
use ethers::utils::keccak256;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A stand-in proving backend.
///
/// It evaluates the attestation relation natively and, when it holds, "proves" it with
/// `keccak256` over the public inputs. Proofs are deterministic and carry no zero-knowledge.
pub struct DummyBackend<H: FieldHash<Fr>> {
    available: bool,
    calls: AtomicUsize,
    _phantom_hash: PhantomData<H>,
}

impl<H: FieldHash<Fr>> Default for DummyBackend<H> {
    fn default() -> Self {
        Self {
            available: true,
            calls: AtomicUsize::new(0),
            _phantom_hash: PhantomData,
        }
    }
}

impl<H: FieldHash<Fr>> DummyBackend<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that fails every call, as an unreachable prover would.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    /// How many times `prove` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn digest(public_inputs: &[Fr]) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(32 * public_inputs.len());
        for input in public_inputs {
            preimage.extend_from_slice(field_to_word(input).as_bytes());
        }
        keccak256(preimage)
    }
}

impl<H: FieldHash<Fr>> ProvingBackend for DummyBackend<H> {
    fn version(&self) -> u32 {
        CIRCUIT_VERSION
    }

    fn prove(&self, inputs: &CircuitInputs) -> Result<ProofArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(AttestError::ProofGeneration("backend unavailable".to_string()));
        }

        let revoker_hash = inputs
            .evaluate::<H>()
            .ok_or_else(|| AttestError::ProofGeneration("witness does not satisfy the circuit".to_string()))?;
        let public_inputs = inputs.public_inputs(revoker_hash);

        Ok(ProofArtifact {
            proof: Bytes::from(Self::digest(&public_inputs).to_vec()),
            public_inputs,
            version: CIRCUIT_VERSION,
        })
    }
}

impl<H: FieldHash<Fr>> ProofVerifier for DummyBackend<H> {
    fn verify(&self, public_inputs: &[Fr], proof: &[u8]) -> bool {
        proof == Self::digest(public_inputs)
    }
}

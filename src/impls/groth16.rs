use crate::crypto::hash::FieldHash;
use crate::error::{AttestError, Result};
use crate::generic::interaction::{
    AttestationCircuit, CircuitInputs, ProofArtifact, ProofVerifier, ProvingBackend, CIRCUIT_VERSION,
};
use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ethers::types::Bytes;
use rand::{CryptoRng, RngCore};
use std::marker::PhantomData;
use tracing::debug;

/// The attestation circuit proven with Groth16 over BN254.
pub struct Groth16Backend<H: FieldHash<Fr>> {
    pk: ProvingKey<Bn254>,
    vk: VerifyingKey<Bn254>,
    pvk: PreparedVerifyingKey<Bn254>,
    _phantom_hash: PhantomData<H>,
}

fn serialization(what: &str, e: impl std::fmt::Display) -> AttestError {
    AttestError::ProofGeneration(format!("{what}: {e}"))
}

impl<H: FieldHash<Fr>> Groth16Backend<H> {
    pub fn from_keys(pk: ProvingKey<Bn254>, vk: VerifyingKey<Bn254>) -> Result<Self> {
        let pvk = Groth16::<Bn254>::process_vk(&vk)
            .map_err(|e| AttestError::ProofGeneration(format!("verifying key: {e:?}")))?;
        Ok(Self {
            pk,
            vk,
            pvk,
            _phantom_hash: PhantomData,
        })
    }

    /// Circuit-specific trusted setup. Only for tests and local deployments.
    pub fn setup(rng: &mut (impl CryptoRng + RngCore)) -> Result<Self> {
        let (pk, vk) = AttestationCircuit::<H>::generate_keys::<Groth16<Bn254>>(rng)?;
        Self::from_keys(pk, vk)
    }

    pub fn proving_key_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.pk
            .serialize_compressed(&mut buf)
            .map_err(|e| serialization("proving key", e))?;
        Ok(buf)
    }

    pub fn verifying_key_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.vk
            .serialize_compressed(&mut buf)
            .map_err(|e| serialization("verifying key", e))?;
        Ok(buf)
    }

    pub fn from_bytes(pk: &[u8], vk: &[u8]) -> Result<Self> {
        let pk = ProvingKey::<Bn254>::deserialize_compressed_unchecked(pk)
            .map_err(|e| serialization("proving key", e))?;
        let vk = VerifyingKey::<Bn254>::deserialize_compressed(vk)
            .map_err(|e| serialization("verifying key", e))?;
        if pk.vk != vk {
            return Err(AttestError::Config("proving and verifying keys do not match".to_string()));
        }
        Self::from_keys(pk, vk)
    }
}

impl<H: FieldHash<Fr>> ProvingBackend for Groth16Backend<H> {
    fn version(&self) -> u32 {
        CIRCUIT_VERSION
    }

    fn prove(&self, inputs: &CircuitInputs) -> Result<ProofArtifact> {
        let revoker_hash = inputs
            .evaluate::<H>()
            .ok_or_else(|| AttestError::ProofGeneration("witness does not satisfy the circuit".to_string()))?;
        let circuit = AttestationCircuit::<H>::new(inputs, revoker_hash);

        let proof = Groth16::<Bn254>::prove(&self.pk, circuit, &mut rand::thread_rng())
            .map_err(|e| AttestError::ProofGeneration(format!("prove: {e:?}")))?;
        let mut bytes = Vec::new();
        proof
            .serialize_compressed(&mut bytes)
            .map_err(|e| serialization("proof", e))?;
        debug!(size = bytes.len(), "groth16 proof");

        Ok(ProofArtifact {
            proof: Bytes::from(bytes),
            public_inputs: inputs.public_inputs(revoker_hash),
            version: CIRCUIT_VERSION,
        })
    }
}

impl<H: FieldHash<Fr>> ProofVerifier for Groth16Backend<H> {
    fn verify(&self, public_inputs: &[Fr], proof: &[u8]) -> bool {
        let Ok(proof) = Proof::<Bn254>::deserialize_compressed(proof) else {
            return false;
        };
        Groth16::<Bn254>::verify_with_processed_vk(&self.pvk, public_inputs, &proof).unwrap_or(false)
    }
}

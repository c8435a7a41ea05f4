use crate::config::ProtocolConfig;
use crate::crypto::commitment::{Commitment, RevocationSecret};
use crate::crypto::hash::FieldHash;
use crate::crypto::sig::{identity, VerifyingKey};
use crate::error::{AttestError, Result};
use crate::generic::interaction::{
    CircuitInputs, PointWords, ProofArtifact, ProvingBackend, Witness,
};
use crate::generic::object::{AttestationId, AttestationPayload, Role, Time};
use crate::generic::service::{AuthorizationSignature, RoleGrant};
use crate::util::{address_to_field, field_to_word, keccak_to_field, reduce_bytes, u64_to_word};
use ark_bn254::Fr;
use ark_ff::Zero;
use ethers::types::{Address, Bytes, H256};
use rand::{CryptoRng, RngCore};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const MAX_TITLE_LEN: usize = 50;
pub const MAX_MESSAGE_LEN: usize = 1000;

/// An attestation as entered by the publisher, before any validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationDraft {
    pub recipient: String,
    pub role: Role,
    pub title: String,
    pub message: String,
    pub anonymous: bool,
    /// The publisher's badgeholder attestation, cited by public `Badgeholder` drafts.
    pub badgeholder_ref: Option<AttestationId>,
}

impl AttestationDraft {
    /// Rejects malformed input before any cryptographic work is done.
    ///
    /// Anonymous drafts need a non-empty secret and a real role; their payload carries a
    /// zero reference, the value the revocation commitment is derived with. Public
    /// `Badgeholder` drafts reference the publisher's badgeholder attestation.
    pub fn validate(&self, secret: Option<&RevocationSecret>) -> Result<(Address, AttestationPayload)> {
        let recipient = self.recipient.trim();
        let hex_part = recipient
            .strip_prefix("0x")
            .filter(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| AttestError::validation("recipient", "expected a 0x-prefixed 20-byte address"))?;
        let recipient = Address::from_str(hex_part)
            .map_err(|e| AttestError::validation("recipient", e.to_string()))?;

        let title_len = self.title.chars().count();
        if title_len == 0 || title_len > MAX_TITLE_LEN {
            return Err(AttestError::validation(
                "title",
                format!("must be 1 to {MAX_TITLE_LEN} characters"),
            ));
        }
        let message_len = self.message.chars().count();
        if message_len == 0 || message_len > MAX_MESSAGE_LEN {
            return Err(AttestError::validation(
                "message",
                format!("must be 1 to {MAX_MESSAGE_LEN} characters"),
            ));
        }

        let reference = if self.anonymous {
            if secret.map_or(true, |s| s.is_empty()) {
                return Err(AttestError::validation("secret", "required for anonymous attestations"));
            }
            if self.role == Role::None {
                return Err(AttestError::validation("role", "anonymous attestations need a role"));
            }
            Bytes::from(H256::zero().as_bytes().to_vec())
        } else if self.role == Role::Badgeholder {
            let uid = self
                .badgeholder_ref
                .ok_or_else(|| AttestError::validation("reference", "public badgeholder attestations cite a badgeholder attestation"))?;
            Bytes::from(uid.as_bytes().to_vec())
        } else {
            Bytes::new()
        };

        Ok((
            recipient,
            AttestationPayload {
                role: self.role,
                title: self.title.clone(),
                message: self.message.clone(),
                reference,
            },
        ))
    }
}

/// Assembles attestation witnesses and drives the proving backend.
///
/// Everything up to the backend call is a pure function of its inputs and the nonce drawn
/// from `rng`; the builder performs no network I/O.
pub struct ProofBuilder<H: FieldHash<Fr>, B: ProvingBackend> {
    config: Arc<ProtocolConfig>,
    verifying_key: VerifyingKey,
    backend: Arc<B>,
    _phantom_hash: PhantomData<H>,
}

impl<H: FieldHash<Fr>, B: ProvingBackend> Clone for ProofBuilder<H, B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            verifying_key: self.verifying_key,
            backend: self.backend.clone(),
            _phantom_hash: PhantomData,
        }
    }
}

impl<H: FieldHash<Fr>, B: ProvingBackend> ProofBuilder<H, B> {
    pub fn new(config: Arc<ProtocolConfig>, backend: Arc<B>) -> Result<Self> {
        let verifying_key = config.verifying_key()?;
        if backend.version() != config.circuit_version {
            return Err(AttestError::Config(format!(
                "backend implements circuit version {}, configuration expects {}",
                backend.version(),
                config.circuit_version
            )));
        }
        Ok(Self {
            config,
            verifying_key,
            backend,
            _phantom_hash: PhantomData,
        })
    }

    /// Builds the named witness for one attestation.
    ///
    /// The message is hashed as `reduce(keccak(message))`, the commitment is derived with a
    /// zero reference and a fresh nonce is drawn. The secret is consumed.
    pub fn witness(
        &self,
        address: Address,
        auth: &AuthorizationSignature,
        message: &str,
        timestamp: Time,
        secret: RevocationSecret,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<(Witness, Commitment)> {
        if secret.is_empty() {
            return Err(AttestError::validation("secret", "must not be empty"));
        }
        let role = auth
            .role()
            .ok_or_else(|| AttestError::validation("role", format!("unknown role index {}", auth.role)))?;

        let hashed_msg = keccak_to_field(message.as_bytes());
        let opening = Commitment::open::<H>(secret, Fr::zero())?;

        let mut nonce = [0u8; 32];
        rng.fill_bytes(&mut nonce);
        let nonce = reduce_bytes(&nonce);

        let (pk_x, pk_y) = self.verifying_key.words();
        let witness = Witness {
            address: field_to_word(&address_to_field(&address)),
            msg: field_to_word(&hashed_msg),
            nonce: field_to_word(&nonce),
            revoker_secret: field_to_word(&opening.reduced_secret),
            role: field_to_word(&role.to_field()),
            sig_s: auth.sig_s,
            timestamp: u64_to_word(timestamp),
            random_nonce: auth.random_nonce,
            pubkey: PointWords { x: pk_x, y: pk_y },
            sig_r: PointWords {
                x: auth.sig_rx,
                y: auth.sig_ry,
            },
        };

        Ok((witness, opening.commitment))
    }

    /// Range-checks the witness and verifies the role signature off-circuit.
    pub fn check(&self, witness: &Witness) -> Result<CircuitInputs> {
        let inputs = witness.to_inputs()?;
        let message = identity::<H>(inputs.address, inputs.role, inputs.timestamp, inputs.random_nonce)?;
        if !inputs.pubkey.verify::<H>(message, &inputs.signature) {
            return Err(AttestError::validation(
                "signature",
                "does not authorize this address and role",
            ));
        }
        Ok(inputs)
    }

    fn accept(&self, artifact: ProofArtifact, commitment: &Commitment) -> Result<ProofArtifact> {
        let revoker_hash = artifact.revoker_hash(self.config.circuit_version)?;
        if !commitment.opens(&revoker_hash) {
            return Err(AttestError::ProofGeneration(
                "backend revoker hash disagrees with the local commitment".to_string(),
            ));
        }
        debug!(?revoker_hash, "proof accepted");
        Ok(artifact)
    }

    /// Builds a proof with an explicit authorization signature and issuance time.
    pub fn build(
        &self,
        address: Address,
        auth: &AuthorizationSignature,
        message: &str,
        timestamp: Time,
        secret: RevocationSecret,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<ProofArtifact> {
        let (witness, commitment) = self.witness(address, auth, message, timestamp, secret, rng)?;
        let inputs = self.check(&witness)?;
        info!(role = auth.role, "generating attestation proof");
        let artifact = self.backend.prove(&inputs)?;
        self.accept(artifact, &commitment)
    }

    /// Selects the grant's signature for `role` and builds the proof for `payload`.
    pub fn build_for_role(
        &self,
        address: Address,
        grant: &RoleGrant,
        payload: &AttestationPayload,
        secret: RevocationSecret,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<ProofArtifact> {
        let auth = grant.select(payload.role)?;
        self.build(address, auth, &payload.proof_message(), grant.timestamp, secret, rng)
    }

    /// Like [`Self::build_for_role`], with proving moved to the blocking pool.
    ///
    /// Cancelling `cancel` abandons the in-flight proof and reports `UserCancelled`; nothing
    /// is kept from the abandoned computation.
    pub async fn build_cancellable(
        &self,
        address: Address,
        grant: &RoleGrant,
        payload: &AttestationPayload,
        secret: RevocationSecret,
        cancel: &CancellationToken,
    ) -> Result<ProofArtifact> {
        let auth = grant.select(payload.role)?;
        let (witness, commitment) = self.witness(
            address,
            auth,
            &payload.proof_message(),
            grant.timestamp,
            secret,
            &mut rand::thread_rng(),
        )?;
        let inputs = self.check(&witness)?;

        let backend = self.backend.clone();
        info!(role = %payload.role, "generating attestation proof");
        let task = tokio::task::spawn_blocking(move || backend.prove(&inputs));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("proof generation cancelled");
                Err(AttestError::UserCancelled)
            }
            joined = task => {
                let artifact = joined
                    .map_err(|e| AttestError::ProofGeneration(format!("proving task failed: {e}")))??;
                self.accept(artifact, &commitment)
            }
        }
    }
}

use crate::crypto::hash::HashError;
use thiserror::Error;

/// Everything the attestation core can report to its callers.
///
/// Cryptographic failures are flattened into these kinds with the offending field or step
/// attached; nothing below the crate boundary escapes as a panic or a foreign error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestError {
    /// Malformed address, role, title, message or secret. Raised before any cryptographic work.
    #[error("validation error on {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The proving backend failed or is unavailable. Retrying may succeed.
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    /// A witness value did not fit the scalar field. Indicates broken wiring, not user error.
    #[error("invalid witness value for {field}")]
    InvalidWitness { field: &'static str },

    /// The ledger or relay refused the transaction. The upstream message is kept verbatim.
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    #[error("secret does not open the stored revocation commitment")]
    InvalidSecret,

    #[error("cancelled by user")]
    UserCancelled,

    #[error("timed out during {step}")]
    Timeout { step: &'static str },

    #[error("no signer connected")]
    NoSigner,

    #[error("attestation {0} is already revoked")]
    AlreadyRevoked(String),

    #[error("connected account is not the attester of {0}")]
    NotAttester(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("indexer error: {0}")]
    Indexer(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

impl AttestError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        AttestError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the same call may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttestError::ProofGeneration(_)
                | AttestError::Timeout { .. }
                | AttestError::Ledger(_)
                | AttestError::Indexer(_)
                | AttestError::InvalidSecret
        )
    }
}

impl From<ethers::providers::ProviderError> for AttestError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        AttestError::Ledger(err.to_string())
    }
}

impl From<config::ConfigError> for AttestError {
    fn from(err: config::ConfigError) -> Self {
        AttestError::Config(err.to_string())
    }
}

pub type Result<T, E = AttestError> = std::result::Result<T, E>;

use crate::crypto::hash::FieldHash;
use crate::crypto::sig::{identity, SigningKey, VerifyingKey};
use crate::error::{AttestError, Result};
use crate::generic::object::{Role, Time};
use crate::generic::service::{challenge, AuthorizationService, AuthorizationSignature, RoleGrant, RoleQuerier};
use crate::impls::centralized::roles::RoleTable;
use crate::util::{address_to_field, field_to_word, reduce_bytes};
use ark_bn254::Fr;
use async_trait::async_trait;
use ethers::types::{Address, Signature};
use rand::{CryptoRng, RngCore};
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Start of the UTC day containing `unix_secs`. Grants issued on the same day sign the same
/// timestamp.
pub fn issuance_day(unix_secs: u64) -> Time {
    unix_secs / SECONDS_PER_DAY * SECONDS_PER_DAY
}

/// An in-process authorization service: the signing key plus a source of role holdings.
pub struct RoleSigner<H: FieldHash<Fr>, Q: RoleQuerier = RoleTable> {
    key: SigningKey,
    querier: Q,
    _phantom_hash: PhantomData<H>,
}

impl<H: FieldHash<Fr>> RoleSigner<H, RoleTable> {
    pub fn new(key: SigningKey) -> Self {
        Self::with_querier(key, RoleTable::new())
    }

    pub fn with_role(mut self, address: Address, role: Role) -> Self {
        self.querier = self.querier.with_role(address, role);
        self
    }

    /// Signs every role the table lists for `address`, `Role::None` included.
    pub fn issue(&self, address: Address, timestamp: Time, rng: &mut (impl CryptoRng + RngCore)) -> Result<RoleGrant> {
        self.sign_roles(address, &self.querier.held(address), timestamp, rng)
    }
}

impl<H: FieldHash<Fr>, Q: RoleQuerier> RoleSigner<H, Q> {
    pub fn with_querier(key: SigningKey, querier: Q) -> Self {
        Self {
            key,
            querier,
            _phantom_hash: PhantomData,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Signs `H(address, role, timestamp, random_nonce)` for each of `roles`.
    pub fn sign_roles(
        &self,
        address: Address,
        roles: &[Role],
        timestamp: Time,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<RoleGrant> {
        let signatures = roles
            .iter()
            .map(|role| -> Result<AuthorizationSignature> {
                let mut nonce = [0u8; 32];
                rng.fill_bytes(&mut nonce);
                let random_nonce = reduce_bytes(&nonce);

                let message = identity::<H>(
                    address_to_field(&address),
                    role.to_field(),
                    Fr::from(timestamp),
                    random_nonce,
                )?;
                let signature = self.key.sign::<H>(message)?;
                let (sig_rx, sig_ry) = signature.r_words();
                Ok(AuthorizationSignature {
                    role: role.index(),
                    role_str: role.to_string(),
                    sig_rx,
                    sig_ry,
                    sig_s: signature.s_word(),
                    random_nonce: field_to_word(&random_nonce),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RoleGrant {
            signatures,
            timestamp,
        })
    }
}

#[async_trait]
impl<H: FieldHash<Fr>, Q: RoleQuerier> AuthorizationService for RoleSigner<H, Q> {
    async fn role_signatures(&self, address: Address, ownership: &Signature) -> Result<RoleGrant> {
        let signer = ownership
            .recover(challenge(&address))
            .map_err(|e| AttestError::validation("signature", e.to_string()))?;
        if signer != address {
            warn!(?address, ?signer, "ownership signature from another account");
            return Err(AttestError::validation("signature", "does not prove account ownership"));
        }

        let roles = self.querier.roles(address).await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AttestError::Config(format!("system clock before the epoch: {e}")))?;
        let grant = self.sign_roles(address, &roles, issuance_day(now.as_secs()), &mut rand::thread_rng())?;
        info!(?address, roles = grant.signatures.len(), timestamp = grant.timestamp, "issued role signatures");
        Ok(grant)
    }
}

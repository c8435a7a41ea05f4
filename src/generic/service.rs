use crate::error::{AttestError, Result};
use crate::generic::object::{AttestationId, Role, Time};
use async_trait::async_trait;
use ethers::types::{Address, Signature, H256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};

pub const CHALLENGE_PREFIX: &str = "VERIFY ACCOUNT OWNERSHIP";

/// The text an account signs to prove it controls `address`.
pub fn challenge(address: &Address) -> String {
    format!("{} {}", CHALLENGE_PREFIX, to_checksum(address, None))
}

/// One role credential issued by the authorization service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSignature {
    pub role: u8,
    #[serde(default)]
    pub role_str: String,
    pub sig_rx: H256,
    pub sig_ry: H256,
    pub sig_s: H256,
    #[serde(default)]
    pub random_nonce: H256,
}

impl AuthorizationSignature {
    pub fn role(&self) -> Option<Role> {
        Role::from_index(self.role as u64)
    }
}

/// Everything the service vouched for in one response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub signatures: Vec<AuthorizationSignature>,
    pub timestamp: Time,
}

impl RoleGrant {
    pub fn roles(&self) -> Vec<Role> {
        self.signatures.iter().filter_map(|s| s.role()).collect()
    }

    /// The credential for `role`, or a validation error if the account was not granted it.
    pub fn select(&self, role: Role) -> Result<&AuthorizationSignature> {
        self.signatures
            .iter()
            .find(|s| s.role() == Some(role))
            .ok_or_else(|| {
                AttestError::validation("role", format!("no authorization signature for {role}"))
            })
    }
}

/// Issues role credentials to accounts that prove ownership with a signed [`challenge`].
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn role_signatures(&self, address: Address, ownership: &Signature) -> Result<RoleGrant>;
}

/// Answers which roles an account holds; the authorization service signs exactly these.
#[async_trait]
pub trait RoleQuerier: Send + Sync {
    /// Whether `address` holds `role`. Everyone holds `Role::None`.
    async fn is_role(&self, address: Address, role: Role) -> Result<bool>;

    /// The current-round badgeholder attestation of `address`, which public badgeholder
    /// attestations reference.
    async fn badgeholder_attestation(&self, address: Address) -> Result<Option<AttestationId>>;

    /// Every role `address` holds, in index order.
    async fn roles(&self, address: Address) -> Result<Vec<Role>> {
        let mut held = vec![Role::None];
        for role in Role::ALL.into_iter().filter(|r| *r != Role::None) {
            if self.is_role(address, role).await? {
                held.push(role);
            }
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sig(role: u8) -> AuthorizationSignature {
        AuthorizationSignature {
            role,
            role_str: Role::from_index(role as u64).map(|r| r.to_string()).unwrap_or_default(),
            sig_rx: H256::zero(),
            sig_ry: H256::zero(),
            sig_s: H256::zero(),
            random_nonce: H256::zero(),
        }
    }

    #[test]
    fn challenge_uses_checksummed_address() {
        let address = Address::from_str("0x52908400098527886e0f7030069857d2e4169ee7").unwrap();
        assert_eq!(
            challenge(&address),
            "VERIFY ACCOUNT OWNERSHIP 0x52908400098527886E0F7030069857D2E4169EE7"
        );
    }

    #[test]
    fn select_picks_the_requested_role_only() {
        let grant = RoleGrant {
            signatures: vec![sig(2), sig(3)],
            timestamp: 0,
        };
        assert_eq!(grant.select(Role::Delegate).unwrap().role, 2);
        assert!(matches!(
            grant.select(Role::Badgeholder),
            Err(AttestError::Validation { field: "role", .. })
        ));
        assert_eq!(grant.roles(), vec![Role::Delegate, Role::Delegator]);
    }

    #[test]
    fn responses_without_nonce_deserialize() {
        let json = r#"{
            "signatures": [{
                "role": 1,
                "role_str": "Badgeholder",
                "sig_rx": "0x0000000000000000000000000000000000000000000000000000000000000001",
                "sig_ry": "0x0000000000000000000000000000000000000000000000000000000000000002",
                "sig_s": "0x0000000000000000000000000000000000000000000000000000000000000003"
            }],
            "timestamp": 1700000000
        }"#;
        let grant: RoleGrant = serde_json::from_str(json).unwrap();
        assert_eq!(grant.select(Role::Badgeholder).unwrap().random_nonce, H256::zero());
        assert_eq!(grant.timestamp, 1_700_000_000);
    }
}

use crate::error::{AttestError, Result};
use crate::util::word_to_field;
use ark_bn254::Fr;
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A commitment value.
pub type Com<F> = F;

/// Seconds since the epoch, as issued by the authorization service.
pub type Time = u64;

/// Ledger identifier of an attestation (the EAS uid).
pub type AttestationId = H256;

/// Roles an authorization signature can vouch for, with their on-chain indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    None = 0,
    Badgeholder = 1,
    Delegate = 2,
    Delegator = 3,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::None, Role::Badgeholder, Role::Delegate, Role::Delegator];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u64) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.index() as u64 == index)
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::None => "None",
            Role::Badgeholder => "Badgeholder",
            Role::Delegate => "Delegate",
            Role::Delegator => "Delegator",
        }
    }

    pub fn to_field(self) -> Fr {
        Fr::from(self.index() as u64)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(index) = s.parse::<u64>() {
            return Role::from_index(index)
                .ok_or_else(|| AttestError::validation("role", format!("unknown role index {index}")));
        }
        Role::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s) || (s.eq_ignore_ascii_case("hidden") && *r == Role::None))
            .ok_or_else(|| AttestError::validation("role", format!("unknown role {s}")))
    }
}

/// The decoded body of an attestation: `(uint256 role, string title, string message, bytes ref)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPayload {
    pub role: Role,
    pub title: String,
    pub message: String,
    pub reference: Bytes,
}

impl AttestationPayload {
    /// The text bound into the proof as the attested message.
    pub fn proof_message(&self) -> String {
        format!("{}{}", self.title, self.message)
    }

    /// The reference value the revocation commitment was derived with. Empty means zero.
    pub fn reference_field(&self) -> Result<Fr> {
        let bytes = self.reference.as_ref();
        if bytes.len() > 32 {
            return Err(AttestError::validation("ref", "longer than one word"));
        }
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(bytes);
        word_to_field(&H256(word)).ok_or(AttestError::InvalidWitness { field: "ref" })
    }
}

/// A published attestation as seen by the ledger or the indexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationRecord {
    pub id: AttestationId,
    pub schema: H256,
    pub attester: Address,
    pub recipient: Address,
    pub payload: AttestationPayload,
    pub time: Time,
    pub revocation_time: Time,
    pub txid: Option<H256>,
}

impl AttestationRecord {
    pub fn is_revoked(&self) -> bool {
        self.revocation_time != 0
    }

    /// Whether the record was published through the anonymous attester contract.
    pub fn is_anonymous(&self, anonymous_attester: Address) -> bool {
        self.attester == anonymous_attester
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::Zero;

    #[test]
    fn roles_parse_by_name_and_index() {
        assert_eq!("badgeholder".parse::<Role>().unwrap(), Role::Badgeholder);
        assert_eq!("2".parse::<Role>().unwrap(), Role::Delegate);
        assert_eq!("Hidden".parse::<Role>().unwrap(), Role::None);
        assert!("7".parse::<Role>().is_err());
        assert!("mayor".parse::<Role>().is_err());
    }

    #[test]
    fn empty_and_zero_references_are_zero() {
        let mut payload = AttestationPayload {
            role: Role::Delegate,
            title: "t".into(),
            message: "m".into(),
            reference: Bytes::new(),
        };
        assert!(payload.reference_field().unwrap().is_zero());

        payload.reference = Bytes::from(vec![0u8; 32]);
        assert!(payload.reference_field().unwrap().is_zero());

        payload.reference = Bytes::from(vec![0u8; 33]);
        assert!(payload.reference_field().is_err());
    }

    #[test]
    fn proof_message_concatenates_title_and_body() {
        let payload = AttestationPayload {
            role: Role::None,
            title: "Great".into(),
            message: " work".into(),
            reference: Bytes::new(),
        };
        assert_eq!(payload.proof_message(), "Great work");
    }
}

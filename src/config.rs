//! Protocol configuration.
//!
//! Everything the core would otherwise read from ambient constants lives here: the
//! authorization service's verifying key, schema identifiers, contract addresses, the
//! circuit's public-output layout version. A `ProtocolConfig` is built once and shared.

use crate::crypto::sig::VerifyingKey;
use crate::error::{AttestError, Result};
use crate::generic::interaction::CIRCUIT_VERSION;
use config::{Config, Environment, File};
use ethers::types::{Address, H160, H256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// EAS predeploy on OP-stack chains.
pub const EAS_ADDRESS: Address = H160([
    0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x21,
]);

/// Storage position of the `uid => revokerHash` mapping in the anonymous attester contract.
pub const REVOKER_HASH_SLOT: u64 = 4;

/// OP governance token predeploy.
pub const OP_TOKEN: Address = H160([
    0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x42,
]);

/// EAS schema of the Optimism badgeholder attestations, `(string rpgfRound, address referredBy,
/// string referredMethod)`.
pub const BADGEHOLDER_SCHEMA: H256 = H256([
    0xfd, 0xcf, 0xda, 0xd2, 0xdb, 0xe7, 0x48, 0x9e, 0x0c, 0xe5, 0x6b, 0x26, 0x03, 0x48, 0xb7, 0xf1, 0x4e, 0x83, 0x65, 0xa8,
    0xa3, 0x25, 0xae, 0xf9, 0x83, 0x48, 0x18, 0xc0, 0x0d, 0x46, 0xb3, 0x1b,
]);

/// Accounts Optimism issues badgeholder attestations from.
pub const BADGEHOLDER_ATTESTERS: [Address; 2] = [
    H160([
        0x62, 0x14, 0x77, 0xdb, 0xa4, 0x16, 0xe1, 0x2d, 0xf7, 0xff, 0x0d, 0x48, 0xe1, 0x4c, 0x4d, 0x20, 0xdc, 0x85, 0xd7, 0xd9,
    ]),
    H160([
        0xe4, 0x55, 0x3b, 0x74, 0x3e, 0x74, 0xda, 0x34, 0x24, 0xac, 0x51, 0xf8, 0xc1, 0xe5, 0x86, 0xfd, 0x43, 0xae, 0x22, 0x6f,
    ]),
];

pub const OPTIMISM: u64 = 10;
pub const OPTIMISM_SEPOLIA: u64 = 11155420;

/// Per-chain deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub is_testnet: bool,
    /// Schema the attestations are registered under.
    pub schema: H256,
    /// Contract that checks proofs and attests on behalf of anonymous publishers.
    pub anonymous_attester: Address,
    pub graphql_url: String,
    pub explorer_url: String,
    pub rpc_url: String,
}

impl ChainConfig {
    fn optimism() -> Self {
        Self {
            chain_id: OPTIMISM,
            name: "optimism".to_string(),
            is_testnet: false,
            schema: H256::zero(),
            anonymous_attester: Address::zero(),
            graphql_url: "https://optimism.easscan.org/graphql".to_string(),
            explorer_url: "https://optimism.easscan.org".to_string(),
            rpc_url: "https://mainnet.optimism.io".to_string(),
        }
    }

    fn optimism_sepolia() -> Self {
        Self {
            chain_id: OPTIMISM_SEPOLIA,
            name: "optimism-sepolia".to_string(),
            is_testnet: true,
            schema: H256::zero(),
            anonymous_attester: Address::zero(),
            graphql_url: "https://optimism-sepolia.easscan.org/graphql".to_string(),
            explorer_url: "https://optimism-sepolia.easscan.org".to_string(),
            rpc_url: "https://sepolia.optimism.io".to_string(),
        }
    }

    pub fn attestation_url(&self, id: &H256) -> String {
        format!("{}/attestation/view/{:?}", self.explorer_url, id)
    }
}

/// Where the authorization service reads role holdings from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesConfig {
    /// Token whose votes, balance and delegation decide `Delegate` and `Delegator`.
    pub governance_token: Address,
    pub badgeholder_schema: H256,
    pub badgeholder_attesters: Vec<Address>,
    /// Indexer holding the badgeholder attestations. They live on Optimism mainnet only.
    pub badgeholder_graphql_url: String,
    /// How many of the newest badgeholder attestations to scan for the latest round.
    pub badgeholder_scan: u64,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            governance_token: OP_TOKEN,
            badgeholder_schema: BADGEHOLDER_SCHEMA,
            badgeholder_attesters: BADGEHOLDER_ATTESTERS.to_vec(),
            badgeholder_graphql_url: "https://optimism.easscan.org/graphql".to_string(),
            badgeholder_scan: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Authorization service key as `"0x<x>,0x<y>"`.
    pub public_key: String,
    pub eas: Address,
    pub revoker_hash_slot: u64,
    pub circuit_version: u32,
    /// Base URL of the authorization service.
    pub auth_url: String,
    /// Base URL of the transaction relay used for anonymous calls.
    pub relay_url: String,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub roles: RolesConfig,
    pub receipt_timeout_secs: u64,
    pub ledger_timeout_secs: u64,
    pub proof_timeout_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            eas: EAS_ADDRESS,
            revoker_hash_slot: REVOKER_HASH_SLOT,
            circuit_version: CIRCUIT_VERSION,
            auth_url: "http://localhost:3000".to_string(),
            relay_url: "http://localhost:3000".to_string(),
            chains: vec![ChainConfig::optimism(), ChainConfig::optimism_sepolia()],
            roles: RolesConfig::default(),
            receipt_timeout_secs: 120,
            ledger_timeout_secs: 30,
            proof_timeout_secs: 600,
        }
    }
}

impl ProtocolConfig {
    /// Layers an optional TOML file and `ZK_ATTEST_*` variables over the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let cfg: ProtocolConfig = builder
            .add_source(
                Environment::with_prefix("ZK_ATTEST")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.verifying_key()?;
        if self.chains.is_empty() {
            return Err(AttestError::Config("no chains configured".to_string()));
        }
        Ok(())
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        let (x, y) = self
            .public_key
            .split_once(',')
            .ok_or_else(|| AttestError::Config("public_key must be \"x,y\"".to_string()))?;
        let x = H256::from_str(x.trim()).map_err(|e| AttestError::Config(format!("public_key x: {e}")))?;
        let y = H256::from_str(y.trim()).map_err(|e| AttestError::Config(format!("public_key y: {e}")))?;
        VerifyingKey::from_words(&x, &y)
    }

    pub fn with_verifying_key(mut self, key: &VerifyingKey) -> Self {
        let (x, y) = key.words();
        self.public_key = format!("{x:?},{y:?}");
        self
    }

    pub fn chain(&self, chain_id: u64) -> Result<&ChainConfig> {
        self.chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or_else(|| AttestError::Config(format!("unknown chain {chain_id}")))
    }

    pub fn chain_mut(&mut self, chain_id: u64) -> Result<&mut ChainConfig> {
        self.chains
            .iter_mut()
            .find(|c| c.chain_id == chain_id)
            .ok_or_else(|| AttestError::Config(format!("unknown chain {chain_id}")))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    pub fn proof_timeout(&self) -> Duration {
        Duration::from_secs(self.proof_timeout_secs)
    }
}

//! Role holdings read from Optimism: delegation state of the governance token and the current
//! round of badgeholder attestations.

use crate::config::RolesConfig;
use crate::error::{AttestError, Result};
use crate::generic::abi::{decode_address, decode_badgeholder_round, decode_uint, TokenQuery};
use crate::generic::object::{AttestationId, Role};
use crate::generic::service::RoleQuerier;
use crate::impls::eas::{BadgeholderAttestation, EasIndexer};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type Badgeholders = Arc<HashMap<Address, AttestationId>>;

/// Any voting power makes an account a delegate.
pub fn holds_votes(votes: U256) -> bool {
    !votes.is_zero()
}

/// A delegator has a balance and has delegated it to someone.
pub fn delegates_balance(delegate: Address, balance: U256) -> bool {
    !delegate.is_zero() && !balance.is_zero()
}

/// Recipients of the newest round among `attestations`, each mapped to its newest attestation.
///
/// `attestations` come newest first. Bodies that do not decode are skipped.
pub fn current_badgeholders(attestations: Vec<BadgeholderAttestation>) -> HashMap<Address, AttestationId> {
    let rounds: Vec<(u64, BadgeholderAttestation)> = attestations
        .into_iter()
        .filter_map(|a| match decode_badgeholder_round(&a.data) {
            Ok(round) => Some((round, a)),
            Err(e) => {
                warn!(id = ?a.id, error = %e, "skipping badgeholder attestation");
                None
            }
        })
        .collect();

    let Some(latest) = rounds.iter().map(|(round, _)| *round).max() else {
        return HashMap::new();
    };
    let mut holders = HashMap::new();
    for (round, attestation) in rounds {
        if round == latest {
            holders.entry(attestation.recipient).or_insert(attestation.id);
        }
    }
    holders
}

/// Reads roles from the governance token over JSON-RPC and from the badgeholder indexer.
///
/// The badgeholder set is fetched once and cached until [`OnChainRoles::refresh_badgeholders`].
pub struct OnChainRoles {
    provider: Provider<Http>,
    indexer: EasIndexer,
    config: RolesConfig,
    badgeholders: RwLock<Option<Badgeholders>>,
}

impl OnChainRoles {
    pub fn connect(rpc_url: &str, config: RolesConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AttestError::Config(format!("rpc url {rpc_url}: {e}")))?;
        Ok(Self {
            provider,
            indexer: EasIndexer::new(&config.badgeholder_graphql_url),
            config,
            badgeholders: RwLock::new(None),
        })
    }

    async fn token_call(&self, query: TokenQuery, account: Address) -> Result<Bytes> {
        let call = TransactionRequest::new()
            .to(self.config.governance_token)
            .data(query.encode(account));
        Ok(self.provider.call(&call.into(), None).await?)
    }

    /// Replaces the cached badgeholder set with the indexer's current round.
    pub async fn refresh_badgeholders(&self) -> Result<Badgeholders> {
        let attestations = self.indexer.badgeholder_attestations(&self.config).await?;
        let holders = Arc::new(current_badgeholders(attestations));
        info!(count = holders.len(), "badgeholder set refreshed");
        *self.badgeholders.write().await = Some(holders.clone());
        Ok(holders)
    }

    async fn badgeholders(&self) -> Result<Badgeholders> {
        let cached = self.badgeholders.read().await.clone();
        match cached {
            Some(holders) => Ok(holders),
            None => self.refresh_badgeholders().await,
        }
    }
}

#[async_trait]
impl RoleQuerier for OnChainRoles {
    async fn is_role(&self, address: Address, role: Role) -> Result<bool> {
        let held = match role {
            Role::None => true,
            Role::Badgeholder => self.badgeholder_attestation(address).await?.is_some(),
            Role::Delegate => holds_votes(decode_uint(&self.token_call(TokenQuery::Votes, address).await?)?),
            Role::Delegator => {
                let (delegate, balance) = tokio::try_join!(
                    self.token_call(TokenQuery::Delegate, address),
                    self.token_call(TokenQuery::Balance, address),
                )?;
                delegates_balance(decode_address(&delegate)?, decode_uint(&balance)?)
            }
        };
        debug!(?address, %role, held, "role lookup");
        Ok(held)
    }

    async fn badgeholder_attestation(&self, address: Address) -> Result<Option<AttestationId>> {
        Ok(self.badgeholders().await?.get(&address).copied())
    }
}

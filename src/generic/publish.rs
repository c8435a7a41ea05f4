use crate::config::{ChainConfig, ProtocolConfig};
use crate::error::{AttestError, Result};
use crate::generic::abi::AttesterCall;
use crate::generic::bulletin::{Ledger, LedgerCall, Relay, TxHash, TxReceipt};
use crate::generic::interaction::ProofArtifact;
use crate::generic::object::AttestationPayload;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const RECEIPT_POLL: Duration = Duration::from_secs(2);

/// Submits attestations, anonymously through the relay or publicly from the connected account.
pub struct AttestationPublisher<L: Ledger, R: Relay> {
    config: Arc<ProtocolConfig>,
    chain_id: u64,
    ledger: Arc<L>,
    relay: Arc<R>,
}

impl<L: Ledger, R: Relay> AttestationPublisher<L, R> {
    pub fn new(config: Arc<ProtocolConfig>, chain_id: u64, ledger: Arc<L>, relay: Arc<R>) -> Result<Self> {
        config.chain(chain_id)?;
        Ok(Self {
            config,
            chain_id,
            ledger,
            relay,
        })
    }

    pub fn chain(&self) -> Result<&ChainConfig> {
        self.config.chain(self.chain_id)
    }

    /// Relays the proof and payload to the anonymous attester contract.
    ///
    /// The connected account, if any, never appears as sender. Rejections come back verbatim
    /// as `PublishRejected`.
    pub async fn publish_anonymous(
        &self,
        artifact: &ProofArtifact,
        recipient: Address,
        payload: &AttestationPayload,
    ) -> Result<TxHash> {
        let chain = self.chain()?;
        let proof = artifact.attestation_proof(self.config.circuit_version)?;
        let call = AttesterCall::AnonymousAttest {
            schema: chain.schema,
            recipient,
            payload: payload.clone(),
            proof,
        };

        info!(chain = %chain.name, ?recipient, role = %payload.role, "relaying anonymous attestation");
        let tx = self
            .relay
            .relay(
                LedgerCall {
                    to: chain.anonymous_attester,
                    data: call.encode(),
                },
                chain.is_testnet,
            )
            .await?;
        info!(?tx, "anonymous attestation submitted");
        Ok(tx)
    }

    /// Attests on EAS directly, signed by the connected account.
    pub async fn publish_public(&self, recipient: Address, payload: &AttestationPayload) -> Result<TxHash> {
        let chain = self.chain()?;
        let attester = self.ledger.account().ok_or(AttestError::NoSigner)?;
        let call = AttesterCall::EasAttest {
            schema: chain.schema,
            recipient,
            payload: payload.clone(),
        };

        info!(chain = %chain.name, ?attester, ?recipient, "publishing attestation");
        let tx = self
            .ledger
            .send(LedgerCall {
                to: self.config.eas,
                data: call.encode(),
            })
            .await?;
        info!(?tx, "attestation submitted");
        Ok(tx)
    }

    /// Waits for the transaction to be mined, bounded by the configured receipt timeout.
    pub async fn wait(&self, tx: TxHash) -> Result<TxReceipt> {
        match tokio::time::timeout(
            self.config.receipt_timeout(),
            self.ledger.wait_for_receipt(tx, RECEIPT_POLL),
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(_) => {
                warn!(?tx, "no receipt before timeout");
                Err(AttestError::Timeout { step: "receipt" })
            }
        }
    }
}

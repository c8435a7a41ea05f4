//! Ledger access over JSON-RPC.

use crate::error::{AttestError, Result};
use crate::generic::abi::{decode_attestation, decode_payload, get_attestation_call};
use crate::generic::bulletin::{Ledger, LedgerCall, PublicLedger, TxHash, TxReceipt};
use crate::generic::object::{AttestationId, AttestationRecord};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, H256, U64};
use ethers::utils::keccak256;
use std::sync::Arc;
use tracing::{debug, info};

const ATTESTED_EVENT: &str = "Attested(address,address,bytes32,bytes32)";

pub struct EvmLedger {
    provider: Provider<Http>,
    client: Option<Arc<SignerMiddleware<Provider<Http>, LocalWallet>>>,
    eas: Address,
}

impl EvmLedger {
    /// A read-only ledger.
    pub fn connect(rpc_url: &str, eas: Address) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AttestError::Config(format!("rpc url {rpc_url}: {e}")))?;
        Ok(Self {
            provider,
            client: None,
            eas,
        })
    }

    /// Attaches a signer, bound to the chain the provider reports.
    pub async fn with_wallet(mut self, wallet: LocalWallet) -> Result<Self> {
        let chain_id = self.provider.get_chainid().await?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        info!(account = ?wallet.address(), chain_id = chain_id.as_u64(), "wallet connected");
        self.client = Some(Arc::new(SignerMiddleware::new(self.provider.clone(), wallet)));
        Ok(self)
    }
}

#[async_trait]
impl PublicLedger for EvmLedger {
    async fn storage_at(&self, contract: Address, slot: H256) -> Result<H256> {
        Ok(self.provider.get_storage_at(contract, slot, None).await?)
    }

    async fn attestation(&self, uid: AttestationId) -> Result<Option<AttestationRecord>> {
        let call = TransactionRequest::new().to(self.eas).data(get_attestation_call(&uid));
        let output = self.provider.call(&call.into(), None).await?;
        let attestation = decode_attestation(&output)?;
        // EAS returns an all-zero struct for unknown uids.
        if attestation.uid.is_zero() {
            return Ok(None);
        }

        Ok(Some(AttestationRecord {
            id: attestation.uid,
            schema: attestation.schema,
            attester: attestation.attester,
            recipient: attestation.recipient,
            payload: decode_payload(&attestation.data)?,
            time: attestation.time,
            revocation_time: attestation.revocation_time,
            txid: None,
        }))
    }

    async fn receipt(&self, tx: TxHash) -> Result<Option<TxReceipt>> {
        let Some(receipt) = self.provider.get_transaction_receipt(tx).await? else {
            return Ok(None);
        };

        let attested = H256(keccak256(ATTESTED_EVENT));
        let attestation = receipt
            .logs
            .iter()
            .find(|log| log.address == self.eas && log.topics.first() == Some(&attested))
            .filter(|log| log.data.len() >= 32)
            .map(|log| H256::from_slice(&log.data[..32]));

        Ok(Some(TxReceipt {
            tx,
            success: receipt.status == Some(U64::from(1)),
            block: receipt.block_number.map(|b| b.as_u64()),
            attestation,
        }))
    }
}

#[async_trait]
impl Ledger for EvmLedger {
    fn account(&self) -> Option<Address> {
        self.client.as_ref().map(|c| c.address())
    }

    async fn send(&self, call: LedgerCall) -> Result<TxHash> {
        let client = self.client.as_ref().ok_or(AttestError::NoSigner)?;
        let tx = TransactionRequest::new().to(call.to).data(call.data);
        debug!(to = ?call.to, "sending transaction");

        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(|e| AttestError::PublishRejected(e.to_string()))?;
        Ok(pending.tx_hash())
    }
}

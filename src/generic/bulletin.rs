use crate::error::{AttestError, Result};
use crate::generic::object::{AttestationId, AttestationRecord};
use crate::util::u64_to_word;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;
use std::time::Duration;
use tracing::debug;

pub type TxHash = H256;

/// `keccak256(pad32(uid) ‖ pad32(slot))`, the storage slot of `mapping[uid]` at position `slot`.
pub fn mapping_slot(uid: &AttestationId, slot: u64) -> H256 {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(uid.as_bytes());
    preimage[32..].copy_from_slice(u64_to_word(slot).as_bytes());
    H256(keccak256(preimage))
}

/// A contract call ready to be signed or relayed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerCall {
    pub to: Address,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx: TxHash,
    pub success: bool,
    pub block: Option<u64>,
    /// The uid of the attestation the transaction created, if any.
    pub attestation: Option<AttestationId>,
}

/// Read access to ledger state.
#[async_trait]
pub trait PublicLedger: Send + Sync {
    async fn storage_at(&self, contract: Address, slot: H256) -> Result<H256>;

    async fn attestation(&self, uid: AttestationId) -> Result<Option<AttestationRecord>>;

    async fn receipt(&self, tx: TxHash) -> Result<Option<TxReceipt>>;

    /// The revoker hash the anonymous attester recorded for `uid`.
    async fn stored_revoker_hash(
        &self,
        attester: Address,
        uid: AttestationId,
        mapping: u64,
    ) -> Result<H256> {
        let slot = mapping_slot(&uid, mapping);
        debug!(?uid, ?slot, "reading revoker hash");
        self.storage_at(attester, slot).await
    }

    /// Polls until the transaction is mined. Unbounded; callers wrap it in a timeout.
    async fn wait_for_receipt(&self, tx: TxHash, poll: Duration) -> Result<TxReceipt> {
        loop {
            if let Some(receipt) = self.receipt(tx).await? {
                if !receipt.success {
                    return Err(AttestError::PublishRejected(format!("transaction {tx:?} reverted")));
                }
                return Ok(receipt);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Write access through the connected account.
#[async_trait]
pub trait Ledger: PublicLedger {
    /// The connected account, if a signer is available.
    fn account(&self) -> Option<Address>;

    async fn send(&self, call: LedgerCall) -> Result<TxHash>;
}

/// Submits calls on the caller's behalf so the caller never appears as sender.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, call: LedgerCall, is_testnet: bool) -> Result<TxHash>;
}

//! HTTP clients for the authorization service and the transaction relay.

use crate::error::{AttestError, Result};
use crate::generic::bulletin::{LedgerCall, Relay, TxHash};
use crate::generic::service::{AuthorizationService, RoleGrant};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, Signature, H256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct EcdsaParts {
    r: H256,
    s: H256,
    v: u64,
}

#[derive(Debug, Serialize)]
struct SignatureBody {
    address: Address,
    signature: SignatureKind,
}

#[derive(Debug, Serialize)]
enum SignatureKind {
    #[serde(rename = "ECDSA")]
    Ecdsa(EcdsaParts),
}

#[derive(Debug, Serialize)]
struct ProxyTransactionRequest {
    input: Bytes,
    is_testnet: bool,
}

#[derive(Debug, Deserialize)]
struct ProxyTransactionResponse {
    hash: TxHash,
}

async fn rejected_body(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{status}: {body}")
}

#[derive(Clone, Debug)]
pub struct HttpAuthorizationService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthorizationService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AuthorizationService for HttpAuthorizationService {
    async fn role_signatures(&self, address: Address, ownership: &Signature) -> Result<RoleGrant> {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        ownership.r.to_big_endian(&mut r);
        ownership.s.to_big_endian(&mut s);
        let body = SignatureBody {
            address,
            signature: SignatureKind::Ecdsa(EcdsaParts {
                r: H256(r),
                s: H256(s),
                v: ownership.v,
            }),
        };

        let url = format!("{}/signature", self.base_url.trim_end_matches('/'));
        debug!(%url, ?address, "requesting role signatures");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttestError::Ledger(format!("authorization service: {e}")))?;
        if !response.status().is_success() {
            let reason = rejected_body(response).await;
            warn!(%reason, "authorization refused");
            return Err(AttestError::validation("signature", reason));
        }

        response
            .json::<RoleGrant>()
            .await
            .map_err(|e| AttestError::Ledger(format!("authorization service response: {e}")))
    }
}

/// Forwards calldata to a relayer that submits it to the anonymous attester as its own sender.
#[derive(Clone, Debug)]
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn relay(&self, call: LedgerCall, is_testnet: bool) -> Result<TxHash> {
        // The relayer only ever calls the anonymous attester; `call.to` is implied.
        let url = format!("{}/proxy", self.base_url.trim_end_matches('/'));
        debug!(%url, to = ?call.to, is_testnet, "relaying call");
        let response = self
            .client
            .post(&url)
            .json(&ProxyTransactionRequest {
                input: call.data,
                is_testnet,
            })
            .send()
            .await
            .map_err(|e| AttestError::Ledger(format!("relay: {e}")))?;
        if !response.status().is_success() {
            return Err(AttestError::PublishRejected(rejected_body(response).await));
        }

        let body: ProxyTransactionResponse = response
            .json()
            .await
            .map_err(|e| AttestError::PublishRejected(format!("relay response: {e}")))?;
        Ok(body.hash)
    }
}

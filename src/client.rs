//! The surface callers drive: derive a commitment, build a proof, publish, revoke, list.
//!
//! Every operation returns a typed [`Result`]; network waits are bounded by the timeouts in
//! [`ProtocolConfig`].

use crate::config::{ChainConfig, ProtocolConfig};
use crate::crypto::commitment::{Commitment, RevocationSecret};
use crate::crypto::hash::FieldHash;
use crate::error::{AttestError, Result};
use crate::generic::bulletin::{Ledger, Relay, TxReceipt};
use crate::generic::interaction::{ProofArtifact, ProvingBackend};
use crate::generic::object::{AttestationId, AttestationPayload};
use crate::generic::publish::AttestationPublisher;
use crate::generic::revocation::{RevocationEvent, RevocationRequest, RevocationState, Revoker};
use crate::generic::scan::{self, AttestationIndex, Page, PageQuery};
use crate::generic::service::{challenge, AuthorizationService, RoleGrant};
use crate::generic::user::{AttestationDraft, ProofBuilder};
use ark_bn254::Fr;
use ethers::signers::Signer;
use ethers::types::Address;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `(revoker, revokerHash)` for `secret` under `reference`.
pub fn derive_commitment<H: FieldHash<Fr>>(secret: RevocationSecret, reference: Fr) -> Result<Commitment> {
    Ok(Commitment::derive::<H>(secret, reference)?)
}

/// Proves ownership of `wallet`'s account to the authorization service and returns its grant.
pub async fn request_roles<S: Signer, A: AuthorizationService + ?Sized>(
    service: &A,
    wallet: &S,
) -> Result<RoleGrant> {
    let address = wallet.address();
    let ownership = wallet
        .sign_message(challenge(&address))
        .await
        .map_err(|e| AttestError::validation("signature", e.to_string()))?;
    service.role_signatures(address, &ownership).await
}

async fn bounded<T>(limit: Duration, step: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AttestError::Timeout { step })?
}

/// What an anonymous publication needs besides the draft.
pub struct Credentials<'a> {
    /// The role holder's account, proven to the authorization service.
    pub address: Address,
    pub grant: &'a RoleGrant,
    pub secret: RevocationSecret,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    pub receipt: TxReceipt,
    pub url: Option<String>,
}

pub struct AttestClient<H, B, L, R, I>
where
    H: FieldHash<Fr>,
    B: ProvingBackend,
    L: Ledger,
    R: Relay,
    I: AttestationIndex,
{
    config: Arc<ProtocolConfig>,
    chain_id: u64,
    builder: ProofBuilder<H, B>,
    publisher: AttestationPublisher<L, R>,
    revoker: Revoker<L, R>,
    ledger: Arc<L>,
    index: Arc<I>,
}

impl<H, B, L, R, I> AttestClient<H, B, L, R, I>
where
    H: FieldHash<Fr>,
    B: ProvingBackend,
    L: Ledger,
    R: Relay,
    I: AttestationIndex,
{
    pub fn new(
        config: Arc<ProtocolConfig>,
        chain_id: u64,
        backend: Arc<B>,
        ledger: Arc<L>,
        relay: Arc<R>,
        index: Arc<I>,
    ) -> Result<Self> {
        Ok(Self {
            builder: ProofBuilder::new(config.clone(), backend)?,
            publisher: AttestationPublisher::new(config.clone(), chain_id, ledger.clone(), relay.clone())?,
            revoker: Revoker::new(config.clone(), chain_id, ledger.clone(), relay)?,
            config,
            chain_id,
            ledger,
            index,
        })
    }

    pub fn chain(&self) -> Result<&ChainConfig> {
        self.config.chain(self.chain_id)
    }

    pub fn builder(&self) -> &ProofBuilder<H, B> {
        &self.builder
    }

    /// Builds an anonymous attestation proof, cancellable and bounded by the proof timeout.
    pub async fn build_anonymous_proof(
        &self,
        address: Address,
        grant: &RoleGrant,
        payload: &AttestationPayload,
        secret: RevocationSecret,
        cancel: &CancellationToken,
    ) -> Result<ProofArtifact> {
        bounded(
            self.config.proof_timeout(),
            "proof generation",
            self.builder.build_cancellable(address, grant, payload, secret, cancel),
        )
        .await
    }

    /// Validates, proves when anonymous, submits and waits for the receipt.
    ///
    /// Anonymous drafts need `credentials`; public drafts are signed by the connected account.
    pub async fn publish_attestation(
        &self,
        draft: &AttestationDraft,
        credentials: Option<Credentials<'_>>,
        cancel: &CancellationToken,
    ) -> Result<Published> {
        let (recipient, payload) = draft.validate(credentials.as_ref().map(|c| &c.secret))?;

        let tx = match credentials {
            Some(credentials) if draft.anonymous => {
                let artifact = self
                    .build_anonymous_proof(
                        credentials.address,
                        credentials.grant,
                        &payload,
                        credentials.secret,
                        cancel,
                    )
                    .await?;
                self.publisher.publish_anonymous(&artifact, recipient, &payload).await?
            }
            _ if draft.anonymous => {
                return Err(AttestError::validation("secret", "required for anonymous attestations"))
            }
            _ => self.publisher.publish_public(recipient, &payload).await?,
        };

        let receipt = self.publisher.wait(tx).await?;
        let chain = self.chain()?;
        let url = receipt.attestation.map(|uid| chain.attestation_url(&uid));
        info!(?tx, attestation = ?receipt.attestation, "attestation published");
        Ok(Published { receipt, url })
    }

    /// Looks up `uid` and starts its revocation.
    pub async fn request_revocation(&self, uid: AttestationId) -> Result<RevocationRequest<H>> {
        let record = bounded(self.config.ledger_timeout(), "attestation lookup", self.ledger.attestation(uid))
            .await?
            .ok_or_else(|| AttestError::validation("uid", format!("unknown attestation {uid:?}")))?;

        let mut request = RevocationRequest::new(record, self.chain()?, self.config.revoker_hash_slot);
        request.begin(self.ledger.account())?;
        Ok(request)
    }

    pub async fn supply_secret(
        &self,
        request: &mut RevocationRequest<H>,
        secret: RevocationSecret,
    ) -> Result<RevocationState> {
        request
            .handle_within(
                RevocationEvent::SecretSupplied(secret),
                self.ledger.as_ref(),
                self.config.ledger_timeout(),
            )
            .await
    }

    pub async fn cancel_revocation(&self, request: &mut RevocationRequest<H>) -> Result<RevocationState> {
        request.handle(RevocationEvent::Cancelled, self.ledger.as_ref()).await
    }

    /// Submits an `Authorized` revocation and waits for it to be mined.
    pub async fn submit_revocation(&self, request: &RevocationRequest<H>) -> Result<TxReceipt> {
        self.revoker.submit(request).await
    }

    /// One page of this chain's attestations, newest first.
    pub async fn list_attestations(
        &self,
        page: u64,
        page_size: u64,
        recipient: Option<Address>,
        attester: Option<Address>,
    ) -> Result<Page> {
        let mut query = PageQuery::new(self.chain()?.schema, page, page_size);
        if let Some(recipient) = recipient {
            query = query.with_recipient(recipient);
        }
        if let Some(attester) = attester {
            query = query.with_attester(attester);
        }
        bounded(self.config.ledger_timeout(), "attestation listing", scan::query(self.index.as_ref(), &query)).await
    }
}

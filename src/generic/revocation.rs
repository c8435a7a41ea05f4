//! Revocation as an explicit state machine.
//!
//! A request starts `Idle`. Anonymous attestations move to `AwaitingSecret` and are only
//! `Authorized` once a supplied secret re-derives the revoker hash stored on the ledger.
//! Public attestations are authorized by the connected account being the attester of record.
//! Nothing is submitted until the request is `Authorized`.

use crate::config::{ChainConfig, ProtocolConfig};
use crate::crypto::commitment::{Commitment, RevocationSecret};
use crate::crypto::hash::FieldHash;
use crate::error::{AttestError, Result};
use crate::generic::abi::AttesterCall;
use crate::generic::bulletin::{Ledger, LedgerCall, PublicLedger, Relay, TxHash, TxReceipt};
use crate::generic::publish::RECEIPT_POLL;
use crate::generic::object::{AttestationId, AttestationRecord};
use ark_bn254::Fr;
use ethers::types::{Address, H256};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSecret,
    UserCancelled,
    AlreadyRevoked,
    NotAttester,
}

/// What entitles the caller to revoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    /// The opened commitment, sent on-chain as proof of knowledge.
    Anonymous { revoker: H256 },
    /// The connected account is the attester of record.
    Attester { account: Address },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevocationState {
    Idle,
    AwaitingSecret,
    Verifying,
    Authorized(Authorization),
    Rejected(RejectReason),
}

#[derive(Debug)]
pub enum RevocationEvent {
    SecretSupplied(RevocationSecret),
    Cancelled,
}

pub struct RevocationRequest<H: FieldHash<Fr>> {
    record: AttestationRecord,
    anonymous_attester: Address,
    mapping: u64,
    state: RevocationState,
    _phantom_hash: PhantomData<H>,
}

impl<H: FieldHash<Fr>> RevocationRequest<H> {
    pub fn new(record: AttestationRecord, chain: &ChainConfig, mapping: u64) -> Self {
        Self {
            record,
            anonymous_attester: chain.anonymous_attester,
            mapping,
            state: RevocationState::Idle,
            _phantom_hash: PhantomData,
        }
    }

    pub fn state(&self) -> RevocationState {
        self.state
    }

    pub fn record(&self) -> &AttestationRecord {
        &self.record
    }

    pub fn is_anonymous(&self) -> bool {
        self.record.is_anonymous(self.anonymous_attester)
    }

    pub fn authorization(&self) -> Option<Authorization> {
        match self.state {
            RevocationState::Authorized(auth) => Some(auth),
            _ => None,
        }
    }

    fn unexpected(&self, action: &str) -> AttestError {
        AttestError::validation("state", format!("cannot {action} while {:?}", self.state))
    }

    /// Leaves `Idle`. `account` is the connected signer, if any.
    pub fn begin(&mut self, account: Option<Address>) -> Result<RevocationState> {
        if self.state != RevocationState::Idle {
            return Err(self.unexpected("begin"));
        }
        let id = self.record.id;

        self.state = if self.record.is_revoked() {
            RevocationState::Rejected(RejectReason::AlreadyRevoked)
        } else if self.is_anonymous() {
            RevocationState::AwaitingSecret
        } else {
            let account = account.ok_or(AttestError::NoSigner)?;
            if account == self.record.attester {
                RevocationState::Authorized(Authorization::Attester { account })
            } else {
                RevocationState::Rejected(RejectReason::NotAttester)
            }
        };

        debug!(?id, state = ?self.state, "revocation started");
        Ok(self.state)
    }

    /// Feeds one event to a request that is `AwaitingSecret`.
    ///
    /// A supplied secret is consumed by commitment derivation before the ledger is read. If the
    /// read fails the request returns to `AwaitingSecret` and the error is propagated.
    pub async fn handle<L: PublicLedger + ?Sized>(
        &mut self,
        event: RevocationEvent,
        ledger: &L,
    ) -> Result<RevocationState> {
        if self.state != RevocationState::AwaitingSecret {
            return Err(self.unexpected("accept input"));
        }

        let secret = match event {
            RevocationEvent::Cancelled => {
                info!(id = ?self.record.id, "revocation cancelled");
                self.state = RevocationState::Rejected(RejectReason::UserCancelled);
                return Ok(self.state);
            }
            RevocationEvent::SecretSupplied(secret) => secret,
        };
        if secret.is_empty() {
            return Err(AttestError::validation("secret", "must not be empty"));
        }

        let reference = self.record.payload.reference_field()?;
        let commitment = Commitment::derive::<H>(secret, reference)?;

        self.state = RevocationState::Verifying;
        let stored = match ledger
            .stored_revoker_hash(self.anonymous_attester, self.record.id, self.mapping)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                self.state = RevocationState::AwaitingSecret;
                return Err(e);
            }
        };

        self.state = if commitment.opens(&stored) {
            info!(id = ?self.record.id, "revocation secret accepted");
            RevocationState::Authorized(Authorization::Anonymous {
                revoker: commitment.revoker_word(),
            })
        } else {
            warn!(id = ?self.record.id, revoker_hash = ?stored, "revocation secret does not match");
            RevocationState::Rejected(RejectReason::InvalidSecret)
        };
        Ok(self.state)
    }

    /// [`Self::handle`] bounded by `timeout`. On expiry the request returns to `AwaitingSecret`.
    pub async fn handle_within<L: PublicLedger + ?Sized>(
        &mut self,
        event: RevocationEvent,
        ledger: &L,
        timeout: Duration,
    ) -> Result<RevocationState> {
        let outcome = tokio::time::timeout(timeout, self.handle(event, ledger)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.state = RevocationState::AwaitingSecret;
                Err(AttestError::Timeout {
                    step: "revoker hash read",
                })
            }
        }
    }

    /// Re-enters `AwaitingSecret` after a wrong secret.
    pub fn retry(&mut self) -> Result<RevocationState> {
        if self.state != RevocationState::Rejected(RejectReason::InvalidSecret) {
            return Err(self.unexpected("retry"));
        }
        self.state = RevocationState::AwaitingSecret;
        Ok(self.state)
    }
}

/// Submits authorized revocations, at most once per attestation.
pub struct Revoker<L: Ledger, R: Relay> {
    config: Arc<ProtocolConfig>,
    chain_id: u64,
    ledger: Arc<L>,
    relay: Arc<R>,
    claimed: Mutex<HashSet<AttestationId>>,
}

impl<L: Ledger, R: Relay> Revoker<L, R> {
    pub fn new(config: Arc<ProtocolConfig>, chain_id: u64, ledger: Arc<L>, relay: Arc<R>) -> Result<Self> {
        config.chain(chain_id)?;
        Ok(Self {
            config,
            chain_id,
            ledger,
            relay,
            claimed: Mutex::new(HashSet::new()),
        })
    }

    fn claim(&self, id: AttestationId) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id)
    }

    fn release(&self, id: &AttestationId) {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }

    /// Sends the revocation for an `Authorized` request and waits for it to be mined.
    ///
    /// Anonymous revocations go through the relay with the opened `revoker`; public ones are
    /// signed by the attester. A second submission for the same attestation is refused while
    /// the first is in flight or after it succeeded. A send that fails, reverts or is not mined
    /// in time frees the attestation for another attempt.
    pub async fn submit<H: FieldHash<Fr>>(&self, request: &RevocationRequest<H>) -> Result<TxReceipt> {
        let auth = request
            .authorization()
            .ok_or_else(|| AttestError::validation("state", "revocation is not authorized"))?;
        let record = request.record();
        let id = record.id;

        if !self.claim(id) {
            return Err(AttestError::AlreadyRevoked(format!("{id:?}")));
        }
        let result = match self.send(auth, record).await {
            Ok(tx) => self.wait(tx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(?id, error = %e, "revocation failed, releasing claim");
            self.release(&id);
        }
        result
    }

    async fn wait(&self, tx: TxHash) -> Result<TxReceipt> {
        tokio::time::timeout(
            self.config.receipt_timeout(),
            self.ledger.wait_for_receipt(tx, RECEIPT_POLL),
        )
        .await
        .map_err(|_| AttestError::Timeout { step: "revocation receipt" })?
    }

    async fn send(&self, auth: Authorization, record: &AttestationRecord) -> Result<TxHash> {
        let chain = self.config.chain(self.chain_id)?;
        match auth {
            Authorization::Anonymous { revoker } => {
                let call = AttesterCall::AnonymousRevoke {
                    schema: record.schema,
                    uid: record.id,
                    revoker,
                };
                info!(id = ?record.id, chain = %chain.name, "relaying anonymous revocation");
                self.relay
                    .relay(
                        LedgerCall {
                            to: chain.anonymous_attester,
                            data: call.encode(),
                        },
                        chain.is_testnet,
                    )
                    .await
            }
            Authorization::Attester { account } => {
                match self.ledger.account() {
                    None => return Err(AttestError::NoSigner),
                    Some(connected) if connected != account => {
                        return Err(AttestError::NotAttester(format!("{:?}", record.id)))
                    }
                    Some(_) => {}
                }
                let call = AttesterCall::EasRevoke {
                    schema: record.schema,
                    uid: record.id,
                };
                info!(id = ?record.id, chain = %chain.name, ?account, "revoking attestation");
                self.ledger
                    .send(LedgerCall {
                        to: self.config.eas,
                        data: call.encode(),
                    })
                    .await
            }
        }
    }
}

use crate::config::{ChainConfig, ProtocolConfig};
use crate::crypto::hash::FieldHash;
use crate::crypto::sig::VerifyingKey;
use crate::error::{AttestError, Result};
use crate::generic::abi::{decode_payload, encode_payload, AttesterCall};
use crate::generic::bulletin::{mapping_slot, Ledger, LedgerCall, PublicLedger, Relay, TxHash, TxReceipt};
use crate::generic::interaction::{AttestationProof, ProofVerifier, CIRCUIT_ABI_V1};
use crate::generic::object::{AttestationId, AttestationPayload, AttestationRecord, Time};
use crate::generic::scan::{AttestationIndex, PageQuery, RawAttestation};
use crate::util::{field_to_word, keccak_to_field, u64_to_word, word_to_field};
use ark_bn254::Fr;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Sender the in-memory relay submits transactions as.
pub const RELAYER: Address = Address::repeat_byte(0x5e);

const GENESIS_TIME: Time = 1_700_000_000;

#[derive(Clone, Debug)]
struct Entry {
    id: AttestationId,
    schema: H256,
    attester: Address,
    recipient: Address,
    data: Bytes,
    time: Time,
    revocation_time: Time,
    txid: TxHash,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    storage: HashMap<(Address, H256), H256>,
    receipts: HashMap<TxHash, TxReceipt>,
    clock: Time,
    sent: u64,
    relayed: usize,
    revocations: usize,
    read_delay: Duration,
}

impl State {
    fn entry_mut(&mut self, uid: &AttestationId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == *uid)
    }

    fn tick(&mut self) -> Time {
        self.clock += 1;
        GENESIS_TIME + self.clock
    }
}

fn reverted(reason: impl Into<String>) -> AttestError {
    AttestError::PublishRejected(format!("execution reverted: {}", reason.into()))
}

/// A single-chain ledger held in memory.
///
/// It plays EAS and the anonymous attester contract: anonymous attestations are accepted only
/// if `verifier` accepts the proof against public inputs rebuilt from the call, their revoker
/// hash is stored in the attester's `uid => revokerHash` mapping, and anonymous revocations
/// must open it. Handles created with [`MemoryLedger::connect`] share state.
pub struct MemoryLedger<H: FieldHash<Fr>, V: ProofVerifier> {
    config: Arc<ProtocolConfig>,
    chain: ChainConfig,
    authority: VerifyingKey,
    verifier: Arc<V>,
    account: Option<Address>,
    state: Arc<Mutex<State>>,
    _phantom_hash: PhantomData<H>,
}

impl<H: FieldHash<Fr>, V: ProofVerifier> Clone for MemoryLedger<H, V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            chain: self.chain.clone(),
            authority: self.authority,
            verifier: self.verifier.clone(),
            account: self.account,
            state: self.state.clone(),
            _phantom_hash: PhantomData,
        }
    }
}

impl<H: FieldHash<Fr>, V: ProofVerifier> MemoryLedger<H, V> {
    pub fn new(config: Arc<ProtocolConfig>, chain_id: u64, verifier: Arc<V>) -> Result<Self> {
        let chain = config.chain(chain_id)?.clone();
        let authority = config.verifying_key()?;
        Ok(Self {
            config,
            chain,
            authority,
            verifier,
            account: None,
            state: Arc::new(Mutex::new(State::default())),
            _phantom_hash: PhantomData,
        })
    }

    /// A handle on the same ledger that signs as `account`.
    pub fn connect(&self, account: Address) -> Self {
        Self {
            account: Some(account),
            ..self.clone()
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Transactions submitted through [`Relay::relay`].
    pub fn relayed(&self) -> usize {
        self.state().relayed
    }

    /// Revocations that were executed, anonymous or not.
    pub fn revocations(&self) -> usize {
        self.state().revocations
    }

    /// Delays every storage read, to exercise caller timeouts.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state().read_delay = delay;
    }

    /// Records an attestation with an arbitrary body, as another schema user might.
    pub fn insert_foreign(&self, attester: Address, recipient: Address, data: Bytes) -> AttestationId {
        let mut state = self.state();
        let time = state.tick();
        let id = H256(keccak256([attester.as_bytes(), recipient.as_bytes(), u64_to_word(time).as_bytes()].concat()));
        state.entries.push(Entry {
            id,
            schema: self.chain.schema,
            attester,
            recipient,
            data,
            time,
            revocation_time: 0,
            txid: H256::zero(),
        });
        id
    }

    fn public_inputs(&self, payload: &AttestationPayload, proof: &AttestationProof) -> Result<Vec<Fr>> {
        let word = |w: &H256, what: &str| word_to_field(w).ok_or_else(|| reverted(format!("{what} out of range")));
        let mut inputs = vec![Fr::from(0u64); CIRCUIT_ABI_V1.num_public];
        inputs[CIRCUIT_ABI_V1.pubkey_x] = self.authority.0.x;
        inputs[CIRCUIT_ABI_V1.pubkey_y] = self.authority.0.y;
        inputs[CIRCUIT_ABI_V1.role] = payload.role.to_field();
        inputs[CIRCUIT_ABI_V1.msg] = keccak_to_field(payload.proof_message().as_bytes());
        inputs[CIRCUIT_ABI_V1.nonce] = word(&proof.nonce, "nonce")?;
        inputs[CIRCUIT_ABI_V1.timestamp] = word(&proof.timestamp, "timestamp")?;
        inputs[CIRCUIT_ABI_V1.revoker_hash] = word(&proof.revoker_hash, "revoker hash")?;
        Ok(inputs)
    }

    fn attest(state: &mut State, schema: H256, attester: Address, recipient: Address, data: Bytes, tx: TxHash) -> AttestationId {
        let time = state.tick();
        let id = H256(keccak256(
            [schema.as_bytes(), attester.as_bytes(), recipient.as_bytes(), u64_to_word(time).as_bytes()].concat(),
        ));
        state.entries.push(Entry {
            id,
            schema,
            attester,
            recipient,
            data,
            time,
            revocation_time: 0,
            txid: tx,
        });
        id
    }

    fn revoke(state: &mut State, uid: &AttestationId, revoker_of_record: Address) -> Result<()> {
        let time = state.tick();
        let entry = state.entry_mut(uid).ok_or_else(|| reverted("NotFound"))?;
        if entry.attester != revoker_of_record {
            return Err(reverted("AccessDenied"));
        }
        if entry.revocation_time != 0 {
            return Err(reverted("AlreadyRevoked"));
        }
        entry.revocation_time = time;
        state.revocations += 1;
        Ok(())
    }

    /// Runs `call` from `from` as the contracts would, all-or-nothing.
    fn execute(&self, from: Address, call: LedgerCall) -> Result<TxHash> {
        let decoded = AttesterCall::decode(&call.data).map_err(|e| reverted(e.to_string()))?;

        // Proofs are checked outside the lock.
        if let AttesterCall::AnonymousAttest { payload, proof, .. } = &decoded {
            let inputs = self.public_inputs(payload, proof)?;
            if !self.verifier.verify(&inputs, &proof.proof) {
                return Err(reverted("InvalidProof"));
            }
        }

        let mut state = self.state();
        state.sent += 1;
        let tx = H256(keccak256(
            [from.as_bytes(), u64_to_word(state.sent).as_bytes(), call.data.as_ref()].concat(),
        ));

        let attester_contract = self.chain.anonymous_attester;
        let mapping = self.config.revoker_hash_slot;
        let attestation = match decoded {
            AttesterCall::AnonymousAttest {
                schema,
                recipient,
                payload,
                proof,
            } if call.to == attester_contract => {
                let uid = Self::attest(&mut state, schema, attester_contract, recipient, encode_payload(&payload), tx);
                state
                    .storage
                    .insert((attester_contract, mapping_slot(&uid, mapping)), proof.revoker_hash);
                Some(uid)
            }
            AttesterCall::AnonymousRevoke { uid, revoker, .. } if call.to == attester_contract => {
                let stored = state
                    .storage
                    .get(&(attester_contract, mapping_slot(&uid, mapping)))
                    .copied()
                    .unwrap_or_default();
                let revoker = word_to_field(&revoker).ok_or_else(|| reverted("revoker out of range"))?;
                let revoker_hash = H::hash2(revoker, revoker).map_err(|e| reverted(e.to_string()))?;
                if field_to_word(&revoker_hash) != stored {
                    return Err(reverted("InvalidRevoker"));
                }
                Self::revoke(&mut state, &uid, attester_contract)?;
                None
            }
            AttesterCall::EasAttest {
                schema,
                recipient,
                payload,
            } if call.to == self.config.eas => {
                Some(Self::attest(&mut state, schema, from, recipient, encode_payload(&payload), tx))
            }
            AttesterCall::EasRevoke { uid, .. } if call.to == self.config.eas => {
                Self::revoke(&mut state, &uid, from)?;
                None
            }
            _ => return Err(reverted("call sent to the wrong contract")),
        };

        let block = state.sent;
        state.receipts.insert(
            tx,
            TxReceipt {
                tx,
                success: true,
                block: Some(block),
                attestation,
            },
        );
        debug!(?tx, ?from, "executed");
        Ok(tx)
    }
}

#[async_trait]
impl<H: FieldHash<Fr>, V: ProofVerifier> PublicLedger for MemoryLedger<H, V> {
    async fn storage_at(&self, contract: Address, slot: H256) -> Result<H256> {
        let delay = self.state().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state()
            .storage
            .get(&(contract, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn attestation(&self, uid: AttestationId) -> Result<Option<AttestationRecord>> {
        let entry = self.state().entries.iter().find(|e| e.id == uid).cloned();
        entry
            .map(|e| -> Result<AttestationRecord> {
                Ok(AttestationRecord {
                    id: e.id,
                    schema: e.schema,
                    attester: e.attester,
                    recipient: e.recipient,
                    payload: decode_payload(&e.data)?,
                    time: e.time,
                    revocation_time: e.revocation_time,
                    txid: Some(e.txid),
                })
            })
            .transpose()
    }

    async fn receipt(&self, tx: TxHash) -> Result<Option<TxReceipt>> {
        Ok(self.state().receipts.get(&tx).cloned())
    }
}

#[async_trait]
impl<H: FieldHash<Fr>, V: ProofVerifier> Ledger for MemoryLedger<H, V> {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn send(&self, call: LedgerCall) -> Result<TxHash> {
        let from = self.account.ok_or(AttestError::NoSigner)?;
        self.execute(from, call)
    }
}

#[async_trait]
impl<H: FieldHash<Fr>, V: ProofVerifier> Relay for MemoryLedger<H, V> {
    async fn relay(&self, call: LedgerCall, _is_testnet: bool) -> Result<TxHash> {
        if call.to != self.chain.anonymous_attester {
            return Err(AttestError::PublishRejected("relay only forwards to the anonymous attester".to_string()));
        }
        self.state().relayed += 1;
        self.execute(RELAYER, call)
    }
}

#[async_trait]
impl<H: FieldHash<Fr>, V: ProofVerifier> AttestationIndex for MemoryLedger<H, V> {
    async fn fetch(&self, query: &PageQuery) -> Result<Vec<RawAttestation>> {
        let skip = usize::try_from(query.skip()?)
            .map_err(|_| AttestError::validation("page", "offset out of range"))?;
        let take = usize::try_from(query.page_size)
            .map_err(|_| AttestError::validation("page_size", "out of range"))?;
        let mut entries: Vec<Entry> = self
            .state()
            .entries
            .iter()
            .filter(|e| e.schema == query.schema)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.time.cmp(&a.time));

        Ok(entries
            .into_iter()
            .map(|e| RawAttestation {
                id: e.id,
                data: format!("0x{}", hex::encode(&e.data)),
                revocation_time: e.revocation_time,
                attester: e.attester,
                recipient: e.recipient,
                time: e.time,
                txid: if e.txid.is_zero() { String::new() } else { format!("{:?}", e.txid) },
            })
            .filter(|raw| query.matches(raw))
            .skip(skip)
            .take(take)
            .collect())
    }
}

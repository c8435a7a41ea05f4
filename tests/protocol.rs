use ethers::types::{Address, Bytes, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zk_attest::client::{derive_commitment, AttestClient, Credentials};
use zk_attest::config::{ProtocolConfig, OPTIMISM_SEPOLIA};
use zk_attest::crypto::commitment::RevocationSecret;
use zk_attest::crypto::sig::SigningKey;
use zk_attest::generic::bulletin::{mapping_slot, PublicLedger};
use zk_attest::generic::object::{AttestationId, AttestationPayload, Role};
use zk_attest::generic::publish::AttestationPublisher;
use zk_attest::generic::revocation::{Authorization, RejectReason, RevocationState};
use zk_attest::generic::service::RoleGrant;
use zk_attest::generic::user::AttestationDraft;
use zk_attest::impls::centralized::{MemoryLedger, RoleSigner};
use zk_attest::impls::dummy::DummyBackend;
use zk_attest::impls::hash::CircomPoseidon;
use zk_attest::AttestError;

type H = CircomPoseidon;
type Backend = DummyBackend<H>;
type Chain = MemoryLedger<H, Backend>;
type Client = AttestClient<H, Backend, Chain, Chain, Chain>;

const ANONYMOUS_ATTESTER: Address = Address::repeat_byte(0xaa);
const HOLDER: Address = Address::repeat_byte(0x11);
const ALICE: Address = Address::repeat_byte(0xa1);
const BOB: Address = Address::repeat_byte(0xb0);
const RECIPIENT: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

struct World {
    config: Arc<ProtocolConfig>,
    backend: Arc<Backend>,
    ledger: Chain,
    signer: RoleSigner<H>,
}

impl World {
    fn new() -> Self {
        let signer = RoleSigner::<H>::new(SigningKey::from_be_bytes(&[7u8; 32]))
            .with_role(HOLDER, Role::Badgeholder)
            .with_role(ALICE, Role::Delegate);

        let mut config = ProtocolConfig::default().with_verifying_key(&signer.verifying_key());
        let chain = config.chain_mut(OPTIMISM_SEPOLIA).unwrap();
        chain.schema = [0x5c; 32].into();
        chain.anonymous_attester = ANONYMOUS_ATTESTER;
        let config = Arc::new(config);

        let backend = Arc::new(Backend::new());
        let ledger = Chain::new(config.clone(), OPTIMISM_SEPOLIA, backend.clone()).unwrap();
        Self {
            config,
            backend,
            ledger,
            signer,
        }
    }

    /// A client whose ledger signs as `account`, if given.
    fn client(&self, account: Option<Address>) -> Client {
        let ledger = Arc::new(match account {
            Some(account) => self.ledger.connect(account),
            None => self.ledger.clone(),
        });
        AttestClient::new(
            self.config.clone(),
            OPTIMISM_SEPOLIA,
            self.backend.clone(),
            ledger.clone(),
            ledger.clone(),
            ledger,
        )
        .unwrap()
    }

    fn grant(&self, address: Address) -> RoleGrant {
        self.signer.issue(address, 1_700_000_000, &mut rand::thread_rng()).unwrap()
    }
}

fn draft(role: Role, anonymous: bool) -> AttestationDraft {
    AttestationDraft {
        recipient: RECIPIENT.to_string(),
        role,
        title: "Great contributor".to_string(),
        message: "Reviewed every governance proposal this season.".to_string(),
        anonymous,
        badgeholder_ref: None,
    }
}

async fn publish_anonymously(world: &World, client: &Client, secret: &str) -> AttestationId {
    let grant = world.grant(HOLDER);
    let credentials = Credentials {
        address: HOLDER,
        grant: &grant,
        secret: RevocationSecret::new(secret),
    };
    let published = client
        .publish_attestation(&draft(Role::Badgeholder, true), Some(credentials), &CancellationToken::new())
        .await
        .unwrap();
    assert!(published.receipt.success);
    published.receipt.attestation.unwrap()
}

async fn publish_publicly(client: &Client, title: &str) -> AttestationId {
    let mut d = draft(Role::None, false);
    d.title = title.to_string();
    let published = client
        .publish_attestation(&d, None, &CancellationToken::new())
        .await
        .unwrap();
    published.receipt.attestation.unwrap()
}

#[tokio::test]
async fn anonymous_attestation_is_revoked_only_with_its_secret() {
    let world = World::new();
    let client = world.client(None);
    let uid = publish_anonymously(&world, &client, "pw1").await;

    let record = world.ledger.attestation(uid).await.unwrap().unwrap();
    assert_eq!(record.attester, ANONYMOUS_ATTESTER);
    assert_eq!(world.ledger.relayed(), 1);

    let stored = world
        .ledger
        .storage_at(ANONYMOUS_ATTESTER, mapping_slot(&uid, world.config.revoker_hash_slot))
        .await
        .unwrap();
    let commitment = derive_commitment::<H>(RevocationSecret::new("pw1"), 0u64.into()).unwrap();
    assert_eq!(stored, commitment.revoker_hash_word());

    let mut request = client.request_revocation(uid).await.unwrap();
    assert_eq!(request.state(), RevocationState::AwaitingSecret);

    let state = client
        .supply_secret(&mut request, RevocationSecret::new("pw2"))
        .await
        .unwrap();
    assert_eq!(state, RevocationState::Rejected(RejectReason::InvalidSecret));
    assert!(matches!(
        client.submit_revocation(&request).await,
        Err(AttestError::Validation { field: "state", .. })
    ));
    assert_eq!(world.ledger.revocations(), 0);

    request.retry().unwrap();
    let state = client
        .supply_secret(&mut request, RevocationSecret::new("pw1"))
        .await
        .unwrap();
    assert_eq!(
        state,
        RevocationState::Authorized(Authorization::Anonymous {
            revoker: commitment.revoker_word()
        })
    );

    let receipt = client.submit_revocation(&request).await.unwrap();
    assert!(receipt.success);
    assert_eq!(world.ledger.revocations(), 1);
    assert!(world.ledger.attestation(uid).await.unwrap().unwrap().is_revoked());

    let again = client.request_revocation(uid).await.unwrap();
    assert_eq!(again.state(), RevocationState::Rejected(RejectReason::AlreadyRevoked));
}

#[tokio::test]
async fn role_mismatch_is_refused_before_proving() {
    let world = World::new();
    let client = world.client(None);
    let grant = world.grant(ALICE);
    assert_eq!(grant.roles(), vec![Role::None, Role::Delegate]);

    let credentials = Credentials {
        address: ALICE,
        grant: &grant,
        secret: RevocationSecret::new("pw1"),
    };
    let result = client
        .publish_attestation(&draft(Role::Badgeholder, true), Some(credentials), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AttestError::Validation { field: "role", .. })));
    assert_eq!(world.backend.calls(), 0);
    assert_eq!(world.ledger.relayed(), 0);
}

#[tokio::test]
async fn grant_from_a_foreign_key_is_refused_before_proving() {
    let world = World::new();
    let client = world.client(None);
    let impostor = RoleSigner::<H>::new(SigningKey::from_be_bytes(&[9u8; 32])).with_role(HOLDER, Role::Badgeholder);
    let grant = impostor.issue(HOLDER, 1_700_000_000, &mut rand::thread_rng()).unwrap();

    let credentials = Credentials {
        address: HOLDER,
        grant: &grant,
        secret: RevocationSecret::new("pw1"),
    };
    let result = client
        .publish_attestation(&draft(Role::Badgeholder, true), Some(credentials), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AttestError::Validation { field: "signature", .. })));
    assert_eq!(world.backend.calls(), 0);
    assert_eq!(world.ledger.relayed(), 0);
}

#[tokio::test]
async fn witness_words_outside_the_field_are_refused_before_proving() {
    let world = World::new();
    let client = world.client(None);
    let mut grant = world.grant(HOLDER);
    let (_, payload) = draft(Role::Badgeholder, true)
        .validate(Some(&RevocationSecret::new("pw1")))
        .unwrap();

    let auth = grant.select(Role::Badgeholder).unwrap();
    let (mut witness, _) = client
        .builder()
        .witness(
            HOLDER,
            auth,
            &payload.proof_message(),
            grant.timestamp,
            RevocationSecret::new("pw1"),
            &mut rand::thread_rng(),
        )
        .unwrap();
    assert!(client.builder().check(&witness).is_ok());
    witness.msg = H256::repeat_byte(0xff);
    assert_eq!(
        client.builder().check(&witness).unwrap_err(),
        AttestError::InvalidWitness { field: "msg" }
    );

    for auth in grant.signatures.iter_mut() {
        auth.random_nonce = H256::repeat_byte(0xff);
    }
    let credentials = Credentials {
        address: HOLDER,
        grant: &grant,
        secret: RevocationSecret::new("pw1"),
    };
    let result = client
        .publish_attestation(&draft(Role::Badgeholder, true), Some(credentials), &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap_err(), AttestError::InvalidWitness { field: "random_nonce" });
    assert_eq!(world.backend.calls(), 0);
    assert_eq!(world.ledger.relayed(), 0);
}

#[tokio::test]
async fn invalid_drafts_never_reach_the_ledger() {
    let world = World::new();
    let client = world.client(Some(ALICE));
    let mut d = draft(Role::None, false);
    d.recipient = "0xnot-an-address".to_string();

    let result = client.publish_attestation(&d, None, &CancellationToken::new()).await;
    assert!(matches!(result, Err(AttestError::Validation { field: "recipient", .. })));

    let result = client
        .publish_attestation(&draft(Role::Badgeholder, true), None, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AttestError::Validation { field: "secret", .. })));

    let page = client.list_attestations(0, 10, None, None).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn a_proof_for_another_message_is_rejected_on_chain() {
    let world = World::new();
    let client = world.client(None);
    let grant = world.grant(HOLDER);
    let (recipient, payload) = draft(Role::Badgeholder, true)
        .validate(Some(&RevocationSecret::new("pw1")))
        .unwrap();

    let artifact = client
        .build_anonymous_proof(
            HOLDER,
            &grant,
            &payload,
            RevocationSecret::new("pw1"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let tampered = AttestationPayload {
        message: "Something else entirely.".to_string(),
        ..payload.clone()
    };
    let ledger = Arc::new(world.ledger.clone());
    let publisher = AttestationPublisher::new(world.config.clone(), OPTIMISM_SEPOLIA, ledger.clone(), ledger).unwrap();

    match publisher.publish_anonymous(&artifact, recipient, &tampered).await {
        Err(AttestError::PublishRejected(reason)) => assert!(reason.contains("InvalidProof")),
        other => panic!("expected a rejected publication, got {other:?}"),
    }
    assert!(publisher.publish_anonymous(&artifact, recipient, &payload).await.is_ok());
}

#[tokio::test]
async fn unavailable_backend_is_retryable() {
    let world = World::new();
    let backend = Arc::new(Backend::unavailable());
    let ledger = Arc::new(world.ledger.clone());
    let client: Client = AttestClient::new(
        world.config.clone(),
        OPTIMISM_SEPOLIA,
        backend.clone(),
        ledger.clone(),
        ledger.clone(),
        ledger,
    )
    .unwrap();

    let grant = world.grant(HOLDER);
    let credentials = Credentials {
        address: HOLDER,
        grant: &grant,
        secret: RevocationSecret::new("pw1"),
    };
    let err = client
        .publish_attestation(&draft(Role::Badgeholder, true), Some(credentials), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AttestError::ProofGeneration(_)));
    assert!(err.is_retryable());
    assert_eq!(backend.calls(), 1);
    assert_eq!(world.ledger.relayed(), 0);
}

#[tokio::test]
async fn cancelled_proof_publishes_nothing() {
    let world = World::new();
    let client = world.client(None);
    let grant = world.grant(HOLDER);
    let credentials = Credentials {
        address: HOLDER,
        grant: &grant,
        secret: RevocationSecret::new("pw1"),
    };

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = client
        .publish_attestation(&draft(Role::Badgeholder, true), Some(credentials), &cancel)
        .await;

    assert_eq!(result, Err(AttestError::UserCancelled));
    assert_eq!(world.ledger.relayed(), 0);
}

#[tokio::test]
async fn cancelled_revocation_submits_nothing() {
    let world = World::new();
    let client = world.client(None);
    let uid = publish_anonymously(&world, &client, "pw1").await;

    let mut request = client.request_revocation(uid).await.unwrap();
    let state = client.cancel_revocation(&mut request).await.unwrap();
    assert_eq!(state, RevocationState::Rejected(RejectReason::UserCancelled));
    assert!(request.retry().is_err());
    assert!(client.submit_revocation(&request).await.is_err());
    assert_eq!(world.ledger.revocations(), 0);
}

#[tokio::test]
async fn slow_ledger_read_times_out_and_can_be_retried() {
    let world = World::new();
    let client = world.client(None);
    let uid = publish_anonymously(&world, &client, "pw1").await;
    let mut request = client.request_revocation(uid).await.unwrap();

    tokio::time::pause();
    world.ledger.set_read_delay(Duration::from_secs(3600));
    let result = client
        .supply_secret(&mut request, RevocationSecret::new("pw1"))
        .await;
    assert!(matches!(result, Err(AttestError::Timeout { .. })));
    assert_eq!(request.state(), RevocationState::AwaitingSecret);

    world.ledger.set_read_delay(Duration::ZERO);
    let state = client
        .supply_secret(&mut request, RevocationSecret::new("pw1"))
        .await
        .unwrap();
    assert!(matches!(state, RevocationState::Authorized(_)));
}

#[tokio::test]
async fn concurrent_submissions_revoke_once() {
    let world = World::new();
    let client = world.client(None);
    let uid = publish_anonymously(&world, &client, "pw1").await;

    let mut request = client.request_revocation(uid).await.unwrap();
    client
        .supply_secret(&mut request, RevocationSecret::new("pw1"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(client.submit_revocation(&request), client.submit_revocation(&request));
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AttestError::AlreadyRevoked(_)))));
    assert_eq!(world.ledger.revocations(), 1);
}

#[tokio::test]
async fn public_attestations_are_revoked_by_their_attester() {
    let world = World::new();
    let alice = world.client(Some(ALICE));
    let bob = world.client(Some(BOB));
    let nobody = world.client(None);

    let uid = publish_publicly(&alice, "Thanks").await;
    let record = world.ledger.attestation(uid).await.unwrap().unwrap();
    assert_eq!(record.attester, ALICE);
    assert_eq!(world.ledger.relayed(), 0);

    let request = bob.request_revocation(uid).await.unwrap();
    assert_eq!(request.state(), RevocationState::Rejected(RejectReason::NotAttester));
    assert!(matches!(nobody.request_revocation(uid).await, Err(AttestError::NoSigner)));

    let request = alice.request_revocation(uid).await.unwrap();
    assert_eq!(
        request.state(),
        RevocationState::Authorized(Authorization::Attester { account: ALICE })
    );
    alice.submit_revocation(&request).await.unwrap();
    assert!(world.ledger.attestation(uid).await.unwrap().unwrap().is_revoked());
}

#[tokio::test]
async fn public_publication_needs_a_signer() {
    let world = World::new();
    let client = world.client(None);
    let result = client
        .publish_attestation(&draft(Role::None, false), None, &CancellationToken::new())
        .await;
    assert_eq!(result, Err(AttestError::NoSigner));
}

#[tokio::test]
async fn a_short_page_is_the_last_one() {
    let world = World::new();
    let alice = world.client(Some(ALICE));
    for i in 0..7 {
        publish_publicly(&alice, &format!("Attestation {i}")).await;
    }

    let page = alice.list_attestations(0, 10, None, None).await.unwrap();
    assert_eq!(page.items.len(), 7);
    assert!(page.is_last());
    assert_eq!(page.items[0].payload.title, "Attestation 6");
}

#[tokio::test]
async fn listing_pages_through_and_skips_foreign_bodies() {
    let world = World::new();
    let alice = world.client(Some(ALICE));
    for i in 0..12 {
        publish_publicly(&alice, &format!("Attestation {i}")).await;
    }
    world
        .ledger
        .insert_foreign(BOB, ALICE, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));

    let first = alice.list_attestations(0, 10, None, None).await.unwrap();
    assert_eq!(first.fetched, 10);
    assert_eq!(first.dropped, 1);
    assert_eq!(first.items.len(), 9);
    assert!(!first.is_last());
    assert!(first.items.windows(2).all(|w| w[0].time >= w[1].time));

    let second = alice.list_attestations(1, 10, None, None).await.unwrap();
    assert_eq!(second.items.len(), 3);
    assert!(second.is_last());

    let from_bob = alice.list_attestations(0, 10, None, Some(BOB)).await.unwrap();
    assert_eq!(from_bob.fetched, 1);
    assert!(from_bob.items.is_empty());
}

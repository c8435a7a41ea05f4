use ark_bn254::Fr;
use ethers::types::Address;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zk_attest::client::{AttestClient, Credentials};
use zk_attest::config::{ProtocolConfig, OPTIMISM_SEPOLIA};
use zk_attest::crypto::commitment::RevocationSecret;
use zk_attest::crypto::sig::SigningKey;
use zk_attest::generic::bulletin::PublicLedger;
use zk_attest::generic::interaction::{ProofVerifier, CIRCUIT_VERSION};
use zk_attest::generic::object::Role;
use zk_attest::generic::revocation::RevocationState;
use zk_attest::generic::user::AttestationDraft;
use zk_attest::impls::centralized::{MemoryLedger, RoleSigner};
use zk_attest::impls::groth16::Groth16Backend;
use zk_attest::impls::hash::CircomPoseidon;

type H = CircomPoseidon;
type Backend = Groth16Backend<H>;
type Chain = MemoryLedger<H, Backend>;

const ANONYMOUS_ATTESTER: Address = Address::repeat_byte(0xaa);
const HOLDER: Address = Address::repeat_byte(0x11);

#[tokio::test]
async fn groth16_attestation_round_trip() {
    let signer = RoleSigner::<H>::new(SigningKey::from_be_bytes(&[7u8; 32])).with_role(HOLDER, Role::Delegator);
    let mut config = ProtocolConfig::default().with_verifying_key(&signer.verifying_key());
    let chain = config.chain_mut(OPTIMISM_SEPOLIA).unwrap();
    chain.schema = [0x5c; 32].into();
    chain.anonymous_attester = ANONYMOUS_ATTESTER;
    let config = Arc::new(config);

    let backend = Arc::new(Backend::setup(&mut rand::thread_rng()).unwrap());
    let ledger = Arc::new(Chain::new(config.clone(), OPTIMISM_SEPOLIA, backend.clone()).unwrap());
    let client = AttestClient::<H, _, _, _, _>::new(
        config.clone(),
        OPTIMISM_SEPOLIA,
        backend.clone(),
        ledger.clone(),
        ledger.clone(),
        ledger.clone(),
    )
    .unwrap();

    let draft = AttestationDraft {
        recipient: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
        role: Role::Delegator,
        title: "Thoughtful delegator".to_string(),
        message: "Explained every vote on the forum.".to_string(),
        anonymous: true,
        badgeholder_ref: None,
    };
    let grant = signer.issue(HOLDER, 1_700_000_000, &mut rand::thread_rng()).unwrap();
    let (_, payload) = draft.validate(Some(&RevocationSecret::new("pw1"))).unwrap();

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
    assert_eq!(artifact.version, CIRCUIT_VERSION);
    assert!(backend.verify(&artifact.public_inputs, &artifact.proof));

    let mut wrong_inputs = artifact.public_inputs.clone();
    wrong_inputs[3] += Fr::from(1u64);
    assert!(!backend.verify(&wrong_inputs, &artifact.proof));

    let restored = Backend::from_bytes(
        &backend.proving_key_bytes().unwrap(),
        &backend.verifying_key_bytes().unwrap(),
    )
    .unwrap();
    assert!(restored.verify(&artifact.public_inputs, &artifact.proof));

    let credentials = Credentials {
        address: HOLDER,
        grant: &grant,
        secret: RevocationSecret::new("pw1"),
    };
    let published = client
        .publish_attestation(&draft, Some(credentials), &CancellationToken::new())
        .await
        .unwrap();
    let uid = published.receipt.attestation.unwrap();
    assert!(published.url.unwrap().ends_with(&format!("{uid:?}")));

    let mut request = client.request_revocation(uid).await.unwrap();
    let state = client
        .supply_secret(&mut request, RevocationSecret::new("pw1"))
        .await
        .unwrap();
    assert!(matches!(state, RevocationState::Authorized(_)));
    client.submit_revocation(&request).await.unwrap();
    assert!(ledger.attestation(uid).await.unwrap().unwrap().is_revoked());
}

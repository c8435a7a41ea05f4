use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use zk_attest::client::{derive_commitment, request_roles, AttestClient, Credentials};
use zk_attest::config::{ProtocolConfig, OPTIMISM};
use zk_attest::crypto::commitment::RevocationSecret;
use zk_attest::generic::bulletin::{Ledger, PublicLedger};
use zk_attest::generic::object::{AttestationId, Role};
use zk_attest::generic::revocation::{RevocationEvent, RevocationRequest, RevocationState, Revoker};
use zk_attest::generic::scan::{self, PageQuery};
use zk_attest::generic::service::RoleQuerier;
use zk_attest::generic::user::AttestationDraft;
use zk_attest::impls::eas::EasIndexer;
use zk_attest::impls::evm::EvmLedger;
use zk_attest::impls::groth16::Groth16Backend;
use zk_attest::impls::hash::CircomPoseidon;
use zk_attest::impls::http::{HttpAuthorizationService, HttpRelay};
use zk_attest::impls::roles::OnChainRoles;

type H = CircomPoseidon;

const PK_FILENAME: &str = "attest_pk.bin";
const VK_FILENAME: &str = "attest_vk.bin";

#[derive(Parser)]
#[command(name = "zk-attest", about = "Anonymous attestations with commit-reveal revocation")]
struct Cli {
    /// TOML file layered over the built-in configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = OPTIMISM)]
    chain_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the revoker hash a secret commits to.
    Commit(CommitArgs),
    /// Generate Groth16 keys for the attestation circuit.
    Setup(SetupArgs),
    /// Publish an attestation, anonymously or from the wallet.
    Publish(PublishArgs),
    /// Revoke an attestation.
    Revoke(RevokeArgs),
    /// List attestations, newest first.
    List(ListArgs),
    /// Show the roles an account holds on Optimism.
    Roles(RolesArgs),
}

#[derive(Args)]
struct CommitArgs {
    #[arg(long, env = "ZK_ATTEST_REVOCATION_SECRET", hide_env_values = true)]
    secret: String,
    /// Reference value, as a field element in decimal.
    #[arg(long, default_value_t = 0)]
    reference: u64,
}

#[derive(Args)]
struct SetupArgs {
    #[arg(long, default_value = "keys")]
    out: PathBuf,
}

#[derive(Args)]
struct WalletArgs {
    #[arg(long, env = "ZK_ATTEST_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,
}

impl WalletArgs {
    fn wallet(&self) -> Result<Option<LocalWallet>> {
        self.private_key
            .as_deref()
            .map(|key| key.parse::<LocalWallet>().context("invalid private key"))
            .transpose()
    }
}

#[derive(Args)]
struct PublishArgs {
    #[arg(long)]
    recipient: String,
    #[arg(long, default_value = "hidden")]
    role: Role,
    #[arg(long)]
    title: String,
    #[arg(long)]
    message: String,
    #[arg(long)]
    anonymous: bool,
    #[arg(long, env = "ZK_ATTEST_REVOCATION_SECRET", hide_env_values = true)]
    secret: Option<String>,
    /// Directory holding the Groth16 keys written by `setup`.
    #[arg(long, default_value = "keys")]
    keys: PathBuf,
    #[command(flatten)]
    wallet: WalletArgs,
}

#[derive(Args)]
struct RevokeArgs {
    #[arg(long)]
    uid: H256,
    #[arg(long, env = "ZK_ATTEST_REVOCATION_SECRET", hide_env_values = true)]
    secret: Option<String>,
    #[command(flatten)]
    wallet: WalletArgs,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, default_value_t = 0)]
    page: u64,
    #[arg(long, default_value_t = 10)]
    page_size: u64,
    #[arg(long)]
    recipient: Option<Address>,
    #[arg(long)]
    attester: Option<Address>,
}

#[derive(Args)]
struct RolesArgs {
    address: Address,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Commit(args) => commit(args),
        Commands::Setup(args) => setup(args),
        Commands::Publish(args) => publish(load_config(config)?, cli.chain_id, args).await,
        Commands::Revoke(args) => revoke(load_config(config)?, cli.chain_id, args).await,
        Commands::List(args) => list(load_config(config)?, cli.chain_id, args).await,
        Commands::Roles(args) => roles(load_config(config)?, args).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<Arc<ProtocolConfig>> {
    let config = ProtocolConfig::load(path).context("failed to load configuration")?;
    Ok(Arc::new(config))
}

fn commit(args: CommitArgs) -> Result<()> {
    let commitment = derive_commitment::<H>(RevocationSecret::new(args.secret), args.reference.into())?;
    println!("{:?}", commitment.revoker_hash_word());
    Ok(())
}

fn setup(args: SetupArgs) -> Result<()> {
    fs::create_dir_all(&args.out).with_context(|| format!("failed to create {}", args.out.display()))?;
    println!("Generating attestation circuit keys...");
    let backend = Groth16Backend::<H>::setup(&mut rand::thread_rng())?;
    write(&args.out.join(PK_FILENAME), &backend.proving_key_bytes()?)?;
    write(&args.out.join(VK_FILENAME), &backend.verifying_key_bytes()?)?;
    Ok(())
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

async fn ledger(config: &ProtocolConfig, chain_id: u64, wallet: &WalletArgs) -> Result<EvmLedger> {
    let chain = config.chain(chain_id)?;
    let ledger = EvmLedger::connect(&chain.rpc_url, config.eas)?;
    Ok(match wallet.wallet()? {
        Some(wallet) => ledger.with_wallet(wallet).await?,
        None => ledger,
    })
}

async fn publish(config: Arc<ProtocolConfig>, chain_id: u64, args: PublishArgs) -> Result<()> {
    let chain = config.chain(chain_id)?;
    let pk = fs::read(args.keys.join(PK_FILENAME)).context("missing proving key; run `setup` first")?;
    let vk = fs::read(args.keys.join(VK_FILENAME)).context("missing verifying key; run `setup` first")?;
    let backend = Arc::new(Groth16Backend::<H>::from_bytes(&pk, &vk)?);

    let ledger = Arc::new(ledger(&config, chain_id, &args.wallet).await?);
    let client = AttestClient::<H, _, _, _, _>::new(
        config.clone(),
        chain_id,
        backend,
        ledger,
        Arc::new(HttpRelay::new(&config.relay_url)),
        Arc::new(EasIndexer::new(&chain.graphql_url)),
    )?;

    let badgeholder_ref = if !args.anonymous && args.role == Role::Badgeholder {
        let Some(wallet) = args.wallet.wallet()? else {
            bail!("public publishing needs the attester's key in ZK_ATTEST_PRIVATE_KEY");
        };
        Some(badgeholder_attestation(&config, wallet.address()).await?)
    } else {
        None
    };
    let draft = AttestationDraft {
        recipient: args.recipient,
        role: args.role,
        title: args.title,
        message: args.message,
        anonymous: args.anonymous,
        badgeholder_ref,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let grant;
    let credentials = if args.anonymous {
        let Some(wallet) = args.wallet.wallet()? else {
            bail!("anonymous publishing needs the role holder's key in ZK_ATTEST_PRIVATE_KEY");
        };
        let service = HttpAuthorizationService::new(&config.auth_url);
        grant = request_roles(&service, &wallet).await?;
        Some(Credentials {
            address: wallet.address(),
            grant: &grant,
            secret: RevocationSecret::new(args.secret.unwrap_or_default()),
        })
    } else {
        None
    };

    let published = client.publish_attestation(&draft, credentials, &cancel).await?;
    println!("transaction {:?}", published.receipt.tx);
    if let Some(url) = published.url {
        println!("{url}");
    }
    Ok(())
}

async fn revoke(config: Arc<ProtocolConfig>, chain_id: u64, args: RevokeArgs) -> Result<()> {
    let chain = config.chain(chain_id)?;
    let ledger = Arc::new(ledger(&config, chain_id, &args.wallet).await?);
    let relay = Arc::new(HttpRelay::new(&config.relay_url));

    let record = ledger
        .attestation(args.uid)
        .await?
        .with_context(|| format!("attestation {:?} not found", args.uid))?;
    let mut request = RevocationRequest::<H>::new(record, chain, config.revoker_hash_slot);

    let mut state = request.begin(ledger.account())?;
    if state == RevocationState::AwaitingSecret {
        let Some(secret) = args.secret else {
            bail!("this attestation was published anonymously; supply --secret");
        };
        state = request
            .handle_within(
                RevocationEvent::SecretSupplied(RevocationSecret::new(secret)),
                ledger.as_ref(),
                config.ledger_timeout(),
            )
            .await?;
    }

    match state {
        RevocationState::Authorized(_) => {
            let revoker = Revoker::new(config.clone(), chain_id, ledger.clone(), relay)?;
            let receipt = revoker.submit(&request).await?;
            println!("revoked in transaction {:?}", receipt.tx);
            Ok(())
        }
        RevocationState::Rejected(reason) => bail!("revocation rejected: {reason:?}"),
        other => bail!("revocation stopped in state {other:?}"),
    }
}

async fn list(config: Arc<ProtocolConfig>, chain_id: u64, args: ListArgs) -> Result<()> {
    let chain = config.chain(chain_id)?;
    let index = EasIndexer::new(&chain.graphql_url);
    let mut query = PageQuery::new(chain.schema, args.page, args.page_size);
    query.recipient = args.recipient;
    query.attester = args.attester;

    let page = scan::query(&index, &query).await?;
    for record in &page.items {
        let status = if record.is_revoked() { "revoked" } else { "active" };
        let attester = if record.is_anonymous(chain.anonymous_attester) {
            "anonymous".to_string()
        } else {
            format!("{:?}", record.attester)
        };
        println!(
            "{:?} {} {} -> {:?} [{}] {}: {}",
            record.id, status, attester, record.recipient, record.payload.role, record.payload.title, record.payload.message
        );
    }
    if page.is_last() {
        println!("(end of list)");
    }
    Ok(())
}

/// Role data lives on Optimism mainnet whichever chain the attestation goes to.
fn role_source(config: &ProtocolConfig) -> Result<OnChainRoles> {
    let chain = config.chain(OPTIMISM)?;
    Ok(OnChainRoles::connect(&chain.rpc_url, config.roles.clone())?)
}

async fn badgeholder_attestation(config: &ProtocolConfig, address: Address) -> Result<AttestationId> {
    role_source(config)?
        .badgeholder_attestation(address)
        .await?
        .with_context(|| format!("{address:?} holds no badgeholder attestation in the current round"))
}

async fn roles(config: Arc<ProtocolConfig>, args: RolesArgs) -> Result<()> {
    let source = role_source(&config)?;
    let badgeholder = source.badgeholder_attestation(args.address).await?;
    for role in source.roles(args.address).await? {
        match badgeholder {
            Some(uid) if role == Role::Badgeholder => println!("{role} ({uid:?})"),
            _ => println!("{role}"),
        }
    }
    Ok(())
}

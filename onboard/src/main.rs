//! xrpl-onboard: provision XRP Ledger wallets and fund them through the
//! exchange bridge.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use xrpl_onboard_lib::bridge::BridgeExchangeClient;
use xrpl_onboard_lib::import::{ImportOrchestrator, Progress};
use xrpl_onboard_lib::{
    init_security_config_from_env, BackupFile, Currency, InputValidator, KeyAlgorithm,
    ProvisionContext, ProvisionError, ProvisionOutcome, ProvisionRequest, SessionAction,
    SessionIdentity, SessionUser, WalletBinding, WalletContext, WalletError,
};

#[derive(Parser)]
#[command(name = "xrpl-onboard", about = "XRP Ledger wallet onboarding", version)]
struct Cli {
    /// Directory holding the vault, profiles, config and exchange ledger.
    #[arg(long, default_value = "./xrpl_onboard_data", env = "XRPL_ONBOARD_DATA_DIR")]
    data_dir: PathBuf,

    /// Device credential the wallets are bound to.
    #[arg(long, default_value = "local-device", env = "XRPL_ONBOARD_DEVICE_ID")]
    device_id: String,

    /// Vault password for provisioning commands.
    #[arg(long, env = "XRPL_ONBOARD_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new wallet.
    Create {
        #[arg(long, default_value = "secp256k1")]
        algorithm: KeyAlgorithm,
    },
    /// Import wallets from family seeds, one per line in FILE or via --seed.
    ImportSeeds {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long = "seed")]
        seeds: Vec<String>,
    },
    /// Restore wallets from an exported backup file.
    Restore { file: PathBuf },
    /// Write every stored wallet to a backup file.
    ExportBackup {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List, select or rename local profiles.
    Profiles {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },
    /// Session handoff from an external identity provider.
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
    /// Currencies the bridge can convert into XRP.
    Currencies,
    /// Minimum and estimated XRP for a deposit amount.
    Quote {
        #[arg(long)]
        from: String,
        #[arg(long)]
        network: Option<String>,
        amount: String,
    },
    /// Create a funding exchange into a wallet.
    Fund {
        #[arg(long)]
        from: String,
        #[arg(long)]
        network: Option<String>,
        /// Destination address; defaults to the active profile.
        #[arg(long)]
        address: Option<String>,
        amount: String,
    },
    /// Locally recorded exchanges, newest first.
    Exchanges,
    /// Current status of one exchange.
    Status { id: String },
    /// Poll an exchange until it reaches a terminal status.
    Track { id: String },
}

#[derive(Subcommand)]
enum ProfileAction {
    Use { address: String },
    Rename { address: String, alias: String },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Store the provider handoff for the next `complete`.
    Begin {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "signup")]
        action: String,
        #[arg(long, env = "XRPL_ONBOARD_SESSION_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Act on the stored handoff, creating a wallet after a signup.
    Complete,
    /// Drop a stored handoff without acting on it.
    Cancel,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let security = match init_security_config_from_env() {
        Ok(security) => security,
        Err(err) => {
            eprintln!("{}", err.user_message());
            std::process::exit(2);
        }
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(security.log_level().as_str()),
    )
    .init();

    let context = match WalletContext::initialize(cli.data_dir.clone(), security) {
        Ok(context) => context,
        Err(err) => {
            log::error!("Failed to initialize wallet context: {}", err);
            eprintln!("{}", err.user_message());
            std::process::exit(2);
        }
    };

    if let Err(err) = run(cli, &context).await {
        eprintln!("{}", describe_error(&err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, ctx: &WalletContext) -> anyhow::Result<()> {
    match cli.command {
        Command::Create { algorithm } => {
            let request = ProvisionRequest::New { algorithm };
            provision(ctx, request, &cli.device_id, cli.password)
        }
        Command::ImportSeeds { file, seeds } => {
            let mut seeds = seeds;
            if let Some(file) = file {
                let text = fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                seeds.extend(text.lines().map(str::to_string));
            }
            if seeds.iter().all(|s| s.trim().is_empty()) {
                bail!("No seeds given; pass --seed or --file");
            }
            let request = ProvisionRequest::SeedList {
                seeds: seeds.into_iter().map(SecretString::from).collect(),
            };
            provision(ctx, request, &cli.device_id, cli.password)
        }
        Command::Restore { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let request = ProvisionRequest::BackupFile {
                backup: BackupFile::parse(&text)?,
            };
            provision(ctx, request, &cli.device_id, cli.password)
        }
        Command::ExportBackup { out } => {
            let backup = ctx.export_backup()?;
            let json = backup.to_json()?;
            match out {
                Some(path) => {
                    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported {} wallet(s) to {}", backup.wallets.len(), path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Command::Profiles { action } => profiles(ctx, action),
        Command::Session { action } => session(ctx, action, cli.password),
        Command::Currencies => {
            let client = bridge_client(ctx)?;
            for currency in client.list_currencies().await? {
                println!("{:<8} {:<10} {}", currency.ticker, currency.network, currency.name);
            }
            Ok(())
        }
        Command::Quote {
            from,
            network,
            amount,
        } => {
            let client = bridge_client(ctx)?;
            let amount = InputValidator::default().parse_amount(&amount)?;
            let currency = resolve_currency(&client, &from, network.as_deref()).await?;
            let quote = client.quote(&currency, amount).await?;
            println!(
                "{} {} -> ~{} XRP (minimum {})",
                amount, currency.ticker, quote.estimated_target, quote.min_amount
            );
            Ok(())
        }
        Command::Fund {
            from,
            network,
            address,
            amount,
        } => {
            let client = bridge_client(ctx)?;
            let amount = InputValidator::default().parse_amount(&amount)?;
            let destination = match address {
                Some(address) => address,
                None => ctx
                    .profiles()
                    .active_address()?
                    .ok_or_else(|| anyhow!("No active profile; pass --address"))?,
            };
            let currency = resolve_currency(&client, &from, network.as_deref()).await?;
            let exchange = client.create_exchange(&currency, amount, &destination).await?;
            println!("Exchange {}", exchange.id);
            println!("Send {} {} to {}", exchange.from_amount, exchange.from_currency, exchange.payin_address);
            if let Some(extra) = &exchange.payin_extra_id {
                println!("Memo / extra id: {}", extra);
            }
            if let Some(expected) = exchange.expected_amount {
                println!("Expected: ~{} XRP to {}", expected, exchange.to_address);
            }
            Ok(())
        }
        Command::Exchanges => {
            for entry in ctx.ledger().list() {
                let status = entry
                    .last_status
                    .as_ref()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {} {} -> {}  {}",
                    entry.transaction.created_at.format("%Y-%m-%d %H:%M"),
                    entry.transaction.id,
                    entry.transaction.from_amount,
                    entry.transaction.from_currency,
                    entry.transaction.to_address,
                    status
                );
            }
            Ok(())
        }
        Command::Status { id } => {
            let client = bridge_client(ctx)?;
            let report = client.get_status(&id).await?;
            if let Err(err) = ctx.ledger().record_status(&id, &report) {
                log::debug!("Status for {} not recorded locally: {}", id, err);
            }
            println!("{}: {}", report.status, report.status.describe());
            if let Some(hash) = report.payout_hash {
                println!("Payout transaction: {}", hash);
            }
            Ok(())
        }
        Command::Track { id } => track(ctx, id).await,
    }
}

fn provision(
    ctx: &WalletContext,
    request: ProvisionRequest,
    device_id: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let context = ProvisionContext {
        binding: WalletBinding::Device {
            credential_id: device_id.to_string(),
        },
        password: require_password(password)?,
        session_token: None,
    };
    let outcome = ctx.provision(&orchestrator(ctx), request, &context)?;
    print_outcome(&outcome);
    Ok(())
}

fn profiles(ctx: &WalletContext, action: Option<ProfileAction>) -> anyhow::Result<()> {
    match action {
        Some(ProfileAction::Use { address }) => {
            ctx.profiles().set_active(&address)?;
            println!("Active profile: {}", address);
        }
        Some(ProfileAction::Rename { address, alias }) => {
            let profile = ctx.profiles().rename(&address, &alias)?;
            println!("{} is now {}", profile.address, profile.alias);
        }
        None => {
            let active = ctx.profiles().active_address()?;
            for profile in ctx.profiles().profiles()? {
                let marker = if active.as_deref() == Some(profile.address.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<12} {} ({}, {})",
                    marker,
                    profile.alias,
                    profile.address,
                    profile.algorithm,
                    profile.binding.mode()
                );
            }
        }
    }
    Ok(())
}

fn session(
    ctx: &WalletContext,
    action: SessionCommand,
    password: Option<String>,
) -> anyhow::Result<()> {
    match action {
        SessionCommand::Begin {
            provider,
            user_id,
            email,
            action,
            token,
        } => {
            let identity = SessionIdentity {
                token: SecretString::from(token),
                provider,
                user: SessionUser {
                    id: user_id,
                    email,
                    name: None,
                },
                action: SessionAction::parse(&action)?,
            };
            ctx.session().begin(&identity)?;
            println!("Session stored for {} user", identity.provider);
        }
        SessionCommand::Complete => {
            let password = require_password(password)?;
            match ctx.provision_for_session(&orchestrator(ctx), password)? {
                Some(outcome) => print_outcome(&outcome),
                None => println!("Session handled; no wallet created"),
            }
        }
        SessionCommand::Cancel => {
            let was_present = ctx.session().is_present();
            // partial handoffs are cleared too
            ctx.session().clear()?;
            if was_present {
                println!("Session handoff discarded");
            } else {
                println!("No session handoff stored");
            }
        }
    }
    Ok(())
}

async fn track(ctx: &WalletContext, id: String) -> anyhow::Result<()> {
    let tracker = ctx.status_tracker(bridge_client(ctx)?);
    let mut updates = tracker.subscribe();
    tracker.set_active(Some(id));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let observation = updates.borrow_and_update().clone();
                if let Some(observation) = observation {
                    println!(
                        "[{}] {}: {}",
                        observation.observed_at.format("%H:%M:%S"),
                        observation.report.status,
                        observation.report.status.describe()
                    );
                    if observation.report.status.is_terminal() {
                        if let Some(hash) = observation.report.payout_hash {
                            println!("Payout transaction: {}", hash);
                        }
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Tracking interrupted");
                break;
            }
        }
    }
    tracker.shutdown();
    Ok(())
}

fn orchestrator(ctx: &WalletContext) -> ImportOrchestrator {
    ctx.orchestrator()
        .with_progress(Arc::new(|progress: Progress| match progress {
            Progress::Working(msg) => eprintln!("... {}", msg),
            Progress::Done(msg) => eprintln!("{}", msg),
            Progress::Failed(msg) => eprintln!("! {}", msg),
        }))
}

fn bridge_client(ctx: &WalletContext) -> anyhow::Result<Arc<BridgeExchangeClient>> {
    Ok(ctx.bridge_client(ctx.bridge_api()?))
}

async fn resolve_currency(
    client: &BridgeExchangeClient,
    ticker: &str,
    network: Option<&str>,
) -> anyhow::Result<Currency> {
    let catalog = client.list_currencies().await?;
    let found = catalog.into_iter().find(|c| {
        c.ticker.eq_ignore_ascii_case(ticker)
            && network.map_or(true, |n| c.network.eq_ignore_ascii_case(n))
    });
    match found {
        Some(currency) => Ok(currency),
        None => bail!("{} is not offered by the exchange service", ticker),
    }
}

fn require_password(password: Option<String>) -> anyhow::Result<SecretString> {
    password
        .map(SecretString::from)
        .ok_or_else(|| anyhow!("A password is required; pass --password or set XRPL_ONBOARD_PASSWORD"))
}

fn print_outcome(outcome: &ProvisionOutcome) {
    for wallet in &outcome.wallets {
        println!("{}  {}  #{}", wallet.address, wallet.algorithm, wallet.account_index);
    }
    if let Some(active) = outcome.active() {
        println!("Active wallet: {}", active.address);
    }
}

fn describe_error(err: &anyhow::Error) -> String {
    if let Some(provision) = err.downcast_ref::<ProvisionError>() {
        let mut message = provision.source.user_message();
        if !provision.committed.is_empty() {
            message.push_str(&format!(
                " ({} wallet(s) were saved before the failure)",
                provision.committed.len()
            ));
        }
        return message;
    }
    match err.downcast_ref::<WalletError>() {
        Some(wallet_err) => wallet_err.user_message(),
        None => format!("{:#}", err),
    }
}

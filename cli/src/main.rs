//! SLUICE CLI - operate payment channels from the command line

use clap::{Parser, Subcommand, ValueEnum};
use sluice_channel::{ChannelManager, ChannelOp};
use sluice_cli::{
    describe_state, describe_transaction, export, open_channel, parse_allocation, parse_op,
    transact, verify_proof_file, write_proof, ExportTarget, Wallet, WalletManager,
};
use sluice_core::{Amount, ChannelId, SluiceConfig, StorageBackend};
use sluice_crypto::keyring::Keyring;
use sluice_state::{ChannelStore, KvChannelStore, MemoryKv, SledKv};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "SLUICE - off-chain payment channels")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level or filter directive, overrides the configuration
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a participant key
    Keygen {
        /// Wallet name
        name: String,

        /// Derive the key from a passphrase instead of at random
        #[arg(long)]
        phrase: Option<String>,

        /// Derivation index used with --phrase
        #[arg(long, default_value = "0")]
        index: u32,
    },

    /// List local participant keys
    Keys,

    /// Open a channel; the first participant becomes the owner
    Open {
        /// Channel id
        channel: u64,

        /// Workchain group
        #[arg(short, long, default_value = "0")]
        group: u32,

        /// `<wallet-or-key>=<amount>`, repeated per participant
        #[arg(short, long = "participant", required = true, value_parser = parse_allocation)]
        participants: Vec<(String, Amount)>,
    },

    /// Activate a pending channel
    Init {
        channel: u64,
    },

    /// Move funds to another participant
    Pay {
        channel: u64,

        amount: Amount,

        /// Recipient (wallet name or key); defaults to the counterparty
        #[arg(long)]
        to: Option<String>,

        /// Paying participant; defaults to the owner
        #[arg(long)]
        from: Option<String>,
    },

    /// Apply an arbitrary channel operation
    Send {
        channel: u64,

        /// init, message, payment, close, finalize or dispute
        #[arg(value_parser = parse_op)]
        op: ChannelOp,

        #[arg(default_value = "0")]
        amount: Amount,

        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        from: Option<String>,
    },

    /// Close a channel with a final transfer
    Close {
        channel: u64,

        #[arg(default_value = "0")]
        amount: Amount,

        #[arg(long)]
        to: Option<String>,
    },

    /// Show a channel and its transactions
    Show {
        channel: u64,
    },

    /// List stored channels
    List {
        #[arg(short, long)]
        group: Option<u32>,
    },

    /// Write a participant's balance proof to a file
    Proof {
        channel: u64,

        participant: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check a proof file (JSON or hex BoC) against a leaf
    VerifyProof {
        file: PathBuf,

        leaf: String,
    },

    /// Print a hex bag of cells
    Export {
        channel: u64,

        #[arg(value_enum, default_value = "state")]
        what: ExportKind,

        /// Transaction id or participant, depending on what is exported
        selector: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportKind {
    State,
    Tx,
    Proof,
}

impl From<ExportKind> for ExportTarget {
    fn from(kind: ExportKind) -> Self {
        match kind {
            ExportKind::State => ExportTarget::State,
            ExportKind::Tx => ExportTarget::Transaction,
            ExportKind::Proof => ExportTarget::Proof,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SluiceConfig::load(path)?,
        None => SluiceConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let wallets = WalletManager::new(config.data_dir.join("keys"));

    match cli.command {
        Commands::Keygen {
            name,
            phrase,
            index,
        } => {
            let wallet = match phrase {
                Some(phrase) => Wallet::from_phrase(&name, &phrase, index)?,
                None => Wallet::new(&name),
            };
            wallets.store(&wallet)?;
            println!("Wallet '{}' created", name);
            println!("Public key: {}", wallet.public_key());
            return Ok(());
        }
        Commands::Keys => {
            let list = wallets.list()?;
            if list.is_empty() {
                println!("No wallets found.");
            }
            for wallet in list {
                println!("{:<20} {}", wallet.name(), wallet.public_key());
            }
            return Ok(());
        }
        Commands::VerifyProof { file, leaf } => {
            if verify_proof_file(&file, &leaf)? {
                println!("valid");
                return Ok(());
            }
            println!("invalid");
            std::process::exit(1);
        }
        command => {
            let keys = Arc::new(wallets.keyring()?);
            match config.storage.backend {
                StorageBackend::Sled => {
                    std::fs::create_dir_all(&config.data_dir)?;
                    let kv = Arc::new(SledKv::open(config.storage_path())?);
                    let manager = ChannelManager::new(
                        Arc::new(KvChannelStore::new(Arc::clone(&kv))),
                        keys,
                        config.channel.clone(),
                    );
                    run(&manager, &wallets, command).await?;
                    kv.flush().await?;
                }
                StorageBackend::Memory => {
                    warn!("memory backend selected, nothing outlives this command");
                    let manager = ChannelManager::new(
                        Arc::new(KvChannelStore::new(Arc::new(MemoryKv::new()))),
                        keys,
                        config.channel.clone(),
                    );
                    run(&manager, &wallets, command).await?;
                }
            }
        }
    }

    Ok(())
}

async fn run<S: ChannelStore>(
    manager: &ChannelManager<S, Keyring>,
    wallets: &WalletManager,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Open {
            channel,
            group,
            participants,
        } => {
            let state =
                open_channel(manager, wallets, ChannelId::new(channel), group, &participants)
                    .await?;
            info!(channel = %state.id, "opened");
            print!("{}", describe_state(&state));
        }

        Commands::Init { channel } => {
            let tx = transact(
                manager,
                wallets,
                ChannelId::new(channel),
                ChannelOp::InitChannel,
                Amount::ZERO,
                None,
                None,
            )
            .await?;
            println!("{}", describe_transaction(&tx));
        }

        Commands::Pay {
            channel,
            amount,
            to,
            from,
        } => {
            let tx = transact(
                manager,
                wallets,
                ChannelId::new(channel),
                ChannelOp::CreatePayment,
                amount,
                from.as_deref(),
                to.as_deref(),
            )
            .await?;
            println!("{}", describe_transaction(&tx));
        }

        Commands::Send {
            channel,
            op,
            amount,
            to,
            from,
        } => {
            let tx = transact(
                manager,
                wallets,
                ChannelId::new(channel),
                op,
                amount,
                from.as_deref(),
                to.as_deref(),
            )
            .await?;
            println!("{}", describe_transaction(&tx));
        }

        Commands::Close {
            channel,
            amount,
            to,
        } => {
            let tx = transact(
                manager,
                wallets,
                ChannelId::new(channel),
                ChannelOp::CloseChannel,
                amount,
                None,
                to.as_deref(),
            )
            .await?;
            println!("{}", describe_transaction(&tx));
        }

        Commands::Show { channel } => {
            let id = ChannelId::new(channel);
            print!("{}", describe_state(&manager.get_channel(id).await?));
            for tx in manager.transactions(id).await? {
                println!("  {}", describe_transaction(&tx));
            }
        }

        Commands::List { group } => {
            let channels = manager.list_channels(group).await?;
            if channels.is_empty() {
                println!("No channels found.");
            }
            for state in channels {
                println!(
                    "{:<8} group={:<6} {:<9} nonce={}",
                    state.id, state.group_id, state.status, state.nonce
                );
            }
        }

        Commands::Proof {
            channel,
            participant,
            output,
        } => {
            let key = wallets.resolve(&participant)?;
            let leaf = write_proof(manager, ChannelId::new(channel), &key, &output).await?;
            println!("Proof written to {}", output.display());
            println!("Leaf: {}", leaf);
        }

        Commands::Export {
            channel,
            what,
            selector,
        } => {
            let hex = export(
                manager,
                wallets,
                ChannelId::new(channel),
                what.into(),
                selector.as_deref(),
            )
            .await?;
            println!("{}", hex);
        }

        Commands::Keygen { .. } | Commands::Keys | Commands::VerifyProof { .. } => {
            anyhow::bail!("command does not operate on the channel store")
        }
    }

    Ok(())
}

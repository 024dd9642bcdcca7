//! Custodial Sweeper
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use custodial_sweeper::chain::{EthersChainClient, LocalSigner};
use custodial_sweeper::config::{
    RpcSettings, SweepSettings, SweeperConfig, TokenConfig, WalletConfig,
};
use custodial_sweeper::context::SweeperContext;
use custodial_sweeper::logging::setup_logging;
use custodial_sweeper::simulator::TrafficSimulator;
use custodial_sweeper::state_manager::StateManager;
use custodial_sweeper::token::{whole_to_base_units, TokenLedger};
use custodial_sweeper::types::{parse_address, truncate_address, Account, Credential, SweepResult};
use ethers::types::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "custodial-sweeper")]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Overrides `state_path` from the config file.
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Admin private key (hex). Falls back to `admin_private_key` in the config.
    #[arg(long, env = "SWEEPER_ADMIN_KEY", hide_env_values = true)]
    admin_key: Option<String>,

    #[arg(long, default_value = "custodial_sweeper=info")]
    log_filter: String,

    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the chain and sweep deposits as they confirm.
    Run {
        /// Also run the demo traffic generator.
        #[arg(long)]
        simulate: bool,

        #[arg(long, default_value = "20")]
        simulate_rounds: usize,

        #[arg(long, default_value = "5")]
        simulate_interval: u64,

        /// Also sweep every account periodically.
        #[arg(long)]
        reconcile: bool,
    },

    /// Sweep one account now.
    Sweep { address: String },

    /// Sweep every registered account once.
    SweepAll,

    /// Print native and token balances of every account.
    Balances,

    /// Write a fresh config with newly generated wallets.
    InitConfig {
        #[arg(long, default_value = "http://127.0.0.1:8888")]
        rpc_url: String,

        #[arg(long, default_value = "1337")]
        chain_id: u64,

        /// Wallets to generate, as `user_id=count`. Repeatable.
        #[arg(long = "user", value_parser = parse_user_arg)]
        users: Vec<(String, usize)>,
    },

    /// Deploy an ERC-20 from compiled bytecode and whitelist it in the config.
    DeployToken {
        #[arg(long)]
        bytecode: PathBuf,

        #[arg(long)]
        name: String,

        #[arg(long)]
        symbol: String,

        #[arg(long, default_value = "18")]
        decimals: u8,

        /// Initial supply in whole tokens.
        #[arg(long, default_value = "1000000000")]
        supply: u64,
    },
}

fn parse_user_arg(value: &str) -> std::result::Result<(String, usize), String> {
    let (user, count) = value
        .split_once('=')
        .ok_or_else(|| format!("expected user_id=count, got {}", value))?;
    let count = count
        .parse::<usize>()
        .map_err(|e| format!("invalid wallet count in {}: {}", value, e))?;
    Ok((user.to_string(), count))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_filter, cli.log_json);

    if let Commands::InitConfig {
        rpc_url,
        chain_id,
        users,
    } = &cli.command
    {
        return init_config(&cli.config, rpc_url, *chain_id, users).await;
    }

    info!("Loading configuration from {}", cli.config.display());
    let config = SweeperConfig::load(&cli.config)
        .await
        .context("Failed to load configuration")?;

    let admin_key = cli
        .admin_key
        .clone()
        .or_else(|| config.admin_private_key.clone())
        .context("Admin key missing: set SWEEPER_ADMIN_KEY or admin_private_key")?;
    let admin = Account::new(Credential::from_hex(&admin_key)?);

    let state = match cli.state.clone().or_else(|| config.state_path.clone()) {
        Some(path) => StateManager::load(path).await?,
        None => StateManager::in_memory(),
    };

    let client = EthersChainClient::connect(
        &config.rpc_url,
        Duration::from_millis(config.rpc.timeout_ms),
        Duration::from_millis(config.rpc.receipt_timeout_ms),
        Duration::from_millis(config.rpc.poll_interval_ms),
    )?;
    let signer = LocalSigner::new(config.chain_id);

    info!("Configuration loaded:");
    info!("  RPC: {}", config.rpc_url);
    info!("  Admin: {}", admin.short());
    info!("  Wallets: {}", config.wallets.len());
    info!("  Tokens: {}", config.tokens.len());

    let ctx = SweeperContext::build(
        config,
        Arc::new(client),
        Arc::new(signer),
        admin,
        Arc::new(state),
    )
    .await
    .context("Failed to initialize sweeper")?;
    info!(
        accounts = ctx.registry.len(),
        tokens = ctx.whitelist.len().await,
        "Sweeper ready"
    );

    match cli.command {
        Commands::Run {
            simulate,
            simulate_rounds,
            simulate_interval,
            reconcile,
        } => run(ctx, simulate, simulate_rounds, simulate_interval, reconcile).await?,
        Commands::Sweep { address } => {
            let address = parse_address(&address)?;
            match ctx.executor.sweep(address).await? {
                SweepResult::Swept(report) => info!(
                    account = %truncate_address(&address),
                    transactions = report.transactions.len(),
                    reclaim = ?report.reclaim,
                    "Sweep complete"
                ),
                other => info!(result = ?other, "Sweep not performed"),
            }
        }
        Commands::SweepAll => {
            let swept = ctx.scheduler().run_once().await;
            info!("Sweep cycle complete: {} accounts swept", swept);
        }
        Commands::Balances => {
            for address in ctx.registry.addresses() {
                let snapshot = ctx.executor.balances().snapshot(address).await?;
                println!("{}", snapshot.format_table());
            }
        }
        Commands::DeployToken {
            bytecode,
            name,
            symbol,
            decimals,
            supply,
        } => deploy_token(&cli.config, ctx, &bytecode, &name, &symbol, decimals, supply).await?,
        // written before any configuration is loaded
        Commands::InitConfig { .. } => {}
    }

    info!("Custodial sweeper shutdown complete");
    Ok(())
}

async fn run(
    ctx: SweeperContext,
    simulate: bool,
    simulate_rounds: usize,
    simulate_interval: u64,
    reconcile: bool,
) -> Result<()> {
    let (sink, feed) = mpsc::channel(1024);
    let block_feed = ctx.block_feed();
    let monitor = ctx.monitor();

    let feed_task = tokio::spawn(async move { block_feed.run(sink).await });

    if simulate {
        let simulator = TrafficSimulator::new(
            ctx.registry.clone(),
            ctx.whitelist.clone(),
            Duration::from_secs(simulate_interval),
            simulate_rounds,
        );
        tokio::spawn(async move {
            let sent = simulator.run().await;
            info!(sent, "Traffic simulation finished");
        });
    }

    if reconcile {
        let scheduler = ctx.scheduler();
        tokio::spawn(async move { scheduler.run_continuous().await });
    }

    tokio::select! {
        _ = monitor.run(feed) => {
            error!("Chain monitor stopped unexpectedly");
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }
    feed_task.abort();
    Ok(())
}

async fn deploy_token(
    config_path: &Path,
    ctx: SweeperContext,
    bytecode_path: &Path,
    name: &str,
    symbol: &str,
    decimals: u8,
    supply: u64,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(bytecode_path)
        .await
        .context("Failed to read bytecode file")?;
    let bytecode: Bytes = raw
        .trim()
        .parse()
        .context("Bytecode file must contain hex")?;

    if ctx.config.tokens.iter().any(|t| t.symbol == symbol) {
        bail!("Token symbol {} already configured", symbol);
    }

    let supply = whole_to_base_units(supply, decimals)?;
    let token = TokenLedger::deploy(
        ctx.emitter.clone(),
        ctx.registry.admin(),
        bytecode,
        name,
        symbol,
        decimals,
        supply,
    )
    .await?;

    let mut config = ctx.config.clone();
    config.tokens.push(TokenConfig {
        address: format!("{:?}", token.contract_address()),
        symbol: symbol.to_string(),
        decimals,
    });
    write_config(config_path, &config).await?;
    info!("✓ Whitelisted {} at {:?}", symbol, token.contract_address());
    Ok(())
}

async fn init_config(
    path: &Path,
    rpc_url: &str,
    chain_id: u64,
    users: &[(String, usize)],
) -> Result<()> {
    info!("Initializing configuration...");
    let users: Vec<(String, usize)> = if users.is_empty() {
        vec![("user0".to_string(), 3)]
    } else {
        users.to_vec()
    };

    let admin = Credential::random();
    let mut wallets = Vec::new();
    for (user_id, count) in &users {
        info!("Generating {} wallets for {}", count, user_id);
        for _ in 0..*count {
            let credential = Credential::random();
            info!("  {}: {}", user_id, truncate_address(&credential.address()));
            wallets.push(WalletConfig {
                user_id: user_id.clone(),
                private_key: credential.expose_secret_hex(),
            });
        }
    }

    let config = SweeperConfig {
        rpc_url: rpc_url.to_string(),
        chain_id,
        admin_private_key: Some(admin.expose_secret_hex()),
        tokens: Vec::new(),
        wallets,
        state_path: Some(PathBuf::from("state.json")),
        sweep: SweepSettings::default(),
        rpc: RpcSettings::default(),
    };
    write_config(path, &config).await?;

    info!("  Admin: {}", truncate_address(&admin.address()));
    info!("✓ Created configuration file: {}", path.display());
    Ok(())
}

async fn write_config(path: &Path, config: &SweeperConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
    tokio::fs::write(path, json)
        .await
        .context("Failed to write configuration file")?;
    Ok(())
}

use alloy::primitives::U256;
use anyhow::{Context, Result, ensure};
use args::{CliArgs, Command, RunConfig};
use checkpoint_store::CheckpointStore;
use clap::Parser;
use oracle_core::config::SECONDS_PER_SLOT;
use oracle_core::{OracleState, Orchestrator};
use smoothing_pool_clients::{ContractConfig, PoolClient};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::beacon::BeaconClient;
use crate::chain::ChainProvider;
use crate::execution::ExecutionClient;
use crate::retry::RetryConfig;
use crate::supervisor::Supervisor;

mod args;
mod beacon;
mod chain;
mod claim;
mod execution;
mod metrics;
mod retry;
mod shutdown;
mod supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::ERROR.into())
        .with_default_directive("alloy_transport_ws=off".parse()?)
        .from_env_lossy()
        .add_directive("alloy=warn".parse()?)
        .add_directive("alloy_pubsub=error".parse()?)
        .add_directive("oracle=info".parse()?)
        .add_directive("oracle_core=info".parse()?)
        .add_directive("smoothing_pool_clients=info".parse()?)
        .add_directive("checkpoint_store=info".parse()?);

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(filter)
        .init();

    let cli_args = CliArgs::parse();
    match cli_args.command {
        Command::Run(run_args) => {
            let config = RunConfig::load(cli_args.chain, run_args)?;
            run(config).await
        }
        Command::Claim { address } => claim::run(cli_args.chain, address).await,
    }
}

async fn run(config: RunConfig) -> Result<()> {
    let meter_provider = metrics::init(config.otlp_endpoint.as_deref())?;

    let store = CheckpointStore::open(&config.state_dir)?;
    let state = match store.load_state()? {
        Some(state) => {
            ensure!(
                state.pool_fee_percent == config.oracle.pool_fee_percent
                    && state.pool_fee_address == config.oracle.pool_fee_address
                    && state.eligibility == config.oracle.eligibility,
                "Ledger in {} was built with a different pool fee or eligibility policy",
                config.state_dir.display()
            );
            info!(
                latest_slot = ?state.latest_processed_slot,
                validators = state.validators.len(),
                "Resuming from saved ledger"
            );
            state
        }
        None => {
            info!(deployed_slot = config.oracle.deployed_slot, "Starting a fresh ledger");
            OracleState::new(&config.oracle)
        }
    };

    let contract_config =
        ContractConfig::new(config.execution_url.clone(), config.oracle.pool_address)
            .with_gas_limit(config.gas_limit);
    let pool_client = PoolClient::new(contract_config, config.private_key.clone())
        .await
        .context("Failed to connect to the execution node")?;

    match pool_client.get_balance().await? {
        Some(balance) if balance.is_zero() => {
            warn!(
                address = ?pool_client.signer_address(),
                "Oracle wallet has no funds, root submissions will fail"
            );
        }
        Some(balance) => {
            info!(address = ?pool_client.signer_address(), balance = %balance, "Oracle wallet");
        }
        None => info!("No private key configured, running without submitting roots"),
    }

    let onchain_collateral = pool_client.pool.subscription_collateral().await?;
    check_collateral(config.oracle.collateral, onchain_collateral)?;

    let onchain_root = pool_client.pool.rewards_root().await?;
    info!(root = ?onchain_root, "Rewards root currently committed on-chain");

    let shutdown_token = CancellationToken::new();
    let shutdown_token_clone = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown::shutdown_signal(shutdown_token_clone).await;
    });

    let chain = ChainProvider::new(
        BeaconClient::new(config.consensus_url.clone()),
        ExecutionClient::new(pool_client.provider(), config.receipt_fetch_concurrency),
        pool_client.pool.clone(),
        RetryConfig::fixed(config.retry_delay, 0),
        shutdown_token.clone(),
    );

    let mut orchestrator = Orchestrator::new(config.oracle.clone(), state, chain);
    if let Some(submitter) = pool_client.root_submitter() {
        orchestrator = orchestrator.with_submitter(Arc::new(submitter));
    }
    if !onchain_root.is_zero() {
        orchestrator = orchestrator.with_submitted_root(onchain_root);
    }
    if let Some(checkpoint) = store.latest_checkpoint()? {
        info!(
            slot = checkpoint.slot,
            root = ?checkpoint.merkle_root,
            matches_onchain = checkpoint.merkle_root == onchain_root,
            "Loaded latest checkpoint"
        );
        orchestrator = orchestrator.with_latest_checkpoint(checkpoint);
    }

    let result = Supervisor::new(
        orchestrator,
        store,
        shutdown_token,
        Duration::from_secs(SECONDS_PER_SLOT),
    )
    .run()
    .await;

    if let Some(provider) = meter_provider {
        if let Err(e) = provider.shutdown() {
            error!(error = %e, "Failed to flush metrics");
        }
    }

    result?;
    info!("Shutdown complete");
    Ok(())
}

/// Subscriptions are only accepted with the configured collateral, so it has
/// to be the one the contract enforces.
fn check_collateral(configured: U256, onchain: U256) -> Result<()> {
    ensure!(
        configured == onchain,
        "--collateral-wei is {configured} but the pool contract requires {onchain}"
    );
    Ok(())
}

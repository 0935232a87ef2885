use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use oracle_core::{EligibilityPolicy, OracleConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// CLI arguments for the oracle
#[derive(Parser, Debug)]
#[command(name = "oracle")]
#[command(
    about = "Smoothing pool oracle - reward ledger, merkle roots and claims",
    long_about = None
)]
pub struct CliArgs {
    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow the finalized chain, build checkpoints and submit roots
    Run(RunArgs),
    /// Show what an address can claim against the latest stored checkpoint
    Claim {
        /// Withdrawal address to look up
        #[arg(long)]
        address: Address,
    },
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// Execution layer RPC endpoint (will be converted to WebSocket)
    #[arg(long, env = "EXECUTION_URL")]
    pub execution_url: String,

    /// Smoothing pool contract address
    #[arg(long, env = "POOL_ADDRESS")]
    pub pool_address: Address,

    /// Directory holding checkpoints and the ledger snapshot
    #[arg(long, env = "STATE_DIR", default_value = "oracle-data")]
    pub state_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Beacon node REST endpoint
    #[arg(long, env = "CONSENSUS_URL")]
    pub consensus_url: String,

    /// First slot to reconcile, the slot the pool was deployed at
    #[arg(long, env = "DEPLOYED_SLOT")]
    pub deployed_slot: u64,

    /// Execution block the pool was deployed at
    #[arg(long, env = "DEPLOYED_BLOCK")]
    pub deployed_block: u64,

    /// Slots between two merkle roots
    #[arg(long, env = "CHECKPOINT_SIZE", default_value_t = 7200)]
    pub checkpoint_size: u64,

    /// Share of every reward kept by the pool, in percent
    #[arg(long, env = "POOL_FEE_PERCENT", default_value_t = 0)]
    pub pool_fee_percent: u64,

    /// Address receiving the pool fee
    #[arg(long, env = "POOL_FEE_ADDRESS")]
    pub pool_fee_address: Address,

    /// Collateral a subscription must carry, in wei
    #[arg(long, env = "COLLATERAL_WEI")]
    pub collateral_wei: U256,

    /// Which statuses share pool rewards: active_only or active_and_yellow_card
    #[arg(long, env = "ELIGIBILITY", default_value = "active_only")]
    pub eligibility: EligibilityPolicy,

    /// Private key used to submit roots. Without it the oracle runs dry.
    #[arg(long, env = "PRIVATE_KEY")]
    pub private_key: Option<String>,

    /// Fixed gas limit for root submissions, estimated when unset
    #[arg(long, env = "GAS_LIMIT")]
    pub gas_limit: Option<u64>,

    /// Delay between two attempts of a failed RPC call
    #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = 15)]
    pub retry_delay_secs: u64,

    /// Receipts fetched in parallel for vanilla blocks
    #[arg(long, env = "RECEIPT_FETCH_CONCURRENCY", default_value_t = 16)]
    pub receipt_fetch_concurrency: usize,

    /// OTLP gRPC endpoint for metrics, metrics stay in-process when unset
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Oracle configuration with all required values resolved
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub oracle: OracleConfig,
    pub consensus_url: String,
    pub execution_url: String,
    pub state_dir: PathBuf,
    pub private_key: Option<String>,
    pub gas_limit: Option<u64>,
    pub retry_delay: Duration,
    pub receipt_fetch_concurrency: usize,
    pub otlp_endpoint: Option<String>,
}

impl RunConfig {
    pub fn load(chain: ChainArgs, args: RunArgs) -> Result<Self> {
        let oracle = OracleConfig {
            pool_address: chain.pool_address,
            deployed_slot: args.deployed_slot,
            deployed_block: args.deployed_block,
            checkpoint_size: args.checkpoint_size,
            pool_fee_percent: args.pool_fee_percent,
            pool_fee_address: args.pool_fee_address,
            collateral: args.collateral_wei,
            eligibility: args.eligibility,
        };
        oracle.validate().context("Invalid oracle configuration")?;
        anyhow::ensure!(
            args.receipt_fetch_concurrency > 0,
            "receipt fetch concurrency must be positive"
        );

        let oracle_address = match &args.private_key {
            Some(key) => Some(
                key.parse::<PrivateKeySigner>()
                    .context("Invalid private key")?
                    .address(),
            ),
            None => None,
        };

        info!(
            pool = %oracle.pool_address,
            deployed_slot = oracle.deployed_slot,
            checkpoint_size = oracle.checkpoint_size,
            pool_fee_percent = oracle.pool_fee_percent,
            eligibility = ?oracle.eligibility,
            oracle_address = ?oracle_address,
            state_dir = %chain.state_dir.display(),
            "Loaded oracle configuration"
        );

        Ok(Self {
            oracle,
            consensus_url: args.consensus_url,
            execution_url: chain.execution_url,
            state_dir: chain.state_dir,
            private_key: args.private_key,
            gas_limit: args.gas_limit,
            retry_delay: Duration::from_secs(args.retry_delay_secs),
            receipt_fetch_concurrency: args.receipt_fetch_concurrency,
            otlp_endpoint: args.otlp_endpoint,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.private_key.is_none()
    }
}

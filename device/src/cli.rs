//! # CLI Interface
//!
//! `clap` derive definitions for the `offcash` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// OFFCASH device tool.
///
/// Manages a local wallet of signed bearer tokens, produces and checks
/// merchant QR payloads, and runs complete payer/merchant exchanges
/// in-process.
#[derive(Parser, Debug)]
#[command(name = "offcash", about = "OFFCASH device tool", version, propagate_version = true)]
pub struct OffcashCli {
    /// Log format: pretty or json.
    #[arg(long, global = true, env = "OFFCASH_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and the device identity.
    Init(DeviceArgs),
    /// Mint tokens into the local wallet.
    Mint(MintArgs),
    /// Print the wallet balance.
    Balance(DeviceArgs),
    /// List the tokens in the wallet.
    Tokens(DeviceArgs),
    /// Print a signed merchant QR payload.
    Qr(QrArgs),
    /// Decode and check a merchant QR payload.
    VerifyQr(VerifyQrArgs),
    /// Pay an in-process merchant from a copy of the wallet.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Where the device keeps its state.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Data directory holding the sled database.
    #[arg(long, short = 'd', env = "OFFCASH_DATA_DIR", default_value = ".offcash")]
    pub data_dir: PathBuf,

    /// JSON file with `ProtocolConfig` overrides.
    #[arg(long, short = 'c', env = "OFFCASH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MintArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Denomination of each token, in minor units.
    #[arg(long)]
    pub amount: u64,

    /// How many tokens to mint.
    #[arg(long, default_value_t = 1)]
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct QrArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Point-of-sale id. A random one is generated when omitted.
    #[arg(long)]
    pub pos_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct VerifyQrArgs {
    /// The QR payload text.
    pub text: String,

    /// JSON file with `ProtocolConfig` overrides.
    #[arg(long, short = 'c', env = "OFFCASH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Amount to pay, in minor units. Must be payable with exact change.
    #[arg(long)]
    pub amount: u64,
}

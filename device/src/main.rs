// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # OFFCASH Device
//!
//! Entry point for the `offcash` binary. Parses CLI arguments, initializes
//! logging, opens the device database and dispatches to a subcommand:
//!
//! - `init`      — create the data directory and device identity
//! - `mint`      — mint tokens into the local wallet
//! - `balance`   — print the wallet balance
//! - `tokens`    — list wallet contents
//! - `qr`        — print a signed merchant QR payload
//! - `verify-qr` — decode and check a QR payload
//! - `simulate`  — run a full payment against an in-process merchant
//! - `version`   — print build version information

mod cli;
mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use offcash_protocol::bootstrap::{generate_pos_id, BootstrapPayload};
use offcash_protocol::config::{
    now_millis, ProtocolConfig, KEY_EXCHANGE_ALGORITHM, PAYER_ENDPOINT_NAME, PROTOCOL_VERSION,
    SIGNING_ALGORITHM, SYMMETRIC_ALGORITHM,
};
use offcash_protocol::crypto::custody::{KeyCustody, SledKeyCustody, SoftwareKeyCustody};
use offcash_protocol::crypto::pfs::EphemeralKeyPair;
use offcash_protocol::transfer::{MerchantSession, PayerSession};
use offcash_protocol::transport::MemoryMedium;
use offcash_protocol::wallet::{DeviceDb, LedgerStore, MemoryLedgerStore, WalletLedger};

use cli::{Commands, DeviceArgs, OffcashCli};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = OffcashCli::parse();
    logging::init_logging(
        "offcash=info,offcash_protocol=warn",
        LogFormat::from_str_lossy(&cli.log_format),
    );

    match cli.command {
        Commands::Init(args) => init(&args),
        Commands::Mint(args) => mint(&args.device, args.amount, args.count),
        Commands::Balance(args) => balance(&args),
        Commands::Tokens(args) => tokens(&args),
        Commands::Qr(args) => qr(&args.device, args.pos_id),
        Commands::VerifyQr(args) => verify_qr(&args.text, args.config.as_deref()),
        Commands::Simulate(args) => simulate(&args.device, args.amount).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

/// An opened device: database, identity and wallet.
struct Device {
    db: DeviceDb,
    custody: Arc<SledKeyCustody>,
    ledger: Arc<WalletLedger>,
}

impl Device {
    fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("db");
        let db = DeviceDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        let custody = SledKeyCustody::open(db.identity_tree())
            .context("failed to load device identity")?;
        let ledger =
            WalletLedger::open(Box::new(db.ledger_store())).context("failed to load wallet")?;

        Ok(Self {
            db,
            custody: Arc::new(custody),
            ledger: Arc::new(ledger),
        })
    }
}

fn load_config(path: Option<&Path>) -> Result<ProtocolConfig> {
    let Some(path) = path else {
        return Ok(ProtocolConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    ProtocolConfig::from_json(&text)
        .with_context(|| format!("invalid config file {}", path.display()))
}

// ---------------------------------------------------------------------------
// Wallet commands
// ---------------------------------------------------------------------------

fn init(args: &DeviceArgs) -> Result<()> {
    let device = Device::open(&args.data_dir)?;
    device.db.flush().context("failed to flush database")?;

    println!("Device initialized.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Public key     : {}", device.custody.public_key().to_hex());
    println!("  Balance        : {}", device.ledger.balance());
    Ok(())
}

fn mint(args: &DeviceArgs, amount: u64, count: u32) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let config = load_config(args.config.as_deref())?;
    let device = Device::open(&args.data_dir)?;

    for _ in 0..count {
        let token = device
            .ledger
            .mint(&*device.custody, amount, &config.issuer_id)
            .with_context(|| format!("failed to mint a {amount} token"))?;
        println!("{}  {:>6}", token.serial, token.amount);
    }

    tracing::info!(amount, count, balance = device.ledger.balance(), "minted");
    Ok(())
}

fn balance(args: &DeviceArgs) -> Result<()> {
    let device = Device::open(&args.data_dir)?;
    println!("{}", device.ledger.balance());
    Ok(())
}

fn tokens(args: &DeviceArgs) -> Result<()> {
    let device = Device::open(&args.data_dir)?;
    let entries = device.ledger.entries();
    if entries.is_empty() {
        println!("(empty wallet)");
        return Ok(());
    }

    for entry in entries {
        let origin = if entry.chain_proof.is_some() {
            "received"
        } else {
            "minted"
        };
        println!(
            "{}  {:>6}  {:<8}  {}",
            entry.token.serial,
            entry.token.amount,
            origin,
            format_millis(entry.token.timestamp),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// QR commands
// ---------------------------------------------------------------------------

/// Prints a QR payload under this device's identity.
///
/// The ephemeral secret behind the printed key is discarded, so nobody can
/// complete a handshake against it. Useful for inspecting the format and
/// testing scanners, not for taking payments.
fn qr(args: &DeviceArgs, pos_id: Option<String>) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let device = Device::open(&args.data_dir)?;
    let pos_id = pos_id.unwrap_or_else(generate_pos_id);
    let ephemeral = EphemeralKeyPair::generate();

    let text = BootstrapPayload::encode(
        &*device.custody,
        &pos_id,
        &ephemeral.public_key_bytes(),
        &config.service_id,
    )
    .context("failed to build QR payload")?;
    println!("{text}");
    Ok(())
}

fn verify_qr(text: &str, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let payload = BootstrapPayload::decode(text).context("not a QR payload")?;

    let signature_ok = payload.verify();
    let fresh = payload.is_fresh(now_millis(), config.bootstrap_max_age());

    println!("pos_id     : {}", payload.pos_id);
    println!("service    : {}", payload.route());
    println!("merchant   : {}", payload.merchant_public_key.to_hex());
    println!("created    : {}", format_millis(payload.timestamp));
    println!("signature  : {}", if signature_ok { "valid" } else { "INVALID" });
    println!("freshness  : {}", if fresh { "ok" } else { "EXPIRED" });

    if !signature_ok {
        bail!("QR signature does not verify");
    }
    if !fresh {
        bail!("QR payload is too old");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Pays `amount` from a scratch copy of the wallet to a throwaway merchant
/// over the in-memory transport. Nothing on disk changes.
async fn simulate(args: &DeviceArgs, amount: u64) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let device = Device::open(&args.data_dir)?;

    let scratch = MemoryLedgerStore::new();
    scratch
        .save(&device.ledger.entries())
        .context("failed to copy wallet")?;
    let payer_ledger = Arc::new(WalletLedger::open(Box::new(scratch))?);

    let medium = MemoryMedium::new();
    let merchant_ledger = Arc::new(WalletLedger::in_memory());
    let mut merchant = MerchantSession::new(
        medium.endpoint("merchant"),
        Arc::new(SoftwareKeyCustody::generate()),
        merchant_ledger.clone(),
        config.clone(),
    )?;
    let qr_text = merchant.bootstrap_payload()?;
    merchant.start_advertising().await?;
    tracing::info!(pos_id = merchant.pos_id(), "simulated merchant advertising");

    let merchant_task = tokio::spawn(async move {
        while let Ok(event) = merchant.next_event().await {
            tracing::info!(?event, "merchant");
        }
    });

    let mut payer = PayerSession::from_qr(
        medium.endpoint(PAYER_ENDPOINT_NAME),
        device.custody.clone(),
        payer_ledger.clone(),
        &qr_text,
        config,
    )?;
    let outcome = payer.pay(amount).await;
    payer.disconnect().await;
    merchant_task.abort();

    let receipts = outcome.with_context(|| format!("payment of {amount} failed"))?;
    for receipt in &receipts {
        println!(
            "ACCEPT  {}  pos={}  merchant={}",
            receipt.token_serial,
            receipt.pos_id,
            receipt.merchant_public_key.short_hex(),
        );
    }
    println!(
        "paid {amount} in {} token(s); wallet would hold {} (now {})",
        receipts.len(),
        payer_ledger.balance(),
        device.ledger.balance(),
    );
    println!("merchant holds {}", merchant_ledger.balance());
    Ok(())
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

fn format_millis(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn version_lines() -> Vec<String> {
    vec![
        format!("offcash   {}", env!("CARGO_PKG_VERSION")),
        format!("protocol  {PROTOCOL_VERSION}"),
        format!("signing   {SIGNING_ALGORITHM}"),
        format!("exchange  {KEY_EXCHANGE_ALGORITHM}"),
        format!("cipher    {SYMMETRIC_ALGORITHM}"),
    ]
}

fn print_version() {
    for line in version_lines() {
        println!("{line}");
    }
}

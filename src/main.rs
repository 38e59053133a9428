//! Walletflow operator CLI
//!
//! Thin wiring of the configuration into the engine:
//!
//! - `address`: derive the account address from a recovery phrase on stdin
//! - `sub-account`: resolve an associated token account address
//! - `balance`: native or token balance of an account
//! - `send`: transfer SOL or a token (password on stdin)
//! - `pay`: pay a `solana:` payment request URL (password on stdin)

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walletflow::config::{Config, ENV_SIGNER_TOKEN};
use walletflow::payment_request::PaymentRequest;
use walletflow::wallet::{WalletManager, DEFAULT_DERIVATION_PATH};
use walletflow::{Credential, Pubkey, SubmissionResult, WalletEngine};
use zeroize::Zeroizing;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "walletflow.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive the account address from a recovery phrase read on stdin
    Address {
        #[arg(long, default_value = DEFAULT_DERIVATION_PATH)]
        path: String,
    },
    /// Associated token account of OWNER for MINT
    SubAccount { owner: String, mint: String },
    /// Balance of an account in SOL or a configured token
    Balance {
        owner: String,
        #[arg(long, default_value = "SOL")]
        asset: String,
    },
    /// Send SOL or a token; the password is read from stdin
    Send {
        /// Sending account
        #[arg(long, env = "WALLETFLOW_OWNER")]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "SOL")]
        asset: String,
        #[arg(long)]
        memo: Option<String>,
        #[arg(long, env = ENV_SIGNER_TOKEN, hide_env_values = true)]
        signer_token: String,
    },
    /// Pay a solana: payment request URL; the password is read from stdin
    Pay {
        url: String,
        #[arg(long, env = "WALLETFLOW_OWNER")]
        from: String,
        #[arg(long, env = ENV_SIGNER_TOKEN, hide_env_values = true)]
        signer_token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json)?;

    match args.command {
        Command::Address { path } => {
            let phrase = read_secret_line("recovery phrase")?;
            let wallet = WalletManager::derive(&phrase, &path)?;
            println!("{}", wallet.pubkey());
        }
        Command::SubAccount { owner, mint } => {
            let owner = parse_pubkey("owner", &owner)?;
            let mint = parse_pubkey("mint", &mint)?;
            let resolver = walletflow::tx_builder::AddressResolver::new();
            println!("{}", resolver.resolve(&owner, &mint));
        }
        Command::Balance { owner, asset } => {
            let config = Config::load(&args.config)?;
            let owner = parse_pubkey("owner", &owner)?;
            let asset = config.resolve_asset(&asset)?;
            // Reads only; the signer is never contacted
            let engine = WalletEngine::connect(&config, owner, "").await?;
            let balance = engine.balance(&asset).await?;
            println!("{} {}", balance, asset);
        }
        Command::Send {
            from,
            to,
            amount,
            asset,
            memo,
            signer_token,
        } => {
            let config = Config::load(&args.config)?;
            let owner = parse_pubkey("from", &from)?;
            let asset = config.resolve_asset(&asset)?;
            let engine = WalletEngine::connect(&config, owner, &signer_token).await?;

            let request = engine
                .sender()
                .validate(asset, &to, &amount, memo.as_deref(), Vec::new())?;
            let credential = Credential::new(read_secret_line("password")?.as_str());
            let result = engine.sender().send(&request, credential).await?;
            report(&result)?;
        }
        Command::Pay {
            url,
            from,
            signer_token,
        } => {
            let config = Config::load(&args.config)?;
            let owner = parse_pubkey("from", &from)?;
            let payment = PaymentRequest::parse(&url)?;
            if let Some(label) = &payment.label {
                info!(label = %label, recipient = %payment.recipient, "Paying request");
            }
            let engine = WalletEngine::connect(&config, owner, &signer_token).await?;

            let credential = Credential::new(read_secret_line("password")?.as_str());
            let receipt = engine.pay(&payment, credential).await?;
            if let Some(callback) = receipt.callback {
                // Let the merchant callback finish before the runtime shuts down
                callback.await.context("callback task failed")?;
            }
            report(&receipt.result)?;
        }
    }

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "walletflow=debug,info"
    } else {
        "walletflow=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into());

    // Logs go to stderr; stdout carries command output only
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim()).with_context(|| format!("{} '{}' is not a valid address", field, value))
}

fn read_secret_line(what: &str) -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .with_context(|| format!("failed to read {} from stdin", what))?;
    let trimmed = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
    if trimmed.is_empty() {
        bail!("no {} given on stdin", what);
    }
    Ok(trimmed)
}

fn report(result: &SubmissionResult) -> Result<()> {
    match result {
        SubmissionResult::Confirmed(signature) => {
            println!("confirmed {}", signature);
            Ok(())
        }
        SubmissionResult::TimedOut(signature) => {
            println!("unconfirmed {} (may still land)", signature);
            Ok(())
        }
        SubmissionResult::Failed { signature, reason } => bail!("{} failed: {}", signature, reason),
        SubmissionResult::Pending => bail!("submission has no status yet"),
    }
}

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::Phone;
use storage::{CredentialStore, SubscriptionLedger};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Offline maintenance for the account and subscription documents. Run it
/// while the control server is stopped; the server holds both documents in
/// memory and rewrites them on every change.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "./data/accounts.json")]
    credentials_path: PathBuf,
    #[arg(long, default_value = "./data/subscriptions.json")]
    ledger_path: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists the phones of every stored account.
    Accounts,
    /// Shows the recorded memberships per phone.
    Subscriptions,
    RemoveAccount {
        phone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    for line in run(cli).await? {
        println!("{line}");
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<Vec<String>> {
    match cli.command {
        Command::Accounts => {
            let credentials = CredentialStore::load(&cli.credentials_path).await;
            Ok(credentials
                .accounts()
                .map(|account| account.phone.to_string())
                .collect())
        }
        Command::Subscriptions => {
            let ledger = SubscriptionLedger::load(&cli.ledger_path).await;
            Ok(ledger
                .stats()
                .await
                .iter()
                .map(ToString::to_string)
                .collect())
        }
        Command::RemoveAccount { phone } => {
            let phone = Phone::parse(&phone)?;
            let mut credentials = CredentialStore::load(&cli.credentials_path).await;
            if credentials.remove(&phone).is_none() {
                bail!("no stored account for {phone}");
            }
            credentials.save().await?;

            let ledger = SubscriptionLedger::load(&cli.ledger_path).await;
            let memberships = ledger.forget_phone(&phone).await;
            info!(%phone, memberships, "account removed");
            Ok(vec![format!(
                "removed {phone} ({memberships} memberships dropped)"
            )])
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;

use expiry_countdown::prelude::*;
use expiry_countdown::schedule::run_daily;

#[derive(Parser, Debug)]
#[command(name = "expiry-countdown", version)]
#[command(about = "Daily expiry countdown notifications for household inventories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one countdown pass now
    Run,
    /// Run the countdown every day at EXPIRY_RUN_AT local time
    Schedule,
    /// Push a sample countdown to every member of a household
    Sample {
        /// Uid of the calling user; must belong to the household
        #[arg(long)]
        caller: String,
        /// Household id
        #[arg(long)]
        family: String,
        /// Days left to announce (1, 2 or 3)
        #[arg(long)]
        days: Option<i64>,
        /// Item name shown in the notification
        #[arg(long)]
        item: Option<String>,
    },
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let service = ServiceConfig::from_env().context("Invalid service configuration")?;
    let backend = Backend::rest(&BackendConfig::from_env().context("Invalid backend configuration")?)
        .context("Failed to set up backend clients")?;

    match cli.command {
        Commands::Run => {
            let summary = DailyRunner::new(&backend, &service)
                .run_once(Utc::now())
                .await
                .context("Countdown run aborted")?;
            info!("{}", serde_json::to_string(&summary)?);
            println!("OK: ran dailyExpiryCountdown once");
        }
        Commands::Schedule => {
            info!(
                "Scheduling daily countdown at {} (UTC{})",
                service.run_at.format("%H:%M"),
                service.utc_offset
            );
            let runner = DailyRunner::new(&backend, &service);
            run_daily(&runner, service.run_at, service.utc_offset).await;
        }
        Commands::Sample {
            caller,
            family,
            days,
            item,
        } => {
            let request = SampleRequest {
                family_id: Some(family),
                days_left: days.map(serde_json::Value::from),
                item_name: item,
            };
            let response = SampleInvocation::new(&backend, &service)
                .push_sample(Some(&caller), &request, Utc::now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    if let Err(err) = run().await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

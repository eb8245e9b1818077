//! CLI for popqueue
//!
//! Subcommands:
//! - `serve`: recreate the queues listed in the catalog and run until Ctrl-C
//! - `inspect`: print the live records of a message log or delivery ledger

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};

use popqueue::broker::{Broker, BrokerContext};
use popqueue::config::{Settings, load_config};
use popqueue::persistence::{ledger, store};
use popqueue::utils::{Result, logging};

#[derive(Parser)]
#[command(name = "popqueue")]
enum Command {
    /// Run the broker until interrupted
    Serve,
    /// Print the live records of a log file
    Inspect {
        file: PathBuf,
        /// Read the file as a delivery ledger instead of a message log
        #[arg(long)]
        ledger: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.broker.log_level);

    let result = match cmd {
        Command::Serve => serve(settings).await,
        Command::Inspect { file, ledger } => inspect(&file, ledger),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let broker = Broker::open(BrokerContext::from_settings(&settings.broker))?;
    info!(
        data_dir = %settings.broker.data_dir,
        queues = ?broker.queue_names(),
        "Broker running"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for the shutdown signal: {}", e);
    }
    info!("Shutdown signal received. Exiting gracefully.");
    broker.shutdown().await
}

fn inspect(file: &Path, as_ledger: bool) -> Result<()> {
    if as_ledger {
        let mut counts: Vec<(String, u32)> = ledger::read_counts(file)?.into_iter().collect();
        counts.sort();
        for (id, count) in counts {
            println!("{id}\t{count}");
        }
        return Ok(());
    }

    for message in store::read_messages(file)? {
        println!("{}", serde_json::to_string(&message)?);
    }
    Ok(())
}

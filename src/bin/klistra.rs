use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use klistra::config::Config;
use klistra::create_paste_store;
use klistra::server::time::{SharedClock, SystemClock};
use klistra::server::{build_rocket, PasteService, Sweeper};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CliStore {
    Memory,
    Sqlite,
    Redis,
}

impl CliStore {
    fn as_str(self) -> &'static str {
        match self {
            CliStore::Memory => "memory",
            CliStore::Sqlite => "sqlite",
            CliStore::Redis => "redis",
        }
    }
}

/// Serve the klistra encrypted paste API.
#[derive(Parser, Debug)]
#[command(author, version = env!("KLISTRA_VERSION"), about)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "KLISTRA_ADDRESS", default_value = "127.0.0.1")]
    address: IpAddr,

    /// Port to bind.
    #[arg(long, env = "KLISTRA_PORT", default_value_t = 8000)]
    port: u16,

    /// Storage backend; overrides KLISTRA_STORE.
    #[arg(long, value_enum)]
    store: Option<CliStore>,

    /// SQLite database file; overrides KLISTRA_SQLITE_PATH.
    #[arg(long)]
    sqlite_path: Option<PathBuf>,

    /// Seconds between expiration sweeps; overrides KLISTRA_SWEEP_INTERVAL_SECS.
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
}

impl Cli {
    /// Flags win over the environment for the keys they cover.
    fn lookup(&self, key: &str) -> Option<String> {
        let flag = match key {
            "KLISTRA_STORE" => self.store.map(|store| store.as_str().to_string()),
            "KLISTRA_SQLITE_PATH" => self
                .sqlite_path
                .as_ref()
                .map(|path| path.display().to_string()),
            "KLISTRA_SWEEP_INTERVAL_SECS" => self.sweep_interval_secs.map(|secs| secs.to_string()),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    }
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_lookup(|key| cli.lookup(key))?;

    let store = create_paste_store(&config.store).await?;
    let clock: SharedClock = Arc::new(SystemClock);
    let sweeper = Sweeper::new(Arc::clone(&store), Arc::clone(&clock), config.sweep_interval).start();
    let service = Arc::new(PasteService::new(Arc::clone(&store), clock, &config));

    log::info!(
        "klistra {} listening on {}:{}",
        env!("KLISTRA_VERSION"),
        cli.address,
        cli.port
    );
    let rocket = build_rocket(service);
    // Keep the body limits build_rocket derived; only the listener changes.
    let figment = rocket
        .figment()
        .clone()
        .merge(("address", cli.address))
        .merge(("port", cli.port));
    let served = rocket.configure(figment).launch().await;

    sweeper.stop().await;
    store.close().await?;
    served?;

    Ok(())
}

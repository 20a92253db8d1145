use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use mini_prom::config::{self, CliArgs};
use mini_prom::logging::logger;
use mini_prom::scrape::TargetTable;
use mini_prom::{HttpFetcher, MemoryStorage, Scheduler, Settings, TextDecoder};
use tokio::time;

// Struct representation of the running collector.
pub struct MiniProm {
    storage: Arc<MemoryStorage>,
    scheduler: Scheduler,
}

impl MiniProm {
    pub fn new(targets: TargetTable) -> Result<Self> {
        let storage = Arc::new(MemoryStorage::new());
        let scheduler = Scheduler::new(
            targets,
            storage.clone(),
            Arc::new(TextDecoder::new()),
            Arc::new(HttpFetcher::new()?),
        );
        Ok(Self { storage, scheduler })
    }

    pub fn start(&mut self) -> Result<()> {
        info!("Starting scrape scheduler");
        self.scheduler.start()
    }

    pub async fn blocking_event_loop(self) -> Self {
        let mut stats = time::interval(Settings::STATS_INTERVAL);
        stats.tick().await;

        loop {
            tokio::select! {
                _ = stats.tick() => {
                    info!(
                        "Store holds {} series / {} samples",
                        self.storage.series_count(),
                        self.storage.sample_count()
                    );
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C");
                    break;
                },
            }
        }

        self
    }

    pub async fn stop(mut self) {
        self.scheduler.stop().await;
        info!(
            "Final store size: {} series / {} samples",
            self.storage.series_count(),
            self.storage.sample_count()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let app_config = config::load_config(&cli_args)?;
    logger::setup_logging(&app_config.logging)?;

    if !Path::new(&cli_args.config).exists() {
        warn!("Config file {} not found, running with defaults", cli_args.config);
    }

    let targets = app_config.process();
    if targets.is_empty() {
        warn!("No scrape jobs configured");
    }

    let mut mini_prom = MiniProm::new(targets)?;
    mini_prom.start()?;

    mini_prom.blocking_event_loop().await.stop().await;
    info!("Shutting down");
    Ok(())
}

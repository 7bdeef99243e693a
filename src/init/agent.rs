// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::init::BoxError;
use crate::init::args::ScanRun;
use crate::init::wait;
use crate::receivers::file::{
    ChannelProvider, JsonFileRegistry, MemoryRegistry, Message, Registry, Scanner,
};

const WRITERS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the scanner and writes every line it reads to stdout as JSON.
pub struct Agent {
    config: Box<ScanRun>,
}

impl Agent {
    pub fn new(config: Box<ScanRun>) -> Self {
        Self { config }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;

        let scanner_config = config.build_config();
        scanner_config.validate()?;

        let registry: Arc<dyn Registry> = match &config.offsets_path {
            Some(path) => {
                let registry = JsonFileRegistry::open(path)?;
                info!(path = %registry.path().display(), "Using JSON offset registry");
                Arc::new(registry)
            }
            None => Arc::new(MemoryRegistry::new()),
        };

        let (provider, receivers) =
            ChannelProvider::new(config.pipelines, config.pipeline_queue_size);

        let mut writers_task_set = JoinSet::new();
        for rx in receivers {
            writers_task_set.spawn(write_messages(rx, tokio::io::stdout()));
        }

        let mut scanner = Scanner::new(scanner_config.clone(), Arc::new(provider), registry.clone());
        let statuses = scanner.statuses();
        for source in config.build_sources() {
            scanner.add_source(source).await;
        }

        info!(
            sources = scanner.sources().len(),
            tailers = scanner.tailer_count(),
            "Starting logscan."
        );
        let handle = scanner.start();

        let mut flush_ticker = interval(scanner_config.checkpoint_interval());
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut result = Ok(());
        loop {
            select! {
                _ = agent_cancel.cancelled() => {
                    info!("Agent cancelled, shutting down.");
                    break;
                }
                _ = flush_ticker.tick() => {
                    if let Err(e) = registry.flush() {
                        warn!(error = %e, "Failed to flush offset registry");
                    }
                }
                e = wait::wait_for_any_task(&mut writers_task_set) => {
                    error!("Unexpected early exit of output writer.");
                    result = e.and(Err("output writer exited".into()));
                    break;
                }
            }
        }

        let scanner = handle.stop().await?;
        for (name, status) in statuses.snapshot() {
            debug!(source = %name, live_tailers = status.live_tailers, last_error = ?status.last_error, "Final source status");
        }
        // Dropping the scanner closes the pipeline channels so the writers drain and exit
        drop(scanner);

        wait::wait_for_tasks_with_timeout(&mut writers_task_set, WRITERS_DRAIN_TIMEOUT).await?;
        result
    }
}

/// Write messages as JSON lines until the channel closes.
async fn write_messages<W>(mut rx: BoundedReceiver<Message>, out: W) -> Result<(), BoxError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BufWriter::new(out);
    while let Some(message) = rx.next().await {
        let line = json!({
            "timestamp": message.timestamp_unix_nano,
            "source": message.origin.source,
            "path": message.origin.path.display().to_string(),
            "identifier": message.origin.identifier,
            "offset": message.offset,
            "message": message.content_lossy(),
        });
        out.write_all(line.to_string().as_bytes()).await?;
        out.write_all(b"\n").await?;

        if rx.is_empty() {
            out.flush().await?;
        }
    }
    out.flush().await?;
    Ok(())
}

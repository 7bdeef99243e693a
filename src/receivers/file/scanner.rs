// SPDX-License-Identifier: Apache-2.0

//! Scanner: keeps one tailer per scan key in sync with what sources match on disk.
//!
//! Every pass resolves all sources, diffs the result against the running
//! tailers with [`reconcile`] and applies the plan: stale tailers are stopped
//! (final checkpoint included) before their replacements start, and the
//! number of live tailers never exceeds the open files limit.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use crate::receivers::file::config::ScannerConfig;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{ScanKey, resolve};
use crate::receivers::file::persistence::Registry;
use crate::receivers::file::pipeline::PipelineProvider;
use crate::receivers::file::reconcile::{
    DesiredFile, ObservedTailer, Plan, StopReason, reconcile,
};
use crate::receivers::file::source::{LogSource, StartAt};
use crate::receivers::file::status::SourceStatuses;
use crate::receivers::file::tailer::{StartPosition, Tailer, TailerId, TailerOptions};

const NO_MATCH: &str = "no file matches pattern";

pub struct Scanner {
    config: ScannerConfig,
    options: TailerOptions,
    sources: Vec<LogSource>,
    tailers: HashMap<ScanKey, Tailer>,
    /// Source each live tailer is counted for
    owners: HashMap<ScanKey, String>,
    pipelines: Arc<dyn PipelineProvider>,
    registry: Arc<dyn Registry>,
    statuses: SourceStatuses,
    deferred: usize,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        pipelines: Arc<dyn PipelineProvider>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            options: TailerOptions::from(&config),
            config,
            sources: Vec::new(),
            tailers: HashMap::new(),
            owners: HashMap::new(),
            pipelines,
            registry,
            statuses: SourceStatuses::new(),
            deferred: 0,
        }
    }

    /// Shared view of per-source status
    pub fn statuses(&self) -> SourceStatuses {
        self.statuses.clone()
    }

    pub fn sources(&self) -> &[LogSource] {
        &self.sources
    }

    /// Register a source and start tailing its files right away, within the
    /// remaining budget. A source with the same name is replaced.
    pub async fn add_source(&mut self, source: LogSource) {
        info!(source = %source.name, pattern = %source.path, "Adding log source");

        match self.sources.iter_mut().find(|s| s.name == source.name) {
            Some(existing) => *existing = source.clone(),
            None => self.sources.push(source.clone()),
        }

        let desired = self.resolve_source(&source, source.launch_start_at());
        let observed: Vec<ObservedTailer> = desired
            .iter()
            .filter_map(|d| self.tailers.get(&d.key))
            .map(observe)
            .collect();

        let others = self.tailers.len() - observed.len();
        let budget = self.config.open_files_limit.saturating_sub(others);

        let plan = reconcile(&observed, &desired, budget);
        self.apply(plan).await;
        self.update_statuses();
    }

    /// Retire a source. Its tailers are stopped by the next pass.
    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.name != name);

        let removed = self.sources.len() != before;
        if removed {
            info!(source = %name, "Removed log source");
            self.statuses.remove(name);
        }
        removed
    }

    /// Run one full reconciliation pass over every source.
    pub async fn scan(&mut self) {
        let mut desired = Vec::new();
        for source in self.sources.clone() {
            desired.extend(self.resolve_source(&source, source.discovery_start_at()));
        }

        let observed: Vec<ObservedTailer> = self.tailers.values().map(observe).collect();
        let plan = reconcile(&observed, &desired, self.config.open_files_limit);
        self.apply(plan).await;

        // A shared key belongs to the first source that still wants it
        let mut owners = HashMap::with_capacity(self.tailers.len());
        for file in desired {
            if self.tailers.contains_key(&file.key) && !owners.contains_key(&file.key) {
                owners.insert(file.key, file.source);
            }
        }
        self.owners = owners;
        self.update_statuses();
    }

    /// Stop every tailer concurrently and flush the registry.
    pub async fn stop(&mut self) {
        let mut tailers: Vec<Tailer> = self.tailers.drain().map(|(_, t)| t).collect();
        debug!(tailers = tailers.len(), "Stopping all tailers");

        join_all(tailers.iter_mut().map(|t| t.stop())).await;
        drop(tailers);
        self.owners.clear();

        if let Err(e) = self.registry.flush() {
            error!(error = %e, "Failed to flush offset registry");
        }
        self.update_statuses();
    }

    /// Spawn the periodic scan loop. The loop owns the scanner until stopped.
    pub fn start(self) -> ScannerHandle {
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = bounded(16);

        let join = tokio::spawn(self.run(commands_rx, cancel.clone()));

        ScannerHandle {
            commands: commands_tx,
            cancel,
            join,
        }
    }

    async fn run(mut self, mut commands: BoundedReceiver<Command>, cancel: CancellationToken) -> Self {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(
            sources = self.sources.len(),
            open_files_limit = self.config.open_files_limit,
            "Scanner started"
        );

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                command = commands.next() => match command {
                    Some(Command::AddSource(source, ack)) => {
                        self.add_source(source).await;
                        let _ = ack.send(());
                    }
                    Some(Command::RemoveSource(name, ack)) => {
                        let removed = self.remove_source(&name);
                        if removed {
                            self.scan().await;
                        }
                        let _ = ack.send(removed);
                    }
                    None => break,
                },

                _ = ticker.tick() => self.scan().await,
            }
        }

        self.stop().await;
        info!("Scanner stopped");
        self
    }

    fn resolve_source(&self, source: &LogSource, start_at: StartAt) -> Vec<DesiredFile> {
        let candidates = match resolve(source) {
            Ok(candidates) => candidates,
            Err(e) => {
                let message = e.to_string();
                let previous = self.statuses.get(&source.name).and_then(|s| s.last_error);
                if previous.as_deref() != Some(message.as_str()) {
                    warn!(source = %source.name, pattern = %source.path, error = %message, "Unable to resolve source");
                }
                self.statuses.set_error(&source.name, Some(message));
                return Vec::new();
            }
        };

        if candidates.is_empty() {
            self.statuses
                .set_error(&source.name, Some(NO_MATCH.to_string()));
        } else {
            self.statuses.set_error(&source.name, None);
        }

        candidates
            .into_iter()
            .map(|candidate| DesiredFile {
                key: ScanKey::compute(&candidate.path, source),
                candidate,
                source: source.name.clone(),
                start_at,
            })
            .collect()
    }

    async fn apply(&mut self, plan: Plan) {
        for (key, reason) in plan.stop {
            self.owners.remove(&key);
            if let Some(mut tailer) = self.tailers.remove(&key) {
                info!(scan_key = %key, tailer = %tailer.id(), reason = ?reason, "Stopping tailer");
                match reason {
                    // Nothing else will read what is left in the renamed file
                    StopReason::Rotated => tailer.stop_after_drain().await,
                    _ => tailer.stop().await,
                }
            }
        }

        for start in plan.start {
            let file = start.file;
            let output = self.pipelines.next_pipeline_chan();
            if output.is_disconnected() {
                debug!(scan_key = %file.key, "Pipeline channel closed, not starting tailer");
                continue;
            }
            let position = if start.restart {
                StartPosition::Beginning
            } else {
                self.start_position(&file)
            };

            let started = Tailer::start(
                file.key.clone(),
                file.source.clone(),
                file.candidate,
                position,
                output,
                self.registry.clone(),
                self.options.clone(),
            )
            .await;

            match started {
                Ok(tailer) => {
                    self.owners.insert(file.key.clone(), file.source);
                    self.tailers.insert(file.key, tailer);
                }
                Err(e) => {
                    debug!(scan_key = %file.key, error = %e, "Unable to start tailer, retrying next pass");
                }
            }
        }

        if plan.deferred.len() != self.deferred {
            if !plan.deferred.is_empty() {
                warn!(
                    deferred = plan.deferred.len(),
                    open_files_limit = self.config.open_files_limit,
                    "Open files limit reached, some files are not tailed"
                );
            }
            self.deferred = plan.deferred.len();
        }
    }

    /// Resume from the registry when it holds a checkpoint for this very file,
    /// otherwise follow the source mode.
    fn start_position(&self, file: &DesiredFile) -> StartPosition {
        match self.registry.get_offset(&file.key) {
            Some(checkpoint)
                if checkpoint.file_id == file.candidate.file_id
                    && checkpoint.offset <= file.candidate.size =>
            {
                StartPosition::Offset(checkpoint.offset)
            }
            _ => match file.start_at {
                StartAt::Beginning => StartPosition::Beginning,
                StartAt::End => StartPosition::End,
            },
        }
    }

    fn update_statuses(&self) {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (key, tailer) in &self.tailers {
            let owner = self.owners.get(key).map_or(tailer.source(), String::as_str);
            *counts.entry(owner).or_default() += 1;
        }

        for source in &self.sources {
            let live = counts.get(source.name.as_str()).copied().unwrap_or(0);
            self.statuses.set_live_tailers(&source.name, live);
        }
    }

    pub fn tailer_count(&self) -> usize {
        self.tailers.len()
    }

    /// Keys of all live tailers, sorted
    pub fn scan_keys(&self) -> Vec<ScanKey> {
        let mut keys: Vec<ScanKey> = self.tailers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn tailer_id(&self, key: &str) -> Option<TailerId> {
        self.tailers.get(key).map(Tailer::id)
    }

    pub fn tailer_offset(&self, key: &str) -> Option<u64> {
        self.tailers.get(key).map(Tailer::offset)
    }

    pub fn is_tailing(&self, key: &str) -> bool {
        self.tailers.contains_key(key)
    }
}

fn observe(tailer: &Tailer) -> ObservedTailer {
    ObservedTailer {
        key: tailer.scan_key().clone(),
        file_id: tailer.candidate().file_id,
        offset: tailer.offset(),
        truncated: tailer.is_truncated(),
        exited: tailer.has_exited(),
    }
}

enum Command {
    AddSource(LogSource, oneshot::Sender<()>),
    RemoveSource(String, oneshot::Sender<bool>),
}

/// Handle to a running scanner.
pub struct ScannerHandle {
    commands: BoundedSender<Command>,
    cancel: CancellationToken,
    join: JoinHandle<Scanner>,
}

impl ScannerHandle {
    /// Add a source; returns once its files are being tailed.
    pub async fn add_source(&self, source: LogSource) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::AddSource(source, tx))
            .await
            .map_err(|_| Error::ScannerStopped)?;
        rx.await.map_err(|_| Error::ScannerStopped)
    }

    /// Remove a source and stop its tailers. Returns false for an unknown name.
    pub async fn remove_source(&self, name: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RemoveSource(name.into(), tx))
            .await
            .map_err(|_| Error::ScannerStopped)?;
        rx.await.map_err(|_| Error::ScannerStopped)
    }

    /// Stop the scan loop and every tailer, handing the scanner back.
    pub async fn stop(self) -> Result<Scanner> {
        self.cancel.cancel();
        Ok(self.join.await?)
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Tailer: follows one open file and forwards its lines.
//!
//! A tailer owns its file handle and a read loop running on its own task. It
//! never reopens the file: rotation and truncation are detected and acted on
//! by the scanner, which replaces the whole tailer.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::config::ScannerConfig;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{FileCandidate, FileId, LineSplitter, ScanKey};
use crate::receivers::file::message::{Message, MessageOrigin};
use crate::receivers::file::persistence::{Checkpoint, Registry};

static NEXT_TAILER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one tailer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TailerId(u64);

impl TailerId {
    fn next() -> Self {
        Self(NEXT_TAILER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TailerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tailer-{}", self.0)
    }
}

/// Where a new tailer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    End,
    /// Resume offset, clamped to the current file size
    Offset(u64),
}

/// Read loop settings, taken from the scanner configuration.
#[derive(Debug, Clone)]
pub struct TailerOptions {
    pub read_buffer_size: usize,
    pub max_line_size: usize,
    pub poll_interval: Duration,
    pub checkpoint_interval: Duration,
    pub stop_timeout: Duration,
}

impl From<&ScannerConfig> for TailerOptions {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            max_line_size: config.max_line_size,
            poll_interval: config.poll_interval(),
            checkpoint_interval: config.checkpoint_interval(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// State the read loop publishes to its owner.
#[derive(Debug, Default)]
struct TailerState {
    offset: AtomicU64,
    truncated: AtomicBool,
    exited: AtomicBool,
    /// Read the handle to EOF once cancelled
    drain: AtomicBool,
}

pub struct Tailer {
    id: TailerId,
    scan_key: ScanKey,
    source: String,
    candidate: FileCandidate,
    state: Arc<TailerState>,
    registry: Arc<dyn Registry>,
    stop_timeout: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Tailer {
    /// Open the candidate, position the handle and spawn the read loop.
    ///
    /// Fails with `Error::Open` when the file disappeared or was replaced
    /// since it was statted.
    pub async fn start(
        scan_key: ScanKey,
        source: impl Into<String>,
        candidate: FileCandidate,
        position: StartPosition,
        output: BoundedSender<Message>,
        registry: Arc<dyn Registry>,
        options: TailerOptions,
    ) -> Result<Self> {
        let source = source.into();
        let open_err = |e: std::io::Error| Error::Open {
            path: candidate.path.clone(),
            source: e,
        };

        let path = candidate.path.clone();
        let (file, file_id, size) = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path)?;
            let file_id = FileId::from_file(&file)?;
            let size = file.metadata()?.len();
            Ok::<_, std::io::Error>((file, file_id, size))
        })
        .await?
        .map_err(open_err)?;

        if file_id != candidate.file_id {
            return Err(open_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "file replaced between stat and open",
            )));
        }

        let offset = match position {
            StartPosition::Beginning => 0,
            StartPosition::End => size,
            StartPosition::Offset(offset) => offset.min(size),
        };

        let mut file = tokio::fs::File::from_std(file);
        file.seek(SeekFrom::Start(offset)).await.map_err(open_err)?;

        registry.set_offset(&scan_key, Checkpoint { offset, file_id });

        let id = TailerId::next();
        let state = Arc::new(TailerState {
            offset: AtomicU64::new(offset),
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        info!(
            tailer = %id,
            scan_key = %scan_key,
            path = %candidate.path.display(),
            offset,
            "Started tailing file"
        );

        let read_loop = ReadLoop {
            file,
            file_id,
            scan_key: scan_key.clone(),
            origin: Arc::new(MessageOrigin::new(scan_key.clone(), source.clone())),
            splitter: LineSplitter::new(offset, options.max_line_size),
            output,
            registry: registry.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            checkpointed: offset,
            last_checkpoint: Instant::now(),
            options: options.clone(),
        };
        let handle = tokio::spawn(read_loop.run());

        Ok(Self {
            id,
            scan_key,
            source,
            candidate,
            state,
            registry,
            stop_timeout: options.stop_timeout,
            cancel,
            handle: Some(handle),
        })
    }

    /// Stop the read loop and wait for it to exit, aborting it if it does not
    /// stop within the stop timeout. The final checkpoint is written before
    /// this returns. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(mut handle) = self.handle.take() else {
            return;
        };

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(tailer = %self.id, scan_key = %self.scan_key, error = %e, "Tailer task failed");
                self.write_final_checkpoint();
            }
            Err(_) => {
                warn!(
                    tailer = %self.id,
                    scan_key = %self.scan_key,
                    timeout = ?self.stop_timeout,
                    "Tailer did not stop in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
                self.write_final_checkpoint();
            }
        }

        debug!(tailer = %self.id, scan_key = %self.scan_key, offset = self.offset(), "Stopped tailer");
    }

    /// Like [`Tailer::stop`], but the read loop first forwards every complete
    /// line still in the open handle. For a file rotated away from its path,
    /// whose tail no other tailer will read. Bounded by the stop timeout.
    pub async fn stop_after_drain(&mut self) {
        self.state.drain.store(true, Ordering::Release);
        self.stop().await;
    }

    fn write_final_checkpoint(&self) {
        self.registry.set_offset(
            &self.scan_key,
            Checkpoint {
                offset: self.offset(),
                file_id: self.candidate.file_id,
            },
        );
    }

    pub fn id(&self) -> TailerId {
        self.id
    }

    pub fn scan_key(&self) -> &ScanKey {
        &self.scan_key
    }

    /// Name of the source this tailer was started for
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The file as observed when the tailer was created
    pub fn candidate(&self) -> &FileCandidate {
        &self.candidate
    }

    /// Position right after the last line handed to the pipeline
    pub fn offset(&self) -> u64 {
        self.state.offset.load(Ordering::Acquire)
    }

    /// The file shrank below the read position
    pub fn is_truncated(&self) -> bool {
        self.state.truncated.load(Ordering::Acquire)
    }

    /// The read loop ended on an error
    pub fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Tailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tailer")
            .field("id", &self.id)
            .field("scan_key", &self.scan_key)
            .field("path", &self.candidate.path)
            .field("offset", &self.offset())
            .finish()
    }
}

#[derive(Debug)]
enum SendError {
    Cancelled,
    ChannelClosed,
}

async fn send_with_cancellation(
    output: &BoundedSender<Message>,
    message: Message,
    cancel: &CancellationToken,
) -> std::result::Result<(), SendError> {
    // Polling the send first records a delivery that raced with cancellation
    select! {
        biased;
        result = output.send(message) => result.map_err(|_| SendError::ChannelClosed),
        _ = cancel.cancelled() => Err(SendError::Cancelled),
    }
}

/// Returns true when cancelled before the duration elapsed.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

struct ReadLoop {
    file: tokio::fs::File,
    file_id: FileId,
    scan_key: ScanKey,
    origin: Arc<MessageOrigin>,
    splitter: LineSplitter,
    output: BoundedSender<Message>,
    registry: Arc<dyn Registry>,
    state: Arc<TailerState>,
    cancel: CancellationToken,
    checkpointed: u64,
    last_checkpoint: Instant,
    options: TailerOptions,
}

impl ReadLoop {
    async fn run(mut self) {
        let mut buf = vec![0u8; self.options.read_buffer_size.max(1)];

        'read: while !self.cancel.is_cancelled() {
            let n = match self.file.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.exit_on_error("Failed to read file", &e);
                    break;
                }
            };

            if n == 0 {
                if !self.check_size().await {
                    break;
                }
                self.maybe_checkpoint();
                if sleep_or_cancel(self.options.poll_interval, &self.cancel).await {
                    break;
                }
                continue;
            }

            for line in self.splitter.push(&buf[..n]) {
                let message = Message::new(line.content, line.offset, self.origin.clone());
                match send_with_cancellation(&self.output, message, &self.cancel).await {
                    Ok(()) => self.state.offset.store(line.end, Ordering::Release),
                    Err(SendError::Cancelled) => break 'read,
                    Err(SendError::ChannelClosed) => {
                        warn!(scan_key = %self.scan_key, "Pipeline channel closed, stopping tailer");
                        self.state.exited.store(true, Ordering::Release);
                        break 'read;
                    }
                }
            }
            self.state
                .offset
                .store(self.splitter.committed(), Ordering::Release);
            self.maybe_checkpoint();
        }

        if self.cancel.is_cancelled()
            && self.state.drain.load(Ordering::Acquire)
            && !self.state.exited.load(Ordering::Acquire)
            && !self.state.truncated.load(Ordering::Acquire)
        {
            self.drain().await;
        }

        self.checkpoint();
        debug!(
            scan_key = %self.scan_key,
            offset = self.checkpointed,
            "Tailer read loop exited"
        );
    }

    /// Read from the last delivered line to EOF, sending without regard to
    /// cancellation. A trailing partial line is dropped.
    async fn drain(&mut self) {
        let offset = self.state.offset.load(Ordering::Acquire);
        if let Err(e) = self.file.seek(SeekFrom::Start(offset)).await {
            warn!(scan_key = %self.scan_key, error = %e, "Unable to drain rotated file");
            return;
        }

        let mut splitter = LineSplitter::new(offset, self.options.max_line_size);
        let mut buf = vec![0u8; self.options.read_buffer_size.max(1)];
        let mut lines = 0usize;
        loop {
            let n = match self.file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(scan_key = %self.scan_key, error = %e, "Unable to drain rotated file");
                    break;
                }
            };

            for line in splitter.push(&buf[..n]) {
                let message = Message::new(line.content, line.offset, self.origin.clone());
                if self.output.send(message).await.is_err() {
                    return;
                }
                self.state.offset.store(line.end, Ordering::Release);
                lines += 1;
            }
            self.state
                .offset
                .store(splitter.committed(), Ordering::Release);
        }

        debug!(scan_key = %self.scan_key, lines, "Drained rotated file");
    }

    /// Stat the open handle at EOF. Returns false when reading must stop.
    async fn check_size(&mut self) -> bool {
        let read_pos = self.splitter.committed() + self.splitter.pending_len() as u64;
        match self.file.metadata().await {
            Ok(metadata) if metadata.len() < read_pos => {
                warn!(
                    scan_key = %self.scan_key,
                    size = metadata.len(),
                    offset = read_pos,
                    "File truncated"
                );
                self.state.truncated.store(true, Ordering::Release);
                false
            }
            Ok(_) => true,
            Err(e) => {
                self.exit_on_error("Failed to stat file", &e);
                false
            }
        }
    }

    fn exit_on_error(&self, msg: &str, error: &std::io::Error) {
        warn!(scan_key = %self.scan_key, error = %error, "{}", msg);
        self.state.exited.store(true, Ordering::Release);
    }

    fn maybe_checkpoint(&mut self) {
        if self.last_checkpoint.elapsed() >= self.options.checkpoint_interval {
            self.checkpoint();
        }
    }

    fn checkpoint(&mut self) {
        let offset = self.state.offset.load(Ordering::Acquire);
        self.last_checkpoint = Instant::now();
        if offset == self.checkpointed {
            return;
        }

        self.registry.set_offset(
            &self.scan_key,
            Checkpoint {
                offset,
                file_id: self.file_id,
            },
        );
        self.checkpointed = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{BoundedReceiver, bounded};
    use crate::receivers::file::persistence::MemoryRegistry;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn options() -> TailerOptions {
        TailerOptions {
            read_buffer_size: 16,
            max_line_size: 1024,
            poll_interval: Duration::from_millis(10),
            checkpoint_interval: Duration::from_millis(0),
            stop_timeout: Duration::from_secs(1),
        }
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    async fn recv(rx: &mut BoundedReceiver<Message>) -> Message {
        timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    async fn start(
        path: &Path,
        position: StartPosition,
        capacity: usize,
    ) -> (Tailer, BoundedReceiver<Message>, Arc<MemoryRegistry>) {
        let (tx, rx) = bounded(capacity);
        let registry = Arc::new(MemoryRegistry::new());
        let candidate = FileCandidate::stat(path.to_path_buf()).unwrap().unwrap();
        let key = ScanKey::from_parts(path, "");
        let tailer = Tailer::start(
            key,
            "test",
            candidate,
            position,
            tx,
            registry.clone(),
            options(),
        )
        .await
        .unwrap();
        (tailer, rx, registry)
    }

    #[tokio::test]
    async fn test_reads_from_beginning_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "Once\nUpon\nA\nTime\n").unwrap();

        let (mut tailer, mut rx, registry) = start(&path, StartPosition::Beginning, 16).await;

        let mut lines = Vec::new();
        for _ in 0..4 {
            let msg = recv(&mut rx).await;
            lines.push((msg.content_lossy().into_owned(), msg.offset));
        }
        assert_eq!(
            lines,
            vec![
                ("Once".to_string(), 0),
                ("Upon".to_string(), 5),
                ("A".to_string(), 10),
                ("Time".to_string(), 12)
            ]
        );

        tailer.stop().await;
        assert_eq!(tailer.offset(), 17);
        let key = ScanKey::from_parts(&path, "");
        assert_eq!(registry.get_offset(&key).map(|c| c.offset), Some(17));
    }

    #[tokio::test]
    async fn test_start_at_end_only_reads_new_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();

        let (mut tailer, mut rx, _) = start(&path, StartPosition::End, 16).await;
        assert_eq!(tailer.offset(), 4);

        append(&path, "new\n");
        let msg = recv(&mut rx).await;
        assert_eq!(msg.content_lossy(), "new");
        assert_eq!(msg.offset, 4);

        tailer.stop().await;
    }

    #[tokio::test]
    async fn test_resume_offset_and_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "skipped\nkept\npart").unwrap();

        let (mut tailer, mut rx, _) = start(&path, StartPosition::Offset(8), 16).await;
        let msg = recv(&mut rx).await;
        assert_eq!(msg.content_lossy(), "kept");

        // The unterminated tail is held back
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_none());
        assert_eq!(tailer.offset(), 13);

        append(&path, "ial\n");
        let msg = recv(&mut rx).await;
        assert_eq!(msg.content_lossy(), "partial");
        assert_eq!(msg.offset, 13);

        tailer.stop().await;
    }

    #[tokio::test]
    async fn test_truncation_is_flagged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first line\nsecond line\n").unwrap();

        let (mut tailer, mut rx, _) = start(&path, StartPosition::Beginning, 16).await;
        recv(&mut rx).await;
        recv(&mut rx).await;

        std::fs::write(&path, "").unwrap();

        timeout(Duration::from_secs(2), async {
            while !tailer.is_truncated() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!tailer.has_exited());

        tailer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_prompt_under_backpressure_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();

        let (mut tailer, mut rx, registry) = start(&path, StartPosition::Beginning, 1).await;
        let first = recv(&mut rx).await;
        assert_eq!(first.content_lossy(), "a");

        // The loop is now blocked sending further lines
        timeout(Duration::from_millis(500), tailer.stop())
            .await
            .unwrap();
        assert!(tailer.is_stopped());

        let offset = tailer.offset();
        assert!(offset >= 2 && offset <= 4);
        tailer.stop().await;
        assert_eq!(tailer.offset(), offset);

        let key = ScanKey::from_parts(&path, "");
        assert_eq!(registry.get_offset(&key).map(|c| c.offset), Some(offset));
    }

    #[tokio::test]
    async fn test_replaced_file_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();
        let candidate = FileCandidate::stat(path.clone()).unwrap().unwrap();

        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "new\n").unwrap();

        let (tx, _rx) = bounded(1);
        let result = Tailer::start(
            ScanKey::from_parts(&path, ""),
            "test",
            candidate,
            StartPosition::Beginning,
            tx,
            Arc::new(MemoryRegistry::new()),
            options(),
        )
        .await;
        assert!(matches!(result, Err(Error::Open { .. })));
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();
        let candidate = FileCandidate::stat(path.clone()).unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();

        let (tx, _rx) = bounded(1);
        let result = Tailer::start(
            ScanKey::from_parts(&path, ""),
            "test",
            candidate,
            StartPosition::Beginning,
            tx,
            Arc::new(MemoryRegistry::new()),
            options(),
        )
        .await;
        match result {
            Err(Error::Open { path: failed, source }) => {
                assert_eq!(failed, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected result: {:?}", other.map(|t| t.id())),
        }
    }

    #[tokio::test]
    async fn test_drain_forwards_lines_left_in_rotated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = bounded(16);
        let registry = Arc::new(MemoryRegistry::new());
        let candidate = FileCandidate::stat(path.clone()).unwrap().unwrap();
        let mut tailer = Tailer::start(
            ScanKey::from_parts(&path, ""),
            "test",
            candidate,
            StartPosition::Beginning,
            tx,
            registry,
            TailerOptions {
                poll_interval: Duration::from_secs(60),
                ..options()
            },
        )
        .await
        .unwrap();

        // Let the loop reach EOF and go to sleep
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "Once\nUpon\npart");
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();

        timeout(Duration::from_secs(2), tailer.stop_after_drain())
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await.content_lossy(), "Once");
        assert_eq!(recv(&mut rx).await.content_lossy(), "Upon");
        assert!(rx.try_recv().is_none());
        assert_eq!(tailer.offset(), 10);
    }

    #[tokio::test]
    async fn test_plain_stop_does_not_drain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = bounded(16);
        let candidate = FileCandidate::stat(path.clone()).unwrap().unwrap();
        let mut tailer = Tailer::start(
            ScanKey::from_parts(&path, ""),
            "test",
            candidate,
            StartPosition::Beginning,
            tx,
            Arc::new(MemoryRegistry::new()),
            TailerOptions {
                poll_interval: Duration::from_secs(60),
                ..options()
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "unread\n");
        tailer.stop().await;

        assert!(rx.try_recv().is_none());
        assert_eq!(tailer.offset(), 0);
    }

    #[test]
    fn test_tailer_ids_are_unique() {
        let a = TailerId::next();
        let b = TailerId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}

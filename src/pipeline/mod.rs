//! Run orchestration: source → scheduler → fetch → route → sink.
//!
//! Responsibilities:
//! - Open the cursor, the source and the sink for one run.
//! - Pick a [`Scheduler`] from [`Scheduling`] and hand it a [`Stage`].
//! - Report a [`RunSummary`] once the scheduler has drained.

pub mod pool;
pub mod queue;
pub mod retry;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

pub use pool::{InFlightSet, PoolScheduler};
pub use queue::{Scheduler, SequentialScheduler};
pub use retry::RetryPolicy;

use crate::codec;
use crate::error::{FetchFailure, Result};
use crate::fetch::{FetchClient, Transport};
use crate::io::{Checkpoint, CheckpointStore, SinkWriter, SourceReader, position_of_line};
use crate::types::{CellRecord, CellfetchConfig, Scheduling, WorkItem};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Where one processed item goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Write(CellRecord),
    Requeue(WorkItem),
    Drop(FetchFailure),
}

/// Cooperative stop flag shared between the caller and the schedulers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            tracing::warn!("shutdown requested; finishing in-flight work");
        }
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early once the signal is raised.
    pub fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_raised() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Rows pulled from the source.
    pub read: u64,
    /// Rows written to the sink.
    pub resolved: u64,
    pub dropped: u64,
    /// Requeue events (one item may count several times).
    pub requeued: u64,
    /// Items still queued when shutdown stopped admission.
    pub abandoned: u64,
    pub peak_in_flight: usize,
    pub interrupted: bool,
    /// Cursor persisted when the run ended.
    pub checkpoint: Checkpoint,
}

/// Per-item work shared by every worker: fetch, classify, route, key.
#[derive(Debug, Clone)]
pub struct Stage {
    client: FetchClient,
    policy: RetryPolicy,
    generate_key: bool,
    shutdown: ShutdownSignal,
}

impl Stage {
    #[must_use]
    pub fn new(
        client: FetchClient,
        policy: RetryPolicy,
        generate_key: bool,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            client,
            policy,
            generate_key,
            shutdown,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn process(&self, item: WorkItem) -> Route {
        tracing::info!(
            line = item.line_number,
            id = %item.identifier,
            attempts = item.attempts,
            "processing"
        );
        match self.policy.resolve(&self.client, item) {
            Route::Write(record) if self.generate_key => Route::Write(with_key(record)),
            route => route,
        }
    }

    /// Back off after a requeue; see [`RetryPolicy::stall`].
    pub fn stall(&self) {
        self.policy.stall(&self.shutdown);
    }
}

fn with_key(mut record: CellRecord) -> CellRecord {
    match codec::encode(&record.identifier) {
        Ok(key) => record.key = Some(key),
        Err(err) => {
            tracing::warn!(id = %record.identifier, %err, "cannot derive key; leaving it empty");
        }
    }
    record
}

/// One configured fetch run.
#[derive(Debug)]
pub struct Pipeline {
    config: CellfetchConfig,
    client: FetchClient,
    shutdown: ShutdownSignal,
}

impl Pipeline {
    pub fn new(config: CellfetchConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let client = FetchClient::new(&config.fetch, transport);
        Ok(Self {
            config,
            client,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Pipeline backed by the blocking `reqwest` transport.
    #[cfg(feature = "http")]
    pub fn with_http(config: CellfetchConfig) -> Result<Self> {
        config.validate()?;
        let client = FetchClient::with_http(&config.fetch)?;
        Ok(Self {
            config,
            client,
            shutdown: ShutdownSignal::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CellfetchConfig {
        &self.config
    }

    /// Handle that stops admission when raised from another thread.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Point the cursor at the start of 0-based source line `line`.
    pub fn reset_to_line(&self, line: u64) -> Result<Checkpoint> {
        let source = self.config.source_path()?;
        let offset = position_of_line(source, line)?;
        let mut store = CheckpointStore::open(&self.config.checkpoint)?;
        store.write(line, offset)?;
        tracing::info!(line, offset, "cursor moved");
        Ok(Checkpoint::new(line, offset))
    }

    /// Process the source from the persisted cursor to EOF (or shutdown).
    pub fn run(&self) -> Result<RunSummary> {
        let source_path = self.config.source_path()?;
        let options = &self.config.pipeline;

        let store = CheckpointStore::open(&self.config.checkpoint)?;
        let mut source = SourceReader::open(source_path, store)?;
        let mut sink = SinkWriter::open(&self.config.output, options.generate_key)?;
        let stage = Stage::new(
            self.client.clone(),
            RetryPolicy::from(options),
            options.generate_key,
            self.shutdown.clone(),
        );

        let mut scheduler: Box<dyn Scheduler> = match options.scheduling {
            Scheduling::Sequential => Box::new(SequentialScheduler::new()),
            Scheduling::Pool { workers } => Box::new(PoolScheduler::new(workers)),
        };
        tracing::info!(
            source = %source_path.display(),
            output = %sink.path().display(),
            scheduler = scheduler.name(),
            "run started"
        );

        let summary = scheduler.drain(&mut source, &stage, &mut sink)?;
        tracing::info!(
            read = summary.read,
            resolved = summary.resolved,
            dropped = summary.dropped,
            requeued = summary.requeued,
            abandoned = summary.abandoned,
            interrupted = summary.interrupted,
            line = summary.checkpoint.line_number,
            offset = summary.checkpoint.byte_offset,
            "Done"
        );
        Ok(summary)
    }
}

/// Byte offset of 0-based line `line` in `source`, for operator inspection.
pub fn check_line(source: &Path, line: u64) -> Result<u64> {
    position_of_line(source, line)
}

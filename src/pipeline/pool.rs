//! Bounded worker pool with a single coordinating thread.
//!
//! Responsibilities:
//! - Keep at most `workers` identifiers in flight, topping up after every
//!   completion.
//! - Serialise every cursor and sink write on the coordinator.
//! - Never run the same identifier twice at once. A duplicate stops admission
//!   and waits as the single held item until the running fetch completes, so
//!   the source is never read ahead of what can be handed off.
//! - Close with a barrier proving every admitted item completed.
//! - On shutdown, rewind the cursor to the earliest row that was read but
//!   never handed off.

use std::collections::{HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{CellfetchError, Result};
use crate::io::{Checkpoint, SinkWriter, SourceReader};
use crate::pipeline::{Route, RunSummary, Scheduler, Stage};
use crate::types::{CellIdentifier, WorkItem};

/// Identifiers currently handed to a worker.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<CellIdentifier>>>,
}

impl InFlightSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashSet<CellIdentifier>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `id` in flight. Returns `false` when it already was.
    pub fn insert(&self, id: CellIdentifier) -> bool {
        self.guard().insert(id)
    }

    pub fn remove(&self, id: &CellIdentifier) -> bool {
        self.guard().remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &CellIdentifier) -> bool {
        self.guard().contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

enum Completion {
    Finished {
        identifier: CellIdentifier,
        route: Route,
    },
    Panicked {
        worker: usize,
    },
}

/// Admission/completion bookkeeping checked at the drain barrier.
#[derive(Debug, Default)]
struct Ledger {
    admitted: u64,
    completed: u64,
    ever_in_flight: HashSet<CellIdentifier>,
    ever_completed: HashSet<CellIdentifier>,
}

impl Ledger {
    fn admit(&mut self, id: CellIdentifier) {
        self.admitted += 1;
        self.ever_in_flight.insert(id);
    }

    fn complete(&mut self, id: CellIdentifier) {
        self.completed += 1;
        self.ever_completed.insert(id);
    }

    fn verify(&self) -> Result<()> {
        if self.admitted == self.completed && self.ever_in_flight == self.ever_completed {
            return Ok(());
        }
        Err(CellfetchError::DrainMismatch {
            admitted: self.admitted,
            completed: self.completed,
            unfinished: self.ever_in_flight.difference(&self.ever_completed).count(),
        })
    }
}

/// `workers` fetch threads fed from a bounded channel.
///
/// A throttle stall sleeps only the worker that hit it; the others keep
/// draining the channel.
#[derive(Debug)]
pub struct PoolScheduler {
    workers: usize,
    backlog: VecDeque<WorkItem>,
    /// Next item to hand off, blocked on an identical identifier in flight.
    held: Option<WorkItem>,
    in_flight: InFlightSet,
}

impl PoolScheduler {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            backlog: VecDeque::new(),
            held: None,
            in_flight: InFlightSet::new(),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    fn coordinate(
        &mut self,
        source: &mut SourceReader,
        stage: &Stage,
        sink: &mut SinkWriter,
        work_tx: &Sender<WorkItem>,
        done_rx: &Receiver<Completion>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut ledger = Ledger::default();
        self.admit(source, stage, work_tx, &mut summary, &mut ledger)?;

        while !self.in_flight.is_empty() {
            let Ok(completion) = done_rx.recv() else {
                // every worker is gone; the join in `drain` names the culprit
                break;
            };
            let (identifier, route) = match completion {
                Completion::Finished { identifier, route } => (identifier, route),
                Completion::Panicked { worker } => {
                    return Err(CellfetchError::WorkerPanicked { worker });
                }
            };
            self.in_flight.remove(&identifier);
            ledger.complete(identifier);
            match route {
                Route::Write(record) => {
                    sink.write(&record)?;
                    summary.resolved += 1;
                }
                Route::Requeue(item) => {
                    summary.requeued += 1;
                    self.enqueue(item);
                }
                Route::Drop(_) => summary.dropped += 1,
            }
            self.admit(source, stage, work_tx, &mut summary, &mut ledger)?;
        }

        ledger.verify()?;
        if stage.shutdown().is_raised() {
            self.abandon(source, &mut summary)?;
        }
        summary.checkpoint = source.checkpoint();
        Ok(summary)
    }

    /// Drop everything not yet handed off and rewind the cursor so the next
    /// run reads those rows again.
    fn abandon(&mut self, source: &mut SourceReader, summary: &mut RunSummary) -> Result<()> {
        summary.interrupted = true;
        let mut earliest: Option<Checkpoint> = None;
        for item in self.held.take().into_iter().chain(self.backlog.drain(..)) {
            tracing::warn!(line = item.line_number, id = %item.identifier, "abandoned on shutdown");
            summary.abandoned += 1;
            if earliest.is_none_or(|at| item.origin.byte_offset < at.byte_offset) {
                earliest = Some(item.origin);
            }
        }
        match earliest {
            Some(position) => source.rewind(position),
            None => Ok(()),
        }
    }

    /// Top the pool up to `workers` in-flight items.
    fn admit(
        &mut self,
        source: &mut SourceReader,
        stage: &Stage,
        work_tx: &Sender<WorkItem>,
        summary: &mut RunSummary,
        ledger: &mut Ledger,
    ) -> Result<()> {
        while self.in_flight.len() < self.workers && !stage.shutdown().is_raised() {
            let Some(item) = self.next_candidate(source, summary)? else {
                break;
            };
            let id = item.identifier;
            if !self.in_flight.insert(id) {
                tracing::debug!(target: "cellfetch::pool", line = item.line_number, %id, "already in flight; held");
                self.held = Some(item);
                break;
            }
            let line = item.line_number;
            if let Err(returned) = work_tx.send(item) {
                self.in_flight.remove(&id);
                self.held = Some(returned.into_inner());
                break;
            }
            ledger.admit(id);
            summary.peak_in_flight = summary.peak_in_flight.max(self.in_flight.len());
            tracing::debug!(
                target: "cellfetch::pool",
                line,
                %id,
                in_flight = self.in_flight.len(),
                "admitted"
            );
            // Cursor moves at hand-off, before the outcome is known.
            source.advance()?;
        }
        Ok(())
    }

    /// The held item first, then requeued items, then fresh rows.
    fn next_candidate(
        &mut self,
        source: &mut SourceReader,
        summary: &mut RunSummary,
    ) -> Result<Option<WorkItem>> {
        if let Some(item) = self.held.take() {
            return Ok(Some(item));
        }
        if let Some(item) = self.dequeue() {
            return Ok(Some(item));
        }
        let item = source.next_item()?.map(|entry| {
            summary.read += 1;
            entry.into_work()
        });
        Ok(item)
    }
}

impl Scheduler for PoolScheduler {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn enqueue(&mut self, item: WorkItem) {
        self.backlog.push_back(item);
    }

    fn dequeue(&mut self) -> Option<WorkItem> {
        self.backlog.pop_front()
    }

    fn size(&self) -> usize {
        self.backlog.len() + usize::from(self.held.is_some())
    }

    fn drain(
        &mut self,
        source: &mut SourceReader,
        stage: &Stage,
        sink: &mut SinkWriter,
    ) -> Result<RunSummary> {
        let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(self.workers);
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<Completion>();
        let workers = self.workers;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            let mut spawn_error = None;
            for worker in 0..workers {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("cellfetch-worker-{worker}"))
                    .spawn_scoped(scope, move || run_worker(worker, stage, &work_rx, &done_tx));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        spawn_error = Some(err);
                        break;
                    }
                }
            }
            drop(done_tx);
            tracing::debug!(target: "cellfetch::pool", workers = handles.len(), "workers started");

            let outcome = match spawn_error {
                Some(err) => Err(err.into()),
                None => self.coordinate(source, stage, sink, &work_tx, &done_rx),
            };
            // Closing the channels lets idle workers exit before the join.
            drop(work_tx);
            drop(done_rx);

            let mut panicked = None;
            for (worker, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() && panicked.is_none() {
                    panicked = Some(worker);
                }
            }
            match (outcome, panicked) {
                (Err(err), _) => Err(err),
                (Ok(_), Some(worker)) => Err(CellfetchError::WorkerPanicked { worker }),
                (Ok(summary), None) => Ok(summary),
            }
        })
    }
}

fn run_worker(
    worker: usize,
    stage: &Stage,
    work_rx: &Receiver<WorkItem>,
    done_tx: &Sender<Completion>,
) {
    for item in work_rx {
        let identifier = item.identifier;
        let Ok(route) = catch_unwind(AssertUnwindSafe(|| stage.process(item))) else {
            tracing::error!(worker, id = %identifier, "worker panicked");
            let _ = done_tx.send(Completion::Panicked { worker });
            return;
        };
        let throttled = matches!(route, Route::Requeue(_));
        if done_tx.send(Completion::Finished { identifier, route }).is_err() {
            return;
        }
        if throttled {
            stage.stall();
        }
    }
}

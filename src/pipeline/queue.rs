//! Scheduler seam and the single-worker FIFO implementation.

use std::collections::VecDeque;

use crate::error::Result;
use crate::io::{Checkpoint, SinkWriter, SourceReader};
use crate::pipeline::{Route, RunSummary, Stage};
use crate::types::WorkItem;

/// Moves work from a source through a [`Stage`] into a sink.
///
/// Implementations own their backlog; `enqueue`/`dequeue` operate on it and
/// `drain` runs until both the backlog and the source are exhausted or
/// shutdown is requested.
pub trait Scheduler {
    fn name(&self) -> &'static str;

    /// Append to the back of the backlog.
    fn enqueue(&mut self, item: WorkItem);

    /// Take from the front of the backlog.
    fn dequeue(&mut self) -> Option<WorkItem>;

    fn size(&self) -> usize;

    fn drain(
        &mut self,
        source: &mut SourceReader,
        stage: &Stage,
        sink: &mut SinkWriter,
    ) -> Result<RunSummary>;
}

/// One fetch at a time. A throttle stall blocks all forward progress.
#[derive(Debug, Default)]
pub struct SequentialScheduler {
    queue: VecDeque<WorkItem>,
}

impl SequentialScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop queued items and rewind the cursor to the first of them so a
    /// requeued row is read again by the next run.
    fn abandon(&mut self, source: &mut SourceReader, summary: &mut RunSummary) -> Result<()> {
        summary.interrupted = true;
        let mut earliest: Option<Checkpoint> = None;
        for item in self.queue.drain(..) {
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
}

impl Scheduler for SequentialScheduler {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn enqueue(&mut self, item: WorkItem) {
        self.queue.push_back(item);
    }

    fn dequeue(&mut self) -> Option<WorkItem> {
        self.queue.pop_front()
    }

    fn size(&self) -> usize {
        self.queue.len()
    }

    fn drain(
        &mut self,
        source: &mut SourceReader,
        stage: &Stage,
        sink: &mut SinkWriter,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        'source: loop {
            if stage.shutdown().is_raised() {
                self.abandon(source, &mut summary)?;
                break;
            }
            let Some(entry) = source.next_item()? else {
                break;
            };
            summary.read += 1;
            self.enqueue(entry.into_work());

            while let Some(item) = self.dequeue() {
                // Cursor moves when the item leaves the queue, before its outcome is known.
                source.advance()?;
                summary.peak_in_flight = 1;
                match stage.process(item) {
                    Route::Write(record) => {
                        sink.write(&record)?;
                        summary.resolved += 1;
                    }
                    Route::Requeue(item) => {
                        summary.requeued += 1;
                        self.enqueue(item);
                        stage.stall();
                    }
                    Route::Drop(_) => summary.dropped += 1,
                }
                if stage.shutdown().is_raised() {
                    self.abandon(source, &mut summary)?;
                    break 'source;
                }
            }
        }
        summary.checkpoint = source.checkpoint();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::{FetchClient, HttpResponse, Transport};
    use crate::io::{Checkpoint, CheckpointStore};
    use crate::pipeline::{RetryPolicy, ShutdownSignal};
    use crate::types::FetchConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const OK: &str = r#"{"errcode":0,"lat":"31.23","lon":"121.47","radius":"500","address":"Shanghai"}"#;

    /// Throttles the first `throttled` requests, then succeeds. Requests for
    /// cid 13 always get a "no data" answer.
    /// `throttle_cid` is always throttled and raises `raise_on_throttle` when
    /// it is.
    struct Flaky {
        throttled: usize,
        calls: AtomicUsize,
        throttle_cid: Option<&'static str>,
        raise_on_throttle: Option<ShutdownSignal>,
    }

    impl Transport for Flaky {
        fn get(&self, url: &str, _user_agent: &str) -> std::result::Result<HttpResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.throttled {
                return Ok(HttpResponse::new(403, ""));
            }
            if self.throttle_cid.is_some_and(|cid| url.ends_with(&format!("/{cid}"))) {
                if let Some(signal) = &self.raise_on_throttle {
                    signal.raise();
                }
                return Ok(HttpResponse::new(403, ""));
            }
            if url.ends_with("/13") {
                return Ok(HttpResponse::new(200, r#"{"errcode":10001}"#));
            }
            Ok(HttpResponse::new(200, OK))
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new(rows: &str) -> Self {
            let dir = TempDir::new().expect("tempdir");
            fs_err::write(dir.path().join("cells.csv"), rows).expect("write source");
            Self { dir }
        }

        fn run(&self, transport: Flaky, shutdown: &ShutdownSignal) -> RunSummary {
            let store = CheckpointStore::open(self.dir.path().join("cursor")).expect("store");
            let mut source =
                SourceReader::open(self.dir.path().join("cells.csv"), store).expect("source");
            let mut sink = SinkWriter::open(self.dir.path().join("out.csv"), false).expect("sink");
            let config = FetchConfig::default()
                .primary_url("http://primary/{mcc}/{mnc}/{lac}/{cid}")
                .fallback_url(Some("http://fallback/{mcc}/{mnc}/{lac}/{cid}".into()));
            let stage = Stage::new(
                FetchClient::new(&config, Arc::new(transport)),
                RetryPolicy::new(Duration::ZERO, None),
                false,
                shutdown.clone(),
            );
            SequentialScheduler::new()
                .drain(&mut source, &stage, &mut sink)
                .expect("drain")
        }

        fn output(&self) -> String {
            fs_err::read_to_string(self.dir.path().join("out.csv")).expect("read output")
        }
    }

    fn flaky(throttled: usize) -> Flaky {
        Flaky {
            throttled,
            calls: AtomicUsize::new(0),
            throttle_cid: None,
            raise_on_throttle: None,
        }
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = SequentialScheduler::new();
        for line in 1..=3 {
            queue.enqueue(WorkItem::new(line, crate::types::CellIdentifier::new(1, 2, 3, 4)));
        }
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.dequeue().map(|item| item.line_number), Some(1));
        assert_eq!(queue.dequeue().map(|item| item.line_number), Some(2));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn drains_source_in_order() {
        let fixture = Fixture::new("460,0,2,11\n460,0,2,12\n460,0,2,13\n");
        let summary = fixture.run(flaky(0), &ShutdownSignal::new());
        assert_eq!(summary.read, 3);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.checkpoint, Checkpoint::new(3, 33));
        let output = fixture.output();
        let rows: Vec<&str> = output.lines().skip(1).collect();
        assert_eq!(
            rows,
            [
                "460,0,2,11,31.23,121.47,Shanghai,500",
                "460,0,2,12,31.23,121.47,Shanghai,500",
            ]
        );
    }

    #[test]
    fn throttled_item_is_requeued_until_resolved_once() {
        let fixture = Fixture::new("460,0,2,11\n");
        // primary+fallback throttled twice, then the third primary succeeds
        let summary = fixture.run(flaky(4), &ShutdownSignal::new());
        assert_eq!(summary.requeued, 2);
        assert_eq!(summary.resolved, 1);
        assert_eq!(fixture.output().lines().count(), 2);
    }

    #[test]
    fn requeued_row_abandoned_on_shutdown_is_read_again() {
        let fixture = Fixture::new("460,0,2,11\n460,0,2,12\n460,0,2,14\n");
        let shutdown = ShutdownSignal::new();

        // Row 12 is throttled on both hosts and shutdown lands during the stall.
        let transport = Flaky {
            throttled: 0,
            calls: AtomicUsize::new(0),
            throttle_cid: Some("12"),
            raise_on_throttle: Some(shutdown.clone()),
        };
        let summary = fixture.run(transport, &shutdown);
        assert!(summary.interrupted);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.checkpoint, Checkpoint::new(1, 11));

        // The next run picks the abandoned row up again.
        let summary = fixture.run(flaky(0), &ShutdownSignal::new());
        assert!(!summary.interrupted);
        assert_eq!(summary.read, 2);
        assert_eq!(summary.resolved, 2);
        let output = fixture.output();
        let cids: Vec<&str> = output
            .lines()
            .skip(1)
            .map(|row| row.split(',').nth(3).expect("cid"))
            .collect();
        assert_eq!(cids, ["11", "12", "14"]);
    }

    #[test]
    fn shutdown_stops_before_next_item() {
        let fixture = Fixture::new("460,0,2,11\n460,0,2,12\n");
        let shutdown = ShutdownSignal::new();
        shutdown.raise();
        let summary = fixture.run(flaky(0), &shutdown);
        assert!(summary.interrupted);
        assert_eq!(summary.read, 0);
        assert_eq!(summary.checkpoint, Checkpoint::default());
    }
}

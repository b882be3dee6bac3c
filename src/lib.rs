#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(clippy::uninlined_format_args, clippy::float_cmp)
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing; public APIs still
// carry docs where the behavior is not obvious from the signature.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Byte offsets and line counts are u64 on disk and usize in memory.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]
//
// Pattern matching: these pedantic lints often reduce clarity.
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
//
#![allow(clippy::needless_pass_by_value)] // Work items move through the pipeline by value
#![allow(clippy::return_self_not_must_use)] // Builder setters
#![allow(clippy::unreadable_literal)] // Hex-packed key fields
#![allow(clippy::len_without_is_empty)]

//! Resumable, rate-limit aware geolocation lookup for cell tower identifiers.
//!
//! A run reads `mcc,mnc,lac,cid` rows from a source file starting at a
//! persisted cursor, resolves each row against an HTTP lookup service and
//! appends resolved rows to an output dataset. Throttled lookups go through a
//! fallback endpoint and are requeued when that is throttled too.

/// The cellfetch crate version (matches `Cargo.toml`).
pub const CELLFETCH_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod codec;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod io;
mod lock;
pub mod pipeline;
pub mod types;

pub use error::{CellfetchError, FetchFailure, Result, TransportError};
pub use fetch::{Endpoint, FetchClient, HttpResponse, Transport, UrlTemplate};
#[cfg(feature = "http")]
pub use fetch::transport::ReqwestTransport;
pub use io::{
    Checkpoint, CheckpointStore, SinkWriter, SourceItem, SourceReader, position_of_line,
};
pub use lock::FileLock;
pub use pipeline::{
    InFlightSet, Pipeline, PoolScheduler, RetryPolicy, Route, RunSummary, Scheduler,
    SequentialScheduler, ShutdownSignal, Stage, check_line,
};
pub use types::{
    CellIdentifier, CellRecord, CellfetchConfig, FetchConfig, PipelineOptions, ResponseFormat,
    Scheduling, WorkItem, default_output_path,
};

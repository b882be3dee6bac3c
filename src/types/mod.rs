//! Public types exposed by the `cellfetch` crate.

pub mod cell;
pub mod options;

pub use cell::{CellIdentifier, CellRecord, WorkItem};
pub use options::{
    CellfetchConfig, FetchConfig, PipelineOptions, ResponseFormat, Scheduling,
    default_output_path,
};

//! On-disk pieces of the pipeline: cursor, source and sink.

pub mod checkpoint;
pub mod sink;
pub mod source;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use sink::SinkWriter;
pub use source::{SourceItem, SourceReader, position_of_line};

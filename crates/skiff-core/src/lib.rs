pub mod batch;
pub mod error;

pub use batch::{BatchHeader, RecordBatch};
pub use error::{Error, Result};

pub mod entry;
pub mod error;
pub mod metrics;

pub use entry::*;
pub use error::*;
pub use metrics::*;

//! Reading aggregation and the rolling buffer
pub mod reading_aggregator;
pub mod rolling_buffer;

pub use reading_aggregator::{Aggregator, IngestOutcome};
pub use rolling_buffer::RollingBuffer;

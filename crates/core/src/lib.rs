pub mod clock;
pub mod config;
pub mod metrics;
pub mod report;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use metrics::{MemorySink, MetricSink};
pub use report::*;

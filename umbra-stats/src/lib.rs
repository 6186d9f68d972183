#![forbid(unsafe_code)]

pub mod collector;
pub mod ks;
pub mod series;
pub mod truncnorm;
pub mod window;

pub use collector::{Aggregation, Collector, PercentileKey};
pub use ks::{ks_rejects, Confidence};
pub use series::SeriesCollector;
pub use truncnorm::sample_truncated_normal;
pub use window::WindowCollector;

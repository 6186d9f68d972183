#![forbid(unsafe_code)]

pub mod aggregator;
pub mod cookies;
pub mod fetcher;
pub mod profiler;
pub mod priority;
pub mod writer;

pub use aggregator::PriorityVisitAggregator;
pub use fetcher::{PriorityFetcher, StaticPriorityFetcher};
pub use profiler::{DimmingProbabilities, Profiler};
pub use priority::Priority;
pub use writer::{NoopRequestWriter, RequestWriter, TracingRequestWriter};

#![forbid(unsafe_code)]

pub mod path_probabilities;
pub mod request_filter;

pub use path_probabilities::{PathProbabilities, PathProbabilityRule};
pub use request_filter::RequestFilter;

/// Paths are matched insensitively to their leading slash. Rules are stored
/// under both spellings at insert time so lookups on the request path stay
/// allocation-free.
pub(crate) fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#![forbid(unsafe_code)]

pub mod cohort;
pub mod offline;
pub mod online;

pub use cohort::Cohort;
pub use offline::OfflineTraining;
pub use online::{OnlineTrainer, TrainerCore};

#![forbid(unsafe_code)]

pub mod control_loop;
pub mod pid;

pub use control_loop::{ControlLoopCore, DimmingControlLoop};
pub use pid::{PidController, PidSnapshot};

#![forbid(unsafe_code)]

//! The Umbra daemon: a reverse proxy that selectively sheds requests to
//! optional endpoints so the backend's tail response time tracks a setpoint.

pub mod api;
pub mod bootstrap;
pub mod cookies;
pub mod mode;
pub mod proxy;
pub mod server;

pub use bootstrap::{build_server, build_server_with_proxy};
pub use mode::DimmingMode;
pub use proxy::{empty_body, full_body, HttpProxy, Proxy, ProxyBody};
pub use server::{Server, ServerOptions};

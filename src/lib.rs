//! scopecast: streams synthetic float32 telemetry to browser charts.
//!
//! A server holds one WebSocket per client and pushes frames of
//! little-endian `f32` samples for the client to draw as scrolling traces.
//!
//! Features:
//! - Three flow-control policies: demand-driven, interval-driven, adaptive
//! - Header-less binary frames (length = 4 x sample count)
//! - One independent, cancellable session task per connection
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod frame;
pub mod generator;
pub mod page;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{Config, ConfigError, SessionConfig};
pub use policy::{AdaptiveRequester, FlowPolicy, PolicyKind};
pub use server::Server;
pub use session::{CloseReason, Session, SessionError, SessionState, SessionStats};

//! # Tunnel Protocol
//!
//! The wire contract shared between a relay instance and the agents that
//! connect to it, and between relay instances on the fleet-wide broadcast
//! bus. Both `relay-server` and `relay-agent` depend on this crate so the
//! two sides of the control channel can never drift apart.
//!
//! ## Modules
//!
//! - [`control`]  — control-channel frames exchanged over the agent↔relay
//!   WebSocket (JSON text frames, tagged by `type`).
//! - [`bus`]      — broadcast-bus message envelopes exchanged between relay
//!   instances (`req`, `resp`, `activity`, `hc-req`, `hc-resp` channels).
//! - [`service`]  — the `ServiceConfig` an agent advertises and the body
//!   shapes carried by `httpRequest`/`httpResponse`.
//! - [`health`]   — the health-probe vocabulary (`LocalServiceStatus`,
//!   `TunnelStatus`, `HealthStatusReport`).
//! - [`codec`]    — the text-like/base64 body encoding rule used
//!   identically on both ends of the tunnel.

pub mod bus;
pub mod codec;
pub mod control;
pub mod health;
pub mod service;

pub use bus::BroadcastMessage;
pub use control::{ControlMessage, ReconnectedData, RegisterData, RegisteredData};
pub use health::{HealthStatusReport, LocalServiceStatus, TunnelStatus};
pub use service::{HttpRequestData, HttpResponseData, ServiceConfig, ServiceType};

//! WebSocket side of the veadotube client.
//!
//! - [`protocol`]: inbound frame decoding and routing
//! - [`transport`]: endpoint construction and WebSocket helpers
//! - [`connection`]: per-instance session with handshake and reconnect
//! - [`client`]: discovery-driven control loop over all instances
//! - [`error`]: error type and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use veado_core::config::ClientConfig;
//! use veado_rpc::{ClientEvent, ConnectionEvent, ConnectionEventKind, VeadoClient};
//!
//! # async fn example() -> Result<(), veado_rpc::Error> {
//! let (mut client, mut events) = VeadoClient::start(ClientConfig::default())?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Connection(ConnectionEvent {
//!         instance_id,
//!         kind: ConnectionEventKind::Connected,
//!         ..
//!     }) = event
//!     {
//!         client.set_avatar_state(&instance_id, "happy").await?;
//!     }
//! }
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{ClientEvent, VeadoClient};
pub use connection::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionInfo, ConnectionSettings,
    ConnectionState, ReconnectPolicy,
};
pub use error::{Error, Result};
pub use protocol::{
    DecodeError, Frame, ProtocolEvent, ResultMessage, ResultPayload, decode_frame,
};

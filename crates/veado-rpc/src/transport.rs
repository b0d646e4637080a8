//! WebSocket transport helpers.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::{Error, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Endpoint for an instance server (`host:port`), labelled with the
/// connection name. The root path is explicit so the request target is
/// `/?n=...`.
#[must_use]
pub fn build_uri(server: &str, name: &str) -> String {
    format!("ws://{server}/?n={}", urlencoding::encode(name))
}

/// Open a WebSocket connection, giving up after `timeout`.
///
/// # Errors
///
/// Returns the handshake error, or [`Error::ConnectTimeout`].
pub async fn connect(uri: &str, timeout: Duration) -> Result<WsStream> {
    match tokio::time::timeout(timeout, connect_async(uri)).await {
        Ok(Ok((ws, response))) => {
            debug!("Connected to {} ({})", uri, response.status());
            Ok(ws)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::ConnectTimeout(uri.to_string())),
    }
}

/// An inbound WebSocket message, reduced to what a session acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Close { code: Option<u16>, reason: String },
    /// Control frames and undecodable binary frames
    Ignored,
}

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Inbound::Text(text),
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Inbound::Text(text),
                Err(e) => {
                    debug!("Dropping non-UTF-8 binary frame: {}", e);
                    Inbound::Ignored
                }
            },
            Message::Close(frame) => {
                let (code, reason) = close_details(frame);
                Inbound::Close { code, reason }
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Ignored,
        }
    }
}

fn close_details(frame: Option<CloseFrame<'_>>) -> (Option<u16>, String) {
    frame.map_or((None, String::new()), |frame| {
        (Some(u16::from(frame.code)), frame.reason.into_owned())
    })
}

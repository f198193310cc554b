//! Frame transport seam and its WebSocket implementation.
//!
//! Sessions talk to clients through [`FrameReader`] and [`FrameWriter`], so
//! the session state machine runs unchanged over a real socket or over the
//! harness's in-memory channels.

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Message as WsMessage,
        handshake::server::{ErrorResponse, Request, Response},
        http::{StatusCode, header::AUTHORIZATION},
    },
};

use crate::auth::{AuthError, Authenticator, Identity};

/// Transport-level failures. Fatal for the session that hits them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Reading from the client failed
    #[error("read failed: {0}")]
    Read(String),

    /// Writing to the client failed
    #[error("write failed: {0}")]
    Write(String),

    /// The opening handshake failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The client did not authenticate
    #[error("unauthorized: {0}")]
    Unauthorized(AuthError),
}

/// One inbound application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame, expected to hold UTF-8 JSON
    Binary(Vec<u8>),
}

impl WireFrame {
    /// Raw payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Inbound half of a client connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next application frame. `Ok(None)` when the client closed cleanly.
    ///
    /// Must be cancel safe.
    async fn next_frame(&mut self) -> Result<Option<WireFrame>, TransportError>;
}

/// Outbound half of a client connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one text frame.
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Close the connection. Called once, by the session's closing path.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reading half of an accepted WebSocket.
pub struct WsReader {
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

/// Writing half of an accepted WebSocket.
pub struct WsWriter {
    sink: SplitSink<WebSocketStream<TcpStream>, WsMessage>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Result<Option<WireFrame>, TransportError> {
        loop {
            let Some(next) = self.stream.next().await else {
                return Ok(None);
            };
            match next.map_err(|e| TransportError::Read(e.to_string()))? {
                WsMessage::Text(text) => return Ok(Some(WireFrame::Text(text.as_str().to_owned()))),
                WsMessage::Binary(bytes) => return Ok(Some(WireFrame::Binary(bytes.to_vec()))),
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {},
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::Text(payload.to_owned().into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(|e| TransportError::Write(e.to_string()))
    }
}

/// Complete the WebSocket handshake on `stream`, authenticating the bearer
/// token before upgrading.
///
/// A missing or invalid token is answered with HTTP 401 and no upgrade.
pub async fn accept(
    stream: TcpStream,
    authenticator: &dyn Authenticator,
) -> Result<(Identity, WsReader, WsWriter), TransportError> {
    let mut outcome: Option<Result<Identity, AuthError>> = None;

    let callback = |request: &Request, response: Response| {
        let result = bearer_token(request)
            .ok_or(AuthError::MissingToken)
            .and_then(|token| authenticator.authenticate(&token));

        let verdict = match &result {
            Ok(_) => Ok(response),
            Err(_) => {
                let mut rejection = ErrorResponse::new(Some("unauthorized".to_string()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            },
        };
        outcome = Some(result);
        verdict
    };

    let handshake = accept_hdr_async(stream, callback).await;

    let identity = match outcome {
        Some(Ok(identity)) => identity,
        Some(Err(e)) => return Err(TransportError::Unauthorized(e)),
        None => {
            let reason =
                handshake.err().map_or_else(|| "no request".to_string(), |e| e.to_string());
            return Err(TransportError::Handshake(reason));
        },
    };
    let socket = handshake.map_err(|e| TransportError::Handshake(e.to_string()))?;

    let (sink, stream) = socket.split();
    Ok((identity, WsReader { stream }, WsWriter { sink }))
}

/// Bearer token from the `Authorization` header, falling back to a `token`
/// query parameter.
pub fn bearer_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn token_from_header() {
        let req = request("/ws", Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&req).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn token_from_query() {
        let req = request("/ws?room=1&token=abc.def.ghi", None);
        assert_eq!(bearer_token(&req).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn header_wins_over_query() {
        let req = request("/ws?token=query", Some("Bearer header"));
        assert_eq!(bearer_token(&req).as_deref(), Some("header"));
    }

    #[test]
    fn missing_or_malformed_token() {
        assert!(bearer_token(&request("/ws", None)).is_none());
        assert!(bearer_token(&request("/ws", Some("Basic dXNlcg=="))).is_none());
        assert!(bearer_token(&request("/ws?token=", None)).is_none());
    }

    #[test]
    fn binary_frames_yield_raw_bytes() {
        assert_eq!(WireFrame::Text("hi".into()).into_bytes(), b"hi");
        assert_eq!(WireFrame::Binary(vec![1, 2]).into_bytes(), [1, 2]);
    }
}

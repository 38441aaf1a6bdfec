//! WebSocket endpoint: handshake auth, admission and the per-connection
//! reader loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use courier_call::TokenValidator;
use courier_hub::{Connection, FrameSink};

use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// `GET /ws` -- the transport upgrade. The token comes from the
/// `Authorization` header (raw or `Bearer `-prefixed) or the `token`
/// query parameter; admission requires it to equal the configured
/// shared secret or to pass the pluggable token validator. Failure is a
/// 401 before any handshake happens.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    if !authorized(
        &headers,
        query.token.as_deref(),
        &state.config.shared_secret,
        state.validator.as_ref(),
    ) {
        warn!("rejecting websocket upgrade: bad token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

fn authorized(
    headers: &HeaderMap,
    query_token: Option<&str>,
    secret: &str,
    validator: &dyn TokenValidator,
) -> bool {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value));

    match header_token.or(query_token) {
        Some(token) => token == secret || validator.validate(token).is_ok(),
        None => false,
    }
}

/// The writer half of the transport, owned by the connection's writer task.
struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

impl FrameSink for WsSink {
    async fn send_text(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        let text = String::from_utf8(payload)?;
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn send_binary(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.sink.send(Message::Binary(payload.into())).await?;
        Ok(())
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.sink.send(Message::Pong(payload.into())).await?;
        Ok(())
    }
}

async fn handle_socket(transport: WebSocket, state: AppState) {
    let (sink, mut stream) = transport.split();
    let connection = Connection::open(WsSink { sink });

    // Admission happens after the upgrade; over capacity, the transport
    // is closed before any socket exists.
    let socket = match state.hub.admit(connection.clone()) {
        Ok(socket) => socket,
        Err(error) => {
            warn!(%error, "rejecting connection");
            connection.shutdown();
            return;
        }
    };

    info!(socket = socket.id(), "client connected");
    state.hub.trigger_handlers("connect", &socket);

    if let Err(error) = state.hub.deliver_offline(&socket) {
        warn!(%error, socket = socket.id(), "offline drain failed");
    }

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                debug!(socket = socket.id(), %error, "read error, closing");
                break;
            }
        };

        match frame {
            Message::Text(text) => state.dispatcher.dispatch(&socket, text.as_bytes()),
            Message::Binary(payload) => {
                state.dispatcher.dispatch_binary(&socket, payload.to_vec())
            }
            Message::Ping(payload) => socket.connection().write_pong(payload.to_vec()),
            Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    state.dispatcher.handle_disconnect(&socket);
    state.hub.remove(socket.id());
    state.hub.trigger_handlers("close", &socket);
    connection.shutdown();

    info!(socket = socket.id(), "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use courier_call::TokenError;

    /// Accepts exactly one token, standing in for a real identity
    /// provider.
    struct ExactTokenValidator;

    impl TokenValidator for ExactTokenValidator {
        fn validate(&self, token: &str) -> Result<String, TokenError> {
            if token == "valid-jwt" {
                Ok("user123".to_string())
            } else {
                Err(TokenError::Invalid)
            }
        }
    }

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn header_token_raw_and_bearer() {
        let v = ExactTokenValidator;
        assert!(authorized(&headers_with_auth("s3cret"), None, "s3cret", &v));
        assert!(authorized(
            &headers_with_auth("Bearer s3cret"),
            None,
            "s3cret",
            &v
        ));
        assert!(!authorized(&headers_with_auth("wrong"), None, "s3cret", &v));
    }

    #[test]
    fn query_token_is_a_fallback() {
        let v = ExactTokenValidator;
        assert!(authorized(&HeaderMap::new(), Some("s3cret"), "s3cret", &v));
        assert!(!authorized(&HeaderMap::new(), Some("wrong"), "s3cret", &v));
        assert!(!authorized(&HeaderMap::new(), None, "s3cret", &v));
    }

    #[test]
    fn validator_admits_when_the_secret_does_not_match() {
        let v = ExactTokenValidator;
        assert!(authorized(
            &headers_with_auth("valid-jwt"),
            None,
            "s3cret",
            &v
        ));
        assert!(authorized(
            &headers_with_auth("Bearer valid-jwt"),
            None,
            "s3cret",
            &v
        ));
        assert!(authorized(&HeaderMap::new(), Some("valid-jwt"), "s3cret", &v));
        assert!(!authorized(
            &headers_with_auth("expired-jwt"),
            None,
            "s3cret",
            &v
        ));
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let v = ExactTokenValidator;
        assert!(!authorized(
            &headers_with_auth("wrong"),
            Some("s3cret"),
            "s3cret",
            &v
        ));
    }
}

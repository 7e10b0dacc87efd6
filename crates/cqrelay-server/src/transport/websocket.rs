//! WebSocket plumbing using tokio-tungstenite.
//!
//! The client side is accepted with a header callback that enforces the
//! configured path and bearer token before the upgrade completes; the
//! upstream side is dialed with the access token in a header or in the query
//! string.

use crate::auth;
use crate::config::UpstreamAuth;
use cqrelay_core::{RelayError, RelayResult};
use futures_util::{Sink, SinkExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Connection from a bot client.
pub type ClientStream = WebSocketStream<TcpStream>;
/// Connection to the OneBot implementation.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on writing a close frame during teardown.
pub const CLOSE_DEADLINE: Duration = Duration::from_secs(1);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Complete the WebSocket handshake on an accepted TCP stream.
///
/// Requests for another path get 404 and requests without the configured
/// bearer token get 401; neither is upgraded.
pub async fn accept(
    stream: TcpStream,
    remote: SocketAddr,
    path: &str,
    access_token: Option<&str>,
) -> RelayResult<ClientStream> {
    let rid = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        info!(
            rid,
            method = %request.method(),
            path = %request.uri().path(),
            remote = %remote,
            "upgrade request"
        );
        if request.uri().path() != path {
            warn!(rid, remote = %remote, path = %request.uri().path(), "unknown path");
            return Err(reject(StatusCode::NOT_FOUND, "not found"));
        }
        if let Err(e) = auth::check_bearer(request.headers(), access_token) {
            warn!(rid, remote = %remote, error = %e, "rejected unauthorized client");
            return Err(reject(StatusCode::UNAUTHORIZED, "unauthorized"));
        }
        Ok(response)
    };

    let result = tokio_tungstenite::accept_hdr_async(stream, callback).await;

    let status = match &result {
        Ok(_) => StatusCode::SWITCHING_PROTOCOLS.as_u16(),
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(_) => 0,
    };
    info!(
        rid,
        status,
        duration_ms = started.elapsed().as_millis() as u64,
        "upgrade finished"
    );

    result.map_err(|e| RelayError::Transport(format!("WS handshake failed: {e}")))
}

/// Dial the upstream WebSocket, presenting the access token as configured.
pub async fn dial_upstream(url: &str, auth: &UpstreamAuth) -> RelayResult<UpstreamStream> {
    let target = match auth {
        UpstreamAuth::Query(token) => with_query_token(url, token)?,
        UpstreamAuth::None | UpstreamAuth::Bearer(_) => url.to_string(),
    };

    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::Transport(format!("invalid upstream url: {e}")))?;

    if let UpstreamAuth::Bearer(token) = auth {
        let value = HeaderValue::from_str(&auth::bearer_value(token))
            .map_err(|e| RelayError::Config(format!("invalid upstream token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| RelayError::Transport(format!("upstream dial failed: {e}")))?;

    debug!(url, status = response.status().as_u16(), "upstream connected");
    Ok(stream)
}

/// Set `access_token=<token>` on a URL, replacing any existing value.
fn with_query_token(url: &str, token: &str) -> RelayResult<String> {
    let mut parsed = reqwest::Url::parse(url)
        .map_err(|e| RelayError::Config(format!("invalid upstream url {url:?}: {e}")))?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != "access_token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("access_token", token);

    Ok(parsed.to_string())
}

/// Best-effort close frame, bounded by [`CLOSE_DEADLINE`].
pub async fn send_close<S>(sink: &mut S, code: CloseCode, reason: &str)
where
    S: Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    match tokio::time::timeout(CLOSE_DEADLINE, sink.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => debug!(?code, "close frame not delivered, peer already gone"),
        Err(_) => debug!(?code, "close frame timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::net::TcpListener;

    #[test]
    fn query_token_is_appended() {
        assert_eq!(
            with_query_token("ws://127.0.0.1:3001/", "t0k").unwrap(),
            "ws://127.0.0.1:3001/?access_token=t0k"
        );
    }

    #[test]
    fn query_token_replaces_existing() {
        assert_eq!(
            with_query_token("ws://h:1/ws?a=1&access_token=old", "new").unwrap(),
            "ws://h:1/ws?a=1&access_token=new"
        );
    }

    async fn spawn_accept(
        path: &'static str,
        token: Option<&'static str>,
    ) -> (SocketAddr, tokio::task::JoinHandle<RelayResult<ClientStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, remote) = listener.accept().await.unwrap();
            accept(stream, remote, path, token).await
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn accept_checks_bearer_token() {
        let (addr, handle) = spawn_accept("/ws", Some("s3cret")).await;

        let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap_err();
        match err {
            WsError::Http(response) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(handle.await.unwrap().is_err());

        let (addr, handle) = spawn_accept("/ws", Some("s3cret")).await;
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        let (mut client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        let mut server = handle.await.unwrap().unwrap();

        client.send(Message::Text("ping".into())).await.unwrap();
        assert_eq!(server.next().await.unwrap().unwrap(), Message::Text("ping".into()));
    }

    #[tokio::test]
    async fn accept_rejects_other_paths() {
        let (addr, handle) = spawn_accept("/ws", None).await;
        let err = tokio_tungstenite::connect_async(format!("ws://{addr}/other"))
            .await
            .unwrap_err();
        match err {
            WsError::Http(response) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn dial_presents_bearer_header() {
        let (addr, handle) = spawn_accept("/", Some("up-token")).await;
        let auth = UpstreamAuth::Bearer("up-token".into());
        let _upstream = dial_upstream(&format!("ws://{addr}/"), &auth).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dial_presents_query_token_without_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut seen = None;
            let callback =
                |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    seen = Some((
                        request.uri().query().map(str::to_string),
                        request.headers().contains_key(AUTHORIZATION),
                    ));
                    Ok(response)
                };
            let _ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            seen.unwrap()
        });

        let auth = UpstreamAuth::Query("q-token".into());
        let _upstream = dial_upstream(&format!("ws://{addr}/ws?self_id=1"), &auth)
            .await
            .unwrap();

        let (query, has_authorization) = handle.await.unwrap();
        assert_eq!(query.as_deref(), Some("self_id=1&access_token=q-token"));
        assert!(!has_authorization);
    }

    #[tokio::test]
    async fn dial_failure_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = dial_upstream(&format!("ws://{addr}/"), &UpstreamAuth::None).await;
        assert!(matches!(result, Err(RelayError::Transport(_))));
    }
}

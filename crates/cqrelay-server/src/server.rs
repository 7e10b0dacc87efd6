//! Connection gateway: accepts clients, dials the upstream and hands each
//! pair of connections to a [`Session`].

use crate::config::RelayConfig;
use crate::media::{MediaResolver, UploadClient};
use crate::session::Session;
use crate::transport::websocket::{self, send_close};
use cqrelay_core::{RelayError, RelayResult, Resolve, Rewriter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

/// The relay server.
pub struct RelayServer<R> {
    config: RelayConfig,
    /// Shared by every session; the resolver holds the HTTP client pool.
    rewriter: Arc<Rewriter<R>>,
    next_session_id: AtomicU64,
}

impl RelayServer<MediaResolver> {
    /// Server backed by the configured upload service.
    pub fn new(config: RelayConfig) -> Self {
        let uploader = UploadClient::new(config.upload_endpoint.clone());
        Self::with_resolver(config, MediaResolver::new(uploader))
    }
}

impl<R: Resolve + 'static> RelayServer<R> {
    pub fn with_resolver(config: RelayConfig, resolver: R) -> Self {
        Self {
            config,
            rewriter: Arc::new(Rewriter::new(resolver)),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(self) -> RelayResult<()> {
        let listener = TcpListener::bind(self.config.listen).await.map_err(|e| {
            RelayError::Transport(format!("failed to bind {}: {e}", self.config.listen))
        })?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> RelayResult<()> {
        let local = listener.local_addr()?;
        let server = Arc::new(self);

        info!(
            listen = %local,
            path = %server.config.path,
            upstream = %server.config.upstream_url,
            upload = %server.config.upload_endpoint,
            auth = server.config.access_token.is_some(),
            "cqrelay ready"
        );

        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let srv = server.clone();
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream, remote).await {
                    debug!(remote = %remote, error = %e, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, remote: SocketAddr) -> RelayResult<()> {
        let mut client = websocket::accept(
            stream,
            remote,
            &self.config.path,
            self.config.access_token.as_deref(),
        )
        .await?;

        let upstream =
            match websocket::dial_upstream(&self.config.upstream_url, &self.config.upstream_auth)
                .await
            {
                Ok(upstream) => upstream,
                Err(e) => {
                    warn!(remote = %remote, error = %e, "upstream unavailable, closing client");
                    send_close(&mut client, CloseCode::Again, "upstream dial error").await;
                    drop(client);
                    return Ok(());
                }
            };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        Session::new(id, remote, client, upstream, self.rewriter.clone())
            .run()
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogConfig, LogFormat, UpstreamAuth};
    use cqrelay_core::ResolvedMedia;
    use futures_util::{SinkExt, StreamExt};
    use std::future::Future;
    use std::pin::Pin;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
    use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    struct UploadedResolver;

    impl Resolve for UploadedResolver {
        fn resolve<'a>(
            &'a self,
            reference: &'a str,
            suggested_name: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = ResolvedMedia> + Send + 'a>> {
            Box::pin(async move {
                if reference == "/missing.png" {
                    return ResolvedMedia::failed();
                }
                ResolvedMedia {
                    remote_url: Some("https://files.example/u/1.png".into()),
                    local_path: None,
                    display_name: suggested_name.unwrap_or("1.png").to_string(),
                }
            })
        }
    }

    fn config(upstream_url: String, access_token: Option<&str>, auth: UpstreamAuth) -> RelayConfig {
        RelayConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            path: "/ws".into(),
            access_token: access_token.map(String::from),
            upstream_url,
            upstream_auth: auth,
            upload_endpoint: "http://127.0.0.1:9/upload".into(),
            log: LogConfig {
                level: "debug".into(),
                format: LogFormat::Text,
                file: None,
                console: true,
            },
        }
    }

    async fn start(config: RelayConfig) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = RelayServer::with_resolver(config, UploadedResolver);
        tokio::spawn(server.serve(listener));
        addr
    }

    fn unused_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/")
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let addr = start(config(unused_port_url(), Some("s3cret"), UpstreamAuth::None)).await;

        let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap_err();
        match err {
            WsError::Http(response) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn dial_failure_closes_with_try_again_later() {
        let addr = start(config(unused_port_url(), None, UpstreamAuth::None)).await;

        let (mut client, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

        match client.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Again);
                assert_eq!(frame.reason, "upstream dial error");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relays_and_rewrites_end_to_end() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        let backend_task = tokio::spawn(async move {
            let (stream, remote) = backend.accept().await.unwrap();
            websocket::accept(stream, remote, "/", Some("up-token"))
                .await
                .unwrap()
        });

        let addr = start(config(
            format!("ws://{backend_addr}/"),
            Some("s3cret"),
            UpstreamAuth::Bearer("up-token".into()),
        ))
        .await;

        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        let (mut client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        let mut backend = backend_task.await.unwrap();

        let command = serde_json::json!({
            "action": "send_group_msg",
            "params": {
                "group_id": 42,
                "message": [
                    {"type": "text", "data": {"text": "hi "}},
                    {"type": "image", "data": {"file": "/tmp/a.png"}},
                    {"type": "image", "data": {"file": "/missing.png"}}
                ]
            }
        });
        client
            .send(Message::Text(command.to_string()))
            .await
            .unwrap();

        let received = loop {
            match backend.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    break serde_json::from_str::<serde_json::Value>(&text).unwrap()
                }
                _ => continue,
            }
        };
        assert_eq!(received["params"]["group_id"], 42);
        let segments = &received["params"]["message"];
        assert_eq!(segments[0]["data"]["text"], "hi ");
        assert_eq!(segments[1]["data"]["file"], "https://files.example/u/1.png");
        assert_eq!(segments[1]["data"]["url"], "https://files.example/u/1.png");
        // Unresolvable references are left alone.
        assert_eq!(segments[2]["data"]["file"], "/missing.png");

        backend
            .send(Message::Text(r#"{"status":"ok","retcode":0}"#.into()))
            .await
            .unwrap();
        let reply = loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        assert_eq!(reply, r#"{"status":"ok","retcode":0}"#);
    }
}

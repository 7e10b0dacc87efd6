//! Each direction runs in its own task. Frames from the client pass through
//! the [`Rewriter`]; frames from the upstream are forwarded verbatim. When a
//! direction stops reading it tells the opposite peer with a normal-closure
//! frame, and the session ends once both directions have exited.

use crate::transport::websocket::{send_close, CLOSE_DEADLINE};
use crate::transport::{ClientStream, UpstreamStream};
use cqrelay_core::{Resolve, Rewriter};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both directions are forwarding.
    Established,
    /// One direction has exited; waiting for the other.
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ClientToUpstream => "client->upstream",
            Direction::UpstreamToClient => "upstream->client",
        })
    }
}

pub struct Session<R> {
    id: u64,
    remote: SocketAddr,
    client: ClientStream,
    upstream: UpstreamStream,
    rewriter: Arc<Rewriter<R>>,
    state: watch::Sender<SessionState>,
}

impl<R: Resolve + 'static> Session<R> {
    pub fn new(
        id: u64,
        remote: SocketAddr,
        client: ClientStream,
        upstream: UpstreamStream,
        rewriter: Arc<Rewriter<R>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Established);
        Self {
            id,
            remote,
            client,
            upstream,
            rewriter,
            state,
        }
    }

    /// Watch the session's lifecycle.
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Relay frames until both directions have exited.
    pub async fn run(self) {
        let Session {
            id,
            remote,
            client,
            upstream,
            rewriter,
            state,
        } = self;

        info!(session = id, remote = %remote, "session established");

        let (client_sink, client_source) = client.split();
        let (upstream_sink, upstream_source) = upstream.split();

        let mut uplink = tokio::spawn(forward(
            id,
            Direction::ClientToUpstream,
            client_source,
            upstream_sink,
            Some(rewriter),
        ));
        let mut downlink = tokio::spawn(forward::<_, _, R>(
            id,
            Direction::UpstreamToClient,
            upstream_source,
            client_sink,
            None,
        ));

        let (uplink, downlink) = tokio::select! {
            result = &mut uplink => {
                transition(&state, id, SessionState::Closing);
                (result, downlink.await)
            }
            result = &mut downlink => {
                transition(&state, id, SessionState::Closing);
                (uplink.await, result)
            }
        };

        match uplink {
            Ok(sink) => close_sink(id, sink).await,
            Err(e) => warn!(session = id, error = %e, "client->upstream task failed"),
        }
        match downlink {
            Ok(sink) => close_sink(id, sink).await,
            Err(e) => warn!(session = id, error = %e, "upstream->client task failed"),
        }

        transition(&state, id, SessionState::Closed);
        info!(session = id, remote = %remote, "session closed");
    }
}

fn transition(state: &watch::Sender<SessionState>, id: u64, next: SessionState) {
    let previous = state.send_replace(next);
    debug!(session = id, from = ?previous, to = ?next, "session state changed");
}

/// Pump frames from `source` into `sink` until either side fails.
///
/// Returns the sink so the session can close it after both directions end.
async fn forward<St, Si, R>(
    id: u64,
    direction: Direction,
    mut source: St,
    mut sink: Si,
    rewriter: Option<Arc<Rewriter<R>>>,
) -> Si
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message, Error = WsError> + Unpin,
    R: Resolve,
{
    let mut frames: u64 = 0;

    loop {
        let message = match source.next().await {
            Some(Ok(Message::Close(frame))) => {
                debug!(session = id, %direction, ?frame, "peer closed");
                send_close(&mut sink, CloseCode::Normal, "").await;
                break;
            }
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(session = id, %direction, error = %e, "read failed");
                send_close(&mut sink, CloseCode::Normal, "").await;
                break;
            }
            None => {
                debug!(session = id, %direction, "stream ended");
                send_close(&mut sink, CloseCode::Normal, "").await;
                break;
            }
        };

        let message = match (message, rewriter.as_deref()) {
            (Message::Text(text), Some(rewriter)) => match rewriter.try_rewrite(&text).await {
                Some(rewritten) => {
                    debug!(
                        session = id,
                        before = text.len(),
                        after = rewritten.len(),
                        "frame rewritten"
                    );
                    Message::Text(rewritten)
                }
                None => Message::Text(text),
            },
            (message, _) => message,
        };

        if let Err(e) = sink.send(message).await {
            debug!(session = id, %direction, error = %e, "write failed");
            break;
        }
        frames += 1;
    }

    debug!(session = id, %direction, frames, "direction finished");
    sink
}

async fn close_sink<S>(id: u64, mut sink: S)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(CLOSE_DEADLINE, sink.close()).await {
        Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {}
        Ok(Err(e)) => debug!(session = id, error = %e, "close failed"),
        Err(_) => debug!(session = id, "close timed out"),
    }
}

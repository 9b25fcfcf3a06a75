//! WebSocket fan-out server
//!
//! Each subscriber picks a channel through the `Sec-WebSocket-Protocol`
//! header (`can-raw-relay` or `can-raw-delta`; no header means
//! `can-raw-relay`). Every dispatched line becomes one text message.
//!
//! Delivery is fire-and-forget: lines go into a bounded broadcast buffer and
//! subscribers that fall behind simply lose the oldest lines.

use crate::dispatch::{Channel, Dispatcher};
use crate::transport::TransportConfig;
use crate::types::{RelayError, Result};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;

/// Lines buffered per channel before slow subscribers start losing data
const CHANNEL_BUFFER: usize = 256;

/// How long `destroy` waits for sessions to send their close frames
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-channel broadcast senders
#[derive(Debug)]
struct Hub {
    raw_relay: broadcast::Sender<Arc<str>>,
    delta: broadcast::Sender<Arc<str>>,
    closed: AtomicBool,
}

impl Hub {
    fn new() -> Self {
        Self {
            raw_relay: broadcast::channel(CHANNEL_BUFFER).0,
            delta: broadcast::channel(CHANNEL_BUFFER).0,
            closed: AtomicBool::new(false),
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<Arc<str>> {
        match channel {
            Channel::RawRelay => &self.raw_relay,
            Channel::Delta => &self.delta,
        }
    }
}

/// WebSocket server handle
///
/// Lifecycle: [`create`](Self::create) binds the listener,
/// [`start`](Self::start) spawns the service loop, [`destroy`](Self::destroy)
/// stops it and disconnects every subscriber.
#[derive(Debug)]
pub struct WsTransport {
    listener: Option<std::net::TcpListener>,
    local_addr: SocketAddr,
    hub: Arc<Hub>,
    stop: Option<watch::Sender<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Bind the listening socket
    ///
    /// # Returns
    /// * `Err(Transport)` - TLS was requested or the address cannot be bound
    pub fn create(config: TransportConfig) -> Result<Self> {
        if let Some(tls) = &config.tls {
            return Err(RelayError::Transport(format!(
                "TLS is not supported (cert {:?}, key {:?})",
                tls.cert_path, tls.key_path
            )));
        }

        let listener = std::net::TcpListener::bind((config.bind_address.as_str(), config.port))
            .map_err(|e| {
                RelayError::Transport(format!(
                    "cannot listen on {}:{}: {}",
                    config.bind_address, config.port, e
                ))
            })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        log::info!("WebSocket transport bound to {}", local_addr);

        Ok(Self {
            listener: Some(listener),
            local_addr,
            hub: Arc::new(Hub::new()),
            stop: None,
            thread: None,
        })
    }

    /// Address the server listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the service loop on its own thread
    pub fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| RelayError::Transport("service loop already started".to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let hub = Arc::clone(&self.hub);

        let thread = std::thread::Builder::new()
            .name("ws-transport".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => accept_loop(listener, hub, stop_rx).await,
                        Err(e) => log::error!("Cannot register listener: {}", e),
                    }
                });
            })?;

        self.stop = Some(stop_tx);
        self.thread = Some(thread);
        log::info!("WebSocket service loop started on {}", self.local_addr);
        Ok(())
    }

    /// Cloneable dispatcher feeding this transport
    pub fn dispatcher(&self) -> WsBroadcaster {
        WsBroadcaster {
            hub: Arc::clone(&self.hub),
        }
    }

    /// Number of connected subscribers on `channel`
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.hub.sender(channel).receiver_count()
    }

    /// Stop the service loop and release all transport resources
    pub fn destroy(mut self) {
        self.shutdown_loop();
    }

    fn shutdown_loop(&mut self) {
        self.hub.closed.store(true, Ordering::SeqCst);
        self.listener.take();

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(true);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("WebSocket service thread panicked");
            }
            log::info!("WebSocket transport on {} destroyed", self.local_addr);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown_loop();
    }
}

/// [`Dispatcher`] that publishes into a [`WsTransport`]
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    hub: Arc<Hub>,
}

impl Dispatcher for WsBroadcaster {
    fn dispatch(&self, channel: Channel, text: &str) -> Result<()> {
        if self.hub.closed.load(Ordering::SeqCst) {
            return Err(RelayError::TransportClosed);
        }
        // No subscribers is not a failure
        let _ = self.hub.sender(channel).send(Arc::from(text));
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, hub: Arc<Hub>, mut stop: watch::Receiver<bool>) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    sessions.spawn(serve_connection(stream, peer, Arc::clone(&hub), stop.clone()));
                }
                Err(e) => log::warn!("Accept failed: {}", e),
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            _ = stop.changed() => break,
        }
    }

    let drain = async { while sessions.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        log::warn!("Aborting {} unresponsive session(s)", sessions.len());
        sessions.abort_all();
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    mut stop: watch::Receiver<bool>,
) {
    let mut channel = Channel::RawRelay;
    let handshake = accept_hdr_async(stream, |req: &Request, resp: Response| {
        let (selected, resp) = negotiate(req, resp)?;
        channel = selected;
        Ok(resp)
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let mut lines = hub.sender(channel).subscribe();
    let (mut sink, mut incoming) = ws.split();
    log::info!("Subscriber {} connected on {}", peer, channel);

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Ok(line) => {
                    if sink.send(Message::Text(line.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Subscriber {} is lagging, dropped {} line(s)", peer, missed);
                }
                Err(RecvError::Closed) => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Subscriber {} read error: {}", peer, e);
                    break;
                }
            },
            _ = stop.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    log::info!("Subscriber {} disconnected from {}", peer, channel);
}

/// Pick the channel from the requested sub-protocols
fn negotiate(
    req: &Request,
    mut resp: Response,
) -> std::result::Result<(Channel, Response), ErrorResponse> {
    let requested: Vec<String> = req
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if requested.is_empty() {
        return Ok((Channel::RawRelay, resp));
    }

    match requested.iter().find_map(|p| p.parse::<Channel>().ok()) {
        Some(channel) => {
            resp.headers_mut().insert(
                SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_static(channel.protocol()),
            );
            Ok((channel, resp))
        }
        None => {
            let mut err = ErrorResponse::new(Some(format!(
                "unsupported sub-protocol: {}",
                requested.join(", ")
            )));
            *err.status_mut() = StatusCode::BAD_REQUEST;
            Err(err)
        }
    }
}

//! Signaling client driver
//!
//! Runs one monitoring session end to end on a tokio runtime. The
//! [`Session`] decides what happens; this loop only turns IO into
//! [`SessionEvent`]s and drives the str0m peer:
//!
//! 1. Acquire the camera and start the session
//! 2. Resolve the signaling endpoint and open the WebSocket
//! 3. Hand the socket to the session, which sends the offer and `control.start`
//! 4. Loop over socket frames, UDP datagrams, peer timeouts and camera ticks
//!    until the socket closes, the session fails, or Ctrl-C
//! 5. Stop the session, releasing socket, peer and camera

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Result;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::camera::{CameraDevice, FrameSource, IvfCamera, MIN_FRAME_INTERVAL};
use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::model::{media::MediaStream, metrics::MetricsSnapshot, state::ConnectionState};
use crate::peer::Str0mPeerFactory;
use crate::session::{PeerConfig, PeerConnection, Session, SessionEvent, SignalSink};

/// How often the current metrics are logged while connected.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on the wait for the socket writer to flush its close frame.
const WRITER_SHUTDOWN: Duration = Duration::from_secs(2);

/// How a run ended, captured just before teardown.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ConnectionState,
    pub status: String,
    pub error: Option<SessionError>,
    pub metrics: MetricsSnapshot,
}

impl RunOutcome {
    fn capture(session: &Session<Str0mPeerFactory>) -> Self {
        Self {
            state: session.state(),
            status: session.status().to_string(),
            error: session.last_error().cloned(),
            metrics: session.metrics().clone(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(err) = &self.error {
            if !self.status.contains(&err.to_string()) {
                write!(f, " ({err})")?;
            }
        }
        write!(f, "\nlast metrics: {}", self.metrics)
    }
}

/// Outbound half of the WebSocket, fed through a channel to a writer task.
struct WsSink {
    tx: UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl SignalSink for WsSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.tx
            .send(Message::Text(text))
            .map_err(|_| SessionError::Transport("socket writer has stopped".to_string()))
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Message::Close(None));
        }
    }
}

fn spawn_writer<S>(mut ws_tx: S) -> (WsSink, JoinHandle<()>)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let open = Arc::new(AtomicBool::new(true));
    let flag = open.clone();

    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_tx.send(msg).await {
                debug!("Socket write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        flag.store(false, Ordering::SeqCst);
    });

    (WsSink { tx, open }, handle)
}

/// Run one session with `config` until it ends.
pub async fn run(config: ClientConfig) -> Result<RunOutcome> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    let factory = Str0mPeerFactory::bind().await?;
    let udp = factory.socket();
    let mut session = Session::new(
        factory,
        PeerConfig { ice_servers: config.ice_servers.clone() },
    );

    // --- Camera ---
    let mut frames: Option<Box<dyn FrameSource>> = None;
    let mut media_error = None;
    if let Some(path) = &config.camera {
        match IvfCamera::new(path).acquire(&config.constraints) {
            Ok(capture) => {
                session.attach_media(capture.stream);
                frames = Some(capture.frames);
            }
            Err(e) => media_error = Some(e),
        }
    }

    if let Err(e) = session.start() {
        let mut outcome = RunOutcome::capture(&session);
        if let Some(media_error) = media_error {
            outcome.status = format!("error: {media_error}");
            outcome.error = Some(media_error);
        } else {
            outcome.error = Some(e);
        }
        session.stop();
        return Ok(outcome);
    }

    // --- Endpoint and socket ---
    match config.endpoint.resolve(&http).await {
        Ok(url) => session.handle(SessionEvent::EndpointResolved(url)),
        Err(e) => session.handle(SessionEvent::EndpointFailed(e)),
    }

    let Some(url) = session.endpoint().map(str::to_string) else {
        return Ok(finish(session, None).await);
    };

    info!("Connecting to signaling server {}", url);
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            session.handle(SessionEvent::SocketError(format!("cannot connect to {url}: {e}")));
            return Ok(finish(session, None).await);
        }
    };
    info!("Connected to signaling server");

    let (ws_tx, mut ws_rx) = ws.split();
    let (sink, writer) = spawn_writer(ws_tx);
    session.handle(SessionEvent::SocketOpened(Box::new(sink)));

    // --- Main event loop ---
    let frame_interval = frames
        .as_ref()
        .map(|f| f.frame_interval().max(MIN_FRAME_INTERVAL))
        .unwrap_or(Duration::from_millis(100));
    let mut frame_tick = time::interval(frame_interval);
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut metrics_tick = time::interval(METRICS_LOG_INTERVAL);
    metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buf = vec![0; 2000];

    while session.state().is_active() {
        let late = session
            .peer_mut()
            .map(|p| p.take_local_candidates())
            .unwrap_or_default();
        for candidate in late {
            session.handle(SessionEvent::LocalCandidate(candidate));
        }

        let deadline = session
            .peer_mut()
            .map(|p| p.poll_until_timeout())
            .unwrap_or_else(|| Instant::now() + Duration::from_millis(100));

        tokio::select! {
            // A. Signaling frames from the relay.
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => session.handle(SessionEvent::SocketMessage(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Socket closed by peer: {:?}", frame);
                    session.handle(SessionEvent::SocketClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => session.handle(SessionEvent::SocketError(e.to_string())),
                None => session.handle(SessionEvent::SocketClosed),
            },

            // B. Datagrams for the peer connection.
            res = udp.recv_from(&mut buf) => match res {
                Ok((n, source)) => {
                    if let Some(peer) = session.peer_mut() {
                        peer.handle_receive(source, &buf[..n]);
                    }
                }
                Err(e) => warn!("UDP receive failed: {}", e),
            },

            // C. str0m timeout.
            _ = time::sleep_until(time::Instant::from_std(deadline)) => {
                if let Some(peer) = session.peer_mut() {
                    peer.handle_timeout(Instant::now());
                }
            },

            // D. Next camera frame.
            _ = frame_tick.tick() => {
                let live = session.media().is_some_and(MediaStream::is_live);
                if let (true, Some(frames), Some(peer)) = (live, frames.as_mut(), session.peer_mut()) {
                    if peer.is_connected() {
                        if let Some(frame) = frames.next_frame() {
                            peer.write_frame(frames.codec(), &frame);
                        }
                    }
                }
            },

            _ = metrics_tick.tick() => {
                if session.state() == ConnectionState::PeerConnected {
                    info!("📊 {}", session.metrics());
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                break;
            },
        }
    }

    Ok(finish(session, Some(writer)).await)
}

async fn finish(
    mut session: Session<Str0mPeerFactory>,
    writer: Option<JoinHandle<()>>,
) -> RunOutcome {
    let outcome = RunOutcome::capture(&session);
    session.stop();

    if let Some(writer) = writer {
        if time::timeout(WRITER_SHUTDOWN, writer).await.is_err() {
            debug!("Socket writer did not finish in time");
        }
    }

    info!("Session ended: {}", outcome.status);
    outcome
}

/// Print pseudo-random metrics, the dashboard's fallback when no agent is connected.
pub async fn run_demo(interval: Duration, count: Option<u64>) {
    let mut tick = time::interval(interval);
    let mut emitted = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let snapshot = MetricsSnapshot::mock(&mut rand::rng());
                info!("📊 {}", snapshot);
                emitted += 1;
                if count.is_some_and(|c| emitted >= c) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ivf_bytes;
    use crate::config::EndpointSource;
    use serde_json::Value;
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    fn camera_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.ivf", std::process::id()));
        std::fs::write(&path, ivf_bytes(b"VP80", 30, &[b"key", b"delta"])).unwrap();
        path
    }

    fn config(endpoint: EndpointSource, camera: Option<PathBuf>) -> ClientConfig {
        ClientConfig { endpoint, camera, ..ClientConfig::default() }
    }

    /// Accept one client, collect kinds until the offer and start arrive, then
    /// send a log line and metrics and close.
    async fn fake_agent(listener: TcpListener) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut kinds = vec![];

        while !kinds.iter().any(|k| k == "control.start") {
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("client went away");
            };
            let value: Value = serde_json::from_str(&text).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }

        ws.send(Message::Text(
            r#"{"type":"logs.agent","payload":{"message":"agent started"}}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            r#"{"type":"ml_data","payload":{"stress_level":42,"heart_rate":71}}"#.into(),
        ))
        .await
        .unwrap();
        ws.close(None).await.unwrap();

        kinds
    }

    #[tokio::test]
    async fn handshake_then_metrics_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let agent = tokio::spawn(fake_agent(listener));

        let camera = camera_file("client-handshake");
        let outcome = run(config(EndpointSource::Fixed(format!("ws://{addr}")), Some(camera.clone())))
            .await
            .unwrap();
        let _ = std::fs::remove_file(camera);

        let kinds = agent.await.unwrap();
        assert_eq!(&kinds[..2], &["webrtc.offer".to_string(), "control.start".to_string()]);

        assert_eq!(outcome.state, ConnectionState::Closed);
        assert_eq!(outcome.metrics.stress_level, 42.0);
        assert_eq!(outcome.metrics.heart_rate, 71.0);
        assert!(matches!(outcome.error, Some(SessionError::Transport(_))));
    }

    #[tokio::test]
    async fn missing_camera_never_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let outcome = run(config(EndpointSource::Fixed(format!("ws://{addr}")), None))
            .await
            .unwrap();

        assert_eq!(outcome.error, Some(SessionError::CameraUnavailable));
        assert_eq!(outcome.state, ConnectionState::Idle);

        let accepted = time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "client must not open a socket without a camera");
    }

    #[tokio::test]
    async fn unreadable_camera_is_a_media_permission_error() {
        let outcome = run(config(
            EndpointSource::Fixed("ws://127.0.0.1:9".into()),
            Some(PathBuf::from("/nonexistent/camera.ivf")),
        ))
        .await
        .unwrap();

        assert!(matches!(outcome.error, Some(SessionError::MediaPermission(_))));
        assert!(outcome.status.starts_with("error: media permission error"));
    }

    #[tokio::test]
    async fn implausible_frame_rate_fails_without_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let path = std::env::temp_dir().join(format!("client-fast-{}.ivf", std::process::id()));
        std::fs::write(&path, ivf_bytes(b"VP80", 3_000_000_000, &[b"k"])).unwrap();

        let outcome = run(config(EndpointSource::Fixed(format!("ws://{addr}")), Some(path.clone())))
            .await
            .unwrap();
        let _ = std::fs::remove_file(path);

        assert!(matches!(outcome.error, Some(SessionError::MediaPermission(_))));
        assert_eq!(outcome.state, ConnectionState::Idle);
        let accepted = time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn bad_endpoint_is_a_configuration_error() {
        let camera = camera_file("client-bad-endpoint");
        let outcome = run(config(EndpointSource::Fixed("http://not-a-socket".into()), Some(camera.clone())))
            .await
            .unwrap();
        let _ = std::fs::remove_file(camera);

        assert_eq!(outcome.state, ConnectionState::Error);
        assert!(matches!(outcome.error, Some(SessionError::Configuration(_))));
    }

    #[tokio::test]
    async fn refused_socket_is_a_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let camera = camera_file("client-refused");
        let outcome = run(config(EndpointSource::Fixed(format!("ws://{addr}")), Some(camera.clone())))
            .await
            .unwrap();
        let _ = std::fs::remove_file(camera);

        assert_eq!(outcome.state, ConnectionState::Error);
        assert!(matches!(outcome.error, Some(SessionError::Transport(_))));
    }

    #[tokio::test]
    async fn sink_reports_closed_after_close() {
        let (mut sink, writer) = spawn_writer(futures_util::sink::drain::<Message>());
        assert!(sink.is_open());
        sink.send_text("hello".into()).unwrap();

        sink.close();
        assert!(!sink.is_open());
        sink.close();

        writer.await.unwrap();
    }
}

//! Loopback media engine
//!
//! A complete [`MediaEngine`] that negotiates with canned session
//! descriptions and consumes frames without encoding them. It lets the relay
//! run end to end without a media stack, and records what happened to every
//! handle so callers can check that each was released exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::EngineError;
use super::pipeline::{
    ChannelDirection, DataChannel, EngineEvent, IceCandidate, MediaEngine, PeerConnectionState,
    ReceivePipeline, RecordingPipeline, SdpKind, SendPipeline,
};
use crate::bus::{ChannelSink, FrameSink, MediaFrame};
use crate::registry::ConnectionId;
use crate::session::EngineEvents;

const DEFAULT_FRAME_CAPACITY: usize = 64;

/// What happened to one session's handles
#[derive(Debug, Default)]
pub struct SessionProbe {
    send_released: AtomicUsize,
    receive_released: AtomicUsize,
    receive_created: AtomicUsize,
    channels_closed: AtomicUsize,
    frames_received: AtomicU64,
    candidates: Mutex<Vec<IceCandidate>>,
    channel_messages: Mutex<Vec<String>>,
}

impl SessionProbe {
    /// Times the send pipeline was released
    pub fn send_released(&self) -> usize {
        self.send_released.load(Ordering::SeqCst)
    }

    /// Times a receive pipeline was released
    pub fn receive_released(&self) -> usize {
        self.receive_released.load(Ordering::SeqCst)
    }

    /// Receive pipelines created
    pub fn receive_created(&self) -> usize {
        self.receive_created.load(Ordering::SeqCst)
    }

    /// Data channels closed
    pub fn channels_closed(&self) -> usize {
        self.channels_closed.load(Ordering::SeqCst)
    }

    /// Frames consumed by the send pipeline
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::SeqCst)
    }

    /// Remote candidates applied, in order, across both paths
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    /// Text sent on this session's data channels
    pub fn channel_messages(&self) -> Vec<String> {
        self.channel_messages.lock().clone()
    }
}

/// Engine that negotiates locally and discards media
#[derive(Debug)]
pub struct LoopbackEngine {
    frame_capacity: usize,
    stun_server: Option<String>,
    fail_setup: AtomicBool,
    probes: Mutex<HashMap<ConnectionId, Arc<SessionProbe>>>,
    recordings_started: AtomicUsize,
    recordings_stopped: Arc<AtomicUsize>,
    played: Mutex<Vec<PathBuf>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::with_frame_capacity(DEFAULT_FRAME_CAPACITY)
    }

    /// Engine whose ingestion points queue at most `capacity` frames
    pub fn with_frame_capacity(capacity: usize) -> Self {
        Self {
            frame_capacity: capacity,
            stun_server: None,
            fail_setup: AtomicBool::new(false),
            probes: Mutex::new(HashMap::new()),
            recordings_started: AtomicUsize::new(0),
            recordings_stopped: Arc::new(AtomicUsize::new(0)),
            played: Mutex::new(Vec::new()),
        }
    }

    /// STUN server advertised to peers
    pub fn stun_server(mut self, uri: impl Into<String>) -> Self {
        self.stun_server = Some(uri.into());
        self
    }

    /// Make subsequent pipeline construction fail
    pub fn set_fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }

    /// Handle bookkeeping for a session, if it ever got a pipeline
    pub fn probe(&self, session: ConnectionId) -> Option<Arc<SessionProbe>> {
        self.probes.lock().get(&session).cloned()
    }

    pub fn recordings_started(&self) -> usize {
        self.recordings_started.load(Ordering::SeqCst)
    }

    pub fn recordings_stopped(&self) -> usize {
        self.recordings_stopped.load(Ordering::SeqCst)
    }

    /// Files handed to `play_file`, in order
    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().clone()
    }

    fn probe_for(&self, session: ConnectionId) -> Arc<SessionProbe> {
        Arc::clone(self.probes.lock().entry(session).or_default())
    }

    fn check_setup(&self) -> Result<(), EngineError> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(EngineError::Setup("loopback setup disabled".into()));
        }
        Ok(())
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for LoopbackEngine {
    fn create_send_pipeline(
        &self,
        session: ConnectionId,
        events: EngineEvents,
    ) -> Result<Box<dyn SendPipeline>, EngineError> {
        self.check_setup()?;
        let probe = self.probe_for(session);

        let (video, video_rx) = ChannelSink::new(self.frame_capacity);
        let (audio, audio_rx) = ChannelSink::new(self.frame_capacity);
        let drain = FrameDrain::start(video_rx, audio_rx, Arc::clone(&probe));
        tracing::debug!(
            session = %session,
            stun = self.stun_server.as_deref().unwrap_or("none"),
            "Loopback send pipeline created"
        );

        events.emit(EngineEvent::NegotiationNeeded);

        Ok(Box::new(LoopbackSendPipeline {
            session,
            events,
            video: Arc::new(video),
            audio: Arc::new(audio),
            drain,
            remote_set: false,
            probe,
        }))
    }

    fn create_receive_pipeline(
        &self,
        session: ConnectionId,
        events: EngineEvents,
    ) -> Result<Box<dyn ReceivePipeline>, EngineError> {
        self.check_setup()?;
        let probe = self.probe_for(session);
        probe.receive_created.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(LoopbackReceivePipeline {
            session,
            events,
            remote_set: false,
            probe,
        }))
    }

    fn start_recording(&self, path: &Path) -> Result<Box<dyn RecordingPipeline>, EngineError> {
        std::fs::File::create(path).map_err(|e| EngineError::Recording(e.to_string()))?;
        self.recordings_started.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(LoopbackRecording {
            path: path.to_path_buf(),
            stopped: Arc::clone(&self.recordings_stopped),
        }))
    }

    fn play_file(&self, path: &Path) -> Result<(), EngineError> {
        if !path.is_file() {
            return Err(EngineError::Playback(format!("{} not found", path.display())));
        }
        tracing::info!(path = %path.display(), "Playing uploaded file");
        self.played.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// Consumes frames from a send pipeline's queues
enum FrameDrain {
    Task(JoinHandle<()>),
    // No runtime to drain on; keep the queues open so the sinks stay live
    Held(mpsc::Receiver<MediaFrame>, mpsc::Receiver<MediaFrame>),
}

impl FrameDrain {
    fn start(
        mut video_rx: mpsc::Receiver<MediaFrame>,
        mut audio_rx: mpsc::Receiver<MediaFrame>,
        probe: Arc<SessionProbe>,
    ) -> Self {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => FrameDrain::Task(handle.spawn(async move {
                loop {
                    tokio::select! {
                        Some(_) = video_rx.recv() => {
                            probe.frames_received.fetch_add(1, Ordering::SeqCst);
                        }
                        Some(_) = audio_rx.recv() => {
                            probe.frames_received.fetch_add(1, Ordering::SeqCst);
                        }
                        else => break,
                    }
                }
            })),
            Err(_) => FrameDrain::Held(video_rx, audio_rx),
        }
    }

    fn stop(self) {
        if let FrameDrain::Task(task) = self {
            task.abort();
        }
    }
}

fn check_sdp(kind: SdpKind, expected: SdpKind, sdp: &str) -> Result<(), EngineError> {
    if kind != expected {
        return Err(EngineError::InvalidSdp(format!("expected {}, got {}", expected, kind)));
    }
    if !sdp.starts_with("v=0") {
        return Err(EngineError::InvalidSdp("missing version line".into()));
    }
    Ok(())
}

fn check_candidate(candidate: &IceCandidate) -> Result<(), EngineError> {
    if candidate.candidate.is_empty() {
        return Err(EngineError::InvalidCandidate("empty candidate".into()));
    }
    Ok(())
}

fn local_description(session: ConnectionId, kind: SdpKind) -> String {
    format!(
        "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=camera-relay {}\r\nt=0 0\r\n\
         m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 H264/90000\r\n\
         m=audio 9 UDP/TLS/RTP/SAVPF 97\r\na=rtpmap:97 OPUS/48000/2\r\n",
        session.get(),
        kind
    )
}

fn local_candidate(port: u16) -> IceCandidate {
    IceCandidate::new(
        0,
        format!("candidate:1 1 UDP 2122252543 127.0.0.1 {} typ host", port),
    )
}

struct LoopbackSendPipeline {
    session: ConnectionId,
    events: EngineEvents,
    video: Arc<ChannelSink>,
    audio: Arc<ChannelSink>,
    drain: FrameDrain,
    remote_set: bool,
    probe: Arc<SessionProbe>,
}

impl SendPipeline for LoopbackSendPipeline {
    fn video_sink(&self) -> Arc<dyn FrameSink> {
        self.video.clone()
    }

    fn audio_sink(&self) -> Arc<dyn FrameSink> {
        self.audio.clone()
    }

    fn create_offer(&mut self) -> Result<(), EngineError> {
        self.events
            .emit(EngineEvent::OfferCreated(local_description(self.session, SdpKind::Offer)));
        self.events.emit(EngineEvent::LocalCandidate(local_candidate(50000)));
        Ok(())
    }

    fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), EngineError> {
        check_sdp(kind, SdpKind::Answer, sdp)?;
        self.remote_set = true;

        self.events
            .emit(EngineEvent::ConnectionState(PeerConnectionState::Connected));
        self.events.emit(EngineEvent::DataChannelOpened {
            direction: ChannelDirection::Outbound,
            channel: Box::new(LoopbackChannel {
                label: "control".into(),
                probe: Arc::clone(&self.probe),
            }),
        });
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError> {
        check_candidate(candidate)?;
        if !self.remote_set {
            return Err(EngineError::NotReady("remote description not set"));
        }
        self.probe.candidates.lock().push(candidate.clone());
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.drain.stop();
        self.probe.send_released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = %self.session, "Loopback send pipeline released");
    }
}

struct LoopbackReceivePipeline {
    session: ConnectionId,
    events: EngineEvents,
    remote_set: bool,
    probe: Arc<SessionProbe>,
}

impl ReceivePipeline for LoopbackReceivePipeline {
    fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), EngineError> {
        check_sdp(kind, SdpKind::Offer, sdp)?;
        self.remote_set = true;
        Ok(())
    }

    fn create_answer(&mut self) -> Result<(), EngineError> {
        if !self.remote_set {
            return Err(EngineError::NotReady("no remote offer"));
        }
        self.events
            .emit(EngineEvent::AnswerCreated(local_description(self.session, SdpKind::Answer)));
        self.events.emit(EngineEvent::LocalCandidate(local_candidate(50002)));
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError> {
        check_candidate(candidate)?;
        if !self.remote_set {
            return Err(EngineError::NotReady("remote description not set"));
        }
        self.probe.candidates.lock().push(candidate.clone());
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.probe.receive_released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = %self.session, "Loopback receive pipeline released");
    }
}

struct LoopbackChannel {
    label: String,
    probe: Arc<SessionProbe>,
}

impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send_text(&self, text: &str) -> Result<(), EngineError> {
        self.probe.channel_messages.lock().push(text.to_string());
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.probe.channels_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct LoopbackRecording {
    path: PathBuf,
    stopped: Arc<AtomicUsize>,
}

impl RecordingPipeline for LoopbackRecording {
    fn path(&self) -> &Path {
        &self.path
    }

    fn stop(self: Box<Self>) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PipelineRole;
    use crate::session::SessionEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn events(role: PipelineRole) -> (EngineEvents, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EngineEvents::new(role, tx), rx)
    }

    fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> EngineEvent {
        match rx.try_recv().unwrap() {
            SessionEvent::Engine { event, .. } => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_pipeline_negotiation() {
        let engine = LoopbackEngine::new();
        let id = ConnectionId::new(1);
        let (ev, mut rx) = events(PipelineRole::Send);

        let mut pipeline = engine.create_send_pipeline(id, ev).unwrap();
        assert!(matches!(next_event(&mut rx), EngineEvent::NegotiationNeeded));

        pipeline.create_offer().unwrap();
        match next_event(&mut rx) {
            EngineEvent::OfferCreated(sdp) => assert!(sdp.starts_with("v=0")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(next_event(&mut rx), EngineEvent::LocalCandidate(_)));

        let candidate = IceCandidate::new(0, "candidate:9");
        assert!(pipeline.add_ice_candidate(&candidate).is_err());

        assert!(pipeline
            .set_remote_description(SdpKind::Answer, "garbage")
            .is_err());
        pipeline
            .set_remote_description(SdpKind::Answer, "v=0\r\n")
            .unwrap();
        pipeline.add_ice_candidate(&candidate).unwrap();

        pipeline.release();
        let probe = engine.probe(id).unwrap();
        assert_eq!(probe.send_released(), 1);
        assert_eq!(probe.candidates(), vec![candidate]);
    }

    #[tokio::test]
    async fn test_receive_pipeline_answers_offer() {
        let engine = LoopbackEngine::new();
        let id = ConnectionId::new(2);
        let (ev, mut rx) = events(PipelineRole::Receive);

        let mut pipeline = engine.create_receive_pipeline(id, ev).unwrap();
        assert!(pipeline.create_answer().is_err());

        pipeline
            .set_remote_description(SdpKind::Offer, "v=0\r\n")
            .unwrap();
        pipeline.create_answer().unwrap();
        assert!(matches!(next_event(&mut rx), EngineEvent::AnswerCreated(_)));

        pipeline.release();
        assert_eq!(engine.probe(id).unwrap().receive_released(), 1);
    }

    #[tokio::test]
    async fn test_setup_failure() {
        let engine = LoopbackEngine::new();
        engine.set_fail_setup(true);
        let (ev, _rx) = events(PipelineRole::Send);

        assert!(engine.create_send_pipeline(ConnectionId::new(3), ev).is_err());
    }

    #[test]
    fn test_recording_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mkv");
        let engine = LoopbackEngine::new();

        let recording = engine.start_recording(&path).unwrap();
        assert!(path.exists());
        assert_eq!(recording.path(), path.as_path());

        recording.stop();
        assert_eq!(engine.recordings_started(), 1);
        assert_eq!(engine.recordings_stopped(), 1);
    }

    #[test]
    fn test_play_missing_file() {
        let engine = LoopbackEngine::new();
        assert!(engine.play_file(Path::new("/nonexistent/clip.wav")).is_err());
        assert!(engine.played().is_empty());
    }
}

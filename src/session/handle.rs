//! Session handle and per-session event loop
//!
//! A `Session` owns every media handle of one viewer. All of its mutable
//! state sits behind one async mutex; signaling messages and engine
//! callbacks are queued on an inbox and applied one at a time by a single
//! worker task, so per-session work is serialized and runs in arrival order.
//!
//! Teardown takes the same mutex, so it waits for an in-flight handler to
//! finish instead of freeing handles the handler is using, and a flag makes
//! every teardown after the first a no-op.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, Notify};

use super::event::{EngineEvents, SessionEvent};
use super::state::{CandidateAction, CandidateQueue, Negotiation, SignalingState};
use super::transfer::{FileTransfer, TransferProgress};
use crate::bus::{FrameBus, SubscriberId};
use crate::engine::{
    ChannelDirection, DataChannel, DeviceControl, EngineEvent, IceCandidate, MediaEngine,
    PeerConnectionState, PipelineRole, ReceivePipeline, SdpKind, SendPipeline,
};
use crate::error::Result;
use crate::presence::AccessLog;
use crate::protocol::{
    ChannelMessage, Command, ControlCommand, DeviceRequest, InboundMessage, OutboundMessage,
    Toggle,
};
use crate::recording::{Recorder, StartOutcome};
use crate::registry::ConnectionId;
use crate::server::ServerContext;

/// Sender half of a viewer's signaling socket
pub type OutboundTx = mpsc::UnboundedSender<OutboundMessage>;

/// Shared services a session releases its claims on during teardown
#[derive(Clone)]
pub struct SessionDeps {
    pub bus: Arc<FrameBus>,
    pub recorder: Arc<Recorder>,
    pub access_log: Arc<dyn AccessLog>,
}

/// What the event loop does after a handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The online list changed
    PresenceChanged,
    /// Fatal negotiation error; unregister this session
    Close,
    /// Already torn down
    Stopped,
}

/// Talk-back receive path
struct TalkbackPath {
    pipeline: Box<dyn ReceivePipeline>,
    candidates: CandidateQueue,
}

struct SessionInner {
    negotiation: Negotiation,

    /// Camera-to-viewer pipeline, present until teardown
    send: Option<Box<dyn SendPipeline>>,

    talkback: Option<TalkbackPath>,

    outbound_channel: Option<Box<dyn DataChannel>>,

    inbound_channel: Option<Box<dyn DataChannel>>,

    transfer: Option<FileTransfer>,

    subscriber: Option<SubscriberId>,

    torn_down: bool,
}

/// Server-side state for one connected viewer
pub struct Session {
    id: ConnectionId,

    inner: Mutex<SessionInner>,

    /// Inbox for signaling messages and engine callbacks
    inbox_tx: mpsc::UnboundedSender<SessionEvent>,

    /// Receiving end, taken by the worker when it starts
    inbox_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,

    /// Signaling socket; dropped as the last teardown step
    outbound: parking_lot::Mutex<Option<OutboundTx>>,

    /// Wakes the worker after teardown
    shutdown: Notify,

    deps: SessionDeps,

    created_at: Instant,
}

impl Session {
    /// Create a session and its send pipeline
    ///
    /// Fails, leaving nothing behind, if the engine cannot build the pipeline.
    pub fn create(
        id: ConnectionId,
        engine: &dyn MediaEngine,
        deps: SessionDeps,
        outbound: OutboundTx,
    ) -> Result<Arc<Self>> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let send = engine.create_send_pipeline(
            id,
            EngineEvents::new(PipelineRole::Send, inbox_tx.clone()),
        )?;

        tracing::debug!(session = %id, "Send pipeline created");

        Ok(Arc::new(Self {
            id,
            inner: Mutex::new(SessionInner {
                negotiation: Negotiation::new(),
                send: Some(send),
                talkback: None,
                outbound_channel: None,
                inbound_channel: None,
                transfer: None,
                subscriber: None,
                torn_down: false,
            }),
            inbox_tx,
            inbox_rx: parking_lot::Mutex::new(Some(inbox_rx)),
            outbound: parking_lot::Mutex::new(Some(outbound)),
            shutdown: Notify::new(),
            deps,
            created_at: Instant::now(),
        }))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Subscribe the send pipeline's ingestion points to the frame bus
    ///
    /// Returns `None` once torn down.
    pub async fn attach(&self) -> Option<SubscriberId> {
        let mut inner = self.inner.lock().await;
        if inner.torn_down {
            return None;
        }
        if let Some(id) = inner.subscriber {
            return Some(id);
        }

        let send = inner.send.as_ref()?;
        let id = self
            .deps
            .bus
            .subscribe(self.id, send.video_sink(), send.audio_sink());
        inner.subscriber = Some(id);
        Some(id)
    }

    /// Queue a signaling message; `false` once the worker is gone
    pub fn deliver(&self, message: InboundMessage) -> bool {
        self.post(SessionEvent::Signal(message))
    }

    /// Queue any inbox event
    pub fn post(&self, event: SessionEvent) -> bool {
        self.inbox_tx.send(event).is_ok()
    }

    /// Send a message to the viewer; `false` if the socket is gone
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub async fn signaling_state(&self) -> SignalingState {
        self.inner.lock().await.negotiation.state
    }

    pub async fn is_torn_down(&self) -> bool {
        self.inner.lock().await.torn_down
    }

    /// Whether this session started the running recording
    pub fn holds_recording(&self) -> bool {
        self.deps.recorder.holder() == Some(self.id)
    }

    /// Whether a talk-back path exists
    pub async fn has_talkback(&self) -> bool {
        self.inner.lock().await.talkback.is_some()
    }

    pub async fn subscriber(&self) -> Option<SubscriberId> {
        self.inner.lock().await.subscriber
    }

    /// Process the inbox until teardown
    pub async fn run(self: Arc<Self>, ctx: Arc<ServerContext>) {
        let Some(mut inbox) = self.inbox_rx.lock().take() else {
            tracing::warn!(session = %self.id, "Session worker already running");
            return;
        };

        loop {
            let event = tokio::select! {
                _ = self.shutdown.notified() => break,
                event = inbox.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self.handle(&ctx, event).await {
                Flow::Continue => {}
                Flow::PresenceChanged => {
                    ctx.broadcast_presence().await;
                }
                Flow::Close => {
                    ctx.close_session(self.id).await;
                    break;
                }
                Flow::Stopped => break,
            }
        }

        tracing::debug!(session = %self.id, "Session worker stopped");
    }

    /// Release everything this session owns, exactly once
    ///
    /// Order: recording claim, receive path, bus subscription and send path,
    /// data channels, signaling socket. Returns `false` if already torn down.
    pub async fn teardown(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.torn_down {
            return false;
        }
        inner.torn_down = true;
        inner.negotiation.close();

        if self.deps.recorder.release_claim(self.id) {
            tracing::info!(session = %self.id, "Recording stopped with its holder");
        }

        if let Some(path) = inner.talkback.take() {
            path.pipeline.release();
        }

        if let Some(subscriber) = inner.subscriber.take() {
            self.deps.bus.unsubscribe(subscriber);
        }
        if let Some(send) = inner.send.take() {
            send.release();
        }

        if let Some(channel) = inner.outbound_channel.take() {
            channel.close();
        }
        if let Some(channel) = inner.inbound_channel.take() {
            channel.close();
        }
        if let Some(transfer) = inner.transfer.take() {
            self.discard_transfer(transfer, "session closed").await;
        }

        self.outbound.lock().take();
        drop(inner);

        self.deps.access_log.close_visit(self.id);
        self.shutdown.notify_one();

        tracing::info!(
            session = %self.id,
            age_secs = self.age().as_secs(),
            "Session torn down"
        );
        true
    }

    async fn handle(&self, ctx: &ServerContext, event: SessionEvent) -> Flow {
        let mut inner = self.inner.lock().await;
        if inner.torn_down {
            return Flow::Stopped;
        }

        match event {
            SessionEvent::Signal(message) => self.on_signal(&mut inner, ctx, message),
            SessionEvent::Engine { role, event } => {
                self.on_engine(&mut inner, ctx, role, event).await
            }
        }
    }

    fn on_signal(
        &self,
        inner: &mut SessionInner,
        ctx: &ServerContext,
        message: InboundMessage,
    ) -> Flow {
        match message {
            InboundMessage::Sdp {
                kind: SdpKind::Answer,
                sdp,
            } => self.apply_answer(inner, &sdp),
            InboundMessage::Sdp {
                kind: SdpKind::Offer,
                sdp,
            } => self.apply_talkback_offer(inner, ctx.engine.as_ref(), &sdp),
            InboundMessage::Ice(candidate) => self.apply_remote_candidate(inner, candidate),
            InboundMessage::Control(ControlCommand::Autotrack(value)) => {
                ctx.device.set_autotrack(value);
            }
            InboundMessage::Control(ControlCommand::Navigate(command)) => {
                ctx.device.navigate(&command);
            }
            InboundMessage::Device(request) => self.apply_device(ctx.device.as_ref(), request),
            InboundMessage::Command(Command::Record(Toggle::Start)) => {
                self.start_recording();
            }
            InboundMessage::Command(Command::Record(Toggle::Stop)) => {
                if self.deps.recorder.stop() {
                    tracing::info!(session = %self.id, "Recording stopped on request");
                }
            }
            InboundMessage::Command(Command::Talk(Toggle::Start)) => {
                tracing::debug!(session = %self.id, "Talk-back requested, waiting for offer");
            }
            InboundMessage::Command(Command::Talk(Toggle::Stop)) => {
                self.stop_talkback(inner, "viewer request");
            }
            InboundMessage::Hello(client) => {
                self.deps.access_log.record_visit(self.id, &client);
                return Flow::PresenceChanged;
            }
        }
        Flow::Continue
    }

    async fn on_engine(
        &self,
        inner: &mut SessionInner,
        ctx: &ServerContext,
        role: PipelineRole,
        event: EngineEvent,
    ) -> Flow {
        match (role, event) {
            (PipelineRole::Send, EngineEvent::NegotiationNeeded) => {
                if inner.negotiation.state != SignalingState::New {
                    tracing::debug!(session = %self.id, "Renegotiation not supported, ignoring");
                    return Flow::Continue;
                }
                if let Some(send) = inner.send.as_mut() {
                    if let Err(e) = send.create_offer() {
                        tracing::error!(session = %self.id, error = %e, "Offer creation failed");
                        return Flow::Close;
                    }
                }
            }
            (PipelineRole::Send, EngineEvent::OfferCreated(sdp)) => {
                if inner.negotiation.offer_sent() {
                    tracing::debug!(session = %self.id, "Sending offer");
                    self.send(OutboundMessage::Sdp {
                        kind: SdpKind::Offer,
                        sdp,
                    });
                } else {
                    tracing::debug!(
                        session = %self.id,
                        state = ?inner.negotiation.state,
                        "Dropping offer created out of turn"
                    );
                }
            }
            (PipelineRole::Receive, EngineEvent::AnswerCreated(sdp)) => {
                if inner.talkback.is_some() {
                    tracing::debug!(session = %self.id, "Sending talk-back answer");
                    self.send(OutboundMessage::Sdp {
                        kind: SdpKind::Answer,
                        sdp,
                    });
                }
            }
            (_, EngineEvent::LocalCandidate(candidate)) => {
                self.send(OutboundMessage::Ice(candidate));
            }
            (PipelineRole::Send, EngineEvent::ConnectionState(state)) => match state {
                PeerConnectionState::Connected => {
                    if inner.negotiation.connected() {
                        tracing::info!(session = %self.id, "Peer connected");
                    }
                }
                PeerConnectionState::Failed => {
                    tracing::warn!(session = %self.id, "Peer connection failed");
                    return Flow::Close;
                }
                other => {
                    tracing::debug!(session = %self.id, state = ?other, "Peer connection state");
                }
            },
            (PipelineRole::Receive, EngineEvent::ConnectionState(state)) => {
                if state == PeerConnectionState::Failed {
                    self.stop_talkback(inner, "connection failed");
                }
            }
            (PipelineRole::Send, EngineEvent::NegotiationFailed(reason)) => {
                tracing::error!(session = %self.id, reason = %reason, "Negotiation failed");
                return Flow::Close;
            }
            (PipelineRole::Receive, EngineEvent::NegotiationFailed(reason)) => {
                tracing::warn!(session = %self.id, reason = %reason, "Talk-back negotiation failed");
                self.stop_talkback(inner, "negotiation failed");
            }
            (_, EngineEvent::DataChannelOpened { direction, channel }) => {
                self.on_channel_open(inner, ctx.device.as_ref(), direction, channel);
            }
            (_, EngineEvent::DataChannelText(text)) => {
                self.on_channel_text(inner, ctx, &text).await;
            }
            (_, EngineEvent::DataChannelBinary(payload)) => {
                self.on_channel_binary(inner, ctx, payload).await;
            }
            (role, event) => {
                tracing::debug!(session = %self.id, ?role, ?event, "Ignoring engine event");
            }
        }
        Flow::Continue
    }

    fn apply_answer(&self, inner: &mut SessionInner, sdp: &str) {
        if !inner.negotiation.expects_answer() {
            tracing::warn!(
                session = %self.id,
                state = ?inner.negotiation.state,
                "Unexpected answer, ignoring"
            );
            return;
        }
        let Some(send) = inner.send.as_mut() else {
            return;
        };

        match send.set_remote_description(SdpKind::Answer, sdp) {
            Ok(()) => {
                let pending = inner.negotiation.answer_applied();
                tracing::debug!(session = %self.id, flushed = pending.len(), "Answer applied");
                for candidate in pending {
                    apply_send_candidate(self.id, &mut **send, &candidate);
                }
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Rejected answer");
            }
        }
    }

    fn apply_talkback_offer(&self, inner: &mut SessionInner, engine: &dyn MediaEngine, sdp: &str) {
        if inner.talkback.is_none() {
            let events = EngineEvents::new(PipelineRole::Receive, self.inbox_tx.clone());
            match engine.create_receive_pipeline(self.id, events) {
                Ok(pipeline) => {
                    tracing::info!(session = %self.id, "Talk-back path created");
                    inner.talkback = Some(TalkbackPath {
                        pipeline,
                        candidates: CandidateQueue::new(),
                    });
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "Talk-back setup failed");
                    return;
                }
            }
        }
        let Some(path) = inner.talkback.as_mut() else {
            return;
        };

        if let Err(e) = path.pipeline.set_remote_description(SdpKind::Offer, sdp) {
            tracing::warn!(session = %self.id, error = %e, "Rejected talk-back offer");
            return;
        }
        for candidate in path.candidates.remote_set() {
            if let Err(e) = path.pipeline.add_ice_candidate(&candidate) {
                tracing::warn!(session = %self.id, error = %e, "Rejected queued candidate");
            }
        }
        if let Err(e) = path.pipeline.create_answer() {
            tracing::warn!(session = %self.id, error = %e, "Talk-back answer failed");
        }
    }

    fn apply_remote_candidate(&self, inner: &mut SessionInner, candidate: IceCandidate) {
        if let Some(path) = inner.talkback.as_mut() {
            match path.candidates.accept(candidate) {
                CandidateAction::Apply(candidate) => {
                    if let Err(e) = path.pipeline.add_ice_candidate(&candidate) {
                        tracing::warn!(session = %self.id, error = %e, "Rejected candidate");
                    }
                }
                CandidateAction::Queued => {
                    tracing::trace!(session = %self.id, "Talk-back candidate queued");
                }
                CandidateAction::Discarded => {}
            }
            return;
        }

        match inner.negotiation.accept_candidate(candidate) {
            CandidateAction::Apply(candidate) => {
                if let Some(send) = inner.send.as_mut() {
                    apply_send_candidate(self.id, &mut **send, &candidate);
                }
            }
            CandidateAction::Queued => {
                tracing::trace!(
                    session = %self.id,
                    pending = inner.negotiation.pending_candidates(),
                    "Candidate queued until answer"
                );
            }
            CandidateAction::Discarded => {}
        }
    }

    fn apply_device(&self, device: &dyn DeviceControl, request: DeviceRequest) {
        match request {
            DeviceRequest::Set { id, value } => {
                if let Err(e) = device.set_control(id, value) {
                    tracing::warn!(session = %self.id, id, value, error = %e, "Control rejected");
                }
            }
            DeviceRequest::Reset => device.reset_controls(),
        }
    }

    fn start_recording(&self) {
        match self.deps.recorder.try_start(self.id) {
            Ok(StartOutcome::Started(_)) | Ok(StartOutcome::Cancelled) => {}
            Ok(StartOutcome::AlreadyActive) => {
                self.send(OutboundMessage::RecordBusy);
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Recording failed to start");
            }
        }
    }

    fn stop_talkback(&self, inner: &mut SessionInner, reason: &'static str) {
        if let Some(path) = inner.talkback.take() {
            path.pipeline.release();
            tracing::info!(session = %self.id, reason, "Talk-back path released");
        }
    }

    fn on_channel_open(
        &self,
        inner: &mut SessionInner,
        device: &dyn DeviceControl,
        direction: ChannelDirection,
        channel: Box<dyn DataChannel>,
    ) {
        tracing::debug!(session = %self.id, ?direction, label = channel.label(), "Data channel open");

        let slot = match direction {
            ChannelDirection::Outbound => {
                let listing = json!({ "ctrls": device.list_controls() }).to_string();
                if let Err(e) = channel.send_text(&listing) {
                    tracing::warn!(session = %self.id, error = %e, "Failed to send control list");
                }
                &mut inner.outbound_channel
            }
            ChannelDirection::Inbound => &mut inner.inbound_channel,
        };
        if let Some(previous) = slot.replace(channel) {
            previous.close();
        }
    }

    async fn on_channel_text(&self, inner: &mut SessionInner, ctx: &ServerContext, text: &str) {
        match ChannelMessage::parse(text) {
            Ok(ChannelMessage::SendFile(offer)) => {
                if let Some(previous) = inner.transfer.take() {
                    self.discard_transfer(previous, "replaced by a new upload").await;
                }

                match FileTransfer::open(&ctx.config.upload_dir, &offer.name, offer.size).await {
                    Ok(transfer) => {
                        tracing::info!(
                            session = %self.id,
                            path = %transfer.path().display(),
                            size = offer.size,
                            "Receiving file"
                        );
                        if transfer.is_complete() {
                            self.finish_transfer(ctx, transfer).await;
                        } else {
                            inner.transfer = Some(transfer);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %self.id, error = %e, "Cannot open upload file");
                    }
                }
            }
            Ok(ChannelMessage::Device(request)) => self.apply_device(ctx.device.as_ref(), request),
            Ok(ChannelMessage::Text(text)) => {
                tracing::debug!(session = %self.id, text = %text, "Data channel text");
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Ignoring data channel message");
            }
        }
    }

    async fn on_channel_binary(&self, inner: &mut SessionInner, ctx: &ServerContext, payload: Bytes) {
        let Some(transfer) = inner.transfer.as_mut() else {
            tracing::debug!(session = %self.id, bytes = payload.len(), "Binary payload without transfer");
            return;
        };

        match transfer.append(&payload).await {
            Ok(TransferProgress::Complete(_)) => {
                if let Some(transfer) = inner.transfer.take() {
                    self.finish_transfer(ctx, transfer).await;
                }
            }
            Ok(TransferProgress::Partial { received, expected }) => {
                tracing::trace!(session = %self.id, received, expected, "Upload progress");
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Upload write failed");
                if let Some(transfer) = inner.transfer.take() {
                    self.discard_transfer(transfer, "write failed").await;
                }
            }
        }
    }

    /// Close an upload that will not be played
    async fn discard_transfer(&self, transfer: FileTransfer, reason: &'static str) {
        tracing::info!(
            session = %self.id,
            path = %transfer.path().display(),
            received = transfer.received(),
            expected = transfer.expected(),
            reason,
            "Discarding incomplete transfer"
        );
        if let Err(e) = transfer.close().await {
            tracing::warn!(session = %self.id, error = %e, reason, "Failed to close partial upload");
        }
    }

    async fn finish_transfer(&self, ctx: &ServerContext, transfer: FileTransfer) {
        let path: PathBuf = transfer.path().to_path_buf();
        if let Err(e) = transfer.close().await {
            tracing::warn!(session = %self.id, error = %e, "Failed to close upload");
            return;
        }

        let engine = Arc::clone(&ctx.engine);
        let job_path = path.clone();
        let submitted = ctx.pool.submit(Box::new(move || {
            if let Err(e) = engine.play_file(&job_path) {
                tracing::warn!(path = %job_path.display(), error = %e, "Playback failed");
            }
        }));

        match submitted {
            Ok(()) => {
                tracing::info!(session = %self.id, path = %path.display(), "Upload complete, playback queued")
            }
            Err(e) => {
                tracing::warn!(session = %self.id, path = %path.display(), error = %e, "Playback not queued")
            }
        }
    }
}

fn apply_send_candidate(session: ConnectionId, send: &mut dyn SendPipeline, candidate: &IceCandidate) {
    if let Err(e) = send.add_ice_candidate(candidate) {
        tracing::warn!(session = %session, error = %e, "Rejected candidate");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoopbackEngine;
    use crate::presence::MemoryAccessLog;

    fn deps(engine: &Arc<LoopbackEngine>, dir: &tempfile::TempDir) -> SessionDeps {
        SessionDeps {
            bus: Arc::new(FrameBus::new()),
            recorder: Arc::new(Recorder::new(engine.clone(), dir.path())),
            access_log: Arc::new(MemoryAccessLog::new()),
        }
    }

    #[tokio::test]
    async fn test_attach_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        let deps = deps(&engine, &dir);
        let (tx, _rx) = mpsc::unbounded_channel();

        let session = Session::create(ConnectionId::new(1), engine.as_ref(), deps.clone(), tx).unwrap();
        let first = session.attach().await.unwrap();
        let second = session.attach().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(deps.bus.subscriber_count(), 1);
        assert_eq!(session.subscriber().await, Some(first));
        assert_eq!(session.signaling_state().await, SignalingState::New);
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        let deps = deps(&engine, &dir);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new(2);

        let session = Session::create(id, engine.as_ref(), deps.clone(), tx).unwrap();
        session.attach().await;
        assert!(session.send(OutboundMessage::RecordBusy));

        assert!(session.teardown().await);
        assert!(!session.teardown().await);

        assert_eq!(engine.probe(id).unwrap().send_released(), 1);
        assert_eq!(deps.bus.subscriber_count(), 0);
        assert!(session.attach().await.is_none());
        assert!(!session.send(OutboundMessage::RecordBusy));
        assert_eq!(session.signaling_state().await, SignalingState::Closed);

        assert_eq!(rx.recv().await, Some(OutboundMessage::RecordBusy));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_teardown_releases_recording_claim() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        let deps = deps(&engine, &dir);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new(3);

        let session = Session::create(id, engine.as_ref(), deps.clone(), tx).unwrap();
        assert!(deps.recorder.try_start(id).unwrap().is_started());

        session.teardown().await;
        assert!(!deps.recorder.is_active());
        assert_eq!(engine.recordings_stopped(), 1);
    }

    #[test]
    fn test_setup_failure_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        engine.set_fail_setup(true);
        let deps = deps(&engine, &dir);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = Session::create(ConnectionId::new(4), engine.as_ref(), deps.clone(), tx);
        assert!(result.is_err());
        assert_eq!(deps.bus.subscriber_count(), 0);
    }
}

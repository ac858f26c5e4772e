//! Recording controller implementation

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Local;
use parking_lot::Mutex;

use super::job::{output_path, RecordingJob};
use crate::engine::{MediaEngine, RecordingPipeline};
use crate::error::Result;
use crate::registry::ConnectionId;

/// Result of [`Recorder::try_start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new recording is writing to this path
    Started(PathBuf),
    /// Another recording is running or starting; nothing changed
    AlreadyActive,
    /// Stopped while its output was being opened; nothing is recording
    Cancelled,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Claim taken before the output exists
#[derive(Debug, Clone, Copy)]
struct PendingStart {
    holder: ConnectionId,
    generation: u64,
}

#[derive(Default)]
struct RecorderState {
    job: Option<RecordingJob>,
    starting: Option<PendingStart>,
    generation: u64,
}

impl RecorderState {
    fn claimed_by(&self) -> Option<ConnectionId> {
        self.job
            .as_ref()
            .map(|job| job.holder)
            .or(self.starting.map(|pending| pending.holder))
    }
}

/// Single-flight guard around the one permitted recording
///
/// The claim is taken under one mutex, so check-and-claim is atomic across
/// sessions. Opening the output happens after the lock is released; a stop
/// arriving meanwhile cancels the pending start.
pub struct Recorder {
    engine: Arc<dyn MediaEngine>,

    /// Recordings go under `<root>/record/<date>/`
    root: PathBuf,

    /// Auto-stop after this long
    max_duration: Option<Duration>,

    state: Mutex<RecorderState>,
}

impl Recorder {
    pub fn new(engine: Arc<dyn MediaEngine>, root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            root: root.into(),
            max_duration: None,
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Stop recordings automatically after `limit`
    pub fn max_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    /// Start recording on behalf of `holder` unless a recording is running
    ///
    /// Failing to create the output (directory or pipeline) leaves the
    /// controller inactive.
    pub fn try_start(self: &Arc<Self>, holder: ConnectionId) -> Result<StartOutcome> {
        let generation = {
            let mut state = self.state.lock();
            if let Some(current) = state.claimed_by() {
                tracing::debug!(session = %holder, holder = %current, "Recording already active");
                return Ok(StartOutcome::AlreadyActive);
            }
            state.generation += 1;
            let generation = state.generation;
            state.starting = Some(PendingStart { holder, generation });
            generation
        };

        let opened = self.open_output();

        let installed = {
            let mut state = self.state.lock();
            let ours = matches!(state.starting, Some(p) if p.generation == generation);
            if ours {
                state.starting = None;
            }
            match opened {
                Ok(pipeline) if ours => {
                    let path = pipeline.path().to_path_buf();
                    state.job = Some(RecordingJob {
                        holder,
                        pipeline,
                        started_at: Instant::now(),
                        max_duration: self.max_duration,
                        generation,
                    });
                    Ok(path)
                }
                Ok(pipeline) => Err(pipeline),
                Err(e) => return Err(e),
            }
        };

        let path = match installed {
            Ok(path) => path,
            Err(orphan) => {
                orphan.stop();
                tracing::info!(session = %holder, "Recording cancelled while starting");
                return Ok(StartOutcome::Cancelled);
            }
        };

        tracing::info!(
            session = %holder,
            path = %path.display(),
            max_secs = self.max_duration.map(|d| d.as_secs()),
            "Recording started"
        );

        if let Some(limit) = self.max_duration {
            self.arm_timer(limit, generation);
        }

        Ok(StartOutcome::Started(path))
    }

    fn open_output(&self) -> Result<Box<dyn RecordingPipeline>> {
        let path = output_path(&self.root, Local::now());
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(self.engine.start_recording(&path)?)
    }

    /// Stop the running recording, if any
    ///
    /// Returns `false` when nothing was recording.
    pub fn stop(&self) -> bool {
        let (job, pending) = {
            let mut state = self.state.lock();
            (state.job.take(), state.starting.take())
        };
        self.finish(job, "stop requested") || pending.is_some()
    }

    /// Stop the recording only if `holder` started it
    ///
    /// Used by session teardown.
    pub fn release_claim(&self, holder: ConnectionId) -> bool {
        let (job, pending) = {
            let mut state = self.state.lock();
            let job = match &state.job {
                Some(job) if job.holder == holder => state.job.take(),
                _ => None,
            };
            let pending = match state.starting {
                Some(p) if p.holder == holder => state.starting.take(),
                _ => None,
            };
            (job, pending)
        };
        self.finish(job, "holder left") || pending.is_some()
    }

    /// Whether a recording is running or starting
    pub fn is_active(&self) -> bool {
        self.state.lock().claimed_by().is_some()
    }

    /// Session holding the recording claim
    pub fn holder(&self) -> Option<ConnectionId> {
        self.state.lock().claimed_by()
    }

    /// File of the running recording
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .job
            .as_ref()
            .map(|job| job.path().to_path_buf())
    }

    fn stop_generation(&self, generation: u64) -> bool {
        let job = {
            let mut state = self.state.lock();
            match &state.job {
                Some(job) if job.generation == generation => state.job.take(),
                _ => None,
            }
        };
        self.finish(job, "max duration reached")
    }

    fn finish(&self, job: Option<RecordingJob>, reason: &'static str) -> bool {
        match job {
            Some(job) => {
                let elapsed = job.elapsed();
                let holder = job.holder;
                let path = job.path().to_path_buf();
                job.pipeline.stop();
                tracing::info!(
                    session = %holder,
                    path = %path.display(),
                    elapsed_secs = elapsed.as_secs(),
                    reason,
                    "Recording stopped"
                );
                true
            }
            None => false,
        }
    }

    fn arm_timer(self: &Arc<Self>, limit: Duration, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(limit).await;
                    if let Some(recorder) = weak.upgrade() {
                        recorder.stop_generation(generation);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No runtime for the recording timer; auto-stop disabled");
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let job = self.state.get_mut().job.take();
        self.finish(job, "controller dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, LoopbackEngine, ReceivePipeline, SendPipeline};
    use crate::session::EngineEvents;
    use std::path::Path;

    type Hook = Box<dyn FnOnce() + Send>;

    /// Loopback engine that runs a hook while a recording output is opened
    struct HookedEngine {
        inner: LoopbackEngine,
        during_start: Mutex<Option<Hook>>,
    }

    impl MediaEngine for HookedEngine {
        fn create_send_pipeline(
            &self,
            session: ConnectionId,
            events: EngineEvents,
        ) -> std::result::Result<Box<dyn SendPipeline>, EngineError> {
            self.inner.create_send_pipeline(session, events)
        }

        fn create_receive_pipeline(
            &self,
            session: ConnectionId,
            events: EngineEvents,
        ) -> std::result::Result<Box<dyn ReceivePipeline>, EngineError> {
            self.inner.create_receive_pipeline(session, events)
        }

        fn start_recording(
            &self,
            path: &Path,
        ) -> std::result::Result<Box<dyn RecordingPipeline>, EngineError> {
            let hook = self.during_start.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.start_recording(path)
        }

        fn play_file(&self, path: &Path) -> std::result::Result<(), EngineError> {
            self.inner.play_file(path)
        }
    }

    fn hooked(root: &std::path::Path) -> (Arc<HookedEngine>, Arc<Recorder>) {
        let engine = Arc::new(HookedEngine {
            inner: LoopbackEngine::new(),
            during_start: Mutex::new(None),
        });
        let recorder = Arc::new(Recorder::new(engine.clone(), root));
        (engine, recorder)
    }

    fn recorder(root: &std::path::Path) -> (Arc<LoopbackEngine>, Arc<Recorder>) {
        let engine = Arc::new(LoopbackEngine::new());
        let recorder = Arc::new(Recorder::new(engine.clone(), root));
        (engine, recorder)
    }

    #[test]
    fn test_try_start_is_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recorder) = recorder(dir.path());
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);

        assert!(recorder.try_start(a).unwrap().is_started());
        assert_eq!(recorder.try_start(b).unwrap(), StartOutcome::AlreadyActive);
        assert_eq!(recorder.holder(), Some(a));
        assert_eq!(engine.recordings_started(), 1);

        assert!(recorder.stop());
        assert!(recorder.try_start(b).unwrap().is_started());
        assert_eq!(recorder.holder(), Some(b));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recorder) = recorder(dir.path());

        assert!(!recorder.stop());
        recorder.try_start(ConnectionId::new(1)).unwrap();
        assert!(recorder.stop());
        assert!(!recorder.stop());
        assert!(!recorder.is_active());
        assert_eq!(engine.recordings_stopped(), 1);
    }

    #[test]
    fn test_release_claim_only_for_holder() {
        let dir = tempfile::tempdir().unwrap();
        let (_engine, recorder) = recorder(dir.path());
        let a = ConnectionId::new(1);

        recorder.try_start(a).unwrap();
        assert!(!recorder.release_claim(ConnectionId::new(2)));
        assert!(recorder.is_active());
        assert!(recorder.release_claim(a));
        assert!(!recorder.is_active());
    }

    #[test]
    fn test_output_created_under_date_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (_engine, recorder) = recorder(dir.path());

        let path = match recorder.try_start(ConnectionId::new(1)).unwrap() {
            StartOutcome::Started(path) => path,
            other => panic!("unexpected {:?}", other),
        };
        assert!(path.starts_with(dir.path().join("record")));
        assert!(path.exists());
        assert_eq!(recorder.current_path(), Some(path));
    }

    #[test]
    fn test_engine_failure_leaves_inactive() {
        // A file where the date directory should go makes create_dir_all fail
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("record"), b"").unwrap();
        let (_engine, recorder) = recorder(dir.path());

        assert!(recorder.try_start(ConnectionId::new(1)).is_err());
        assert!(!recorder.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_auto_stop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        let recorder = Arc::new(
            Recorder::new(engine.clone(), dir.path()).max_duration(Some(Duration::from_secs(60))),
        );

        recorder.try_start(ConnectionId::new(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(recorder.is_active());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!recorder.is_active());
        assert_eq!(engine.recordings_stopped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_spares_next_recording() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        let recorder = Arc::new(
            Recorder::new(engine.clone(), dir.path()).max_duration(Some(Duration::from_secs(10))),
        );

        recorder.try_start(ConnectionId::new(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        recorder.stop();
        recorder.try_start(ConnectionId::new(2)).unwrap();

        // First timer fires here; the second recording must survive it
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(recorder.is_active());
        assert_eq!(recorder.holder(), Some(ConnectionId::new(2)));
    }

    #[test]
    fn test_claim_is_visible_while_output_opens() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recorder) = hooked(dir.path());
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);

        let observer = Arc::clone(&recorder);
        *engine.during_start.lock() = Some(Box::new(move || {
            assert!(observer.is_active());
            assert_eq!(observer.holder(), Some(a));
            assert_eq!(observer.current_path(), None);
            assert_eq!(observer.try_start(b).unwrap(), StartOutcome::AlreadyActive);
        }));

        assert!(recorder.try_start(a).unwrap().is_started());
        assert_eq!(recorder.holder(), Some(a));
        assert_eq!(engine.inner.recordings_started(), 1);
    }

    #[test]
    fn test_stop_while_starting_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recorder) = hooked(dir.path());

        let stopper = Arc::clone(&recorder);
        *engine.during_start.lock() = Some(Box::new(move || {
            assert!(stopper.stop());
            assert!(!stopper.is_active());
        }));

        assert_eq!(recorder.try_start(ConnectionId::new(1)).unwrap(), StartOutcome::Cancelled);
        assert!(!recorder.is_active());
        assert_eq!(engine.inner.recordings_started(), 1);
        assert_eq!(engine.inner.recordings_stopped(), 1);

        // The slot is free again
        assert!(recorder.try_start(ConnectionId::new(2)).unwrap().is_started());
    }

    #[test]
    fn test_holder_leaving_while_starting_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recorder) = hooked(dir.path());
        let a = ConnectionId::new(1);

        let leaver = Arc::clone(&recorder);
        *engine.during_start.lock() = Some(Box::new(move || {
            assert!(!leaver.release_claim(ConnectionId::new(2)));
            assert!(leaver.release_claim(a));
        }));

        assert_eq!(recorder.try_start(a).unwrap(), StartOutcome::Cancelled);
        assert_eq!(recorder.holder(), None);
        assert_eq!(engine.inner.recordings_stopped(), 1);
    }
}

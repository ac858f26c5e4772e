//! Session inbox events

use tokio::sync::mpsc;

use crate::engine::{EngineEvent, PipelineRole};
use crate::protocol::InboundMessage;

/// Everything a session reacts to, processed one at a time in arrival order
#[derive(Debug)]
pub enum SessionEvent {
    /// Parsed message from the signaling socket
    Signal(InboundMessage),
    /// Callback from one of the session's pipelines
    Engine {
        role: PipelineRole,
        event: EngineEvent,
    },
}

/// Posts engine callbacks for one pipeline into its session's inbox
///
/// Cloneable and usable from any thread. Posting after the session has gone
/// away is a silent no-op.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    role: PipelineRole,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EngineEvents {
    pub fn new(role: PipelineRole, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { role, tx }
    }

    /// Which pipeline these events come from
    pub fn role(&self) -> PipelineRole {
        self.role
    }

    /// Post an event; returns `false` if the session is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(SessionEvent::Engine {
                role: self.role,
                event,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_tags_role() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(PipelineRole::Receive, tx);

        assert!(events.emit(EngineEvent::NegotiationNeeded));
        match rx.try_recv().unwrap() {
            SessionEvent::Engine { role, .. } => assert_eq!(role, PipelineRole::Receive),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_emit_after_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(PipelineRole::Send, tx);
        drop(rx);

        assert!(!events.emit(EngineEvent::NegotiationNeeded));
    }
}

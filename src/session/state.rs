//! Signaling state machine
//!
//! Tracks one session's send-path negotiation from creation to close, and
//! holds remote ICE candidates that arrive before they can be applied.

use std::time::Instant;

use crate::engine::IceCandidate;

/// Negotiation phase of the send path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// Created, no offer yet
    New,
    /// Our offer is out, waiting for the viewer's answer
    OfferSent,
    /// Answer applied, connectivity checks running
    Answered,
    /// Peer connection up
    Connected,
    /// Torn down
    Closed,
}

/// What to do with a remote candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAction {
    /// Hand it to the pipeline now
    Apply(IceCandidate),
    /// Held until the remote description is set
    Queued,
    /// The path is closed
    Discarded,
}

/// Remote candidates that arrived before the remote description
#[derive(Debug, Default)]
pub struct CandidateQueue {
    remote_set: bool,
    pending: Vec<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply now if the remote description is set, otherwise hold
    pub fn accept(&mut self, candidate: IceCandidate) -> CandidateAction {
        if self.remote_set {
            CandidateAction::Apply(candidate)
        } else {
            self.pending.push(candidate);
            CandidateAction::Queued
        }
    }

    /// Mark the remote description set and return held candidates in arrival order
    pub fn remote_set(&mut self) -> Vec<IceCandidate> {
        self.remote_set = true;
        std::mem::take(&mut self.pending)
    }

    /// Whether the remote description has been set
    pub fn is_remote_set(&self) -> bool {
        self.remote_set
    }

    /// Candidates waiting
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Send-path negotiation state
#[derive(Debug)]
pub struct Negotiation {
    /// Current phase
    pub state: SignalingState,

    /// When the session was created
    pub created_at: Instant,

    /// When the offer went out
    pub offer_sent_at: Option<Instant>,

    /// When the peer connection came up
    pub connected_at: Option<Instant>,

    candidates: CandidateQueue,
}

impl Negotiation {
    pub fn new() -> Self {
        Self {
            state: SignalingState::New,
            created_at: Instant::now(),
            offer_sent_at: None,
            connected_at: None,
            candidates: CandidateQueue::new(),
        }
    }

    /// Offer sent to the viewer
    pub fn offer_sent(&mut self) -> bool {
        if self.state == SignalingState::New {
            self.state = SignalingState::OfferSent;
            self.offer_sent_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Whether an incoming answer is expected
    pub fn expects_answer(&self) -> bool {
        self.state == SignalingState::OfferSent
    }

    /// Answer applied; returns the candidates held until now
    pub fn answer_applied(&mut self) -> Vec<IceCandidate> {
        if self.state != SignalingState::OfferSent {
            return Vec::new();
        }
        self.state = SignalingState::Answered;
        self.candidates.remote_set()
    }

    /// Peer connection established
    pub fn connected(&mut self) -> bool {
        if self.state == SignalingState::Answered {
            self.state = SignalingState::Connected;
            self.connected_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Route a remote candidate for the send path
    pub fn accept_candidate(&mut self, candidate: IceCandidate) -> CandidateAction {
        if self.state == SignalingState::Closed {
            return CandidateAction::Discarded;
        }
        self.candidates.accept(candidate)
    }

    /// Candidates waiting for the answer
    pub fn pending_candidates(&self) -> usize {
        self.candidates.pending()
    }

    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == SignalingState::Closed
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(0, format!("candidate:{}", n))
    }

    #[test]
    fn test_happy_path() {
        let mut n = Negotiation::new();
        assert_eq!(n.state, SignalingState::New);

        assert!(n.offer_sent());
        assert!(n.expects_answer());
        assert!(n.answer_applied().is_empty());
        assert_eq!(n.state, SignalingState::Answered);
        assert!(n.connected());
        assert_eq!(n.state, SignalingState::Connected);
        assert!(n.connected_at.is_some());
    }

    #[test]
    fn test_out_of_order_transitions_ignored() {
        let mut n = Negotiation::new();

        assert!(!n.connected());
        assert!(n.answer_applied().is_empty());
        assert_eq!(n.state, SignalingState::New);

        n.offer_sent();
        assert!(!n.offer_sent());
        assert_eq!(n.state, SignalingState::OfferSent);
    }

    #[test]
    fn test_candidates_queued_until_answer() {
        let mut n = Negotiation::new();
        n.offer_sent();

        assert_eq!(n.accept_candidate(candidate(1)), CandidateAction::Queued);
        assert_eq!(n.accept_candidate(candidate(2)), CandidateAction::Queued);
        assert_eq!(n.pending_candidates(), 2);

        let flushed = n.answer_applied();
        assert_eq!(flushed, vec![candidate(1), candidate(2)]);
        assert_eq!(
            n.accept_candidate(candidate(3)),
            CandidateAction::Apply(candidate(3))
        );
    }

    #[test]
    fn test_closed_discards() {
        let mut n = Negotiation::new();
        n.close();

        assert!(n.is_closed());
        assert_eq!(n.accept_candidate(candidate(1)), CandidateAction::Discarded);
        assert!(!n.offer_sent());
    }

    #[test]
    fn test_candidate_queue_standalone() {
        let mut q = CandidateQueue::new();
        assert!(!q.is_remote_set());
        q.accept(candidate(1));

        assert_eq!(q.remote_set(), vec![candidate(1)]);
        assert!(q.is_remote_set());
        assert_eq!(q.pending(), 0);
    }
}

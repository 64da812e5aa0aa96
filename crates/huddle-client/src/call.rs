//! Call state machine: one peer-connection lifecycle per call attempt.
//!
//! All handlers run on the session's single event loop, so no two
//! handlers for the same session execute concurrently; the async
//! suspension points are media acquisition and description negotiation.
//! At most one call session is active per machine: a call request or
//! incoming offer while a session is active is rejected, never replaces
//! the existing session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_common::{ClientFrame, ConnectionId, ErrorCode, IceServer, UserSummary};

use crate::media::{LocalMedia, MediaSource, PeerConnection, PeerConnectionFactory, PeerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// We sent the offer and are waiting for the answer.
    LocalOfferSent,
    /// We received an offer and sent back an answer.
    RemoteOfferReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Negotiating(NegotiationRole),
    Connected,
    Closed,
    Failed,
}

/// Events for the embedding application.
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("another call session is active")]
    Busy,

    #[error("media acquisition failed: {0}")]
    Media(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("signaling path closed")]
    SignalingClosed,

    #[error("invalid call state: {0}")]
    InvalidState(&'static str),
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<IceServer>,
    /// How long to wait after the in-call peer disappears before treating
    /// the disconnect as an implicit hangup.
    pub disconnect_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: IceServer::default_stun(),
            disconnect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct CallMachine {
    config: CallConfig,
    media_source: Arc<dyn MediaSource>,
    factory: Arc<dyn PeerConnectionFactory>,
    /// Signaling path: frames go to the session's outbound queue.
    outbound: mpsc::UnboundedSender<ClientFrame>,
    events: mpsc::UnboundedSender<CallEvent>,

    state: CallState,
    target: Option<ConnectionId>,
    peer: Option<Box<dyn PeerConnection>>,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    media: Option<Box<dyn LocalMedia>>,
    /// Remote candidates held until the remote description is applied.
    pending_candidates: VecDeque<String>,
    remote_description_set: bool,
    disconnect_deadline: Option<Instant>,
}

impl CallMachine {
    pub fn new(
        config: CallConfig,
        media_source: Arc<dyn MediaSource>,
        factory: Arc<dyn PeerConnectionFactory>,
        outbound: mpsc::UnboundedSender<ClientFrame>,
    ) -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let machine = Self {
            config,
            media_source,
            factory,
            outbound,
            events,
            state: CallState::Idle,
            target: None,
            peer: None,
            peer_events: None,
            media: None,
            pending_candidates: VecDeque::new(),
            remote_description_set: false,
            disconnect_deadline: None,
        };
        (machine, event_rx)
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn target(&self) -> Option<&ConnectionId> {
        self.target.as_ref()
    }

    /// Whether a call session currently holds resources.
    pub fn is_active(&self) -> bool {
        matches!(self.state, CallState::Negotiating(_) | CallState::Connected)
    }

    /// Receiver for the current peer connection's events; the session
    /// loop takes it after a session starts and feeds [`Self::handle_peer_event`].
    pub fn take_peer_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.peer_events.take()
    }

    /// Place a call to a specific connection picked from the presence
    /// list. Rejected with [`CallError::Busy`] while a session is active.
    pub async fn start_call(&mut self, target: ConnectionId) -> Result<(), CallError> {
        if !self.can_start() {
            return Err(CallError::Busy);
        }
        info!(%target, "starting call");
        self.target = Some(target.clone());
        self.set_state(CallState::Negotiating(NegotiationRole::LocalOfferSent));
        if let Err(e) = self.begin_offer(target).await {
            self.fail(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn begin_offer(&mut self, target: ConnectionId) -> Result<(), CallError> {
        self.media = Some(self.media_source.acquire().await?);
        // Store the peer connection before negotiating so a failure mid-way
        // still releases it through the usual teardown.
        let (peer, events) = self.factory.create(&self.config.ice_servers)?;
        self.peer = Some(peer);
        self.peer_events = Some(events);

        let peer = self
            .peer
            .as_mut()
            .ok_or(CallError::InvalidState("no peer connection"))?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        self.send_frame(ClientFrame::Offer { target, sdp: offer })
    }

    /// An offer arrived for this connection. Accepts only when no session
    /// is active; acquires media, applies the offer, and answers.
    pub async fn handle_offer(&mut self, from: ConnectionId, from_user: UserSummary, sdp: String) {
        if !self.can_start() {
            warn!(caller = %from_user.name, "rejecting offer while a call session is active");
            return;
        }
        info!(caller = %from_user.name, conn = %from, "incoming call");
        self.target = Some(from.clone());
        self.set_state(CallState::Negotiating(NegotiationRole::RemoteOfferReceived));
        if let Err(e) = self.begin_answer(from, sdp).await {
            self.fail(e.to_string());
        }
    }

    async fn begin_answer(&mut self, from: ConnectionId, sdp: String) -> Result<(), CallError> {
        if self.media.is_none() {
            self.media = Some(self.media_source.acquire().await?);
        }
        let (peer, events) = self.factory.create(&self.config.ice_servers)?;
        self.peer = Some(peer);
        self.peer_events = Some(events);

        let peer = self
            .peer
            .as_mut()
            .ok_or(CallError::InvalidState("no peer connection"))?;
        peer.set_remote_description(&sdp).await?;
        let answer = peer.create_answer().await?;
        peer.set_local_description(&answer).await?;
        self.remote_description_set = true;
        self.drain_pending().await?;
        self.send_frame(ClientFrame::Answer {
            target: from,
            sdp: answer,
        })
    }

    /// The answer to our offer arrived; the initiator is connected once
    /// it applies.
    pub async fn handle_answer(&mut self, from: ConnectionId, sdp: String) {
        let expecting = self.state == CallState::Negotiating(NegotiationRole::LocalOfferSent)
            && self.target.as_ref() == Some(&from);
        if !expecting {
            debug!(%from, "ignoring unexpected answer");
            return;
        }
        match self.apply_answer(&sdp).await {
            Ok(()) => self.set_state(CallState::Connected),
            Err(e) => self.fail(e.to_string()),
        }
    }

    async fn apply_answer(&mut self, sdp: &str) -> Result<(), CallError> {
        let peer = self
            .peer
            .as_mut()
            .ok_or(CallError::InvalidState("no peer connection"))?;
        peer.set_remote_description(sdp).await?;
        self.remote_description_set = true;
        self.drain_pending().await
    }

    /// A remote candidate arrived. Candidates may not be applied before
    /// the remote description is set; early arrivals are held in receipt
    /// order and drained once the description lands.
    pub async fn handle_remote_candidate(&mut self, from: ConnectionId, candidate: String) {
        if self.target.as_ref() != Some(&from) {
            debug!(%from, "ignoring candidate from unrelated connection");
            return;
        }
        if self.remote_description_set {
            if let Some(peer) = self.peer.as_mut() {
                if let Err(e) = peer.add_ice_candidate(&candidate).await {
                    self.fail(e.to_string());
                }
                return;
            }
        }
        self.pending_candidates.push_back(candidate);
    }

    async fn drain_pending(&mut self) -> Result<(), CallError> {
        if !self.remote_description_set {
            return Ok(());
        }
        let Some(peer) = self.peer.as_mut() else {
            return Ok(());
        };
        while let Some(candidate) = self.pending_candidates.pop_front() {
            peer.add_ice_candidate(&candidate).await?;
        }
        Ok(())
    }

    /// Event from the underlying peer connection.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let Some(target) = self.target.clone() else {
                    return;
                };
                if self
                    .send_frame(ClientFrame::IceCandidate { target, candidate })
                    .is_err()
                {
                    self.fail("signaling path closed".into());
                }
            }
            PeerEvent::TrackReceived => {
                // The responder connects on the first usable track; the
                // initiator already connected on the answer.
                if self.state == CallState::Negotiating(NegotiationRole::RemoteOfferReceived) {
                    self.set_state(CallState::Connected);
                }
            }
            PeerEvent::NegotiationFailed(reason) => {
                if self.is_active() {
                    self.fail(reason);
                }
            }
        }
    }

    /// An `error` frame from the server. A relay failure for the in-call
    /// target fails the session; everything else is the embedder's
    /// concern.
    pub fn handle_relay_error(&mut self, code: ErrorCode, message: &str) {
        if code == ErrorCode::UnknownTarget && self.is_active() {
            self.fail(format!("signaling relay failure: {message}"));
        }
    }

    /// The in-call target vanished from presence. Arms the disconnect
    /// deadline; the peer gets `disconnect_timeout` to be treated as an
    /// implicit hangup.
    pub fn handle_target_offline(&mut self, now: Instant) {
        if self.is_active() && self.disconnect_deadline.is_none() {
            debug!("call target offline, arming disconnect deadline");
            self.disconnect_deadline = Some(now + self.config.disconnect_timeout);
        }
    }

    /// The armed deadline, for the event loop's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.disconnect_deadline
    }

    /// Close the session if the disconnect deadline has elapsed.
    pub fn poll_deadline(&mut self, now: Instant) {
        let Some(deadline) = self.disconnect_deadline else {
            return;
        };
        if now >= deadline && self.is_active() {
            info!("peer disconnect timeout elapsed, closing call");
            self.teardown(CallState::Closed);
        }
    }

    /// Our own transport dropped: release immediately, no grace period.
    pub fn handle_transport_closed(&mut self) {
        if self.is_active() {
            self.teardown(CallState::Closed);
        }
    }

    /// Explicit hangup. Safe in any state; terminal states are left as
    /// they are since their resources are already released.
    pub fn hangup(&mut self) {
        if matches!(
            self.state,
            CallState::Idle | CallState::Closed | CallState::Failed
        ) {
            return;
        }
        info!("hangup");
        self.teardown(CallState::Closed);
    }

    fn can_start(&self) -> bool {
        matches!(
            self.state,
            CallState::Idle | CallState::Closed | CallState::Failed
        )
    }

    fn send_frame(&self, frame: ClientFrame) -> Result<(), CallError> {
        self.outbound
            .send(frame)
            .map_err(|_| CallError::SignalingClosed)
    }

    fn teardown(&mut self, final_state: CallState) {
        self.release();
        self.set_state(final_state);
    }

    fn fail(&mut self, reason: String) {
        warn!(reason = %reason, "call failed");
        self.release();
        self.state = CallState::Failed;
        let _ = self.events.send(CallEvent::Failed { reason });
    }

    fn release(&mut self) {
        if let Some(mut media) = self.media.take() {
            media.stop();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.peer_events = None;
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.disconnect_deadline = None;
        self.target = None;
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            self.state = state;
            let _ = self.events.send(CallEvent::StateChanged(state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MediaFlags {
        stopped: AtomicBool,
    }

    struct MockMedia {
        flags: Arc<MediaFlags>,
    }

    impl LocalMedia for MockMedia {
        fn stop(&mut self) {
            self.flags.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockMediaSource {
        fail: bool,
        acquired: Mutex<Vec<Arc<MediaFlags>>>,
    }

    #[async_trait]
    impl MediaSource for MockMediaSource {
        async fn acquire(&self) -> Result<Box<dyn LocalMedia>, CallError> {
            if self.fail {
                return Err(CallError::Media("permission denied".into()));
            }
            let flags = Arc::new(MediaFlags::default());
            self.acquired.lock().unwrap().push(Arc::clone(&flags));
            Ok(Box::new(MockMedia { flags }))
        }
    }

    #[derive(Default)]
    struct PeerLog {
        ops: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl PeerLog {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    struct MockPeer {
        log: Arc<PeerLog>,
        fail_remote: bool,
    }

    impl MockPeer {
        fn push(&self, op: String) {
            self.log.ops.lock().unwrap().push(op);
        }
    }

    #[async_trait]
    impl PeerConnection for MockPeer {
        async fn create_offer(&mut self) -> Result<String, CallError> {
            self.push("create_offer".into());
            Ok("offer-sdp".into())
        }

        async fn create_answer(&mut self) -> Result<String, CallError> {
            self.push("create_answer".into());
            Ok("answer-sdp".into())
        }

        async fn set_local_description(&mut self, sdp: &str) -> Result<(), CallError> {
            self.push(format!("local:{sdp}"));
            Ok(())
        }

        async fn set_remote_description(&mut self, sdp: &str) -> Result<(), CallError> {
            if self.fail_remote {
                return Err(CallError::Negotiation("bad sdp".into()));
            }
            self.push(format!("remote:{sdp}"));
            Ok(())
        }

        async fn add_ice_candidate(&mut self, candidate: &str) -> Result<(), CallError> {
            self.push(format!("ice:{candidate}"));
            Ok(())
        }

        fn close(&mut self) {
            self.log.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockFactory {
        fail_remote: bool,
        peers: Mutex<Vec<Arc<PeerLog>>>,
    }

    impl PeerConnectionFactory for MockFactory {
        fn create(
            &self,
            _ice_servers: &[IceServer],
        ) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), CallError>
        {
            let log = Arc::new(PeerLog::default());
            self.peers.lock().unwrap().push(Arc::clone(&log));
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok((
                Box::new(MockPeer {
                    log,
                    fail_remote: self.fail_remote,
                }),
                rx,
            ))
        }
    }

    struct Harness {
        machine: CallMachine,
        events: mpsc::UnboundedReceiver<CallEvent>,
        outbound: mpsc::UnboundedReceiver<ClientFrame>,
        media: Arc<MockMediaSource>,
        factory: Arc<MockFactory>,
    }

    impl Harness {
        fn sent_frames(&mut self) -> Vec<ClientFrame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.outbound.try_recv() {
                frames.push(frame);
            }
            frames
        }

        fn peer_log(&self, index: usize) -> Arc<PeerLog> {
            Arc::clone(&self.factory.peers.lock().unwrap()[index])
        }

        fn media_stopped(&self, index: usize) -> bool {
            self.media.acquired.lock().unwrap()[index]
                .stopped
                .load(Ordering::SeqCst)
        }
    }

    fn harness() -> Harness {
        harness_with(MockMediaSource::default(), MockFactory::default())
    }

    fn harness_with(media: MockMediaSource, factory: MockFactory) -> Harness {
        let media = Arc::new(media);
        let factory = Arc::new(factory);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (machine, events) = CallMachine::new(
            CallConfig::default(),
            Arc::clone(&media) as Arc<dyn MediaSource>,
            Arc::clone(&factory) as Arc<dyn PeerConnectionFactory>,
            out_tx,
        );
        Harness {
            machine,
            events,
            outbound: out_rx,
            media,
            factory,
        }
    }

    fn ana() -> UserSummary {
        UserSummary {
            name: "Ana".into(),
            email: "ana@example.com".into(),
        }
    }

    #[tokio::test]
    async fn start_call_sends_offer() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");

        h.machine.start_call(target.clone()).await.unwrap();

        assert_eq!(
            h.machine.state(),
            CallState::Negotiating(NegotiationRole::LocalOfferSent)
        );
        let frames = h.sent_frames();
        assert!(matches!(
            &frames[0],
            ClientFrame::Offer { target: t, sdp } if *t == target && sdp == "offer-sdp"
        ));
        let ops = h.peer_log(0).ops();
        assert_eq!(ops, vec!["create_offer", "local:offer-sdp"]);
    }

    #[tokio::test]
    async fn incoming_offer_produces_answer() {
        let mut h = harness();
        let caller = ConnectionId::from("conn-a");

        h.machine
            .handle_offer(caller.clone(), ana(), "offer-sdp".into())
            .await;

        assert_eq!(
            h.machine.state(),
            CallState::Negotiating(NegotiationRole::RemoteOfferReceived)
        );
        let frames = h.sent_frames();
        assert!(matches!(
            &frames[0],
            ClientFrame::Answer { target, sdp } if *target == caller && sdp == "answer-sdp"
        ));

        // Responder connects on the first usable track.
        h.machine.handle_peer_event(PeerEvent::TrackReceived).await;
        assert_eq!(h.machine.state(), CallState::Connected);
    }

    #[tokio::test]
    async fn initiator_connects_on_answer() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();

        h.machine.handle_answer(target, "answer-sdp".into()).await;
        assert_eq!(h.machine.state(), CallState::Connected);
    }

    #[tokio::test]
    async fn answer_from_wrong_connection_is_ignored() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();

        h.machine
            .handle_answer(ConnectionId::from("conn-x"), "answer-sdp".into())
            .await;
        assert_eq!(
            h.machine.state(),
            CallState::Negotiating(NegotiationRole::LocalOfferSent)
        );
    }

    #[tokio::test]
    async fn early_candidates_wait_for_remote_description() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();

        h.machine
            .handle_remote_candidate(target.clone(), "cand-1".into())
            .await;
        h.machine
            .handle_remote_candidate(target.clone(), "cand-2".into())
            .await;

        let log = h.peer_log(0);
        assert!(log.ops().iter().all(|op| !op.starts_with("ice:")));

        h.machine
            .handle_answer(target.clone(), "answer-sdp".into())
            .await;

        let ops = log.ops();
        let remote = ops.iter().position(|op| op == "remote:answer-sdp").unwrap();
        let c1 = ops.iter().position(|op| op == "ice:cand-1").unwrap();
        let c2 = ops.iter().position(|op| op == "ice:cand-2").unwrap();
        assert!(remote < c1 && c1 < c2);

        // Late candidates are applied directly.
        h.machine
            .handle_remote_candidate(target, "cand-3".into())
            .await;
        assert_eq!(log.ops().last().unwrap(), "ice:cand-3");
    }

    #[tokio::test]
    async fn candidate_from_unrelated_connection_is_ignored() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();

        h.machine
            .handle_remote_candidate(ConnectionId::from("conn-x"), "cand".into())
            .await;
        let log = h.peer_log(0);
        assert!(log.ops().iter().all(|op| !op.starts_with("ice:")));
    }

    #[tokio::test]
    async fn local_candidates_are_forwarded_to_target() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();
        h.sent_frames();

        h.machine
            .handle_peer_event(PeerEvent::LocalCandidate("cand-local".into()))
            .await;

        let frames = h.sent_frames();
        assert!(matches!(
            &frames[0],
            ClientFrame::IceCandidate { target: t, candidate }
                if *t == target && candidate == "cand-local"
        ));
    }

    #[tokio::test]
    async fn concurrent_call_request_is_rejected() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();

        let err = h
            .machine
            .start_call(ConnectionId::from("conn-c"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Busy));
        assert_eq!(h.machine.target(), Some(&ConnectionId::from("conn-b")));
    }

    #[tokio::test]
    async fn offer_during_active_session_is_rejected() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();
        h.sent_frames();

        h.machine
            .handle_offer(ConnectionId::from("conn-c"), ana(), "offer-2".into())
            .await;

        // No answer went out and the existing session is untouched.
        assert!(h.sent_frames().is_empty());
        assert_eq!(
            h.machine.state(),
            CallState::Negotiating(NegotiationRole::LocalOfferSent)
        );
        assert_eq!(h.machine.target(), Some(&ConnectionId::from("conn-b")));
    }

    #[tokio::test]
    async fn media_failure_fails_the_call() {
        let mut h = harness_with(
            MockMediaSource {
                fail: true,
                ..Default::default()
            },
            MockFactory::default(),
        );

        let err = h
            .machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Media(_)));
        assert_eq!(h.machine.state(), CallState::Failed);

        let mut saw_failed = false;
        while let Ok(event) = h.events.try_recv() {
            if let CallEvent::Failed { reason } = event {
                assert!(reason.contains("media acquisition failed"));
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn negotiation_failure_releases_resources() {
        let mut h = harness_with(
            MockMediaSource::default(),
            MockFactory {
                fail_remote: true,
                ..Default::default()
            },
        );

        h.machine
            .handle_offer(ConnectionId::from("conn-a"), ana(), "offer-sdp".into())
            .await;

        assert_eq!(h.machine.state(), CallState::Failed);
        assert!(h.media_stopped(0));
        assert!(h.peer_log(0).closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_target_error_fails_active_call() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();

        h.machine
            .handle_relay_error(ErrorCode::UnknownTarget, "no live connection");
        assert_eq!(h.machine.state(), CallState::Failed);
        assert!(h.media_stopped(0));
    }

    #[tokio::test]
    async fn hangup_releases_everything() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();
        h.machine.handle_answer(target, "answer-sdp".into()).await;
        assert_eq!(h.machine.state(), CallState::Connected);

        h.machine.hangup();

        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.media_stopped(0));
        assert!(h.peer_log(0).closed.load(Ordering::SeqCst));
        assert!(h.machine.target().is_none());
    }

    #[tokio::test]
    async fn hangup_mid_negotiation_aborts() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();

        h.machine.hangup();
        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.media_stopped(0));
    }

    #[tokio::test]
    async fn new_call_can_start_after_close() {
        let mut h = harness();
        h.machine
            .start_call(ConnectionId::from("conn-b"))
            .await
            .unwrap();
        h.machine.hangup();

        h.machine
            .start_call(ConnectionId::from("conn-c"))
            .await
            .unwrap();
        assert_eq!(
            h.machine.state(),
            CallState::Negotiating(NegotiationRole::LocalOfferSent)
        );
        // A fresh capture and a fresh peer connection were created.
        assert_eq!(h.media.acquired.lock().unwrap().len(), 2);
        assert_eq!(h.factory.peers.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn peer_disconnect_times_out_into_closed() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();
        h.machine.handle_answer(target, "answer-sdp".into()).await;

        let now = Instant::now();
        h.machine.handle_target_offline(now);
        assert!(h.machine.next_deadline().is_some());

        // Before the deadline the session stays up.
        h.machine.poll_deadline(now + Duration::from_secs(1));
        assert_eq!(h.machine.state(), CallState::Connected);

        h.machine
            .poll_deadline(now + CallConfig::default().disconnect_timeout);
        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.media_stopped(0));
    }

    #[tokio::test]
    async fn transport_close_is_immediate_hangup() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();
        h.machine.handle_answer(target, "answer-sdp".into()).await;

        h.machine.handle_transport_closed();
        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.media_stopped(0));
        assert!(h.peer_log(0).closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn two_party_call_flow() {
        let mut a = harness();
        let mut b = harness();
        let a_id = ConnectionId::from("conn-a");
        let b_id = ConnectionId::from("conn-b");

        // A calls B; the relay would rewrite target → from.
        a.machine.start_call(b_id.clone()).await.unwrap();
        let frames = a.sent_frames();
        let ClientFrame::Offer { target, sdp } = &frames[0] else {
            panic!("expected offer, got {frames:?}");
        };
        assert_eq!(target, &b_id);
        b.machine
            .handle_offer(a_id.clone(), ana(), sdp.clone())
            .await;

        let frames = b.sent_frames();
        let ClientFrame::Answer { target, sdp } = &frames[0] else {
            panic!("expected answer, got {frames:?}");
        };
        assert_eq!(target, &a_id);
        a.machine.handle_answer(b_id.clone(), sdp.clone()).await;
        b.machine.handle_peer_event(PeerEvent::TrackReceived).await;

        assert_eq!(a.machine.state(), CallState::Connected);
        assert_eq!(b.machine.state(), CallState::Connected);

        // A hangs up; B sees A's connection vanish and times out.
        a.machine.hangup();
        assert_eq!(a.machine.state(), CallState::Closed);

        let now = Instant::now();
        b.machine.handle_target_offline(now);
        b.machine
            .poll_deadline(now + CallConfig::default().disconnect_timeout);
        assert_eq!(b.machine.state(), CallState::Closed);

        assert!(a.media_stopped(0));
        assert!(b.media_stopped(0));
        assert!(a.peer_log(0).closed.load(Ordering::SeqCst));
        assert!(b.peer_log(0).closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn state_change_events_are_emitted_in_order() {
        let mut h = harness();
        let target = ConnectionId::from("conn-b");
        h.machine.start_call(target.clone()).await.unwrap();
        h.machine.handle_answer(target, "answer-sdp".into()).await;
        h.machine.hangup();

        let mut states = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let CallEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                CallState::Negotiating(NegotiationRole::LocalOfferSent),
                CallState::Connected,
                CallState::Closed,
            ]
        );
    }
}

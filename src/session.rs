//! Streaming session state machine.
//!
//! One session per connection: `Connecting -> Open -> Closed`. While open,
//! each round acquires a trigger (a control signal or a pacing tick),
//! resolves the frame length through the flow policy, generates and encodes
//! the samples, and writes one binary message. Any read or write fault, a
//! malformed demand signal, peer close, idle timeout or cancellation moves
//! the session to `Closed`. There is no retry and no outbound queue: the
//! transport's own send buffer is the only backpressure.

use crate::config::SessionConfig;
use crate::frame;
use crate::generator::SampleGenerator;
use crate::policy::FlowPolicy;
use crate::protocol::SignalError;
use crate::transport::{FrameTransport, TransportError};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, connection upgrade not yet handed over.
    Connecting,
    /// Streaming rounds.
    Open,
    /// Terminal.
    Closed,
}

/// Why a session ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Cancelled,
    IdleTimeout,
}

/// Terminal session faults.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed control signal: {0}")]
    Signal(#[from] SignalError),
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub samples_sent: u64,
    pub bytes_sent: u64,
}

/// One connection's streaming state.
#[derive(Debug)]
pub struct Session {
    id: u64,
    state: SessionState,
    policy: FlowPolicy,
    generator: SampleGenerator,
    idle_timeout: Option<Duration>,
    stats: SessionStats,
}

impl Session {
    pub fn new(id: u64, config: &SessionConfig) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            policy: FlowPolicy::new(config),
            generator: SampleGenerator::new(config.range, config.seed),
            idle_timeout: config.idle_timeout,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn policy(&self) -> &FlowPolicy {
        &self.policy
    }

    /// Stream over `transport` until the connection ends or `cancel` fires.
    ///
    /// The session is `Closed` when this returns, whatever the outcome.
    pub async fn run<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        cancel: CancellationToken,
    ) -> Result<CloseReason, SessionError> {
        self.state = SessionState::Open;
        debug!(
            session = self.id,
            policy = %self.policy.kind(),
            groups = self.policy.groups(),
            "Session open"
        );

        let result = match self.policy.pacing() {
            Some(period) => self.run_paced(transport, &cancel, period).await,
            None => self.run_on_demand(transport, &cancel).await,
        };
        self.state = SessionState::Closed;

        let stats = self.stats;
        match &result {
            Ok(reason) => info!(
                session = self.id,
                reason = ?reason,
                frames = stats.frames_sent,
                bytes = stats.bytes_sent,
                "Session closed"
            ),
            Err(SessionError::Signal(e)) => warn!(
                session = self.id,
                error = %e,
                frames = stats.frames_sent,
                "Session closed on protocol fault"
            ),
            Err(SessionError::Transport(e)) => info!(
                session = self.id,
                error = %e,
                frames = stats.frames_sent,
                bytes = stats.bytes_sent,
                "Session closed on transport fault"
            ),
        }
        result
    }

    /// Demand-driven and adaptive rounds: one frame per inbound signal.
    async fn run_on_demand<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        cancel: &CancellationToken,
    ) -> Result<CloseReason, SessionError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CloseReason::Cancelled),
                received = next_signal(transport, self.idle_timeout) => received,
            };

            let signal = match received {
                None => return Ok(CloseReason::IdleTimeout),
                Some(Ok(Some(signal))) => signal,
                Some(Ok(None)) => return Ok(CloseReason::PeerClosed),
                Some(Err(e)) => return Err(e.into()),
            };
            trace!(session = self.id, len = signal.len(), "Control signal");

            let Some(len) = self.policy.on_signal(&signal)? else {
                continue;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CloseReason::Cancelled),
                sent = self.transmit(transport, len) => sent?,
            }
        }
    }

    /// Interval rounds: one frame per tick, inbound content ignored.
    ///
    /// Inbound messages are still drained so a peer close is noticed.
    async fn run_paced<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        cancel: &CancellationToken,
        period: Duration,
    ) -> Result<CloseReason, SessionError> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CloseReason::Cancelled),
                received = transport.recv() => match received {
                    Ok(Some(signal)) => {
                        trace!(session = self.id, len = signal.len(), "Ignoring inbound message");
                    }
                    Ok(None) => return Ok(CloseReason::PeerClosed),
                    Err(e) => return Err(e.into()),
                },
                _ = ticker.tick() => {
                    let len = self.policy.on_tick();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(CloseReason::Cancelled),
                        sent = self.transmit(transport, len) => sent?,
                    }
                }
            }
        }
    }

    /// Generate, encode and write one frame of `len` samples.
    async fn transmit<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        len: usize,
    ) -> Result<(), TransportError> {
        let samples = self.generator.generate(len);
        let frame = frame::encode(&samples);
        let bytes = frame.len();

        transport.send(frame).await?;

        self.stats.frames_sent += 1;
        self.stats.samples_sent += len as u64;
        self.stats.bytes_sent += bytes as u64;
        trace!(session = self.id, samples = len, bytes, "Frame sent");
        Ok(())
    }
}

/// Wait for the next inbound payload. `None` when the idle limit elapsed.
async fn next_signal<T: FrameTransport>(
    transport: &mut T,
    idle_timeout: Option<Duration>,
) -> Option<Result<Option<Bytes>, TransportError>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, transport.recv()).await.ok(),
        None => Some(transport.recv().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::SampleRange;
    use crate::policy::PolicyKind;
    use crate::transport::testing::{ScriptedTransport, Step};
    use tokio_test::{assert_err, assert_ok};

    fn config(policy: PolicyKind) -> SessionConfig {
        SessionConfig {
            policy,
            group_width: 5,
            default_groups: 4,
            max_groups: 1000,
            interval: Duration::from_millis(100),
            idle_timeout: None,
            range: SampleRange::new(0.0, 50.0),
            seed: Some(1),
        }
    }

    #[tokio::test]
    async fn test_demand_frame_size() {
        let mut session = Session::new(1, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::signals(&["3"]);

        let reason = assert_ok!(session.run(&mut transport, CancellationToken::new()).await);
        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0].len(), 60);
        assert_eq!(frame::decode(&transport.sent[0]).unwrap().len(), 15);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_demand_one_frame_per_signal() {
        let mut session = Session::new(2, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::signals(&["1", "0", "10"]);

        assert_ok!(session.run(&mut transport, CancellationToken::new()).await);
        let lens: Vec<usize> = transport.sent.iter().map(|f| f.len()).collect();
        assert_eq!(lens, vec![20, 0, 200]);
        assert_eq!(
            session.stats(),
            SessionStats {
                frames_sent: 3,
                samples_sent: 55,
                bytes_sent: 220,
            }
        );
    }

    #[tokio::test]
    async fn test_demand_malformed_signal_closes() {
        let mut session = Session::new(3, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::signals(&["abc", "3"]);

        let err = assert_err!(session.run(&mut transport, CancellationToken::new()).await);
        assert!(matches!(err, SessionError::Signal(SignalError::NotInteger(_))));
        assert!(transport.sent.is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_demand_rejects_oversized_request() {
        let mut session = Session::new(4, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::signals(&["2", "1001"]);

        let err = assert_err!(session.run(&mut transport, CancellationToken::new()).await);
        assert!(matches!(
            err,
            SessionError::Signal(SignalError::TooLarge { requested: 1001, .. })
        ));
        assert_eq!(transport.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_read_fault_closes() {
        let mut session = Session::new(5, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::new(vec![
            Step::Signal(Bytes::from_static(b"1")),
            Step::Fail,
            Step::Signal(Bytes::from_static(b"1")),
        ]);

        let err = assert_err!(session.run(&mut transport, CancellationToken::new()).await);
        assert!(matches!(err, SessionError::Transport(TransportError::Recv(_))));
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_write_fault_closes() {
        let mut session = Session::new(6, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::signals(&["1", "1", "1"]).fail_sends_after(1);

        let err = assert_err!(session.run(&mut transport, CancellationToken::new()).await);
        assert!(matches!(err, SessionError::Transport(TransportError::Send(_))));
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(session.stats().frames_sent, 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_adaptive_reuses_last_request() {
        let mut session = Session::new(7, &config(PolicyKind::Adaptive));
        let mut transport = ScriptedTransport::signals(&["next", "8", "next", "4"]);

        assert_ok!(session.run(&mut transport, CancellationToken::new()).await);
        let lens: Vec<usize> = transport.sent.iter().map(|f| f.len() / 4).collect();
        assert_eq!(lens, vec![20, 40, 40, 20]);
    }

    #[tokio::test]
    async fn test_cancelled_before_signal() {
        let mut session = Session::new(8, &config(PolicyKind::Demand));
        let mut transport = ScriptedTransport::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reason = assert_ok!(session.run(&mut transport, cancel).await);
        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let mut config = config(PolicyKind::Demand);
        config.idle_timeout = Some(Duration::from_secs(30));
        let mut session = Session::new(9, &config);
        let mut transport = ScriptedTransport::new(vec![Step::Signal(Bytes::from_static(b"1"))]);

        let started = tokio::time::Instant::now();
        let reason = assert_ok!(session.run(&mut transport, CancellationToken::new()).await);
        assert_eq!(reason, CloseReason::IdleTimeout);
        assert_eq!(transport.sent.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_pacing() {
        let mut session = Session::new(10, &config(PolicyKind::Interval));
        let mut transport = ScriptedTransport::new(vec![
            Step::Signal(Bytes::from_static(b"abc")),
            Step::Signal(Bytes::from_static(b"99")),
        ]);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            stopper.cancel();
        });

        let reason = assert_ok!(session.run(&mut transport, cancel).await);
        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(transport.sent.len(), 5);
        assert!(transport.sent.iter().all(|f| f.len() == 4 * 5 * 4));
        for pair in transport.sent_at.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ends_on_peer_close() {
        let mut session = Session::new(11, &config(PolicyKind::Interval));
        let mut transport = ScriptedTransport::new(vec![Step::Close]);

        let reason = assert_ok!(session.run(&mut transport, CancellationToken::new()).await);
        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_write_fault_stops_frames() {
        let mut session = Session::new(12, &config(PolicyKind::Interval));
        let mut transport = ScriptedTransport::new(vec![]).fail_sends_after(2);

        let err = assert_err!(session.run(&mut transport, CancellationToken::new()).await);
        assert!(matches!(err, SessionError::Transport(TransportError::Send(_))));
        assert_eq!(transport.sent.len(), 2);
    }

    #[test]
    fn test_new_session_is_connecting() {
        let session = Session::new(13, &config(PolicyKind::Demand));
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.stats(), SessionStats::default());
        assert_eq!(session.policy().groups(), 4);
    }
}

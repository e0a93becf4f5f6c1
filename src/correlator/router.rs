//! Inbound frame routing and request slots

use super::pending::PendingResponse;
use crate::error::{DeviceError, Result};
use nomad_protocol::{
    CodecError, CommandId, DeviceInfo, DeviceStats, Frame, LogEvent, RequestEvent, RequestKind,
    RequestState, RequestStateMachine,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Receives device log lines on the receive path.
///
/// Runs inline with frame decoding, so it must return quickly and must not
/// block; hand the line off to a channel if it needs real work.
pub type LogObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// What the correlator did with an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDisposition {
    /// Delivered to the waiting request of this kind
    Resolved(RequestKind),
    /// Decoded as a log line (forwarded if an observer is registered)
    Logged,
    /// Nobody was waiting for it: late, duplicate or unsolicited
    Unsolicited(CommandId),
    /// The payload could not be decoded; the frame was dropped
    Rejected(CodecError),
}

mod sealed {
    use super::{CorrelatorState, RequestSlot};

    pub trait Sealed: Sized {
        fn slot(state: &mut CorrelatorState) -> &mut RequestSlot<Self>;
    }

    impl Sealed for nomad_protocol::DeviceInfo {
        fn slot(state: &mut CorrelatorState) -> &mut RequestSlot<Self> {
            &mut state.info
        }
    }

    impl Sealed for nomad_protocol::DeviceStats {
        fn slot(state: &mut CorrelatorState) -> &mut RequestSlot<Self> {
            &mut state.stats
        }
    }
}

/// A response type a blocking request resolves to
pub trait Reply: sealed::Sealed + Copy + Send + 'static {
    /// Request kind answered with this type
    const KIND: RequestKind;

    fn decode(payload: &[u8]) -> std::result::Result<Self, CodecError>;
}

impl Reply for DeviceInfo {
    const KIND: RequestKind = RequestKind::DeviceInfo;

    fn decode(payload: &[u8]) -> std::result::Result<Self, CodecError> {
        DeviceInfo::decode(payload)
    }
}

impl Reply for DeviceStats {
    const KIND: RequestKind = RequestKind::DeviceStats;

    fn decode(payload: &[u8]) -> std::result::Result<Self, CodecError> {
        DeviceStats::decode(payload)
    }
}

pub struct RequestSlot<T> {
    machine: RequestStateMachine,
    waiter: Option<oneshot::Sender<T>>,
    generation: u64,
}

impl<T> Default for RequestSlot<T> {
    fn default() -> Self {
        Self {
            machine: RequestStateMachine::new(),
            waiter: None,
            generation: 0,
        }
    }
}

impl<T> RequestSlot<T> {
    /// Return to Idle if `generation` still owns the slot
    fn release(&mut self, generation: u64, event: RequestEvent) {
        if self.generation != generation || self.machine.state() == RequestState::Idle {
            return;
        }
        self.waiter = None;
        self.machine.process_event(event);
    }

    fn abandon(&mut self) {
        let generation = self.generation;
        self.release(generation, RequestEvent::Abandoned);
    }
}

impl<T: Reply> RequestSlot<T> {
    /// Decode `payload` and hand it to the waiter
    ///
    /// Returns the delivered value, or what happened to the frame instead.
    fn accept(&mut self, payload: &[u8]) -> std::result::Result<T, FrameDisposition> {
        let kind = T::KIND;

        if !self.machine.is_awaiting() {
            debug!("Discarding late or duplicate {:?} response", kind);
            return Err(FrameDisposition::Unsolicited(kind.command_id()));
        }

        let response = match T::decode(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping malformed {:?} response: {}", kind, e);
                return Err(FrameDisposition::Rejected(e));
            }
        };

        self.machine.process_event(RequestEvent::ResponseReceived);

        let delivered = self
            .waiter
            .take()
            .map(|tx| tx.send(response).is_ok())
            .unwrap_or(false);

        if !delivered {
            self.abandon();
            debug!("Waiter for {:?} is gone; response discarded", kind);
            return Err(FrameDisposition::Unsolicited(kind.command_id()));
        }

        Ok(response)
    }
}

#[derive(Default)]
pub struct CorrelatorState {
    info: RequestSlot<DeviceInfo>,
    stats: RequestSlot<DeviceStats>,
    latest_stats: Option<DeviceStats>,
    log_observer: Option<LogObserver>,
}

fn lock_state(state: &Mutex<CorrelatorState>) -> MutexGuard<'_, CorrelatorState> {
    // Nothing in the critical sections can leave the state half-updated
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Matches inbound frames to the requests waiting for them
#[derive(Default)]
pub struct ResponseCorrelator {
    state: Arc<Mutex<CorrelatorState>>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the request slot for `T`
    ///
    /// Call this before transmitting the request frame so a fast reply
    /// cannot arrive ahead of the slot.
    pub fn issue_request<T: Reply>(&self) -> Result<PendingResponse<T>> {
        let mut state = lock_state(&self.state);
        let slot = T::slot(&mut state);

        if !slot.machine.process_event(RequestEvent::Issued).is_success() {
            return Err(DeviceError::RequestAlreadyInFlight(T::KIND));
        }

        let (tx, rx) = oneshot::channel();
        slot.generation = slot.generation.wrapping_add(1);
        slot.waiter = Some(tx);

        debug!("Request issued: {:?} (gen {})", T::KIND, slot.generation);

        Ok(PendingResponse {
            generation: slot.generation,
            rx,
            shared: self.state.clone(),
        })
    }

    /// Wait for the response to `pending`, up to `timeout`
    ///
    /// Either way the slot is back to Idle when this returns.
    pub async fn await_response<T: Reply>(&self, mut pending: PendingResponse<T>, timeout: Duration) -> Result<T> {
        let kind = T::KIND;

        match tokio::time::timeout(timeout, &mut pending.rx).await {
            Ok(Ok(response)) => {
                T::slot(&mut lock_state(&self.state)).release(pending.generation, RequestEvent::Released);
                Ok(response)
            }
            // Waiter dropped by `close`
            Ok(Err(_)) => Err(DeviceError::LinkClosed),
            Err(_) => {
                let mut state = lock_state(&self.state);
                let slot = T::slot(&mut state);

                // The response may have landed as the deadline fired
                if let Ok(response) = pending.rx.try_recv() {
                    slot.release(pending.generation, RequestEvent::Released);
                    return Ok(response);
                }

                if slot.generation == pending.generation {
                    slot.machine.process_event(RequestEvent::DeadlineElapsed);
                    slot.release(pending.generation, RequestEvent::Released);
                }

                warn!("No response to {:?} within {:?}", kind, timeout);
                Err(DeviceError::RequestTimedOut { kind, timeout })
            }
        }
    }

    /// Give up on a request that was never transmitted
    pub fn cancel<T: Reply>(&self, pending: PendingResponse<T>) {
        debug!("Request cancelled: {:?}", T::KIND);
        drop(pending);
    }

    /// Classify one decoded inbound frame
    ///
    /// Never blocks; errors affect only this frame.
    pub fn on_frame_received(&self, frame: &Frame) -> FrameDisposition {
        match frame.command_id() {
            CommandId::LoggingOutput => self.forward_log(frame.payload()),
            CommandId::DeviceInfoRead => {
                let mut state = lock_state(&self.state);
                match state.info.accept(frame.payload()) {
                    Ok(_) => FrameDisposition::Resolved(RequestKind::DeviceInfo),
                    Err(disposition) => disposition,
                }
            }
            CommandId::DeviceStatsRead => {
                let mut state = lock_state(&self.state);
                match state.stats.accept(frame.payload()) {
                    Ok(stats) => {
                        state.latest_stats = Some(stats);
                        FrameDisposition::Resolved(RequestKind::DeviceStats)
                    }
                    Err(disposition) => disposition,
                }
            }
            id => {
                debug!("Discarding unsolicited frame {}", id);
                FrameDisposition::Unsolicited(id)
            }
        }
    }

    fn forward_log(&self, payload: &[u8]) -> FrameDisposition {
        let line = match LogEvent::decode(payload) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping log output: {}", e);
                return FrameDisposition::Rejected(e);
            }
        };

        // Call outside the lock so the observer may use the correlator
        let observer = lock_state(&self.state).log_observer.clone();
        match observer {
            Some(observer) => observer(&line),
            None => debug!("Device log (no observer): {}", line),
        }

        FrameDisposition::Logged
    }

    /// Install the log observer, replacing any previous one
    pub fn register_log_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock_state(&self.state).log_observer = Some(Arc::new(observer));
    }

    pub fn clear_log_observer(&self) {
        lock_state(&self.state).log_observer = None;
    }

    /// Most recent stats response, if any has resolved a request
    pub fn latest_stats(&self) -> Option<DeviceStats> {
        lock_state(&self.state).latest_stats
    }

    /// Current state of the slot for `kind`
    pub fn state(&self, kind: RequestKind) -> RequestState {
        let state = lock_state(&self.state);
        match kind {
            RequestKind::DeviceInfo => state.info.machine.state(),
            RequestKind::DeviceStats => state.stats.machine.state(),
        }
    }

    /// Fail every outstanding request; waiters see `LinkClosed`
    pub fn close(&self) {
        let mut state = lock_state(&self.state);
        state.info.abandon();
        state.stats.abandon();
    }
}

impl<T: Reply> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        // No-op once the request was released by await/timeout
        T::slot(&mut lock_state(&self.shared)).release(self.generation, RequestEvent::Abandoned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nomad_protocol::telemetry::DEVICE_ID_LEN;

    const SHORT: Duration = Duration::from_millis(30);

    fn info() -> DeviceInfo {
        DeviceInfo {
            firmware_major: 1,
            firmware_minor: 2,
            device_id: [0x5a; DEVICE_ID_LEN],
        }
    }

    fn stats(uptime: u32) -> DeviceStats {
        DeviceStats {
            fault: 0,
            control_status: 3,
            uptime,
            voltage_bus: 24.0,
            driver_temp: 30.5,
            fet_temp: 28.0,
            motor_temp: 32.2,
        }
    }

    fn info_frame() -> Frame {
        Frame::new(CommandId::DeviceInfoRead, info().to_payload()).unwrap()
    }

    fn stats_frame(uptime: u32) -> Frame {
        Frame::new(CommandId::DeviceStatsRead, stats(uptime).to_payload()).unwrap()
    }

    #[tokio::test]
    async fn test_response_resolves_request() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.issue_request::<DeviceInfo>().unwrap();
        assert_eq!(pending.kind(), RequestKind::DeviceInfo);
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::AwaitingResponse);

        assert_eq!(
            correlator.on_frame_received(&info_frame()),
            FrameDisposition::Resolved(RequestKind::DeviceInfo)
        );
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::Resolved);

        let response = correlator.await_response(pending, SHORT).await.unwrap();
        assert_eq!(response, info());
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::Idle);
    }

    #[tokio::test]
    async fn test_second_request_same_kind_rejected() {
        let correlator = ResponseCorrelator::new();
        let _first = correlator.issue_request::<DeviceStats>().unwrap();

        assert!(matches!(
            correlator.issue_request::<DeviceStats>(),
            Err(DeviceError::RequestAlreadyInFlight(RequestKind::DeviceStats))
        ));
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let correlator = ResponseCorrelator::new();
        let info_pending = correlator.issue_request::<DeviceInfo>().unwrap();
        let stats_pending = correlator.issue_request::<DeviceStats>().unwrap();

        correlator.on_frame_received(&stats_frame(7));
        let response = correlator.await_response(stats_pending, SHORT).await.unwrap();
        assert_eq!(response, stats(7));

        // Info is still waiting
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::AwaitingResponse);
        correlator.on_frame_received(&info_frame());
        assert!(correlator.await_response(info_pending, SHORT).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_returns_to_idle() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.issue_request::<DeviceStats>().unwrap();

        let result = correlator.await_response(pending, SHORT).await;
        assert!(matches!(
            result,
            Err(DeviceError::RequestTimedOut {
                kind: RequestKind::DeviceStats,
                ..
            })
        ));
        assert_eq!(correlator.state(RequestKind::DeviceStats), RequestState::Idle);

        // Subsequent request of the same kind works normally
        let pending = correlator.issue_request::<DeviceStats>().unwrap();
        correlator.on_frame_received(&stats_frame(1));
        assert!(correlator.await_response(pending, SHORT).await.is_ok());
    }

    #[tokio::test]
    async fn test_late_response_discarded() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.issue_request::<DeviceStats>().unwrap();
        assert!(correlator.await_response(pending, SHORT).await.is_err());

        // Reply to the timed-out request shows up
        assert_eq!(
            correlator.on_frame_received(&stats_frame(100)),
            FrameDisposition::Unsolicited(CommandId::DeviceStatsRead)
        );
        assert_eq!(correlator.latest_stats(), None);

        // Next request gets its own answer, not the stale one
        let pending = correlator.issue_request::<DeviceStats>().unwrap();
        correlator.on_frame_received(&stats_frame(200));
        let response = correlator.await_response(pending, SHORT).await.unwrap();
        assert_eq!(response, stats(200));
        assert_eq!(correlator.latest_stats(), Some(stats(200)));
    }

    #[tokio::test]
    async fn test_response_delivered_across_tasks() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let pending = correlator.issue_request::<DeviceInfo>().unwrap();

        let receiver = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            receiver.on_frame_received(&info_frame());
        });

        let response = correlator
            .await_response(pending, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, info());
    }

    #[tokio::test]
    async fn test_malformed_response_keeps_waiting() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.issue_request::<DeviceStats>().unwrap();

        let short = Frame::new(CommandId::DeviceStatsRead, vec![0u8; 10]).unwrap();
        assert!(matches!(
            correlator.on_frame_received(&short),
            FrameDisposition::Rejected(CodecError::TruncatedPayload { .. })
        ));
        assert_eq!(correlator.state(RequestKind::DeviceStats), RequestState::AwaitingResponse);

        correlator.on_frame_received(&stats_frame(5));
        assert!(correlator.await_response(pending, SHORT).await.is_ok());
    }

    #[tokio::test]
    async fn test_short_stats_payload_rejected_without_panic() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.issue_request::<DeviceStats>().unwrap();

        // Four bytes short of the real layout
        let short = Frame::new(CommandId::DeviceStatsRead, vec![0u8; 18]).unwrap();
        assert_eq!(
            correlator.on_frame_received(&short),
            FrameDisposition::Rejected(CodecError::TruncatedPayload {
                needed: 22,
                available: 18
            })
        );
        assert_eq!(correlator.latest_stats(), None);

        correlator.on_frame_received(&stats_frame(3));
        assert_eq!(correlator.await_response(pending, SHORT).await.unwrap(), stats(3));
    }

    #[test]
    fn test_log_forwarded_to_observer() {
        let correlator = ResponseCorrelator::new();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        correlator.register_log_observer(move |line| sink.lock().unwrap().push(line.to_string()));

        let frame = Frame::new(CommandId::LoggingOutput, LogEvent::to_payload("hello").unwrap()).unwrap();
        assert_eq!(correlator.on_frame_received(&frame), FrameDisposition::Logged);
        assert_eq!(*lines.lock().unwrap(), vec!["hello".to_string()]);

        correlator.clear_log_observer();
        assert_eq!(correlator.on_frame_received(&frame), FrameDisposition::Logged);
        assert_eq!(lines.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_log_does_not_touch_requests() {
        let correlator = ResponseCorrelator::new();
        let _pending = correlator.issue_request::<DeviceInfo>().unwrap();

        let bad = Frame::new(CommandId::LoggingOutput, vec![0x02, 0xc3, 0x28]).unwrap();
        assert!(matches!(
            correlator.on_frame_received(&bad),
            FrameDisposition::Rejected(CodecError::InvalidEncoding(_))
        ));
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::AwaitingResponse);
    }

    #[test]
    fn test_unsolicited_frames_discarded() {
        let correlator = ResponseCorrelator::new();
        assert_eq!(
            correlator.on_frame_received(&Frame::empty(CommandId::CalibrateMotor)),
            FrameDisposition::Unsolicited(CommandId::CalibrateMotor)
        );
        assert_eq!(
            correlator.on_frame_received(&stats_frame(1)),
            FrameDisposition::Unsolicited(CommandId::DeviceStatsRead)
        );
        assert_eq!(correlator.latest_stats(), None);
    }

    #[test]
    fn test_dropped_handle_frees_slot() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.issue_request::<DeviceInfo>().unwrap();
        correlator.cancel(pending);
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::Idle);

        let pending = correlator.issue_request::<DeviceInfo>().unwrap();
        correlator.on_frame_received(&info_frame());
        drop(pending);
        assert_eq!(correlator.state(RequestKind::DeviceInfo), RequestState::Idle);
        assert!(correlator.issue_request::<DeviceInfo>().is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let pending = correlator.issue_request::<DeviceStats>().unwrap();

        let closer = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        let result = correlator.await_response(pending, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(DeviceError::LinkClosed)));
        assert_eq!(correlator.state(RequestKind::DeviceStats), RequestState::Idle);
    }
}

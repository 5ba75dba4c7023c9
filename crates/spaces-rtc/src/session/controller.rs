//! Join/leave state machine over the shared transport connection.
//!
//! The controller owns the only [`Phase`] of the process. Every phase
//! change happens inside [`ConnectionSessionController::transition`], under
//! a short lock that is never held across an await. Joins and leaves run as
//! spawned attempts that publish their outcome on a watch channel, so a
//! caller that times out stops waiting without cancelling the attempt.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use spaces_common::{new_correlation_id, Event};
use spaces_config::schema::{ReconnectConfig, RtcConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PreconditionError, RtcError, RtcResult};
use crate::microphone::MicrophoneTrackController;
use crate::policy::VoicePolicy;
use crate::screen_share::ScreenShareController;
use crate::state::SharedStateBroadcaster;
use crate::transport::{ConnectionState, TransportClient};

use super::reconnect::backoff_delay;
use super::types::{JoinRequest, Session, Teardown};

type Outcome<T> = watch::Receiver<Option<RtcResult<T>>>;
type OutcomeTx<T> = watch::Sender<Option<RtcResult<T>>>;

enum Phase {
    Idle,
    Joining {
        channel: String,
        outcome: Outcome<Session>,
    },
    Connected {
        session: Session,
        request: JoinRequest,
    },
    Leaving {
        done: Outcome<()>,
    },
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Joining { .. } => "joining",
            Self::Connected { .. } => "connected",
            Self::Leaving { .. } => "leaving",
        }
    }
}

enum JoinStep {
    AlreadyJoined,
    LeaveFirst,
    AwaitJoin {
        same_channel: bool,
        outcome: Outcome<Session>,
    },
    AwaitLeave(Outcome<()>),
    Start(OutcomeTx<Session>, Outcome<Session>),
}

enum LeaveStep {
    Idle,
    AwaitJoin(Outcome<Session>),
    AwaitLeave(Outcome<()>),
    Start(Session, OutcomeTx<()>, Outcome<()>),
}

struct Inner {
    transport: Arc<dyn TransportClient>,
    policy: Arc<dyn VoicePolicy>,
    broadcaster: SharedStateBroadcaster,
    microphone: MicrophoneTrackController,
    screen: ScreenShareController,
    /// Open while a session is connected; the track controllers publish
    /// only through an open gate.
    gate: watch::Sender<bool>,
    phase: Mutex<Phase>,
    join_timeout: Duration,
    reconnect: ReconnectConfig,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ConnectionSessionController {
    inner: Arc<Inner>,
}

impl ConnectionSessionController {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        policy: Arc<dyn VoicePolicy>,
        broadcaster: SharedStateBroadcaster,
        microphone: MicrophoneTrackController,
        screen: ScreenShareController,
        gate: watch::Sender<bool>,
        config: &RtcConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                broadcaster,
                microphone,
                screen,
                gate,
                phase: Mutex::new(Phase::Idle),
                join_timeout: effective_join_timeout(config),
                reconnect: config.reconnect.clone(),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Run `f` against the phase under its lock.
    fn transition<R>(&self, f: impl FnOnce(&mut Phase) -> R) -> R {
        let mut phase = self.inner.phase.lock().unwrap_or_else(|e| e.into_inner());
        let before = phase.name();
        let result = f(&mut phase);
        if phase.name() != before {
            debug!(from = before, to = phase.name(), "session phase");
        }
        result
    }

    fn reconnect_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .reconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_session(&self) -> Option<Session> {
        self.transition(|phase| match phase {
            Phase::Connected { session, .. } => Some(session.clone()),
            _ => None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transition(|phase| matches!(phase, Phase::Connected { .. }))
    }

    // -- Join ---------------------------------------------------------------

    /// Join `request.channel`.
    ///
    /// Joining the channel that is already connected returns `Ok(true)`
    /// without touching the transport. Concurrent callers share one
    /// transport join. Joining a different channel leaves the current one
    /// first. Cancels any scheduled rejoin.
    pub async fn join(&self, request: JoinRequest) -> RtcResult<bool> {
        self.cancel_reconnect();
        self.join_inner(request).await
    }

    async fn join_inner(&self, request: JoinRequest) -> RtcResult<bool> {
        if let Err(refused) = self.check_preconditions(&request) {
            warn!(channel = %request.channel, %refused, "join refused");
            return Err(refused.into());
        }

        let timeout = self.inner.join_timeout;
        let deadline = Instant::now() + timeout;
        let timed_out = || RtcError::Timeout {
            operation: "join",
            after: timeout,
        };

        loop {
            let step = self.transition(|phase| match phase {
                Phase::Connected { session, .. } if session.channel_id == request.channel => {
                    JoinStep::AlreadyJoined
                }
                Phase::Connected { .. } => JoinStep::LeaveFirst,
                Phase::Joining { channel, outcome } => JoinStep::AwaitJoin {
                    same_channel: *channel == request.channel,
                    outcome: outcome.clone(),
                },
                Phase::Leaving { done } => JoinStep::AwaitLeave(done.clone()),
                Phase::Idle => {
                    let (tx, rx) = watch::channel(None);
                    *phase = Phase::Joining {
                        channel: request.channel.clone(),
                        outcome: rx.clone(),
                    };
                    JoinStep::Start(tx, rx)
                }
            });

            match step {
                JoinStep::AlreadyJoined => {
                    debug!(channel = %request.channel, "already joined");
                    return Ok(true);
                }
                JoinStep::LeaveFirst => {
                    info!(channel = %request.channel, "switching channels");
                    self.leave_inner(deadline).await?;
                }
                JoinStep::AwaitJoin {
                    same_channel: true,
                    outcome,
                } => {
                    debug!(channel = %request.channel, "join in flight, waiting for it");
                    return settle(outcome, deadline)
                        .await
                        .unwrap_or_else(|| Err(timed_out()))
                        .map(|_| true);
                }
                JoinStep::AwaitJoin {
                    same_channel: false,
                    outcome,
                } => {
                    if settle(outcome, deadline).await.is_none() {
                        return Err(timed_out());
                    }
                }
                JoinStep::AwaitLeave(done) => {
                    if settle(done, deadline).await.is_none() {
                        return Err(timed_out());
                    }
                }
                JoinStep::Start(tx, rx) => {
                    let this = self.clone();
                    let request = request.clone();
                    tokio::spawn(async move { this.run_join(request, tx).await });
                    return settle(rx, deadline)
                        .await
                        .unwrap_or_else(|| Err(timed_out()))
                        .map(|_| true);
                }
            }
        }
    }

    fn check_preconditions(&self, request: &JoinRequest) -> Result<(), PreconditionError> {
        if request.app_id.trim().is_empty() {
            return Err(PreconditionError::MissingAppId);
        }
        if request.channel.trim().is_empty() {
            return Err(PreconditionError::MissingChannel);
        }
        if self.inner.policy.voice_disabled(&request.channel) {
            return Err(PreconditionError::VoiceDisabled(request.channel.clone()));
        }
        Ok(())
    }

    async fn run_join(&self, request: JoinRequest, outcome: OutcomeTx<Session>) {
        let cid = new_correlation_id();
        let channel = request.channel.clone();
        info!(cid = %cid, channel = %channel, uid = ?request.uid, "joining channel");

        self.inner.broadcaster.update(|s| {
            s.connection_state = ConnectionState::Connecting;
            s.is_loading = true;
            s.channel_id = Some(channel.clone());
            s.error = None;
        });

        let joined = self
            .inner
            .transport
            .join(
                &request.app_id,
                &channel,
                request.token.as_deref(),
                request.uid,
            )
            .await;

        let result = match joined {
            Ok(uid) => {
                let session = Session::new(channel.clone(), uid);
                let recorded = session.clone();
                self.transition(move |phase| {
                    *phase = Phase::Connected {
                        session: recorded,
                        request,
                    }
                });
                self.inner.gate.send_replace(true);
                self.inner.broadcaster.update(|s| {
                    s.connection_state = ConnectionState::Connected;
                    s.channel_id = Some(channel.clone());
                    s.local_uid = Some(uid);
                    s.is_loading = false;
                    s.error = None;
                });
                self.inner.broadcaster.publish(Event::SessionJoined {
                    channel_id: channel.clone(),
                    uid,
                });
                info!(
                    cid = %cid,
                    channel = %channel,
                    uid,
                    session = %session.session_id,
                    "joined channel"
                );

                if let Err(err) = self.inner.microphone.on_session_up().await {
                    warn!(cid = %cid, %err, "could not publish microphone after join");
                    let message = err.to_string();
                    self.inner.broadcaster.update(|s| s.error = Some(message));
                }
                Ok(session)
            }
            Err(err) => {
                warn!(cid = %cid, channel = %channel, %err, "join failed");
                self.transition(|phase| *phase = Phase::Idle);
                let message = err.to_string();
                self.inner.broadcaster.update(|s| {
                    s.connection_state = ConnectionState::Disconnected;
                    s.channel_id = None;
                    s.local_uid = None;
                    s.is_loading = false;
                    s.error = Some(message);
                });
                Err(RtcError::Transport(err))
            }
        };
        outcome.send_replace(Some(result));
    }

    // -- Leave --------------------------------------------------------------

    /// Leave the current channel. A no-op when not joined.
    ///
    /// Tracks are unpublished and closed before the transport leave. A
    /// leave during an in-flight join waits for the join to settle first.
    pub async fn leave(&self) -> RtcResult<()> {
        self.cancel_reconnect();
        self.leave_inner(Instant::now() + self.inner.join_timeout)
            .await
    }

    async fn leave_inner(&self, deadline: Instant) -> RtcResult<()> {
        let timed_out = || RtcError::Timeout {
            operation: "leave",
            after: self.inner.join_timeout,
        };

        loop {
            let step = self.transition(|phase| match phase {
                Phase::Idle => LeaveStep::Idle,
                Phase::Joining { outcome, .. } => LeaveStep::AwaitJoin(outcome.clone()),
                Phase::Leaving { done } => LeaveStep::AwaitLeave(done.clone()),
                Phase::Connected { session, .. } => {
                    let session = session.clone();
                    let (tx, rx) = watch::channel(None);
                    *phase = Phase::Leaving { done: rx.clone() };
                    LeaveStep::Start(session, tx, rx)
                }
            });

            match step {
                LeaveStep::Idle => return Ok(()),
                LeaveStep::AwaitJoin(outcome) => {
                    debug!("leave waiting for in-flight join");
                    if settle(outcome, deadline).await.is_none() {
                        return Err(timed_out());
                    }
                }
                LeaveStep::AwaitLeave(done) => {
                    return settle(done, deadline)
                        .await
                        .unwrap_or_else(|| Err(timed_out()));
                }
                LeaveStep::Start(session, tx, rx) => {
                    let this = self.clone();
                    tokio::spawn(async move { this.run_leave(session, tx).await });
                    return settle(rx, deadline)
                        .await
                        .unwrap_or_else(|| Err(timed_out()));
                }
            }
        }
    }

    async fn run_leave(&self, session: Session, done: OutcomeTx<()>) {
        let cid = new_correlation_id();
        info!(cid = %cid, channel = %session.channel_id, "leaving channel");

        self.inner.gate.send_replace(false);
        self.inner.broadcaster.update(|s| s.is_loading = true);
        self.inner.microphone.release(Teardown::Graceful).await;
        self.inner.screen.release(Teardown::Graceful).await;

        let result = self.inner.transport.leave().await.map_err(RtcError::from);
        if let Err(err) = &result {
            warn!(cid = %cid, %err, "transport leave failed, dropping session anyway");
        }

        self.transition(|phase| *phase = Phase::Idle);
        let error = result.as_ref().err().map(ToString::to_string);
        self.inner.broadcaster.update(|s| {
            s.connection_state = ConnectionState::Disconnected;
            s.channel_id = None;
            s.local_uid = None;
            s.participants.clear();
            s.is_loading = false;
            if error.is_some() {
                s.error = error;
            }
        });
        self.inner.broadcaster.publish(Event::SessionLeft {
            channel_id: session.channel_id.clone(),
        });
        info!(
            cid = %cid,
            channel = %session.channel_id,
            duration_secs = (Utc::now() - session.joined_at).num_seconds(),
            "left channel"
        );
        done.send_replace(Some(result));
    }

    // -- Transport state ----------------------------------------------------

    /// Mirror a connection state reported by the transport.
    ///
    /// Events that no longer match the transport's current state are
    /// dropped. A disconnect nobody asked for tears the session down
    /// locally.
    pub async fn on_transport_state(&self, current: ConnectionState, reason: Option<&str>) {
        let actual = self.inner.transport.connection_state();
        if actual != current {
            debug!(?current, ?actual, "ignoring stale connection event");
            return;
        }

        let (joining, connected) = self.transition(|phase| {
            (
                matches!(phase, Phase::Joining { .. }),
                matches!(phase, Phase::Connected { .. }),
            )
        });

        match current {
            ConnectionState::Disconnected if connected => {
                self.connection_lost(reason.unwrap_or("unknown")).await;
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting if connected => {
                info!(?reason, "transport reconnecting");
                self.inner.gate.send_replace(false);
                self.inner
                    .broadcaster
                    .update(|s| s.connection_state = ConnectionState::Reconnecting);
            }
            ConnectionState::Connecting if joining => {
                self.inner
                    .broadcaster
                    .update(|s| s.connection_state = ConnectionState::Connecting);
            }
            ConnectionState::Connected if connected => {
                let reopened = !self.inner.gate.send_replace(true);
                let recovered = self.inner.broadcaster.update(|s| {
                    s.connection_state = ConnectionState::Connected;
                });
                if recovered {
                    info!(?reason, "connection recovered");
                }
                if reopened {
                    if let Err(err) = self.inner.microphone.on_session_up().await {
                        warn!(%err, "could not publish microphone after reconnect");
                        let message = err.to_string();
                        self.inner.broadcaster.update(|s| s.error = Some(message));
                    }
                }
            }
            _ => {}
        }
    }

    /// Catch a disconnect whose event was missed.
    pub async fn check_connection(&self) {
        if self.is_connected()
            && self.inner.transport.connection_state() == ConnectionState::Disconnected
        {
            self.connection_lost("dropped without notice").await;
        }
    }

    async fn connection_lost(&self, reason: &str) {
        let dropped = self.transition(|phase| match std::mem::replace(phase, Phase::Idle) {
            Phase::Connected { session, request } => Some((session, request)),
            other => {
                *phase = other;
                None
            }
        });
        let Some((session, request)) = dropped else {
            return;
        };

        warn!(channel = %session.channel_id, reason, "connection lost");
        self.inner.gate.send_replace(false);
        self.inner.microphone.release(Teardown::Local).await;
        self.inner.screen.release(Teardown::Local).await;

        let message = format!("connection lost: {reason}");
        self.inner.broadcaster.update(|s| {
            s.connection_state = ConnectionState::Disconnected;
            s.channel_id = None;
            s.local_uid = None;
            s.participants.clear();
            s.is_loading = false;
            s.error = Some(message);
        });
        self.inner.broadcaster.publish(Event::SessionLeft {
            channel_id: session.channel_id.clone(),
        });

        if self.inner.reconnect.enabled {
            self.schedule_reconnect(request);
        }
    }

    /// Connection state the controller can vouch for, or `None` while a
    /// join or leave is in flight.
    pub fn observed_connection_state(&self) -> Option<ConnectionState> {
        let (idle, connected) = self.transition(|phase| {
            (
                matches!(phase, Phase::Idle),
                matches!(phase, Phase::Connected { .. }),
            )
        });
        if idle {
            return Some(ConnectionState::Disconnected);
        }
        if !connected {
            return None;
        }
        match self.inner.transport.connection_state() {
            ConnectionState::Connected => Some(ConnectionState::Connected),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                Some(ConnectionState::Reconnecting)
            }
            ConnectionState::Disconnected => None,
        }
    }

    // -- Reconnect ----------------------------------------------------------

    fn schedule_reconnect(&self, request: JoinRequest) {
        let this = self.clone();
        let task = tokio::spawn(async move { this.reconnect_loop(request).await });
        if let Some(previous) = self.reconnect_slot().replace(task) {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_slot().take() {
            if !task.is_finished() {
                info!("cancelling scheduled rejoin");
            }
            task.abort();
        }
    }

    async fn reconnect_loop(&self, request: JoinRequest) {
        let config = &self.inner.reconnect;
        for attempt in 0..config.max_attempts {
            let delay = backoff_delay(config, attempt);
            info!(channel = %request.channel, attempt = attempt + 1, ?delay, "rejoin scheduled");
            tokio::time::sleep(delay).await;

            if self.inner.policy.voice_disabled(&request.channel) {
                info!(channel = %request.channel, "voice disabled, not rejoining");
                return;
            }
            match self.join_inner(request.clone()).await {
                Ok(_) => {
                    info!(channel = %request.channel, attempt = attempt + 1, "rejoined channel");
                    return;
                }
                Err(err) => warn!(
                    channel = %request.channel,
                    attempt = attempt + 1,
                    %err,
                    "rejoin failed"
                ),
            }
        }

        warn!(channel = %request.channel, "giving up on rejoin");
        let message = format!("could not reconnect to {}", request.channel);
        self.inner.broadcaster.update(|s| s.error = Some(message));
    }
}

/// A zero join timeout would fail every join, so it falls back to the
/// default.
fn effective_join_timeout(config: &RtcConfig) -> Duration {
    let timeout = config.join_timeout();
    if timeout.is_zero() {
        let fallback = RtcConfig::default().join_timeout();
        warn!(?fallback, "join timeout of zero ignored");
        return fallback;
    }
    timeout
}

/// Wait for an attempt's outcome until `deadline`. `None` on timeout.
async fn settle<T: Clone>(mut outcome: Outcome<T>, deadline: Instant) -> Option<RtcResult<T>> {
    match tokio::time::timeout_at(deadline, outcome.wait_for(Option::is_some)).await {
        Ok(Ok(value)) => (*value).clone(),
        Ok(Err(_)) => Some(Err(RtcError::Internal(
            "attempt ended without an outcome".into(),
        ))),
        Err(_) => None,
    }
}

//! `SessionFacade`: one object that owns the controllers, the mirror, and
//! the background tasks keeping them in sync with the transport.
//!
//! Every public operation returns a plain value. Failures are logged,
//! written to [`SessionState::error`], and queued as a transient
//! [`Notification`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use spaces_common::{Event, EventBus, Notification, NotificationQueue};
use spaces_config::schema::RtcConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PreconditionError, RtcError, RtcResult};
use crate::microphone::MicrophoneTrackController;
use crate::policy::{PolicyChange, VoicePolicy};
use crate::requests::SessionRequests;
use crate::screen_share::ScreenShareController;
use crate::session::{ConnectionSessionController, JoinRequest, Session};
use crate::state::{
    ObservedState, RemoteParticipant, SessionState, SharedStateBroadcaster, Subscription,
};
use crate::transport::{MediaKind, TransportClient, TransportEvent, Uid};

use super::supervisor;

const REQUEST_QUEUE: usize = 32;
const NOTIFICATION_CAPACITY: usize = 16;
/// Floor for the reconcile tick; `tokio::time::interval` rejects zero.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(10);

pub struct SessionFacade {
    app_id: String,
    transport: Arc<dyn TransportClient>,
    policy: Arc<dyn VoicePolicy>,
    broadcaster: SharedStateBroadcaster,
    session: ConnectionSessionController,
    microphone: MicrophoneTrackController,
    screen: ScreenShareController,
    events: Arc<EventBus>,
    notifications: Mutex<NotificationQueue>,
    active_space: Mutex<Option<String>>,
    requests: SessionRequests,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionFacade {
    /// Build the controllers and spawn the supervisor and request worker.
    /// Must be called inside a tokio runtime.
    pub fn start(
        transport: Arc<dyn TransportClient>,
        policy: Arc<dyn VoicePolicy>,
        config: &RtcConfig,
    ) -> Arc<Self> {
        Self::start_with_events(transport, policy, config, Arc::new(EventBus::default()))
    }

    pub fn start_with_events(
        transport: Arc<dyn TransportClient>,
        policy: Arc<dyn VoicePolicy>,
        config: &RtcConfig,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let broadcaster =
            SharedStateBroadcaster::with_events(config.stale_loading(), events.clone());
        let (gate, gate_rx) = watch::channel(false);
        let microphone = MicrophoneTrackController::new(
            transport.clone(),
            broadcaster.clone(),
            gate_rx.clone(),
            config,
        );
        let screen =
            ScreenShareController::new(transport.clone(), broadcaster.clone(), gate_rx, config);
        let session = ConnectionSessionController::new(
            transport.clone(),
            policy.clone(),
            broadcaster.clone(),
            microphone.clone(),
            screen.clone(),
            gate,
            config,
        );
        let (requests, request_rx) = SessionRequests::new(REQUEST_QUEUE);
        let reconcile_interval = config.reconcile_interval().max(MIN_RECONCILE_INTERVAL);
        if reconcile_interval != config.reconcile_interval() {
            warn!(
                configured = ?config.reconcile_interval(),
                used = ?reconcile_interval,
                "reconcile interval too short, raised"
            );
        }

        // Subscribe before anything can happen so no event is missed.
        let transport_events = transport.events();
        let policy_changes = policy.subscribe();

        let facade = Arc::new(Self {
            app_id: config.app_id.clone(),
            transport,
            policy,
            broadcaster,
            session,
            microphone,
            screen,
            events,
            notifications: Mutex::new(NotificationQueue::new(NOTIFICATION_CAPACITY)),
            active_space: Mutex::new(None),
            requests,
            tasks: Mutex::new(Vec::new()),
        });

        let supervisor = tokio::spawn(supervisor::supervise(
            Arc::downgrade(&facade),
            transport_events,
            policy_changes,
            reconcile_interval,
        ));
        let worker = tokio::spawn(supervisor::serve_requests(
            Arc::downgrade(&facade),
            request_rx,
        ));
        facade.tasks().extend([supervisor, worker]);

        info!(
            app_id = %config.app_id,
            join_timeout = ?config.join_timeout(),
            ?reconcile_interval,
            reconnect = config.reconnect.enabled,
            "session manager started"
        );
        facade
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notification_queue(&self) -> MutexGuard<'_, NotificationQueue> {
        self.notifications.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_space_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.active_space.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- Membership ---------------------------------------------------------

    /// Join a channel. Once joined, the channel becomes the active space.
    pub async fn join(&self, request: JoinRequest) -> bool {
        let channel = request.channel.clone();
        match self.session.join(request).await {
            Ok(joined) => {
                *self.active_space_slot() = Some(channel);
                joined
            }
            Err(err) => {
                self.report("Could not join voice chat", &err);
                false
            }
        }
    }

    pub async fn leave(&self) {
        if let Err(err) = self.session.leave().await {
            self.report("Could not leave voice chat", &err);
        }
    }

    /// Set the space whose voice chat [`join_active_space`](Self::join_active_space)
    /// and the request channel join.
    pub fn set_active_space(&self, space_id: Option<String>) {
        debug!(?space_id, "active space");
        *self.active_space_slot() = space_id;
    }

    pub fn active_space(&self) -> Option<String> {
        self.active_space_slot().clone()
    }

    pub async fn join_active_space(&self) -> bool {
        match self.try_join_active_space().await {
            Ok(joined) => joined,
            Err(err) => {
                self.report("Could not join voice chat", &err);
                false
            }
        }
    }

    pub(crate) async fn try_join_active_space(&self) -> RtcResult<bool> {
        let space = self.active_space().ok_or(RtcError::NoActiveSpace)?;
        self.session
            .join(JoinRequest::new(self.app_id.clone(), space))
            .await
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.current_session()
    }

    // -- Media --------------------------------------------------------------

    /// Flip the microphone and return the resulting voice state.
    pub async fn toggle_voice(&self) -> bool {
        match self.microphone.toggle().await {
            Ok(enabled) => enabled,
            Err(err) => {
                self.report("Microphone unavailable", &err);
                self.broadcaster.snapshot().is_voice_enabled
            }
        }
    }

    pub async fn mute(&self) -> bool {
        match self.microphone.disable().await {
            Ok(_) => true,
            Err(err) => {
                self.report("Could not mute", &err);
                false
            }
        }
    }

    pub async fn unmute(&self) -> bool {
        match self.microphone.enable().await {
            Ok(_) => true,
            Err(err) => {
                self.report("Microphone unavailable", &err);
                false
            }
        }
    }

    pub async fn set_microphone_device(&self, device_id: &str) -> bool {
        match self.microphone.set_device(device_id).await {
            Ok(()) => true,
            Err(err) => {
                self.report("Could not switch microphone", &err);
                false
            }
        }
    }

    pub async fn volume_level(&self) -> f32 {
        self.microphone.volume_level().await
    }

    /// Start or stop sharing and return the resulting sharing state.
    pub async fn toggle_screen_share(&self) -> bool {
        match self.try_toggle_screen_share().await {
            Ok(sharing) => sharing,
            Err(err) => {
                self.report("Could not share screen", &err);
                self.broadcaster.snapshot().is_screen_sharing
            }
        }
    }

    pub(crate) async fn try_toggle_screen_share(&self) -> RtcResult<bool> {
        self.screen.start().await
    }

    /// The local user counts as speaking while voice is enabled; remote
    /// users while they publish audio.
    pub fn is_user_speaking(&self, uid: Uid) -> bool {
        let state = self.broadcaster.snapshot();
        if state.local_uid == Some(uid) {
            return state.is_voice_enabled;
        }
        state.participant(uid).is_some_and(|p| p.is_speaking)
    }

    // -- Observation --------------------------------------------------------

    pub fn snapshot(&self) -> SessionState {
        self.broadcaster.snapshot()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(listener)
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.broadcaster.watch()
    }

    pub fn requests(&self) -> SessionRequests {
        self.requests.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Notifications that have not expired yet, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notification_queue()
            .visible()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Leave the channel and stop the background tasks.
    pub async fn shutdown(&self) {
        info!("session manager shutting down");
        if let Err(err) = self.session.leave().await {
            warn!(%err, "leave during shutdown failed");
        }
        for task in self.tasks().drain(..) {
            task.abort();
        }
        self.events.publish(Event::Shutdown);
    }

    pub(crate) fn report(&self, title: &str, err: &RtcError) {
        warn!(title, %err, "session operation failed");
        let message = err.to_string();
        let mirrored = message.clone();
        self.broadcaster.update(|s| s.error = Some(mirrored));
        self.notification_queue()
            .push(Notification::error(title, message.clone()));
        self.events
            .publish(Event::Notification(format!("{title}: {message}")));
    }

    // -- Supervisor hooks ---------------------------------------------------

    fn is_remote(&self, uid: Uid) -> bool {
        self.session
            .current_session()
            .is_some_and(|s| s.local_uid != uid)
    }

    pub(super) async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged {
                previous,
                current,
                reason,
            } => {
                debug!(?previous, ?current, ?reason, "transport connection state");
                self.session
                    .on_transport_state(current, reason.as_deref())
                    .await;
            }
            TransportEvent::UserJoined { uid } => {
                if !self.is_remote(uid) {
                    return;
                }
                if self.broadcaster.update(|s| {
                    s.participant_mut(uid);
                }) {
                    info!(uid, "participant joined");
                    self.events.publish(Event::ParticipantJoined { uid });
                }
            }
            TransportEvent::UserLeft { uid } => {
                if self.broadcaster.update(|s| {
                    s.remove_participant(uid);
                }) {
                    info!(uid, "participant left");
                    self.events.publish(Event::ParticipantLeft { uid });
                }
            }
            TransportEvent::UserPublished { uid, media } => {
                if !self.is_remote(uid) {
                    return;
                }
                self.broadcaster
                    .update(|s| set_media(s.participant_mut(uid), media, true));
                if let Err(err) = self.transport.subscribe_remote(uid, media).await {
                    warn!(uid, ?media, %err, "could not subscribe to remote media");
                }
            }
            TransportEvent::UserUnpublished { uid, media } => {
                self.broadcaster.update(|s| {
                    if s.participant(uid).is_some() {
                        set_media(s.participant_mut(uid), media, false);
                    }
                });
            }
        }
    }

    pub(super) async fn handle_policy_change(&self, change: PolicyChange) {
        self.events.publish(Event::VoicePolicyChanged {
            space_id: change.space_id.clone(),
            voice_disabled: change.voice_disabled,
        });
        if !change.voice_disabled {
            return;
        }
        let in_space = self
            .session
            .current_session()
            .is_some_and(|s| s.channel_id == change.space_id);
        if in_space {
            self.leave_disabled_space(&change.space_id).await;
        }
    }

    /// One drift-correction pass.
    pub(super) async fn reconcile_once(&self) {
        if let Some(session) = self.session.current_session() {
            if self.policy.voice_disabled(&session.channel_id) {
                self.leave_disabled_space(&session.channel_id).await;
            }
        }
        self.session.check_connection().await;

        let observed = ObservedState {
            connection_state: self.session.observed_connection_state(),
            voice_enabled: self.microphone.reconcile().await,
            screen_sharing: self.screen.reconcile().await,
        };
        if self.broadcaster.reconcile(&observed) {
            debug!(?observed, "mirror reconciled");
        }
    }

    async fn leave_disabled_space(&self, space_id: &str) {
        info!(space_id, "voice disabled for the current space, leaving");
        if let Err(err) = self.session.leave().await {
            self.report("Could not leave voice chat", &err);
            return;
        }
        let message =
            RtcError::from(PreconditionError::VoiceDisabled(space_id.to_string())).to_string();
        let mirrored = message.clone();
        self.broadcaster.update(|s| s.error = Some(mirrored));
        self.notification_queue()
            .push(Notification::warning("Voice chat disabled", message));
    }
}

fn set_media(participant: &mut RemoteParticipant, media: MediaKind, on: bool) {
    match media {
        MediaKind::Audio => {
            participant.has_audio = on;
            participant.is_speaking = on;
        }
        MediaKind::Video => participant.has_video = on,
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

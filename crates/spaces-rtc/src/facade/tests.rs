use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spaces_common::{Event, EventBus, NotificationLevel};
use spaces_config::schema::RtcConfig;
use tokio::sync::broadcast;

use super::*;
use crate::error::RtcError;
use crate::loopback::{LoopbackTransport, TransportCall, TransportOp};
use crate::policy::{PolicyChange, StaticVoicePolicy, VoicePolicy};
use crate::session::JoinRequest;
use crate::state::SessionState;
use crate::transport::{ConnectionState, LocalTrack, MediaKind, TrackKind};

const WAIT: Duration = Duration::from_secs(2);

fn config() -> RtcConfig {
    RtcConfig {
        app_id: "demoApp".into(),
        join_timeout_ms: 2_000,
        reconcile_interval_ms: 60_000,
        ..RtcConfig::default()
    }
}

fn request(channel: &str) -> JoinRequest {
    JoinRequest::new("demoApp", channel)
}

struct Harness {
    transport: Arc<LoopbackTransport>,
    policy: Arc<StaticVoicePolicy>,
    facade: Arc<SessionFacade>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(config())
    }

    fn with_config(config: RtcConfig) -> Self {
        let transport = Arc::new(LoopbackTransport::new());
        let policy = Arc::new(StaticVoicePolicy::new());
        let facade = SessionFacade::start(transport.clone(), policy.clone(), &config);
        Self {
            transport,
            policy,
            facade,
        }
    }

    async fn joined() -> Self {
        let harness = Self::new();
        assert!(harness.facade.join(request("space42")).await);
        harness
    }

    async fn wait_for(&self, what: &str, predicate: impl FnMut(&SessionState) -> bool) {
        let mut state = self.facade.watch();
        tokio::time::timeout(WAIT, state.wait_for(predicate))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .unwrap();
    }
}

/// Policy that never announces changes, so only the periodic check can
/// notice them.
struct SilentPolicy {
    disabled: AtomicBool,
    changes: broadcast::Sender<PolicyChange>,
}

impl VoicePolicy for SilentPolicy {
    fn voice_disabled(&self, _space_id: &str) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<PolicyChange> {
        self.changes.subscribe()
    }
}

// -- Join / leave -------------------------------------------------------------

#[tokio::test]
async fn joining_the_same_channel_twice_makes_one_transport_call() {
    let h = Harness::joined().await;
    assert!(h.facade.join(request("space42")).await);
    assert_eq!(h.transport.call_count(TransportOp::Join), 1);
}

#[tokio::test]
async fn concurrent_joins_share_one_attempt() {
    let h = Harness::new();
    h.transport.set_join_delay(Duration::from_millis(50));

    let joins = (0..5).map(|_| h.facade.join(request("space42")));
    let results = futures_util::future::join_all(joins).await;
    assert!(results.iter().all(|joined| *joined));
    assert_eq!(h.transport.call_count(TransportOp::Join), 1);
    assert!(h.facade.snapshot().is_joined);
}

#[tokio::test]
async fn timed_out_waiter_does_not_cancel_the_join() {
    let h = Harness::with_config(RtcConfig {
        join_timeout_ms: 50,
        ..config()
    });
    h.transport.set_join_delay(Duration::from_millis(200));

    assert!(!h.facade.join(request("space42")).await);
    let state = h.facade.snapshot();
    assert!(state.error.as_deref().unwrap_or_default().contains("timed out"));

    h.wait_for("join to finish", |s| s.is_joined).await;
    assert_eq!(h.transport.call_count(TransportOp::Join), 1);
    assert!(h.facade.snapshot().error.is_none());
}

#[tokio::test]
async fn joining_another_channel_leaves_first() {
    let h = Harness::joined().await;
    assert!(h.facade.join(request("lobby")).await);

    assert_eq!(h.transport.call_count(TransportOp::Leave), 1);
    assert_eq!(h.transport.call_count(TransportOp::Join), 2);
    assert_eq!(h.facade.snapshot().channel_id.as_deref(), Some("lobby"));
    assert_eq!(h.facade.current_session().unwrap().channel_id, "lobby");
}

#[tokio::test]
async fn missing_app_id_is_refused_before_the_transport() {
    let h = Harness::new();
    assert!(!h.facade.join(JoinRequest::new("", "space42")).await);
    assert_eq!(h.transport.call_count(TransportOp::Join), 0);
    assert_eq!(
        h.facade.snapshot().error.as_deref(),
        Some("application id is missing")
    );
}

#[tokio::test]
async fn transport_join_failure_is_mirrored() {
    let h = Harness::new();
    h.transport.fail_next(TransportOp::Join);

    assert!(!h.facade.join(request("space42")).await);
    let state = h.facade.snapshot();
    assert_eq!(state.connection_state, ConnectionState::Disconnected);
    assert!(!state.is_loading);
    assert!(state.error.is_some());

    assert!(h.facade.join(request("space42")).await);
}

#[tokio::test]
async fn leave_when_idle_is_a_noop() {
    let h = Harness::new();
    h.facade.leave().await;
    h.facade.leave().await;
    assert_eq!(h.transport.call_count(TransportOp::Leave), 0);
    assert!(h.facade.snapshot().error.is_none());
}

#[tokio::test]
async fn concurrent_leaves_leave_once() {
    let h = Harness::joined().await;
    tokio::join!(h.facade.leave(), h.facade.leave());
    assert_eq!(h.transport.call_count(TransportOp::Leave), 1);
    assert!(!h.facade.snapshot().is_joined);
}

#[tokio::test]
async fn leave_during_join_waits_for_it() {
    let h = Harness::new();
    h.transport.set_join_delay(Duration::from_millis(50));

    let (joined, ()) = tokio::join!(h.facade.join(request("space42")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.facade.leave().await;
    });
    assert!(joined);
    assert_eq!(h.transport.call_count(TransportOp::Leave), 1);
    assert!(!h.facade.snapshot().is_joined);
}

// -- End to end ---------------------------------------------------------------

#[tokio::test]
async fn join_talk_share_leave() {
    let h = Harness::new();
    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    let _sub = h.facade.subscribe(move |s| {
        let mut seen = seen.lock().unwrap();
        if seen.last() != Some(&s.connection_state) {
            seen.push(s.connection_state);
        }
    });

    assert!(
        h.facade
            .join(JoinRequest::new("demoApp", "space42").with_uid(12345))
            .await
    );
    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    let state = h.facade.snapshot();
    assert!(state.is_joined);
    assert!(!state.is_loading);
    assert_eq!(state.channel_id.as_deref(), Some("space42"));
    assert_eq!(state.local_uid, Some(12345));

    assert!(h.facade.toggle_voice().await);
    let mic = h.transport.last_track(TrackKind::Microphone).unwrap();
    assert!(h.transport.is_published(mic.id()));
    assert!(h.facade.is_user_speaking(12345));

    assert!(h.facade.toggle_screen_share().await);
    let screen = h.transport.last_track(TrackKind::ScreenVideo).unwrap();
    assert!(h.transport.is_published(screen.id()));

    h.facade.leave().await;
    let calls = h.transport.calls();
    let leave_at = calls
        .iter()
        .position(|c| matches!(c, TransportCall::Leave { .. }))
        .unwrap();
    let last_unpublish = calls
        .iter()
        .rposition(|c| matches!(c, TransportCall::Unpublish(_)))
        .unwrap();
    assert!(last_unpublish < leave_at);
    assert_eq!(calls[leave_at], TransportCall::Leave { open_tracks: 0 });
    assert!(mic.is_closed() && screen.is_closed());

    let state = h.facade.snapshot();
    assert_eq!(state.connection_state, ConnectionState::Disconnected);
    assert!(!state.is_joined && !state.is_voice_enabled && !state.is_screen_sharing);
    assert!(state.channel_id.is_none());
}

// -- Toggles ------------------------------------------------------------------

#[tokio::test]
async fn toggles_are_deterministic() {
    let h = Harness::joined().await;
    assert!(h.facade.toggle_voice().await);
    assert!(!h.facade.toggle_voice().await);
    assert!(h.facade.toggle_voice().await);

    assert!(h.facade.toggle_screen_share().await);
    assert!(!h.facade.toggle_screen_share().await);
    assert!(h.facade.toggle_screen_share().await);
    assert!(h.facade.snapshot().is_screen_sharing);
}

#[tokio::test]
async fn mute_and_unmute() {
    let h = Harness::joined().await;
    assert!(h.facade.unmute().await);
    assert!(h.facade.snapshot().is_voice_enabled);
    assert!(h.facade.mute().await);
    assert!(!h.facade.snapshot().is_voice_enabled);
    assert_eq!(h.facade.volume_level().await, 0.0);
}

#[tokio::test]
async fn voice_enabled_before_join_is_published_after() {
    let h = Harness::new();
    assert!(h.facade.toggle_voice().await);
    assert_eq!(h.transport.call_count(TransportOp::Publish), 0);

    assert!(h.facade.join(request("space42")).await);
    let mic = h.transport.last_track(TrackKind::Microphone).unwrap();
    assert!(h.transport.is_published(mic.id()));

    let calls = h.transport.calls();
    let join_at = h.transport.first_call(TransportOp::Join).unwrap();
    let publish_at = h.transport.first_call(TransportOp::Publish).unwrap();
    assert!(join_at < publish_at, "{calls:?}");
}

#[tokio::test]
async fn screen_share_needs_a_session() {
    let h = Harness::new();
    assert!(!h.facade.toggle_screen_share().await);
    assert_eq!(
        h.facade.snapshot().error.as_deref(),
        Some("not in a voice channel")
    );
}

#[tokio::test]
async fn capture_end_and_stop_clean_up_the_same_way() {
    let h = Harness::joined().await;

    assert!(h.facade.toggle_screen_share().await);
    assert!(!h.facade.toggle_screen_share().await);
    let after_stop = h.transport.call_count(TransportOp::Unpublish);

    assert!(h.facade.toggle_screen_share().await);
    let video = h.transport.last_track(TrackKind::ScreenVideo).unwrap();
    video.end();
    h.wait_for("share to end", |s| !s.is_screen_sharing).await;

    assert_eq!(h.transport.call_count(TransportOp::Unpublish), after_stop * 2);
    assert!(video.is_closed());
    assert!(h.facade.toggle_screen_share().await);
}

#[tokio::test]
async fn device_switch_keeps_voice_on() {
    let h = Harness::joined().await;
    assert!(h.facade.toggle_voice().await);
    assert!(h.facade.set_microphone_device("usb").await);

    let mic = h.transport.last_track(TrackKind::Microphone).unwrap();
    assert_eq!(mic.device_id().as_deref(), Some("usb"));
    assert!(!mic.is_muted());
    assert!(h.transport.is_published(mic.id()));
    assert!(h.facade.snapshot().is_voice_enabled);
}

#[tokio::test]
async fn denied_microphone_leaves_session_intact() {
    let h = Harness::joined().await;
    h.transport.deny(TransportOp::CreateMicrophone);

    assert!(!h.facade.toggle_voice().await);
    let state = h.facade.snapshot();
    assert!(state.is_joined);
    assert!(!state.is_voice_enabled);
    assert!(state.error.as_deref().unwrap_or_default().contains("permission"));

    let notifications = h.facade.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(h.transport.call_count(TransportOp::Leave), 0);
}

// -- Policy -------------------------------------------------------------------

#[tokio::test]
async fn disabled_space_is_refused_without_transport_calls() {
    let h = Harness::new();
    h.policy.set_voice_disabled("space42", true);

    assert!(!h.facade.join(request("space42")).await);
    assert_eq!(h.transport.call_count(TransportOp::Join), 0);
    assert_eq!(
        h.facade.snapshot().error.as_deref(),
        Some("voice chat is disabled for space space42")
    );
    assert_eq!(h.facade.notifications().len(), 1);
}

#[tokio::test]
async fn disabling_the_current_space_leaves_it() {
    let h = Harness::joined().await;
    h.facade.toggle_voice().await;

    h.policy.set_voice_disabled("space42", true);
    h.wait_for("auto leave", |s| !s.is_joined && s.error.is_some())
        .await;

    assert_eq!(h.transport.call_count(TransportOp::Leave), 1);
    assert!(h
        .transport
        .last_track(TrackKind::Microphone)
        .unwrap()
        .is_closed());
    let notifications = h.facade.notifications();
    assert!(notifications
        .iter()
        .any(|n| n.level == NotificationLevel::Warning));
}

#[tokio::test]
async fn disabling_another_space_changes_nothing() {
    let h = Harness::joined().await;
    h.policy.set_voice_disabled("lobby", true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.facade.snapshot().is_joined);
    assert_eq!(h.transport.call_count(TransportOp::Leave), 0);
}

#[tokio::test]
async fn periodic_check_catches_unannounced_policy_change() {
    let transport = Arc::new(LoopbackTransport::new());
    let (changes, _) = broadcast::channel(4);
    let policy = Arc::new(SilentPolicy {
        disabled: AtomicBool::new(false),
        changes,
    });
    let facade = SessionFacade::start(
        transport.clone(),
        policy.clone(),
        &RtcConfig {
            reconcile_interval_ms: 20,
            ..config()
        },
    );
    assert!(facade.join(request("space42")).await);

    policy.disabled.store(true, Ordering::SeqCst);
    let mut state = facade.watch();
    tokio::time::timeout(WAIT, state.wait_for(|s| !s.is_joined))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transport.call_count(TransportOp::Leave), 1);
}

// -- Transport events ---------------------------------------------------------

#[tokio::test]
async fn spontaneous_disconnect_tears_down_locally() {
    let h = Harness::joined().await;
    h.facade.toggle_voice().await;
    let mic = h.transport.last_track(TrackKind::Microphone).unwrap();

    h.transport.simulate_disconnect("NETWORK_ERROR");
    h.wait_for("disconnect", |s| {
        s.connection_state == ConnectionState::Disconnected
    })
    .await;

    let state = h.facade.snapshot();
    assert!(!state.is_joined && !state.is_voice_enabled);
    assert!(state
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("NETWORK_ERROR"));
    assert!(mic.is_closed());
    assert_eq!(h.transport.call_count(TransportOp::Leave), 0);
    assert!(h.facade.current_session().is_none());

    assert!(h.facade.join(request("space42")).await);
    assert_eq!(h.transport.call_count(TransportOp::Join), 2);
}

#[tokio::test]
async fn transport_reconnect_cycle_is_mirrored() {
    let h = Harness::joined().await;
    let session = h.facade.current_session().unwrap();

    h.transport.simulate_reconnecting();
    h.wait_for("reconnecting", |s| {
        s.connection_state == ConnectionState::Reconnecting
    })
    .await;
    assert!(!h.facade.snapshot().is_joined);

    h.transport.simulate_reconnected();
    h.wait_for("recovery", |s| s.is_joined).await;
    assert_eq!(h.facade.current_session().unwrap().session_id, session.session_id);
}

#[tokio::test]
async fn reconnect_policy_rejoins_after_drop() {
    let mut config = config();
    config.reconnect.enabled = true;
    config.reconnect.base_delay_ms = 100;
    config.reconnect.jitter = false;
    let h = Harness::with_config(config);
    assert!(h.facade.join(request("space42")).await);

    h.transport.simulate_disconnect("NETWORK_ERROR");
    h.wait_for("disconnect", |s| !s.is_joined).await;
    h.wait_for("rejoin", |s| s.is_joined).await;

    assert_eq!(h.transport.call_count(TransportOp::Join), 2);
    assert_eq!(h.facade.snapshot().channel_id.as_deref(), Some("space42"));
}

#[tokio::test]
async fn explicit_leave_cancels_scheduled_rejoin() {
    let mut config = config();
    config.reconnect.enabled = true;
    config.reconnect.base_delay_ms = 200;
    config.reconnect.jitter = false;
    let h = Harness::with_config(config);
    assert!(h.facade.join(request("space42")).await);

    h.transport.simulate_disconnect("NETWORK_ERROR");
    h.wait_for("disconnect", |s| !s.is_joined).await;
    h.facade.leave().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.transport.call_count(TransportOp::Join), 1);
}

#[tokio::test]
async fn remote_participants_are_tracked() {
    let h = Harness::joined().await;

    h.transport.simulate_user_joined(7);
    h.transport.simulate_user_published(7, MediaKind::Audio);
    h.wait_for("remote audio", |s| {
        s.participant(7).is_some_and(|p| p.has_audio)
    })
    .await;
    assert!(h.facade.is_user_speaking(7));
    assert_eq!(
        h.transport.calls().last(),
        Some(&TransportCall::Subscribe {
            uid: 7,
            media: MediaKind::Audio
        })
    );

    h.transport.simulate_user_unpublished(7, MediaKind::Audio);
    h.wait_for("remote mute", |s| {
        s.participant(7).is_some_and(|p| !p.has_audio)
    })
    .await;
    assert!(!h.facade.is_user_speaking(7));

    h.transport.simulate_user_left(7);
    h.wait_for("remote leave", |s| s.participants.is_empty()).await;
}

// -- Reconciliation -----------------------------------------------------------

#[tokio::test]
async fn drift_is_corrected_without_an_error() {
    let h = Harness::with_config(RtcConfig {
        reconcile_interval_ms: 20,
        ..config()
    });
    assert!(h.facade.join(request("space42")).await);
    assert!(h.facade.toggle_voice().await);

    h.transport
        .last_track(TrackKind::Microphone)
        .unwrap()
        .force_muted(true);
    h.wait_for("drift correction", |s| !s.is_voice_enabled).await;
    assert!(h.facade.snapshot().error.is_none());
}

#[tokio::test]
async fn zero_reconcile_interval_keeps_the_supervisor_running() {
    let h = Harness::with_config(RtcConfig {
        reconcile_interval_ms: 0,
        ..config()
    });
    assert!(h.facade.join(request("space42")).await);

    h.transport.simulate_disconnect("NETWORK_ERROR");
    h.wait_for("disconnect", |s| {
        s.connection_state == ConnectionState::Disconnected && !s.is_joined
    })
    .await;
}

#[tokio::test]
async fn zero_join_timeout_uses_the_default() {
    let h = Harness::with_config(RtcConfig {
        join_timeout_ms: 0,
        ..config()
    });
    assert!(h.facade.join(request("space42")).await);
    assert!(h.facade.snapshot().is_joined);
}

// -- Requests and events ------------------------------------------------------

#[tokio::test]
async fn requests_join_the_active_space() {
    let h = Harness::new();
    let requests = h.facade.requests();

    assert_eq!(
        requests.join_voice_chat().await,
        Err(RtcError::NoActiveSpace)
    );

    h.facade.set_active_space(Some("space42".into()));
    assert_eq!(requests.join_voice_chat().await, Ok(true));
    assert!(h.facade.snapshot().is_joined);

    assert_eq!(requests.toggle_screen_share().await, Ok(true));
    assert_eq!(requests.toggle_screen_share().await, Ok(false));
}

#[tokio::test]
async fn refused_join_keeps_the_active_space() {
    let h = Harness::new();
    h.facade.set_active_space(Some("space42".into()));
    h.policy.set_voice_disabled("lobby", true);

    assert!(!h.facade.join(request("lobby")).await);
    assert_eq!(h.facade.active_space().as_deref(), Some("space42"));

    assert!(h.facade.join(request("space7")).await);
    assert_eq!(h.facade.active_space().as_deref(), Some("space7"));
}

#[tokio::test]
async fn toggles_are_published_on_the_event_bus() {
    let transport = Arc::new(LoopbackTransport::new());
    let bus = Arc::new(EventBus::new(32));
    let mut events = bus.subscribe();
    let facade = SessionFacade::start_with_events(
        transport,
        Arc::new(StaticVoicePolicy::new()),
        &config(),
        bus,
    );

    assert!(facade.toggle_voice().await);
    let mut saw_toggle = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::VoiceToggled { enabled: true }) {
            saw_toggle = true;
        }
    }
    assert!(saw_toggle);
}

#[tokio::test]
async fn shutdown_leaves_the_channel() {
    let h = Harness::joined().await;
    h.facade.shutdown().await;
    assert_eq!(h.transport.call_count(TransportOp::Leave), 1);
    assert!(!h.facade.snapshot().is_joined);
}

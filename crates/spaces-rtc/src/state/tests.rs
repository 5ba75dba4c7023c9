use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spaces_common::{Event, EventBus};

use super::*;
use crate::transport::ConnectionState;

fn broadcaster() -> SharedStateBroadcaster {
    SharedStateBroadcaster::new(Duration::from_secs(5))
}

fn counting(b: &SharedStateBroadcaster) -> (Arc<AtomicUsize>, Subscription) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let sub = b.subscribe(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (count, sub)
}

#[test]
fn update_notifies_listeners_once_per_change() {
    let b = broadcaster();
    let (count, _sub) = counting(&b);

    assert!(b.update(|s| s.is_voice_enabled = true));
    assert!(!b.update(|s| s.is_voice_enabled = true));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(b.snapshot().is_voice_enabled);
}

#[test]
fn dropping_subscription_stops_notifications() {
    let b = broadcaster();
    let (count, sub) = counting(&b);

    b.update(|s| s.is_loading = true);
    sub.unsubscribe();
    b.update(|s| s.is_loading = false);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn listener_sees_new_state() {
    let b = broadcaster();
    let seen = Arc::new(std::sync::Mutex::new(None));
    let slot = seen.clone();
    let _sub = b.subscribe(move |s| {
        *slot.lock().unwrap() = Some(s.connection_state);
    });

    b.update(|s| s.connection_state = ConnectionState::Connecting);
    assert_eq!(*seen.lock().unwrap(), Some(ConnectionState::Connecting));
}

#[test]
fn is_joined_follows_connection_state() {
    let b = broadcaster();
    b.update(|s| {
        s.connection_state = ConnectionState::Connected;
        s.is_joined = false;
    });
    assert!(b.snapshot().is_joined);

    b.update(|s| s.connection_state = ConnectionState::Reconnecting);
    assert!(!b.snapshot().is_joined);
}

#[test]
fn participants_are_kept_sorted() {
    let b = broadcaster();
    b.update(|s| {
        s.participant_mut(30).has_audio = true;
        s.participant_mut(10);
        s.participant_mut(20).has_video = true;
    });
    let uids: Vec<u32> = b.snapshot().participants.iter().map(|p| p.uid).collect();
    assert_eq!(uids, vec![10, 20, 30]);
    assert!(b.snapshot().participant(30).unwrap().has_audio);

    b.update(|s| {
        s.remove_participant(20);
    });
    assert!(b.snapshot().participant(20).is_none());
}

#[tokio::test]
async fn watch_receives_latest_state() {
    let b = broadcaster();
    let mut rx = b.watch();
    b.update(|s| s.channel_id = Some("space42".into()));
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().channel_id.as_deref(), Some("space42"));
}

#[tokio::test]
async fn toggles_publish_bus_events() {
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe();
    let b = SharedStateBroadcaster::with_events(Duration::from_secs(5), bus);

    b.update(|s| s.is_voice_enabled = true);
    b.update(|s| s.is_screen_sharing = true);
    b.update(|s| s.is_loading = true);

    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::VoiceToggled { enabled: true }
    ));
    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::ScreenShareToggled { enabled: true }
    ));
    assert!(rx.try_recv().is_err());
}

#[test]
fn reconcile_corrects_drift_silently() {
    let b = broadcaster();
    b.update(|s| {
        s.connection_state = ConnectionState::Connected;
        s.is_voice_enabled = true;
    });

    let changed = b.reconcile(&ObservedState {
        connection_state: Some(ConnectionState::Connected),
        voice_enabled: Some(false),
        screen_sharing: Some(false),
    });
    assert!(changed);
    let state = b.snapshot();
    assert!(!state.is_voice_enabled);
    assert!(state.error.is_none());

    assert!(!b.reconcile(&ObservedState {
        connection_state: Some(ConnectionState::Connected),
        voice_enabled: Some(false),
        screen_sharing: None,
    }));
}

#[test]
fn reconcile_to_disconnected_clears_channel() {
    let b = broadcaster();
    b.update(|s| {
        s.connection_state = ConnectionState::Connected;
        s.channel_id = Some("space42".into());
        s.local_uid = Some(7);
        s.participant_mut(8);
    });
    b.reconcile(&ObservedState {
        connection_state: Some(ConnectionState::Disconnected),
        ..Default::default()
    });
    let state = b.snapshot();
    assert!(!state.is_joined);
    assert!(state.channel_id.is_none());
    assert!(state.participants.is_empty());
}

#[test]
fn reconcile_clears_stale_loading() {
    let b = SharedStateBroadcaster::new(Duration::from_millis(20));
    b.update(|s| s.is_loading = true);

    assert!(!b.reconcile(&ObservedState::default()));
    assert!(b.snapshot().is_loading);

    std::thread::sleep(Duration::from_millis(40));
    assert!(b.reconcile(&ObservedState::default()));
    assert!(!b.snapshot().is_loading);
}

//! Single source of truth for [`SessionState`].
//!
//! Every mutation goes through [`SharedStateBroadcaster::update`]. When a
//! mutation changes the state, the watch channel is updated and all
//! registered listeners are called synchronously on the caller's task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use spaces_common::{Event, EventBus};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::transport::ConnectionState;

use super::types::{ObservedState, SessionState};

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;

struct Mirror {
    state: SessionState,
    /// When `is_loading` last went from false to true.
    loading_since: Option<Instant>,
}

struct Inner {
    mirror: Mutex<Mirror>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    watch: watch::Sender<SessionState>,
    events: Option<Arc<EventBus>>,
    stale_loading: Duration,
}

impl Inner {
    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct SharedStateBroadcaster {
    inner: Arc<Inner>,
}

impl SharedStateBroadcaster {
    pub fn new(stale_loading: Duration) -> Self {
        Self::build(stale_loading, None)
    }

    /// Like [`new`](Self::new), also publishing voice and screen-share
    /// toggles on `events`.
    pub fn with_events(stale_loading: Duration, events: Arc<EventBus>) -> Self {
        Self::build(stale_loading, Some(events))
    }

    fn build(stale_loading: Duration, events: Option<Arc<EventBus>>) -> Self {
        let (watch, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                mirror: Mutex::new(Mirror {
                    state: SessionState::default(),
                    loading_since: None,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                watch,
                events,
                stale_loading,
            }),
        }
    }

    /// Publish `event` on the attached bus, if any.
    pub fn publish(&self, event: Event) {
        if let Some(events) = &self.inner.events {
            events.publish(event);
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.mirror().state.clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.watch.subscribe()
    }

    /// Register `listener`. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().push((id, Arc::new(listener)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Apply `f` to the state. Returns whether anything changed.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut SessionState),
    {
        self.mutate(|state, _| f(state))
    }

    /// Overwrite mirrored values with what the controllers hold, and drop
    /// a loading flag that has been up longer than the stale timeout.
    pub fn reconcile(&self, observed: &ObservedState) -> bool {
        let stale_after = self.inner.stale_loading;
        self.mutate(|state, loading_since| {
            if let Some(actual) = observed.connection_state {
                if state.connection_state != actual {
                    debug!(
                        mirrored = ?state.connection_state,
                        ?actual,
                        "correcting connection state drift"
                    );
                    state.connection_state = actual;
                    if actual == ConnectionState::Disconnected {
                        state.channel_id = None;
                        state.local_uid = None;
                        state.participants.clear();
                    }
                }
            }
            if let Some(actual) = observed.voice_enabled {
                if state.is_voice_enabled != actual {
                    debug!(mirrored = state.is_voice_enabled, actual, "correcting voice drift");
                    state.is_voice_enabled = actual;
                }
            }
            if let Some(actual) = observed.screen_sharing {
                if state.is_screen_sharing != actual {
                    debug!(
                        mirrored = state.is_screen_sharing,
                        actual,
                        "correcting screen share drift"
                    );
                    state.is_screen_sharing = actual;
                }
            }
            if state.is_loading && loading_since.is_some_and(|t| t.elapsed() >= stale_after) {
                debug!(?stale_after, "clearing stale loading flag");
                state.is_loading = false;
            }
        })
    }

    fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut SessionState, Option<Instant>),
    {
        let snapshot = {
            let mut mirror = self.inner.mirror();
            let before = mirror.state.clone();
            let loading_since = mirror.loading_since;
            f(&mut mirror.state, loading_since);
            normalize(&mut mirror.state);
            if mirror.state == before {
                return false;
            }

            if mirror.state.is_loading && !before.is_loading {
                mirror.loading_since = Some(Instant::now());
            } else if !mirror.state.is_loading {
                mirror.loading_since = None;
            }

            self.inner.watch.send_replace(mirror.state.clone());
            if let Some(events) = &self.inner.events {
                if mirror.state.is_voice_enabled != before.is_voice_enabled {
                    events.publish(Event::VoiceToggled {
                        enabled: mirror.state.is_voice_enabled,
                    });
                }
                if mirror.state.is_screen_sharing != before.is_screen_sharing {
                    events.publish(Event::ScreenShareToggled {
                        enabled: mirror.state.is_screen_sharing,
                    });
                }
            }
            mirror.state.clone()
        };

        let listeners: Vec<Listener> = self
            .inner
            .listeners()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        trace!(listeners = listeners.len(), "session state changed");
        for listener in listeners {
            listener(&snapshot);
        }
        true
    }
}

fn normalize(state: &mut SessionState) {
    state.is_joined = state.connection_state == ConnectionState::Connected;
    state.participants.sort_by_key(|p| p.uid);
    state.participants.dedup_by_key(|p| p.uid);
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners().retain(|(id, _)| *id != self.id);
        }
    }
}

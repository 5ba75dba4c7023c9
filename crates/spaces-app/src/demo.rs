//! Scripted session against the loopback transport.
//!
//! Joins the channel, turns the microphone on, lets a remote participant
//! appear, shares the screen, then leaves. The session state is printed as
//! JSON after every step.

use std::sync::Arc;
use std::time::Duration;

use spaces_config::schema::{RtcConfig, SpacesConfig};
use spaces_rtc::{
    ConfigVoicePolicy, JoinRequest, LoopbackTransport, MediaKind, SessionFacade, SessionState,
    Uid,
};
use tokio::sync::watch;
use tracing::{info, warn};

/// Uid of the simulated remote participant.
const REMOTE_UID: Uid = 4242;

/// Time given to the supervisor to pick up transport events.
const SETTLE: Duration = Duration::from_millis(50);

pub struct Scenario {
    pub channel: String,
    pub uid: Option<Uid>,
}

pub async fn run(
    config: &SpacesConfig,
    config_rx: watch::Receiver<SpacesConfig>,
    scenario: Scenario,
) {
    let transport = Arc::new(LoopbackTransport::new());
    let policy = Arc::new(ConfigVoicePolicy::new(config_rx));
    let rtc: &RtcConfig = &config.rtc;
    let facade = SessionFacade::start(transport.clone(), policy, rtc);

    let _printer = facade.subscribe(|state| {
        tracing::debug!(
            connection = ?state.connection_state,
            voice = state.is_voice_enabled,
            sharing = state.is_screen_sharing,
            "session state changed"
        );
    });

    let mut request = JoinRequest::new(rtc.app_id.clone(), scenario.channel.clone());
    if let Some(uid) = scenario.uid {
        request = request.with_uid(uid);
    }

    if !facade.join(request).await {
        warn!(channel = %scenario.channel, "could not join");
        print_state("join failed", &facade.snapshot());
        facade.shutdown().await;
        return;
    }
    print_state("joined", &facade.snapshot());

    let voice = facade.toggle_voice().await;
    info!(voice, level = facade.volume_level().await, "microphone toggled");
    print_state("voice toggled", &facade.snapshot());

    transport.simulate_user_joined(REMOTE_UID);
    transport.simulate_user_published(REMOTE_UID, MediaKind::Audio);
    tokio::time::sleep(SETTLE).await;
    info!(
        uid = REMOTE_UID,
        speaking = facade.is_user_speaking(REMOTE_UID),
        "remote participant"
    );
    print_state("remote participant joined", &facade.snapshot());

    let sharing = facade.toggle_screen_share().await;
    info!(sharing, "screen share toggled");
    print_state("screen share toggled", &facade.snapshot());

    facade.leave().await;
    print_state("left", &facade.snapshot());

    for notification in facade.notifications() {
        warn!(title = %notification.title, body = %notification.body, "notification");
    }
    facade.shutdown().await;
}

fn print_state(step: &str, state: &SessionState) {
    match serde_json::to_string_pretty(state) {
        Ok(json) => println!("== {step}\n{json}"),
        Err(e) => warn!("failed to serialize session state: {e}"),
    }
}

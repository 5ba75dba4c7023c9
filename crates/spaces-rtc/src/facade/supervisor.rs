//! Background tasks of the facade: the event/reconcile loop and the
//! request worker. Both hold only a weak reference and exit once the
//! facade is gone.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::policy::PolicyChange;
use crate::requests::SessionRequest;
use crate::transport::TransportEvent;

use super::service::SessionFacade;

pub(super) async fn supervise(
    facade: Weak<SessionFacade>,
    mut transport_events: broadcast::Receiver<TransportEvent>,
    mut policy_changes: broadcast::Receiver<PolicyChange>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;
    let mut policy_open = true;

    loop {
        tokio::select! {
            event = transport_events.recv() => match event {
                Ok(event) => {
                    let Some(this) = facade.upgrade() else { break };
                    this.handle_transport_event(event).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "transport events lagged, reconciliation will catch up");
                }
                Err(RecvError::Closed) => {
                    debug!("transport event stream closed");
                    break;
                }
            },
            change = policy_changes.recv(), if policy_open => match change {
                Ok(change) => {
                    let Some(this) = facade.upgrade() else { break };
                    this.handle_policy_change(change).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "policy changes lagged, reconciliation will catch up");
                }
                Err(RecvError::Closed) => policy_open = false,
            },
            _ = ticker.tick() => {
                let Some(this) = facade.upgrade() else { break };
                this.reconcile_once().await;
            }
        }
    }
    debug!("session supervisor stopped");
}

pub(super) async fn serve_requests(
    facade: Weak<SessionFacade>,
    mut requests: mpsc::Receiver<SessionRequest>,
) {
    while let Some(request) = requests.recv().await {
        let Some(this) = facade.upgrade() else {
            break;
        };
        match request {
            SessionRequest::JoinVoiceChat { reply } => {
                let result = this.try_join_active_space().await;
                if let Err(err) = &result {
                    this.report("Could not join voice chat", err);
                }
                let _ = reply.send(result);
            }
            SessionRequest::ToggleScreenShare { reply } => {
                let result = this.try_toggle_screen_share().await;
                if let Err(err) = &result {
                    this.report("Could not share screen", err);
                }
                let _ = reply.send(result);
            }
        }
    }
    debug!("session request worker stopped");
}

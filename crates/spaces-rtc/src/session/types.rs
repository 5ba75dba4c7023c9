use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spaces_common::SessionId;

use crate::transport::Uid;

/// Everything needed to join a channel.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub app_id: String,
    pub channel: String,
    pub token: Option<String>,
    /// Requested uid. `None` lets the transport assign one.
    pub uid: Option<Uid>,
}

impl JoinRequest {
    pub fn new(app_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            channel: channel.into(),
            token: None,
            uid: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }
}

impl fmt::Debug for JoinRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinRequest")
            .field("app_id", &self.app_id)
            .field("channel", &self.channel)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("uid", &self.uid)
            .finish()
    }
}

/// One membership in a channel. Exists exactly while connected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: SessionId,
    pub channel_id: String,
    pub local_uid: Uid,
    pub joined_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(channel_id: impl Into<String>, local_uid: Uid) -> Self {
        Self {
            session_id: SessionId::new(),
            channel_id: channel_id.into(),
            local_uid,
            joined_at: Utc::now(),
        }
    }
}

/// How local tracks are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Unpublish through the transport, then close.
    Graceful,
    /// The transport is already gone; close without transport calls.
    Local,
}

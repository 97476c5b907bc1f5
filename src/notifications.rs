//! Notification primitives shared by the dashboard and the worker, plus the
//! host the dashboard uses to ask for permission and show local notifications.

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    db::StoreError,
    push::{PushRelay, RelayMessage},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Default,
    Granted,
    Denied,
}

impl Permission {
    pub fn is_granted(self) -> bool {
        matches!(self, Permission::Granted)
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" | "prompt" => Ok(Permission::Default),
            "granted" => Ok(Permission::Granted),
            "denied" => Ok(Permission::Denied),
            other => Err(format!("unknown permission state: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A notification as handed to the OS surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    pub tag: String,
    #[serde(default)]
    pub require_interaction: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vibrate: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn simple(tag: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: None,
            badge: None,
            tag: tag.into(),
            require_interaction: false,
            vibrate: Vec::new(),
            actions: Vec::new(),
        }
    }
}

/// Page-side notification capabilities.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    /// Whether notifications and the background worker are available at all.
    fn is_supported(&self) -> bool;
    async fn permission(&self) -> Permission;
    async fn request_permission(&self) -> Permission;
    async fn show(&self, notification: &Notification) -> anyhow::Result<()>;
    async fn close(&self, tag: &str) -> anyhow::Result<()>;

    /// Stores a decision the user made outside the host, e.g. in a browser prompt.
    async fn record_decision(&self, _permission: Permission) {}
}

/// Host backed by browser push subscriptions.
///
/// The browser runs the actual permission prompt and reports its decision.
/// Until it has reported one, a stored subscription counts as granted.
pub struct BrowserHost {
    relay: Arc<PushRelay>,
    reported: RwLock<Permission>,
}

impl BrowserHost {
    pub fn new(relay: Arc<PushRelay>) -> Self {
        Self {
            relay,
            reported: RwLock::new(Permission::Default),
        }
    }
}

fn resolve_permission(
    reported: Permission,
    subscribers: impl FnOnce() -> Result<u64, StoreError>,
) -> Permission {
    if reported != Permission::Default {
        return reported;
    }
    match subscribers() {
        Ok(count) if count > 0 => Permission::Granted,
        Ok(_) => Permission::Default,
        Err(err) => {
            debug!("subscription count unavailable: {err}");
            Permission::Default
        }
    }
}

#[async_trait]
impl NotificationHost for BrowserHost {
    fn is_supported(&self) -> bool {
        true
    }

    async fn permission(&self) -> Permission {
        let reported = *self.reported.read().await;
        resolve_permission(reported, || self.relay.subscriber_count())
    }

    async fn request_permission(&self) -> Permission {
        self.permission().await
    }

    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        self.relay
            .broadcast(&RelayMessage::Show {
                notification: notification.clone(),
            })
            .await?;
        Ok(())
    }

    async fn close(&self, tag: &str) -> anyhow::Result<()> {
        self.relay
            .broadcast(&RelayMessage::Close {
                tag: tag.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn record_decision(&self, permission: Permission) {
        info!(?permission, "browser reported notification permission");
        *self.reported.write().await = permission;
    }
}

//! Notification worker.
//!
//! Runs as its own task, shares nothing with the dashboard, and is driven
//! purely by [`WorkerEvent`]s delivered through a [`WorkerHandle`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::notifications::{Notification, NotificationAction};

pub const DEFAULT_TITLE: &str = "Code Tracker Reminder";
pub const DEFAULT_BODY: &str = "Time to check your coding progress!";
pub const DEFAULT_ICON: &str = "/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/badge-72x72.png";
pub const REMINDER_TAG: &str = "code-tracker-reminder";
pub const SYNC_TAG: &str = "check-coding-status";
pub const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];
pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";
const ROOT_URL: &str = "/";

/// The OS-facing side of the worker.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    /// Take control of every open client without waiting for a reload.
    async fn claim_clients(&self) -> anyhow::Result<()>;
    async fn show(&self, notification: &Notification) -> anyhow::Result<()>;
    async fn close(&self, tag: &str) -> anyhow::Result<()>;
    /// Focus a client already showing `url`, or open a new one.
    async fn open_window(&self, url: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_badge")]
    pub badge: String,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_body() -> String {
    DEFAULT_BODY.to_string()
}

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

fn default_badge() -> String {
    DEFAULT_BADGE.to_string()
}

impl Default for NotificationPayload {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
            icon: default_icon(),
            badge: default_badge(),
        }
    }
}

impl NotificationPayload {
    /// Decodes push data, falling back to the default payload when there is
    /// none or it is not a JSON object. Missing fields take their defaults.
    pub fn from_push_data(data: Option<&[u8]>) -> Self {
        let Some(bytes) = data.filter(|bytes| !bytes.is_empty()) else {
            debug!("push event without data, using default payload");
            return Self::default();
        };

        match serde_json::from_slice(bytes) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("unparsable push payload ({err}), using default payload");
                Self::default()
            }
        }
    }

    pub fn into_notification(self) -> Notification {
        Notification {
            title: self.title,
            body: self.body,
            icon: Some(self.icon),
            badge: Some(self.badge),
            tag: REMINDER_TAG.to_string(),
            require_interaction: true,
            vibrate: VIBRATE_PATTERN.to_vec(),
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: "View Dashboard".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Install,
    Activate,
    Push { data: Option<Vec<u8>> },
    NotificationClick { tag: String, action: Option<String> },
    Sync { tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Parsed,
    Installing,
    Activating,
    Active,
}

pub struct NotificationWorker {
    surface: Arc<dyn NotificationSurface>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl NotificationWorker {
    pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Parsed);
        Self { surface, lifecycle }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    fn transition(&self, next: Lifecycle) {
        info!(from = ?self.lifecycle(), to = ?next, "worker lifecycle");
        self.lifecycle.send_replace(next);
    }

    pub async fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Install => self.install(),
            WorkerEvent::Activate => self.activate().await,
            other if self.lifecycle() != Lifecycle::Active => {
                warn!(event = ?other, "worker not active, dropping event");
            }
            WorkerEvent::Push { data } => self.push(data.as_deref()).await,
            WorkerEvent::NotificationClick { tag, action } => {
                self.notification_click(&tag, action.as_deref()).await
            }
            WorkerEvent::Sync { tag } => self.sync(&tag),
        }
    }

    fn install(&self) {
        if self.lifecycle() != Lifecycle::Parsed {
            debug!("worker already installed");
            return;
        }
        self.transition(Lifecycle::Installing);
        // Skip waiting: no handoff period for an older worker.
        self.transition(Lifecycle::Activating);
    }

    async fn activate(&self) {
        if self.lifecycle() != Lifecycle::Activating {
            debug!(lifecycle = ?self.lifecycle(), "ignoring activate");
            return;
        }
        if let Err(err) = self.surface.claim_clients().await {
            error!("failed to claim clients: {err}");
        }
        self.transition(Lifecycle::Active);
    }

    async fn push(&self, data: Option<&[u8]>) {
        let notification = NotificationPayload::from_push_data(data).into_notification();
        info!(title = %notification.title, "push received");
        if let Err(err) = self.surface.show(&notification).await {
            error!("failed to show notification: {err}");
        }
    }

    async fn notification_click(&self, tag: &str, action: Option<&str>) {
        if let Err(err) = self.surface.close(tag).await {
            error!("failed to close notification {tag}: {err}");
        }

        if action == Some(ACTION_VIEW) {
            if let Err(err) = self.surface.open_window(ROOT_URL).await {
                error!("failed to open dashboard window: {err}");
            }
        }
    }

    fn sync(&self, tag: &str) {
        if tag == SYNC_TAG {
            info!("background sync requested: checking coding status");
        } else {
            debug!(tag, "ignoring unknown sync tag");
        }
    }

    fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }
}

#[derive(Debug, Error)]
#[error("notification worker has stopped")]
pub struct WorkerClosed;

#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<WorkerEvent>,
    registered: Arc<AtomicBool>,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl WorkerHandle {
    /// Installs and activates the worker. Only the first call does anything;
    /// returns whether this call performed the registration.
    pub async fn register(&self) -> Result<bool, WorkerClosed> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        for event in [WorkerEvent::Install, WorkerEvent::Activate] {
            if let Err(err) = self.dispatch(event).await {
                self.registered.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }
        Ok(true)
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Result<(), WorkerClosed> {
        self.sender.send(event).await.map_err(|_| WorkerClosed)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Resolves once the worker reports `Active`.
    pub async fn wait_active(&self) -> Result<(), WorkerClosed> {
        let mut lifecycle = self.lifecycle.clone();
        lifecycle
            .wait_for(|state| *state == Lifecycle::Active)
            .await
            .map(|_| ())
            .map_err(|_| WorkerClosed)
    }
}

/// Spawns the worker task. It runs until every handle is dropped, processing
/// one event at a time in arrival order.
pub fn spawn(surface: Arc<dyn NotificationSurface>, capacity: usize) -> (WorkerHandle, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(capacity.max(1));
    let mut worker = NotificationWorker::new(surface);
    let handle = WorkerHandle {
        sender,
        registered: Arc::new(AtomicBool::new(false)),
        lifecycle: worker.subscribe(),
    };

    let task = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            worker.handle(event).await;
        }
        debug!("notification worker stopped");
    });

    (handle, task)
}

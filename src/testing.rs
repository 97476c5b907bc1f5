//! In-memory doubles for the backend, notification host and OS surface.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::{
    backend::{Backend, BackendError, Result},
    models::{BackendHealth, DashboardSnapshot, GithubStatus, NewTrigger, Trigger},
    notifications::{Notification, NotificationHost, Permission},
    worker::NotificationSurface,
};

fn unavailable() -> BackendError {
    BackendError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "backend unavailable".to_string(),
    }
}

pub fn snapshot(has_commits_today: bool) -> DashboardSnapshot {
    DashboardSnapshot {
        username: Some("octo".to_string()),
        github: Some(GithubStatus {
            has_commits_today,
            commit_count: u32::from(has_commits_today),
            commits: Vec::new(),
        }),
        leetcode: None,
        last_updated: Utc::now(),
    }
}

/// Backend holding triggers in memory. Dashboard reads can be made to fail
/// or to park until released.
#[derive(Default)]
pub struct FakeBackend {
    snapshot: Mutex<Option<DashboardSnapshot>>,
    triggers: Mutex<Vec<Trigger>>,
    next_id: AtomicUsize,
    pub dashboard_calls: AtomicUsize,
    pub trigger_reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    park_dashboard: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl FakeBackend {
    pub fn with_snapshot(snapshot: DashboardSnapshot) -> Self {
        let backend = Self::default();
        backend.set_snapshot(snapshot);
        backend
    }

    pub fn set_snapshot(&self, snapshot: DashboardSnapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn park_dashboard(&self, park: bool) {
        self.park_dashboard.store(park, Ordering::SeqCst);
    }

    pub fn dashboard_calls(&self) -> usize {
        self.dashboard_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn dashboard(&self, _username: &str) -> Result<DashboardSnapshot> {
        self.dashboard_calls.fetch_add(1, Ordering::SeqCst);
        if self.park_dashboard.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.snapshot.lock().unwrap().clone().ok_or_else(unavailable)
    }

    async fn triggers(&self, username: &str) -> Result<Vec<Trigger>> {
        self.trigger_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .filter(|trigger| trigger.username == username)
            .cloned()
            .collect())
    }

    async fn create_trigger(&self, trigger: &NewTrigger) -> Result<Option<String>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Trigger {
            id: format!("trigger-{id}"),
            platform: trigger.platform,
            username: trigger.username.clone(),
            trigger_time: trigger.trigger_time.to_string(),
            enabled: trigger.enabled,
            created_at: None,
        };
        let id = created.id.clone();
        self.triggers.lock().unwrap().push(created);
        Ok(Some(id))
    }

    async fn delete_trigger(&self, id: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut triggers = self.triggers.lock().unwrap();
        let before = triggers.len();
        triggers.retain(|trigger| trigger.id != id);
        if triggers.len() == before {
            return Err(BackendError::Status {
                status: StatusCode::NOT_FOUND,
                message: "Trigger not found".to_string(),
            });
        }
        Ok(())
    }

    async fn health(&self) -> Result<BackendHealth> {
        Ok(BackendHealth {
            status: "healthy".to_string(),
            github_token_configured: true,
        })
    }
}

pub struct RecordingHost {
    supported: bool,
    permission: Mutex<Permission>,
    pub shown: Mutex<Vec<Notification>>,
    pub closed: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new(permission: Permission) -> Self {
        Self {
            supported: true,
            permission: Mutex::new(permission),
            shown: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Permission::Default)
        }
    }

    pub fn set_permission(&self, permission: Permission) {
        *self.permission.lock().unwrap() = permission;
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationHost for RecordingHost {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn permission(&self) -> Permission {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> Permission {
        *self.permission.lock().unwrap()
    }

    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn close(&self, tag: &str) -> anyhow::Result<()> {
        self.closed.lock().unwrap().push(tag.to_string());
        Ok(())
    }

    async fn record_decision(&self, permission: Permission) {
        self.set_permission(permission);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Claim,
    Show(Notification),
    Close(String),
    Open(String),
}

#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    fail: bool,
}

impl RecordingSurface {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn record(&self, call: SurfaceCall) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            anyhow::bail!("surface unavailable");
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Show(notification) => Some(notification),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Open(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSurface for RecordingSurface {
    async fn claim_clients(&self) -> anyhow::Result<()> {
        self.record(SurfaceCall::Claim)
    }

    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        self.record(SurfaceCall::Show(notification.clone()))
    }

    async fn close(&self, tag: &str) -> anyhow::Result<()> {
        self.record(SurfaceCall::Close(tag.to_string()))
    }

    async fn open_window(&self, url: &str) -> anyhow::Result<()> {
        self.record(SurfaceCall::Open(url.to_string()))
    }
}

//! Dashboard state container.
//!
//! All UI state lives in [`DashboardState`] and only changes through
//! [`reduce`], which is a pure function of the previous state and an [`Event`].

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{
    models::{CommitInfo, DashboardSnapshot, Difficulty, Platform, Trigger},
    notifications::Permission,
};

pub const MAX_NOTICES: usize = 5;
pub const TOP_COMMITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeVariant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DashboardLoaded(DashboardSnapshot),
    DashboardFailed(String),
    TriggersLoaded(Vec<Trigger>),
    TriggersFailed(String),
    TriggerCreated { platform: Platform, time: String },
    TriggerCreateFailed(String),
    TriggerDeleted,
    TriggerDeleteFailed(String),
    /// Silent re-check on mount; no notice.
    PermissionChecked(Permission),
    PermissionChanged(Permission),
    NotificationBlocked,
    NoticeDismissed(u64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub snapshot: Option<DashboardSnapshot>,
    pub triggers: Vec<Trigger>,
    /// True until the first dashboard fetch settles, either way.
    pub loading: bool,
    pub notifications_enabled: bool,
    pub notices: VecDeque<Notice>,
    next_notice_id: u64,
}

impl DashboardState {
    pub fn new() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    fn notify(&mut self, title: &str, description: impl Into<String>, variant: NoticeVariant) {
        self.next_notice_id += 1;
        self.notices.push_back(Notice {
            id: self.next_notice_id,
            title: title.to_string(),
            description: description.into(),
            variant,
        });
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
    }
}

pub fn reduce(mut state: DashboardState, event: Event) -> DashboardState {
    match event {
        Event::DashboardLoaded(snapshot) => {
            state.snapshot = Some(snapshot);
            state.loading = false;
        }
        Event::DashboardFailed(reason) => {
            state.loading = false;
            state.notify(
                "Error",
                format!("Failed to fetch dashboard data: {reason}"),
                NoticeVariant::Destructive,
            );
        }
        Event::TriggersLoaded(triggers) => {
            state.triggers = triggers;
        }
        Event::TriggersFailed(reason) => {
            state.notify(
                "Error",
                format!("Failed to fetch reminders: {reason}"),
                NoticeVariant::Destructive,
            );
        }
        Event::TriggerCreated { platform, time } => {
            state.notify(
                "Success",
                format!("Reminder set for {platform} at {time}"),
                NoticeVariant::Default,
            );
        }
        Event::TriggerCreateFailed(reason) => {
            state.notify(
                "Error",
                format!("Failed to create reminder: {reason}"),
                NoticeVariant::Destructive,
            );
        }
        Event::TriggerDeleted => {
            state.notify("Success", "Reminder deleted", NoticeVariant::Default);
        }
        Event::TriggerDeleteFailed(reason) => {
            state.notify(
                "Error",
                format!("Failed to delete reminder: {reason}"),
                NoticeVariant::Destructive,
            );
        }
        Event::PermissionChecked(permission) => {
            state.notifications_enabled = permission.is_granted();
        }
        Event::PermissionChanged(permission) => {
            state.notifications_enabled = permission.is_granted();
            if state.notifications_enabled {
                state.notify(
                    "Notifications Enabled",
                    "You'll receive reminders for your coding goals!",
                    NoticeVariant::Default,
                );
            } else {
                state.notify(
                    "Notifications Blocked",
                    "Please enable notifications in your browser settings.",
                    NoticeVariant::Destructive,
                );
            }
        }
        Event::NotificationBlocked => {
            state.notify(
                "Notifications Disabled",
                "Enable notifications first to send a test.",
                NoticeVariant::Default,
            );
        }
        Event::NoticeDismissed(id) => {
            state.notices.retain(|notice| notice.id != id);
        }
    }
    state
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusIcon {
    Pending,
    Positive,
    Negative,
}

pub fn status_icon(loading: bool, done: Option<bool>) -> StatusIcon {
    match (loading, done) {
        (true, _) => StatusIcon::Pending,
        (false, Some(true)) => StatusIcon::Positive,
        (false, _) => StatusIcon::Negative,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GithubCard {
    pub status: StatusIcon,
    pub has_commits_today: bool,
    pub commit_count: u32,
    pub top_commits: Vec<CommitInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeetCodeCard {
    pub status: StatusIcon,
    pub solved: bool,
    pub title: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub loading: bool,
    pub notifications_enabled: bool,
    pub github: GithubCard,
    pub leetcode: LeetCodeCard,
    pub triggers: Vec<Trigger>,
    pub notices: Vec<Notice>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl DashboardView {
    pub fn from_state(state: &DashboardState) -> Self {
        let github = state.snapshot.as_ref().and_then(|s| s.github.as_ref());
        let leetcode = state.snapshot.as_ref().and_then(|s| s.leetcode.as_ref());

        Self {
            loading: state.loading,
            notifications_enabled: state.notifications_enabled,
            github: GithubCard {
                status: status_icon(state.loading, github.map(|g| g.has_commits_today)),
                has_commits_today: github.is_some_and(|g| g.has_commits_today),
                commit_count: github.map_or(0, |g| g.commit_count),
                top_commits: github
                    .map(|g| g.commits.iter().take(TOP_COMMITS).cloned().collect())
                    .unwrap_or_default(),
            },
            leetcode: LeetCodeCard {
                status: status_icon(state.loading, leetcode.map(|l| l.potd_solved)),
                solved: leetcode.is_some_and(|l| l.potd_solved),
                title: leetcode.map(|l| l.potd_title.clone()),
                difficulty: leetcode.map(|l| l.potd_difficulty),
                date: leetcode.map(|l| l.potd_date),
            },
            triggers: state.triggers.clone(),
            notices: state.notices.iter().cloned().collect(),
            last_updated: state.snapshot.as_ref().map(|s| s.last_updated),
        }
    }
}

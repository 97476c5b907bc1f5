use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// GitHub handle whose status the dashboard tracks.
pub const TRACKED_USERNAME: &str = "NK-NiteshKumar";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    #[serde(default)]
    pub username: Option<String>,
    pub github: Option<GithubStatus>,
    pub leetcode: Option<LeetCodeStatus>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubStatus {
    pub has_commits_today: bool,
    pub commit_count: u32,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub message: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeetCodeStatus {
    pub potd_solved: bool,
    pub potd_title: String,
    pub potd_difficulty: Difficulty,
    pub potd_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Leetcode,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Github => "github",
            Platform::Leetcode => "leetcode",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = InvalidPlatform;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Platform::Github),
            "leetcode" => Ok(Platform::Leetcode),
            _ => Err(InvalidPlatform(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported platform: {0}")]
pub struct InvalidPlatform(pub String);

/// Wall-clock reminder time in `HH:MM` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TriggerTime(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trigger time must be HH:MM, got {0:?}")]
pub struct InvalidTriggerTime(pub String);

impl TriggerTime {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TriggerTime {
    type Err = InvalidTriggerTime;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTriggerTime(value.to_string());
        let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
        if hours.len() != 2 || minutes.len() != 2 {
            return Err(invalid());
        }
        if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hours: u8 = hours.parse().map_err(|_| invalid())?;
        let minutes: u8 = minutes.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for TriggerTime {
    type Error = InvalidTriggerTime;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriggerTime> for String {
    fn from(value: TriggerTime) -> Self {
        value.0
    }
}

impl fmt::Display for TriggerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub platform: Platform,
    pub username: String,
    // Kept as the backend sent it; only outgoing times are validated.
    pub trigger_time: String,
    pub enabled: bool,
    // The backend emits naive timestamps here, so it is not parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTrigger {
    pub platform: Platform,
    pub username: String,
    pub trigger_time: TriggerTime,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    #[serde(default)]
    pub github_token_configured: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(rename = "expirationTime")]
    pub expiration_time: Option<i64>,
    pub keys: PushKeys,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredSubscription {
    pub subscription: PushSubscription,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delete_token: String,
}

#[derive(Serialize)]
pub struct SubscribeResponse {
    pub id: String,
    pub delete_token: String,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub public_key: String,
}

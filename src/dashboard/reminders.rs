//! Turns stored triggers into reminder pushes for platforms that are still
//! outstanding at the trigger's minute.

use chrono::NaiveTime;

use crate::{
    models::{DashboardSnapshot, Platform, Trigger},
    worker::NotificationPayload,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub trigger_id: String,
    pub platform: Platform,
    pub payload: NotificationPayload,
}

/// The `HH:MM` value a trigger must carry to fire at `now`.
pub fn minute_key(now: NaiveTime) -> String {
    now.format("%H:%M").to_string()
}

/// Reminders for every enabled trigger set to the minute of `now`. Without a
/// snapshot nothing is known about today's progress, so nothing fires.
pub fn due_reminders(
    snapshot: Option<&DashboardSnapshot>,
    triggers: &[Trigger],
    now: NaiveTime,
    username: &str,
) -> Vec<Reminder> {
    let Some(snapshot) = snapshot else {
        return Vec::new();
    };
    let minute = minute_key(now);

    triggers
        .iter()
        .filter(|trigger| trigger.enabled && trigger.trigger_time == minute)
        .filter_map(|trigger| {
            let body = outstanding_message(snapshot, trigger.platform, username)?;
            Some(Reminder {
                trigger_id: trigger.id.clone(),
                platform: trigger.platform,
                payload: NotificationPayload {
                    body,
                    ..NotificationPayload::default()
                },
            })
        })
        .collect()
}

fn outstanding_message(
    snapshot: &DashboardSnapshot,
    platform: Platform,
    username: &str,
) -> Option<String> {
    match platform {
        Platform::Github => {
            let github = snapshot.github.as_ref()?;
            (!github.has_commits_today).then(|| {
                format!("Hey {username}! You haven't made any commits today. Time to code! 💻")
            })
        }
        Platform::Leetcode => {
            let leetcode = snapshot.leetcode.as_ref()?;
            (!leetcode.potd_solved).then(|| {
                format!(
                    "Hey {username}! Today's LeetCode POTD '{}' is waiting for you! 🧠",
                    leetcode.potd_title
                )
            })
        }
    }
}

use std::{
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{Local, NaiveTime, Timelike};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{
    reminders::due_reminders,
    store::{DashboardState, DashboardView, Event, reduce},
};
use crate::{
    backend::Backend,
    models::{BackendHealth, NewTrigger, Platform, TriggerTime},
    notifications::{Notification, NotificationHost, Permission},
    worker::{WorkerEvent, WorkerHandle},
};

pub const TEST_NOTIFICATION_TAG: &str = "code-tracker-test";
const REMINDER_TICK: Duration = Duration::from_secs(60);

type Clock = Arc<dyn Fn() -> NaiveTime + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub username: String,
    pub refresh_interval: Duration,
    pub test_notification_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The result (success or failure) was applied to the state.
    Completed,
    /// Another snapshot fetch was already in flight.
    Skipped,
    /// The controller was unmounted while the request was running.
    Discarded,
}

/// Single-slot token for snapshot fetches, released on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(slot: &'a AtomicBool) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(slot))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DashboardController {
    backend: Arc<dyn Backend>,
    host: Arc<dyn NotificationHost>,
    worker: Option<WorkerHandle>,
    settings: ControllerSettings,
    state: Mutex<DashboardState>,
    in_flight: AtomicBool,
    generation: AtomicU64,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    clock: Clock,
}

impl DashboardController {
    pub fn new(
        backend: Arc<dyn Backend>,
        host: Arc<dyn NotificationHost>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            backend,
            host,
            worker: None,
            settings,
            state: Mutex::new(DashboardState::new()),
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            tasks: StdMutex::new(Vec::new()),
            clock: Arc::new(|| Local::now().time()),
        }
    }

    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Replaces the local wall clock that reminder triggers are matched against.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn apply(&self, event: Event) {
        let mut state = self.state.lock().await;
        let current = std::mem::take(&mut *state);
        *state = reduce(current, event);
    }

    pub async fn view(&self) -> DashboardView {
        DashboardView::from_state(&*self.state.lock().await)
    }

    /// Checks permission, registers the worker, loads everything once and
    /// starts the periodic refresh and the reminder tick.
    pub async fn mount(self: &Arc<Self>) {
        if self.host.is_supported() {
            let permission = self.host.permission().await;
            self.apply(Event::PermissionChecked(permission)).await;

            if let Some(worker) = &self.worker {
                match worker.register().await {
                    Ok(true) => info!("notification worker registered"),
                    Ok(false) => debug!("notification worker already registered"),
                    Err(err) => warn!("worker registration failed: {err}"),
                }
            }
        } else {
            debug!("notifications unsupported, skipping permission check and worker");
        }

        self.fetch_dashboard().await;
        self.fetch_triggers().await;

        let started = [self.spawn_refresh(), self.spawn_reminders()];
        let previous = std::mem::replace(&mut *self.lock_tasks(), started.into());
        for task in previous {
            task.abort();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        let period = self.settings.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                debug!("periodic dashboard refresh");
                controller.fetch_dashboard().await;
            }
        })
    }

    fn spawn_reminders(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        // First tick on the next minute boundary of the wall clock.
        let into_minute = Duration::from_secs(u64::from((self.clock)().second()));
        let start = Instant::now() + REMINDER_TICK.saturating_sub(into_minute);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, REMINDER_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                let now = (controller.clock)();
                controller.fire_due_reminders(now).await;
            }
        })
    }

    /// Stops the background timers; requests still in flight are discarded
    /// when they complete.
    pub fn unmount(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let tasks = std::mem::take(&mut *self.lock_tasks());
        if !tasks.is_empty() {
            for task in tasks {
                task.abort();
            }
            info!("dashboard timers stopped");
        }
    }

    /// Pushes a reminder through the worker for each enabled trigger set to
    /// the minute of `now` whose platform is not done yet. Returns how many
    /// were dispatched.
    pub async fn fire_due_reminders(&self, now: NaiveTime) -> usize {
        let Some(worker) = &self.worker else {
            return 0;
        };
        let due = {
            let state = self.state.lock().await;
            due_reminders(
                state.snapshot.as_ref(),
                &state.triggers,
                now,
                &self.settings.username,
            )
        };

        let mut sent = 0;
        for reminder in due {
            let data = match serde_json::to_vec(&reminder.payload) {
                Ok(data) => data,
                Err(err) => {
                    warn!("failed to encode reminder: {err}");
                    continue;
                }
            };
            match worker.dispatch(WorkerEvent::Push { data: Some(data) }).await {
                Ok(()) => {
                    info!(trigger = %reminder.trigger_id, platform = %reminder.platform, "reminder sent");
                    sent += 1;
                }
                Err(err) => warn!(trigger = %reminder.trigger_id, "reminder not sent: {err}"),
            }
        }
        sent
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    pub async fn fetch_dashboard(&self) -> FetchOutcome {
        let Some(_slot) = InFlight::acquire(&self.in_flight) else {
            debug!("dashboard fetch already in flight, skipping");
            return FetchOutcome::Skipped;
        };
        let generation = self.generation.load(Ordering::Acquire);

        let result = self.backend.dashboard(&self.settings.username).await;
        if !self.is_current(generation) {
            debug!("discarding dashboard result after unmount");
            return FetchOutcome::Discarded;
        }

        let event = match result {
            Ok(snapshot) => Event::DashboardLoaded(snapshot),
            Err(err) => {
                warn!("failed to fetch dashboard: {err}");
                Event::DashboardFailed(err.to_string())
            }
        };
        self.apply(event).await;
        FetchOutcome::Completed
    }

    pub async fn fetch_triggers(&self) -> FetchOutcome {
        let generation = self.generation.load(Ordering::Acquire);

        let result = self.backend.triggers(&self.settings.username).await;
        if !self.is_current(generation) {
            return FetchOutcome::Discarded;
        }

        let event = match result {
            Ok(triggers) => Event::TriggersLoaded(triggers),
            Err(err) => {
                warn!("failed to fetch triggers: {err}");
                Event::TriggersFailed(err.to_string())
            }
        };
        self.apply(event).await;
        FetchOutcome::Completed
    }

    /// Returns whether the backend accepted the trigger.
    pub async fn create_trigger(&self, platform: Platform, time: TriggerTime) -> bool {
        let trigger = NewTrigger {
            platform,
            username: self.settings.username.clone(),
            trigger_time: time.clone(),
            enabled: true,
        };

        match self.backend.create_trigger(&trigger).await {
            Ok(id) => {
                info!(id = id.as_deref().unwrap_or("-"), %platform, time = %time, "trigger created");
                self.apply(Event::TriggerCreated {
                    platform,
                    time: time.to_string(),
                })
                .await;
                self.fetch_triggers().await;
                true
            }
            Err(err) => {
                warn!("failed to create trigger: {err}");
                self.apply(Event::TriggerCreateFailed(err.to_string())).await;
                false
            }
        }
    }

    /// Returns whether the backend deleted the trigger.
    pub async fn delete_trigger(&self, id: &str) -> bool {
        match self.backend.delete_trigger(id).await {
            Ok(()) => {
                info!(id, "trigger deleted");
                self.apply(Event::TriggerDeleted).await;
                self.fetch_triggers().await;
                true
            }
            Err(err) => {
                warn!(id, "failed to delete trigger: {err}");
                let reason = if err.is_not_found() {
                    "reminder not found".to_string()
                } else {
                    err.to_string()
                };
                self.apply(Event::TriggerDeleteFailed(reason)).await;
                false
            }
        }
    }

    pub async fn request_notification_permission(&self) -> Permission {
        if !self.host.is_supported() {
            debug!("notifications unsupported, ignoring permission request");
            return Permission::Default;
        }

        let permission = self.host.request_permission().await;
        self.apply(Event::PermissionChanged(permission)).await;
        permission
    }

    /// Shows a local notification that closes itself after the configured
    /// interval. Returns whether one was shown.
    pub async fn test_notification(&self) -> bool {
        if !self.host.is_supported() {
            return false;
        }
        if !self.host.permission().await.is_granted() {
            self.apply(Event::NotificationBlocked).await;
            return false;
        }

        let notification = Notification::simple(
            TEST_NOTIFICATION_TAG,
            "Test Notification",
            "This is a test notification from Code Tracker!",
        );
        if let Err(err) = self.host.show(&notification).await {
            warn!("failed to show test notification: {err}");
            return false;
        }

        let host = self.host.clone();
        let ttl = self.settings.test_notification_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(err) = host.close(TEST_NOTIFICATION_TAG).await {
                warn!("failed to close test notification: {err}");
            }
        });
        true
    }

    pub async fn dismiss_notice(&self, id: u64) {
        self.apply(Event::NoticeDismissed(id)).await;
    }

    pub async fn backend_health(&self) -> Option<BackendHealth> {
        match self.backend.health().await {
            Ok(health) => Some(health),
            Err(err) => {
                warn!("backend health check failed: {err}");
                None
            }
        }
    }

    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }
}

use std::sync::Arc;

use crate::{
    config::Config, dashboard::DashboardController, db::SubscriptionStore,
    notifications::NotificationHost, worker::WorkerHandle,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub controller: Arc<DashboardController>,
    pub host: Arc<dyn NotificationHost>,
    pub worker: WorkerHandle,
    pub store: Arc<SubscriptionStore>,
}

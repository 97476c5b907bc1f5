mod controller;
mod reminders;
pub mod store;

pub use controller::{ControllerSettings, DashboardController, FetchOutcome};
pub use store::DashboardView;

//! Terminal user interface for the live probe dashboard

mod dashboard;

pub use dashboard::DashboardApp;

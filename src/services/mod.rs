//! Service layer.
//!
//! Services receive their dependencies through their constructors and are
//! driven through the [`Service`] lifecycle by the application.

pub mod data;
pub mod main_service;
pub mod notification;

use async_trait::async_trait;

use crate::error::AppResult;

pub use data::{DataService, Row, TablePage};
pub use main_service::{MainService, RunSummary, ServiceStatus};
pub use notification::{InAppLevel, Notification, NotificationService, NotificationType};

/// Lifecycle shared by every service.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize(&mut self) -> AppResult<()>;

    async fn cleanup(&mut self) -> AppResult<()>;
}

//! Main service: coordinates the data and notification services.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::MySqlPool;

use super::{DataService, NotificationService, Service};
use crate::config::{AppConfig, Environment};
use crate::error::{AppError, AppResult};
use crate::wrap::{retry_on_connection_error, AsyncOp, AsyncOperation, LogOptions, OperationExt, TimingOptions};

const BUSINESS_RETRY_ATTEMPTS: u32 = 3;
const BUSINESS_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Outcome of one [`MainService::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Tables visible to the service, when a database is configured.
    pub tables: Option<usize>,
    pub notifications_processed: usize,
}

/// Snapshot returned by [`MainService::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub service_name: &'static str,
    pub is_running: bool,
    pub config_env: Environment,
    pub data_service_initialized: bool,
    pub notification_service_initialized: bool,
}

/// Clears the running flag when the run ends, including on cancellation.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MainService {
    config: Arc<AppConfig>,
    pool: Option<MySqlPool>,
    data_service: Option<DataService>,
    notification_service: Option<NotificationService>,
    is_running: AtomicBool,
}

impl MainService {
    pub const fn new(config: Arc<AppConfig>, pool: Option<MySqlPool>) -> Self {
        Self {
            config,
            pool,
            data_service: None,
            notification_service: None,
            is_running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub const fn data_service(&self) -> Option<&DataService> {
        self.data_service.as_ref()
    }

    pub const fn notification_service(&self) -> Option<&NotificationService> {
        self.notification_service.as_ref()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            service_name: self.name(),
            is_running: self.is_running(),
            config_env: self.config.env,
            data_service_initialized: self.data_service.is_some(),
            notification_service_initialized: self.notification_service.is_some(),
        }
    }

    /// Runs the main service logic once.
    ///
    /// Each run is logged with its arguments and result and timed at INFO.
    /// Fails with [`AppError::NotInitialized`] before [`Service::initialize`].
    pub async fn run(&self) -> AppResult<RunSummary> {
        AsyncOp::new("MainService::run", |()| self.run_once())
            .with_doc("Runs the main service logic once.")
            .logged(LogOptions::default().with_args().with_result())
            .timed(TimingOptions::default())
            .call_async(())
            .await
    }

    async fn run_once(&self) -> AppResult<RunSummary> {
        let (Some(data), Some(notifications)) = (&self.data_service, &self.notification_service)
        else {
            return Err(AppError::NotInitialized(
                "MainService: call initialize() before run()".to_string(),
            ));
        };

        let _running = RunningGuard::start(&self.is_running);
        tracing::info!("Service starting");

        let business = retry_on_connection_error(
            AsyncOp::new("MainService::perform_business_operations", |()| {
                Self::perform_business_operations(data)
            }),
            BUSINESS_RETRY_ATTEMPTS,
            BUSINESS_RETRY_DELAY,
        );

        let result = business.call_async(()).await.map(|tables| RunSummary {
            tables,
            notifications_processed: notifications.process_queue(),
        });

        match &result {
            Ok(summary) => tracing::info!(?summary, "Service run finished"),
            Err(e) => tracing::error!(error = %e, "Service run failed"),
        }
        result
    }

    async fn perform_business_operations(data: &DataService) -> AppResult<Option<usize>> {
        tracing::info!("Performing business operations");
        if !data.has_pool() {
            tracing::info!("No database configured, skipping data checks");
            return Ok(None);
        }

        let tables = data.get_table_list().await?;
        tracing::info!(tables = tables.len(), "Business operations completed");
        Ok(Some(tables.len()))
    }
}

#[async_trait]
impl Service for MainService {
    fn name(&self) -> &'static str {
        "MainService"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        tracing::info!(env = %self.config.env, "Initializing MainService");

        let mut data = DataService::new(self.pool.clone());
        data.initialize().await?;
        self.data_service = Some(data);

        let mut notifications = NotificationService::new();
        notifications.initialize().await?;
        self.notification_service = Some(notifications);

        tracing::info!("MainService initialized");
        Ok(())
    }

    async fn cleanup(&mut self) -> AppResult<()> {
        tracing::info!("Cleaning up MainService");

        if let Some(data) = self.data_service.as_mut() {
            data.cleanup().await?;
        }
        if let Some(notifications) = self.notification_service.as_mut() {
            notifications.cleanup().await?;
        }

        self.is_running.store(false, Ordering::SeqCst);
        tracing::info!("MainService cleaned up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Notification;

    fn config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            env: Environment::Test,
            db_url: "mysql://test@localhost/test".to_string(),
            debug: true,
            log_level: "DEBUG".to_string(),
            max_workers: 1,
        })
    }

    #[tokio::test]
    async fn test_run_before_initialize_fails() {
        let service = MainService::new(config(), None);
        let result = service.run().await;
        assert!(matches!(result, Err(AppError::NotInitialized(_))));
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_initialize_creates_sub_services() {
        let mut service = MainService::new(config(), None);
        assert!(service.data_service().is_none());

        service.initialize().await.unwrap();
        assert!(service.data_service().is_some());
        assert!(service.notification_service().is_some());
    }

    #[tokio::test]
    async fn test_run_without_database() {
        let mut service = MainService::new(config(), None);
        service.initialize().await.unwrap();

        let summary = service.run().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                tables: None,
                notifications_processed: 0
            }
        );
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_run_drains_notification_queue() {
        let mut service = MainService::new(config(), None);
        service.initialize().await.unwrap();

        let notifications = service.notification_service().unwrap();
        notifications.queue_notification(Notification::Sms {
            to: "123".to_string(),
            message: "hi".to_string(),
        });
        notifications.queue_notification(Notification::InApp {
            user_id: 1,
            message: "hello".to_string(),
            level: crate::services::InAppLevel::Info,
        });

        let summary = service.run().await.unwrap();
        assert_eq!(summary.notifications_processed, 2);
        assert_eq!(service.notification_service().unwrap().queue_size(), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let mut service = MainService::new(config(), None);
        let status = service.status();
        assert_eq!(status.service_name, "MainService");
        assert!(!status.is_running);
        assert!(!status.data_service_initialized);

        service.initialize().await.unwrap();
        let status = service.status();
        assert!(status.data_service_initialized);
        assert!(status.notification_service_initialized);
        assert_eq!(status.config_env, Environment::Test);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["config_env"], "test");
    }

    #[tokio::test]
    async fn test_cleanup_resets_state() {
        let mut service = MainService::new(config(), None);
        service.initialize().await.unwrap();
        service.cleanup().await.unwrap();
        assert!(!service.is_running());
    }

    #[test]
    fn test_running_guard_resets_flag() {
        let flag = AtomicBool::new(false);
        {
            let _guard = RunningGuard::start(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}

//! Application lifecycle.

use std::sync::Arc;

use sqlx::MySqlPool;

use crate::config::{
    close_db, init_db, init_logging, load_config, AppConfig, Environment, LogGuard, LoggingOptions,
};
use crate::error::{AppError, AppResult};
use crate::services::{MainService, RunSummary, Service};

/// Owns the configuration, the log guard and the main service.
#[derive(Default)]
pub struct Application {
    config: Option<Arc<AppConfig>>,
    service: Option<MainService>,
    _log_guard: Option<LogGuard>,
    shutdown_requested: bool,
}

impl Application {
    pub fn new() -> Self {
        Self::default()
    }

    /// An application with an already loaded configuration and no logging setup.
    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config: Some(Arc::new(config)),
            ..Self::default()
        }
    }

    pub fn config(&self) -> AppResult<&Arc<AppConfig>> {
        self.config
            .as_ref()
            .ok_or_else(|| AppError::NotInitialized("configuration".to_string()))
    }

    pub const fn service(&self) -> Option<&MainService> {
        self.service.as_ref()
    }

    /// Loads the configuration for `env` and installs logging for it.
    pub fn load_configuration(&mut self, env: Environment) -> AppResult<()> {
        let config = load_config(env)?;
        self._log_guard = Some(init_logging(&LoggingOptions::for_config(&config))?);
        tracing::info!(env = %config.env, log_level = %config.log_level, "Logging initialized");
        self.config = Some(Arc::new(config));
        Ok(())
    }

    /// Connects to the database and initializes the main service.
    pub async fn initialize_services(&mut self) -> AppResult<()> {
        let pool = init_db(self.config()?).await?;
        self.initialize_services_with(Some(pool)).await
    }

    /// Initializes the main service on top of an existing pool, or none.
    pub async fn initialize_services_with(&mut self, pool: Option<MySqlPool>) -> AppResult<()> {
        tracing::info!("Initializing services");
        let mut service = MainService::new(Arc::clone(self.config()?), pool);
        service.initialize().await.inspect_err(|e| {
            tracing::error!(error = %e, "Service initialization failed");
        })?;
        self.service = Some(service);
        tracing::info!("Services initialized");
        Ok(())
    }

    /// Runs the main service once.
    pub async fn run(&self) -> AppResult<RunSummary> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| AppError::NotInitialized("services".to_string()))?;

        tracing::info!(status = ?service.status(), "Application starting");
        let summary = service.run().await?;
        tracing::info!("Application run completed");
        Ok(summary)
    }

    /// Cleans up the services. Only the first call has any effect.
    pub async fn shutdown(&mut self) {
        if self.shutdown_requested {
            return;
        }
        self.shutdown_requested = true;
        tracing::info!("Shutting down...");

        if let Some(service) = self.service.as_mut() {
            if let Err(e) = service.cleanup().await {
                tracing::error!(error = %e, "Error during shutdown");
            }
        }
        tracing::info!("Shutdown complete");
    }

    pub const fn is_shut_down(&self) -> bool {
        self.shutdown_requested
    }

    /// Releases process-wide resources.
    pub async fn cleanup(&self) {
        close_db().await;
        tracing::info!("Resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig {
            env: Environment::Test,
            db_url: "mysql://test@localhost/test".to_string(),
            debug: true,
            log_level: "DEBUG".to_string(),
            max_workers: 2,
        }
    }

    #[test]
    fn test_new_application_has_no_config() {
        let app = Application::new();
        assert!(matches!(app.config(), Err(AppError::NotInitialized(_))));
        assert!(app.service().is_none());
    }

    #[tokio::test]
    async fn test_run_before_initialize_fails() {
        let app = Application::with_config(test_config());
        assert!(matches!(app.run().await, Err(AppError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_initialize_without_config_fails() {
        let mut app = Application::new();
        let result = app.initialize_services_with(None).await;
        assert!(matches!(result, Err(AppError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_without_database() {
        let mut app = Application::with_config(test_config());
        tokio_test::assert_ok!(app.initialize_services_with(None).await);
        assert!(app.service().is_some());

        let summary = tokio_test::assert_ok!(app.run().await);
        assert_eq!(summary.tables, None);

        app.shutdown().await;
        assert!(app.is_shut_down());
        app.shutdown().await;
        app.cleanup().await;
    }
}

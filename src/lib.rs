pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod geo;
pub mod images;
pub mod notifications;
pub mod payments;
pub mod query;
pub mod ui;

pub use db::DbPool;

use anyhow::Result;
use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::crypto::TokenService;
use crate::notifications::Mailer;
use crate::payments::PaymentGateway;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub tokens: TokenService,
    pub mailer: Arc<dyn Mailer>,
    pub payments: Arc<dyn PaymentGateway>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DbPool,
        mailer: Arc<dyn Mailer>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Result<Self> {
        let tokens = TokenService::from_config(&config.auth)?;
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Ok(Self {
            config,
            db,
            tokens,
            mailer,
            payments,
            rate_limiter,
        })
    }

    /// Wire up the mailer and payment gateway described by the configuration.
    pub fn from_config(config: Config, db: DbPool) -> Result<Self> {
        let mailer = notifications::mailer_from_config(&config.email);
        let payments = payments::gateway_from_config(&config.payments)?;
        Self::new(config, db, mailer, payments)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::notifications::email::testing::RecordingMailer;
    use crate::payments::testing::FakeGateway;

    /// State over a fresh in-memory database with recording collaborators.
    pub struct TestContext {
        pub state: Arc<AppState>,
        pub mailer: Arc<RecordingMailer>,
        pub payments: Arc<FakeGateway>,
        pub public_dir: tempfile::TempDir,
    }

    pub async fn context() -> TestContext {
        context_with(RecordingMailer::default()).await
    }

    pub async fn context_with(mailer: RecordingMailer) -> TestContext {
        let public_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        config.rate_limit.enabled = false;
        config.server.public_dir = public_dir.path().to_path_buf();
        config.server.public_url = Some("http://natours.test".to_string());

        let mailer = Arc::new(mailer);
        let payments = Arc::new(FakeGateway::default());
        let state = AppState::new(
            config,
            db::test_pool().await,
            mailer.clone(),
            payments.clone(),
        )
        .unwrap();

        TestContext {
            state: Arc::new(state),
            mailer,
            payments,
            public_dir,
        }
    }
}

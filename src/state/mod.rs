use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::config::{AppPaths, ConfigService};
use crate::pipeline::RagPipeline;

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigService,
    pub pipeline: Arc<RagPipeline>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Load settings and build the pipeline.
    ///
    /// Writes a default `config.yml` first when none exists.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        config
            .ensure_config_file()
            .map_err(InitializationError::Config)?;
        let settings = config.load_settings().map_err(InitializationError::Config)?;

        let pipeline = Arc::new(
            RagPipeline::from_settings(settings, paths.as_ref())
                .await
                .map_err(InitializationError::Pipeline)?,
        );

        Ok(Arc::new(Self::from_parts(config, pipeline)))
    }

    pub fn from_parts(config: ConfigService, pipeline: Arc<RagPipeline>) -> Self {
        AppState {
            config,
            pipeline,
            started_at: Utc::now(),
        }
    }
}

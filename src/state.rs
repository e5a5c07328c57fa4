use crate::config::AppConfig;
use crate::storage::{MediaUploader, Storage};
use crate::users::repo::{PgUserStore, UserStore};
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub media: Arc<dyn MediaUploader>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        tracing::info!("migrations applied");

        let media = Arc::new(Storage::new(&config.media).await?) as Arc<dyn MediaUploader>;
        let users = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;

        Ok(Self::from_parts(users, media, config))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        media: Arc<dyn MediaUploader>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            media,
            config,
        }
    }
}

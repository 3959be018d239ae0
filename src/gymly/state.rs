use dotenvy::dotenv;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, DatabaseConnection};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use super::{
    BoxResult,
    config::Config,
    jwt::TokenSecrets,
    push::{DisabledPush, FcmCredentials, FcmSender, PushSender},
    storage::{AwsCredentials, AwsS3Store, DisabledStore, ReceiptStore, S3LikeStore},
};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub tokens: Arc<TokenSecrets>,
    pub push: Arc<dyn PushSender>,
    pub receipts: Arc<dyn ReceiptStore>,
}

impl AppState {
    pub async fn new(config: &Config) -> BoxResult<Self> {
        dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set")?;

        let mut connection_opts = ConnectOptions::new(database_url);

        connection_opts
            .sqlx_logging(true)
            .sqlx_logging_level(tracing::log::LevelFilter::Warn)
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .connect_timeout(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(30));

        let db = sea_orm::Database::connect(connection_opts).await?;

        if config.database.run_migrations {
            Migrator::up(&db, None).await?;
            info!("database migrations applied");
        }

        let tokens = Arc::new(TokenSecrets::new(
            &jwt_secret,
            config.auth.token_lifetime()?,
        ));

        Ok(Self {
            db,
            tokens,
            push: push_sender()?,
            receipts: receipt_store(config)?,
        })
    }

    pub fn from_parts(
        db: DatabaseConnection,
        tokens: TokenSecrets,
        push: Arc<dyn PushSender>,
        receipts: Arc<dyn ReceiptStore>,
    ) -> Self {
        Self {
            db,
            tokens: Arc::new(tokens),
            push,
            receipts,
        }
    }
}

fn push_sender() -> BoxResult<Arc<dyn PushSender>> {
    match FcmCredentials::from_env() {
        Some(credentials) => {
            info!("push enabled for firebase project {}", credentials.project_id);
            Ok(Arc::new(FcmSender::new(credentials)?))
        }
        None => {
            warn!("Firebase credentials not set, push notifications are disabled");
            Ok(Arc::new(DisabledPush))
        }
    }
}

fn receipt_store(config: &Config) -> BoxResult<Arc<dyn ReceiptStore>> {
    if let Some(credentials) = AwsCredentials::from_env() {
        info!(
            "receipts are stored in s3 bucket {} ({})",
            credentials.bucket, credentials.region
        );
        return Ok(Arc::new(AwsS3Store::new(credentials)?));
    }

    let storage = &config.storage;

    match (&storage.endpoint, &storage.bucket) {
        (Some(endpoint), Some(bucket)) => {
            info!("receipts are stored in {endpoint}/{bucket}");
            let store = S3LikeStore::new(endpoint.clone(), bucket.clone())?
                .with_public_base_url(storage.public_base_url.clone())
                .with_bearer_token(std::env::var("STORAGE_TOKEN").ok());
            Ok(Arc::new(store))
        }
        _ => {
            warn!("neither AWS credentials nor a storage endpoint are set, receipt uploads are disabled");
            Ok(Arc::new(DisabledStore))
        }
    }
}

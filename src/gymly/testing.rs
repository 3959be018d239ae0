//! Fixtures shared by the router tests: an in-memory SQLite database with the
//! real migrations applied, fake push and object-store backends, seed helpers
//! and a small request driver.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use migration::{Migrator, MigratorTrait};
use once_cell::sync::Lazy;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, Set,
};
use serde_json::Value;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tower::ServiceExt;

use super::{
    api,
    auth::hash_password,
    database::{
        CheckInStatus, MemberStatus, NotificationType, OrderStatus, UserRole,
        entities::{
            CheckInModel, FcmTokenModel, MemberModel, NotificationModel, OrderModel,
            PackageModel, SubscriptionModel, UserModel, Users,
        },
        check_ins, members, notifications, orders, packages, subscriptions, users,
    },
    error::GymlyResult,
    jwt::{self, TokenSecrets},
    push::{PushMessage, PushReport, PushSender},
    state::AppState,
    storage::ReceiptStore,
};

pub const PASSWORD: &str = "password123";
pub const STORE_BASE_URL: &str = "https://files.gymly.test";
const JWT_SECRET: &str = "test-secret";

/* argon2 is slow in debug builds; hash once per test binary. */
static PASSWORD_HASH: Lazy<String> =
    Lazy::new(|| hash_password(PASSWORD).expect("hashing the fixture password"));

pub async fn database() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // one connection, or every pooled connection gets its own empty database
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

#[derive(Default)]
pub struct RecordingPush {
    stale: Vec<String>,
    sent: Mutex<Vec<(Vec<String>, PushMessage)>>,
}

impl RecordingPush {
    /// Reports `stale` tokens as unregistered whenever they are pushed to.
    pub fn with_stale(stale: &[&str]) -> Self {
        Self {
            stale: stale.iter().map(|token| token.to_string()).collect(),
            sent: Mutex::default(),
        }
    }

    pub fn sent(&self) -> Vec<(Vec<String>, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> PushReport {
        self.sent
            .lock()
            .unwrap()
            .push((tokens.to_vec(), message.clone()));

        let stale_tokens: Vec<String> = tokens
            .iter()
            .filter(|token| self.stale.contains(token))
            .cloned()
            .collect();

        PushReport {
            delivered: tokens.len() - stale_tokens.len(),
            failed: stale_tokens.len(),
            stale_tokens,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    puts: Mutex<Vec<(String, String, usize)>>,
}

impl MemoryStore {
    /// `(key, content type, size)` of every stored object.
    pub fn puts(&self) -> Vec<(String, String, usize)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> GymlyResult<String> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), bytes.len()));
        Ok(format!("{STORE_BASE_URL}/{key}"))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub push: Arc<RecordingPush>,
    pub store: Arc<MemoryStore>,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let push = Arc::new(RecordingPush::default());
        let store = Arc::new(MemoryStore::default());
        let state = AppState::from_parts(
            database().await,
            TokenSecrets::new(JWT_SECRET, Duration::from_secs(3600)),
            push.clone(),
            store.clone(),
        );

        Self {
            router: api::router(state.clone()),
            state,
            push,
            store,
        }
    }

    pub fn token_for(&self, user: &users::Model) -> String {
        let claims = jwt::Claims::new(
            user.id,
            &user.email,
            user.role,
            user.member_id,
            self.state.tokens.lifetime(),
        );
        jwt::generate_token(&claims, &self.state.tokens).unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };

        self.send(request.unwrap()).await
    }

    pub async fn call_multipart(
        &self,
        uri: &str,
        token: Option<&str>,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, Vec<u8>)>,
    ) -> (StatusCode, Value) {
        const BOUNDARY: &str = "gymly-test-boundary";
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }

        if let Some((file_name, content_type, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"receipt\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&bytes);
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );

        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        self.send(builder.body(Body::from(body)).unwrap()).await
    }
}

/// A validity window from `start_days` to `end_days` relative to now.
pub fn window(start_days: i64, end_days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (
        now + ChronoDuration::days(start_days),
        now + ChronoDuration::days(end_days),
    )
}

pub async fn seed_member(db: &DatabaseConnection, name: &str, phone: &str) -> members::Model {
    let now = Utc::now();
    MemberModel {
        name: Set(name.to_string()),
        phone_number: Set(phone.to_string()),
        status: Set(MemberStatus::Approved),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_user(
    db: &DatabaseConnection,
    email: &str,
    role: UserRole,
    member_id: Option<i32>,
) -> users::Model {
    let now = Utc::now();
    UserModel {
        email: Set(email.to_string()),
        password_hash: Set(PASSWORD_HASH.clone()),
        role: Set(role),
        member_id: Set(member_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn delete_user(db: &DatabaseConnection, user_id: i32) {
    Users::delete_by_id(user_id).exec(db).await.unwrap();
}

pub async fn seed_package(
    db: &DatabaseConnection,
    name: &str,
    price: i32,
    duration_days: i32,
    is_active: bool,
) -> packages::Model {
    let now = Utc::now();
    PackageModel {
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        duration_days: Set(duration_days),
        is_active: Set(is_active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_subscription(
    db: &DatabaseConnection,
    member_id: i32,
    order_status: OrderStatus,
    span: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> (orders::Model, subscriptions::Model) {
    let now = Utc::now();
    let order = OrderModel {
        member_id: Set(member_id),
        package_name: Set("Monthly".to_string()),
        package_price: Set(10_000),
        package_duration_days: Set(30),
        paid_amount: Set(10_000),
        receipt_url: Set(None),
        order_status: Set(order_status),
        rejection_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();

    let subscription = SubscriptionModel {
        member_id: Set(member_id),
        order_id: Set(order.id),
        start_date: Set(span.map(|(start, _)| start)),
        end_date: Set(span.map(|(_, end)| end)),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();

    (order, subscription)
}

pub async fn seed_check_in(
    db: &DatabaseConnection,
    member_id: i32,
    status: CheckInStatus,
) -> check_ins::Model {
    CheckInModel {
        member_id: Set(member_id),
        status: Set(status),
        reason: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_notification(
    db: &DatabaseConnection,
    user_id: i32,
    kind: NotificationType,
    title: &str,
) -> notifications::Model {
    NotificationModel {
        user_id: Set(user_id),
        kind: Set(kind),
        title: Set(title.to_string()),
        body: Set(format!("{title} body")),
        data: Set(None),
        is_read: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_token(db: &DatabaseConnection, user_id: i32, token: &str) {
    let now = Utc::now();
    FcmTokenModel {
        user_id: Set(user_id),
        token: Set(token.to_string()),
        device_id: Set(None),
        platform: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
}

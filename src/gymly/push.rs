//! Push delivery to user devices.
//!
//! Delivery is best effort: nothing here returns an error to the API layer.
//! Failures are logged and counted in the [`PushReport`], and tokens the
//! provider reports as unregistered are handed back so the caller can prune
//! them.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::BoxResult;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FCM_SEND_URL: &str = "https://fcm.googleapis.com/v1/projects";

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
    pub stale_tokens: Vec<String>,
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> PushReport;

    fn is_enabled(&self) -> bool {
        true
    }
}

/* Used when Firebase credentials are not configured. */
pub struct DisabledPush;

#[async_trait]
impl PushSender for DisabledPush {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> PushReport {
        warn!(
            "Push is disabled, skipping \"{}\" for {} device(s)",
            message.title,
            tokens.len()
        );
        PushReport::default()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct FcmCredentials {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

impl FcmCredentials {
    /// Reads `FIREBASE_PROJECT_ID`, `FIREBASE_CLIENT_EMAIL` and
    /// `FIREBASE_PRIVATE_KEY`. Returns `None` if any of them is missing.
    pub fn from_env() -> Option<Self> {
        let project_id = std::env::var("FIREBASE_PROJECT_ID").ok()?;
        let client_email = std::env::var("FIREBASE_CLIENT_EMAIL").ok()?;
        let private_key = std::env::var("FIREBASE_PRIVATE_KEY").ok()?;

        Some(Self {
            project_id,
            client_email,
            // keys pasted into .env files usually carry literal \n sequences
            private_key: private_key.replace("\\n", "\n"),
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

pub struct FcmSender {
    credentials: FcmCredentials,
    signing_key: EncodingKey,
    client: Client,
    access_token: Mutex<Option<CachedToken>>,
}

enum Delivery {
    Sent,
    Unregistered,
    Failed,
}

impl FcmSender {
    pub fn new(credentials: FcmCredentials) -> BoxResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())?;
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            credentials,
            signing_key,
            client,
            access_token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> BoxResult<String> {
        let mut cached = self.access_token.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.token.clone());
            }
        }

        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.credentials.client_email,
            scope: FCM_SCOPE,
            aud: GOOGLE_TOKEN_URL,
            iat,
            exp: iat + 3600,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)?;

        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<AccessTokenResponse>()
            .await?;

        // refresh a minute early so in-flight sends never carry an expired token
        let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }

    async fn send_one(&self, access_token: &str, token: &str, message: &PushMessage) -> Delivery {
        let url = format!(
            "{FCM_SEND_URL}/{}/messages:send",
            self.credentials.project_id
        );

        let payload = json!({
            "message": {
                "token": token,
                "notification": { "title": message.title, "body": message.body },
                "data": message.data,
                "webpush": {
                    "notification": { "icon": "/icon.png", "badge": "/badge.png" },
                    "fcm_options": { "link": "/" }
                },
                "android": {
                    "notification": { "icon": "ic_notification", "color": "#4F46E5" }
                }
            }
        });

        match self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Delivery::Sent,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => Delivery::Unregistered,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if body.contains("UNREGISTERED") {
                    return Delivery::Unregistered;
                }
                warn!("FCM rejected a message [{status}]: {body}");
                Delivery::Failed
            }
            Err(e) => {
                warn!("FCM request failed: {e}");
                Delivery::Failed
            }
        }
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> PushReport {
        let mut report = PushReport::default();

        if tokens.is_empty() {
            return report;
        }

        let access_token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                error!("Failed to obtain an FCM access token: {e}");
                report.failed = tokens.len();
                return report;
            }
        };

        for token in tokens {
            match self.send_one(&access_token, token, message).await {
                Delivery::Sent => report.delivered += 1,
                Delivery::Unregistered => {
                    report.failed += 1;
                    report.stale_tokens.push(token.clone());
                }
                Delivery::Failed => report.failed += 1,
            }
        }

        info!(
            "Push \"{}\" sent: {} delivered, {} failed",
            message.title, report.delivered, report.failed
        );

        report
    }
}

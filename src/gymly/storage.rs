use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::{
    BoxResult,
    error::{GymlyError, GymlyResult},
};

pub const MAX_RECEIPT_BYTES: usize = 5 * 1024 * 1024;
pub const RECEIPT_FOLDER: &str = "receipts";

/// An uploaded receipt image, before it is stored.
#[derive(Debug, Clone)]
pub struct ReceiptUpload {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ReceiptUpload {
    pub fn validate(&self) -> GymlyResult<()> {
        if self.bytes.is_empty() {
            return Err(GymlyError::bad_request("Receipt file is empty"));
        }

        if self.bytes.len() > MAX_RECEIPT_BYTES {
            return Err(GymlyError::bad_request("Receipt must be at most 5MB"));
        }

        if extension_for(&self.content_type).is_none() {
            return Err(GymlyError::bad_request(
                "Receipt must be a JPEG, PNG or WebP image",
            ));
        }

        Ok(())
    }

    /// `receipts/<uuid>.<ext>`, preferring the uploaded file's own extension.
    pub fn object_key(&self, folder: &str) -> String {
        let extension = self
            .file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .or_else(|| extension_for(&self.content_type).map(str::to_string))
            .unwrap_or_else(|| "bin".to_string());

        format!("{folder}/{}.{extension}", Uuid::new_v4())
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Stores the object and returns the URL it is publicly reachable at.
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> GymlyResult<String>;
}

pub struct DisabledStore;

#[async_trait]
impl ReceiptStore for DisabledStore {
    async fn put(&self, _key: &str, _content_type: &str, _bytes: Vec<u8>) -> GymlyResult<String> {
        Err(GymlyError::ServiceUnavailable(
            "Receipt uploads are not configured".to_string(),
        ))
    }
}

pub struct S3LikeStore {
    pub endpoint: String,
    pub bucket: String,
    pub public_base_url: Option<String>,
    pub bearer_token: Option<String>,
    client: Client,
}

impl S3LikeStore {
    pub fn new(endpoint: String, bucket: String) -> BoxResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            public_base_url: None,
            bearer_token: None,
            client,
        })
    }

    #[must_use]
    pub fn with_public_base_url(mut self, url: Option<String>) -> Self {
        self.public_base_url = url
            .map(|x| x.trim_end_matches('/').to_string())
            .filter(|x| !x.is_empty());
        self
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{}", key.trim_start_matches('/')),
            None => self.object_url(key),
        }
    }
}

#[async_trait]
impl ReceiptStore for S3LikeStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> GymlyResult<String> {
        let size = bytes.len();
        let mut request = self
            .client
            .put(self.object_url(key))
            .header(CONTENT_TYPE, content_type)
            .body(bytes);

        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!("Object store upload failed: {e}");
            GymlyError::internal("Failed to upload file")
        })?;

        if !response.status().is_success() {
            error!("Object store put failed: {}", response.status());
            return Err(GymlyError::internal("Failed to upload file"));
        }

        info!("Uploaded {key} ({size} bytes)");
        Ok(self.public_url(key))
    }
}

/// Credentials for AWS S3, read from `AWS_REGION`, `AWS_S3_BUCKET`,
/// `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
#[derive(Clone)]
pub struct AwsCredentials {
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AwsCredentials {
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.trim().is_empty());

        Some(Self {
            region: var("AWS_REGION")?,
            bucket: var("AWS_S3_BUCKET")?,
            access_key_id: var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: var("AWS_SECRET_ACCESS_KEY")?,
        })
    }
}

/// Headers that authenticate a single S3 request.
#[derive(Debug, PartialEq, Eq)]
pub struct SignedRequest {
    pub amz_date: String,
    pub content_sha256: String,
    pub authorization: String,
}

/// Writes receipts to an AWS S3 bucket with SigV4-signed PUTs. Objects are
/// addressed virtual-host style and served from the same URL.
pub struct AwsS3Store {
    credentials: AwsCredentials,
    client: Client,
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &str) -> GymlyResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| GymlyError::internal(format!("invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/* Percent-encodes everything but unreserved characters, keeping '/' between
 * path segments.
 */
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| {
            segment
                .bytes()
                .map(|b| match b {
                    b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                        (b as char).to_string()
                    }
                    _ => format!("%{b:02X}"),
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> GymlyResult<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

impl AwsS3Store {
    pub fn new(credentials: AwsCredentials) -> BoxResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            credentials,
            client,
        })
    }

    fn host(&self) -> String {
        format!(
            "{}.s3.{}.amazonaws.com",
            self.credentials.bucket, self.credentials.region
        )
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "https://{}/{}",
            self.host(),
            encode_key(key.trim_start_matches('/'))
        )
    }

    pub fn sign_put(
        &self,
        key: &str,
        content_type: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> GymlyResult<SignedRequest> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let content_sha256 = sha256_hex(body);
        let region = &self.credentials.region;

        let signed_headers = "content-type;host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "PUT\n/{}\n\ncontent-type:{}\nhost:{}\nx-amz-content-sha256:{content_sha256}\nx-amz-date:{amz_date}\n\n{signed_headers}\n{content_sha256}",
            encode_key(key.trim_start_matches('/')),
            content_type.trim(),
            self.host(),
        );

        let scope = format!("{date}/{region}/s3/aws4_request");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let key = signing_key(&self.credentials.secret_access_key, &date, region, "s3")?;
        let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);

        Ok(SignedRequest {
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
            amz_date,
            content_sha256,
        })
    }
}

#[async_trait]
impl ReceiptStore for AwsS3Store {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> GymlyResult<String> {
        let size = bytes.len();
        let signed = self.sign_put(key, content_type, &bytes, Utc::now())?;
        let url = self.object_url(key);

        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, content_type.trim())
            .header(AUTHORIZATION, signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                error!("S3 upload of {key} failed: {e}");
                GymlyError::internal("Failed to upload file")
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("S3 put of {key} failed: {status} {body}");
            return Err(GymlyError::internal("Failed to upload file"));
        }

        info!("Uploaded {key} to s3 ({size} bytes)");
        Ok(url)
    }
}

// src/utils/gds.rs: managed-volume (GDS) folder and credential API

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;

use crate::utils::credentials::{FolderRecord, FolderService, TemporaryCredential};

#[derive(Debug, Deserialize)]
struct FolderList {
    #[serde(default)]
    items: Vec<FolderItem>,
}

#[derive(Debug, Deserialize)]
struct FolderItem {
    id: String,
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderAccess {
    object_store_access: Option<ObjectStoreAccess>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectStoreAccess {
    aws_s3_temporary_upload_credentials: Option<AwsS3Credentials>,
}

#[derive(Debug, Deserialize)]
struct AwsS3Credentials {
    #[serde(rename = "access_Key_Id")]
    access_key_id: String,
    #[serde(rename = "secret_Access_Key")]
    secret_access_key: String,
    #[serde(rename = "session_Token")]
    session_token: String,
    region: String,
    #[serde(rename = "bucketName")]
    bucket_name: String,
    #[serde(rename = "keyPrefix")]
    key_prefix: String,
    #[serde(rename = "expirationDate")]
    expiration_date: DateTime<Utc>,
}

impl From<AwsS3Credentials> for TemporaryCredential {
    fn from(c: AwsS3Credentials) -> Self {
        TemporaryCredential {
            access_key: c.access_key_id,
            secret_key: c.secret_access_key,
            session_token: c.session_token,
            region: c.region,
            container: c.bucket_name,
            key_prefix: c.key_prefix,
            expiry: c.expiration_date,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}


/// Reads the `exp` claim of a JWT access token.
pub fn token_expiry(token: &str) -> Result<DateTime<Utc>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(anyhow!("Access token is not a JWT: expected 3 parts, got {}", parts.len()));
    }
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .context("Access token payload is not base64url")?;
    let claims: JwtClaims = serde_json::from_slice(&payload).context("Access token payload has no 'exp' claim")?;
    DateTime::from_timestamp(claims.exp, 0).ok_or_else(|| anyhow!("Access token expiry {} out of range", claims.exp))
}


pub struct GdsClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    token_expiry: DateTime<Utc>,
}

impl GdsClient {
    pub fn new(base_url: &str, token: &str, margin: Duration) -> Result<Self> {
        let token_expiry = token_expiry(token)?;
        let remaining = token_expiry - Utc::now();
        if remaining <= chrono::Duration::zero() {
            return Err(anyhow!("ICA access token expired at {}", token_expiry));
        }
        if remaining.to_std().map(|r| r <= margin).unwrap_or(true) {
            warn!("ICA access token expires soon ({}); long transfers may fail", token_expiry);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(GdsClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            token_expiry,
        })
    }

    fn check_token(&self) -> Result<()> {
        if Utc::now() >= self.token_expiry {
            return Err(anyhow!("ICA access token expired at {}", self.token_expiry));
        }
        Ok(())
    }
}

#[async_trait]
impl FolderService for GdsClient {
    async fn find_folder(&self, volume: &str, path: &str) -> Result<Option<FolderRecord>> {
        self.check_token()?;
        let url = format!("{}/v1/folders", self.base_url);
        debug!("GET {} volume.name={} path={}", url, volume, path);
        let list: FolderList = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("volume.name", volume), ("path", path)])
            .send()
            .await
            .with_context(|| format!("Folder lookup failed for gds://{}{}", volume, path))?
            .error_for_status()?
            .json()
            .await
            .context("Malformed folder list response")?;

        Ok(list
            .items
            .into_iter()
            .find(|item| item.path == path)
            .map(|item| FolderRecord { id: item.id, path: item.path }))
    }

    async fn issue_credentials(&self, volume: &str, folder: &FolderRecord) -> Result<TemporaryCredential> {
        self.check_token()?;
        let url = format!("{}/v1/folders/{}", self.base_url, folder.id);
        debug!("PATCH {} include=objectStoreAccess", url);
        let access: FolderAccess = self
            .http
            .patch(&url)
            .bearer_auth(&self.token)
            .query(&[("include", "objectStoreAccess")])
            .json(&serde_json::json!({}))
            .send()
            .await
            .with_context(|| format!("Credential request failed for gds://{}{}", volume, folder.path))?
            .error_for_status()?
            .json()
            .await
            .context("Malformed folder credential response")?;

        access
            .object_store_access
            .and_then(|a| a.aws_s3_temporary_upload_credentials)
            .map(TemporaryCredential::from)
            .ok_or_else(|| anyhow!("No object store credentials issued for gds://{}{}", volume, folder.path))
    }
}

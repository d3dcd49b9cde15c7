use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::error::AppError;

/// Connection details for the object-storage bucket. Passed in explicitly at
/// construction so nothing reaches for ambient credentials.
#[derive(Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload bytes to `path` inside the bucket, returning the public URL.
    /// A PUT to an existing path overwrites the object.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, AppError>;

    /// Object names under `prefix`, as reported by the bucket's list endpoint.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError>;

    /// Public download URL for an object name.
    fn public_url(&self, name: &str) -> String;
}

pub struct SupabaseStorage {
    client: Client,
    config: StorageConfig,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
}

impl SupabaseStorage {
    pub fn new(config: StorageConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url, self.config.bucket, path
        )
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        let response = self
            .client
            .put(self.object_url(path))
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 200 || status.as_u16() == 201 {
            info!("uploaded {} ({})", path, content_type);
            Ok(self.public_url(path))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AppError::Upload {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let url = format!(
            "{}/storage/v1/object/list/{}?prefix={}",
            self.config.base_url, self.config.bucket, prefix
        );

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upload {
                status: status.as_u16(),
                body,
            });
        }

        let objects: Vec<ListedObject> = response.json().await?;
        Ok(objects.into_iter().map(|o| o.name).collect())
    }

    fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, self.config.bucket, name
        )
    }
}

static SANITIZE_RE: OnceLock<Regex> = OnceLock::new();

/// Restrict a path component to `[A-Za-z0-9_-]`, replacing everything else
/// with `_`. Leading/trailing whitespace is trimmed first.
pub fn sanitize_component(raw: &str) -> String {
    let re = SANITIZE_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid regex"));
    re.replace_all(raw.trim(), "_").into_owned()
}

/// Deterministic bucket path for a student's certificate in one subject.
pub fn certificate_path(student_name: &str, subject: &str) -> String {
    format!(
        "certificates/{}/{}.pdf",
        sanitize_component(student_name),
        sanitize_component(subject)
    )
}

/// Deterministic bucket path for a template's preview image.
pub fn preview_path(template_name: &str) -> String {
    format!("previews/{}.png", sanitize_component(template_name))
}

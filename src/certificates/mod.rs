//! Certificate pipeline: template lookup, markup render, PDF/PNG render,
//! upload to object storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tera::{Context, Tera};
use tracing::{info, warn};

use crate::db::{self, CertificateTemplate, User};
use crate::error::AppError;
use crate::render;
use crate::state::AppState;
use crate::storage::{certificate_path, preview_path, ObjectStore};
use crate::templates::get_tera;

const PREVIEW_DPI: f32 = 300.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub user_id: i64,
    pub subject: String,
    pub percentage: f64,
    pub template_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub user_id: i64,
    pub subject: String,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// Outcome of one batch run. Items are processed strictly sequentially; the
/// first failure aborts the rest, but everything attempted is listed so
/// callers can tell completed work from aborted work.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<BatchItemResult>,
    pub aborted: bool,
    /// The error that aborted the batch, kept so the handler can pick a
    /// response status without re-parsing the item message.
    #[serde(skip)]
    pub abort_error: Option<AppError>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.url.is_some()).count()
    }
}

/// Row lookups the pipeline needs. Implemented for `PgPool`; batch tests
/// substitute an in-memory source.
#[async_trait]
pub trait CertificateLookup: Send + Sync {
    async fn user(&self, id: i64) -> Result<Option<User>, AppError>;
    async fn template(&self, id: i64) -> Result<Option<CertificateTemplate>, AppError>;
}

#[async_trait]
impl CertificateLookup for PgPool {
    async fn user(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(db::find_user(self, id).await?)
    }

    async fn template(&self, id: i64) -> Result<Option<CertificateTemplate>, AppError> {
        Ok(db::find_template(self, id).await?)
    }
}

fn tera_key(template: &CertificateTemplate) -> String {
    format!("{}.typ", template.name)
}

fn certificate_context(user: &User, subject: &str, percentage: f64) -> Context {
    let mut ctx = Context::new();
    ctx.insert("name", &user.name);
    ctx.insert("email", &user.email);
    ctx.insert("phone", user.phone.as_deref().unwrap_or(""));
    ctx.insert("percentage", &format!("{}%", percentage));
    ctx.insert("subject", subject);
    ctx.insert("date", &chrono::Utc::now().format("%d %B %Y").to_string());
    ctx
}

fn sample_context() -> Context {
    let mut ctx = Context::new();
    ctx.insert("name", "John Doe");
    ctx.insert("email", "john@example.com");
    ctx.insert("phone", "1234567890");
    ctx.insert("percentage", "95%");
    ctx.insert("subject", "Mathematics");
    ctx.insert("date", &chrono::Utc::now().format("%d %B %Y").to_string());
    ctx
}

/// Bind user data into the template and render the certificate PDF.
pub fn render_certificate(
    tera: &Tera,
    template: &CertificateTemplate,
    user: &User,
    subject: &str,
    percentage: f64,
) -> Result<Vec<u8>, AppError> {
    let ctx = certificate_context(user, subject, percentage);
    let markup = tera.render(&tera_key(template), &ctx)?;
    Ok(render::markup_to_pdf(&markup)?)
}

/// One PUT to the deterministic `certificates/{student}/{subject}.pdf` path.
pub async fn upload_certificate(
    store: &dyn ObjectStore,
    pdf: Vec<u8>,
    subject: &str,
    student_name: &str,
) -> Result<String, AppError> {
    let path = certificate_path(student_name, subject);
    store.put(&path, pdf, "application/pdf").await
}

async fn process_one(
    lookup: &dyn CertificateLookup,
    store: &dyn ObjectStore,
    tera: &Tera,
    request: &CertificateRequest,
) -> Result<String, AppError> {
    let user = lookup
        .user(request.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user not found: {}", request.user_id)))?;

    let template = lookup.template(request.template_id).await?.ok_or_else(|| {
        AppError::NotFound(format!("template not found: {}", request.template_id))
    })?;

    let pdf = render_certificate(tera, &template, &user, &request.subject, request.percentage)?;
    upload_certificate(store, pdf, &request.subject, &user.name).await
}

/// Process requests one by one, stopping at the first failure. Already
/// uploaded certificates are not rolled back.
pub async fn process_batch(
    lookup: &dyn CertificateLookup,
    store: &dyn ObjectStore,
    tera: &Tera,
    requests: &[CertificateRequest],
) -> BatchReport {
    let mut results = Vec::with_capacity(requests.len());

    for request in requests {
        match process_one(lookup, store, tera, request).await {
            Ok(url) => results.push(BatchItemResult {
                user_id: request.user_id,
                subject: request.subject.clone(),
                url: Some(url),
                error: None,
            }),
            Err(e) => {
                warn!(
                    "certificate for user {} aborted the batch: {}",
                    request.user_id, e
                );
                results.push(BatchItemResult {
                    user_id: request.user_id,
                    subject: request.subject.clone(),
                    url: None,
                    error: Some(e.to_string()),
                });
                return BatchReport {
                    results,
                    aborted: true,
                    abort_error: Some(e),
                };
            }
        }
    }

    BatchReport {
        results,
        aborted: false,
        abort_error: None,
    }
}

/// Render the template with fixed sample data, rasterize page 0 at 300 DPI,
/// and upload the PNG to `previews/{name}.png`.
async fn render_and_upload_preview(
    store: &dyn ObjectStore,
    tera: &Tera,
    template: &CertificateTemplate,
) -> Result<String, AppError> {
    let markup = tera.render(&tera_key(template), &sample_context())?;
    let png = render::markup_page_to_png(&markup, 0, PREVIEW_DPI)?;
    store.put(&preview_path(&template.name), png, "image/png").await
}

/// Explicitly regenerate a template's preview and persist the URL.
pub async fn generate_preview(
    pool: &PgPool,
    store: &dyn ObjectStore,
    template_id: i64,
) -> Result<String, AppError> {
    let template = db::find_template(pool, template_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("template not found: {}", template_id)))?;

    let url = render_and_upload_preview(store, get_tera(), &template).await?;
    db::set_preview_url(pool, template.id, &url).await?;

    info!("preview regenerated for template {}: {}", template.name, url);
    Ok(url)
}

/// Startup backfill: generate previews only for templates that have none.
/// The persisted URL is written with an IS NULL guard, so a URL set in the
/// meantime is never overwritten.
pub async fn backfill_previews(state: AppState) {
    let missing = match db::templates_missing_preview(state.pool.as_ref()).await {
        Ok(templates) => templates,
        Err(e) => {
            warn!("preview backfill skipped: {}", e);
            return;
        }
    };

    for template in missing {
        match render_and_upload_preview(state.store.as_ref(), get_tera(), &template).await {
            Ok(url) => {
                match db::fill_preview_url(state.pool.as_ref(), template.id, &url).await {
                    Ok(true) => info!("preview backfilled for template {}", template.name),
                    Ok(false) => {}
                    Err(e) => warn!("preview URL write failed for {}: {}", template.name, e),
                }
            }
            Err(e) => warn!("preview backfill failed for {}: {}", template.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct MockStore {
        puts: Mutex<Vec<(String, String)>>,
        fail_on: Option<String>,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                puts: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(path: &str) -> Self {
            Self {
                puts: Mutex::new(Vec::new()),
                fail_on: Some(path.to_string()),
            }
        }

        fn recorded(&self) -> Vec<(String, String)> {
            self.puts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        async fn put(
            &self,
            path: &str,
            _bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<String, AppError> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(AppError::Upload {
                    status: 503,
                    body: "bucket unavailable".to_string(),
                });
            }
            self.puts
                .lock()
                .unwrap()
                .push((path.to_string(), content_type.to_string()));
            Ok(self.public_url(path))
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<String>, AppError> {
            Ok(Vec::new())
        }

        fn public_url(&self, name: &str) -> String {
            format!("https://bucket.test/public/{}", name)
        }
    }

    struct InMemoryLookup {
        users: Vec<User>,
        templates: Vec<CertificateTemplate>,
    }

    #[async_trait]
    impl CertificateLookup for InMemoryLookup {
        async fn user(&self, id: i64) -> Result<Option<User>, AppError> {
            Ok(self.users.iter().find(|u| u.id == id).cloned())
        }

        async fn template(&self, id: i64) -> Result<Option<CertificateTemplate>, AppError> {
            Ok(self.templates.iter().find(|t| t.id == id).cloned())
        }
    }

    fn test_user_with_id(id: i64, name: &str) -> User {
        User {
            id,
            user_id: Some(format!("user{}", id)),
            name: name.to_string(),
            email: "student@example.com".to_string(),
            phone: Some("1234567890".to_string()),
            school: None,
            class_name: None,
            password: String::new(),
            created_at: Utc::now(),
        }
    }

    fn test_user(name: &str) -> User {
        test_user_with_id(1, name)
    }

    fn test_template(name: &str) -> CertificateTemplate {
        CertificateTemplate {
            id: 1,
            name: name.to_string(),
            description: None,
            file_path: format!("templates/{}.typ", name),
            preview_url: None,
        }
    }

    fn test_tera(name: &str) -> Tera {
        let mut tera = Tera::default();
        tera.add_raw_template(
            &format!("{}.typ", name),
            "= Certificate\n\n{{ name }} scored {{ percentage }} in {{ subject }} on {{ date }}.",
        )
        .unwrap();
        tera
    }

    #[test]
    fn renders_certificate_pdf_from_template() {
        let tera = test_tera("classic");
        let pdf = render_certificate(
            &tera,
            &test_template("classic"),
            &test_user("Alice Smith"),
            "Mathematics",
            92.5,
        )
        .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[test]
    fn render_fails_for_unknown_template() {
        let tera = test_tera("classic");
        let result = render_certificate(
            &tera,
            &test_template("missing"),
            &test_user("Alice"),
            "Maths",
            80.0,
        );
        assert!(matches!(result, Err(AppError::Template(_))));
    }

    #[tokio::test]
    async fn upload_uses_deterministic_sanitized_path() {
        let store = MockStore::new();
        let url = upload_certificate(&store, b"%PDF".to_vec(), "Computer Science", "Alice Smith")
            .await
            .unwrap();

        assert_eq!(
            url,
            "https://bucket.test/public/certificates/Alice_Smith/Computer_Science.pdf"
        );
        assert_eq!(
            store.recorded(),
            vec![(
                "certificates/Alice_Smith/Computer_Science.pdf".to_string(),
                "application/pdf".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn reupload_targets_the_same_path() {
        let store = MockStore::new();
        let first = upload_certificate(&store, b"%PDF-1".to_vec(), "Maths", "Bob")
            .await
            .unwrap();
        let second = upload_certificate(&store, b"%PDF-2".to_vec(), "Maths", "Bob")
            .await
            .unwrap();

        // Same deterministic path, so the second PUT overwrites the first.
        assert_eq!(first, second);
        let recorded = store.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].0, recorded[1].0);
    }

    #[tokio::test]
    async fn upload_failure_carries_response_body() {
        let store = MockStore::failing_on("certificates/Bob/Maths.pdf");
        let err = upload_certificate(&store, b"%PDF".to_vec(), "Maths", "Bob")
            .await
            .unwrap_err();

        match err {
            AppError::Upload { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "bucket unavailable");
            }
            other => panic!("expected upload error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn preview_upload_lands_under_previews_prefix() {
        let store = MockStore::new();
        let tera = test_tera("classic");
        let url = render_and_upload_preview(&store, &tera, &test_template("classic"))
            .await
            .unwrap();

        assert_eq!(url, "https://bucket.test/public/previews/classic.png");
        assert_eq!(
            store.recorded(),
            vec![("previews/classic.png".to_string(), "image/png".to_string())]
        );
    }

    #[tokio::test]
    async fn distinct_requests_map_to_distinct_paths() {
        let store = MockStore::new();
        for (student, subject) in [("Alice", "Maths"), ("Alice", "Physics"), ("Bob", "Maths")] {
            upload_certificate(&store, b"%PDF".to_vec(), subject, student)
                .await
                .unwrap();
        }

        let recorded = store.recorded();
        assert_eq!(recorded.len(), 3);
        let mut paths: Vec<String> = recorded.into_iter().map(|(p, _)| p).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
    }

    fn batch_request(user_id: i64, subject: &str) -> CertificateRequest {
        CertificateRequest {
            user_id,
            subject: subject.to_string(),
            percentage: 88.0,
            template_id: 1,
        }
    }

    #[tokio::test]
    async fn batch_uploads_every_valid_request() {
        let lookup = InMemoryLookup {
            users: vec![
                test_user_with_id(1, "Alice"),
                test_user_with_id(2, "Bob"),
                test_user_with_id(3, "Carol"),
            ],
            templates: vec![test_template("classic")],
        };
        let store = MockStore::new();
        let tera = test_tera("classic");
        let requests = vec![
            batch_request(1, "Maths"),
            batch_request(2, "Maths"),
            batch_request(3, "Physics"),
        ];

        let report = process_batch(&lookup, &store, &tera, &requests).await;

        assert!(!report.aborted);
        assert!(report.abort_error.is_none());
        assert_eq!(report.completed(), 3);

        let mut paths: Vec<String> = store.recorded().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths.len(), 3);
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
    }

    #[tokio::test]
    async fn batch_aborts_at_first_missing_user() {
        let lookup = InMemoryLookup {
            users: vec![test_user_with_id(1, "Alice"), test_user_with_id(3, "Carol")],
            templates: vec![test_template("classic")],
        };
        let store = MockStore::new();
        let tera = test_tera("classic");
        // Second request targets a user that does not exist.
        let requests = vec![
            batch_request(1, "Maths"),
            batch_request(99, "Maths"),
            batch_request(3, "Maths"),
        ];

        let report = process_batch(&lookup, &store, &tera, &requests).await;

        // One upload happened before the failure, the third request was
        // never attempted.
        assert_eq!(store.recorded().len(), 1);
        assert!(report.aborted);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.completed(), 1);
        assert!(report.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("user not found"));
        assert!(matches!(report.abort_error, Some(AppError::NotFound(_))));
    }
}

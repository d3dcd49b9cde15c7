use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::ApiResponse;
use crate::certificates::{self, BatchReport, CertificateRequest};
use crate::db::{self, CertificateTemplate};
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::sanitize_component;
use crate::templates::get_tera;

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub response: ApiResponse,
    #[serde(flatten)]
    pub report: BatchReport,
}

/// A batch aborted by a missing user or template is a caller mistake; any
/// other abort is an internal failure.
fn batch_status(report: &BatchReport) -> StatusCode {
    match report.abort_error {
        None => StatusCode::OK,
        Some(AppError::NotFound(_)) => StatusCode::BAD_REQUEST,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn generate_certificates(
    State(state): State<Arc<AppState>>,
    Json(requests): Json<Vec<CertificateRequest>>,
) -> Result<impl IntoResponse, AppError> {
    if requests.is_empty() {
        return Err(AppError::Validation("request body is empty".to_string()));
    }

    let report = certificates::process_batch(
        state.pool.as_ref(),
        state.store.as_ref(),
        get_tera(),
        &requests,
    )
    .await;

    let status = batch_status(&report);
    let response = if report.aborted {
        let message = report
            .results
            .iter()
            .find_map(|r| r.error.clone())
            .unwrap_or_else(|| "batch aborted".to_string());
        ApiResponse::error(message)
    } else {
        ApiResponse::success(format!(
            "Generated and uploaded {} certificates",
            report.completed()
        ))
    };

    Ok((status, Json(GenerateResponse { response, report })))
}

pub async fn all_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CertificateTemplate>>, AppError> {
    let templates = db::list_templates(state.pool.as_ref()).await?;
    Ok(Json(templates))
}

pub async fn generate_preview(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<i64>,
) -> Result<Json<ApiResponse>, AppError> {
    let url =
        certificates::generate_preview(state.pool.as_ref(), state.store.as_ref(), template_id)
            .await?;
    Ok(Json(ApiResponse::success(format!(
        "Preview generated and uploaded: {}",
        url
    ))))
}

pub async fn certificates_by_student(
    State(state): State<Arc<AppState>>,
    Path(student): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let prefix = format!("certificates/{}/", sanitize_component(&student));
    let names = state.store.list(&prefix).await?;
    let urls = names
        .iter()
        .map(|name| state.store.public_url(name))
        .collect();
    Ok(Json(urls))
}

pub async fn certificates_by_subject(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let suffix = format!("/{}.pdf", sanitize_component(&subject));
    let names = state.store.list("certificates/").await?;
    let urls = names
        .iter()
        .filter(|name| name.ends_with(&suffix))
        .map(|name| state.store.public_url(name))
        .collect();
    Ok(Json(urls))
}

pub async fn all_certificates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    let names = state.store.list("certificates/").await?;
    let urls = names
        .iter()
        .filter(|name| name.ends_with(".pdf"))
        .map(|name| state.store.public_url(name))
        .collect();
    Ok(Json(urls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(abort_error: Option<AppError>) -> BatchReport {
        BatchReport {
            results: Vec::new(),
            aborted: abort_error.is_some(),
            abort_error,
        }
    }

    #[test]
    fn clean_batch_maps_to_ok() {
        assert_eq!(batch_status(&report(None)), StatusCode::OK);
    }

    #[test]
    fn missing_row_abort_maps_to_bad_request() {
        let r = report(Some(AppError::NotFound("user not found: 99".to_string())));
        assert_eq!(batch_status(&r), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upload_abort_maps_to_internal_error() {
        let r = report(Some(AppError::Upload {
            status: 503,
            body: "bucket unavailable".to_string(),
        }));
        assert_eq!(batch_status(&r), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

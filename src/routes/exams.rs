use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{self, Exam, NewExam};
use crate::eligibility::{self, EligibilityReport};
use crate::error::AppError;
use crate::state::AppState;

pub async fn list_exams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Exam>>, AppError> {
    let exams = db::list_exams(state.pool.as_ref()).await?;
    Ok(Json(exams))
}

pub async fn create_exam(
    State(state): State<Arc<AppState>>,
    Json(exam): Json<NewExam>,
) -> Result<(StatusCode, Json<Exam>), AppError> {
    if exam.title.trim().is_empty() {
        return Err(AppError::Validation("exam title is required".to_string()));
    }
    let created = db::insert_exam(state.pool.as_ref(), &exam).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_exam(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(exam): Json<NewExam>,
) -> Result<Json<Exam>, AppError> {
    db::update_exam(state.pool.as_ref(), id, &exam)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("exam not found: {}", id)))
}

pub async fn delete_exam(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if db::delete_exam(state.pool.as_ref(), id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(AppError::NotFound(format!("exam not found: {}", id)))
    }
}

/// CSV roster upload for one exam: returns per-student eligibility against
/// the fixed threshold, plus the count of rows that failed to parse.
pub async fn upload_roster(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<EligibilityReport>, AppError> {
    db::find_exam(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("exam not found: {}", id)))?;

    let mut csv_data: Option<Vec<u8>> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            if let Ok(bytes) = field.bytes().await {
                csv_data = Some(bytes.to_vec());
            }
        }
    }

    let csv_data = match csv_data {
        Some(data) if !data.is_empty() => data,
        _ => return Err(AppError::Validation("uploaded file is empty".to_string())),
    };

    Ok(Json(eligibility::parse_roster(&csv_data)))
}

const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png"];

/// Raw image upload to the bucket under a unique flat key.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut image: Option<(String, String, Vec<u8>)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or("image").to_string();
            let content_type = field
                .content_type()
                .map(String::from)
                .unwrap_or_else(|| {
                    mime_guess::from_path(&filename)
                        .first_or_octet_stream()
                        .to_string()
                });
            if let Ok(bytes) = field.bytes().await {
                image = Some((filename, content_type, bytes.to_vec()));
            }
        }
    }

    let (filename, content_type, bytes) = image
        .ok_or_else(|| AppError::Validation("no image field in request".to_string()))?;

    if !ALLOWED_IMAGE_TYPES.contains(&content_type.as_str()) {
        return Err(AppError::Validation(format!(
            "invalid file type: {}",
            content_type
        )));
    }

    let key = format!("{}-{}", Uuid::new_v4(), filename);
    let url = state.store.put(&key, bytes, &content_type).await?;

    Ok(Json(serde_json::json!({ "imageUrl": url })))
}

mod models;

pub use models::*;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

// -- users --------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub school: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub password: String,
}

fn email_conflict(email: &str) -> AppError {
    AppError::Conflict(format!("email already registered: {}", email))
}

/// Duplicate-email decision for registration, split out so the conflict
/// semantics are testable without a live database.
fn ensure_email_available(existing: Option<i64>, email: &str) -> Result<(), AppError> {
    match existing {
        Some(_) => Err(email_conflict(email)),
        None => Ok(()),
    }
}

/// Two registrations can race past the pre-check; the unique index on email
/// then rejects the second insert.
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Insert a user inside one transaction: reject duplicate emails before
/// writing anything, then assign the derived `user{id}` display identifier.
/// Any failure before commit rolls the whole insert back.
pub async fn register_user(
    pool: &PgPool,
    new: &NewUser,
    password_hash: &str,
) -> Result<User, AppError> {
    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(&new.email)
        .fetch_optional(&mut *tx)
        .await?;

    ensure_email_available(existing.map(|(id,)| id), &new.email)?;

    let inserted: Result<(i64,), sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO users (name, email, phone, school, class_name, password)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(&new.name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(&new.school)
    .bind(&new.class_name)
    .bind(password_hash)
    .fetch_one(&mut *tx)
    .await;

    let (id,) = match inserted {
        Ok(row) => row,
        Err(e) if is_unique_violation(&e) => return Err(email_conflict(&new.email)),
        Err(e) => return Err(e.into()),
    };

    sqlx::query("UPDATE users SET user_id = $1 WHERE id = $2")
        .bind(format!("user{}", id))
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    find_user(pool, id)
        .await?
        .ok_or_else(|| AppError::Internal("registered user vanished".to_string()))
}

pub async fn find_user(pool: &PgPool, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

// -- exams --------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExam {
    pub title: String,
    pub date: String,
    pub time: String,
    pub subject: String,
    pub description: String,
    pub image_url: Option<String>,
}

pub async fn list_exams(pool: &PgPool) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams ORDER BY title")
        .fetch_all(pool)
        .await
}

pub async fn find_exam(pool: &PgPool, id: Uuid) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn insert_exam(pool: &PgPool, exam: &NewExam) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(
        r#"
        INSERT INTO exams (id, title, date, time, subject, description, image_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&exam.title)
    .bind(&exam.date)
    .bind(&exam.time)
    .bind(&exam.subject)
    .bind(&exam.description)
    .bind(&exam.image_url)
    .fetch_one(pool)
    .await
}

pub async fn update_exam(
    pool: &PgPool,
    id: Uuid,
    exam: &NewExam,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(
        r#"
        UPDATE exams
        SET title = $2, date = $3, time = $4, subject = $5, description = $6, image_url = $7
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&exam.title)
    .bind(&exam.date)
    .bind(&exam.time)
    .bind(&exam.subject)
    .bind(&exam.description)
    .bind(&exam.image_url)
    .fetch_optional(pool)
    .await
}

pub async fn delete_exam(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exams WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// -- certificate templates ----------------------------------------------

pub async fn list_templates(pool: &PgPool) -> Result<Vec<CertificateTemplate>, sqlx::Error> {
    sqlx::query_as::<_, CertificateTemplate>("SELECT * FROM certificate_templates ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn find_template(
    pool: &PgPool,
    id: i64,
) -> Result<Option<CertificateTemplate>, sqlx::Error> {
    sqlx::query_as::<_, CertificateTemplate>("SELECT * FROM certificate_templates WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn templates_missing_preview(
    pool: &PgPool,
) -> Result<Vec<CertificateTemplate>, sqlx::Error> {
    sqlx::query_as::<_, CertificateTemplate>(
        "SELECT * FROM certificate_templates WHERE preview_url IS NULL ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// Unconditional write, used when a preview is explicitly regenerated.
pub async fn set_preview_url(pool: &PgPool, id: i64, url: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE certificate_templates SET preview_url = $2 WHERE id = $1")
        .bind(id)
        .bind(url)
        .execute(pool)
        .await?;
    Ok(())
}

/// Guarded cache-fill: only writes if no preview URL is stored yet. Returns
/// whether the row was updated.
pub async fn fill_preview_url(pool: &PgPool, id: i64, url: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE certificate_templates SET preview_url = $2 WHERE id = $1 AND preview_url IS NULL",
    )
    .bind(id)
    .bind(url)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

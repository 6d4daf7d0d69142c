use crate::AppState;
use crate::api::error::AppError;
use crate::models::{JobSnapshot, Operation};
use crate::services::csv_intake::{StagedUpload, count_data_rows, stage_upload};
use crate::utils::validation::{ValidationError, check_row_bounds};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Multipart form accepted by `POST /api/process-csv`
#[derive(ToSchema)]
pub struct ProcessCsvForm {
    /// `activation` or `deactivation` (default)
    pub operation_type: Option<String>,
    /// CSV with a header row; `file` is accepted as an alternative field name
    #[schema(value_type = String, format = Binary)]
    pub csv_file: Vec<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct ProcessCsvResponse {
    pub job_id: Uuid,
    pub status: String,
}

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Validation failures keep their own message, anything else is a read error
fn csv_error(e: anyhow::Error) -> AppError {
    match e.downcast_ref::<ValidationError>() {
        Some(v) => AppError::BadRequest(v.message.clone()),
        None => AppError::BadRequest(format!("Error reading CSV file: {:#}", e)),
    }
}

#[utoipa::path(
    post,
    path = "/api/process-csv",
    request_body(content = ProcessCsvForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Job accepted", body = ProcessCsvResponse),
        (status = 400, description = "Missing file, unknown operation or row count out of bounds"),
        (status = 413, description = "Upload too large"),
        (status = 500, description = "API token not configured")
    ),
    tag = "jobs"
)]
pub async fn process_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ProcessCsvResponse>), AppError> {
    let mut operation_field: Option<String> = None;
    let mut csv_file: Option<UploadedFile> = None;
    let mut fallback_file: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "operation_type" => {
                let text = field.text().await.map_err(multipart_error)?;
                operation_field = Some(text);
            }
            "csv_file" | "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?.to_vec();
                let upload = Some(UploadedFile { filename, bytes });
                if name == "csv_file" {
                    csv_file = upload;
                } else {
                    fallback_file = upload;
                }
            }
            _ => {
                tracing::debug!("Ignoring multipart field {}", name);
            }
        }
    }

    let upload = csv_file
        .or(fallback_file)
        .ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;

    if upload.filename.trim().is_empty() {
        return Err(AppError::BadRequest(
            "No file uploaded or filename empty".to_string(),
        ));
    }

    let operation = match operation_field.as_deref().map(str::trim) {
        None | Some("") => Operation::default(),
        Some(value) => value
            .parse::<Operation>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
    };

    let upload_dir = state.config.upload_dir.clone();
    let (min, max) = (state.config.min_records, state.config.max_records);
    let staged = tokio::task::spawn_blocking(move || -> Result<StagedUpload, AppError> {
        let staged = stage_upload(&upload_dir, &upload.filename, &upload.bytes).map_err(|e| {
            match e.downcast_ref::<ValidationError>() {
                Some(v) => AppError::BadRequest(v.message.clone()),
                None => AppError::Internal(format!("{:#}", e)),
            }
        })?;

        let count = count_data_rows(staged.path(), max).map_err(csv_error)?;
        check_row_bounds(count, min, max).map_err(csv_error)?;
        tracing::debug!("Upload {} holds {} data row(s)", upload.filename, count);

        Ok(staged)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    if state.config.litmos_api_token.is_none() {
        return Err(AppError::Misconfigured(
            "server misconfiguration: missing LITMOS_API_TOKEN".to_string(),
        ));
    }

    let job_id = state.jobs.create(operation);
    tracing::info!(
        "📥 Accepted {} job {} for {}",
        operation,
        job_id,
        staged.original_name()
    );
    state.runner.spawn(job_id, staged, operation);

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessCsvResponse {
            job_id,
            status: "accepted".to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/job-status/{job_id}",
    params(
        ("job_id" = String, Path, description = "Job id returned by process-csv")
    ),
    responses(
        (status = 200, description = "Current job state", body = JobSnapshot),
        (status = 404, description = "Unknown job")
    ),
    tag = "jobs"
)]
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    Uuid::parse_str(job_id.trim())
        .ok()
        .and_then(|id| state.jobs.get(&id))
        .map(Json)
        .ok_or_else(|| AppError::NotFound("job not found".to_string()))
}

//! Uploads and dataset management.

use std::path::{Path, PathBuf};

use axum::Json;
use axum::extract::{Multipart, Path as UrlPath, Query, State};
use chrono::Utc;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, Dataset};
use pulse_core::{DashboardEvent, DatasetId, Priority};
use pulse_runtime::cache_key;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use crate::feed::publish_activity;
use crate::server::AppState;

/// Largest preview a client may ask for.
const MAX_PREVIEW_ROWS: usize = 1000;
const DEFAULT_PREVIEW_ROWS: usize = 10;

/// Shape of a parsed CSV upload.
#[derive(Debug, PartialEq, Eq)]
pub struct CsvSummary {
    /// Header names.
    pub columns: Vec<String>,
    /// Data rows.
    pub rows: usize,
}

/// Parse `bytes` as CSV and check it is usable for training.
pub fn inspect_csv(bytes: &[u8]) -> ApiResult<CsvSummary> {
    let mut reader = csv::Reader::from_reader(bytes);
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = 0;
    for record in reader.records() {
        let _ = record?;
        rows += 1;
    }
    if rows == 0 || columns.iter().all(String::is_empty) {
        return Err(ApiError::bad_request("File is empty"));
    }
    if columns.len() < 2 {
        return Err(ApiError::bad_request("File must have at least 2 columns"));
    }
    Ok(CsvSummary { columns, rows })
}

/// On-disk name for an upload: unique per dataset so same-named uploads
/// never share a file.
fn stored_file_name(id: &DatasetId, filename: &str) -> String {
    format!("{id}_{filename}")
}

/// Reduce a client-supplied file name to its final component.
fn safe_file_name(raw: &str) -> ApiResult<String> {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && !n.starts_with('.'))
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("invalid file name"))
}

/// POST /api/upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Human-readable outcome.
    pub message: &'static str,
    /// Uploaded file name.
    pub filename: String,
    /// Data rows.
    pub rows: usize,
    /// Column count.
    pub columns: usize,
    /// Where the file was written, usable as `file_path` for training.
    pub file_path: String,
    /// Registered dataset.
    pub dataset_id: DatasetId,
}

/// POST /api/upload
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = safe_file_name(field.file_name().unwrap_or_default())?;
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| ApiError::bad_request("missing 'file' field"))?;

    let summary = inspect_csv(&bytes)?;
    let dataset_id = DatasetId::new();
    tokio::fs::create_dir_all(&state.config.uploads_dir).await?;
    let path: PathBuf = state
        .config
        .uploads_dir
        .join(stored_file_name(&dataset_id, &filename));
    tokio::fs::write(&path, &bytes).await?;
    let file_path = path.to_string_lossy().into_owned();
    info!(file = %file_path, rows = summary.rows, columns = summary.columns.len(), "dataset uploaded");

    let dataset = Dataset {
        id: dataset_id.clone(),
        name: filename.clone(),
        file_path: file_path.clone(),
        rows: summary.rows,
        columns: summary.columns,
        size_bytes: bytes.len() as u64,
        uploaded_at: Utc::now(),
    };
    let columns = dataset.columns.len();
    state.store.insert_dataset(dataset);

    let _ = state.bus.broadcast_event(
        &DashboardEvent::DatasetProcessed {
            dataset_id: dataset_id.clone(),
            name: filename.clone(),
            rows: summary.rows,
            columns,
        },
        Priority::Normal,
    );
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::Upload,
            "New data uploaded",
            format!("{filename} ({} rows, {columns} columns)", summary.rows),
            ActivityStatus::Success,
        ),
    );

    Ok(Json(UploadResponse {
        message: "File uploaded successfully",
        filename,
        rows: summary.rows,
        columns,
        file_path,
        dataset_id,
    }))
}

/// GET /api/datasets
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let datasets = state.store.datasets();
    Json(json!({ "total": datasets.len(), "datasets": datasets }))
}

fn find(state: &AppState, id: &DatasetId) -> ApiResult<Dataset> {
    state
        .store
        .dataset(id)
        .ok_or_else(|| ApiError::not_found("Dataset not found"))
}

/// GET /api/datasets/{id}
pub async fn get(State(state): State<AppState>, UrlPath(id): UrlPath<DatasetId>) -> ApiResult<Json<Dataset>> {
    find(&state, &id).map(Json)
}

/// DELETE /api/datasets/{id}
pub async fn delete(State(state): State<AppState>, UrlPath(id): UrlPath<DatasetId>) -> ApiResult<Json<Value>> {
    let dataset = state
        .store
        .remove_dataset(&id)
        .ok_or_else(|| ApiError::not_found("Dataset not found"))?;
    if let Err(e) = tokio::fs::remove_file(&dataset.file_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %dataset.file_path, error = %e, "failed to remove dataset file");
        }
    }
    let _ = state.cache.delete(&statistics_key(&id));
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::Upload,
            "Dataset deleted",
            format!("Dataset '{}' has been deleted", dataset.name),
            ActivityStatus::Warning,
        ),
    );
    Ok(Json(json!({ "message": "Dataset deleted successfully" })))
}

/// Query for the preview endpoint.
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    /// Rows to return (default 10).
    pub rows: Option<usize>,
}

/// GET /api/datasets/{id}/preview?rows=N
pub async fn preview(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<DatasetId>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<Value>> {
    let dataset = find(&state, &id)?;
    let limit = query.rows.unwrap_or(DEFAULT_PREVIEW_ROWS).min(MAX_PREVIEW_ROWS);
    let path = PathBuf::from(&dataset.file_path);
    let (columns, rows) = run_blocking(move || read_preview(&path, limit)).await?;
    Ok(Json(json!({
        "dataset_id": id,
        "columns": columns,
        "total_rows": rows.len(),
        "rows": rows,
    })))
}

fn read_preview(path: &Path, limit: usize) -> ApiResult<(Vec<String>, Vec<Map<String, Value>>)> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| ApiError::Internal(format!("Error reading file: {e}")))?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::with_capacity(limit);
    for record in reader.records().take(limit) {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), Value::from(v)))
            .collect();
        rows.push(row);
    }
    Ok((headers, rows))
}

fn statistics_key(id: &DatasetId) -> String {
    cache_key("dataset_statistics", &[id.as_str()])
}

/// GET /api/datasets/{id}/statistics
///
/// Memoized in the response cache until the dataset is deleted or the entry
/// expires.
pub async fn statistics(State(state): State<AppState>, UrlPath(id): UrlPath<DatasetId>) -> ApiResult<Json<Value>> {
    let dataset = find(&state, &id)?;
    let key = statistics_key(&id);
    let stats = state
        .cache
        .get_or_try_insert_async(&key, None, || async move {
            let path = PathBuf::from(&dataset.file_path);
            let columns = run_blocking(move || column_statistics(&path)).await?;
            Ok::<_, ApiError>(summarize(&dataset, &columns))
        })
        .await?;
    Ok(Json(stats))
}

/// POST /api/datasets/{id}/validate response.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    /// Dataset checked.
    pub dataset_id: DatasetId,
    /// No blocking issues were found.
    pub valid: bool,
    /// Problems that make the dataset unusable for training.
    pub issues: Vec<String>,
    /// Problems worth a look that do not block training.
    pub warnings: Vec<String>,
    /// Percentage of non-missing cells.
    pub quality_score: usize,
}

/// Judge a profiled dataset.
pub fn validate_columns(id: &DatasetId, columns: &[ColumnStats]) -> ValidationReport {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    if columns.len() < 2 {
        issues.push("dataset needs at least 2 columns (features + target)".to_string());
    }
    for column in columns {
        if column.count == 0 {
            issues.push(format!("column '{}' has no values", column.name));
        } else if column.missing > 0 {
            warnings.push(format!(
                "column '{}' has {} missing values",
                column.name, column.missing
            ));
        }
    }
    ValidationReport {
        dataset_id: id.clone(),
        valid: issues.is_empty(),
        issues,
        warnings,
        quality_score: quality_score(columns),
    }
}

/// POST /api/datasets/{id}/validate
pub async fn validate(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<DatasetId>,
) -> ApiResult<Json<ValidationReport>> {
    let dataset = find(&state, &id)?;
    let path = PathBuf::from(&dataset.file_path);
    let columns = run_blocking(move || column_statistics(&path)).await?;
    let report = validate_columns(&id, &columns);
    info!(dataset_id = %id, valid = report.valid, quality = report.quality_score, "dataset validated");
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::Upload,
            "Dataset validated",
            format!(
                "Dataset '{}' validation completed with quality score: {}%",
                dataset.name, report.quality_score
            ),
            if report.valid {
                ActivityStatus::Success
            } else {
                ActivityStatus::Warning
            },
        ),
    );
    Ok(Json(report))
}

/// Per-column profile.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct ColumnStats {
    /// Header name.
    pub name: String,
    /// Non-empty cells.
    pub count: usize,
    /// Empty cells.
    pub missing: usize,
    /// Whether every non-empty cell parses as a number.
    pub numeric: bool,
    /// Smallest value, for numeric columns.
    pub min: Option<f64>,
    /// Largest value, for numeric columns.
    pub max: Option<f64>,
    /// Mean, for numeric columns.
    pub mean: Option<f64>,
}

/// Profile every column of the CSV at `path`.
pub fn column_statistics(path: &Path) -> ApiResult<Vec<ColumnStats>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| ApiError::Internal(format!("Error reading file: {e}")))?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut acc: Vec<(ColumnStats, f64, bool)> = headers
        .into_iter()
        .map(|name| {
            (
                ColumnStats {
                    name,
                    ..ColumnStats::default()
                },
                0.0,
                true,
            )
        })
        .collect();

    for record in reader.records() {
        let record = record?;
        for (i, (stats, sum, numeric)) in acc.iter_mut().enumerate() {
            let cell = record.get(i).unwrap_or_default().trim();
            if cell.is_empty() {
                stats.missing += 1;
                continue;
            }
            stats.count += 1;
            match cell.parse::<f64>() {
                Ok(v) if *numeric => {
                    *sum += v;
                    stats.min = Some(stats.min.map_or(v, |m| m.min(v)));
                    stats.max = Some(stats.max.map_or(v, |m| m.max(v)));
                }
                Ok(_) => {}
                Err(_) => *numeric = false,
            }
        }
    }

    Ok(acc
        .into_iter()
        .map(|(mut stats, sum, numeric)| {
            stats.numeric = numeric && stats.count > 0;
            if stats.numeric {
                stats.mean = Some(sum / stats.count as f64);
            } else {
                stats.min = None;
                stats.max = None;
            }
            stats
        })
        .collect())
}

fn quality_score(columns: &[ColumnStats]) -> usize {
    let cells: usize = columns.iter().map(|c| c.count + c.missing).sum();
    let missing: usize = columns.iter().map(|c| c.missing).sum();
    if cells == 0 {
        0
    } else {
        100 - (missing * 100).div_ceil(cells)
    }
}

fn summarize(dataset: &Dataset, columns: &[ColumnStats]) -> Value {
    let missing: usize = columns.iter().map(|c| c.missing).sum();
    let numeric = columns.iter().filter(|c| c.numeric).count();
    let quality_score = quality_score(columns);
    json!({
        "dataset_id": dataset.id,
        "basic_stats": {
            "rows": dataset.rows,
            "columns": dataset.columns.len(),
            "size_bytes": dataset.size_bytes,
        },
        "column_stats": {
            "numeric_columns": numeric,
            "categorical_columns": columns.len() - numeric,
            "missing_values": missing,
        },
        "columns": columns,
        "quality_score": quality_score,
    })
}

async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

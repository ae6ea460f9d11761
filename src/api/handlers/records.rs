//! Versioned record CRUD.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{
        ApiError, JsonBody, SharedState,
        validation::{MAX_PAGE, MAX_PAGE_SIZE, Validator, validate_text},
    },
    auth::{RecordsWrite, RequireAuthenticated, RequirePermission},
    concurrency::apply_update,
    store::{Metadata, NewRecord, Record, RecordQuery, RecordSort, VersionedStore},
};

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Case-insensitive substring of the title.
    title: Option<String>,
    /// 1 to 10000, default 1.
    page: Option<String>,
    /// 1 to 100, default 20.
    page_size: Option<String>,
    /// `id`, `title` or `created_at`, prefixed with `-` for descending.
    sort: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct CreateRecordRequest {
    title: String,
    body: String,
    category: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct UpdateRecordRequest {
    title: Option<String>,
    body: Option<String>,
    category: Option<String>,
    /// Version the caller last saw; a stale value is rejected with 409.
    version: Option<i32>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RecordEnvelope {
    record: Record,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RecordList {
    records: Vec<Record>,
    metadata: Metadata,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct DeleteResponse {
    message: String,
}

fn parse_page(v: &mut Validator, key: &str, raw: Option<&str>, default: u32, max: u32) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u32>() {
        Ok(0) => {
            v.add(key, "must be greater than zero");
            default
        }
        Ok(value) if value > max => {
            v.add(key, &format!("must be a maximum of {max}"));
            default
        }
        Ok(value) => value,
        Err(_) => {
            v.add(key, "must be an integer value");
            default
        }
    }
}

impl ListParams {
    fn into_query(self) -> Result<RecordQuery, ApiError> {
        let defaults = RecordQuery::default();
        let mut v = Validator::new();

        let page = parse_page(&mut v, "page", self.page.as_deref(), defaults.page, MAX_PAGE);
        let page_size = parse_page(
            &mut v,
            "page_size",
            self.page_size.as_deref(),
            defaults.page_size,
            MAX_PAGE_SIZE,
        );
        let sort = match self.sort.as_deref() {
            None => defaults.sort,
            Some(raw) => RecordSort::parse(raw).unwrap_or_else(|| {
                v.add("sort", "invalid sort value");
                defaults.sort
            }),
        };

        v.finish()?;

        Ok(RecordQuery {
            title: self.title.unwrap_or_default(),
            page,
            page_size,
            sort,
        })
    }
}

/// Ids below 1 or unparsable ids name no record.
fn record_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    match path {
        Ok(Path(id)) if id >= 1 => Ok(id),
        _ => Err(ApiError::NotFound),
    }
}

#[utoipa::path(
    get,
    path= "/v1/records",
    params(ListParams),
    responses (
        (status = 200, description = "One page of records", body = RecordList),
        (status = 401, description = "Not authenticated"),
        (status = 422, description = "Invalid filter or pagination"),
    ),
    security(("bearer" = [])),
    tag= "records"
)]
pub async fn list(
    RequireAuthenticated(_identity): RequireAuthenticated,
    State(state): State<SharedState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let query = params.into_query()?;

    let (records, total) = state.records.list_records(&query).await?;

    debug!(total, page = query.page, "records listed");

    Ok(Json(RecordList {
        records,
        metadata: Metadata::new(total, query.page, query.page_size),
    }))
}

#[utoipa::path(
    post,
    path= "/v1/records",
    request_body = CreateRecordRequest,
    responses (
        (status = 201, description = "Record created", body = RecordEnvelope),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Account not activated or lacks records:write"),
        (status = 422, description = "Validation failed"),
    ),
    security(("bearer" = [])),
    tag= "records"
)]
#[instrument(skip_all)]
pub async fn create(
    _writer: RequirePermission<RecordsWrite>,
    State(state): State<SharedState>,
    JsonBody(request): JsonBody<CreateRecordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    validate_text(&mut v, "title", &request.title);
    validate_text(&mut v, "body", &request.body);
    validate_text(&mut v, "category", &request.category);
    v.finish()?;

    let record = state
        .records
        .insert_record(&NewRecord {
            title: request.title,
            body: request.body,
            category: request.category,
        })
        .await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/v1/records/{}", record.id)) {
        headers.insert(LOCATION, location);
    }

    Ok((StatusCode::CREATED, headers, Json(RecordEnvelope { record })))
}

#[utoipa::path(
    get,
    path= "/v1/records/{id}",
    params(("id" = i64, Path, description = "Record id")),
    responses (
        (status = 200, description = "The record", body = RecordEnvelope),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such record"),
    ),
    security(("bearer" = [])),
    tag= "records"
)]
pub async fn show(
    RequireAuthenticated(_identity): RequireAuthenticated,
    State(state): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = record_id(path)?;
    let record = VersionedStore::<Record>::fetch(state.records.as_ref(), id).await?;

    Ok(Json(RecordEnvelope { record }))
}

#[utoipa::path(
    patch,
    path= "/v1/records/{id}",
    params(("id" = i64, Path, description = "Record id")),
    request_body = UpdateRecordRequest,
    responses (
        (status = 200, description = "Record updated", body = RecordEnvelope),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Account not activated or lacks records:write"),
        (status = 404, description = "No such record"),
        (status = 409, description = "Edit conflict"),
        (status = 422, description = "Validation failed"),
    ),
    security(("bearer" = [])),
    tag= "records"
)]
#[instrument(skip_all)]
pub async fn update(
    _writer: RequirePermission<RecordsWrite>,
    State(state): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
    JsonBody(request): JsonBody<UpdateRecordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = record_id(path)?;

    let record: Record = apply_update(
        state.records.as_ref(),
        id,
        request.version,
        |record: &mut Record| {
            if let Some(title) = request.title {
                record.title = title;
            }
            if let Some(body) = request.body {
                record.body = body;
            }
            if let Some(category) = request.category {
                record.category = category;
            }

            let mut v = Validator::new();
            validate_text(&mut v, "title", &record.title);
            validate_text(&mut v, "body", &record.body);
            validate_text(&mut v, "category", &record.category);
            v.finish()
        },
    )
    .await?;

    Ok(Json(RecordEnvelope { record }))
}

#[utoipa::path(
    delete,
    path= "/v1/records/{id}",
    params(("id" = i64, Path, description = "Record id")),
    responses (
        (status = 200, description = "Record deleted", body = DeleteResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Account not activated or lacks records:write"),
        (status = 404, description = "No such record"),
    ),
    security(("bearer" = [])),
    tag= "records"
)]
pub async fn delete(
    _writer: RequirePermission<RecordsWrite>,
    State(state): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = record_id(path)?;
    state.records.delete_record(id).await?;

    Ok(Json(DeleteResponse {
        message: "record successfully deleted".to_string(),
    }))
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::{
    auth::{AuthUser, TokenAuth},
    csv_io::{export_csv, parse_import, RowError},
    cycles::{compute_cycles, parse_time_of_day, quality_label_for_cycles, CycleCandidate, Direction},
    db,
    entry::{format_date, hours_for_cycles, parse_date, round_to, validate_cycles, EntryInput, Quality},
    error::{ApiError, OkResponse, ValidationError},
    settings::{SettingsUpdate, UserSettings},
    weekly::{average_hours, longest_streak, summarize_week, week_end_for, week_start_for},
};

const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;
const MAX_LIST_LIMIT: usize = 366;

#[derive(Clone)]
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    pub auth: Arc<TokenAuth>,
    /// Applied to users who never saved settings.
    pub defaults: Arc<UserSettings>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/cycles", get(get_cycles))
        .route("/cycles/log", post(post_cycle_log).options(options_ok))
        .route("/sleep", get(get_sleep).post(post_sleep).options(options_ok))
        .route(
            "/sleep/:id",
            put(put_sleep).delete(delete_sleep).options(options_ok),
        )
        .route("/stats/week", get(get_week_stats))
        .route("/stats/summary", get(get_summary_stats))
        .route(
            "/settings",
            get(get_settings).post(post_settings).options(options_ok),
        )
        .route("/export/csv", get(get_export_csv))
        .route("/import/csv", post(post_import_csv).options(options_ok))
        .route("/data/wipe", post(post_data_wipe).options(options_ok))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    OkResponse::data(HealthInfo {
        service: "sleep_core",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn normalize_tz_offset_minutes(v: Option<i32>) -> i32 {
    v.unwrap_or(0)
        .clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

fn tz_offset_from_minutes(minutes: i32) -> time::UtcOffset {
    time::UtcOffset::from_whole_seconds(minutes.saturating_mul(60))
        .unwrap_or(time::UtcOffset::UTC)
}

/// Wall clock in the caller's zone.
fn local_now(tz_offset_minutes: Option<i32>) -> OffsetDateTime {
    let offset = tz_offset_from_minutes(normalize_tz_offset_minutes(tz_offset_minutes));
    OffsetDateTime::now_utc().to_offset(offset)
}

/// `Query` whose rejection keeps the JSON error envelope.
pub struct ApiQuery<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: serde::de::DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(v)) => Ok(ApiQuery(v)),
            Err(rejection) => {
                debug!("rejected query string: {rejection}");
                Err(ApiError::InvalidRequest)
            }
        }
    }
}

/// `Path` whose rejection keeps the JSON error envelope.
pub struct ApiPath<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: serde::de::DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(v)) => Ok(ApiPath(v)),
            Err(rejection) => {
                debug!("rejected path: {rejection}");
                Err(ApiError::InvalidRequest)
            }
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)
}

#[derive(Deserialize)]
struct CyclesQuery {
    mode: Option<String>,
    time: Option<String>,
    tz_offset_minutes: Option<i32>,
}

#[derive(Serialize)]
struct CyclesResult {
    direction: Direction,
    /// HH:MM
    anchor: String,
    candidates: Vec<CycleCandidate>,
}

async fn get_cycles(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    ApiQuery(q): ApiQuery<CyclesQuery>,
) -> Result<Response, ApiError> {
    let direction = Direction::parse(q.mode.as_deref().unwrap_or("bedtime"))?;

    let anchor = match q.time.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => parse_time_of_day(t)?,
        None => match direction {
            Direction::ToWaketime => {
                let settings = match &user {
                    Some(AuthUser(user_id)) => {
                        let mut conn = state.conn.lock().await;
                        db::load_settings(&mut conn, user_id, &state.defaults)?
                    }
                    None => (*state.defaults).clone(),
                };
                settings.wake_time()?
            }
            Direction::FromBedtime => local_now(q.tz_offset_minutes).time(),
        },
    };

    Ok(OkResponse::data(CyclesResult {
        direction,
        anchor: format!("{:02}:{:02}", anchor.hour(), anchor.minute()),
        candidates: compute_cycles(anchor, direction),
    })
    .into_response())
}

#[derive(Deserialize)]
struct CycleLogRequest {
    cycles: Option<i64>,
    date: Option<String>,
    tz_offset_minutes: Option<i32>,
}

async fn post_cycle_log(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: CycleLogRequest = parse_json(&body)?;
    let cycles = validate_cycles(req.cycles.ok_or(ValidationError::MissingFields)?)?;
    if cycles == 0 {
        return Err(ValidationError::InvalidCycles.into());
    }
    let date = match req.date.as_deref() {
        Some(d) => parse_date(d)?,
        None => local_now(req.tz_offset_minutes).date(),
    };

    let quality = Quality::from_cycle_label(quality_label_for_cycles(cycles));
    let input = EntryInput::new(date, hours_for_cycles(cycles), quality, cycles as i64)?;

    let mut conn = state.conn.lock().await;
    let (entry, _) = db::upsert_entry(&mut conn, &user_id, &input, &db::now_rfc3339())?;
    info!(
        "logged {cycles} cycles for user={user_id} date={}",
        format_date(entry.date)
    );
    Ok((StatusCode::CREATED, OkResponse::data(entry)).into_response())
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    7
}

async fn get_sleep(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Result<Response, ApiError> {
    let limit = q.limit.clamp(1, MAX_LIST_LIMIT);
    let mut conn = state.conn.lock().await;
    let entries = db::list_entries(&mut conn, &user_id, Some(limit))?;
    Ok(OkResponse::data(entries).into_response())
}

async fn post_sleep(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: Value = parse_json(&body)?;
    let input = EntryInput::from_json(&payload)?;

    let mut conn = state.conn.lock().await;
    let (entry, created) = db::upsert_entry(&mut conn, &user_id, &input, &db::now_rfc3339())?;
    info!(
        "saved sleep entry user={user_id} date={} created={created}",
        format_date(entry.date)
    );
    Ok((StatusCode::CREATED, OkResponse::data(entry)).into_response())
}

async fn put_sleep(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: Value = parse_json(&body)?;
    let input = EntryInput::from_json(&payload)?;

    let mut conn = state.conn.lock().await;
    let entry = db::update_entry(&mut conn, &user_id, id, &input, &db::now_rfc3339())?
        .ok_or(ApiError::NotFound)?;
    info!("updated sleep entry id={id} user={user_id}");
    Ok(OkResponse::data(entry).into_response())
}

async fn delete_sleep(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let mut conn = state.conn.lock().await;
    if db::delete_entry(&mut conn, &user_id, id)? == 0 {
        return Err(ApiError::NotFound);
    }
    info!("deleted sleep entry id={id} user={user_id}");
    Ok(Json(OkResponse::<Value> {
        ok: true,
        data: None,
    })
    .into_response())
}

#[derive(Deserialize)]
struct WeekQuery {
    start: Option<String>,
    tz_offset_minutes: Option<i32>,
}

async fn get_week_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(q): ApiQuery<WeekQuery>,
) -> Result<Response, ApiError> {
    let week_start = match q.start.as_deref() {
        Some(s) => parse_date(s)?,
        None => week_start_for(local_now(q.tz_offset_minutes).date()),
    };
    week_end_for(week_start)?;

    let (entries, settings) = {
        let mut conn = state.conn.lock().await;
        let entries = db::list_entries(&mut conn, &user_id, None)?;
        let settings = db::load_settings(&mut conn, &user_id, &state.defaults)?;
        (entries, settings)
    };

    debug!(
        "week stats user={user_id} start={} entries={}",
        format_date(week_start),
        entries.len()
    );
    let summary = summarize_week(week_start, &entries, settings.sleep_goal_hours)?;
    Ok(OkResponse::data(summary).into_response())
}

#[derive(Serialize)]
struct SummaryStats {
    entries: usize,
    /// One decimal.
    average_hours: f64,
    best_streak: u32,
    goal_hours: f64,
}

async fn get_summary_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let (entries, settings) = {
        let mut conn = state.conn.lock().await;
        let entries = db::list_entries(&mut conn, &user_id, None)?;
        let settings = db::load_settings(&mut conn, &user_id, &state.defaults)?;
        (entries, settings)
    };

    let goal = settings.sleep_goal_hours;
    Ok(OkResponse::data(SummaryStats {
        entries: entries.len(),
        average_hours: round_to(average_hours(&entries), 1),
        best_streak: longest_streak(&entries, goal),
        goal_hours: goal,
    })
    .into_response())
}

async fn get_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let mut conn = state.conn.lock().await;
    let settings = db::load_settings(&mut conn, &user_id, &state.defaults)?;
    Ok(OkResponse::data(settings).into_response())
}

async fn post_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let update: SettingsUpdate = parse_json(&body)?;

    let mut conn = state.conn.lock().await;
    let current = db::load_settings(&mut conn, &user_id, &state.defaults)?;
    let next = current.apply(&update)?;
    if next != current {
        db::upsert_settings(&mut conn, &user_id, &next, &db::now_rfc3339())?;
        info!(
            "settings updated user={user_id} goal={} wake={}",
            next.sleep_goal_hours, next.default_wake_time
        );
    }
    Ok(OkResponse::data(next).into_response())
}

#[derive(Deserialize)]
struct ExportQuery {
    tz_offset_minutes: Option<i32>,
}

async fn get_export_csv(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(q): ApiQuery<ExportQuery>,
) -> Result<Response, ApiError> {
    let mut entries = {
        let mut conn = state.conn.lock().await;
        db::list_entries(&mut conn, &user_id, None)?
    };
    entries.reverse();

    let filename = format!(
        "sleep-data-{}.csv",
        format_date(local_now(q.tz_offset_minutes).date())
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        export_csv(&entries),
    )
        .into_response())
}

#[derive(Serialize)]
struct ImportResult {
    imported: usize,
    skipped: usize,
    errors: Vec<RowError>,
}

async fn post_import_csv(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = std::str::from_utf8(&body).map_err(|_| ApiError::InvalidCsv)?;
    let parsed = parse_import(body).ok_or(ApiError::InvalidCsv)?;

    let now = db::now_rfc3339();
    let mut conn = state.conn.lock().await;
    let tx = conn.transaction()?;
    for (_, input) in &parsed.rows {
        db::upsert_entry(&tx, &user_id, input, &now)?;
    }
    tx.commit()?;
    info!(
        "imported {} rows for user={user_id} ({} skipped)",
        parsed.rows.len(),
        parsed.errors.len()
    );

    Ok(OkResponse::data(ImportResult {
        imported: parsed.rows.len(),
        skipped: parsed.errors.len(),
        errors: parsed.errors,
    })
    .into_response())
}

#[derive(Serialize)]
struct WipeResult {
    entries_deleted: usize,
}

async fn post_data_wipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let mut conn = state.conn.lock().await;
    let entries_deleted = db::wipe_entries(&mut conn, &user_id)?;
    info!("wiped {entries_deleted} entries for user={user_id}");
    Ok(OkResponse::data(WipeResult { entries_deleted }).into_response())
}

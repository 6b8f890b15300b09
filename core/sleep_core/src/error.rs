use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Input rejected before any computation or storage happens.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("time must be HH:MM, HH:MM:SS or h:mm AM/PM")]
    InvalidTime,
    #[error("hours must be between 0 and 24")]
    InvalidHours,
    #[error("cycles must be between 0 and 10")]
    InvalidCycles,
    #[error("quality must be Light, Good, or Optimal")]
    InvalidQuality,
    #[error("date must be YYYY-MM-DD")]
    InvalidDate,
    #[error("sleep goal must be between 1 and 12 hours")]
    InvalidGoal,
    #[error("mode must be bedtime or waketime")]
    InvalidMode,
    #[error("missing required fields")]
    MissingFields,
}

impl ValidationError {
    pub fn code(self) -> &'static str {
        match self {
            ValidationError::InvalidTime => "invalid_time",
            ValidationError::InvalidHours => "invalid_hours",
            ValidationError::InvalidCycles => "invalid_cycles",
            ValidationError::InvalidQuality => "invalid_quality",
            ValidationError::InvalidDate => "invalid_date",
            ValidationError::InvalidGoal => "invalid_goal",
            ValidationError::InvalidMode => "invalid_mode",
            ValidationError::MissingFields => "missing_fields",
        }
    }
}

#[derive(Serialize)]
pub struct OkResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> OkResponse<T> {
    pub fn data(data: T) -> Json<Self> {
        Json(OkResponse {
            ok: true,
            data: Some(data),
        })
    }
}

#[derive(Serialize)]
pub struct ErrResponse {
    pub ok: bool,
    pub error: &'static str,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid json payload")]
    InvalidJson,

    #[error("csv header must contain Date and Hours columns")]
    InvalidCsv,

    #[error("malformed query string or path")]
    InvalidRequest,

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("not found")]
    NotFound,

    #[error("an entry already exists for that date")]
    DuplicateDate,

    #[error("database error: {0}")]
    Db(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::DuplicateDate
            }
            _ => ApiError::Db(err),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::InvalidJson
            | ApiError::InvalidCsv
            | ApiError::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiError::MissingToken | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::DuplicateDate => StatusCode::CONFLICT,
            ApiError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(v) => v.code(),
            ApiError::InvalidJson => "invalid_json",
            ApiError::InvalidCsv => "invalid_csv",
            ApiError::InvalidRequest => "invalid_request",
            ApiError::MissingToken => "missing_token",
            ApiError::InvalidToken => "invalid_token",
            ApiError::NotFound => "not_found",
            ApiError::DuplicateDate => "duplicate_date",
            ApiError::Db(_) => "db_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Db(err) = &self {
            error!("db error: {err}");
        }
        (
            self.status(),
            Json(ErrResponse {
                ok: false,
                error: self.code(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (d TEXT UNIQUE); INSERT INTO t VALUES ('x');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('x')", []).unwrap_err();
        let api: ApiError = err.into();
        assert!(matches!(api, ApiError::DuplicateDate));
        assert_eq!(api.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_codes_are_snake_case() {
        let api = ApiError::from(ValidationError::InvalidHours);
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.code(), "invalid_hours");
        assert_eq!(ApiError::MissingToken.status(), StatusCode::UNAUTHORIZED);
    }
}

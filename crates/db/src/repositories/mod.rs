use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::Row;
use thiserror::Error;

use pgben_core::errors::StoreError;

pub mod approval_case;
pub mod directory;
pub mod holiday;
pub mod policy;
pub mod workflow_definition;
pub mod workflow_state;

pub use approval_case::SqlApprovalCaseStore;
pub use directory::SqlApproverDirectory;
pub use holiday::SqlHolidayRepository;
pub use policy::SqlApprovalPolicyStore;
pub use workflow_definition::SqlWorkflowDefinitionStore;
pub use workflow_state::SqlWorkflowStateStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Store(inner) => inner,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// Maps a unique-key violation on insert to [`StoreError::Duplicate`].
pub(crate) fn insert_error(entity: &'static str, id: &str, error: sqlx::Error) -> RepositoryError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate { entity, id: id.to_string() }.into()
        }
        _ => error.into(),
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn column_u32(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let value: i64 = column(row, name)?;
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{name}: {value} out of range")))
}

/// Timestamps are stored as fixed-width RFC 3339 so that text comparison orders them.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{value}`: {e}")))
}

pub(crate) fn encode_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub(crate) fn decode_date(value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("date `{value}`: {e}")))
}

pub(crate) fn decode_enum<T>(
    kind: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("unknown {kind} `{value}`")))
}

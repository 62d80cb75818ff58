use chrono::NaiveDate;
use tracing::debug;

use pgben_core::calendar::InMemoryHolidayCalendar;

use super::{decode_date, encode_date, RepositoryError};
use crate::DbPool;

pub struct SqlHolidayRepository {
    pool: DbPool,
}

impl SqlHolidayRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn add(
        &self,
        day: NaiveDate,
        description: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO holiday (day, description) VALUES (?, ?)
             ON CONFLICT(day) DO UPDATE SET description = excluded.description",
        )
        .bind(encode_date(day))
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, day: NaiveDate) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM holiday WHERE day = ?")
            .bind(encode_date(day))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self) -> Result<Vec<NaiveDate>, RepositoryError> {
        let days: Vec<String> = sqlx::query_scalar("SELECT day FROM holiday ORDER BY day")
            .fetch_all(&self.pool)
            .await?;
        days.iter().map(String::as_str).map(decode_date).collect()
    }

    /// Snapshot of the stored holidays. Later inserts need a fresh snapshot.
    pub async fn load_calendar(&self) -> Result<InMemoryHolidayCalendar, RepositoryError> {
        let calendar = InMemoryHolidayCalendar::with_holidays(self.list().await?);
        debug!(
            event_name = "calendar.holidays_loaded",
            holiday_count = calendar.len(),
            "loaded holiday calendar"
        );
        Ok(calendar)
    }
}

//! SQLite store.
//!
//! Uses a single SQLite database file with two tables:
//! - `calls`: one row per call session, lead fields inline
//! - `appointments`: bookings made through the scheduler

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;
use voxline_core::error::RecordsError;
use voxline_core::records::{
    Appointment, AppointmentBook, AppointmentStatus, CallCategory, CallRecord, CallRecords,
    CallStatus, LeadDetails,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, RecordsError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| RecordsError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // every connection to :memory: would see its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| RecordsError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite records store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), RecordsError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                call_id        TEXT PRIMARY KEY,
                status         TEXT NOT NULL,
                category       TEXT NOT NULL,
                call_reason    TEXT,
                first_name     TEXT,
                last_name      TEXT,
                email          TEXT,
                phone_number   TEXT,
                address        TEXT,
                postal_code    TEXT,
                appointment_id TEXT,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RecordsError::MigrationFailed(format!("calls table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id         TEXT PRIMARY KEY,
                assignee   TEXT NOT NULL,
                start_at   TEXT NOT NULL,
                end_at     TEXT NOT NULL,
                status     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RecordsError::MigrationFailed(format!("appointments table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_appointments_status ON appointments(status)")
            .execute(&self.pool)
            .await
            .map_err(|e| RecordsError::MigrationFailed(format!("status index: {e}")))?;

        debug!("SQLite records migrations complete");
        Ok(())
    }

    async fn load(&self, call_id: &str) -> Result<Option<CallRecord>, RecordsError> {
        let row = sqlx::query("SELECT * FROM calls WHERE call_id = ?")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RecordsError::Storage(format!("load call: {e}")))?;
        row.as_ref().map(row_to_call).transpose()
    }

    async fn save(&self, record: &CallRecord) -> Result<(), RecordsError> {
        sqlx::query(
            r#"
            INSERT INTO calls (call_id, status, category, call_reason, first_name, last_name,
                               email, phone_number, address, postal_code, appointment_id,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(call_id) DO UPDATE SET
                status = excluded.status,
                category = excluded.category,
                call_reason = excluded.call_reason,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                phone_number = excluded.phone_number,
                address = excluded.address,
                postal_code = excluded.postal_code,
                appointment_id = excluded.appointment_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.call_id)
        .bind(record.status.as_str())
        .bind(record.category.as_str())
        .bind(&record.lead.call_reason)
        .bind(&record.lead.first_name)
        .bind(&record.lead.last_name)
        .bind(&record.lead.email)
        .bind(&record.lead.phone_number)
        .bind(&record.lead.address)
        .bind(&record.lead.postal_code)
        .bind(&record.appointment_id)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RecordsError::Storage(format!("save call: {e}")))?;
        Ok(())
    }

    /// Load-or-open, mutate, write back.
    async fn update<F>(&self, call_id: &str, update: F) -> Result<(), RecordsError>
    where
        F: FnOnce(&mut CallRecord) + Send,
    {
        let mut record = self
            .load(call_id)
            .await?
            .unwrap_or_else(|| CallRecord::open(call_id));
        update(&mut record);
        self.save(&record).await
    }
}

fn column<T>(row: &SqliteRow, name: &str) -> Result<T, RecordsError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| RecordsError::Serialization(format!("{name} column: {e}")))
}

fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RecordsError> {
    let raw: String = column(row, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RecordsError::Serialization(format!("{name} '{raw}': {e}")))
}

fn row_to_call(row: &SqliteRow) -> Result<CallRecord, RecordsError> {
    let status: String = column(row, "status")?;
    let category: String = column(row, "category")?;
    Ok(CallRecord {
        call_id: column(row, "call_id")?,
        status: CallStatus::parse(&status)
            .ok_or_else(|| RecordsError::Serialization(format!("unknown call status '{status}'")))?,
        category: CallCategory::parse(&category)
            .ok_or_else(|| RecordsError::Serialization(format!("unknown call category '{category}'")))?,
        lead: LeadDetails {
            call_reason: column(row, "call_reason")?,
            first_name: column(row, "first_name")?,
            last_name: column(row, "last_name")?,
            email: column(row, "email")?,
            phone_number: column(row, "phone_number")?,
            address: column(row, "address")?,
            postal_code: column(row, "postal_code")?,
        },
        appointment_id: column(row, "appointment_id")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_appointment(row: &SqliteRow) -> Result<Appointment, RecordsError> {
    let status: String = column(row, "status")?;
    Ok(Appointment {
        id: column(row, "id")?,
        assignee: column(row, "assignee")?,
        start: timestamp(row, "start_at")?,
        end: timestamp(row, "end_at")?,
        status: AppointmentStatus::parse(&status)
            .ok_or_else(|| RecordsError::Serialization(format!("unknown appointment status '{status}'")))?,
    })
}

#[async_trait]
impl CallRecords for SqliteStore {
    async fn open_call(&self, call_id: &str) -> Result<CallRecord, RecordsError> {
        if let Some(existing) = self.load(call_id).await? {
            return Ok(existing);
        }
        let record = CallRecord::open(call_id);
        self.save(&record).await?;
        Ok(record)
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, RecordsError> {
        self.load(call_id).await
    }

    async fn end_call(&self, call_id: &str) -> Result<(), RecordsError> {
        self.update(call_id, CallRecord::apply_end_call).await
    }

    async fn update_lead(&self, call_id: &str, details: &LeadDetails) -> Result<(), RecordsError> {
        self.update(call_id, |record| record.apply_lead(details)).await
    }

    async fn linked_appointment(&self, call_id: &str) -> Result<Option<String>, RecordsError> {
        Ok(self.load(call_id).await?.and_then(|record| record.appointment_id))
    }

    async fn link_appointment(&self, call_id: &str, appointment_id: &str) -> Result<(), RecordsError> {
        self.update(call_id, |record| {
            record.appointment_id = Some(appointment_id.to_string());
            record.updated_at = Utc::now();
        })
        .await
    }

    async fn mark_abandoned(&self, call_id: &str) -> Result<(), RecordsError> {
        let mut record = self
            .load(call_id)
            .await?
            .ok_or_else(|| RecordsError::CallNotFound(call_id.to_string()))?;
        record.apply_abandoned();
        self.save(&record).await
    }
}

#[async_trait]
impl AppointmentBook for SqliteStore {
    async fn active_appointments(&self) -> Result<Vec<Appointment>, RecordsError> {
        let rows = sqlx::query(
            "SELECT * FROM appointments WHERE status IN ('pending', 'accepted') ORDER BY start_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RecordsError::Storage(format!("list appointments: {e}")))?;

        rows.iter().map(row_to_appointment).collect()
    }

    async fn create_appointment(
        &self,
        assignee: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Appointment, RecordsError> {
        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            assignee: assignee.to_string(),
            start,
            end,
            status: AppointmentStatus::Pending,
        };

        sqlx::query(
            "INSERT INTO appointments (id, assignee, start_at, end_at, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&appointment.id)
        .bind(&appointment.assignee)
        .bind(appointment.start.to_rfc3339())
        .bind(appointment.end.to_rfc3339())
        .bind(appointment.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RecordsError::Storage(format!("create appointment: {e}")))?;

        debug!(id = %appointment.id, assignee = %appointment.assignee, "Appointment created");
        Ok(appointment)
    }
}

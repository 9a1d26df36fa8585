//! SQLite-backed document storage
//!
//! Each table keeps the columns used for lookups next to the full record as
//! JSON (`doc_json`), so records round-trip exactly as the JSON store keeps
//! them.

use super::{sort_patients, PrescriptionFilter, Store};
use crate::{
    auth::models::User,
    models::{Patient, Prescription, PrescriptionStatus, StoredPrescription},
};
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use parking_lot::Mutex; // Faster than std::sync::Mutex
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT UNIQUE NOT NULL,
    role TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    doctor_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_patients_doctor ON patients(doctor_id, name);
CREATE INDEX IF NOT EXISTS idx_patients_user ON patients(user_id);

CREATE TABLE IF NOT EXISTS prescriptions (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    doctor_id TEXT NOT NULL,
    status TEXT NOT NULL,
    issued_at TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_prescriptions_patient ON prescriptions(patient_id, issued_at DESC);
CREATE INDEX IF NOT EXISTS idx_prescriptions_doctor ON prescriptions(doctor_id, issued_at DESC);
"#;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn to_doc<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize record")
}

fn from_doc<T: DeserializeOwned>(doc: &str) -> Result<T> {
    serde_json::from_str(doc).context("Corrupt record in database")
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Single-document lookup on an already locked connection
fn doc_with<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<T>> {
    let doc: Option<String> = conn
        .query_row(sql, params, |row| row.get(0))
        .optional()?;
    doc.map(|d| from_doc(&d)).transpose()
}

impl SqliteStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, for tests and throwaway runs
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply schema")?;
        info!("SQLite schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn query_docs<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let docs = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        docs.iter().map(|d| from_doc(d)).collect()
    }

    fn query_doc<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<T>> {
        let conn = self.conn.lock();
        doc_with(&conn, sql, params)
    }
}

impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn insert_user(&self, user: &User) -> Result<bool> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, email, role, doc_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.email,
                user.role.as_str(),
                to_doc(user)?
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                debug!("User insert rejected, email taken: {}", user.email);
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to insert user"),
        }
    }

    fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        self.query_doc(
            "SELECT doc_json FROM users WHERE id = ?1",
            params![id.to_string()],
        )
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_doc(
            "SELECT doc_json FROM users WHERE email = ?1",
            params![email],
        )
    }

    fn list_users(&self) -> Result<Vec<User>> {
        self.query_docs("SELECT doc_json FROM users ORDER BY email", [])
    }

    fn update_user_password(&self, id: &Uuid, password_hash: &str) -> Result<bool> {
        // Read and write under one lock so concurrent updates can't interleave
        let conn = self.conn.lock();
        let Some(mut user) = doc_with::<User>(
            &conn,
            "SELECT doc_json FROM users WHERE id = ?1",
            params![id.to_string()],
        )?
        else {
            return Ok(false);
        };
        user.password_hash = Some(password_hash.to_string());

        let rows = conn.execute(
            "UPDATE users SET doc_json = ?2 WHERE id = ?1",
            params![id.to_string(), to_doc(&user)?],
        )?;
        Ok(rows > 0)
    }

    fn delete_user(&self, id: &Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }

    fn insert_patient(&self, patient: &Patient) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO patients (id, doctor_id, user_id, name, email, doc_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                patient.id.to_string(),
                patient.doctor_id.to_string(),
                patient.user_id.to_string(),
                patient.name,
                patient.email,
                to_doc(patient)?
            ],
        )
        .context("Failed to insert patient")?;
        Ok(())
    }

    fn get_patient(&self, id: &Uuid) -> Result<Option<Patient>> {
        self.query_doc(
            "SELECT doc_json FROM patients WHERE id = ?1",
            params![id.to_string()],
        )
    }

    fn get_patient_by_user(&self, user_id: &Uuid) -> Result<Option<Patient>> {
        self.query_doc(
            "SELECT doc_json FROM patients WHERE user_id = ?1",
            params![user_id.to_string()],
        )
    }

    fn list_patients(
        &self,
        doctor_id: Option<&Uuid>,
        query: Option<&str>,
    ) -> Result<Vec<Patient>> {
        let mut patients: Vec<Patient> = match doctor_id {
            Some(id) => self.query_docs(
                "SELECT doc_json FROM patients WHERE doctor_id = ?1",
                params![id.to_string()],
            )?,
            None => self.query_docs("SELECT doc_json FROM patients", [])?,
        };
        if let Some(q) = query {
            patients.retain(|p| p.matches(q));
        }
        sort_patients(&mut patients);
        Ok(patients)
    }

    fn update_patient(&self, patient: &Patient) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE patients SET name = ?2, email = ?3, doc_json = ?4 WHERE id = ?1",
            params![
                patient.id.to_string(),
                patient.name,
                patient.email,
                to_doc(patient)?
            ],
        )?;
        Ok(rows > 0)
    }

    fn delete_patient(&self, id: &Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM patients WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn insert_prescription(&self, prescription: &Prescription) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO prescriptions (id, patient_id, doctor_id, status, issued_at, doc_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                prescription.id.to_string(),
                prescription.patient_id.to_string(),
                prescription.doctor_id.to_string(),
                prescription.status.as_str(),
                prescription
                    .issued_at
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
                to_doc(&StoredPrescription::from(prescription))?
            ],
        )
        .context("Failed to insert prescription")?;
        Ok(())
    }

    fn get_prescription(&self, id: &Uuid) -> Result<Option<Prescription>> {
        let stored: Option<StoredPrescription> = self.query_doc(
            "SELECT doc_json FROM prescriptions WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(stored.map(Prescription::from))
    }

    fn list_prescriptions(&self, filter: PrescriptionFilter) -> Result<Vec<Prescription>> {
        let stored: Vec<StoredPrescription> = match (filter.patient_id, filter.doctor_id) {
            (Some(patient), Some(doctor)) => self.query_docs(
                "SELECT doc_json FROM prescriptions
                 WHERE patient_id = ?1 AND doctor_id = ?2 ORDER BY issued_at DESC",
                params![patient.to_string(), doctor.to_string()],
            )?,
            (Some(patient), None) => self.query_docs(
                "SELECT doc_json FROM prescriptions WHERE patient_id = ?1 ORDER BY issued_at DESC",
                params![patient.to_string()],
            )?,
            (None, Some(doctor)) => self.query_docs(
                "SELECT doc_json FROM prescriptions WHERE doctor_id = ?1 ORDER BY issued_at DESC",
                params![doctor.to_string()],
            )?,
            (None, None) => self.query_docs(
                "SELECT doc_json FROM prescriptions ORDER BY issued_at DESC",
                [],
            )?,
        };
        Ok(stored.into_iter().map(Prescription::from).collect())
    }

    fn update_prescription_status(&self, id: &Uuid, status: PrescriptionStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let Some(mut stored) = doc_with::<StoredPrescription>(
            &conn,
            "SELECT doc_json FROM prescriptions WHERE id = ?1",
            params![id.to_string()],
        )?
        else {
            return Ok(false);
        };
        stored.prescription.status = status;

        let rows = conn.execute(
            "UPDATE prescriptions SET status = ?2, doc_json = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                to_doc(&stored)?
            ],
        )?;
        Ok(rows > 0)
    }

    fn delete_prescriptions_for_patient(&self, patient_id: &Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM prescriptions WHERE patient_id = ?1",
            params![patient_id.to_string()],
        )?;
        Ok(rows)
    }
}

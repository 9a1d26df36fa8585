//! Record Storage
//! Mission: Persist users, patients and prescriptions in SQLite, or in flat
//! JSON files when no database is configured

pub mod json_file;
pub mod sqlite;

use crate::{
    auth::models::User,
    config::AppConfig,
    models::{Patient, Prescription, PrescriptionStatus},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

/// Which prescriptions to list. Empty filter means all.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrescriptionFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

impl PrescriptionFilter {
    pub fn matches(&self, p: &Prescription) -> bool {
        self.patient_id.map_or(true, |id| p.patient_id == id)
            && self.doctor_id.map_or(true, |id| p.doctor_id == id)
    }
}

/// Storage backend shared by all handlers.
///
/// Listings come back sorted: patients by name, prescriptions newest first.
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    // ===== Users =====

    /// Returns `false` when the email is already taken
    fn insert_user(&self, user: &User) -> Result<bool>;
    fn get_user(&self, id: &Uuid) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user_password(&self, id: &Uuid, password_hash: &str) -> Result<bool>;
    fn delete_user(&self, id: &Uuid) -> Result<bool>;

    // ===== Patients =====

    fn insert_patient(&self, patient: &Patient) -> Result<()>;
    fn get_patient(&self, id: &Uuid) -> Result<Option<Patient>>;
    fn get_patient_by_user(&self, user_id: &Uuid) -> Result<Option<Patient>>;
    /// Patients of `doctor_id` (all when `None`), optionally filtered by a
    /// case-insensitive name/email search
    fn list_patients(&self, doctor_id: Option<&Uuid>, query: Option<&str>)
        -> Result<Vec<Patient>>;
    fn update_patient(&self, patient: &Patient) -> Result<bool>;
    fn delete_patient(&self, id: &Uuid) -> Result<bool>;

    // ===== Prescriptions =====

    fn insert_prescription(&self, prescription: &Prescription) -> Result<()>;
    fn get_prescription(&self, id: &Uuid) -> Result<Option<Prescription>>;
    fn list_prescriptions(&self, filter: PrescriptionFilter) -> Result<Vec<Prescription>>;
    fn update_prescription_status(&self, id: &Uuid, status: PrescriptionStatus) -> Result<bool>;
    fn delete_prescriptions_for_patient(&self, patient_id: &Uuid) -> Result<usize>;
}

/// Open the configured backend: SQLite when a database path is set, JSON files
/// under the data directory otherwise
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let store = SqliteStore::new(path)?;
            info!("📊 Using SQLite storage at {}", path.display());
            Ok(Arc::new(store))
        }
        None => {
            let store = JsonFileStore::new(&config.data_dir)?;
            info!(
                "📁 No database configured, using JSON files in {}",
                config.data_dir.display()
            );
            Ok(Arc::new(store))
        }
    }
}

pub(crate) fn sort_patients(patients: &mut [Patient]) {
    patients.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
}

pub(crate) fn sort_prescriptions(prescriptions: &mut [Prescription]) {
    prescriptions.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
}

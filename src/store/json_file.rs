//! Flat-file fallback storage
//!
//! One JSON array per collection. Every write rewrites the whole file through
//! a temp file and a rename, so readers never see a half-written file. Writers
//! in this process are serialised by `write_lock`; other processes writing the
//! same directory are not coordinated with.

use super::{sort_patients, sort_prescriptions, PrescriptionFilter, Store};
use crate::{
    auth::models::User,
    models::{Patient, Prescription, PrescriptionStatus, StoredPrescription},
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const USERS: &str = "users.json";
const PATIENTS: &str = "patients.json";
const PRESCRIPTIONS: &str = "prescriptions.json";

pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn read<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let path = self.dir.join(collection);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).with_context(|| format!("Corrupt {}", path.display()))
    }

    fn write<T: Serialize>(&self, collection: &str, items: &[T]) -> Result<()> {
        let path = self.dir.join(collection);
        let tmp = self.dir.join(format!("{}.tmp", collection));
        let json = serde_json::to_string_pretty(items).context("Failed to serialize records")?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("Wrote {} records to {}", items.len(), path.display());
        Ok(())
    }

    /// Read-modify-write a collection under the write lock. The file is only
    /// rewritten when `f` reports a change.
    fn modify<T, R, F>(&self, collection: &str, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Vec<T>) -> (R, bool),
    {
        let _guard = self.write_lock.lock();
        let mut items = self.read::<T>(collection)?;
        let (result, changed) = f(&mut items);
        if changed {
            self.write(collection, &items)?;
        }
        Ok(result)
    }

    fn read_prescriptions(&self) -> Result<Vec<Prescription>> {
        Ok(self
            .read::<StoredPrescription>(PRESCRIPTIONS)?
            .into_iter()
            .map(Prescription::from)
            .collect())
    }
}

impl Store for JsonFileStore {
    fn backend(&self) -> &'static str {
        "json"
    }

    fn insert_user(&self, user: &User) -> Result<bool> {
        self.modify(USERS, |users: &mut Vec<User>| {
            if users.iter().any(|u| u.email == user.email) {
                (false, false)
            } else {
                users.push(user.clone());
                (true, true)
            }
        })
    }

    fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.read::<User>(USERS)?.into_iter().find(|u| &u.id == id))
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .read::<User>(USERS)?
            .into_iter()
            .find(|u| u.email == email))
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let mut users = self.read::<User>(USERS)?;
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    fn update_user_password(&self, id: &Uuid, password_hash: &str) -> Result<bool> {
        self.modify(USERS, |users: &mut Vec<User>| {
            match users.iter_mut().find(|u| &u.id == id) {
                Some(user) => {
                    user.password_hash = Some(password_hash.to_string());
                    (true, true)
                }
                None => (false, false),
            }
        })
    }

    fn delete_user(&self, id: &Uuid) -> Result<bool> {
        self.modify(USERS, |users: &mut Vec<User>| {
            let before = users.len();
            users.retain(|u| &u.id != id);
            let removed = users.len() != before;
            (removed, removed)
        })
    }

    fn insert_patient(&self, patient: &Patient) -> Result<()> {
        self.modify(PATIENTS, |patients: &mut Vec<Patient>| {
            patients.push(patient.clone());
            ((), true)
        })
    }

    fn get_patient(&self, id: &Uuid) -> Result<Option<Patient>> {
        Ok(self
            .read::<Patient>(PATIENTS)?
            .into_iter()
            .find(|p| &p.id == id))
    }

    fn get_patient_by_user(&self, user_id: &Uuid) -> Result<Option<Patient>> {
        Ok(self
            .read::<Patient>(PATIENTS)?
            .into_iter()
            .find(|p| &p.user_id == user_id))
    }

    fn list_patients(
        &self,
        doctor_id: Option<&Uuid>,
        query: Option<&str>,
    ) -> Result<Vec<Patient>> {
        let mut patients: Vec<Patient> = self
            .read::<Patient>(PATIENTS)?
            .into_iter()
            .filter(|p| doctor_id.map_or(true, |id| &p.doctor_id == id))
            .filter(|p| query.map_or(true, |q| p.matches(q)))
            .collect();
        sort_patients(&mut patients);
        Ok(patients)
    }

    fn update_patient(&self, patient: &Patient) -> Result<bool> {
        self.modify(PATIENTS, |patients: &mut Vec<Patient>| {
            match patients.iter_mut().find(|p| p.id == patient.id) {
                Some(existing) => {
                    *existing = patient.clone();
                    (true, true)
                }
                None => (false, false),
            }
        })
    }

    fn delete_patient(&self, id: &Uuid) -> Result<bool> {
        self.modify(PATIENTS, |patients: &mut Vec<Patient>| {
            let before = patients.len();
            patients.retain(|p| &p.id != id);
            let removed = patients.len() != before;
            (removed, removed)
        })
    }

    fn insert_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.modify(PRESCRIPTIONS, |items: &mut Vec<StoredPrescription>| {
            items.push(StoredPrescription::from(prescription));
            ((), true)
        })
    }

    fn get_prescription(&self, id: &Uuid) -> Result<Option<Prescription>> {
        Ok(self.read_prescriptions()?.into_iter().find(|p| &p.id == id))
    }

    fn list_prescriptions(&self, filter: PrescriptionFilter) -> Result<Vec<Prescription>> {
        let mut prescriptions: Vec<Prescription> = self
            .read_prescriptions()?
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        sort_prescriptions(&mut prescriptions);
        Ok(prescriptions)
    }

    fn update_prescription_status(&self, id: &Uuid, status: PrescriptionStatus) -> Result<bool> {
        self.modify(PRESCRIPTIONS, |items: &mut Vec<StoredPrescription>| {
            match items.iter_mut().find(|s| &s.prescription.id == id) {
                Some(stored) => {
                    stored.prescription.status = status;
                    (true, true)
                }
                None => (false, false),
            }
        })
    }

    fn delete_prescriptions_for_patient(&self, patient_id: &Uuid) -> Result<usize> {
        self.modify(PRESCRIPTIONS, |items: &mut Vec<StoredPrescription>| {
            let before = items.len();
            items.retain(|s| &s.prescription.patient_id != patient_id);
            let removed = before - items.len();
            (removed, removed > 0)
        })
    }
}

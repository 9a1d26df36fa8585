use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Patient gender as recorded on the prescription
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

/// A patient registered by a doctor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub doctor_id: Uuid,
    /// Login account of the patient
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Age in whole years on `today`
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        today.years_since(self.date_of_birth).unwrap_or(0)
    }

    /// Case-insensitive match against name or email
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        q.is_empty() || self.name.to_lowercase().contains(&q) || self.email.contains(&q)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    Cancelled,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PrescriptionStatus::Active => "active",
            PrescriptionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub diagnosis: String,
    pub medications: Vec<Medication>,
    pub notes: Option<String>,
    pub status: PrescriptionStatus,
    pub issued_at: DateTime<Utc>,
    pub valid_until: Option<NaiveDate>,
    /// Secret embedded in the QR code; never shown in listings
    #[serde(skip_serializing)]
    #[serde(default)]
    pub verification_code: String,
}

/// On-disk form of a prescription. Unlike the API form it keeps the
/// verification code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPrescription {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub verification_code: String,
}

impl From<&Prescription> for StoredPrescription {
    fn from(p: &Prescription) -> Self {
        Self {
            prescription: p.clone(),
            verification_code: p.verification_code.clone(),
        }
    }
}

impl From<StoredPrescription> for Prescription {
    fn from(stored: StoredPrescription) -> Self {
        Prescription {
            verification_code: stored.verification_code,
            ..stored.prescription
        }
    }
}

impl Prescription {
    /// Generate a fresh verification code
    pub fn generate_verification_code() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn is_active(&self) -> bool {
        self.status == PrescriptionStatus::Active
    }

    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.valid_until.map(|d| d < today).unwrap_or(false)
    }

    /// "Jane Mary Doe" -> "J.M.D."
    pub fn patient_initials(&self) -> String {
        self.patient_name
            .split_whitespace()
            .filter_map(|w| w.chars().next())
            .flat_map(|c| c.to_uppercase())
            .map(|c| format!("{}.", c))
            .collect()
    }

    pub fn verification_url(&self, public_base_url: &str) -> String {
        format!(
            "{}/api/verify/{}?code={}",
            public_base_url.trim_end_matches('/'),
            self.id,
            self.verification_code
        )
    }
}

// ===== Request bodies =====

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    /// Initial password for the patient's account; generated when absent
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub patient_id: Uuid,
    pub diagnosis: String,
    pub medications: Vec<Medication>,
    pub notes: Option<String>,
    pub valid_until: Option<NaiveDate>,
}

// ===== Validation =====

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.contains(char::is_whitespace)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn require_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} is required", field))
    } else {
        Ok(())
    }
}

impl CreatePatientRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<(), String> {
        require_non_empty(&self.name, "name")?;
        if !is_valid_email(&self.email) {
            return Err("A valid email is required".to_string());
        }
        if self.date_of_birth > today {
            return Err("date_of_birth cannot be in the future".to_string());
        }
        if let Some(password) = &self.password {
            if password.len() < crate::auth::MIN_PASSWORD_LEN {
                return Err(format!(
                    "Password must be at least {} characters",
                    crate::auth::MIN_PASSWORD_LEN
                ));
            }
        }
        Ok(())
    }
}

impl UpdatePatientRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<(), String> {
        if let Some(name) = &self.name {
            require_non_empty(name, "name")?;
        }
        if let Some(dob) = self.date_of_birth {
            if dob > today {
                return Err("date_of_birth cannot be in the future".to_string());
            }
        }
        Ok(())
    }

    /// Apply the present fields to `patient`
    pub fn apply(self, patient: &mut Patient, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            patient.name = name.trim().to_string();
        }
        if let Some(dob) = self.date_of_birth {
            patient.date_of_birth = dob;
        }
        if let Some(gender) = self.gender {
            patient.gender = gender;
        }
        if self.phone.is_some() {
            patient.phone = self.phone;
        }
        if self.address.is_some() {
            patient.address = self.address;
        }
        if let Some(allergies) = self.allergies {
            patient.allergies = allergies;
        }
        patient.updated_at = now;
    }
}

impl CreatePrescriptionRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<(), String> {
        require_non_empty(&self.diagnosis, "diagnosis")?;
        if self.medications.is_empty() {
            return Err("At least one medication is required".to_string());
        }
        for (i, med) in self.medications.iter().enumerate() {
            let n = i + 1;
            require_non_empty(&med.name, &format!("medications[{}].name", n))?;
            require_non_empty(&med.dosage, &format!("medications[{}].dosage", n))?;
            require_non_empty(&med.frequency, &format!("medications[{}].frequency", n))?;
        }
        if let Some(valid_until) = self.valid_until {
            if valid_until < today {
                return Err("valid_until cannot be in the past".to_string());
            }
        }
        Ok(())
    }
}

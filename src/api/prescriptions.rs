//! Prescriptions - issue, list, download, cancel, and public verification

use super::{display_name, parse_id, ApiError};
use crate::{
    app::AppState,
    auth::{models::AuthUser, require_role, UserRole},
    mail::{prescription_email, send_best_effort},
    models::{CreatePrescriptionRequest, Prescription, PrescriptionStatus},
    pdf::{render_prescription, RenderedPdf},
    store::PrescriptionFilter,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionQuery {
    pub patient_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    pub code: Option<String>,
}

/// Public verification result. Details are only filled in when the code matches.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PrescriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_initials: Option<String>,
}

impl VerificationResponse {
    /// Compare `code` against the stored one and describe the prescription
    pub fn check(prescription: Option<&Prescription>, code: Option<&str>, today: NaiveDate) -> Self {
        let Some(p) = prescription else {
            return Self::default();
        };
        match code {
            Some(code) if !code.is_empty() && code == p.verification_code => Self {
                valid: p.is_active() && !p.is_expired_on(today),
                status: Some(p.status),
                issued_at: Some(p.issued_at),
                valid_until: p.valid_until,
                doctor_name: Some(p.doctor_name.clone()),
                patient_initials: Some(p.patient_initials()),
            },
            _ => Self::default(),
        }
    }
}

fn not_found(id: &Uuid) -> ApiError {
    ApiError::NotFound(format!("Prescription {} not found", id))
}

/// Author, the patient it was written for, or admin
fn can_view(state: &AppState, auth: &AuthUser, p: &Prescription) -> Result<bool, ApiError> {
    Ok(match auth.role {
        UserRole::Admin => true,
        UserRole::Doctor => p.doctor_id == auth.id,
        UserRole::Patient => state
            .store
            .get_patient_by_user(&auth.id)?
            .map_or(false, |own| own.id == p.patient_id),
    })
}

/// Load a prescription the caller may see; others get 404
fn load_visible(state: &AppState, auth: &AuthUser, raw_id: &str) -> Result<Prescription, ApiError> {
    let id = parse_id(raw_id, "prescription")?;
    let prescription = state.store.get_prescription(&id)?.ok_or_else(|| not_found(&id))?;
    if !can_view(state, auth, &prescription)? {
        return Err(not_found(&id));
    }
    Ok(prescription)
}

/// POST /api/prescriptions
pub async fn create_prescription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreatePrescriptionRequest>,
) -> Result<(StatusCode, Json<Prescription>), ApiError> {
    require_role(&auth, &[UserRole::Doctor])?;

    let now = Utc::now();
    payload
        .validate(now.date_naive())
        .map_err(ApiError::BadRequest)?;

    let patient = state
        .store
        .get_patient(&payload.patient_id)?
        .filter(|p| p.doctor_id == auth.id)
        .ok_or_else(|| ApiError::NotFound(format!("Patient {} not found", payload.patient_id)))?;

    let prescription = Prescription {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        doctor_id: auth.id,
        patient_name: patient.name.clone(),
        doctor_name: display_name(&state, &auth)?,
        diagnosis: payload.diagnosis.trim().to_string(),
        medications: payload.medications,
        notes: payload.notes.filter(|n| !n.trim().is_empty()),
        status: PrescriptionStatus::Active,
        issued_at: now,
        valid_until: payload.valid_until,
        verification_code: Prescription::generate_verification_code(),
    };
    state.store.insert_prescription(&prescription)?;

    info!(
        prescription_id = %prescription.id,
        patient_id = %patient.id,
        medications = prescription.medications.len(),
        "💊 Prescription issued by {}",
        auth.email
    );

    let base_url = &state.config.public_base_url;
    let verification_url = prescription.verification_url(base_url);
    let attachment = match render_prescription(&prescription, Some(&patient), &verification_url) {
        Ok(pdf) => Some((RenderedPdf::filename(&prescription), pdf.bytes)),
        Err(e) => {
            warn!(prescription_id = %prescription.id, "PDF rendering failed, emailing without attachment: {:#}", e);
            None
        }
    };
    let email = prescription_email(&prescription, &patient.email, base_url, attachment);
    send_best_effort(state.mailer.as_ref(), email).await;

    Ok((StatusCode::CREATED, Json(prescription)))
}

/// GET /api/prescriptions?patient_id=
pub async fn list_prescriptions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(params): Query<PrescriptionQuery>,
) -> Result<Json<Vec<Prescription>>, ApiError> {
    let requested = params
        .patient_id
        .as_deref()
        .map(|raw| parse_id(raw, "patient"))
        .transpose()?;

    let filter = match auth.role {
        UserRole::Admin => PrescriptionFilter {
            patient_id: requested,
            doctor_id: None,
        },
        UserRole::Doctor => PrescriptionFilter {
            patient_id: requested,
            doctor_id: Some(auth.id),
        },
        UserRole::Patient => {
            let own = state
                .store
                .get_patient_by_user(&auth.id)?
                .ok_or_else(|| ApiError::NotFound("Patient profile not found".to_string()))?;
            if requested.is_some_and(|id| id != own.id) {
                return Ok(Json(Vec::new()));
            }
            PrescriptionFilter {
                patient_id: Some(own.id),
                doctor_id: None,
            }
        }
    };

    Ok(Json(state.store.list_prescriptions(filter)?))
}

/// GET /api/prescriptions/:id
pub async fn get_prescription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Prescription>, ApiError> {
    Ok(Json(load_visible(&state, &auth, &id)?))
}

/// GET /api/prescriptions/:id/pdf
pub async fn download_pdf(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let prescription = load_visible(&state, &auth, &id)?;
    let patient = state.store.get_patient(&prescription.patient_id)?;

    let verification_url = prescription.verification_url(&state.config.public_base_url);
    let pdf = render_prescription(&prescription, patient.as_ref(), &verification_url)?;

    info!(
        prescription_id = %prescription.id,
        pages = pdf.pages,
        bytes = pdf.bytes.len(),
        "📄 PDF downloaded by {}",
        auth.email
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", RenderedPdf::filename(&prescription)),
            ),
        ],
        pdf.bytes,
    )
        .into_response())
}

/// POST /api/prescriptions/:id/cancel
pub async fn cancel_prescription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Prescription>, ApiError> {
    require_role(&auth, &[UserRole::Doctor])?;

    let mut prescription = load_visible(&state, &auth, &id)?;
    if !prescription.is_active() {
        return Err(ApiError::Conflict("Prescription already cancelled".to_string()));
    }

    if !state
        .store
        .update_prescription_status(&prescription.id, PrescriptionStatus::Cancelled)?
    {
        return Err(not_found(&prescription.id));
    }
    prescription.status = PrescriptionStatus::Cancelled;

    info!(prescription_id = %prescription.id, "🚫 Prescription cancelled by {}", auth.email);
    Ok(Json(prescription))
}

/// GET /api/verify/:id?code= (public)
pub async fn verify_prescription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<VerifyQuery>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let prescription = match Uuid::parse_str(&id) {
        Ok(id) => state.store.get_prescription(&id)?,
        Err(_) => None,
    };

    let result = VerificationResponse::check(
        prescription.as_ref(),
        params.code.as_deref(),
        Utc::now().date_naive(),
    );
    if prescription.is_some() && result.status.is_none() {
        warn!(prescription_id = %id, "Verification attempted with wrong code");
    }

    Ok(Json(result))
}

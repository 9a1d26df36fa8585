//! Patient records - registered and maintained by doctors

use super::{display_name, parse_id, ApiError};
use crate::{
    app::AppState,
    auth::{api::create_local_user, models::AuthUser, password::generate_password, require_role, UserRole},
    mail::{send_best_effort, welcome_email},
    models::{normalize_email, CreatePatientRequest, Patient, UpdatePatientRequest},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct PatientQuery {
    pub q: Option<String>,
}

/// Owning doctor, admin, or the patient themselves
pub(crate) fn can_view_patient(auth: &AuthUser, patient: &Patient) -> bool {
    match auth.role {
        UserRole::Admin => true,
        UserRole::Doctor => patient.doctor_id == auth.id,
        UserRole::Patient => patient.user_id == auth.id,
    }
}

fn load_patient(state: &AppState, id: &Uuid) -> Result<Patient, ApiError> {
    state
        .store
        .get_patient(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Patient {} not found", id)))
}

/// POST /api/patients
pub async fn create_patient(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    require_role(&auth, &[UserRole::Doctor])?;

    let now = Utc::now();
    payload
        .validate(now.date_naive())
        .map_err(ApiError::BadRequest)?;

    let email = normalize_email(&payload.email);
    let (password, generated) = match payload.password {
        Some(password) => (password, false),
        None => (generate_password(), true),
    };

    let patient_id = Uuid::new_v4();
    let user = create_local_user(
        &state,
        &payload.name,
        &email,
        &password,
        UserRole::Patient,
        Some(patient_id),
    )?
    .ok_or_else(|| ApiError::Conflict(format!("Email {} already registered", email)))?;

    let patient = Patient {
        id: patient_id,
        doctor_id: auth.id,
        user_id: user.id,
        name: payload.name.trim().to_string(),
        email,
        date_of_birth: payload.date_of_birth,
        gender: payload.gender,
        phone: payload.phone,
        address: payload.address,
        allergies: payload.allergies,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = state.store.insert_patient(&patient) {
        // Don't leave a login without a record behind
        if let Err(cleanup) = state.store.delete_user(&user.id) {
            error!("Failed to remove orphaned patient account {}: {:#}", user.id, cleanup);
        }
        return Err(e.into());
    }

    info!(
        patient_id = %patient.id,
        doctor = %auth.email,
        "👤 Patient registered: {}",
        patient.email
    );

    let doctor_name = display_name(&state, &auth)?;
    let email = welcome_email(
        &patient,
        &doctor_name,
        generated.then_some(password.as_str()),
        &state.config.public_base_url,
    );
    send_best_effort(state.mailer.as_ref(), email).await;

    Ok((StatusCode::CREATED, Json(patient)))
}

/// GET /api/patients?q=
pub async fn list_patients(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(params): Query<PatientQuery>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    require_role(&auth, &[UserRole::Doctor, UserRole::Admin])?;

    let doctor_id = auth.is(UserRole::Doctor).then_some(auth.id);
    let patients = state
        .store
        .list_patients(doctor_id.as_ref(), params.q.as_deref())?;

    Ok(Json(patients))
}

/// GET /api/patients/me
pub async fn my_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Patient>, ApiError> {
    require_role(&auth, &[UserRole::Patient])?;

    let patient = state
        .store
        .get_patient_by_user(&auth.id)?
        .ok_or_else(|| ApiError::NotFound("Patient profile not found".to_string()))?;

    Ok(Json(patient))
}

/// GET /api/patients/:id
pub async fn get_patient(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Patient>, ApiError> {
    let id = parse_id(&id, "patient")?;
    let patient = load_patient(&state, &id)?;

    // Someone else's patient looks the same as a missing one
    if !can_view_patient(&auth, &patient) {
        return Err(ApiError::NotFound(format!("Patient {} not found", id)));
    }

    Ok(Json(patient))
}

/// PUT /api/patients/:id
pub async fn update_patient(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePatientRequest>,
) -> Result<Json<Patient>, ApiError> {
    require_role(&auth, &[UserRole::Doctor])?;
    let id = parse_id(&id, "patient")?;

    let now = Utc::now();
    payload
        .validate(now.date_naive())
        .map_err(ApiError::BadRequest)?;

    let mut patient = load_patient(&state, &id)?;
    if patient.doctor_id != auth.id {
        return Err(ApiError::NotFound(format!("Patient {} not found", id)));
    }

    payload.apply(&mut patient, now);
    if !state.store.update_patient(&patient)? {
        return Err(ApiError::NotFound(format!("Patient {} not found", id)));
    }

    info!(patient_id = %patient.id, "✏️ Patient updated");
    Ok(Json(patient))
}

/// DELETE /api/patients/:id
/// Removes the record, the patient's prescriptions and their login account.
pub async fn delete_patient(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_role(&auth, &[UserRole::Doctor, UserRole::Admin])?;
    let id = parse_id(&id, "patient")?;

    let patient = load_patient(&state, &id)?;
    if auth.is(UserRole::Doctor) && patient.doctor_id != auth.id {
        return Err(ApiError::NotFound(format!("Patient {} not found", id)));
    }

    let removed = state.store.delete_prescriptions_for_patient(&patient.id)?;
    state.store.delete_patient(&patient.id)?;
    state.store.delete_user(&patient.user_id)?;

    info!(
        patient_id = %patient.id,
        prescriptions = removed,
        by = %auth.email,
        "🗑️ Patient deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;
    use chrono::NaiveDate;

    fn auth(role: UserRole) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: "someone@example.org".to_string(),
            role,
        }
    }

    fn patient_of(doctor_id: Uuid, user_id: Uuid) -> Patient {
        let now = Utc::now();
        Patient {
            id: Uuid::new_v4(),
            doctor_id,
            user_id,
            name: "Jane Doe".to_string(),
            email: "jane@example.org".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::Female,
            phone: None,
            address: None,
            allergies: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_patient_visibility() {
        let doctor = auth(UserRole::Doctor);
        let other_doctor = auth(UserRole::Doctor);
        let patient_user = auth(UserRole::Patient);
        let stranger = auth(UserRole::Patient);
        let admin = auth(UserRole::Admin);

        let patient = patient_of(doctor.id, patient_user.id);

        assert!(can_view_patient(&doctor, &patient));
        assert!(can_view_patient(&patient_user, &patient));
        assert!(can_view_patient(&admin, &patient));
        assert!(!can_view_patient(&other_doctor, &patient));
        assert!(!can_view_patient(&stranger, &patient));
    }
}

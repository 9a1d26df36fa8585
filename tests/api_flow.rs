//! End-to-end tests through the full router
//!
//! Every flow runs against both storage backends. Emails are captured by a
//! recording mailer instead of going out over SMTP.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use medscript_backend::{
    app::{build_router, seed_admin, AppState},
    config::{AppConfig, RateLimitSettings, SeedAdmin},
    mail::{Mailer, OutgoingEmail},
    middleware::RateLimitLayer,
    store::{open_store, Store},
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

const ADMIN_EMAIL: &str = "admin@clinic.test";
const ADMIN_PASSWORD: &str = "admin-password";

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.sent.lock().push(email);
        Ok(())
    }
}

impl RecordingMailer {
    fn last_to(&self, to: &str) -> Option<OutgoingEmail> {
        self.sent.lock().iter().rev().find(|e| e.to == to).cloned()
    }
}

#[derive(Clone, Copy)]
enum Backend {
    Json,
    Sqlite,
}

struct TestApp {
    router: Router,
    store: Arc<dyn Store>,
    mailer: Arc<RecordingMailer>,
    _dir: TempDir,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    bytes: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        if self.bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.bytes).unwrap()
        }
    }
}

fn test_config(dir: &TempDir, backend: Backend) -> AppConfig {
    let mut config = AppConfig::default();
    config.data_dir = dir.path().join("data");
    if let Backend::Sqlite = backend {
        config.database_path = Some(dir.path().join("medscript.db"));
    }
    config.public_base_url = "https://rx.clinic.test".to_string();
    config.auth.jwt_secret = "integration-test-secret-integration-test".to_string();
    config.auth.bcrypt_cost = 4;
    config.seed_admin = Some(SeedAdmin {
        email: ADMIN_EMAIL.to_string(),
        password: ADMIN_PASSWORD.to_string(),
        name: "Admin".to_string(),
    });
    config
}

fn spawn_app_with(backend: Backend, tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, backend);
    tweak(&mut config);

    let store = open_store(&config).unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let limiter = RateLimitLayer::new(config.rate_limit.to_layer_config());
    let state = AppState::new(config, store.clone(), mailer.clone()).unwrap();
    seed_admin(&state).unwrap();

    TestApp {
        router: build_router(state, limiter),
        store,
        mailer,
        _dir: dir,
    }
}

fn spawn_app(backend: Backend) -> TestApp {
    spawn_app_with(backend, |_| {})
}

impl TestApp {
    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        Reply {
            status,
            headers,
            bytes,
        }
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> Reply {
        self.request(Method::GET, uri, token, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Reply {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    async fn login(&self, email: &str, password: &str) -> Reply {
        self.post(
            "/api/auth/login",
            None,
            json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn token_for(&self, email: &str, password: &str) -> String {
        let reply = self.login(email, password).await;
        assert_eq!(reply.status, StatusCode::OK, "login failed for {}", email);
        reply.json()["token"].as_str().unwrap().to_string()
    }

    async fn register_doctor(&self, name: &str, email: &str) -> String {
        let reply = self
            .post(
                "/api/auth/register",
                None,
                json!({ "name": name, "email": email, "password": "doctor-password" }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        reply.json()["token"].as_str().unwrap().to_string()
    }

    async fn create_patient(&self, doctor: &str, name: &str, email: &str) -> Value {
        let reply = self
            .post(
                "/api/patients",
                Some(doctor),
                json!({
                    "name": name,
                    "email": email,
                    "date_of_birth": "1985-06-15",
                    "gender": "female",
                    "allergies": ["penicillin"],
                }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        reply.json()
    }

    async fn create_prescription(&self, doctor: &str, patient_id: &str) -> Reply {
        self.post(
            "/api/prescriptions",
            Some(doctor),
            json!({
                "patient_id": patient_id,
                "diagnosis": "Seasonal influenza",
                "medications": [
                    { "name": "Oseltamivir", "dosage": "75mg", "frequency": "twice daily", "duration": "5 days" },
                    { "name": "Paracetamol", "dosage": "500mg", "frequency": "as needed" }
                ],
                "notes": "Rest and fluids",
            }),
        )
        .await
    }

    /// Password from the welcome email sent to `email`
    fn temporary_password(&self, email: &str) -> String {
        let welcome = self.mailer.last_to(email).expect("welcome email");
        welcome
            .body
            .lines()
            .find_map(|l| l.strip_prefix("Temporary password: "))
            .expect("generated password in welcome email")
            .trim()
            .to_string()
    }

    fn verification_code(&self, prescription_id: &str) -> String {
        let id = Uuid::parse_str(prescription_id).unwrap();
        self.store
            .get_prescription(&id)
            .unwrap()
            .unwrap()
            .verification_code
    }
}

async fn full_flow(app: TestApp, storage: &str) {
    let health = app.get("/health", None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.json()["storage"], storage);

    // ===== Doctor registration and login =====
    let doctor = app.register_doctor("Dr. Gregory House", "house@clinic.test").await;

    let duplicate = app
        .post(
            "/api/auth/register",
            None,
            json!({ "name": "Someone", "email": "HOUSE@clinic.test", "password": "another-password" }),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    assert_eq!(
        app.login("house@clinic.test", "wrong-password").await.status,
        StatusCode::UNAUTHORIZED
    );
    let login = app.login("House@Clinic.test", "doctor-password").await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.json()["role"], "doctor");

    let me = app.get("/api/auth/me", Some(&doctor)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json()["email"], "house@clinic.test");
    assert!(me.json().get("password_hash").is_none());

    // ===== Patient registration =====
    let patient = app
        .create_patient(&doctor, "Jane Mary Doe", "jane@patients.test")
        .await;
    let patient_id = patient["id"].as_str().unwrap().to_string();
    assert_eq!(patient["allergies"], json!(["penicillin"]));

    let password = app.temporary_password("jane@patients.test");
    assert_eq!(password.len(), 12);

    let again = app
        .post(
            "/api/patients",
            Some(&doctor),
            json!({
                "name": "Jane Again",
                "email": "jane@patients.test",
                "date_of_birth": "1985-06-15",
                "gender": "female",
            }),
        )
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);

    let patient_token = app.token_for("jane@patients.test", &password).await;
    let profile = app.get("/api/patients/me", Some(&patient_token)).await;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.json()["id"], patient_id.as_str());

    // Patients cannot register patients or list them
    let forbidden = app
        .post(
            "/api/patients",
            Some(&patient_token),
            json!({
                "name": "Eve",
                "email": "eve@patients.test",
                "date_of_birth": "1990-01-01",
                "gender": "female",
            }),
        )
        .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
    assert_eq!(
        app.get("/api/patients", Some(&patient_token)).await.status,
        StatusCode::FORBIDDEN
    );

    let search = app.get("/api/patients?q=mary", Some(&doctor)).await;
    assert_eq!(search.json().as_array().unwrap().len(), 1);
    let miss = app.get("/api/patients?q=nobody", Some(&doctor)).await;
    assert!(miss.json().as_array().unwrap().is_empty());

    let updated = app
        .request(
            Method::PUT,
            &format!("/api/patients/{}", patient_id),
            Some(&doctor),
            Some(json!({ "phone": "+1 555 0100" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.json()["phone"], "+1 555 0100");
    assert_eq!(updated.json()["name"], "Jane Mary Doe");

    // ===== Prescriptions =====
    let created = app.create_prescription(&doctor, &patient_id).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let prescription = created.json();
    let rx_id = prescription["id"].as_str().unwrap().to_string();
    assert_eq!(prescription["status"], "active");
    assert_eq!(prescription["doctor_name"], "Dr. Gregory House");
    assert!(prescription.get("verification_code").is_none());

    let notification = app.mailer.last_to("jane@patients.test").unwrap();
    assert!(notification.subject.contains("Dr. Gregory House"));
    let attachment = notification.attachment.expect("pdf attachment");
    assert_eq!(attachment.filename, format!("prescription-{}.pdf", rx_id));
    assert!(attachment.bytes.starts_with(b"%PDF"));

    let as_patient = app.get("/api/prescriptions", Some(&patient_token)).await;
    assert_eq!(as_patient.json().as_array().unwrap().len(), 1);
    let as_doctor = app
        .get(&format!("/api/prescriptions?patient_id={}", patient_id), Some(&doctor))
        .await;
    assert_eq!(as_doctor.json().as_array().unwrap().len(), 1);

    // Another doctor sees nothing and cannot touch it
    let other = app.register_doctor("Dr. Other", "other@clinic.test").await;
    let other_list = app.get("/api/prescriptions", Some(&other)).await;
    assert!(other_list.json().as_array().unwrap().is_empty());
    assert_eq!(
        app.get(&format!("/api/prescriptions/{}", rx_id), Some(&other)).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get(&format!("/api/patients/{}", patient_id), Some(&other)).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.create_prescription(&other, &patient_id).await.status,
        StatusCode::NOT_FOUND
    );

    // ===== PDF download =====
    let pdf = app
        .get(&format!("/api/prescriptions/{}/pdf", rx_id), Some(&patient_token))
        .await;
    assert_eq!(pdf.status, StatusCode::OK);
    assert_eq!(pdf.headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        pdf.headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"prescription-{}.pdf\"", rx_id).as_str()
    );
    assert!(pdf.bytes.starts_with(b"%PDF"));

    let via_query = app
        .get(
            &format!("/api/prescriptions/{}/pdf?token={}", rx_id, patient_token),
            None,
        )
        .await;
    assert_eq!(via_query.status, StatusCode::OK);
    assert_eq!(
        app.get(&format!("/api/prescriptions/{}/pdf", rx_id), None).await.status,
        StatusCode::UNAUTHORIZED
    );

    // ===== Verification =====
    let code = app.verification_code(&rx_id);
    let verified = app
        .get(&format!("/api/verify/{}?code={}", rx_id, code), None)
        .await;
    assert_eq!(verified.status, StatusCode::OK);
    let verified = verified.json();
    assert_eq!(verified["valid"], true);
    assert_eq!(verified["status"], "active");
    assert_eq!(verified["patient_initials"], "J.M.D.");
    assert_eq!(verified["doctor_name"], "Dr. Gregory House");

    let wrong = app
        .get(&format!("/api/verify/{}?code=not-the-code", rx_id), None)
        .await;
    assert_eq!(wrong.json(), json!({ "valid": false }));
    let unknown = app.get("/api/verify/not-a-uuid", None).await;
    assert_eq!(unknown.json(), json!({ "valid": false }));

    // ===== Cancellation =====
    let cancel_uri = format!("/api/prescriptions/{}/cancel", rx_id);
    assert_eq!(
        app.post(&cancel_uri, Some(&patient_token), json!({})).await.status,
        StatusCode::FORBIDDEN
    );
    let cancelled = app.post(&cancel_uri, Some(&doctor), json!({})).await;
    assert_eq!(cancelled.status, StatusCode::OK);
    assert_eq!(cancelled.json()["status"], "cancelled");
    assert_eq!(
        app.post(&cancel_uri, Some(&doctor), json!({})).await.status,
        StatusCode::CONFLICT
    );

    let after_cancel = app
        .get(&format!("/api/verify/{}?code={}", rx_id, code), None)
        .await
        .json();
    assert_eq!(after_cancel["valid"], false);
    assert_eq!(after_cancel["status"], "cancelled");

    // Cancelled prescriptions remain downloadable
    assert_eq!(
        app.get(&format!("/api/prescriptions/{}/pdf", rx_id), Some(&doctor))
            .await
            .status,
        StatusCode::OK
    );

    // ===== Admin =====
    let admin = app.token_for(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let users = app.get("/api/admin/users", Some(&admin)).await;
    assert_eq!(users.status, StatusCode::OK);
    assert_eq!(users.json().as_array().unwrap().len(), 4);
    assert_eq!(
        app.get("/api/admin/users", Some(&doctor)).await.status,
        StatusCode::FORBIDDEN
    );

    let admin_id = app.get("/api/auth/me", Some(&admin)).await.json()["id"]
        .as_str()
        .unwrap()
        .to_string();
    let self_delete = app
        .request(
            Method::DELETE,
            &format!("/api/admin/users/{}", admin_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(self_delete.status, StatusCode::BAD_REQUEST);

    let all_patients = app.get("/api/patients", Some(&admin)).await;
    assert_eq!(all_patients.json().as_array().unwrap().len(), 1);

    // ===== Patient deletion cascades =====
    let deleted = app
        .request(
            Method::DELETE,
            &format!("/api/patients/{}", patient_id),
            Some(&doctor),
            None,
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(
        app.login("jane@patients.test", &password).await.status,
        StatusCode::UNAUTHORIZED
    );
    let remaining = app.get("/api/prescriptions", Some(&doctor)).await;
    assert!(remaining.json().as_array().unwrap().is_empty());
    assert_eq!(
        app.get("/api/auth/me", Some(&patient_token)).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_full_flow_json_storage() {
    full_flow(spawn_app(Backend::Json), "json").await;
}

#[tokio::test]
async fn test_full_flow_sqlite_storage() {
    full_flow(spawn_app(Backend::Sqlite), "sqlite").await;
}

async fn account_deletion_flow(app: TestApp) {
    let admin = app.token_for(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let doctor = app.register_doctor("Dr. Leaving", "leaving@clinic.test").await;
    let doctor_id = app.get("/api/auth/me", Some(&doctor)).await.json()["id"]
        .as_str()
        .unwrap()
        .to_string();

    // ===== Deleting a patient account removes the record and its prescriptions =====
    let patient = app
        .create_patient(&doctor, "Ada Gone", "ada@patients.test")
        .await;
    let patient_id = patient["id"].as_str().unwrap().to_string();
    let patient_user_id = patient["user_id"].as_str().unwrap().to_string();
    let password = app.temporary_password("ada@patients.test");
    let patient_token = app.token_for("ada@patients.test", &password).await;

    let created = app.create_prescription(&doctor, &patient_id).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let rx_id = created.json()["id"].as_str().unwrap().to_string();

    let deleted = app
        .request(
            Method::DELETE,
            &format!("/api/admin/users/{}", patient_user_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    assert_eq!(
        app.login("ada@patients.test", &password).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.get("/api/patients/me", Some(&patient_token)).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.get(&format!("/api/patients/{}", patient_id), Some(&admin)).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get(&format!("/api/prescriptions/{}", rx_id), Some(&admin)).await.status,
        StatusCode::NOT_FOUND
    );
    assert!(app
        .get("/api/prescriptions", Some(&doctor))
        .await
        .json()
        .as_array()
        .unwrap()
        .is_empty());
    let rx_uuid = Uuid::parse_str(&rx_id).unwrap();
    assert!(app.store.get_prescription(&rx_uuid).unwrap().is_none());

    let again = app
        .request(
            Method::DELETE,
            &format!("/api/admin/users/{}", patient_user_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);

    // ===== Deleting a doctor keeps their patients and revokes their token =====
    let kept = app
        .create_patient(&doctor, "Bea Stays", "bea@patients.test")
        .await;
    let kept_id = kept["id"].as_str().unwrap().to_string();

    let deleted = app
        .request(
            Method::DELETE,
            &format!("/api/admin/users/{}", doctor_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let stale = app
        .post(
            "/api/patients",
            Some(&doctor),
            json!({
                "name": "Never Created",
                "email": "never@patients.test",
                "date_of_birth": "1980-02-02",
                "gender": "male",
            }),
        )
        .await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.get("/api/auth/me", Some(&doctor)).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login("leaving@clinic.test", "doctor-password").await.status,
        StatusCode::UNAUTHORIZED
    );

    let survivor = app
        .get(&format!("/api/patients/{}", kept_id), Some(&admin))
        .await;
    assert_eq!(survivor.status, StatusCode::OK);
    assert_eq!(survivor.json()["doctor_id"], doctor_id.as_str());
    let all_patients = app.get("/api/patients", Some(&admin)).await.json();
    let ids: Vec<&str> = all_patients
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert_eq!(ids, vec![kept_id.as_str()]);

    // The surviving patient can still sign in
    let kept_password = app.temporary_password("bea@patients.test");
    let kept_token = app.token_for("bea@patients.test", &kept_password).await;
    assert_eq!(
        app.get("/api/patients/me", Some(&kept_token)).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_account_deletion_json_storage() {
    account_deletion_flow(spawn_app(Backend::Json)).await;
}

#[tokio::test]
async fn test_account_deletion_sqlite_storage() {
    account_deletion_flow(spawn_app(Backend::Sqlite)).await;
}

#[tokio::test]
async fn test_patient_with_chosen_password_gets_no_temporary_one() {
    let app = spawn_app(Backend::Json);
    let doctor = app.register_doctor("Dr. Quinn", "quinn@clinic.test").await;

    let reply = app
        .post(
            "/api/patients",
            Some(&doctor),
            json!({
                "name": "Sully",
                "email": "sully@patients.test",
                "date_of_birth": "1970-03-03",
                "gender": "male",
                "password": "chosen-password",
            }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let welcome = app.mailer.last_to("sully@patients.test").unwrap();
    assert!(!welcome.body.contains("Temporary password"));
    app.token_for("sully@patients.test", "chosen-password").await;
}

#[tokio::test]
async fn test_validation_errors() {
    let app = spawn_app(Backend::Sqlite);

    let weak = app
        .post(
            "/api/auth/register",
            None,
            json!({ "name": "Dr. Short", "email": "short@clinic.test", "password": "short" }),
        )
        .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);

    let doctor = app.register_doctor("Dr. Valid", "valid@clinic.test").await;
    let future_birth = app
        .post(
            "/api/patients",
            Some(&doctor),
            json!({
                "name": "Baby",
                "email": "baby@patients.test",
                "date_of_birth": "2999-01-01",
                "gender": "other",
            }),
        )
        .await;
    assert_eq!(future_birth.status, StatusCode::BAD_REQUEST);

    let patient = app
        .create_patient(&doctor, "Has Patient", "has@patients.test")
        .await;
    let no_meds = app
        .post(
            "/api/prescriptions",
            Some(&doctor),
            json!({ "patient_id": patient["id"], "diagnosis": "Cold", "medications": [] }),
        )
        .await;
    assert_eq!(no_meds.status, StatusCode::BAD_REQUEST);
    assert!(no_meds.json()["error"].as_str().unwrap().contains("medication"));

    let bad_id = app.get("/api/prescriptions/not-a-uuid", Some(&doctor)).await;
    assert_eq!(bad_id.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_password_change() {
    let app = spawn_app(Backend::Json);
    let doctor = app.register_doctor("Dr. Change", "change@clinic.test").await;

    let wrong = app
        .request(
            Method::PUT,
            "/api/auth/password",
            Some(&doctor),
            Some(json!({ "current_password": "nope-nope", "new_password": "brand-new-password" })),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let changed = app
        .request(
            Method::PUT,
            "/api/auth/password",
            Some(&doctor),
            Some(json!({ "current_password": "doctor-password", "new_password": "brand-new-password" })),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK);

    assert_eq!(
        app.login("change@clinic.test", "doctor-password").await.status,
        StatusCode::UNAUTHORIZED
    );
    app.token_for("change@clinic.test", "brand-new-password").await;
}

#[tokio::test]
async fn test_google_login_requires_configuration() {
    let app = spawn_app(Backend::Json);
    let reply = app
        .post("/api/auth/google", None, json!({ "id_token": "a.b.c" }))
        .await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_invalid_tokens_rejected() {
    let app = spawn_app(Backend::Json);
    assert_eq!(
        app.get("/api/patients", None).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.get("/api/patients", Some("garbage")).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_auth_routes_are_rate_limited() {
    let app = spawn_app_with(Backend::Json, |config| {
        config.rate_limit = RateLimitSettings {
            max_requests: 2,
            window_secs: 60,
            burst: 0,
        };
    });

    for _ in 0..2 {
        assert_eq!(
            app.login("nobody@clinic.test", "whatever-password").await.status,
            StatusCode::UNAUTHORIZED
        );
    }
    let limited = app.login("nobody@clinic.test", "whatever-password").await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers.contains_key("retry-after"));

    // Protected and public routes are not limited
    assert_eq!(app.get("/health", None).await.status, StatusCode::OK);
}

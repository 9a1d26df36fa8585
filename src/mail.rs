//! Email Notifications
//! Mission: Tell patients about their account and new prescriptions
//!
//! Delivery is best-effort: callers log failures and carry on.

use crate::{
    config::SmtpConfig,
    models::{Patient, Prescription},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<EmailAttachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

/// Send and log the outcome; never fails the caller
pub async fn send_best_effort(mailer: &dyn Mailer, email: OutgoingEmail) {
    let to = email.to.clone();
    let subject = email.subject.clone();
    match mailer.send(email).await {
        Ok(()) => info!(to = %to, subject = %subject, "📧 Email sent"),
        Err(e) => warn!(to = %to, subject = %subject, error = %e, "Email delivery failed"),
    }
}

/// SMTP delivery through a STARTTLS relay
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("Invalid SMTP host {}", config.host))?
            .port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = config
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid SMTP_FROM address {}", config.from))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: OutgoingEmail) -> Result<Message> {
        let to = email
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid recipient {}", email.to))?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject);

        let message = match email.attachment {
            Some(attachment) => {
                let content_type = ContentType::parse(&attachment.content_type)
                    .context("Invalid attachment content type")?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(email.body))
                        .singlepart(
                            Attachment::new(attachment.filename)
                                .body(attachment.bytes, content_type),
                        ),
                )?
            }
            None => builder.header(ContentType::TEXT_PLAIN).body(email.body)?,
        };
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        Ok(())
    }
}

/// Used when SMTP is not configured: logs instead of sending
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachment = email.attachment.as_ref().map(|a| a.filename.as_str()).unwrap_or("-"),
            "SMTP disabled, email not delivered"
        );
        Ok(())
    }
}

// ===== Templates =====

pub fn welcome_email(
    patient: &Patient,
    doctor_name: &str,
    generated_password: Option<&str>,
    public_base_url: &str,
) -> OutgoingEmail {
    let mut body = format!(
        "Hello {},\n\n{} has registered you so you can view and download your prescriptions online.\n\nSign in at {} with your email address: {}\n",
        patient.name,
        doctor_name,
        public_base_url.trim_end_matches('/'),
        patient.email
    );
    if let Some(password) = generated_password {
        body.push_str(&format!(
            "Temporary password: {}\n\nPlease change it after your first sign-in.\n",
            password
        ));
    }
    body.push_str("\nThis is an automated message.\n");

    OutgoingEmail {
        to: patient.email.clone(),
        subject: "Your patient account is ready".to_string(),
        body,
        attachment: None,
    }
}

pub fn prescription_email(
    prescription: &Prescription,
    patient_email: &str,
    public_base_url: &str,
    pdf: Option<(String, Vec<u8>)>,
) -> OutgoingEmail {
    let medications = prescription
        .medications
        .iter()
        .map(|m| format!("  - {} {} ({})", m.name, m.dosage, m.frequency))
        .collect::<Vec<_>>()
        .join("\n");

    let body = format!(
        "Hello {},\n\n{} has issued you a new prescription.\n\nDiagnosis: {}\nMedications:\n{}\n\nView it at {}/api/prescriptions/{}\n{}\nThis is an automated message.\n",
        prescription.patient_name,
        prescription.doctor_name,
        prescription.diagnosis,
        medications,
        public_base_url.trim_end_matches('/'),
        prescription.id,
        if pdf.is_some() {
            "The prescription is attached as a PDF.\n"
        } else {
            ""
        },
    );

    OutgoingEmail {
        to: patient_email.to_string(),
        subject: format!("New prescription from {}", prescription.doctor_name),
        body,
        attachment: pdf.map(|(filename, bytes)| EmailAttachment {
            filename,
            content_type: "application/pdf".to_string(),
            bytes,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, Medication, PrescriptionStatus};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn patient() -> Patient {
        let now = Utc::now();
        Patient {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Jane Doe".to_string(),
            email: "jane@example.org".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 2).unwrap(),
            gender: Gender::Female,
            phone: None,
            address: None,
            allergies: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.org".to_string(),
            port: 587,
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            from: "Clinic <clinic@example.org>".to_string(),
        }
    }

    #[test]
    fn test_welcome_email_includes_generated_password() {
        let email = welcome_email(&patient(), "Dr. Who", Some("Abc123xyz789"), "https://rx.example.org/");
        assert_eq!(email.to, "jane@example.org");
        assert!(email.body.contains("Abc123xyz789"));
        assert!(email.body.contains("https://rx.example.org with"));

        let without = welcome_email(&patient(), "Dr. Who", None, "https://rx.example.org");
        assert!(!without.body.contains("Temporary password"));
    }

    #[test]
    fn test_prescription_email_attaches_pdf() {
        let p = Prescription {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_name: "Jane Doe".to_string(),
            doctor_name: "Dr. Who".to_string(),
            diagnosis: "Flu".to_string(),
            medications: vec![Medication {
                name: "Oseltamivir".to_string(),
                dosage: "75mg".to_string(),
                frequency: "twice daily".to_string(),
                duration: None,
                instructions: None,
            }],
            notes: None,
            status: PrescriptionStatus::Active,
            issued_at: Utc::now(),
            valid_until: None,
            verification_code: "code".to_string(),
        };
        let email = prescription_email(
            &p,
            "jane@example.org",
            "http://localhost:3000",
            Some(("rx.pdf".to_string(), b"%PDF-1.3".to_vec())),
        );
        assert_eq!(email.subject, "New prescription from Dr. Who");
        assert!(email.body.contains("Oseltamivir 75mg (twice daily)"));
        let attachment = email.attachment.unwrap();
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.filename, "rx.pdf");
    }

    #[test]
    fn test_smtp_message_building() {
        let mailer = SmtpMailer::new(&smtp_config()).unwrap();
        let email = OutgoingEmail {
            to: "jane@example.org".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
            attachment: Some(EmailAttachment {
                filename: "rx.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: b"%PDF-1.3".to_vec(),
            }),
        };
        let formatted = String::from_utf8(mailer.build_message(email).unwrap().formatted()).unwrap();
        assert!(formatted.contains("Subject: Hello"));
        assert!(formatted.contains("rx.pdf"));

        let bad = OutgoingEmail {
            to: "not an address".to_string(),
            subject: "x".to_string(),
            body: "x".to_string(),
            attachment: None,
        };
        assert!(mailer.build_message(bad).is_err());
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut config = smtp_config();
        config.from = "nope".to_string();
        assert!(SmtpMailer::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_log_mailer_never_fails() {
        let email = welcome_email(&patient(), "Dr. Who", None, "http://localhost:3000");
        assert!(LogMailer.send(email).await.is_ok());
    }
}

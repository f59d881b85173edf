// 📧 Confirmation email - composed here, delivered through a Mailer
// Delivery failures are reported, never raised: registration completes regardless

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub to: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail service returned {0}")]
    Status(u16),
}

// ============================================================================
// COMPOSITION
// ============================================================================

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn account_created_email(to: &str, user_name: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Your Account Has Been Created".to_string(),
        html: format!(
            "<h2>Hello {},</h2>\n\
             <p>Your account has been created successfully.</p>\n\
             <p>You can now log in using your email and password.</p>\n\
             <br/>\n\
             <p>Thank you,<br/>Your Application Team</p>",
            escape(user_name)
        ),
    }
}

pub fn registration_email(
    parent_name: &str,
    to: &str,
    student_names: &[String],
    plan_title: &str,
    now: DateTime<Utc>,
) -> EmailMessage {
    let students = student_names
        .iter()
        .map(|s| escape(s))
        .collect::<Vec<_>>()
        .join(", ");

    EmailMessage {
        to: to.to_string(),
        subject: format!("Student Re-Registration Confirmation {}", now.year()),
        html: format!(
            "<h2>Hello {parent},</h2>\n\
             <p>Your student re-registration has been completed successfully!</p>\n\
             <h3>Registration Details:</h3>\n\
             <ul>\n\
             <li><strong>Students Registered:</strong> {students}</li>\n\
             <li><strong>Payment Plan:</strong> {plan}</li>\n\
             <li><strong>Date:</strong> {date}</li>\n\
             </ul>\n\
             <p>Your registration is now complete. You will receive further communication regarding payment and any additional requirements.</p>\n\
             <h3>Next Steps:</h3>\n\
             <ul>\n\
             <li>Review your selected payment plan</li>\n\
             <li>Ensure payment is made by the due date</li>\n\
             <li>Keep this confirmation email for your records</li>\n\
             </ul>\n\
             <p>If you have any questions, please contact our admissions office.</p>\n\
             <br/>\n\
             <p>Thank you,<br/>School Admissions Team</p>",
            parent = escape(parent_name),
            students = students,
            plan = escape(plan_title),
            date = now.format("%Y-%m-%d %H:%M"),
        ),
    }
}

// ============================================================================
// DELIVERY
// ============================================================================

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Send and turn the outcome into a report
pub async fn deliver(mailer: &dyn Mailer, message: &EmailMessage) -> DeliveryReport {
    match mailer.send(message).await {
        Ok(()) => {
            info!(to = %message.to, subject = %message.subject, "email sent");
            DeliveryReport {
                delivered: true,
                to: message.to.clone(),
                subject: message.subject.clone(),
                error: None,
            }
        }
        Err(e) => {
            warn!(to = %message.to, subject = %message.subject, error = %e, "email not delivered (non-blocking)");
            DeliveryReport {
                delivered: false,
                to: message.to.clone(),
                subject: message.subject.clone(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Writes the message to the log instead of sending it
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "email delivery disabled, logged only");
        Ok(())
    }
}

pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from_email: String,
}

impl SendGridMailer {
    pub fn new(api_key: &str, from_email: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        SendGridMailer {
            client,
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from_email },
            "subject": message.subject,
            "content": [{ "type": "text/html", "value": message.html }],
        });

        let resp = self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(MailError::Status(resp.status().as_u16()))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Collects messages; fails every send when `fail` is set
    #[derive(Default)]
    pub(crate) struct FakeMailer {
        pub fail: bool,
        pub sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Status(503));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn test_registration_email_contents() {
        let now = Utc.with_ymd_and_hms(2025, 11, 10, 9, 30, 0).unwrap();
        let msg = registration_email(
            "Sarah <Johnson>",
            "sarah@gmail.com",
            &["Emma Johnson".to_string(), "Lucas Johnson".to_string()],
            "Pay Once Per Year",
            now,
        );

        assert_eq!(msg.subject, "Student Re-Registration Confirmation 2025");
        assert!(msg.html.contains("Hello Sarah &lt;Johnson&gt;,"));
        assert!(msg.html.contains("Emma Johnson, Lucas Johnson"));
        assert!(msg.html.contains("<strong>Payment Plan:</strong> Pay Once Per Year"));
        assert!(msg.html.contains("2025-11-10 09:30"));
    }

    #[tokio::test]
    async fn test_deliver_reports_failure_without_error() {
        let msg = account_created_email("sarah@gmail.com", "Sarah");

        let ok = FakeMailer::default();
        assert!(deliver(&ok, &msg).await.delivered);
        assert_eq!(ok.sent.lock().unwrap().len(), 1);

        let failing = FakeMailer { fail: true, ..Default::default() };
        let report = deliver(&failing, &msg).await;
        assert!(!report.delivered);
        assert_eq!(report.error.as_deref(), Some("mail service returned 503"));
    }
}

// 🤖 AI Billing Assistant - one question, one answer, grounded in the dashboard
//
// Each request carries exactly one system message (billing figures) and one
// user message. No conversation state is sent.

use crate::dashboard::DashboardData;
use crate::pricing::format_rand;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const ERROR_REPLY: &str = "Sorry, I encountered an error processing your request. Please try again.";
pub const NO_DATA_REPLY: &str = "Unable to access your billing information. Please refresh and try again.";
pub const EMPTY_REPLY: &str = "I could not generate a response.";

// ============================================================================
// PROMPT
// ============================================================================

/// System prompt built from the parent's current billing figures
pub fn build_system_prompt(data: &DashboardData) -> String {
    let learners = data
        .learners
        .iter()
        .map(|l| {
            format!(
                "{} {} ({}): Monthly fee R{}, Outstanding R{}, Status: {}",
                l.first_name,
                l.surname,
                l.grade,
                format_rand(l.monthly_fee),
                format_rand(l.outstanding_amount),
                l.payment_status
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let b = &data.fee_breakdown;

    format!(
        "You are a helpful AI Billing Assistant for a school fee management system. \
You have access to the parent's real billing information. Be friendly, professional, and accurate.

PARENT BILLING INFORMATION:
- Total Learners: {}
- Total Monthly Fees: R{}
- Outstanding Balance: R{}

LEARNERS AND FEES:
{}

FEE BREAKDOWN:
- Tuition Fees: R{}
- Activity Fees: R{}
- Facility Fees: R{}
- Sport Fees: R{}
- Other Fees: R{}

Answer questions based on this information. If you don't have specific information to answer a question, direct the user to contact support.",
        data.total_learners,
        format_rand(data.total_monthly_fees),
        format_rand(data.outstanding_amount),
        learners,
        format_rand(b.tuition_fees),
        format_rand(b.activity_fees),
        format_rand(b.facility_fees),
        format_rand(b.sport_fees),
        format_rand(b.other_fees),
    )
}

// ============================================================================
// CHAT BACKEND
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat assistant is not configured")]
    NotConfigured,

    #[error("chat request failed: {0}")]
    Transport(String),

    #[error("chat service returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Completion text; `Ok(None)` when the service answered without content
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>, ChatError>;
}

/// Used when no API key is configured
pub struct UnconfiguredChat;

#[async_trait]
impl ChatBackend for UnconfiguredChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<Option<String>, ChatError> {
        Err(ChatError::NotConfigured)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completion endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn new(api_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        OpenAiChat {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>, ChatError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Status { status: status.as_u16(), body });
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content))
    }
}

// ============================================================================
// ASSISTANT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub reply: String,
    /// False when the reply is one of the canned failure texts
    pub answered: bool,
}

#[derive(Clone)]
pub struct Assistant {
    backend: Arc<dyn ChatBackend>,
}

impl Assistant {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Assistant { backend }
    }

    pub fn unconfigured() -> Self {
        Assistant::new(Arc::new(UnconfiguredChat))
    }

    /// Answer one question; failures become a polite reply, never an error
    pub async fn ask(&self, dashboard: Option<&DashboardData>, message: &str) -> AssistantReply {
        let Some(data) = dashboard else {
            return AssistantReply { reply: NO_DATA_REPLY.to_string(), answered: false };
        };

        let messages = [
            ChatMessage::system(build_system_prompt(data)),
            ChatMessage::user(message.trim()),
        ];

        match self.backend.complete(&messages).await {
            Ok(Some(text)) if !text.trim().is_empty() => {
                debug!(chars = text.len(), "assistant answered");
                AssistantReply { reply: text, answered: true }
            }
            Ok(_) => AssistantReply { reply: EMPTY_REPLY.to_string(), answered: false },
            Err(e) => {
                warn!(error = %e, "assistant request failed");
                AssistantReply { reply: ERROR_REPLY.to_string(), answered: false }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dashboard::{FeeBreakdown, Learner, PaymentStatus};
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Records the messages it receives and answers with a fixed text
    pub(crate) struct FakeChat {
        pub answer: Result<Option<String>, String>,
        pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeChat {
        pub(crate) fn answering(text: &str) -> Self {
            FakeChat { answer: Ok(Some(text.to_string())), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeChat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>, ChatError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.answer.clone().map_err(ChatError::Transport)
        }
    }

    pub(crate) fn sample_dashboard() -> DashboardData {
        let mut data = DashboardData::empty(NaiveDate::from_ymd_opt(2025, 11, 10).unwrap());
        data.is_fallback = false;
        data.total_learners = 1;
        data.total_monthly_fees = 8000.0;
        data.outstanding_amount = 1250.0;
        data.fee_breakdown = FeeBreakdown::from_monthly(8000.0, 0.0);
        data.learners.push(Learner {
            id: "app-1".to_string(),
            first_name: "Emma".to_string(),
            surname: "Johnson".to_string(),
            student_id: "0803155001081".to_string(),
            grade: "Grade 10".to_string(),
            monthly_fee: 8000.0,
            paid_this_month: 6750.0,
            outstanding_amount: 1250.0,
            next_payment_date: "2025-12-02".to_string(),
            facility_linked: true,
            payment_status: PaymentStatus::Partial,
        });
        data
    }

    #[test]
    fn test_system_prompt_contents() {
        let prompt = build_system_prompt(&sample_dashboard());

        assert!(prompt.starts_with("You are a helpful AI Billing Assistant"));
        assert!(prompt.contains("- Total Learners: 1"));
        assert!(prompt.contains("- Total Monthly Fees: R8,000"));
        assert!(prompt.contains(
            "Emma Johnson (Grade 10): Monthly fee R8,000, Outstanding R1,250, Status: partial"
        ));
        assert!(prompt.contains("- Tuition Fees: R4,800"));
        assert!(prompt.ends_with("direct the user to contact support."));
    }

    #[tokio::test]
    async fn test_ask_sends_one_system_and_one_user_message() {
        let fake = Arc::new(FakeChat::answering("Your balance is R1,250."));
        let assistant = Assistant::new(fake.clone());

        let reply = assistant.ask(Some(&sample_dashboard()), "  What do I owe? ").await;

        assert!(reply.answered);
        assert_eq!(reply.reply, "Your balance is R1,250.");

        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][0].role, "system");
        assert_eq!(seen[0][1], ChatMessage::user("What do I owe?"));
    }

    #[tokio::test]
    async fn test_ask_without_dashboard() {
        let assistant = Assistant::new(Arc::new(FakeChat::answering("unused")));
        let reply = assistant.ask(None, "What do I owe?").await;
        assert_eq!(reply.reply, NO_DATA_REPLY);
        assert!(!reply.answered);
    }

    #[tokio::test]
    async fn test_ask_failures_become_canned_replies() {
        let failing = FakeChat { answer: Err("timeout".to_string()), seen: Mutex::new(Vec::new()) };
        let reply = Assistant::new(Arc::new(failing)).ask(Some(&sample_dashboard()), "hi").await;
        assert_eq!(reply.reply, ERROR_REPLY);

        let empty = FakeChat { answer: Ok(None), seen: Mutex::new(Vec::new()) };
        let reply = Assistant::new(Arc::new(empty)).ask(Some(&sample_dashboard()), "hi").await;
        assert_eq!(reply.reply, EMPTY_REPLY);

        let reply = Assistant::unconfigured().ask(Some(&sample_dashboard()), "hi").await;
        assert_eq!(reply.reply, ERROR_REPLY);
    }
}

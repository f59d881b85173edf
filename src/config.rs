// ⚙️ Configuration - environment variables with defaults

use crate::assistant::{ChatBackend, OpenAiChat, UnconfiguredChat};
use crate::email::{LogMailer, Mailer, SendGridMailer};
use crate::validation::EmailRule;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_DB_PATH: &str = "fee_portal.db";
pub const DEFAULT_BIND: &str = "0.0.0.0:8001";
pub const DEFAULT_ANNUAL_FEE: f64 = 96000.0;
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_LOG_FILTER: &str = "fee_portal=info,fee_portal_server=info,tower_http=info";

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub db_path: String,
    pub bind_addr: String,
    /// Annual fee used whenever a grade has no fee schedule
    pub default_annual_fee: f64,
    pub email_rule: EmailRule,
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_model: String,
    pub sendgrid_api_key: Option<String>,
    pub from_email: String,
    pub http_timeout: Duration,
    pub log_json: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig::from_lookup(|_| None)
    }
}

impl PortalConfig {
    pub fn from_env() -> Self {
        PortalConfig::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse_f64 = |name: &str, default: f64| {
            get(name)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(default)
        };

        PortalConfig {
            db_path: get("FEE_PORTAL_DB").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            bind_addr: get("FEE_PORTAL_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            default_annual_fee: parse_f64("FEE_PORTAL_DEFAULT_ANNUAL_FEE", DEFAULT_ANNUAL_FEE),
            email_rule: get("FEE_PORTAL_EMAIL_DOMAIN")
                .map(|d| EmailRule::from_setting(&d))
                .unwrap_or_default(),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_api_url: get("OPENAI_API_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            sendgrid_api_key: get("SENDGRID_API_KEY"),
            from_email: get("FROM_EMAIL").unwrap_or_else(|| "admissions@school.local".to_string()),
            http_timeout: Duration::from_secs(
                get("FEE_PORTAL_HTTP_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(20),
            ),
            log_json: get("FEE_PORTAL_LOG_JSON")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
        }
    }

    pub fn chat_backend(&self) -> Arc<dyn ChatBackend> {
        match &self.openai_api_key {
            Some(key) => Arc::new(OpenAiChat::new(
                &self.openai_api_url,
                key,
                &self.openai_model,
                self.http_timeout,
            )),
            None => {
                info!("OPENAI_API_KEY not set, assistant disabled");
                Arc::new(UnconfiguredChat)
            }
        }
    }

    pub fn mailer(&self) -> Arc<dyn Mailer> {
        match &self.sendgrid_api_key {
            Some(key) => Arc::new(SendGridMailer::new(key, &self.from_email, self.http_timeout)),
            None => {
                info!("SENDGRID_API_KEY not set, emails are logged only");
                Arc::new(LogMailer)
            }
        }
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // try_init: a second call (tests, embedded use) keeps the first subscriber
    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> PortalConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PortalConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = PortalConfig::default();
        assert_eq!(c.db_path, "fee_portal.db");
        assert_eq!(c.bind_addr, "0.0.0.0:8001");
        assert_eq!(c.default_annual_fee, 96000.0);
        assert_eq!(c.email_rule, EmailRule::default());
        assert_eq!(c.http_timeout, Duration::from_secs(20));
        assert!(c.openai_api_key.is_none());
        assert!(!c.log_json);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FEE_PORTAL_DEFAULT_ANNUAL_FEE", "85000"),
            ("FEE_PORTAL_EMAIL_DOMAIN", "*"),
            ("OPENAI_API_KEY", "  "),
            ("FEE_PORTAL_LOG_JSON", "true"),
            ("FEE_PORTAL_HTTP_TIMEOUT_SECS", "5"),
        ]);
        assert_eq!(c.default_annual_fee, 85000.0);
        assert!(c.email_rule.accepts("parent1@yahoo.com"));
        assert!(c.openai_api_key.is_none());
        assert!(c.log_json);
        assert_eq!(c.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_default_fee_ignored() {
        let c = config(&[("FEE_PORTAL_DEFAULT_ANNUAL_FEE", "-5")]);
        assert_eq!(c.default_annual_fee, DEFAULT_ANNUAL_FEE);
    }
}

use std::env;
use std::time::Duration;

use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::GENERIC_TOPIC;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub llm_provider: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub gmail_access_token: String,
    pub sender_address: String,
    pub sender_name: String,
    pub review_email: String,
    pub slack_webhook_url: String,
    pub booking_link: String,
    pub email_footer: String,
    pub timezone: Tz,
    pub catalog: ServiceCatalog,
    pub policy: Policy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let timezone_name =
            env::var("USER_TIMEZONE").unwrap_or_else(|_| "America/New_York".to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid USER_TIMEZONE {timezone_name:?}: {e}"))?;

        let booking_link = env::var("BOOKING_LINK")
            .unwrap_or_else(|_| "https://calendly.com/your-team/30min".to_string());

        let catalog = match env::var("SERVICE_CATALOG_PATH") {
            Ok(path) if !path.is_empty() => ServiceCatalog::from_file(&path)?,
            _ => ServiceCatalog::builtin(&booking_link),
        };

        Ok(Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "leadflow.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string()),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-pro".to_string()),
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string()),
            gmail_access_token: env::var("GMAIL_ACCESS_TOKEN").unwrap_or_default(),
            sender_address: env::var("SENDER_ADDRESS").unwrap_or_default(),
            sender_name: env::var("SENDER_NAME").unwrap_or_else(|_| "Jose".to_string()),
            review_email: env::var("REVIEW_EMAIL").unwrap_or_default(),
            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").unwrap_or_default(),
            booking_link,
            email_footer: env::var("EMAIL_FOOTER")
                .unwrap_or_else(|_| "Reply STOP to unsubscribe".to_string()),
            timezone,
            catalog,
            policy: Policy::from_env(),
        })
    }
}

/// Tunable thresholds and pacing for the jobs and the reply router.
#[derive(Clone, Debug)]
pub struct Policy {
    pub confidence_threshold: f64,
    pub follow_up_after_days: i64,
    pub abandon_after_days: i64,
    pub daily_send_quota: usize,
    pub flush_every: usize,
    pub send_delay: Duration,
    pub lock_wait: Duration,
    pub history_max_chars: usize,
    pub reply_scan_limit: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            follow_up_after_days: 3,
            abandon_after_days: 4,
            daily_send_quota: 400,
            flush_every: 50,
            send_delay: Duration::from_millis(2500),
            lock_wait: Duration::from_secs(10),
            history_max_chars: 2000,
            reply_scan_limit: 50,
        }
    }
}

impl Policy {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            follow_up_after_days: env_parse("FOLLOW_UP_AFTER_DAYS", defaults.follow_up_after_days),
            abandon_after_days: env_parse("ABANDON_AFTER_DAYS", defaults.abandon_after_days),
            daily_send_quota: env_parse("DAILY_SEND_QUOTA", defaults.daily_send_quota),
            flush_every: env_parse("FLUSH_EVERY", defaults.flush_every).max(1),
            send_delay: Duration::from_millis(env_parse("SEND_DELAY_MS", 2500)),
            lock_wait: Duration::from_secs(env_parse("LOCK_WAIT_SECS", 10)),
            history_max_chars: env_parse("HISTORY_MAX_CHARS", defaults.history_max_chars),
            reply_scan_limit: env_parse("REPLY_SCAN_LIMIT", defaults.reply_scan_limit),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub booking_link: Option<String>,
}

/// Services offered to prospects, in prompt order, plus the order used to
/// pick one booking link when a reply mentions several services.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub services: Vec<ServiceProfile>,
    #[serde(default)]
    pub link_priority: Vec<String>,
}

impl ServiceCatalog {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service catalog: {path}"))?;
        let catalog: ServiceCatalog = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse service catalog: {path}"))?;
        anyhow::ensure!(!catalog.services.is_empty(), "service catalog {path} is empty");
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceProfile> {
        let name = name.trim();
        self.services
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn link_for(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|s| s.booking_link.as_deref())
            .filter(|l| !l.trim().is_empty())
    }

    pub fn builtin(default_link: &str) -> Self {
        let profile = |name: &str, keywords: &[&str], description: &str, link: &str| ServiceProfile {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: description.to_string(),
            booking_link: Some(link.to_string()),
        };

        Self {
            services: vec![
                profile(
                    "Google Ads Management",
                    &["google ads", "ppc", "adwords", "campaigns", "performance max", "ad spend", "search ads", "display ads"],
                    "Expert Google Ads management including Search, Display, and Performance Max campaigns, focusing on strategy, optimization, and results-driven advertising to maximize ROI.",
                    "https://calendly.com/your-team/google-ads",
                ),
                profile(
                    "GMC/Feed Management",
                    &["gmc", "merchant center", "feed disapproval", "product feed", "shopping ads", "data feed"],
                    "Specialized in fixing Google Merchant Center feed disapprovals, optimizing product feeds for better ad placements and performance in Shopping Ads, and setting up GMC for new stores.",
                    "https://calendly.com/your-team/google-ads",
                ),
                profile(
                    "Web Design & Development",
                    &["website", "web design", "web development", "landing page", "cms", "wordpress", "shopify", "e-commerce site", "responsive design"],
                    "Full-stack web design and development services, creating responsive and user-friendly websites, high-converting landing pages, and complete CMS builds (WordPress, Shopify, custom solutions).",
                    "https://calendly.com/your-team/web-design",
                ),
                profile(
                    "Funnels",
                    &["funnels", "sales funnel", "lead generation funnel", "clickfunnels", "marketing funnel", "conversion funnel"],
                    "Design and implementation of high-converting sales and lead generation funnels, including strategy, copywriting, and technical setup to nurture leads and drive sales.",
                    default_link,
                ),
                profile(
                    "AI Automation",
                    &["ai automation", "chatbots", "ai agents", "workflow automation", "zapier", "make.com", "process automation"],
                    "Implementing AI-driven automation solutions and custom workflow automations to streamline business processes and improve efficiency.",
                    default_link,
                ),
                profile(
                    "Tech Strategy",
                    &["tech strategy", "digital transformation", "it consulting", "saas integration", "crm strategy", "technology roadmap"],
                    "Providing strategic advice on technology adoption, digital transformation initiatives, SaaS integration, and developing comprehensive technology roadmaps for business growth.",
                    default_link,
                ),
                profile(
                    GENERIC_TOPIC,
                    &[],
                    "General discussion about digital marketing needs, technical challenges, or other inquiries where a specific service isn't immediately identifiable.",
                    default_link,
                ),
            ],
            link_priority: [
                "Web Design & Development",
                "Google Ads Management",
                "GMC/Feed Management",
                "Funnels",
                "AI Automation",
                "Tech Strategy",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

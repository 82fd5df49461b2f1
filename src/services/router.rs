use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{Policy, ServiceCatalog};
use crate::models::{Classification, ClassificationResult, Lead, Sentiment, Severity};
use crate::services::activity::log_action;
use crate::services::ai::classifier;
use crate::services::history;
use crate::state::AppState;

/// Phrases that end automated contact, matched case-insensitively as whole
/// words anywhere in the reply.
static OPT_OUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(stop|unsubscribe|remove\s+me)\b").expect("opt-out pattern compiles")
});

/// Run on the prospect's own text; see [`strip_quoted`].
pub fn is_opt_out(reply: &str) -> bool {
    OPT_OUT.is_match(reply)
}

/// The part of a reply the prospect actually wrote. Mail clients quote our
/// previous message, footer included, below an `On ... wrote:` line or as
/// `>`-prefixed lines; both are dropped.
pub fn strip_quoted(body: &str) -> String {
    let body = body.replace("\r\n", "\n");
    let lines: Vec<&str> = body.lines().collect();

    let mut kept: Vec<&str> = vec![];
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if is_attribution(trimmed, lines.get(i + 1).map(|l| l.trim())) || is_forward_marker(trimmed) {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(*line);
    }
    kept.join("\n").trim().to_string()
}

/// `On Mon, 16 Jun 2025, Jose <jose@x> wrote:`, which some clients wrap onto
/// a second line.
fn is_attribution(line: &str, next: Option<&str>) -> bool {
    if !line.starts_with("On ") {
        return false;
    }
    line.ends_with("wrote:") || next.is_some_and(|n| !n.starts_with('>') && n.ends_with("wrote:"))
}

fn is_forward_marker(line: &str) -> bool {
    line.starts_with("-----Original Message-----") || line.starts_with("________________________________")
}

/// Verdict of the rule table on a classifier outcome, before any follow-up
/// is generated.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment<'a> {
    Disqualify,
    Review(String),
    Qualify(&'a ClassificationResult),
}

/// Applies the routing rules in order; the first rule that matches wins.
pub fn assess<'a>(classification: &'a Classification, policy: &Policy) -> Assessment<'a> {
    let result = match classification {
        Classification::Failed => {
            return Assessment::Review(
                "Classification failed: no usable result from the classifier.".to_string(),
            )
        }
        Classification::Classified(result) => result,
    };

    let confidence = result.confidence();

    if result.sentiment == Sentiment::Negative {
        return Assessment::Disqualify;
    }

    if result.sentiment == Sentiment::Neutral && result.is_generic() {
        return Assessment::Review(format!(
            "Neutral sentiment for a generic inquiry. Confidence: {confidence:.2}. Summary: {}",
            result.summary()
        ));
    }

    if confidence < policy.confidence_threshold {
        return Assessment::Review(format!(
            "Low classification confidence: {confidence:.2}. Services: {}. Summary: {}",
            result.topics_display(),
            result.summary()
        ));
    }

    if matches!(result.sentiment, Sentiment::Positive | Sentiment::Neutral) && !result.is_generic() {
        return Assessment::Qualify(result);
    }

    Assessment::Review(format!(
        "Not proceeding with automated follow-up. Sentiment: {}, Confidence: {confidence:.2}. Services: {}. Summary: {}.",
        result.sentiment.as_str(),
        result.topics_display(),
        result.summary()
    ))
}

/// Booking link for a qualified reply. One specific topic uses its own link;
/// several topics take the first one in priority order that has a link.
/// Anything else falls back to `default_link`.
pub fn select_booking_link(
    result: &ClassificationResult,
    catalog: &ServiceCatalog,
    default_link: &str,
) -> String {
    let topics = result.specific_topics();

    let chosen = match topics.as_slice() {
        [] => None,
        [only] => catalog.link_for(only),
        many => catalog
            .link_priority
            .iter()
            .filter(|p| many.iter().any(|t| t.eq_ignore_ascii_case(p)))
            .find_map(|p| catalog.link_for(p)),
    };

    chosen.unwrap_or(default_link).to_string()
}

/// Normalises generated text to plain paragraphs separated by one blank line.
pub fn format_plain_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .trim()
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn compose_with_footer(raw: &str, footer: &str) -> String {
    format!("{}\n\n{footer}", format_plain_text(raw))
}

pub fn compose_qualified(raw: &str, link: &str, footer: &str) -> String {
    format!(
        "{}\n\nHere's the link to book a meeting: {link}\n\n{footer}",
        format_plain_text(raw)
    )
}

pub fn initial_subject(service: &str) -> String {
    format!("Free Audit for {service}")
}

pub fn follow_up_subject(service: &str) -> String {
    format!("Following up on your Free Audit for {service}")
}

/// Subject for the qualified follow-up. Only topics found in the catalog are
/// named, using the catalog's spelling; classifier text never reaches the
/// header verbatim.
pub fn qualified_subject(result: &ClassificationResult, catalog: &ServiceCatalog) -> String {
    let names: Vec<&str> = result
        .specific_topics()
        .into_iter()
        .filter_map(|topic| catalog.get(topic))
        .map(|profile| profile.name.as_str())
        .collect();

    if names.is_empty() {
        "Re: Your Inquiry - Following Up".to_string()
    } else {
        format!("Re: Your Inquiry - {}", names.join(" & "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Unqualified { reason: String, opted_out: bool },
    ManualReview { reason: String },
    Hot {
        email: OutboundEmail,
        result: ClassificationResult,
    },
}

impl RoutingDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RoutingDecision::Unqualified { .. } => "UNQUALIFIED",
            RoutingDecision::ManualReview { .. } => "NEEDS_MANUAL_REVIEW",
            RoutingDecision::Hot { .. } => "HOT",
        }
    }
}

/// Decides what happens to a lead that replied. `reply` is the prospect's
/// own text with quoted history removed. The opt-out check runs before
/// anything else and never reaches the classifier.
pub async fn route(state: &AppState, lead: &Lead, reply: &str) -> RoutingDecision {
    let lead_id = lead.lead_id.as_deref();
    let email = Some(lead.email.as_str());

    if is_opt_out(reply) {
        return RoutingDecision::Unqualified {
            reason: "Opted out via reply".to_string(),
            opted_out: true,
        };
    }

    let config = &state.config;
    let history = history::bounded_summary(
        &state.db,
        state.mailbox.as_ref(),
        config.timezone,
        lead_id,
        &lead.email,
        config.policy.history_max_chars,
    )
    .await;
    log_action(
        &state.db,
        "ReplyHistory",
        lead_id,
        email,
        &format!("Interaction history prepared ({} chars).", history.chars().count()),
        Severity::Debug,
    );

    let classification: Classification = classifier::classify(
        state.llm.as_ref(),
        reply,
        lead.greeting_name(),
        &history,
        &config.catalog,
    )
    .await
    .into();

    if let Classification::Classified(result) = &classification {
        log_action(
            &state.db,
            "ReplyClassified",
            lead_id,
            email,
            &format!(
                "Sentiment: {}, Confidence: {:.2}, Services: {}",
                result.sentiment.as_str(),
                result.confidence(),
                result.topics_display()
            ),
            Severity::Info,
        );
    }

    let result = match assess(&classification, &config.policy) {
        Assessment::Disqualify => {
            return RoutingDecision::Unqualified {
                reason: "Negative sentiment".to_string(),
                opted_out: false,
            }
        }
        Assessment::Review(reason) => return RoutingDecision::ManualReview { reason },
        Assessment::Qualify(result) => result,
    };

    let generated = classifier::contextual_follow_up(
        state.llm.as_ref(),
        result,
        lead.greeting_name(),
        &config.sender_name,
        &config.catalog,
        &history,
    )
    .await;

    let Some(raw_body) = generated else {
        return RoutingDecision::ManualReview {
            reason: format!(
                "Follow-up generation failed. Sentiment: {}, Confidence: {:.2}. Services: {}.",
                result.sentiment.as_str(),
                result.confidence(),
                result.topics_display()
            ),
        };
    };

    let link = select_booking_link(result, &config.catalog, &config.booking_link);
    RoutingDecision::Hot {
        email: OutboundEmail {
            to: lead.email.clone(),
            subject: qualified_subject(result, &config.catalog),
            body: compose_qualified(&raw_body, &link, &config.email_footer),
        },
        result: result.clone(),
    }
}

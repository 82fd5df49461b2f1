use serde::{Deserialize, Deserializer, Serialize};

/// Topic the classifier uses when a reply does not map to a specific service.
pub const GENERIC_TOPIC: &str = "Generic Inquiry";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    #[default]
    Unknown,
}

impl From<String> for Sentiment {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "neutral" => Sentiment::Neutral,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Unknown,
        }
    }
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Unknown => "unknown",
        }
    }
}

/// Structured reading of one prospect reply. Field names follow the JSON the
/// classification prompt asks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    #[serde(rename = "identified_services", default, deserialize_with = "null_as_default")]
    pub topics: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_concerns: Vec<String>,
    #[serde(default)]
    pub summary_of_need: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sentiment: Sentiment,
    #[serde(rename = "classification_confidence", default)]
    pub raw_confidence: Option<f64>,
}

impl ClassificationResult {
    /// Self-reported confidence clamped to [0.0, 1.0]. A missing or
    /// non-finite value counts as no confidence at all.
    pub fn confidence(&self) -> f64 {
        match self.raw_confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    pub fn specific_topics(&self) -> Vec<&str> {
        self.topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case(GENERIC_TOPIC))
            .collect()
    }

    pub fn is_generic(&self) -> bool {
        self.specific_topics().is_empty()
    }

    pub fn summary(&self) -> &str {
        self.summary_of_need
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("N/A")
    }

    pub fn topics_display(&self) -> String {
        if self.topics.is_empty() {
            "N/A".to_string()
        } else {
            self.topics.join(", ")
        }
    }
}

/// Outcome of asking the oracle to classify a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Classified(ClassificationResult),
    Failed,
}

impl From<Option<ClassificationResult>> for Classification {
    fn from(result: Option<ClassificationResult>) -> Self {
        match result {
            Some(r) => Classification::Classified(r),
            None => Classification::Failed,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

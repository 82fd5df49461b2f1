use crate::config::ServiceCatalog;
use crate::models::ClassificationResult;

pub fn initial_email(first_name: &str, service: &str) -> String {
    format!(
        "Write a unique 2-line email to {first_name} about {service}. Offer a free audit. \
         Vary the tone (professional, friendly, or urgent) and the phrasing so no two emails read alike. \
         Keep it human, concise and professional. Do not add a signature or an unsubscribe line."
    )
}

pub fn follow_up_email(first_name: &str, service: &str) -> String {
    format!(
        "Write a unique 2-line follow-up email to {first_name} about {service}. \
         Remind them of the free audit. Use different wording from a typical first email. \
         Keep it human, concise and professional. Do not add a signature or an unsubscribe line."
    )
}

pub fn classification(
    reply: &str,
    first_name: &str,
    catalog: &ServiceCatalog,
    history: &str,
) -> String {
    let services = catalog
        .services
        .iter()
        .map(|s| {
            let snippet: String = s.description.chars().take(100).collect();
            format!("- {}: {snippet}...", s.name)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let history_section = if history.trim().is_empty() {
        String::new()
    } else {
        format!("Previous interaction summary with {first_name}:\n{history}\n---\n")
    };

    format!(
        r#"{history_section}Prospect {first_name} replied with: "{reply}"

My available services are:
{services}

Using the prospect's latest reply, and any earlier interactions summarised above, identify the service(s) they are interested in from the list.
List the specific problems or questions raised in the latest reply.
Classify the sentiment of the latest reply as "positive", "neutral" or "negative".
If the inquiry is unclear or matches no specific service, use "{generic}" as the only service.

Respond with JSON only, in exactly this shape:
{{
  "identified_services": ["Service Name"],
  "key_concerns": ["Concern"],
  "summary_of_need": "What the prospect is explicitly asking for in the latest reply",
  "sentiment": "positive",
  "classification_confidence": 0.85
}}
classification_confidence is your own estimate between 0.0 and 1.0 of how accurate the services, concerns and summary are. Use lower values for short or ambiguous replies."#,
        generic = crate::models::GENERIC_TOPIC,
    )
}

pub fn contextual_follow_up(
    result: &ClassificationResult,
    first_name: &str,
    sender_name: &str,
    catalog: &ServiceCatalog,
    history: &str,
) -> String {
    let expertise = result
        .topics
        .iter()
        .filter_map(|topic| catalog.get(topic))
        .map(|s| format!("Regarding {}: {}", s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n\n");

    let interests = if result.topics.is_empty() {
        "services I offer".to_string()
    } else {
        result.topics.join(", ")
    };
    let concerns = if result.key_concerns.is_empty() {
        "not explicitly stated, but they replied with interest".to_string()
    } else {
        result.key_concerns.join(", ")
    };
    let need = result
        .summary_of_need
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("their general interest in my services");

    let context = if history.trim().is_empty() {
        format!("My name is {sender_name}.\nI previously sent a cold email to {first_name}.\n")
    } else {
        format!(
            "My name is {sender_name}.\nHere's a summary of my past interactions with {first_name}:\n{history}\n---\n"
        )
    };

    format!(
        "{context}
Based on their LATEST reply, {first_name} seems interested in: {interests}.
Their specific concerns or questions from the LATEST reply: {concerns}.
Summary of their LATEST need: {need}

My relevant expertise includes:
{expertise}

Write a helpful, expert-toned follow-up email to {first_name}.
Acknowledge their latest reply and specific concerns. If there is relevant history, refer to it briefly so they know I remember them.
Explain how I can help with the identified service(s) and concerns, then suggest a meeting; the booking link is added separately.
Keep it concise, professional and encouraging.
End with \"Looking forward to helping out,\n{sender_name}\". Do not add an unsubscribe line."
    )
}

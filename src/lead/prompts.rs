//! Prompts and function schemas for the lead dialogue and extraction.

use crate::lead::model::LeadSchema;

pub const DIALOGUE_FUNCTION: &str = "lead_dialogue_reply";
pub const EXTRACTION_FUNCTION: &str = "extract_lead_data";

/// Priority groups for asking. Fields of the schema not listed here are
/// learned from the conversation, never asked for.
const ASK_ORDER: &[&[&str]] = &[
    &["name"],
    &["company", "industry", "company_size"],
    &["role"],
    &["email", "phone"],
];

/// Human-readable asking order for the fields present in `schema`.
pub fn ask_order(schema: &LeadSchema) -> Vec<String> {
    ASK_ORDER
        .iter()
        .filter_map(|group| {
            let present: Vec<&str> = group.iter().copied().filter(|f| schema.contains(f)).collect();
            (!present.is_empty()).then(|| present.join(" / "))
        })
        .collect()
}

pub fn dialogue_system_prompt(schema: &LeadSchema, char_limit: usize) -> String {
    let order = ask_order(schema)
        .iter()
        .enumerate()
        .map(|(i, group)| format!("  {}. {group}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are the TCW lead generation assistant. Your only task is to collect details about the visitor.
- Do NOT answer the visitor's questions and do not do anything other than collecting details.
- Ask for one detail at a time, in this order, skipping details the visitor already gave:
{order}
- If the visitor opens with a question, reply that you are happy to help and ask whether you may first ask a few short questions.
- Every reply must be at most {char_limit} characters.
- Reply in the visitor's language. The default language is German.
- If the visitor does not want to answer a single question, accept it and move on to the next detail. This is not an abort.
- Only if the visitor clearly says they do not want to continue at all, set status to \"aborted\" and ask whether they have questions about TCW.
- Once every detail has been asked for, set status to \"success\" and ask what they would like to know next.
- Otherwise set status to \"in_progress\".
Always respond by calling {DIALOGUE_FUNCTION}."
    )
}

pub fn dialogue_function_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "reply": {
                "type": "string",
                "description": "The message shown to the visitor"
            },
            "status": {
                "type": "string",
                "enum": ["in_progress", "success", "aborted"],
                "description": "State of the lead qualification after this reply"
            }
        },
        "required": ["reply", "status"]
    })
}

pub fn extraction_system_prompt(schema: &LeadSchema) -> String {
    let fields = schema
        .fields()
        .iter()
        .map(|f| format!("  - {}: {}", f.name, f.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You extract customer lead information from a chat conversation. Follow ALL of these rules:
- Insert information in the language of the conversation.
- If a field covers multiple points, separate them with a comma.
- Only use information the visitor actually stated. Never guess.
- The fields are:
{fields}
- If the visitor did not provide a field, set it to null.
Respond by calling {EXTRACTION_FUNCTION}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_order_follows_priority_groups() {
        let order = ask_order(&LeadSchema::default());
        assert_eq!(order, ["name", "company / company_size", "role", "email / phone"]);
    }

    #[test]
    fn ask_order_includes_industry_when_configured() {
        let schema = LeadSchema::from_names(["email", "industry", "company", "name"]);
        assert_eq!(ask_order(&schema), ["name", "company / industry", "email"]);
    }

    #[test]
    fn dialogue_prompt_states_limit() {
        let prompt = dialogue_system_prompt(&LeadSchema::default(), 100);
        assert!(prompt.contains("at most 100 characters"));
        assert!(prompt.contains(DIALOGUE_FUNCTION));
    }

    #[test]
    fn extraction_prompt_lists_every_field() {
        let schema = LeadSchema::default();
        let prompt = extraction_system_prompt(&schema);
        for name in schema.names() {
            assert!(prompt.contains(&format!("- {name}:")), "missing {name}");
        }
    }
}

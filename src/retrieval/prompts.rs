//! Prompts for query consolidation and grounded answering.

use crate::conversation::Exchange;

pub fn consolidation_prompt(raw_query: &str, exchanges: &[Exchange]) -> String {
    let history = exchanges
        .iter()
        .map(|e| format!("User: {}\nAssistant: {}", e.user.trim(), e.assistant.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Your ONLY task is to merge the USER QUESTION and the CONVERSATION HISTORY into a single, self-contained question.
- DO NOT answer the question.
- DO NOT change the content or the language of the user question. The default language is German.
- Resolve references like "he", "there" or "it" using only the CONVERSATION HISTORY. Never add facts that are not in it.
- If the USER QUESTION is not related to the CONVERSATION HISTORY, return it unchanged.
- Reply with the question only.

EXAMPLE
CONVERSATION HISTORY:
User: Wer ist Prof. Wildemann?
Assistant: Prof. Dr. Horst Wildemann lehrt seit 1980 als Professor für Betriebswirtschaftslehre.
USER QUESTION: Wann kam er nach München?
OUTPUT: Wann kam Prof. Wildemann nach München?

CONVERSATION HISTORY:
"""
{history}
"""
USER QUESTION:
"""
{raw_query}
""""#
    )
}

/// Limits and fallback for the answer prompt.
#[derive(Debug, Clone)]
pub struct AnswerRules<'a> {
    pub char_limit: usize,
    pub word_limit: usize,
    pub contact_label: &'a str,
    pub contact_url: &'a str,
}

pub fn answer_system_prompt(rules: &AnswerRules<'_>, context: &str, lead_summary: Option<&str>) -> String {
    let char_limit = rules.char_limit;
    let word_limit = rules.word_limit;
    let contact = format!("[{}]({})", rules.contact_label, rules.contact_url);
    let lead = match lead_summary {
        Some(summary) if !summary.trim().is_empty() => format!(
            "\n###\n\nKNOWN VISITOR (use it to address the visitor, never cite it):\n\"\"\"\n{summary}\n\"\"\"\n"
        ),
        _ => String::new(),
    };
    format!(
        r#"- You are an assistant that ONLY answers questions about the TCW website and its contents, concisely.
- Use ONLY the CONTEXT below. If the CONTEXT does not answer the question, reply with the contact page {contact} and nothing else.
- Always reply in the language of the user. The default language is German.
- The answer MUST be shorter than {char_limit} characters and at most {word_limit} words.
- ALWAYS cite every SOURCE you used as a markdown link [<short label>](<source-url>), using the exact SOURCE url.

The CONTEXT consists of SOURCE and CONTENT blocks. SOURCE is the URL of a page, CONTENT is text from that page.

OUTPUT FORMAT:
"""
A sentence stating information from a page. More information from another page.
*Quelle(n): [key information](https://tcw.de/some-page), [more information](https://tcw.de/another-page)*
"""
{lead}
###

CONTEXT:
"""
{context}
""""#
    )
}

//! Prompt construction for outreach emails and reply handling.

use crate::compose::normalize::greeting_for;
use crate::store::model::{Campaign, Contact, SequenceStep};

/// Used when a campaign carries no base prompt template of its own.
pub const DEFAULT_BASE_PROMPT: &str = "You are an email writing assistant helping a single user \
     send a short, professional yet personal sales/marketing email.";

/// Goal handed to the reply drafter.
pub const REPLY_GOAL: &str = "Help the user respond and move the conversation forward.";

/// Word limit requested from the model for generated bodies.
pub const BODY_WORD_LIMIT: usize = 180;

/// System prompt for a sequence email: the campaign template or the default.
pub fn generation_system_prompt(campaign: &Campaign) -> String {
    match campaign.base_prompt_template.as_deref().map(str::trim) {
        Some(template) if !template.is_empty() => template.to_string(),
        _ => DEFAULT_BASE_PROMPT.to_string(),
    }
}

/// User prompt listing product, recipient, step and output constraints.
pub fn generation_user_prompt(
    campaign: &Campaign,
    contact: &Contact,
    step: &SequenceStep,
    sender_name: &str,
) -> String {
    let first_name = contact.first_name.as_deref().unwrap_or("");
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("Product:\n");
    prompt.push_str(&format!(
        "- Name: {}\n",
        campaign.product_name.as_deref().unwrap_or("")
    ));
    prompt.push_str(&format!(
        "- Description: {}\n\n",
        campaign.product_description.as_deref().unwrap_or("")
    ));

    prompt.push_str("Recipient:\n");
    prompt.push_str(&format!("- First name: {first_name}\n"));
    prompt.push_str(&format!(
        "- Company: {}\n",
        contact.company.as_deref().unwrap_or("")
    ));
    prompt.push_str(&format!("- Role: {}\n", contact.role.as_deref().unwrap_or("")));
    prompt.push_str(&format!(
        "- Hobbies: {}\n",
        contact.hobbies.as_deref().unwrap_or("")
    ));
    prompt.push_str(&format!(
        "- MBTI personality type: {}\n\n",
        contact.mbti_type.as_deref().unwrap_or("")
    ));

    prompt.push_str(&format!(
        "Sequence step: {} ({})\n{}\n\n",
        step.step_number,
        step.name,
        step_guidance(step.step_number)
    ));

    prompt.push_str("Constraints:\n");
    prompt.push_str(&format!("- Keep body under {BODY_WORD_LIMIT} words.\n"));
    prompt.push_str(&format!(
        "- The body must start with \"{}\".\n",
        greeting_for(contact.first_name.as_deref())
    ));
    prompt.push_str("- Mention the company and, if relevant, the role.\n");
    prompt.push_str("- Use a friendly, concise tone.\n");
    prompt.push_str("- Plain text only. No markdown, no emojis.\n");
    prompt.push_str(&format!(
        "- Sign off with \"Best regards, {sender_name}\".\n\n"
    ));

    prompt.push_str(
        "Return ONLY a valid JSON object with exactly two string fields:\n\
         - \"subject\": the subject line\n\
         - \"body\": the email body\n\n\
         Do NOT include any explanation, markdown, or backticks. Only the JSON.",
    );
    prompt
}

/// How the email should read at a given position in the sequence.
fn step_guidance(step_number: i64) -> &'static str {
    match step_number {
        1 => "This is the first contact: introduce the product and why it fits the recipient.",
        2 => "This is a follow-up: build on the earlier email without repeating it.",
        _ => "This is the final reminder: close politely and give a clear reason to reply now.",
    }
}

/// Prompt asking whether an inbound reply can be answered without a human.
pub fn classification_prompt(original_body: &str, incoming_reply: &str) -> String {
    format!(
        "You are helping decide if an incoming email reply is a simple query that can be \
         safely auto-answered.\n\n\
         Original email (sent by us):\n{original_body}\n\n\
         Incoming reply (from recipient):\n{incoming_reply}\n\n\
         Question:\n\
         Is this a simple query where a short, factual answer is enough \
         (e.g. asking for a link, pricing, availability, quick clarification)?\n\n\
         Return ONLY a valid JSON object with exactly two fields:\n\
         - \"is_simple\": either the string \"yes\" or the string \"no\"\n\
         - \"reason\": a short explanation string\n\n\
         Do NOT include explanation or markdown outside of the JSON."
    )
}

/// Prompt for a plain-text reply body.
pub fn reply_draft_prompt(
    original_body: &str,
    incoming_reply: &str,
    goal: &str,
    sender_name: &str,
) -> String {
    format!(
        "You are writing an email reply on behalf of the user.\n\n\
         Original email we sent:\n{original_body}\n\n\
         Incoming reply from recipient:\n{incoming_reply}\n\n\
         Goal:\n{goal}\n\n\
         Write a short, polite, helpful reply email body in plain text.\n\
         Constraints:\n\
         - No markdown.\n\
         - No emojis.\n\
         - Sign off with \"Best regards, {sender_name}\".\n\n\
         Return ONLY the email body as plain text, no JSON, no quotes, no extra commentary."
    )
}

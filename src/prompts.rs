//! Prompt assembly for suggestion generation.
//!
//! The effective prompt for an (item, profile) pair is the item's own prompt
//! when set, else the profile's default prompt, with `{{column}}` placeholders
//! filled from the item's metadata. The estimator and the invoker both go
//! through [`compose_text`] so previewed tokens match what is sent.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::gateway::Message;
use crate::model::{ContentType, ModelProfile, WorkItem};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("Invalid placeholder regex"));

/// Substitute `{{column}}` placeholders. Unknown columns are left verbatim.
pub fn render_placeholders(template: &str, metadata: &HashMap<String, String>) -> String {
    if metadata.is_empty() || !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let column = &caps[1];
            match metadata.get(column) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Item-level prompt over profile default, placeholders substituted.
pub fn effective_prompt(item: &WorkItem, profile: &ModelProfile) -> String {
    let template = item
        .prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(&profile.default_prompt);
    render_placeholders(template, &item.metadata)
}

/// Prompt followed by content, separated by a blank line.
pub fn compose_text(prompt: &str, content: &str) -> String {
    let prompt = prompt.trim_end();
    if prompt.is_empty() {
        content.to_string()
    } else {
        format!("{prompt}\n\n{content}")
    }
}

/// Messages sent for one unit of work.
pub fn build_messages(content: &str, content_type: ContentType, prompt: &str) -> Vec<Message> {
    match content_type {
        ContentType::Text => vec![Message::user(compose_text(prompt, content))],
        ContentType::Image => vec![Message::user_with_image(prompt, content)],
    }
}

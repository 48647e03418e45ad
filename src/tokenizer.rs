//! Token counting for cost previews.
//!
//! Two BPE families cover the estimate: models whose prompt format matches
//! `o200k_base` (GPT-4o, GPT-4.1, GPT-4.5, GPT-5, the o-series) and a
//! `cl100k_base` fallback for everything else. Counts for non-OpenAI models
//! are approximations.

use once_cell::sync::Lazy;
use serde::Serialize;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

static CL100K: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("Failed to load cl100k_base tokenizer"));
static O200K: Lazy<CoreBPE> =
    Lazy::new(|| o200k_base().expect("Failed to load o200k_base tokenizer"));

/// Model id prefixes (after any `vendor/` route) that use `o200k_base`.
const O200K_PREFIXES: &[&str] = &[
    "gpt-4o",
    "chatgpt-4o",
    "gpt-4.1",
    "gpt-4.5",
    "gpt-5",
    "o1",
    "o3",
    "o4",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerFamily {
    O200k,
    Cl100k,
}

impl TokenizerFamily {
    /// Resolve the family for a provider/model pair.
    ///
    /// Routed ids like `openai/gpt-4o-mini` are matched on the part after the
    /// last `/`. Only OpenAI-served models (direct or routed) get `o200k`.
    pub fn for_model(provider_id: &str, model_id: &str) -> Self {
        let (vendor, name) = match model_id.rsplit_once('/') {
            Some((vendor, name)) => (vendor, name),
            None => (provider_id, model_id),
        };
        let openai_served = matches!(vendor, "openai" | "azure");
        let name = name.to_ascii_lowercase();
        if openai_served && O200K_PREFIXES.iter().any(|p| name.starts_with(p)) {
            TokenizerFamily::O200k
        } else {
            TokenizerFamily::Cl100k
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerFamily::O200k => "o200k_base",
            TokenizerFamily::Cl100k => "cl100k_base",
        }
    }

    fn bpe(&self) -> &'static CoreBPE {
        match self {
            TokenizerFamily::O200k => &*O200K,
            TokenizerFamily::Cl100k => &*CL100K,
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe().encode_with_special_tokens(text).len()
    }
}

/// Count tokens using cl100k_base.
pub fn count_tokens(text: &str) -> usize {
    TokenizerFamily::Cl100k.count_tokens(text)
}

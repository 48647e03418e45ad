//! Work items, assignments, and the model configuration the engine reads.
//!
//! Model profiles and provider connections are owned by a separate
//! configuration collaborator; the engine never mutates them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigurationError;

// =============================================================================
// WORK ITEMS
// =============================================================================

/// Kind of payload an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    /// `content` holds an image URL (or data URL).
    Image,
}

/// Review status of an item.
///
/// `partial` and `needs_adjudication` are only reached through the legacy
/// single-annotator path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    AiProcessed,
    Accepted,
    Edited,
    Rejected,
    Partial,
    NeedsAdjudication,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::AiProcessed => "ai_processed",
            ItemStatus::Accepted => "accepted",
            ItemStatus::Edited => "edited",
            ItemStatus::Rejected => "rejected",
            ItemStatus::Partial => "partial",
            ItemStatus::NeedsAdjudication => "needs_adjudication",
        }
    }

    /// Human-finalized items are frozen against AI processing.
    pub fn is_human_final(&self) -> bool {
        matches!(self, ItemStatus::Accepted | ItemStatus::Edited)
    }

    /// Statuses an AI merge may advance to `ai_processed`.
    pub fn accepts_ai_merge(&self) -> bool {
        matches!(
            self,
            ItemStatus::Pending | ItemStatus::AiProcessed | ItemStatus::Rejected
        )
    }
}

/// One annotator's progress on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

/// One annotator's claim on, and submitted value for, a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub annotator_id: String,
    #[serde(default)]
    pub status: AssignmentStatus,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub annotated_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(annotator_id: impl Into<String>) -> Self {
        Self {
            annotator_id: annotator_id.into(),
            status: AssignmentStatus::Pending,
            value: None,
            annotated_at: None,
        }
    }

    /// Done with a non-blank value. Only these count toward consensus.
    pub fn is_done_with_value(&self) -> bool {
        self.status == AssignmentStatus::Done
            && self
                .value
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
    }
}

/// One annotatable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub status: ItemStatus,
    /// Model-profile id -> generated text.
    #[serde(default)]
    pub ai_suggestions: HashMap<String, String>,
    /// Model-profile id -> rating 1..=5.
    #[serde(default)]
    pub ratings: HashMap<String, u8>,
    #[serde(default)]
    pub is_iaa: bool,
    #[serde(default = "default_required_count")]
    pub iaa_required_count: u32,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub final_annotation: String,
    /// Source columns, used for `{{column}}` prompt placeholders.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Item-level prompt; overrides the profile's default prompt.
    #[serde(default)]
    pub prompt: Option<String>,

    // Legacy single-annotator fields.
    #[serde(default)]
    pub annotator_id: Option<String>,
    #[serde(default)]
    pub annotator_name: Option<String>,
    #[serde(default)]
    pub annotated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub human_annotation: Option<String>,
}

fn default_required_count() -> u32 {
    1
}

impl WorkItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            content_type: ContentType::Text,
            status: ItemStatus::Pending,
            ai_suggestions: HashMap::new(),
            ratings: HashMap::new(),
            is_iaa: false,
            iaa_required_count: 1,
            assignments: Vec::new(),
            final_annotation: String::new(),
            metadata: HashMap::new(),
            prompt: None,
            annotator_id: None,
            annotator_name: None,
            annotated_at: None,
            human_annotation: None,
        }
    }

    pub fn image(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Image,
            ..Self::new(id, url)
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_metadata(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(column.into(), value.into());
        self
    }

    pub fn with_suggestion(mut self, profile_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.ai_suggestions.insert(profile_id.into(), text.into());
        self
    }

    pub fn has_suggestion(&self, profile_id: &str) -> bool {
        self.ai_suggestions.contains_key(profile_id)
    }

    /// Whether a (this item, profile) unit should be generated.
    ///
    /// Accepted and edited items are frozen even under `force`.
    pub fn needs_suggestion(&self, profile_id: &str, force: bool) -> bool {
        if self.status.is_human_final() {
            return false;
        }
        force || !self.has_suggestion(profile_id)
    }

    pub fn assignment(&self, annotator_id: &str) -> Option<&Assignment> {
        self.assignments
            .iter()
            .find(|a| a.annotator_id == annotator_id)
    }
}

// =============================================================================
// MODEL CONFIGURATION
// =============================================================================

/// Credentials and endpoint for one provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: String,
    /// "openai", "openrouter", "anthropic", "google", or a custom id.
    pub provider_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ProviderConnection {
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            api_key: None,
            base_url: None,
            is_active: true,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// API key, if present and non-blank.
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Configured base URL, or the well-known endpoint for the provider.
    pub fn effective_base_url(&self) -> Option<String> {
        if let Some(url) = self.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.trim_end_matches('/').to_string());
        }
        default_base_url(&self.provider_id).map(str::to_string)
    }
}

/// OpenAI-compatible chat endpoints of first-party providers.
pub fn default_base_url(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "google" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        _ => None,
    }
}

/// A named model configuration under a provider connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub connection_id: String,
    pub model_id: String,
    #[serde(default)]
    pub default_prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Manual pricing override, USD per million input tokens.
    #[serde(default)]
    pub input_price_per_million: Option<f64>,
    /// Manual pricing override, USD per million output tokens.
    #[serde(default)]
    pub output_price_per_million: Option<f64>,
}

impl ModelProfile {
    pub fn new(
        id: impl Into<String>,
        connection_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            connection_id: connection_id.into(),
            model_id: model_id.into(),
            default_prompt: String::new(),
            temperature: None,
            max_tokens: None,
            input_price_per_million: None,
            output_price_per_million: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_prompt = prompt.into();
        self
    }

    pub fn with_input_price(mut self, usd_per_million: f64) -> Self {
        self.input_price_per_million = Some(usd_per_million);
        self
    }
}

/// A profile selected for a run, paired with its parent connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedModel {
    pub profile: ModelProfile,
    pub connection: ProviderConnection,
}

impl SelectedModel {
    pub fn new(profile: ModelProfile, connection: ProviderConnection) -> Self {
        Self {
            profile,
            connection,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile.id
    }
}

/// Connections and profiles as exported by the configuration collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub connections: Vec<ProviderConnection>,
    #[serde(default)]
    pub profiles: Vec<ModelProfile>,
}

impl ModelCatalog {
    /// Pair the requested profiles with their connections, in request order.
    ///
    /// An empty `profile_ids` selects every profile.
    pub fn select(&self, profile_ids: &[String]) -> Result<Vec<SelectedModel>, ConfigurationError> {
        let profiles: Vec<&ModelProfile> = if profile_ids.is_empty() {
            self.profiles.iter().collect()
        } else {
            profile_ids
                .iter()
                .map(|id| {
                    self.profiles
                        .iter()
                        .find(|p| &p.id == id)
                        .ok_or_else(|| ConfigurationError::Invalid(format!("unknown profile {id}")))
                })
                .collect::<Result<_, _>>()?
        };

        profiles
            .into_iter()
            .map(|profile| {
                let connection = self
                    .connections
                    .iter()
                    .find(|c| c.id == profile.connection_id)
                    .ok_or_else(|| {
                        ConfigurationError::Invalid(format!(
                            "profile {} references unknown connection {}",
                            profile.id, profile.connection_id
                        ))
                    })?;
                Ok(SelectedModel::new(profile.clone(), connection.clone()))
            })
            .collect()
    }
}

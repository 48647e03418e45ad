//! Model pricing: the built-in official price table and live listing lookups.
//!
//! Prices are USD per million tokens. Per-call costs recorded in usage are in
//! nanodollars (1e-9 USD), so $1.00/1M is 1,000 nanodollars per token.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::error::{ErrorContext, ProviderError};

/// Pricing information for a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Cost of a call in nanodollars.
    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        // 1 USD per million tokens == 1000 nanodollars per token.
        let nanos = input_tokens as f64 * self.input_per_million * 1_000.0
            + output_tokens as f64 * self.output_per_million * 1_000.0;
        nanos.round() as i64
    }
}

// =============================================================================
// OFFICIAL PRICE TABLE
// =============================================================================

// First-party list prices (verify periodically against provider pricing pages).
// Only direct provider connections are listed here; aggregators are priced
// through their live model listing.

const GPT_4O: ModelPricing = ModelPricing::new(2.50, 10.00);
const GPT_4O_MINI: ModelPricing = ModelPricing::new(0.15, 0.60);
const GPT_41: ModelPricing = ModelPricing::new(2.00, 8.00);
const GPT_41_MINI: ModelPricing = ModelPricing::new(0.40, 1.60);
const GPT_41_NANO: ModelPricing = ModelPricing::new(0.10, 0.40);
const GPT_5: ModelPricing = ModelPricing::new(1.25, 10.00);
const GPT_5_MINI: ModelPricing = ModelPricing::new(0.25, 2.00);
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(0.80, 4.00);
const CLAUDE_SONNET: ModelPricing = ModelPricing::new(3.00, 15.00);
const CLAUDE_OPUS: ModelPricing = ModelPricing::new(15.00, 75.00);
const GEMINI_20_FLASH: ModelPricing = ModelPricing::new(0.10, 0.40);
const GEMINI_15_FLASH: ModelPricing = ModelPricing::new(0.075, 0.30);
const GEMINI_15_PRO: ModelPricing = ModelPricing::new(1.25, 5.00);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

/// Keyed by "provider_id:model_id".
fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();

    map.insert("openai:gpt-4o", GPT_4O);
    map.insert("openai:gpt-4o-mini", GPT_4O_MINI);
    map.insert("openai:gpt-4.1", GPT_41);
    map.insert("openai:gpt-4.1-mini", GPT_41_MINI);
    map.insert("openai:gpt-4.1-nano", GPT_41_NANO);
    map.insert("openai:gpt-5", GPT_5);
    map.insert("openai:gpt-5-mini", GPT_5_MINI);

    map.insert("anthropic:claude-3-5-haiku-latest", CLAUDE_35_HAIKU);
    map.insert("anthropic:claude-3-5-haiku-20241022", CLAUDE_35_HAIKU);
    map.insert("anthropic:claude-3-5-sonnet-latest", CLAUDE_SONNET);
    map.insert("anthropic:claude-sonnet-4-20250514", CLAUDE_SONNET);
    map.insert("anthropic:claude-opus-4-20250514", CLAUDE_OPUS);

    map.insert("google:gemini-2.0-flash", GEMINI_20_FLASH);
    map.insert("google:gemini-1.5-flash", GEMINI_15_FLASH);
    map.insert("google:gemini-1.5-pro", GEMINI_15_PRO);

    map
}

/// Official price for a first-party provider/model pair.
pub fn official_pricing(provider_id: &str, model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    map.get(format!("{provider_id}:{model_id}").as_str()).copied()
}

/// Chat cost in nanodollars; zero when the pair has no official price.
pub fn chat_cost(provider_id: &str, model_id: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    official_pricing(provider_id, model_id)
        .map(|p| p.calculate_cost(input_tokens, output_tokens))
        .unwrap_or(0)
}

// =============================================================================
// LIVE PRICING
// =============================================================================

/// Price as reported by a provider's model listing. Either side may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LivePrice {
    pub input_per_million: Option<f64>,
    pub output_per_million: Option<f64>,
}

/// Source of live pricing for a provider/model pair.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    async fn resolve_pricing(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> Result<LivePrice, ProviderError>;
}

/// Never resolves anything. The CLI uses it when live pricing is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLivePricing;

#[async_trait]
impl PricingProvider for NoLivePricing {
    async fn resolve_pricing(&self, _: &str, _: &str) -> Result<LivePrice, ProviderError> {
        Ok(LivePrice::default())
    }
}

/// Live pricing from the OpenRouter public `/models` listing.
///
/// The listing is fetched once per instance and served from memory after.
pub struct OpenRouterPricing {
    client: reqwest::Client,
    base_url: String,
    listing: OnceCell<HashMap<String, LivePrice>>,
}

#[derive(Deserialize)]
struct ModelListing {
    #[serde(default)]
    data: Vec<ListedModel>,
}

#[derive(Deserialize)]
struct ListedModel {
    id: String,
    #[serde(default)]
    pricing: Option<ListedPricing>,
}

/// USD per token, as decimal strings.
#[derive(Deserialize)]
struct ListedPricing {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

impl OpenRouterPricing {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url("https://openrouter.ai/api/v1")
    }

    /// Honors `OPENROUTER_BASE_URL`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            listing: OnceCell::new(),
        })
    }

    async fn fetch_listing(&self) -> Result<HashMap<String, LivePrice>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::provider_with_context(
                "openrouter",
                format!("model listing returned HTTP {}", status.as_u16()),
                ErrorContext::new().with_status(status.as_u16()),
            ));
        }

        let body = response.text().await?;
        let listing: ModelListing = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("openrouter", format!("Invalid model listing JSON: {e}"))
        })?;

        Ok(listing
            .data
            .into_iter()
            .map(|m| {
                let price = m
                    .pricing
                    .map(|p| LivePrice {
                        input_per_million: per_token_to_per_million(p.prompt.as_deref()),
                        output_per_million: per_token_to_per_million(p.completion.as_deref()),
                    })
                    .unwrap_or_default();
                (m.id, price)
            })
            .collect())
    }
}

#[async_trait]
impl PricingProvider for OpenRouterPricing {
    async fn resolve_pricing(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> Result<LivePrice, ProviderError> {
        if provider_id != "openrouter" {
            return Ok(LivePrice::default());
        }
        let listing = self
            .listing
            .get_or_try_init(|| self.fetch_listing())
            .await?;
        Ok(listing.get(model_id).copied().unwrap_or_default())
    }
}

/// Negative sentinel prices ("-1" = variable) are treated as unknown.
fn per_token_to_per_million(raw: Option<&str>) -> Option<f64> {
    let per_token: f64 = raw?.trim().parse().ok()?;
    if !per_token.is_finite() || per_token < 0.0 {
        return None;
    }
    Some(per_token * 1_000_000.0)
}

/// Memoized live price lookups for the life of one cost preview dialog.
///
/// Lookup failures are logged and remembered as "no price" so a flaky listing
/// is not hammered on every preview refresh.
pub struct PricingSession<'a> {
    provider: &'a dyn PricingProvider,
    cache: Mutex<HashMap<(String, String), Option<LivePrice>>>,
}

impl<'a> PricingSession<'a> {
    pub fn new(provider: &'a dyn PricingProvider) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, provider_id: &str, model_id: &str) -> Option<LivePrice> {
        let key = (provider_id.to_string(), model_id.to_string());
        let cached = match self.cache.lock() {
            Ok(cache) => cache.get(&key).copied(),
            Err(_) => None,
        };
        if let Some(hit) = cached {
            return hit;
        }

        let resolved = match self.provider.resolve_pricing(provider_id, model_id).await {
            Ok(price) => Some(price),
            Err(err) => {
                tracing::warn!(
                    provider_id,
                    model_id,
                    error = %err,
                    "live pricing lookup failed"
                );
                None
            }
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, resolved);
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost() {
        // 1K input + 1K output for Claude 3.5 Haiku
        // Input: 1000 * 800 = 800,000 nanos
        // Output: 1000 * 4000 = 4,000,000 nanos
        let cost = chat_cost("anthropic", "claude-3-5-haiku-latest", 1_000, 1_000);
        assert_eq!(cost, 4_800_000);
    }

    #[test]
    fn official_table_is_keyed_by_provider() {
        assert!(official_pricing("openai", "gpt-4o-mini").is_some());
        // Same model id through an aggregator is not first-party.
        assert!(official_pricing("openrouter", "gpt-4o-mini").is_none());
        assert_eq!(chat_cost("custom", "llama", 1_000, 1_000), 0);
    }

    #[test]
    fn per_token_strings_convert_to_per_million() {
        let p = per_token_to_per_million(Some("0.00000015")).unwrap();
        assert!((p - 0.15).abs() < 1e-9);
        assert_eq!(per_token_to_per_million(Some("-1")), None);
        assert_eq!(per_token_to_per_million(Some("n/a")), None);
        assert_eq!(per_token_to_per_million(None), None);
    }
}

//! Pre-run token and cost preview.
//!
//! Token counts use the same prompt composition the invoker sends, so the
//! preview tracks what would actually be submitted. Only input tokens are
//! priced; output length is unknown before the run.

use serde::Serialize;

use crate::config::ConfigurationError;
use crate::gateway::{official_pricing, PricingSession};
use crate::model::{SelectedModel, WorkItem};
use crate::prompts::{compose_text, effective_prompt};
use crate::tokenizer::TokenizerFamily;

/// Where a model's input price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Override set on the profile.
    Manual,
    /// Built-in first-party price table.
    Official,
    /// Provider model listing.
    Live,
    /// Tokens counted, cost unknown.
    Unavailable,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Manual => "manual",
            PriceSource::Official => "official",
            PriceSource::Live => "live",
            PriceSource::Unavailable => "unavailable",
        }
    }
}

/// Tokenizer and price for one selected profile, resolved once per preview.
#[derive(Debug, Clone)]
pub struct ModelPlan<'a> {
    pub model: &'a SelectedModel,
    pub tokenizer: TokenizerFamily,
    pub input_price_per_million: Option<f64>,
    pub source: PriceSource,
}

impl<'a> ModelPlan<'a> {
    /// Tokenizer family only; pricing left unresolved.
    pub fn unpriced(model: &'a SelectedModel) -> Self {
        Self {
            model,
            tokenizer: TokenizerFamily::for_model(
                &model.connection.provider_id,
                &model.profile.model_id,
            ),
            input_price_per_million: None,
            source: PriceSource::Unavailable,
        }
    }

    /// Resolve pricing: manual override, official table, live listing, else unavailable.
    pub async fn resolve(model: &'a SelectedModel, live: Option<&PricingSession<'_>>) -> Self {
        let mut plan = Self::unpriced(model);
        let provider_id = model.connection.provider_id.as_str();
        let model_id = model.profile.model_id.as_str();

        if let Some(price) = model.profile.input_price_per_million {
            plan.input_price_per_million = Some(price);
            plan.source = PriceSource::Manual;
        } else if let Some(pricing) = official_pricing(provider_id, model_id) {
            plan.input_price_per_million = Some(pricing.input_per_million);
            plan.source = PriceSource::Official;
        } else if let Some(session) = live {
            if let Some(price) = session
                .lookup(provider_id, model_id)
                .await
                .and_then(|p| p.input_per_million)
            {
                plan.input_price_per_million = Some(price);
                plan.source = PriceSource::Live;
            }
        }
        plan
    }

    /// Tokens this model would be sent for `item`.
    pub fn count_item(&self, item: &WorkItem) -> u64 {
        let prompt = effective_prompt(item, &self.model.profile);
        self.tokenizer
            .count_tokens(&compose_text(&prompt, &item.content)) as u64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelTokens {
    pub profile_id: String,
    pub model_id: String,
    pub tokenizer: &'static str,
    /// Items this model would be called for.
    pub items: usize,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenEstimate {
    pub input_tokens: u64,
    /// Distinct items with at least one pending unit.
    pub items: usize,
    pub models: usize,
    pub per_model: Vec<ModelTokens>,
}

fn count_plans(items: &[WorkItem], plans: &[ModelPlan<'_>], force: bool) -> TokenEstimate {
    let mut estimate = TokenEstimate {
        models: plans.len(),
        ..Default::default()
    };

    let mut counted = vec![false; items.len()];
    for plan in plans {
        let profile_id = plan.model.profile_id();
        let mut row = ModelTokens {
            profile_id: profile_id.to_string(),
            model_id: plan.model.profile.model_id.clone(),
            tokenizer: plan.tokenizer.as_str(),
            items: 0,
            tokens: 0,
        };
        for (idx, item) in items.iter().enumerate() {
            if !item.needs_suggestion(profile_id, force) {
                continue;
            }
            row.items += 1;
            row.tokens += plan.count_item(item);
            counted[idx] = true;
        }
        estimate.input_tokens += row.tokens;
        estimate.per_model.push(row);
    }
    estimate.items = counted.iter().filter(|c| **c).count();
    estimate
}

/// Input tokens the selected models would be sent for `items`.
///
/// Applies the same pending rule as the processor.
pub fn estimate_tokens(items: &[WorkItem], models: &[SelectedModel], force: bool) -> TokenEstimate {
    let plans: Vec<ModelPlan<'_>> = models.iter().map(ModelPlan::unpriced).collect();
    count_plans(items, &plans, force)
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCost {
    pub profile_id: String,
    pub model_id: String,
    pub tokenizer: &'static str,
    pub tokens: u64,
    pub price_per_million: Option<f64>,
    pub cost_usd: Option<f64>,
    pub source: PriceSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub items: usize,
    /// Sum over models with a resolved price.
    pub total_cost_usd: f64,
    /// Profile ids whose price could not be resolved.
    pub unresolved_models: Vec<String>,
    pub per_model: Vec<ModelCost>,
}

impl CostEstimate {
    pub fn is_complete(&self) -> bool {
        self.unresolved_models.is_empty()
    }

    /// "cost unknown for N of M models", or `None` when every price resolved.
    pub fn coverage_note(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        let n = self.unresolved_models.len();
        let m = self.per_model.len();
        let noun = if m == 1 { "model" } else { "models" };
        Some(format!("cost unknown for {n} of {m} {noun}"))
    }
}

/// Token counts plus pricing for a cost preview.
///
/// `live` is consulted only for models without a manual or official price.
pub async fn estimate_cost(
    items: &[WorkItem],
    models: &[SelectedModel],
    force: bool,
    live: Option<&PricingSession<'_>>,
) -> Result<CostEstimate, ConfigurationError> {
    if models.is_empty() {
        return Err(ConfigurationError::NoModelSelected);
    }

    let mut plans = Vec::with_capacity(models.len());
    for model in models {
        plans.push(ModelPlan::resolve(model, live).await);
    }

    let tokens = count_plans(items, &plans, force);

    let mut total_cost_usd = 0.0;
    let mut unresolved_models = Vec::new();
    let mut per_model = Vec::with_capacity(plans.len());
    for (plan, row) in plans.iter().zip(tokens.per_model) {
        let cost_usd = plan
            .input_price_per_million
            .map(|price| row.tokens as f64 / 1_000_000.0 * price);
        match cost_usd {
            Some(cost) => total_cost_usd += cost,
            None => unresolved_models.push(row.profile_id.clone()),
        }
        per_model.push(ModelCost {
            profile_id: row.profile_id,
            model_id: row.model_id,
            tokenizer: row.tokenizer,
            tokens: row.tokens,
            price_per_million: plan.input_price_per_million,
            cost_usd,
            source: plan.source,
        });
    }

    if !unresolved_models.is_empty() {
        tracing::debug!(
            unresolved = unresolved_models.len(),
            models = per_model.len(),
            "cost preview has models without pricing"
        );
    }

    Ok(CostEstimate {
        input_tokens: tokens.input_tokens,
        items: tokens.items,
        total_cost_usd,
        unresolved_models,
        per_model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NoLivePricing;
    use crate::model::{ItemStatus, ModelProfile, ProviderConnection};

    fn model(profile: &str, provider: &str, model_id: &str) -> SelectedModel {
        SelectedModel::new(
            ModelProfile::new(profile, "c1", model_id),
            ProviderConnection::new("c1", provider).with_api_key("k"),
        )
    }

    #[test]
    fn skips_frozen_items_and_existing_suggestions() {
        let items = vec![
            WorkItem::new("1", "alpha beta"),
            WorkItem::new("2", "gamma").with_suggestion("p1", "done"),
            WorkItem::new("3", "delta").with_status(ItemStatus::Accepted),
        ];
        let models = vec![model("p1", "local", "m")];

        let est = estimate_tokens(&items, &models, false);
        assert_eq!(est.items, 1);
        assert_eq!(est.per_model[0].items, 1);

        let forced = estimate_tokens(&items, &models, true);
        assert_eq!(forced.items, 2);
        assert!(forced.input_tokens > est.input_tokens);
    }

    #[test]
    fn prompt_is_counted_with_content() {
        let items = vec![WorkItem::new("1", "body text")];
        let bare = estimate_tokens(&items, &[model("p1", "local", "m")], false);

        let mut prompted = model("p1", "local", "m");
        prompted.profile.default_prompt = "Classify the sentiment of this review".into();
        let with_prompt = estimate_tokens(&items, &[prompted], false);

        assert!(with_prompt.input_tokens > bare.input_tokens);
    }

    #[tokio::test]
    async fn manual_price_wins_over_official() {
        let mut m = model("p1", "openai", "gpt-4o-mini");
        m.profile.input_price_per_million = Some(2.0);
        let plan = ModelPlan::resolve(&m, None).await;
        assert_eq!(plan.source, PriceSource::Manual);
        assert_eq!(plan.input_price_per_million, Some(2.0));

        let official = model("p2", "openai", "gpt-4o-mini");
        let plan = ModelPlan::resolve(&official, None).await;
        assert_eq!(plan.source, PriceSource::Official);
        assert_eq!(plan.tokenizer, TokenizerFamily::O200k);
    }

    #[tokio::test]
    async fn no_models_is_a_configuration_error() {
        let err = estimate_cost(&[WorkItem::new("1", "x")], &[], false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::NoModelSelected));
    }

    #[tokio::test]
    async fn unknown_models_are_reported_not_priced() {
        let items = vec![WorkItem::new("1", "some text")];
        let models = vec![model("p1", "openai", "gpt-4o-mini"), model("p2", "local", "mystery")];
        let est = estimate_cost(&items, &models, false, None).await.unwrap();

        assert_eq!(est.unresolved_models, vec!["p2".to_string()]);
        assert_eq!(est.per_model[1].source, PriceSource::Unavailable);
        assert!(est.per_model[1].cost_usd.is_none());
        assert!(est.per_model[1].tokens > 0);
        assert_eq!(est.coverage_note().as_deref(), Some("cost unknown for 1 of 2 models"));
    }

    #[tokio::test]
    async fn offline_session_leaves_unknown_models_unpriced() {
        let offline = NoLivePricing;
        let session = PricingSession::new(&offline);
        let items = vec![WorkItem::new("1", "some text")];
        let models = vec![model("p1", "openai", "gpt-4o-mini"), model("p2", "local", "mystery")];

        let est = estimate_cost(&items, &models, false, Some(&session)).await.unwrap();
        assert_eq!(est.per_model[0].source, PriceSource::Official);
        assert_eq!(est.per_model[1].source, PriceSource::Unavailable);
        assert_eq!(est.unresolved_models, vec!["p2".to_string()]);
    }
}

//! One (work item, model profile) unit of work.
//!
//! The invoker renders the effective prompt, then submits the external
//! generate call through the shared [`Dispatcher`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::Dispatcher;
use crate::gateway::{Attribution, ProviderError};
use crate::model::{ContentType, ModelProfile, ProviderConnection, SelectedModel, WorkItem};
use crate::prompts::effective_prompt;

/// Everything an external generator needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub item_id: &'a str,
    pub content: &'a str,
    pub content_type: ContentType,
    pub prompt: &'a str,
    pub profile: &'a ModelProfile,
    pub connection: &'a ProviderConnection,
    pub attribution: &'a Attribution,
}

/// "Generate text for this item with this model."
///
/// Every failure mode (credentials, inactive connection, HTTP, network,
/// malformed response) surfaces as a [`ProviderError`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, ProviderError>;
}

/// Result of one unit, keyed for merging.
#[derive(Debug)]
pub struct UnitOutcome {
    pub item_id: String,
    pub profile_id: String,
    pub result: Result<String, ProviderError>,
}

#[derive(Clone)]
pub struct ModelInvoker {
    generator: Arc<dyn TextGenerator>,
    dispatcher: Arc<Dispatcher>,
}

impl ModelInvoker {
    pub fn new(generator: Arc<dyn TextGenerator>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            generator,
            dispatcher,
        }
    }

    /// Run one unit. Waits for dispatcher admission; never retries.
    pub async fn invoke(
        &self,
        item: &WorkItem,
        model: &SelectedModel,
        attribution: &Attribution,
    ) -> UnitOutcome {
        let prompt = effective_prompt(item, &model.profile);
        let request = GenerateRequest {
            item_id: &item.id,
            content: &item.content,
            content_type: item.content_type,
            prompt: &prompt,
            profile: &model.profile,
            connection: &model.connection,
            attribution,
        };

        let generator = self.generator.as_ref();
        let result = self
            .dispatcher
            .submit(move || generator.generate(request))
            .await;

        UnitOutcome {
            item_id: item.id.clone(),
            profile_id: model.profile.id.clone(),
            result,
        }
    }
}

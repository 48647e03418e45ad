//! Provider gateway: chat completions across configured provider connections.

pub mod error;
pub mod openai_compat;
pub mod pricing;
pub mod types;
pub mod usage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::invoker::{GenerateRequest, TextGenerator};
use crate::model::ProviderConnection;
use crate::prompts::build_messages;
use openai_compat::{ChatCompletionsAdapter, ChatProvider};
use usage::{CallStatus, ProviderCallRecord};

pub use error::{ErrorContext, ProviderError};
pub use pricing::*;
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

/// Production [`TextGenerator`]: one HTTP adapter per provider connection,
/// usage recorded for every call.
pub struct ProviderGateway<U: UsageSink> {
    adapters: Mutex<HashMap<String, ChatCompletionsAdapter>>,
    usage_sink: Arc<U>,
    timeout: Duration,
}

impl<U: UsageSink> ProviderGateway<U> {
    pub fn new(usage_sink: Arc<U>) -> Self {
        Self::with_timeout(usage_sink, openai_compat::timeout_from_env())
    }

    pub fn with_timeout(usage_sink: Arc<U>, timeout: Duration) -> Self {
        Self {
            adapters: Mutex::new(HashMap::new()),
            usage_sink,
            timeout,
        }
    }

    /// Adapter for a connection, built on first use.
    ///
    /// Rejects inactive connections and missing keys before any request.
    fn adapter_for(
        &self,
        connection: &ProviderConnection,
    ) -> Result<ChatCompletionsAdapter, ProviderError> {
        if !connection.is_active {
            return Err(ProviderError::config(format!(
                "connection {} is inactive",
                connection.id
            )));
        }
        let api_key = connection.usable_api_key().ok_or_else(|| {
            ProviderError::config(format!("connection {} has no API key", connection.id))
        })?;
        let base_url = connection.effective_base_url().ok_or_else(|| {
            ProviderError::config(format!(
                "connection {} has no base URL and provider {} has no default",
                connection.id, connection.provider_id
            ))
        })?;

        // Key on everything that shapes the client so edited credentials take effect.
        let cache_key = format!(
            "{}|{}|{}",
            connection.id,
            base_url,
            blake3::hash(api_key.as_bytes()).to_hex()
        );

        if let Ok(adapters) = self.adapters.lock() {
            if let Some(adapter) = adapters.get(&cache_key) {
                return Ok(adapter.clone());
            }
        }

        let adapter = ChatCompletionsAdapter::new(
            connection.provider_id.clone(),
            api_key,
            base_url,
            self.timeout,
        )?;
        if let Ok(mut adapters) = self.adapters.lock() {
            adapters.insert(cache_key, adapter.clone());
        }
        Ok(adapter)
    }

    pub async fn chat(
        &self,
        connection: &ProviderConnection,
        req: ChatRequest,
        item_id: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let adapter = self.adapter_for(connection)?;
        match adapter.chat(&req).await {
            Ok(resp) => {
                self.record_usage(connection, &req, &resp, item_id, CallStatus::Success, None, None)
                    .await;
                Ok(resp)
            }
            Err(err) => {
                self.record_usage(
                    connection,
                    &req,
                    &ChatResponse::empty(),
                    item_id,
                    CallStatus::Error,
                    Some(err.code().to_string()),
                    err.request_id().map(str::to_string),
                )
                .await;
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_usage(
        &self,
        connection: &ProviderConnection,
        req: &ChatRequest,
        resp: &ChatResponse,
        item_id: Option<&str>,
        status: CallStatus,
        error_code: Option<String>,
        request_id: Option<String>,
    ) {
        let record = ProviderCallRecord::new(
            connection.provider_id.clone(),
            "chat/completions",
            req.model_id.clone(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens as i32, resp.output_tokens as i32)
        .cost(resp.cost_nanodollars)
        .user(req.attribution.user_id)
        .run(req.attribution.run_id)
        .latency(resp.latency.as_millis() as i32)
        .request_id(request_id);

        let record = match item_id {
            Some(id) => record.item(id),
            None => record,
        };

        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}

#[async_trait]
impl<U: UsageSink> TextGenerator for ProviderGateway<U> {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, ProviderError> {
        let messages = build_messages(request.content, request.content_type, request.prompt);
        let req = ChatRequest::new(
            request.profile.model_id.clone(),
            messages,
            request.attribution.clone(),
        )
        .temperature(request.profile.temperature)
        .max_tokens(request.profile.max_tokens);

        let resp = self
            .chat(request.connection, req, Some(request.item_id))
            .await?;
        Ok(resp.content)
    }
}

//! Batch/window processing of (item, model) units.
//!
//! Eligible items are cut into batches of `batch_size`; batches are grouped
//! into windows of `concurrent_batches_per_window`. Windows run one after
//! another, batches inside a window run together, and every unit of a batch is
//! submitted to the shared [`Dispatcher`](crate::dispatch::Dispatcher) at once.
//! Results merge into the [`ItemStore`] at the end of each batch.
//!
//! A failing unit never stops its siblings or later windows. The first
//! failure is kept and returned after the whole scope has been attempted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{ConfigurationError, EngineConfig};
use crate::dispatch::Dispatcher;
use crate::gateway::{Attribution, ProviderError};
use crate::hooks::{ItemObserver, ProgressObserver};
use crate::invoker::{ModelInvoker, TextGenerator, UnitOutcome};
use crate::model::{SelectedModel, WorkItem};
use crate::store::{ItemStore, Scope, SuggestionPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub concurrent_batches_per_window: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ProcessorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrent_batches_per_window: config.concurrent_batches_per_window.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub scope: Scope,
    pub models: Vec<SelectedModel>,
    /// Regenerate suggestions that already exist. Accepted/edited items stay frozen.
    pub force: bool,
    pub user_id: Option<Uuid>,
}

impl ProcessRequest {
    pub fn new(scope: Scope, models: Vec<SelectedModel>) -> Self {
        Self {
            scope,
            models,
            force: false,
            user_id: None,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessSummary {
    pub run_id: Uuid,
    /// Items in scope with at least one pending unit.
    pub items: usize,
    pub batches: usize,
    pub windows: usize,
    pub units_submitted: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub latency_ms: u128,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("{failed} of {submitted} units failed; first on item {item_id} with profile {profile_id}: {first}")]
    Partial {
        #[source]
        first: ProviderError,
        item_id: String,
        profile_id: String,
        failed: usize,
        submitted: usize,
        summary: ProcessSummary,
    },
}

/// Check the selected models before any unit is submitted.
pub fn validate_models(models: &[SelectedModel]) -> Result<(), ConfigurationError> {
    if models.is_empty() {
        return Err(ConfigurationError::NoModelSelected);
    }
    let mut seen = HashSet::new();
    for model in models {
        let profile = &model.profile;
        let connection = &model.connection;
        if !seen.insert(profile.id.as_str()) {
            return Err(ConfigurationError::DuplicateProfile(profile.id.clone()));
        }
        if profile.connection_id != connection.id {
            return Err(ConfigurationError::ConnectionMismatch {
                profile_id: profile.id.clone(),
                expected: profile.connection_id.clone(),
                actual: connection.id.clone(),
            });
        }
        if !connection.is_active {
            return Err(ConfigurationError::ConnectionInactive {
                profile_id: profile.id.clone(),
                connection_id: connection.id.clone(),
            });
        }
        if connection.usable_api_key().is_none() {
            return Err(ConfigurationError::MissingApiKey {
                profile_id: profile.id.clone(),
                connection_id: connection.id.clone(),
            });
        }
    }
    Ok(())
}

struct UnitFailure {
    item_id: String,
    profile_id: String,
    error: ProviderError,
}

#[derive(Default)]
struct BatchOutcome {
    submitted: usize,
    succeeded: usize,
    failures: Vec<UnitFailure>,
}

pub struct BatchWindowProcessor {
    invoker: ModelInvoker,
    config: ProcessorConfig,
    observer: Option<Arc<dyn ItemObserver>>,
}

impl BatchWindowProcessor {
    pub fn new(invoker: ModelInvoker, config: ProcessorConfig) -> Self {
        Self {
            invoker,
            config,
            observer: None,
        }
    }

    /// Processor with its own dispatcher sized from `config`.
    pub fn from_config(generator: Arc<dyn TextGenerator>, config: &EngineConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.max_inflight));
        Self::new(ModelInvoker::new(generator, dispatcher), ProcessorConfig::from(config))
    }

    pub fn with_observer(mut self, observer: Arc<dyn ItemObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> ProcessorConfig {
        self.config
    }

    /// Generate suggestions for every pending (item, model) pair in scope.
    pub async fn run(
        &self,
        store: &ItemStore,
        request: &ProcessRequest,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<ProcessSummary, ProcessError> {
        validate_models(&request.models)?;

        let start = Instant::now();
        let run_id = Uuid::new_v4();
        let mut attribution = Attribution::new("processor::generate").with_run(run_id);
        attribution.user_id = request.user_id;

        let eligible: Vec<WorkItem> = store
            .select(&request.scope)
            .into_iter()
            .filter(|item| {
                request
                    .models
                    .iter()
                    .any(|m| item.needs_suggestion(m.profile_id(), request.force))
            })
            .collect();

        let batch_size = self.config.batch_size;
        let batches: Vec<&[WorkItem]> = eligible.chunks(batch_size).collect();
        let windows: Vec<&[&[WorkItem]]> = batches
            .chunks(self.config.concurrent_batches_per_window)
            .collect();

        let total = eligible.len();
        let mut summary = ProcessSummary {
            run_id,
            items: total,
            batches: batches.len(),
            windows: windows.len(),
            ..Default::default()
        };

        tracing::info!(
            run_id = %run_id,
            items = total,
            models = request.models.len(),
            batches = summary.batches,
            windows = summary.windows,
            force = request.force,
            "processing started"
        );

        let mut first_failure: Option<UnitFailure> = None;
        let mut batches_completed = 0usize;

        for (window_idx, window) in windows.iter().enumerate() {
            let outcomes = join_all(window.iter().map(|batch| {
                self.run_batch(store, batch, &request.models, request.force, &attribution)
            }))
            .await;

            for outcome in outcomes {
                summary.units_submitted += outcome.submitted;
                summary.units_succeeded += outcome.succeeded;
                summary.units_failed += outcome.failures.len();
                if first_failure.is_none() {
                    first_failure = outcome.failures.into_iter().next();
                }
            }

            batches_completed += window.len();
            let processed = (batches_completed * batch_size).min(total);
            tracing::debug!(
                run_id = %run_id,
                window = window_idx,
                processed,
                total,
                "window complete"
            );
            if let Some(progress) = progress {
                progress.on_progress(processed, total);
            }
        }

        summary.latency_ms = start.elapsed().as_millis();

        tracing::info!(
            run_id = %run_id,
            submitted = summary.units_submitted,
            succeeded = summary.units_succeeded,
            failed = summary.units_failed,
            latency_ms = summary.latency_ms as u64,
            "processing finished"
        );

        match first_failure {
            None => Ok(summary),
            Some(failure) => Err(ProcessError::Partial {
                first: failure.error,
                item_id: failure.item_id,
                profile_id: failure.profile_id,
                failed: summary.units_failed,
                submitted: summary.units_submitted,
                summary,
            }),
        }
    }

    async fn run_batch(
        &self,
        store: &ItemStore,
        batch: &[WorkItem],
        models: &[SelectedModel],
        force: bool,
        attribution: &Attribution,
    ) -> BatchOutcome {
        let units = models.iter().flat_map(move |model| {
            batch
                .iter()
                .filter(move |item| item.needs_suggestion(model.profile_id(), force))
                .map(move |item| (item, model))
        });

        let results: Vec<UnitOutcome> = join_all(
            units.map(|(item, model)| self.invoker.invoke(item, model, attribution)),
        )
        .await;

        let mut outcome = BatchOutcome {
            submitted: results.len(),
            ..Default::default()
        };
        let mut patches = Vec::with_capacity(results.len());
        for unit in results {
            match unit.result {
                Ok(text) => {
                    outcome.succeeded += 1;
                    patches.push(SuggestionPatch {
                        item_id: unit.item_id,
                        profile_id: unit.profile_id,
                        text,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        item_id = %unit.item_id,
                        profile_id = %unit.profile_id,
                        code = error.code(),
                        error = %error,
                        "unit failed"
                    );
                    outcome.failures.push(UnitFailure {
                        item_id: unit.item_id,
                        profile_id: unit.profile_id,
                        error,
                    });
                }
            }
        }

        let updated = store.apply_suggestions(patches);
        tracing::debug!(
            units = outcome.submitted,
            merged = updated.len(),
            failed = outcome.failures.len(),
            "batch merged"
        );

        if let Some(observer) = &self.observer {
            for item in &updated {
                if let Err(e) = observer.on_item_updated(item).await {
                    tracing::warn!(item_id = %item.id, error = %e, "item observer failed");
                }
            }
        }

        outcome
    }
}

#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annotation_harness::config::EngineConfig;
use annotation_harness::estimate::estimate_cost;
use annotation_harness::hooks::ProgressObserver;
use annotation_harness::gateway::{
    NoLivePricing, OpenRouterPricing, PricingProvider, PricingSession, ProviderGateway,
    TracingUsageSink,
};
use annotation_harness::iaa::{self, Resolution};
use annotation_harness::model::{ModelCatalog, WorkItem};
use annotation_harness::processor::{BatchWindowProcessor, ProcessError, ProcessRequest};
use annotation_harness::store::{ItemStore, Scope};
use annotation_harness::trace::JsonlUpdateSink;

#[derive(Parser)]
#[command(name = "annotate", version, about = "Multi-model annotation harness CLI")]
struct Cli {
    /// Engine config JSON (defaults, then file, then ANNOTATE_* env, then flags)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Work items JSON array
    #[arg(long)]
    items: PathBuf,
    /// Model catalog JSON: {"connections": [...], "profiles": [...]}
    #[arg(long)]
    models: PathBuf,
    /// Profile ids to use (repeatable). Defaults to every profile in the catalog.
    #[arg(long = "profile")]
    profiles: Vec<String>,
    /// Restrict to these item ids (repeatable)
    #[arg(long = "item")]
    item_ids: Vec<String>,
    /// Regenerate suggestions that already exist
    #[arg(long)]
    force: bool,
}

impl ModelArgs {
    fn scope(&self) -> Scope {
        match self.item_ids.as_slice() {
            [] => Scope::All,
            [one] => Scope::Single(one.clone()),
            many => Scope::Items(many.to_vec()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Preview input tokens and cost for a run
    Estimate {
        #[command(flatten)]
        args: ModelArgs,
        /// Look up prices missing from the built-in table via OpenRouter /models
        #[arg(long)]
        live_pricing: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate suggestions and write the updated items
    Process {
        #[command(flatten)]
        args: ModelArgs,
        #[arg(long)]
        out: PathBuf,
        /// JSONL file receiving every item update
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        max_inflight: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        concurrent_batches: Option<usize>,
    },
    /// Flag the IAA subset of items and reset assignments
    Allocate {
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        project: String,
        /// Percent of items (0-100); enables IAA
        #[arg(long)]
        portion: Option<f64>,
        #[arg(long)]
        annotators: Option<u32>,
        #[arg(long)]
        seed: Option<u32>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Recompute consensus for items that use assignments
    Resolve {
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct ResolveSummary {
    items: usize,
    accepted: usize,
    pending: usize,
    /// Items without assignments, left as their reviewer set them.
    skipped: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annotation_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Estimate {
            args,
            live_pricing,
            out,
        } => {
            let store = ItemStore::new(read_json::<Vec<WorkItem>>(&args.items)?);
            let catalog: ModelCatalog = read_json(&args.models)?;
            let models = catalog.select(&args.profiles)?;
            let items = store.select(&args.scope());

            let pricing: Box<dyn PricingProvider> = if live_pricing {
                Box::new(OpenRouterPricing::from_env()?)
            } else {
                Box::new(NoLivePricing)
            };
            let session = PricingSession::new(pricing.as_ref());
            let estimate = estimate_cost(&items, &models, args.force, Some(&session)).await?;

            if let Some(note) = estimate.coverage_note() {
                tracing::warn!("{note}");
            }
            emit(out.as_deref(), &estimate)?;
        }
        Commands::Process {
            args,
            out,
            trace,
            max_inflight,
            batch_size,
            concurrent_batches,
        } => {
            if let Some(v) = max_inflight {
                config.max_inflight = v;
            }
            if let Some(v) = batch_size {
                config.batch_size = v;
            }
            if let Some(v) = concurrent_batches {
                config.concurrent_batches_per_window = v;
            }
            config.validate()?;

            let store = ItemStore::new(read_json::<Vec<WorkItem>>(&args.items)?);
            let catalog: ModelCatalog = read_json(&args.models)?;
            let models = catalog.select(&args.profiles)?;
            let request = ProcessRequest::new(args.scope(), models).force(args.force);

            let gateway = Arc::new(ProviderGateway::new(Arc::new(TracingUsageSink)));
            let mut processor = BatchWindowProcessor::from_config(gateway, &config);

            let mut trace_worker = None;
            if let Some(path) = trace.as_ref() {
                let (sink, worker) = JsonlUpdateSink::new(path)?;
                processor = processor.with_observer(Arc::new(sink));
                trace_worker = Some(worker);
            }

            let progress: &dyn ProgressObserver = &|processed: usize, total: usize| {
                tracing::info!(processed, total, "progress");
            };
            let result = processor.run(&store, &request, Some(progress)).await;

            // Dropping the processor releases the sink so the writer can drain.
            drop(processor);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }

            write_json(&out, &store.into_items())?;

            match result {
                Ok(summary) => emit(None, &summary)?,
                Err(err) => {
                    if let ProcessError::Partial { summary, .. } = &err {
                        emit(None, summary)?;
                    }
                    return Err(err.into());
                }
            }
        }
        Commands::Allocate {
            items,
            project,
            portion,
            annotators,
            seed,
            out,
        } => {
            if let Some(p) = portion {
                config.iaa.enabled = true;
                config.iaa.portion_percent = p;
            }
            if let Some(a) = annotators {
                config.iaa.annotators_per_item = a;
            }
            if let Some(s) = seed {
                config.iaa.seed = s;
            }

            let mut items: Vec<WorkItem> = read_json(&items)?;
            let allocation = iaa::allocate(&mut items, &config.iaa, &project)?;
            write_json(&out, &items)?;
            emit(None, &allocation)?;
        }
        Commands::Resolve { items, out } => {
            let mut items: Vec<WorkItem> = read_json(&items)?;
            let mut summary = ResolveSummary {
                items: items.len(),
                accepted: 0,
                pending: 0,
                skipped: 0,
            };
            for item in items.iter_mut() {
                if !iaa::uses_assignments(item) {
                    summary.skipped += 1;
                    continue;
                }
                let resolution: Resolution = iaa::resolve(item);
                if resolution.is_complete() {
                    summary.accepted += 1;
                } else {
                    summary.pending += 1;
                }
                iaa::apply_resolution(item, &resolution);
            }
            write_json(&out, &items)?;
            emit(None, &summary)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let base = match path {
        Some(path) => read_json(path)?,
        None => EngineConfig::default(),
    };
    let config = base.overlay_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}

/// Pretty JSON to `out`, or stdout.
fn emit<T: Serialize>(out: Option<&Path>, value: &T) -> Result<(), io::Error> {
    match out {
        Some(path) => write_json(path, value),
        None => {
            let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
            println!("{json}");
            Ok(())
        }
    }
}

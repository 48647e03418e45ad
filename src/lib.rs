#![forbid(unsafe_code)]

//! # annotation-harness
//!
//! Concurrent multi-model annotation for labeling projects.
//!
//! Given work items and a selection of model profiles, the harness previews
//! token usage and cost, generates one suggestion per (item, model) pair with a
//! bounded number of calls in flight, and merges results into shared item
//! state without clobbering concurrent human edits. For inter-annotator
//! agreement it allocates a reproducible subset of items to several annotators
//! and resolves consensus from their assignments.
//!
//! Flow: [`estimate`] → [`processor`] (through [`dispatch`] and [`invoker`]) →
//! [`review`] or [`iaa`].

pub mod config;
pub mod dispatch;
pub mod estimate;
pub mod gateway;
pub mod hooks;
pub mod iaa;
pub mod invoker;
pub mod model;
pub mod processor;
pub mod prompts;
pub mod review;
pub mod store;
pub mod tokenizer;
pub mod trace;

pub use config::{ConfigurationError, EngineConfig, IaaConfig};
pub use dispatch::Dispatcher;
pub use estimate::{estimate_cost, estimate_tokens, CostEstimate, PriceSource, TokenEstimate};
pub use gateway::{Attribution, ProviderError, ProviderGateway, UsageSink};
pub use hooks::{ItemObserver, ObserverError, ProgressObserver};
pub use iaa::{allocate, resolve, update_assignment, AssignmentAction, IaaError, Resolution};
pub use invoker::{GenerateRequest, ModelInvoker, TextGenerator};
pub use model::{
    Assignment, AssignmentStatus, ContentType, ItemStatus, ModelProfile, ProviderConnection,
    SelectedModel, WorkItem,
};
pub use processor::{BatchWindowProcessor, ProcessError, ProcessRequest, ProcessSummary};
pub use review::ReviewError;
pub use store::{ItemStore, Scope};
pub use trace::{JsonlUpdateSink, TraceError, TraceWorker};

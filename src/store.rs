//! In-memory item arena shared by the processor and review paths.
//!
//! Every mutation is a field-level patch applied under the lock to the item as
//! it is *now*, so concurrent batches and human edits never overwrite each
//! other with stale copies.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::hooks::ItemObserver;
use crate::iaa::{self, AssignmentAction, IaaError, Resolution};
use crate::model::{ItemStatus, WorkItem};

/// Which items a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    All,
    Items(Vec<String>),
    Single(String),
}

/// One generated suggestion to merge.
#[derive(Debug, Clone)]
pub struct SuggestionPatch {
    pub item_id: String,
    pub profile_id: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct ItemStore {
    items: Mutex<IndexMap<String, WorkItem>>,
}

impl ItemStore {
    /// Later duplicates of an id replace earlier ones in place.
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let items = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        Self {
            items: Mutex::new(items),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, WorkItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.lock().get(id).cloned()
    }

    /// Copy of every item, in insertion order.
    pub fn snapshot(&self) -> Vec<WorkItem> {
        self.lock().values().cloned().collect()
    }

    /// Copies of the items in `scope`, in insertion order. Unknown ids are ignored.
    pub fn select(&self, scope: &Scope) -> Vec<WorkItem> {
        let items = self.lock();
        match scope {
            Scope::All => items.values().cloned().collect(),
            Scope::Items(ids) => items
                .values()
                .filter(|item| ids.iter().any(|id| id == &item.id))
                .cloned()
                .collect(),
            Scope::Single(id) => items.get(id).cloned().into_iter().collect(),
        }
    }

    /// Merge generated suggestions into the current items.
    ///
    /// Status advances to `ai_processed` only from pending, ai_processed, or
    /// rejected. Returns the updated items, one per touched id.
    pub fn apply_suggestions(&self, patches: Vec<SuggestionPatch>) -> Vec<WorkItem> {
        let mut items = self.lock();
        let mut touched: Vec<String> = Vec::new();
        for patch in patches {
            let Some(item) = items.get_mut(&patch.item_id) else {
                tracing::warn!(item_id = %patch.item_id, "suggestion for unknown item dropped");
                continue;
            };
            item.ai_suggestions.insert(patch.profile_id, patch.text);
            if item.status.accepts_ai_merge() {
                item.status = ItemStatus::AiProcessed;
            }
            if !touched.contains(&patch.item_id) {
                touched.push(patch.item_id);
            }
        }
        touched
            .iter()
            .filter_map(|id| items.get(id).cloned())
            .collect()
    }

    /// Apply `f` to one item under the lock and return its result.
    pub fn update<T, F>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut WorkItem) -> T,
    {
        self.lock().get_mut(id).map(f)
    }

    /// Apply an annotator's action to one item, re-resolve it, and hand the
    /// result to `observer`.
    ///
    /// The lock is released before the observer runs. Observer failures are
    /// logged and do not undo the change.
    pub async fn update_assignment(
        &self,
        item_id: &str,
        annotator_id: &str,
        action: AssignmentAction,
        now: DateTime<Utc>,
        observer: Option<&dyn ItemObserver>,
    ) -> Result<Resolution, IaaError> {
        let (resolution, updated) = {
            let mut items = self.lock();
            let item = items
                .get_mut(item_id)
                .ok_or_else(|| IaaError::UnknownItem(item_id.to_string()))?;
            let resolution = iaa::update_assignment(item, annotator_id, action, now)?;
            (resolution, item.clone())
        };

        if let Some(observer) = observer {
            if let Err(e) = observer.on_item_updated(&updated).await {
                tracing::warn!(item_id, error = %e, "item observer failed");
            }
        }
        Ok(resolution)
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_values()
            .collect()
    }
}

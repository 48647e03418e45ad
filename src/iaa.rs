//! Inter-annotator agreement: deterministic allocation and consensus.
//!
//! Allocation picks a reproducible subset of items that need several
//! independent annotations. Consensus is recomputed from an item's
//! assignments after every assignment change; it is never stored separately
//! from the state it is derived from.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;

use crate::config::IaaConfig;
use crate::model::{Assignment, AssignmentStatus, ItemStatus, WorkItem};

#[derive(Debug, thiserror::Error)]
pub enum IaaError {
    #[error("IAA portion must be within [0, 100]: {0}")]
    InvalidPortion(f64),
    #[error("blank submission from {annotator_id} on item {item_id}")]
    BlankSubmission {
        item_id: String,
        annotator_id: String,
    },
    #[error("annotator {annotator_id} has no assignment on item {item_id}")]
    UnknownAnnotator {
        item_id: String,
        annotator_id: String,
    },
    #[error("unknown item {0}")]
    UnknownItem(String),
}

// =============================================================================
// ALLOCATION
// =============================================================================

/// Configured seed XOR a stable 32-bit hash of the project id.
pub fn derive_seed(seed: u32, project_id: &str) -> u32 {
    let hash = blake3::hash(project_id.as_bytes());
    let bytes = hash.as_bytes();
    seed ^ u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Fisher-Yates permutation of `0..n`, fully determined by `seed`.
pub fn shuffled_indices(n: usize, seed: u32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed as u64);
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        indices.swap(i, j);
    }
    indices
}

/// Number of IAA items: `ceil(total * portion / 100)`, capped at `total`.
pub fn iaa_count(total: usize, portion_percent: f64) -> usize {
    let raw = (total as f64 * portion_percent / 100.0).ceil();
    (raw.max(0.0) as usize).min(total)
}

#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub seed: u32,
    pub required_count: u32,
    /// Item ids flagged for IAA, in shuffle order.
    pub iaa_item_ids: Vec<String>,
    pub total: usize,
}

/// Flag the IAA subset and reset every item's assignments.
///
/// Disabled configs mark every item non-IAA with a required count of 1.
pub fn allocate(
    items: &mut [WorkItem],
    config: &IaaConfig,
    project_id: &str,
) -> Result<Allocation, IaaError> {
    if !config.portion_percent.is_finite() || !(0.0..=100.0).contains(&config.portion_percent) {
        return Err(IaaError::InvalidPortion(config.portion_percent));
    }

    let seed = derive_seed(config.seed, project_id);
    let required_count = config.required_count();

    for item in items.iter_mut() {
        item.is_iaa = false;
        item.iaa_required_count = 1;
        item.assignments.clear();
    }

    let mut iaa_item_ids = Vec::new();
    if config.enabled {
        let count = iaa_count(items.len(), config.portion_percent);
        for idx in shuffled_indices(items.len(), seed).into_iter().take(count) {
            let item = &mut items[idx];
            item.is_iaa = true;
            item.iaa_required_count = required_count;
            iaa_item_ids.push(item.id.clone());
        }
    }

    tracing::info!(
        project_id,
        total = items.len(),
        iaa_items = iaa_item_ids.len(),
        required_count,
        enabled = config.enabled,
        "IAA allocation"
    );

    Ok(Allocation {
        seed,
        required_count,
        iaa_item_ids,
        total: items.len(),
    })
}

// =============================================================================
// CONSENSUS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub status: ItemStatus,
    pub final_annotation: String,
    /// Assignments done with a non-blank value.
    pub done: u32,
    pub required: u32,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.done >= self.required
    }
}

/// Consensus for one item.
///
/// Below the required count the item is pending with no final annotation;
/// at or above it, the first qualifying assignment (array order) wins.
pub fn resolve(item: &WorkItem) -> Resolution {
    let required = item.iaa_required_count.max(1);
    let mut done = 0u32;
    let mut first_value: Option<&str> = None;
    for assignment in item.assignments.iter().filter(|a| a.is_done_with_value()) {
        done += 1;
        if first_value.is_none() {
            first_value = assignment.value.as_deref();
        }
    }

    match first_value {
        Some(value) if done >= required => Resolution {
            status: ItemStatus::Accepted,
            final_annotation: value.to_string(),
            done,
            required,
        },
        _ => Resolution {
            status: ItemStatus::Pending,
            final_annotation: String::new(),
            done,
            required,
        },
    }
}

/// Whether status is derived from assignments. Items reviewed through the
/// single-reviewer path carry no assignments and keep their own status.
pub fn uses_assignments(item: &WorkItem) -> bool {
    item.is_iaa || !item.assignments.is_empty()
}

pub fn apply_resolution(item: &mut WorkItem, resolution: &Resolution) {
    item.status = resolution.status;
    item.final_annotation = resolution.final_annotation.clone();
}

/// Annotator-side change to one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentAction {
    Start,
    Submit(String),
    Reject,
    Clear,
}

/// Apply `action` for `annotator_id`, then re-resolve the item.
///
/// `Start` and `Submit` create the assignment if missing. `Reject` and
/// `Clear` reset it to pending with no value, which can take an accepted
/// item back to pending.
pub fn update_assignment(
    item: &mut WorkItem,
    annotator_id: &str,
    action: AssignmentAction,
    now: DateTime<Utc>,
) -> Result<Resolution, IaaError> {
    let position = item
        .assignments
        .iter()
        .position(|a| a.annotator_id == annotator_id);

    match action {
        AssignmentAction::Start => {
            let assignment = upsert(item, position, annotator_id);
            if assignment.status == AssignmentStatus::Pending {
                assignment.status = AssignmentStatus::InProgress;
            }
        }
        AssignmentAction::Submit(value) => {
            if value.trim().is_empty() {
                return Err(IaaError::BlankSubmission {
                    item_id: item.id.clone(),
                    annotator_id: annotator_id.to_string(),
                });
            }
            let assignment = upsert(item, position, annotator_id);
            assignment.status = AssignmentStatus::Done;
            assignment.value = Some(value);
            assignment.annotated_at = Some(now);
        }
        AssignmentAction::Reject | AssignmentAction::Clear => {
            let Some(idx) = position else {
                return Err(IaaError::UnknownAnnotator {
                    item_id: item.id.clone(),
                    annotator_id: annotator_id.to_string(),
                });
            };
            let assignment = &mut item.assignments[idx];
            assignment.status = AssignmentStatus::Pending;
            assignment.value = None;
            assignment.annotated_at = None;
        }
    }

    let resolution = resolve(item);
    apply_resolution(item, &resolution);
    tracing::debug!(
        item_id = %item.id,
        annotator_id,
        done = resolution.done,
        required = resolution.required,
        status = resolution.status.as_str(),
        "assignment updated"
    );
    Ok(resolution)
}

fn upsert<'a>(
    item: &'a mut WorkItem,
    position: Option<usize>,
    annotator_id: &str,
) -> &'a mut Assignment {
    let idx = match position {
        Some(idx) => idx,
        None => {
            item.assignments.push(Assignment::new(annotator_id));
            item.assignments.len() - 1
        }
    };
    &mut item.assignments[idx]
}

// =============================================================================
// VISIBILITY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    Admin,
    Manager,
    Annotator,
}

#[derive(Debug, Clone)]
pub struct Viewer {
    pub id: String,
    pub role: ViewerRole,
}

impl Viewer {
    pub fn new(id: impl Into<String>, role: ViewerRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// What a viewer may see of an item's IAA state.
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub item_id: String,
    /// Consensus, for managers and admins only.
    pub final_annotation: Option<String>,
    pub status: Option<ItemStatus>,
    pub assignments: Vec<Assignment>,
}

pub fn view_for(item: &WorkItem, viewer: &Viewer) -> ItemView {
    match viewer.role {
        ViewerRole::Admin | ViewerRole::Manager => ItemView {
            item_id: item.id.clone(),
            final_annotation: Some(item.final_annotation.clone()),
            status: Some(item.status),
            assignments: item.assignments.clone(),
        },
        ViewerRole::Annotator => ItemView {
            item_id: item.id.clone(),
            final_annotation: None,
            status: None,
            assignments: item.assignment(&viewer.id).cloned().into_iter().collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::new(format!("item-{i}"), "c")).collect()
    }

    fn submit(item: &mut WorkItem, who: &str, value: &str) -> Resolution {
        update_assignment(item, who, AssignmentAction::Submit(value.into()), Utc::now()).unwrap()
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut shuffled = shuffled_indices(100, 7);
        assert_ne!(shuffled, (0..100).collect::<Vec<_>>());
        shuffled.sort_unstable();
        assert_eq!(shuffled, (0..100).collect::<Vec<_>>());
        assert!(shuffled_indices(0, 7).is_empty());
    }

    #[test]
    fn project_id_changes_the_seed() {
        assert_eq!(derive_seed(42, "proj-a"), derive_seed(42, "proj-a"));
        assert_ne!(derive_seed(42, "proj-a"), derive_seed(42, "proj-b"));
    }

    #[test]
    fn count_rounds_up() {
        assert_eq!(iaa_count(500, 10.0), 50);
        assert_eq!(iaa_count(7, 10.0), 1);
        assert_eq!(iaa_count(7, 0.0), 0);
        assert_eq!(iaa_count(7, 100.0), 7);
    }

    #[test]
    fn disabled_allocation_clears_flags_and_assignments() {
        let mut batch = items(10);
        allocate(&mut batch, &IaaConfig::enabled(50.0, 3, 1), "p").unwrap();
        submit(&mut batch[0], "ann-1", "x");

        let alloc = allocate(&mut batch, &IaaConfig::default(), "p").unwrap();
        assert!(alloc.iaa_item_ids.is_empty());
        assert!(batch.iter().all(|i| !i.is_iaa && i.iaa_required_count == 1));
        assert!(batch.iter().all(|i| i.assignments.is_empty()));
    }

    #[test]
    fn required_count_is_at_least_two() {
        let mut batch = items(4);
        let alloc = allocate(&mut batch, &IaaConfig::enabled(100.0, 1, 0), "p").unwrap();
        assert_eq!(alloc.required_count, 2);
        assert!(batch.iter().all(|i| i.iaa_required_count == 2));
    }

    #[test]
    fn out_of_range_portion_is_rejected() {
        let err = allocate(&mut items(3), &IaaConfig::enabled(120.0, 2, 0), "p").unwrap_err();
        assert!(matches!(err, IaaError::InvalidPortion(_)));
    }

    #[test]
    fn first_done_value_wins_once_threshold_is_met() {
        let mut item = WorkItem::new("1", "c");
        item.is_iaa = true;
        item.iaa_required_count = 2;

        let r = submit(&mut item, "ann-1", "cat");
        assert_eq!(r.status, ItemStatus::Pending);
        assert_eq!(item.final_annotation, "");

        let r = submit(&mut item, "ann-2", "dog");
        assert_eq!(r.status, ItemStatus::Accepted);
        assert_eq!(item.final_annotation, "cat");
        assert_eq!(item.status, ItemStatus::Accepted);
    }

    #[test]
    fn blank_submissions_are_refused() {
        let mut item = WorkItem::new("1", "c");
        let err = update_assignment(&mut item, "ann-1", AssignmentAction::Submit("  ".into()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, IaaError::BlankSubmission { .. }));
        assert!(item.assignments.is_empty());
    }

    #[test]
    fn start_does_not_count_toward_consensus() {
        let mut item = WorkItem::new("1", "c");
        let r = update_assignment(&mut item, "ann-1", AssignmentAction::Start, Utc::now()).unwrap();
        assert_eq!(item.assignments[0].status, AssignmentStatus::InProgress);
        assert_eq!(r.done, 0);
        assert_eq!(r.status, ItemStatus::Pending);

        let err = update_assignment(&mut item, "ann-9", AssignmentAction::Clear, Utc::now()).unwrap_err();
        assert!(matches!(err, IaaError::UnknownAnnotator { .. }));
    }

    #[test]
    fn only_assignment_items_are_resolved() {
        let reviewed = WorkItem::new("1", "c").with_status(ItemStatus::Accepted);
        assert!(!uses_assignments(&reviewed));

        let mut flagged = WorkItem::new("2", "c");
        flagged.is_iaa = true;
        assert!(uses_assignments(&flagged));

        let mut assigned = WorkItem::new("3", "c");
        submit(&mut assigned, "ann-1", "x");
        assert!(uses_assignments(&assigned));
    }

    #[test]
    fn annotators_only_see_their_own_assignment() {
        let mut item = WorkItem::new("1", "c");
        item.iaa_required_count = 2;
        submit(&mut item, "ann-1", "a");
        submit(&mut item, "ann-2", "b");

        let own = view_for(&item, &Viewer::new("ann-2", ViewerRole::Annotator));
        assert_eq!(own.assignments.len(), 1);
        assert_eq!(own.assignments[0].value.as_deref(), Some("b"));
        assert!(own.final_annotation.is_none());

        let manager = view_for(&item, &Viewer::new("m", ViewerRole::Manager));
        assert_eq!(manager.assignments.len(), 2);
        assert_eq!(manager.final_annotation.as_deref(), Some("a"));
    }
}

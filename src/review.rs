//! Single-reviewer workflow for projects without IAA assignments.
//!
//! Reviewers accept one model's suggestion, write their own annotation, or
//! reject the item. Each action stamps the legacy annotator fields.

use chrono::{DateTime, Utc};

use crate::model::{ItemStatus, WorkItem};

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("item {item_id} has no suggestion from profile {profile_id}")]
    MissingSuggestion { item_id: String, profile_id: String },
    #[error("annotation for item {0} is blank")]
    BlankAnnotation(String),
    #[error("rating must be 1..=5, got {0}")]
    RatingOutOfRange(u8),
}

#[derive(Debug, Clone)]
pub struct Reviewer {
    pub id: String,
    pub name: String,
}

impl Reviewer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

fn stamp(item: &mut WorkItem, reviewer: &Reviewer, now: DateTime<Utc>) {
    item.annotator_id = Some(reviewer.id.clone());
    item.annotator_name = Some(reviewer.name.clone());
    item.annotated_at = Some(now);
}

/// Take one model's suggestion as the final annotation.
pub fn accept_suggestion(
    item: &mut WorkItem,
    profile_id: &str,
    reviewer: &Reviewer,
    now: DateTime<Utc>,
) -> Result<(), ReviewError> {
    let text = item
        .ai_suggestions
        .get(profile_id)
        .cloned()
        .ok_or_else(|| ReviewError::MissingSuggestion {
            item_id: item.id.clone(),
            profile_id: profile_id.to_string(),
        })?;
    item.human_annotation = Some(text.clone());
    item.final_annotation = text;
    item.status = ItemStatus::Accepted;
    stamp(item, reviewer, now);
    Ok(())
}

/// Replace the annotation with the reviewer's own text.
pub fn edit(
    item: &mut WorkItem,
    text: &str,
    reviewer: &Reviewer,
    now: DateTime<Utc>,
) -> Result<(), ReviewError> {
    if text.trim().is_empty() {
        return Err(ReviewError::BlankAnnotation(item.id.clone()));
    }
    item.human_annotation = Some(text.to_string());
    item.final_annotation = text.to_string();
    item.status = ItemStatus::Edited;
    stamp(item, reviewer, now);
    Ok(())
}

/// Reject the suggestions. The item becomes eligible for AI processing again.
pub fn reject(item: &mut WorkItem, reviewer: &Reviewer, now: DateTime<Utc>) {
    item.human_annotation = None;
    item.final_annotation.clear();
    item.status = ItemStatus::Rejected;
    stamp(item, reviewer, now);
}

/// Rate one model's suggestion on a 1-5 scale.
pub fn rate(item: &mut WorkItem, profile_id: &str, rating: u8) -> Result<(), ReviewError> {
    if !(1..=5).contains(&rating) {
        return Err(ReviewError::RatingOutOfRange(rating));
    }
    if !item.has_suggestion(profile_id) {
        return Err(ReviewError::MissingSuggestion {
            item_id: item.id.clone(),
            profile_id: profile_id.to_string(),
        });
    }
    item.ratings.insert(profile_id.to_string(), rating);
    Ok(())
}

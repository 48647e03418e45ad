use std::process::Command;

use annotation_harness::{ItemStatus, WorkItem};
use serde_json::json;
use tempfile::tempdir;

fn write(path: &std::path::Path, value: &serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn items_json(n: usize) -> serde_json::Value {
    json!((0..n)
        .map(|i| json!({ "id": format!("row-{i}"), "content": "the quick brown fox jumps" }))
        .collect::<Vec<_>>())
}

#[test]
fn estimate_prints_a_priced_preview() {
    let dir = tempdir().unwrap();
    let items = dir.path().join("items.json");
    let models = dir.path().join("models.json");
    let out = dir.path().join("estimate.json");
    write(&items, &items_json(10));
    write(
        &models,
        &json!({
            "connections": [
                { "id": "c1", "provider_id": "openai", "api_key": "sk-test" },
                { "id": "c2", "provider_id": "local", "api_key": "x", "base_url": "http://127.0.0.1:9" }
            ],
            "profiles": [
                { "id": "mini", "connection_id": "c1", "model_id": "gpt-4o-mini", "default_prompt": "Label:" },
                { "id": "mystery", "connection_id": "c2", "model_id": "llama" }
            ]
        }),
    );

    let status = Command::new(env!("CARGO_BIN_EXE_annotate"))
        .arg("estimate")
        .arg("--items")
        .arg(&items)
        .arg("--models")
        .arg(&models)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let est: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(est["items"], 10);
    assert_eq!(est["unresolved_models"], json!(["mystery"]));
    assert_eq!(est["per_model"][0]["source"], "official");
    assert!(est["total_cost_usd"].as_f64().unwrap() > 0.0);
}

#[test]
fn allocate_then_resolve_round_trip() {
    let dir = tempdir().unwrap();
    let items = dir.path().join("items.json");
    let allocated = dir.path().join("allocated.json");
    write(&items, &items_json(40));

    let status = Command::new(env!("CARGO_BIN_EXE_annotate"))
        .args(["allocate", "--project", "proj-1", "--portion", "25", "--annotators", "3", "--seed", "9"])
        .arg("--items")
        .arg(&items)
        .arg("--out")
        .arg(&allocated)
        .status()
        .unwrap();
    assert!(status.success());

    let mut rows: Vec<WorkItem> =
        serde_json::from_str(&std::fs::read_to_string(&allocated).unwrap()).unwrap();
    let iaa: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_iaa)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(iaa.len(), 10);
    assert!(iaa.iter().all(|&i| rows[i].iaa_required_count == 3));

    // Three done assignments on the first IAA item, one on the second.
    let first = iaa[0];
    let second = iaa[1];
    for (who, value) in [("a", "yes"), ("b", "no"), ("c", "yes")] {
        let mut assignment = annotation_harness::Assignment::new(who);
        assignment.status = annotation_harness::AssignmentStatus::Done;
        assignment.value = Some(value.into());
        rows[first].assignments.push(assignment);
    }
    let mut lone = annotation_harness::Assignment::new("a");
    lone.status = annotation_harness::AssignmentStatus::Done;
    lone.value = Some("yes".into());
    rows[second].assignments.push(lone);

    let edited = dir.path().join("edited.json");
    let resolved = dir.path().join("resolved.json");
    std::fs::write(&edited, serde_json::to_string(&rows).unwrap()).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_annotate"))
        .arg("resolve")
        .arg("--items")
        .arg(&edited)
        .arg("--out")
        .arg(&resolved)
        .status()
        .unwrap();
    assert!(status.success());

    let rows: Vec<WorkItem> =
        serde_json::from_str(&std::fs::read_to_string(&resolved).unwrap()).unwrap();
    assert_eq!(rows[first].status, ItemStatus::Accepted);
    assert_eq!(rows[first].final_annotation, "yes");
    assert_eq!(rows[second].status, ItemStatus::Pending);
}

#[test]
fn process_without_models_fails_cleanly() {
    let dir = tempdir().unwrap();
    let items = dir.path().join("items.json");
    let models = dir.path().join("models.json");
    write(&items, &items_json(2));
    write(&models, &json!({ "connections": [], "profiles": [] }));

    let output = Command::new(env!("CARGO_BIN_EXE_annotate"))
        .arg("process")
        .arg("--items")
        .arg(&items)
        .arg("--models")
        .arg(&models)
        .arg("--out")
        .arg(dir.path().join("out.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    // `main` returning Err prints the Debug form.
    assert!(stderr.contains("NoModelSelected"), "stderr: {stderr}");
}

#[test]
fn resolve_leaves_single_reviewer_items_alone() {
    let dir = tempdir().unwrap();
    let items = dir.path().join("items.json");
    let resolved = dir.path().join("resolved.json");

    let mut accepted = WorkItem::new("r1", "text")
        .with_suggestion("p1", "positive")
        .with_status(ItemStatus::Accepted);
    accepted.final_annotation = "positive".into();
    let mut edited = WorkItem::new("r2", "text").with_status(ItemStatus::Edited);
    edited.final_annotation = "negative".into();
    let mut assigned = WorkItem::new("r3", "text");
    let mut done = annotation_harness::Assignment::new("a");
    done.status = annotation_harness::AssignmentStatus::Done;
    done.value = Some("neutral".into());
    assigned.assignments.push(done);

    std::fs::write(&items, serde_json::to_string(&vec![accepted, edited, assigned]).unwrap()).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_annotate"))
        .arg("resolve")
        .arg("--items")
        .arg(&items)
        .arg("--out")
        .arg(&resolved)
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["skipped"], 2);
    assert_eq!(summary["accepted"], 1);

    let rows: Vec<WorkItem> =
        serde_json::from_str(&std::fs::read_to_string(&resolved).unwrap()).unwrap();
    assert_eq!(rows[0].status, ItemStatus::Accepted);
    assert_eq!(rows[0].final_annotation, "positive");
    assert_eq!(rows[1].status, ItemStatus::Edited);
    assert_eq!(rows[1].final_annotation, "negative");
    assert_eq!(rows[2].status, ItemStatus::Accepted);
    assert_eq!(rows[2].final_annotation, "neutral");
}

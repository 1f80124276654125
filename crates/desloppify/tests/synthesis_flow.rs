//! Synthesis stage ordering over a live store: the gates cannot be taken out
//! of order, and completion retires the pending marker.

use desloppify::commands::{ClusterAction, SynthesizeArgs, cmd_plan_cluster, cmd_synthesize};
use desloppify::plan::SYNTHESIS_ID;
use desloppify::runtime::Runtime;
use desloppify::scan::run_scan;
use desloppify::state::{Confidence, make_finding};
use tempfile::TempDir;

fn project_with_review_findings(count: usize) -> (TempDir, Runtime) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::create_dir_all(root.join(".desloppify")).unwrap();
    std::fs::write(root.join("src/a.py"), "x = 1\n").unwrap();
    let rt = Runtime::discover(root, None);

    let (mut state, mut plan) = rt.load_stores();
    run_scan(&rt, &mut state, &mut plan, None).unwrap();

    // Review findings arrive through the external review runner; subsequent
    // scans pick them up and inject the synthesis marker.
    let dims = ["naming", "errors", "cohesion"];
    for i in 0..count {
        let mut detail = serde_json::Map::new();
        detail.insert(
            "dimension".to_string(),
            serde_json::json!(dims[i % dims.len()]),
        );
        let f = make_finding(
            "review",
            ".",
            &format!("cafe{i:04x}beef"),
            1,
            Confidence::Medium,
            "review issue",
            detail,
        );
        state.findings.insert(f.id.clone(), f);
    }
    run_scan(&rt, &mut state, &mut plan, None).unwrap();
    (dir, rt)
}

fn stage(stage: &str, report: &str) -> SynthesizeArgs {
    SynthesizeArgs {
        stage: Some(stage.to_string()),
        report: Some(report.to_string()),
        ..SynthesizeArgs::default()
    }
}

fn long_report() -> String {
    "Across the ten findings there are two themes: error wrappers that add nothing, and names \
that drifted from the domain language. Two findings contradict each other about keeping the \
wrapper layer."
        .to_string()
}

fn long_strategy() -> String {
    "Work the wrapper cluster first because every naming fix depends on which seams survive; \
then rename the remaining modules to domain terms; finish by re-running the review to confirm \
neither dimension regresses. Each pass ends with a rescan so resolutions are scan-verified."
        .to_string()
}

#[test]
fn pending_marker_injected_when_review_findings_change() {
    let (_dir, rt) = project_with_review_findings(10);
    let (_, plan) = rt.load_stores();
    assert_eq!(plan.queue_order[0], SYNTHESIS_ID);
}

#[test]
fn complete_before_observe_names_the_missing_stage() {
    let (_dir, rt) = project_with_review_findings(10);
    let err = cmd_synthesize(
        &rt,
        &SynthesizeArgs {
            complete: true,
            strategy: Some(long_strategy()),
            ..SynthesizeArgs::default()
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("observe"));
}

#[test]
fn stages_cannot_run_out_of_order() {
    let (_dir, rt) = project_with_review_findings(10);
    let err = cmd_synthesize(&rt, &stage("reflect", &long_report())).unwrap_err();
    assert!(err.to_string().contains("observe stage not complete"));

    cmd_synthesize(&rt, &stage("observe", &long_report())).unwrap();
    let err = cmd_synthesize(&rt, &stage("organize", &long_report())).unwrap_err();
    assert!(err.to_string().contains("reflect stage not complete"));
}

#[test]
fn short_observe_report_is_rejected() {
    let (_dir, rt) = project_with_review_findings(10);
    let err = cmd_synthesize(&rt, &stage("observe", "looks fine")).unwrap_err();
    assert!(err.to_string().contains("minimum 100"));
}

#[test]
fn valid_sequence_records_strategy_and_removes_marker() {
    let (_dir, rt) = project_with_review_findings(10);

    cmd_synthesize(&rt, &stage("observe", &long_report())).unwrap();
    cmd_synthesize(&rt, &stage("reflect", &long_report())).unwrap();

    cmd_plan_cluster(
        &rt,
        ClusterAction::Create {
            name: "collapse-wrappers".to_string(),
            description: Some("Collapse the wrapper layer".to_string()),
            action: None,
        },
    )
    .unwrap();
    cmd_plan_cluster(
        &rt,
        ClusterAction::Add {
            name: "collapse-wrappers".to_string(),
            patterns: vec!["review".to_string()],
        },
    )
    .unwrap();
    cmd_plan_cluster(
        &rt,
        ClusterAction::Update {
            name: "collapse-wrappers".to_string(),
            description: None,
            action: None,
            steps: Some(vec![
                "inline each wrapper".to_string(),
                "rename the survivors".to_string(),
            ]),
        },
    )
    .unwrap();

    cmd_synthesize(&rt, &stage("organize", &long_report())).unwrap();
    let payload = cmd_synthesize(
        &rt,
        &SynthesizeArgs {
            complete: true,
            strategy: Some(long_strategy()),
            ..SynthesizeArgs::default()
        },
    )
    .unwrap();
    assert!(payload.fields["organized"].as_u64().unwrap() >= 10);

    let (_, plan) = rt.load_stores();
    assert!(!plan.queue_order.contains(&SYNTHESIS_ID.to_string()));
    assert_eq!(plan.epic_synthesis_meta.strategy_summary, long_strategy());
    assert!(plan.epic_synthesis_meta.synthesis_stages.is_empty());
    assert!(!plan.epic_synthesis_meta.finding_snapshot_hash.is_empty());

    // The marker does not come back while the review set is unchanged.
    let (mut state, mut plan) = rt.load_stores();
    run_scan(&rt, &mut state, &mut plan, None).unwrap();
    assert!(!plan.queue_order.contains(&SYNTHESIS_ID.to_string()));
}

#[test]
fn organize_requires_enriched_manual_clusters() {
    let (_dir, rt) = project_with_review_findings(4);
    cmd_synthesize(&rt, &stage("observe", &long_report())).unwrap();
    cmd_synthesize(&rt, &stage("reflect", &long_report())).unwrap();

    let err = cmd_synthesize(&rt, &stage("organize", &long_report())).unwrap_err();
    assert!(err.to_string().contains("clusters"));

    cmd_plan_cluster(
        &rt,
        ClusterAction::Create {
            name: "bare".to_string(),
            description: None,
            action: None,
        },
    )
    .unwrap();
    cmd_plan_cluster(
        &rt,
        ClusterAction::Add {
            name: "bare".to_string(),
            patterns: vec!["review".to_string()],
        },
    )
    .unwrap();
    let err = cmd_synthesize(&rt, &stage("organize", &long_report())).unwrap_err();
    assert!(err.to_string().contains("need enrichment"));
}

//! Item construction helpers: scope matching, synthetic subjective items,
//! and primary-command selection.

use crate::attest::ATTEST_EXAMPLE;
use crate::detectors::{self, ActionType};
use crate::scoring::slugify;
use crate::state::{Confidence, Finding, State, Status};
use crate::work_queue::QueueItem;
use serde_json::{Map, json};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn hex_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[0-9a-f]+$").unwrap())
}

fn dimension_name(item: &QueueItem) -> String {
    item.detail
        .get("dimension_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Show-style pattern matching against a queue item.
pub fn scope_matches(item: &QueueItem, scope: Option<&str>) -> bool {
    let Some(scope) = scope.filter(|s| !s.is_empty()) else {
        return true;
    };

    if scope.contains('*') {
        let Ok(pattern) = glob::Pattern::new(scope) else {
            return false;
        };
        return [
            item.id.as_str(),
            item.file.as_str(),
            item.detector.as_str(),
            &dimension_name(item),
            item.summary.as_str(),
        ]
        .iter()
        .any(|candidate| pattern.matches(candidate));
    }

    if scope.contains("::") {
        return item.id.starts_with(scope);
    }

    let lowered = scope.to_lowercase();
    if item.kind == "subjective_dimension" {
        return item.id.to_lowercase().contains(&lowered)
            || dimension_name(item).to_lowercase().contains(&lowered)
            || item.summary.to_lowercase().contains(&lowered);
    }

    // Hash suffix: 8+ hex chars match the tail segment of a finding id.
    if lowered.len() >= 8 && hex_re().is_match(&lowered) {
        return item.id.to_lowercase().ends_with(&format!("::{lowered}"));
    }

    item.detector == scope
        || item.file == scope
        || item
            .file
            .starts_with(&format!("{}/", scope.trim_end_matches('/')))
}

/// Primary command guidance for one finding.
pub fn primary_command_for_finding(finding: &Finding) -> String {
    if let Some(meta) = detectors::lookup(&finding.detector)
        && meta.action_type == ActionType::AutoFix
        && !meta.fixers.is_empty()
    {
        return format!("desloppify fix {} --dry-run", meta.fixers[0]);
    }
    if finding.detector == "subjective_review" || finding.detector == "subjective_assessment" {
        if finding.is_holistic() {
            return "desloppify review --prepare".to_string();
        }
        return "desloppify show subjective".to_string();
    }
    format!(
        "desloppify plan done \"{}\" --note \"<what you did>\" --attest \"{ATTEST_EXAMPLE}\"",
        finding.id
    )
}

/// One synthetic tier-4 item per subjective dimension whose strict score sits
/// below the threshold.
pub fn build_subjective_items(state: &State, threshold: f64) -> Vec<QueueItem> {
    let threshold = threshold.clamp(0.0, 100.0);
    if state.dimension_scores.is_empty() {
        return vec![];
    }

    // Open review findings per dimension key, for command routing.
    let mut review_open_by_dim: BTreeMap<String, usize> = BTreeMap::new();
    for finding in state.findings.values() {
        if finding.status != Status::Open || finding.detector != "review" {
            continue;
        }
        if let Some(dim) = finding.dimension_key() {
            *review_open_by_dim.entry(dim.to_lowercase()).or_insert(0) += 1;
        }
    }

    let mut items = vec![];
    for (name, dim) in &state.dimension_scores {
        if !dim.subjective {
            continue;
        }
        let strict = dim.strict;
        if strict >= threshold {
            continue;
        }
        let dim_key = slugify(name);
        let assessment = state.subjective_assessments.get(&dim_key);
        let is_unassessed = assessment.map(|a| a.placeholder).unwrap_or(false)
            || (strict <= 0.0 && dim.issues == 0);
        let is_stale = assessment
            .map(|a| a.needs_review_refresh && !a.placeholder)
            .unwrap_or(false);
        let open_review = review_open_by_dim
            .get(&dim_key)
            .copied()
            .unwrap_or(0);

        let primary_command = if is_unassessed {
            "desloppify review --prepare".to_string()
        } else if is_stale {
            format!("desloppify review --prepare --dimensions {dim_key}")
        } else if open_review > 0 {
            "desloppify show review --status open".to_string()
        } else {
            format!("desloppify review --prepare --dimensions {dim_key}")
        };

        let stale_tag = if is_stale { " [stale, re-review]" } else { "" };
        let summary = format!(
            "Subjective dimension below target: {name} ({strict:.1}%){stale_tag}"
        );
        let mut detail = Map::new();
        detail.insert("dimension_name".to_string(), json!(name));
        detail.insert("dimension".to_string(), json!(dim_key));
        detail.insert("issues".to_string(), json!(dim.issues));
        detail.insert("strict_score".to_string(), json!(strict));
        detail.insert("open_review_findings".to_string(), json!(open_review));

        items.push(QueueItem {
            id: format!("subjective::{}", slugify(&dim_key)),
            kind: "subjective_dimension".to_string(),
            detector: "subjective_assessment".to_string(),
            file: ".".to_string(),
            tier: 4,
            effective_tier: 4,
            confidence: Confidence::Medium,
            status: Status::Open,
            summary,
            detail,
            is_review: false,
            is_subjective: true,
            review_weight: None,
            subjective_score: Some(strict),
            reopen_count: 0,
            skipped: false,
            cluster: None,
            member_count: None,
            tier_range: None,
            primary_command,
            explain: None,
        });
    }
    items
}

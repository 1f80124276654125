//! Score derivation: per-dimension scores plus the four canonical numbers
//! (overall, objective, strict, verified). Pure projections of state; the
//! same state always yields bit-identical scores.

use crate::detectors;
use crate::state::{DimensionScore, Finding, State, Status};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreSnapshot {
    pub overall: f64,
    pub objective: f64,
    pub strict: f64,
    pub verified: f64,
}

impl ScoreSnapshot {
    pub fn perfect() -> Self {
        Self {
            overall: 100.0,
            objective: 100.0,
            strict: 100.0,
            verified: 100.0,
        }
    }
}

/// Round to one decimal for user-facing deltas.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Lowercase identifier used in synthetic ids and cluster slugs.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Display name for a subjective dimension key: `abstraction_fit` ->
/// `Abstraction fit`.
pub fn display_name(dim_key: &str) -> String {
    let cleaned = dim_key.trim().replace('_', " ");
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => cleaned,
    }
}

fn finding_weight(finding: &Finding) -> f64 {
    let mut weight = finding.confidence.weight();
    if finding.is_holistic() {
        weight *= 10.0;
    }
    weight
}

/// Dimension a finding's weight lands in: the registry mapping for
/// mechanical detectors; review-style findings carry their own dimension and
/// are scored through the subjective side.
fn mechanical_dimension(finding: &Finding) -> Option<&'static str> {
    let meta = detectors::lookup(&finding.detector)?;
    if meta.dimension.is_empty() {
        None
    } else {
        Some(meta.dimension)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DimensionWeights {
    lenient: f64,
    strict: f64,
    verified_penalty: f64,
    open_count: usize,
    strict_count: usize,
}

fn mechanical_weights(state: &State) -> BTreeMap<&'static str, DimensionWeights> {
    let mut weights: BTreeMap<&'static str, DimensionWeights> = BTreeMap::new();
    for finding in state.findings.values() {
        let Some(dimension) = mechanical_dimension(finding) else {
            continue;
        };
        let entry = weights.entry(dimension).or_default();
        let weight = finding_weight(finding);
        match finding.status {
            Status::Open => {
                entry.strict += weight;
                entry.strict_count += 1;
                if !finding.suppressed {
                    entry.lenient += weight;
                    entry.open_count += 1;
                }
            }
            Status::Wontfix => {
                entry.strict += weight;
                entry.strict_count += 1;
            }
            Status::Fixed if !finding.scan_verified => {
                entry.verified_penalty += weight;
            }
            _ => {}
        }
    }
    weights
}

fn dimension_score(issue_weight: f64, check_weight: f64) -> f64 {
    if issue_weight <= 0.0 {
        return 100.0;
    }
    let denominator = issue_weight + check_weight;
    if denominator <= 0.0 {
        return 0.0;
    }
    100.0 * (1.0 - issue_weight / denominator)
}

/// Rebuild `state.dimension_scores` from findings + assessments, preserving
/// the `checks` counts captured at scan time.
pub fn refresh_dimension_scores(state: &mut State) {
    let weights = mechanical_weights(state);
    let previous = state.dimension_scores.clone();
    let mut next: BTreeMap<String, DimensionScore> = BTreeMap::new();

    // Mechanical dimensions: union of what scans recorded and what findings
    // currently reference.
    let mut mechanical_names: Vec<&str> = previous
        .iter()
        .filter(|(_, d)| !d.subjective)
        .map(|(name, _)| name.as_str())
        .collect();
    for name in weights.keys() {
        if !mechanical_names.contains(name) {
            mechanical_names.push(name);
        }
    }

    for name in mechanical_names {
        let prior = previous.get(name);
        let checks = prior.map(|d| d.checks).unwrap_or(0);
        let w = weights.get(name).copied().unwrap_or_default();
        if checks == 0 && w.strict_count == 0 && w.open_count == 0 {
            continue;
        }
        let mut detectors_seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut tier = 1u8;
        for finding in state.findings.values() {
            if mechanical_dimension(finding) == Some(name) && finding.status == Status::Open {
                *detectors_seen.entry(finding.detector.clone()).or_insert(0) += 1;
                tier = tier.max(finding.tier);
            }
        }
        next.insert(
            name.to_string(),
            DimensionScore {
                score: dimension_score(w.lenient, checks as f64),
                strict: dimension_score(w.strict, checks as f64),
                issues: w.open_count,
                checks,
                tier,
                detectors: detectors_seen,
                subjective: false,
            },
        );
    }

    // Subjective dimensions come straight from assessments; open review
    // findings are surfaced as the issue count.
    let mut review_open_by_dim: BTreeMap<String, usize> = BTreeMap::new();
    for finding in state.findings.values() {
        if finding.status != Status::Open {
            continue;
        }
        if finding.detector != "review" && finding.detector != "concerns" {
            continue;
        }
        if let Some(dim) = finding.dimension_key() {
            *review_open_by_dim.entry(dim.to_lowercase()).or_insert(0) += 1;
        }
    }

    for (dim_key, assessment) in &state.subjective_assessments {
        let name = display_name(dim_key);
        let issues = review_open_by_dim
            .get(&dim_key.to_lowercase())
            .copied()
            .unwrap_or(0);
        let mut detectors_seen: BTreeMap<String, usize> = BTreeMap::new();
        detectors_seen.insert("subjective_assessment".to_string(), 1);
        if issues > 0 {
            detectors_seen.insert("review".to_string(), issues);
        }
        next.insert(
            name,
            DimensionScore {
                score: assessment.score.clamp(0.0, 100.0),
                strict: assessment.score.clamp(0.0, 100.0),
                issues,
                checks: 1,
                tier: 4,
                detectors: detectors_seen,
                subjective: true,
            },
        );
    }

    state.dimension_scores = next;
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// 40% mechanical / 60% subjective. A missing pool cedes its share.
fn blend(mechanical: Option<f64>, subjective: Option<f64>) -> f64 {
    match (mechanical, subjective) {
        (Some(m), Some(s)) => 0.4 * m + 0.6 * s,
        (Some(m), None) => m,
        (None, Some(s)) => s,
        (None, None) => 100.0,
    }
}

/// Derive the four canonical scores. `dimension_scores` must be current
/// (`refresh_dimension_scores` runs on every save path).
pub fn score_snapshot(state: &State) -> ScoreSnapshot {
    let weights = mechanical_weights(state);

    let mut mech_lenient = vec![];
    let mut mech_strict = vec![];
    let mut mech_verified = vec![];
    let mut subjective = vec![];

    for (name, dim) in &state.dimension_scores {
        if dim.subjective {
            subjective.push(dim.score);
            continue;
        }
        mech_lenient.push(dim.score);
        mech_strict.push(dim.strict);
        let w = weights
            .get(name.as_str())
            .copied()
            .unwrap_or_default();
        mech_verified.push(dimension_score(
            w.strict + w.verified_penalty,
            dim.checks as f64,
        ));
    }

    let subj = mean(&subjective);
    ScoreSnapshot {
        overall: blend(mean(&mech_lenient), subj),
        objective: mean(&mech_lenient).unwrap_or(100.0),
        strict: blend(mean(&mech_strict), subj),
        verified: blend(mean(&mech_verified), subj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Confidence, SubjectiveAssessment, make_finding};
    use serde_json::Map;

    fn state_with_unused() -> State {
        let mut state = State::default();
        let f = make_finding(
            "unused",
            "src/a.py",
            "os",
            1,
            Confidence::High,
            "Unused import: os",
            Map::new(),
        );
        state.findings.insert(f.id.clone(), f);
        state.dimension_scores.insert(
            "Dead code".to_string(),
            DimensionScore {
                checks: 1,
                ..DimensionScore::default()
            },
        );
        refresh_dimension_scores(&mut state);
        state
    }

    #[test]
    fn one_open_finding_halves_the_dimension() {
        let state = state_with_unused();
        let dim = &state.dimension_scores["Dead code"];
        assert_eq!(dim.score, 50.0);
        assert_eq!(dim.strict, 50.0);
        assert_eq!(dim.issues, 1);
        let snapshot = score_snapshot(&state);
        assert!(snapshot.strict < 100.0);
        assert_eq!(snapshot.overall, snapshot.objective);
    }

    #[test]
    fn fixed_unverified_counts_against_verified_only() {
        let mut state = state_with_unused();
        {
            let f = state.findings.get_mut("unused::src/a.py::os").unwrap();
            f.status = Status::Fixed;
            f.scan_verified = false;
        }
        refresh_dimension_scores(&mut state);
        let snapshot = score_snapshot(&state);
        assert_eq!(snapshot.strict, 100.0);
        assert_eq!(snapshot.verified, 50.0);
    }

    #[test]
    fn scan_verified_fix_credits_verified() {
        let mut state = state_with_unused();
        {
            let f = state.findings.get_mut("unused::src/a.py::os").unwrap();
            f.status = Status::Fixed;
            f.scan_verified = true;
        }
        refresh_dimension_scores(&mut state);
        let snapshot = score_snapshot(&state);
        assert_eq!(snapshot.verified, 100.0);
    }

    #[test]
    fn wontfix_and_suppressed_count_in_strict_only() {
        let mut state = state_with_unused();
        {
            let f = state.findings.get_mut("unused::src/a.py::os").unwrap();
            f.status = Status::Wontfix;
        }
        refresh_dimension_scores(&mut state);
        let snapshot = score_snapshot(&state);
        assert_eq!(snapshot.objective, 100.0);
        assert_eq!(snapshot.strict, 50.0);

        let mut state = state_with_unused();
        {
            let f = state.findings.get_mut("unused::src/a.py::os").unwrap();
            f.suppressed = true;
        }
        refresh_dimension_scores(&mut state);
        let snapshot = score_snapshot(&state);
        assert_eq!(snapshot.objective, 100.0);
        assert_eq!(snapshot.strict, 50.0);
    }

    #[test]
    fn subjective_pool_blends_forty_sixty() {
        let mut state = state_with_unused();
        state.subjective_assessments.insert(
            "abstraction_fit".to_string(),
            SubjectiveAssessment {
                score: 80.0,
                ..SubjectiveAssessment::default()
            },
        );
        refresh_dimension_scores(&mut state);
        let snapshot = score_snapshot(&state);
        // mechanical 50, subjective 80.
        assert_eq!(round1(snapshot.overall), round1(0.4 * 50.0 + 0.6 * 80.0));
        assert_eq!(snapshot.objective, 50.0);
    }

    #[test]
    fn placeholder_dimension_scores_zero() {
        let mut state = State::default();
        state.subjective_assessments.insert(
            "naming_quality".to_string(),
            SubjectiveAssessment {
                score: 0.0,
                placeholder: true,
                ..SubjectiveAssessment::default()
            },
        );
        refresh_dimension_scores(&mut state);
        assert_eq!(state.dimension_scores["Naming quality"].score, 0.0);
        let snapshot = score_snapshot(&state);
        assert_eq!(snapshot.overall, 0.0);
        assert_eq!(snapshot.objective, 100.0);
    }

    #[test]
    fn snapshot_is_deterministic() {
        let state = state_with_unused();
        assert_eq!(score_snapshot(&state), score_snapshot(&state));
    }

    #[test]
    fn display_name_formats_keys() {
        assert_eq!(display_name("abstraction_fit"), "Abstraction fit");
        assert_eq!(display_name("naming_quality"), "Naming quality");
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Abstraction fit"), "abstraction_fit");
        assert_eq!(slugify("review::naming"), "review_naming");
        assert_eq!(slugify("  Already_slugged  "), "already_slugged");
    }
}

//! `plan synthesize`: routes the staged workflow and the completion paths;
//! the default invocation returns the dashboard payload.

use crate::commands::require_completed_scan;
use crate::errors::CommandError;
use crate::plan::{
    complete_synthesis, confirm_existing_synthesis, record_observe, record_organize,
    record_reflect, synthesis_status,
};
use crate::query::QueryPayload;
use crate::runtime::Runtime;
use crate::scoring::score_snapshot;

#[derive(Debug, Clone, Default)]
pub struct SynthesizeArgs {
    pub stage: Option<String>,
    pub report: Option<String>,
    pub complete: bool,
    pub confirm_existing: bool,
    pub strategy: Option<String>,
    pub note: Option<String>,
}

fn require_text<'a>(value: &'a Option<String>, flag: &str, hint: &str) -> Result<&'a str, CommandError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CommandError::validation(format!("{flag} is required. {hint}")))
}

pub fn cmd_synthesize(rt: &Runtime, args: &SynthesizeArgs) -> Result<QueryPayload, CommandError> {
    let (state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    if args.complete {
        let strategy = require_text(
            &args.strategy,
            "--strategy",
            "Provide an execution plan describing priorities, ordering, and verification \
(or \"same\" to keep the existing one).",
        )?;
        let outcome = complete_synthesis(&mut plan, &state, strategy)?;
        rt.commit(None, Some(&mut plan))?;
        let mut payload = QueryPayload::new("plan_synthesize_complete")
            .set("organized", outcome.organized)
            .set("total", outcome.total)
            .set("clusters", outcome.cluster_count)
            .set("strategy_summary", &outcome.strategy_summary)
            .with_scores(score_snapshot(&state));
        if let Some(warning) = outcome.unorganized_warning {
            payload = payload.set("warning", warning);
        }
        return Ok(payload);
    }

    if args.confirm_existing {
        let note = require_text(
            &args.note,
            "--note",
            "Explain why the existing plan is still valid (min 100 chars).",
        )?;
        let strategy = require_text(
            &args.strategy,
            "--strategy",
            "Provide a strategy summary, or \"same\" to keep the existing one.",
        )?;
        let outcome = confirm_existing_synthesis(&mut plan, &state, note, strategy)?;
        rt.commit(None, Some(&mut plan))?;
        return Ok(QueryPayload::new("plan_synthesize_confirm_existing")
            .set("organized", outcome.organized)
            .set("total", outcome.total)
            .set("strategy_summary", &outcome.strategy_summary)
            .with_scores(score_snapshot(&state)));
    }

    if let Some(stage) = args.stage.as_deref() {
        let report = require_text(
            &args.report,
            "--report",
            "Write an analysis of the findings: themes, root causes, contradictions.",
        )?;
        let outcome = match stage {
            "observe" => record_observe(&mut plan, &state, report)?,
            "reflect" => record_reflect(&mut plan, &state, report)?,
            "organize" => record_organize(&mut plan, &state, report)?,
            other => {
                return Err(CommandError::validation(format!(
                    "Unknown stage: {other} (expected observe, reflect, or organize)"
                )));
            }
        };
        rt.commit(None, Some(&mut plan))?;
        return Ok(QueryPayload::new("plan_synthesize_stage")
            .set("stage", outcome.stage)
            .set("finding_count", outcome.finding_count)
            .set("recurring_dimensions", &outcome.recurring_dimensions)
            .set("cited_ids", &outcome.cited_ids));
    }

    // Dashboard: where the synthesis stands and what to do next.
    Ok(QueryPayload::new("plan_synthesize")
        .set("synthesis", synthesis_status(&plan, &state))
        .with_scores(score_snapshot(&state)))
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    judge::FAILURE_CATEGORIES,
    types::{RunResult, TerminationState},
};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no results to aggregate")]
    NoResults,
    #[error("no valid results to aggregate")]
    NoValidResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_simulations: usize,
    pub successful_simulations: usize,
    pub failed_simulations: usize,
    pub goal_met_rate: f64,
    pub giving_up_rate: f64,
    pub avg_conversation_turns: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAverage {
    pub category: String,
    pub mean_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureModeCount {
    pub mode: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAnalysis {
    /// Mean score per category, taxonomy order.
    pub avg_scores_by_category: Vec<CategoryAverage>,
    /// Top 5 categories by mean score, descending (higher = worse).
    pub worst_performing_categories: Vec<CategoryAverage>,
    /// Top 10 primary failure modes by frequency, verbatim strings, ties in
    /// first-seen order.
    pub top_failure_modes: Vec<FailureModeCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStats {
    pub count: usize,
    pub goal_met_rate: f64,
    pub avg_turns: f64,
    pub avg_total_score: f64,
}

/// Projection over a collection of run results. Recomputed on every call,
/// never persisted as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub summary: Summary,
    pub failure_analysis: FailureAnalysis,
    pub scenario_breakdown: BTreeMap<String, GroupStats>,
    pub personality_breakdown: BTreeMap<String, GroupStats>,
}

fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Reduce run results into summary statistics. Pure and deterministic for a
/// given input; inputs are never mutated. Error results count toward totals
/// but are excluded from every rate denominator.
pub fn aggregate(results: &[RunResult]) -> Result<AggregateReport, AggregationError> {
    if results.is_empty() {
        return Err(AggregationError::NoResults);
    }

    let valid: Vec<&RunResult> = results.iter().filter(|r| r.evaluation.is_report()).collect();
    if valid.is_empty() {
        return Err(AggregationError::NoValidResults);
    }

    let goal_met = valid
        .iter()
        .filter(|r| r.termination == TerminationState::GoalMet)
        .count();
    let gave_up = valid
        .iter()
        .filter(|r| r.termination == TerminationState::GaveUp)
        .count();

    let summary = Summary {
        total_simulations: results.len(),
        successful_simulations: valid.len(),
        failed_simulations: results.len() - valid.len(),
        goal_met_rate: rate(goal_met, valid.len()),
        giving_up_rate: rate(gave_up, valid.len()),
        avg_conversation_turns: valid.iter().map(|r| r.turns as f64).sum::<f64>()
            / valid.len() as f64,
    };

    let avg_scores_by_category: Vec<CategoryAverage> = FAILURE_CATEGORIES
        .iter()
        .map(|name| {
            let scores: Vec<f64> = valid
                .iter()
                .filter_map(|r| {
                    r.evaluation
                        .report()
                        .categories()
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, c)| f64::from(c.score))
                })
                .collect();
            CategoryAverage {
                category: (*name).to_string(),
                mean_score: if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                },
            }
        })
        .collect();

    let mut worst = avg_scores_by_category.clone();
    worst.sort_by(|a, b| {
        b.mean_score
            .partial_cmp(&a.mean_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    worst.truncate(5);

    // Verbatim tallies in first-seen order; the stable sort keeps that order
    // for equal counts.
    let mut modes: Vec<FailureModeCount> = Vec::new();
    for result in &valid {
        let mode = &result.evaluation.report().primary_failure_mode;
        match modes.iter_mut().find(|m| m.mode == *mode) {
            Some(entry) => entry.count += 1,
            None => modes.push(FailureModeCount {
                mode: mode.clone(),
                count: 1,
            }),
        }
    }
    modes.sort_by(|a, b| b.count.cmp(&a.count));
    modes.truncate(10);

    let scenario_breakdown = group_by(&valid, |r| r.scenario_id.clone());
    let personality_breakdown = group_by(&valid, |r| r.persona_id.clone());

    Ok(AggregateReport {
        summary,
        failure_analysis: FailureAnalysis {
            avg_scores_by_category,
            worst_performing_categories: worst,
            top_failure_modes: modes,
        },
        scenario_breakdown,
        personality_breakdown,
    })
}

fn group_by<F>(valid: &[&RunResult], key: F) -> BTreeMap<String, GroupStats>
where
    F: Fn(&RunResult) -> String,
{
    let mut groups: BTreeMap<String, Vec<&RunResult>> = BTreeMap::new();
    for result in valid {
        groups.entry(key(result)).or_default().push(result);
    }

    groups
        .into_iter()
        .map(|(id, members)| {
            let count = members.len();
            let goal_met = members
                .iter()
                .filter(|r| r.termination == TerminationState::GoalMet)
                .count();
            let avg_turns = members.iter().map(|r| r.turns as f64).sum::<f64>() / count as f64;
            let avg_total_score = members
                .iter()
                .map(|r| f64::from(r.evaluation.report().total_score()))
                .sum::<f64>()
                / count as f64;
            (
                id,
                GroupStats {
                    count,
                    goal_met_rate: rate(goal_met, count),
                    avg_turns,
                    avg_total_score,
                },
            )
        })
        .collect()
}

/// Sectioned plain-text rendering of an aggregate report.
pub fn render(report: &AggregateReport) -> String {
    let rule = "=".repeat(80);
    let thin = "-".repeat(80);
    let mut lines = Vec::new();

    lines.push(rule.clone());
    lines.push("AI CUSTOMER SUPPORT EVALUATION REPORT".to_string());
    lines.push(rule.clone());
    lines.push(String::new());

    let summary = &report.summary;
    lines.push("SUMMARY".to_string());
    lines.push(thin.clone());
    lines.push(format!("Total Simulations: {}", summary.total_simulations));
    lines.push(format!("Successful: {}", summary.successful_simulations));
    lines.push(format!("Failed: {}", summary.failed_simulations));
    lines.push(format!("Goal Met Rate: {:.2}%", summary.goal_met_rate * 100.0));
    lines.push(format!(
        "User Gave Up Rate: {:.2}%",
        summary.giving_up_rate * 100.0
    ));
    lines.push(format!(
        "Avg Conversation Turns: {:.2}",
        summary.avg_conversation_turns
    ));
    lines.push(String::new());

    lines.push("FAILURE ANALYSIS".to_string());
    lines.push(thin.clone());
    lines.push("Worst Performing Categories (0=perfect, 5=critical):".to_string());
    for entry in &report.failure_analysis.worst_performing_categories {
        lines.push(format!("  {}: {:.2}", entry.category, entry.mean_score));
    }
    lines.push(String::new());
    lines.push("Top Failure Modes:".to_string());
    for entry in &report.failure_analysis.top_failure_modes {
        lines.push(format!("  {}: {} occurrences", entry.mode, entry.count));
    }
    lines.push(String::new());

    lines.push("SCENARIO BREAKDOWN".to_string());
    lines.push(thin.clone());
    render_breakdown(&mut lines, &report.scenario_breakdown);
    lines.push(String::new());

    lines.push("PERSONALITY BREAKDOWN".to_string());
    lines.push(thin);
    render_breakdown(&mut lines, &report.personality_breakdown);
    lines.push(String::new());

    lines.push(rule);
    lines.join("\n")
}

fn render_breakdown(lines: &mut Vec<String>, breakdown: &BTreeMap<String, GroupStats>) {
    let mut entries: Vec<(&String, &GroupStats)> = breakdown.iter().collect();
    entries.sort_by(|a, b| {
        b.1.avg_total_score
            .partial_cmp(&a.1.avg_total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (id, stats) in entries {
        lines.push(format!("{id}:"));
        lines.push(format!(
            "  Count: {}, Goal Met: {:.2}%, Avg Score: {:.2}",
            stats.count,
            stats.goal_met_rate * 100.0,
            stats.avg_total_score
        ));
    }
}

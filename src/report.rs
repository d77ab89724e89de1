use std::fmt::Write;

use crate::models::{Insight, ReportEntry, ReportRow, SegmentAggregate, User};

const BAR_WIDTH: usize = 40;

/// Display form of a raw category value, e.g. `DEBTCONSOLIDATION` -> `Debt Consolidation`.
pub fn format_label(value: &str) -> String {
    let trimmed = value.trim();
    let normalized = trimmed.to_lowercase().replace(['_', ' '], "");
    match normalized.as_str() {
        "debtconsolidation" => return "Debt Consolidation".to_string(),
        "homeimprovement" => return "Home Improvement".to_string(),
        _ => {}
    }
    trimmed
        .replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct DashboardView<'a> {
    pub user: &'a User,
    pub intents: &'a [String],
    pub genders: &'a [String],
    pub segments: &'a [SegmentAggregate],
    pub median: f64,
    pub by_gender: &'a [(String, f64)],
    pub saved_report: Option<&'a str>,
    pub insight: Option<&'a str>,
}

pub fn render_dashboard(view: &DashboardView<'_>) -> String {
    let mut output = String::new();
    let labels = |values: &[String]| {
        values
            .iter()
            .map(|v| format_label(v))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let _ = writeln!(output, "# Expected Credit Loss (ECL) Dashboard");
    let _ = writeln!(
        output,
        "Logged in: {} ({})",
        view.user.username,
        view.user.role.to_string().to_uppercase()
    );
    let _ = writeln!(
        output,
        "Loan intent: {} | Gender: {}",
        labels(view.intents),
        labels(view.genders)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    write_segment_table(&mut output, view.segments);
    let _ = writeln!(output);
    let _ = writeln!(output, "Median segment ECL: {:.2}", view.median);

    if let Some(rid) = view.saved_report {
        let _ = writeln!(output, "Report saved: {rid}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## ECL by Gender");
    write_bar_chart(&mut output, view.by_gender);

    if let Some(text) = view.insight {
        let _ = writeln!(output);
        let _ = writeln!(output, "## AI Insight");
        let _ = writeln!(output, "{text}");
    }

    output
}

fn write_segment_table(output: &mut String, segments: &[SegmentAggregate]) {
    let _ = writeln!(output, "| Loan intent | Gender | PD mean | LGD | ECL | Action |");
    let _ = writeln!(output, "|---|---|---:|---:|---:|---|");
    for segment in segments {
        let _ = writeln!(
            output,
            "| {} | {} | {:.4} | {:.3} | {:.2} | {} |",
            format_label(&segment.loan_intent),
            format_label(&segment.person_gender),
            segment.pd_mean,
            segment.lgd,
            segment.ecl,
            segment.action
        );
    }
}

fn write_bar_chart(output: &mut String, totals: &[(String, f64)]) {
    let max = totals.iter().map(|(_, v)| *v).fold(0.0_f64, f64::max);
    let width = totals
        .iter()
        .map(|(label, _)| format_label(label).len())
        .max()
        .unwrap_or(0);
    for (label, value) in totals {
        let filled = if max > 0.0 {
            ((value / max) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let _ = writeln!(
            output,
            "{:<width$} | {:<bar$} {:.2}",
            format_label(label),
            "#".repeat(filled),
            value,
            width = width,
            bar = BAR_WIDTH
        );
    }
}

pub fn render_report_list(entries: &[ReportEntry]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Past Reports");
    if entries.is_empty() {
        let _ = writeln!(output, "No saved reports yet.");
        return output;
    }
    for entry in entries {
        let _ = writeln!(output, "- {} ({})", entry.rid, entry.file);
    }
    output
}

pub fn render_report(rid: &str, rows: &[ReportRow]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Report {rid}");
    let Some(first) = rows.first() else {
        let _ = writeln!(output, "Report not found or empty.");
        return output;
    };
    let _ = writeln!(
        output,
        "Saved by {} at {} (median ECL {:.2})",
        first.saved_by,
        first.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
        first.median
    );
    let segments: Vec<SegmentAggregate> = rows.iter().map(ReportRow::aggregate).collect();
    write_segment_table(&mut output, &segments);
    output
}

pub fn render_insights(insights: &[Insight]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## CRO Review");
    if insights.is_empty() {
        let _ = writeln!(output, "No insights saved yet.");
        return output;
    }
    for insight in insights {
        let _ = writeln!(
            output,
            "- {} (report {}) [{}] {}: {}",
            insight.iid, insight.rid, insight.cro_decision, insight.recommendation, insight.note
        );
        if !insight.cro_note.is_empty() {
            let _ = writeln!(output, "  CRO note: {}", insight.cro_note);
        }
    }
    output
}

pub fn render_users(users: &[User]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Users");
    if users.is_empty() {
        let _ = writeln!(output, "No users found.");
        return output;
    }
    for user in users {
        let access = serde_json::to_string(&user.segments).unwrap_or_default();
        let _ = writeln!(output, "- {} ({}) access {}", user.username, user.role, access);
    }
    output
}

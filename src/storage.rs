use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{CroDecision, Insight, ReportEntry, ReportRow, SegmentAggregate};

/// Timestamp-ordered identifier with a random suffix so two saves in the same
/// second get distinct ids.
pub fn new_record_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn report_path(&self, rid: &str) -> PathBuf {
        self.dir.join(format!("report_{rid}.csv"))
    }

    pub fn save_report(
        &self,
        segments: &[SegmentAggregate],
        median: f64,
        saved_by: &str,
    ) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let rid = new_record_id();
        let saved_at = Utc::now();
        let path = self.report_path(&rid);

        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        for segment in segments {
            writer.serialize(ReportRow {
                loan_intent: segment.loan_intent.clone(),
                person_gender: segment.person_gender.clone(),
                pd_mean: segment.pd_mean,
                lgd: segment.lgd,
                ecl: segment.ecl,
                action: segment.action,
                median,
                rid: rid.clone(),
                saved_by: saved_by.to_string(),
                saved_at,
            })?;
        }
        writer.flush()?;

        info!(rid = %rid, segments = segments.len(), saved_by, "report saved");
        Ok(rid)
    }

    /// Newest first. With `saved_by`, only reports written by that user.
    pub fn list_reports(&self, saved_by: Option<&str>) -> anyhow::Result<Vec<ReportEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
        {
            let file = entry?.file_name().to_string_lossy().to_string();
            let Some(rid) = file
                .strip_prefix("report_")
                .and_then(|rest| rest.strip_suffix(".csv"))
            else {
                continue;
            };
            if let Some(user) = saved_by {
                let rows = match self.load_report(rid) {
                    Ok(rows) => rows,
                    Err(err) => {
                        warn!(file = %file, error = %err, "skipping unreadable report");
                        continue;
                    }
                };
                if !rows.iter().any(|row| row.saved_by.eq_ignore_ascii_case(user)) {
                    continue;
                }
            }
            entries.push(ReportEntry {
                rid: rid.to_string(),
                file: file.clone(),
            });
        }
        entries.sort_by(|a, b| b.rid.cmp(&a.rid));
        Ok(entries)
    }

    pub fn latest_report_for(&self, saved_by: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .list_reports(Some(saved_by))?
            .into_iter()
            .next()
            .map(|entry| entry.rid))
    }

    /// A missing report yields no rows.
    pub fn load_report(&self, rid: &str) -> anyhow::Result<Vec<ReportRow>> {
        let path = self.report_path(rid);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_rows(&path)
    }
}

pub struct InsightStore {
    path: PathBuf,
}

impl InsightStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save_insight(&self, rid: &str, note: &str, recommendation: &str) -> anyhow::Result<String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = !self.path.exists()
            || std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);

        let iid = new_record_id();
        writer.serialize(Insight {
            iid: iid.clone(),
            rid: rid.to_string(),
            note: note.to_string(),
            recommendation: recommendation.to_string(),
            saved_at: Utc::now(),
            cro_decision: CroDecision::Pending,
            cro_note: String::new(),
        })?;
        writer.flush()?;

        info!(iid = %iid, rid, "insight saved");
        Ok(iid)
    }

    pub fn list_insights(&self) -> anyhow::Result<Vec<Insight>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_rows(&self.path)
    }

    /// Returns false, leaving the store untouched, when the id is unknown.
    pub fn update_insight(
        &self,
        iid: &str,
        decision: CroDecision,
        cro_note: &str,
    ) -> anyhow::Result<bool> {
        let mut insights = self.list_insights()?;
        let mut matched = 0usize;
        for insight in insights.iter_mut().filter(|i| i.iid == iid) {
            insight.cro_decision = decision;
            insight.cro_note = cro_note.to_string();
            matched += 1;
        }
        if matched == 0 {
            warn!(iid, "no insight with this id");
            return Ok(false);
        }

        write_rows(&self.path, &insights)?;
        info!(iid, %decision, "insight decision recorded");
        Ok(true)
    }
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result.with_context(|| format!("malformed row in {}", path.display()))?);
    }
    debug!(path = %path.display(), rows = rows.len(), "rows read");
    Ok(rows)
}

fn write_rows<T: serde::Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

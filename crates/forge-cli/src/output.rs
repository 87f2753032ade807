//! Rendering of events and reports on stdout

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use forge_core::guard::{FileStabilityRecord, FileStatus, GuardConfig};
use forge_core::sprt::{SprtParams, Verdict};
use forge_core::ProgressEvent;

/// Text or JSON lines
#[derive(Debug, Clone, Copy)]
pub(crate) struct Output {
    json: bool,
}

impl Output {
    pub(crate) fn new(json: bool) -> Self {
        Self { json }
    }

    pub(crate) fn is_json(self) -> bool {
        self.json
    }

    pub(crate) fn event(self, event: &ProgressEvent) {
        if self.json {
            self.value(event);
        } else {
            println!("{event}");
        }
    }

    /// One JSON line
    pub(crate) fn value<T: Serialize>(self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!("unserializable output: {}", e),
        }
    }

    pub(crate) fn text(self, text: &str) {
        print!("{text}");
    }
}

pub(crate) fn guard_table(
    records: &BTreeMap<String, FileStabilityRecord>,
    config: &GuardConfig,
) -> String {
    if records.is_empty() {
        return "no files recorded\n".to_string();
    }
    let width = records.keys().map(String::len).max().unwrap_or(4).max(4);
    let mut out = format!("{:<width$}  STATUS  EDITS  LAST EDIT                  NOTE\n", "FILE");
    for (path, record) in records {
        let status = match record.status {
            FileStatus::Active => "active",
            FileStatus::Locked => "LOCKED",
        };
        let last = record
            .last_edited_at
            .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        let mut note = String::new();
        if let Some(until) = record.unlocks_at(config) {
            let _ = write!(note, "until {}", until.format("%H:%M:%S UTC"));
        }
        if let Some(lease) = &record.lease {
            if !note.is_empty() {
                note.push_str("; ");
            }
            let _ = write!(note, "in flight: {}", lease.session);
        }
        let _ = writeln!(
            out,
            "{path:<width$}  {status:<6}  {:>5}  {last:<25}  {note}",
            record.edit_count_24h
        );
    }
    out
}

/// Verdict plus the bounds it was judged against
#[derive(Debug, Serialize)]
pub(crate) struct SprtReport {
    pub(crate) params: SprtParams,
    pub(crate) upper_bound: f64,
    pub(crate) lower_bound: f64,
    pub(crate) verdict: Verdict,
}

impl SprtReport {
    pub(crate) fn new(params: SprtParams, verdict: Verdict) -> Self {
        Self {
            params,
            upper_bound: params.upper_bound(),
            lower_bound: params.lower_bound(),
            verdict,
        }
    }

    pub(crate) fn render(&self) -> String {
        let p = &self.params;
        format!(
            "alpha={} beta={} p0={} p1={}\n\
             bounds: reject above {:.4}, accept below {:.4}\n\
             at least {} clean trials to accept, {} failures to reject\n\
             {}\n",
            p.alpha,
            p.beta,
            p.p0,
            p.p1,
            self.upper_bound,
            self.lower_bound,
            p.trials_to_accept(),
            p.trials_to_reject(),
            self.verdict,
        )
    }
}

//! Append-only log of failed attempts at `<root>/.forge/failures.log`

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::types::SessionId;

/// Failure journal of one project
#[derive(Debug, Clone)]
pub struct FailureJournal {
    path: PathBuf,
}

impl FailureJournal {
    /// Journal under `<root>/.forge`
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(".forge").join("failures.log"),
        }
    }

    /// Journal file location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Write failures are logged, never returned.
    pub fn append(&self, target: &Path, attempt: u32, session: &SessionId, reason: &str) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut entry = format!(
            "[{stamp}] {} attempt {attempt} session {session}\n",
            target.display()
        );
        for line in reason.lines() {
            entry.push_str("    ");
            entry.push_str(line);
            entry.push('\n');
        }
        if let Err(e) = self.write(&entry) {
            tracing::warn!(path = %self.path.display(), "failure journal not written: {}", e);
        }
    }

    fn write(&self, entry: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(entry.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_accumulate() {
        let root = tempfile::tempdir().unwrap();
        let journal = FailureJournal::new(root.path());
        let sid = SessionId::new();
        journal.append(Path::new("src/app.py"), 1, &sid, "lint failed\nE999 syntax");
        journal.append(Path::new("src/app.py"), 2, &sid, "rejected");

        let text = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(text.matches("src/app.py attempt").count(), 2);
        assert!(text.contains(&format!("attempt 1 session {}", sid.short())));
        assert!(text.contains("    E999 syntax\n"));
    }

    #[test]
    fn unwritable_journal_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        // a file where the directory should be
        fs::write(root.path().join(".forge"), "").unwrap();
        FailureJournal::new(root.path()).append(Path::new("a.py"), 1, &SessionId::new(), "x");
    }
}

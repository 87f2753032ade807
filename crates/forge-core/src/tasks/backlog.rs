//! Markdown backlog.
//!
//! Two entry styles are understood, mixed freely:
//!
//! ```text
//! | # | File          | Target | Type | Description            |
//! |---|---------------|--------|------|------------------------|
//! | 1 | `src/app.py`  | add    | NEW  | add an `add` function  |
//! | 2 | `src/db.py`   | query  | FIX  | ~~escape parameters~~  |
//!
//! - [ ] src/util.rs: document `parse`
//! - [x] src/main.rs: done already
//! ```
//!
//! Struck-through rows and ticked boxes are complete. Table columns are
//! found by header name; anything inside code blocks is prose, not a task.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use tokio::sync::Mutex;

use super::TaskSource;
use crate::error::ForgeError;
use crate::types::{MutationTask, TaskOrigin};

const OPEN_BOX: &str = "[ ]";
const DONE_BOX: &str = "[x]";

/// Backlog file task source
#[derive(Debug)]
pub struct BacklogFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BacklogFile {
    /// Source over the Markdown file at `path`; a missing file is an empty backlog
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backlog file location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<String>, ForgeError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ForgeError::io(&self.path, e)),
        }
    }

    async fn write(&self, text: &str) -> Result<(), ForgeError> {
        let tmp = self.path.with_extension("md.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| ForgeError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ForgeError::io(&self.path, e))
    }
}

#[async_trait]
impl TaskSource for BacklogFile {
    async fn next_task(&self) -> Result<Option<MutationTask>, ForgeError> {
        let Some(text) = self.read().await? else {
            return Ok(None);
        };
        let task = open_entries(&text).into_iter().next().map(|entry| {
            MutationTask::new(entry.target, entry.description).with_origin(TaskOrigin::Backlog {
                line: entry.line,
                raw: line_at(&text, entry.line).to_string(),
            })
        });
        if let Some(task) = &task {
            tracing::debug!(backlog = %self.path.display(), target = %task.target.display(), "next backlog task");
        }
        Ok(task)
    }

    async fn mark_complete(&self, task: &MutationTask) -> Result<bool, ForgeError> {
        let TaskOrigin::Backlog { line, raw } = &task.origin else {
            return Ok(false);
        };
        let _guard = self.write_lock.lock().await;
        let Some(text) = self.read().await? else {
            return Ok(false);
        };
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        let index = if lines.get(*line) == Some(raw) {
            Some(*line)
        } else {
            lines.iter().position(|l| l == raw)
        };
        let Some(index) = index else {
            tracing::warn!(backlog = %self.path.display(), "backlog entry moved or was edited, not marked");
            return Ok(false);
        };
        // still open in the current document, not just textually present
        let Some(entry) = open_entries(&text).into_iter().find(|e| e.line == index) else {
            return Ok(false);
        };
        let Some(marked) = entry.mark.apply(&lines[index]) else {
            return Ok(false);
        };
        lines[index] = marked;
        let mut out = lines.join("\n");
        if text.ends_with('\n') {
            out.push('\n');
        }
        self.write(&out).await?;
        tracing::info!(backlog = %self.path.display(), line = index + 1, "backlog entry completed");
        Ok(true)
    }
}

/// Open backlog entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// Zero-based line index
    line: usize,
    target: PathBuf,
    description: String,
    mark: Mark,
}

/// How an entry is completed in its source line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Tick the checkbox starting at this byte column
    Checkbox(usize),
    /// Strike the description cell, counted in `|`-separated columns
    Cell(usize),
}

impl Mark {
    fn apply(self, line: &str) -> Option<String> {
        match self {
            Self::Checkbox(column) => {
                let at = column + line.get(column..)?.find(OPEN_BOX)?;
                let mut out = line.to_string();
                out.replace_range(at..at + OPEN_BOX.len(), DONE_BOX);
                Some(out)
            }
            Self::Cell(cell) => {
                let leading = usize::from(line.trim_start().starts_with('|'));
                let mut parts: Vec<String> = line.split('|').map(str::to_string).collect();
                let part = parts.get_mut(cell + leading)?;
                let description = part.trim();
                if description.is_empty() || description.contains("~~") {
                    return None;
                }
                *part = format!(" ~~{description}~~ ");
                Some(parts.join("|"))
            }
        }
    }
}

/// Column layout of a backlog table
#[derive(Debug, Clone, Copy)]
struct Columns {
    file: usize,
    target: Option<usize>,
    kind: Option<usize>,
    description: usize,
}

impl Columns {
    /// Named header columns; `| # | File | Target | Type | Description |` positions otherwise
    fn from_header(header: &[String]) -> Self {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|cell| names.contains(&cell.trim().to_ascii_lowercase().as_str()))
        };
        match (find(&["file", "path"]), find(&["description", "task"])) {
            (Some(file), Some(description)) => Self {
                file,
                target: find(&["target"]),
                kind: find(&["type", "kind"]),
                description,
            },
            _ => Self {
                file: 1,
                target: Some(2),
                kind: Some(3),
                description: 4,
            },
        }
    }

    fn entry(&self, line: usize, cells: &[String]) -> Option<Entry> {
        let cell = |index: Option<usize>| {
            index
                .and_then(|i| cells.get(i))
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
        };
        let target = clean_path(cell(Some(self.file))?)?;
        let description = cell(Some(self.description))?;
        let mut text = match cell(self.kind) {
            Some(kind) => format!("[{kind}] {description}"),
            None => description.to_string(),
        };
        if let Some(goal) = cell(self.target) {
            text.push_str(&format!(" (Target: {goal})"));
        }
        Some(Entry {
            line,
            target,
            description: text,
            mark: Mark::Cell(self.description),
        })
    }
}

/// Table row being collected
#[derive(Default)]
struct Row {
    line: usize,
    cells: Vec<String>,
    struck: bool,
}

/// Unmarked entries in document order
fn open_entries(text: &str) -> Vec<Entry> {
    let starts = line_starts(text);
    let line_of = |offset: usize| starts.partition_point(|&s| s <= offset).saturating_sub(1);

    let options = Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS | Options::ENABLE_STRIKETHROUGH;
    let mut entries = Vec::new();
    let mut header: Vec<String> = Vec::new();
    let mut columns: Option<Columns> = None;
    let mut in_head = false;
    let mut row: Option<Row> = None;

    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Table(_)) => {
                header.clear();
                columns = None;
            }
            Event::Start(Tag::TableHead) => {
                in_head = true;
                row = Some(Row::default());
            }
            Event::End(TagEnd::TableHead) => {
                in_head = false;
                if let Some(head) = row.take() {
                    header = head.cells;
                }
                columns = Some(Columns::from_header(&header));
            }
            Event::Start(Tag::TableRow) => {
                row = Some(Row {
                    line: line_of(range.start),
                    ..Row::default()
                });
            }
            Event::End(TagEnd::TableRow) => {
                if let (Some(done), Some(columns)) = (row.take(), columns) {
                    if !done.struck {
                        entries.extend(columns.entry(done.line, &done.cells));
                    }
                }
            }
            Event::Start(Tag::TableCell) => {
                if let Some(row) = row.as_mut() {
                    row.cells.push(String::new());
                }
            }
            Event::Start(Tag::Strikethrough) => {
                if let Some(row) = row.as_mut() {
                    row.struck |= !in_head;
                }
            }
            Event::Text(chunk) | Event::Code(chunk) => {
                if let Some(cell) = row.as_mut().and_then(|r| r.cells.last_mut()) {
                    cell.push_str(&chunk);
                }
            }
            Event::TaskListMarker(false) => {
                let line = line_of(range.start);
                let column = range.start - starts[line];
                entries.extend(checklist_entry(line_at(text, line), line, column));
            }
            _ => {}
        }
    }
    entries
}

/// `[ ] path/to/file: description` at `column` of `source`
fn checklist_entry(source: &str, line: usize, column: usize) -> Option<Entry> {
    let at = column + source.get(column..)?.find(OPEN_BOX)?;
    let rest = &source[at + OPEN_BOX.len()..];
    let (target, description) = rest.split_once(':')?;
    let target = clean_path(target)?;
    let description = description.trim();
    (!description.is_empty()).then(|| Entry {
        line,
        target,
        description: description.to_string(),
        mark: Mark::Checkbox(at),
    })
}

fn clean_path(cell: &str) -> Option<PathBuf> {
    let path = cell.trim().trim_matches('`').trim();
    (!path.is_empty() && !path.contains(char::is_whitespace)).then(|| PathBuf::from(path))
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Line `index` without its terminator
fn line_at(text: &str, index: usize) -> &str {
    text.lines().nth(index).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "\
# Plan

| # | File | Target | Type | Description |
|---|------|--------|------|-------------|
| 1 | `src/done.py` | x | FIX | ~~old work~~ |
| 2 | `src/app.py` | add | NEW | add an add function |

- [x] src/util.rs: finished
- [ ] src/lib.rs: document the crate
";

    fn targets(text: &str) -> Vec<PathBuf> {
        open_entries(text).into_iter().map(|e| e.target).collect()
    }

    #[test]
    fn table_rows_skip_headers_and_struck_rows() {
        let entries = open_entries(PLAN);
        assert_eq!(entries[0].line, 5);
        assert_eq!(entries[0].target, PathBuf::from("src/app.py"));
        assert_eq!(entries[0].description, "[NEW] add an add function (Target: add)");
        assert_eq!(entries[0].mark, Mark::Cell(4));
        assert_eq!(targets(PLAN), vec![PathBuf::from("src/app.py"), PathBuf::from("src/lib.rs")]);
    }

    #[test]
    fn file_names_that_look_like_headers_are_rows() {
        let plan = "\
| # | File | Target | Type | Description |
|---|------|--------|------|-------------|
| 1 | `src/FileReader.py` | read | FIX | close the handle |
| 2 | `src/app.py` | add | NEW | add it |
";
        assert_eq!(
            targets(plan),
            vec![PathBuf::from("src/FileReader.py"), PathBuf::from("src/app.py")]
        );
    }

    #[test]
    fn columns_follow_the_header() {
        let plan = "\
| Description | Path |
|-------------|------|
| tidy up | `a.py` |
";
        let entries = open_entries(plan);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, PathBuf::from("a.py"));
        assert_eq!(entries[0].description, "tidy up");
        assert_eq!(entries[0].mark, Mark::Cell(0));
    }

    #[test]
    fn checklist_items() {
        let entries = open_entries("- [ ] src/lib.rs: document the crate\n- [x] src/a.rs: done\n- [ ] no target here\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, PathBuf::from("src/lib.rs"));
        assert_eq!(entries[0].description, "document the crate");
        assert_eq!(entries[0].mark, Mark::Checkbox(2));
    }

    #[test]
    fn code_blocks_are_not_tasks() {
        let plan = "\
Entries look like this:

```markdown
- [ ] path/to/file.rs: what to change
| 1 | `x.py` | t | FIX | example |
```

- [ ] src/lib.rs: document the crate
";
        assert_eq!(targets(plan), vec![PathBuf::from("src/lib.rs")]);
    }

    #[test]
    fn marking() {
        assert_eq!(
            Mark::Cell(4).apply("| 2 | `a.py` | add | NEW | add it |").unwrap(),
            "| 2 | `a.py` | add | NEW | ~~add it~~ |"
        );
        assert_eq!(Mark::Cell(4).apply("| 2 | `a.py` | add | NEW | ~~add it~~ |"), None);
        assert_eq!(Mark::Checkbox(4).apply("  - [ ] a.rs: x").unwrap(), "  - [x] a.rs: x");
        assert_eq!(Mark::Checkbox(2).apply("- [x] a.rs: x"), None);
    }

    #[tokio::test]
    async fn first_open_entry_then_marked_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BACKLOG.md");
        std::fs::write(&path, PLAN).unwrap();
        let backlog = BacklogFile::new(&path);

        let first = backlog.next_task().await.unwrap().unwrap();
        assert_eq!(first.target, PathBuf::from("src/app.py"));
        assert!(backlog.mark_complete(&first).await.unwrap());
        assert!(!backlog.mark_complete(&first).await.unwrap());

        let second = backlog.next_task().await.unwrap().unwrap();
        assert_eq!(second.target, PathBuf::from("src/lib.rs"));
        assert!(backlog.mark_complete(&second).await.unwrap());

        assert!(backlog.next_task().await.unwrap().is_none());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("~~add an add function~~"));
        assert!(text.contains("- [x] src/lib.rs: document the crate"));
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn moved_entry_is_found_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BACKLOG.md");
        std::fs::write(&path, "- [ ] a.rs: fix\n").unwrap();
        let backlog = BacklogFile::new(&path);
        let task = backlog.next_task().await.unwrap().unwrap();

        std::fs::write(&path, "# New heading\n\n- [ ] a.rs: fix\n").unwrap();
        assert!(backlog.mark_complete(&task).await.unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# New heading\n\n- [x] a.rs: fix\n"
        );
    }

    #[tokio::test]
    async fn missing_file_and_foreign_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let backlog = BacklogFile::new(dir.path().join("none.md"));
        assert!(backlog.next_task().await.unwrap().is_none());
        assert!(!backlog.mark_complete(&MutationTask::new("a.py", "x")).await.unwrap());
    }
}

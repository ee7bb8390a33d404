use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::commands::{is_valid_session_id, CONTINUE_RECENT, RESUME_PREFIX};
use crate::platform::ChoiceButton;

/// How many history entries the `/resume` chooser offers.
pub const RECENT_SESSION_LIMIT: usize = 5;

const LABEL_CHARS: usize = 40;

/// One line of the terminal program's prompt history.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HistoryEntry {
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Reads prior sessions from the terminal program's on-disk state.
#[derive(Debug, Clone)]
pub struct SessionIndex {
    history_file: PathBuf,
    projects_dir: PathBuf,
}

impl SessionIndex {
    pub fn new(history_file: impl Into<PathBuf>, projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_file: history_file.into(),
            projects_dir: projects_dir.into(),
        }
    }

    /// Newest-first history entries. Unreadable files and lines are skipped.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let content = match std::fs::read_to_string(&self.history_file) {
            Ok(c) => c,
            Err(e) => {
                debug!("No session history at {}: {}", self.history_file.display(), e);
                return Vec::new();
            }
        };

        let mut entries: Vec<HistoryEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line.trim()).ok())
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        entries
    }

    /// Newest transcript id for a project path.
    pub fn session_id(&self, project_path: &str) -> Option<String> {
        let encoded = project_path.replace('/', "-");
        let encoded = encoded.trim_start_matches('-');
        for dir_name in [format!("-{encoded}"), encoded.to_string()] {
            let dir = self.projects_dir.join(dir_name);
            if let Some(id) = newest_transcript(&dir) {
                return Some(id);
            }
        }
        None
    }

    /// Buttons for the `/resume` chooser, or `None` when there is no history.
    pub fn choices(&self) -> Option<Vec<ChoiceButton>> {
        let recent = self.recent(RECENT_SESSION_LIMIT);
        if recent.is_empty() {
            return None;
        }

        let mut buttons = vec![ChoiceButton {
            label: "Continue most recent".to_string(),
            data: CONTINUE_RECENT.to_string(),
        }];
        for entry in &recent {
            let Some(id) = self.session_id(&entry.project) else {
                continue;
            };
            if !is_valid_session_id(&id) {
                continue;
            }
            let display = if entry.display.is_empty() {
                "?"
            } else {
                entry.display.as_str()
            };
            let label: String = display.chars().take(LABEL_CHARS).collect();
            buttons.push(ChoiceButton {
                label: format!("{label}..."),
                data: format!("{RESUME_PREFIX}{id}"),
            });
        }
        Some(buttons)
    }
}

fn newest_transcript(dir: &Path) -> Option<String> {
    let read_dir = std::fs::read_dir(dir).ok()?;
    read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .and_then(|(_, path)| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn write_history(dir: &Path, lines: &[&str]) -> PathBuf {
        let path = dir.join("history.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_recent_sorts_and_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let history = write_history(
            dir.path(),
            &[
                r#"{"display":"old","project":"/a","timestamp":1}"#,
                "not json",
                r#"{"display":"new","project":"/b","timestamp":3}"#,
                r#"{"display":"mid","project":"/c","timestamp":2}"#,
            ],
        );
        let index = SessionIndex::new(history, dir.path().join("projects"));
        let recent = index.recent(2);
        let names: Vec<&str> = recent.iter().map(|e| e.display.as_str()).collect();
        assert_eq!(names, vec!["new", "mid"]);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionIndex::new(dir.path().join("nope"), dir.path());
        assert!(index.recent(5).is_empty());
        assert!(index.choices().is_none());
    }

    #[test]
    fn test_session_id_picks_newest_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("-home-me-app");
        std::fs::create_dir_all(&project_dir).unwrap();
        let older = project_dir.join("older-id.jsonl");
        let newer = project_dir.join("newer-id.jsonl");
        std::fs::write(&older, "{}").unwrap();
        std::fs::write(&newer, "{}").unwrap();
        std::fs::write(project_dir.join("notes.txt"), "").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let index = SessionIndex::new(dir.path().join("history.jsonl"), dir.path());
        assert_eq!(index.session_id("/home/me/app").as_deref(), Some("newer-id"));
        assert_eq!(index.session_id("/elsewhere"), None);
    }

    #[test]
    fn test_choices_layout() {
        let dir = tempfile::tempdir().unwrap();
        let projects = dir.path().join("projects");
        std::fs::create_dir_all(projects.join("-srv-api")).unwrap();
        std::fs::write(projects.join("-srv-api").join("abc-123.jsonl"), "{}").unwrap();
        let long = "x".repeat(60);
        let line = format!(r#"{{"display":"{long}","project":"/srv/api","timestamp":5}}"#);
        let history = write_history(
            dir.path(),
            &[&line, r#"{"display":"gone","project":"/missing","timestamp":4}"#],
        );

        let index = SessionIndex::new(history, projects);
        let choices = index.choices().unwrap();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].data, "continue_recent");
        assert_eq!(choices[1].data, "resume:abc-123");
        assert_eq!(choices[1].label, format!("{}...", "x".repeat(40)));
    }
}

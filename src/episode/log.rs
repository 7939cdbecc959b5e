//! Incremental per-episode step log.
//!
//! The whole log is rewritten as a pretty-printed JSON array every time it
//! changes, so the file on disk is always a complete document even if the
//! process dies mid-episode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::types::StepLogEntry;

pub const LOG_FILE_NAME: &str = "episode_log.json";

#[derive(Debug)]
pub struct EpisodeLog {
    path: PathBuf,
    entries: Vec<StepLogEntry>,
}

impl EpisodeLog {
    /// A log stored as `episode_log.json` inside `episode_dir`.
    pub fn new(episode_dir: &Path) -> Self {
        Self {
            path: episode_dir.join(LOG_FILE_NAME),
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[StepLogEntry] {
        &self.entries
    }

    /// Persist the committed entries followed by an entry still being filled in.
    pub fn write_in_flight(&self, pending: &StepLogEntry) -> Result<()> {
        let mut all: Vec<&StepLogEntry> = self.entries.iter().collect();
        all.push(pending);
        write_json(&self.path, &all)
    }

    /// Append a finished entry and persist the log.
    pub fn commit(&mut self, entry: StepLogEntry) -> Result<()> {
        self.entries.push(entry);
        write_json(&self.path, &self.entries)
    }
}

/// Write `value` to `path` as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize log")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::types::{PossibleActions, VlmInput, VlmOutput};

    fn entry(step: usize) -> StepLogEntry {
        StepLogEntry::new(
            step,
            VlmInput {
                system_prompt: "sys...".into(),
                user_prompt: "user".into(),
                image: None,
                task_instruction: "task".into(),
                possible_actions: PossibleActions::List(vec![]),
            },
            VlmOutput::default(),
        )
    }

    fn read(path: &Path) -> Vec<StepLogEntry> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn in_flight_entry_is_written_but_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EpisodeLog::new(dir.path());
        log.commit(entry(1)).unwrap();

        let mut pending = entry(2);
        pending.parsed_action_ids = Some(vec![3]);
        log.write_in_flight(&pending).unwrap();

        let on_disk = read(log.path());
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[1].parsed_action_ids, Some(vec![3]));
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn commit_rewrites_whole_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EpisodeLog::new(dir.path());
        log.write_in_flight(&entry(1)).unwrap();

        let mut done = entry(1);
        done.reward = Some(1.0);
        log.commit(done).unwrap();

        let on_disk = read(&dir.path().join(LOG_FILE_NAME));
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].reward, Some(1.0));
        assert!(std::fs::read_to_string(log.path()).unwrap().starts_with("[\n  {"));
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Pure reconciliation of running tailers against the files sources resolve to.

use std::collections::{HashMap, HashSet};

use crate::receivers::file::input::{FileCandidate, FileId, ScanKey};
use crate::receivers::file::source::StartAt;

/// What the scanner knows about a running tailer.
#[derive(Debug, Clone)]
pub struct ObservedTailer {
    pub key: ScanKey,
    pub file_id: FileId,
    pub offset: u64,
    pub truncated: bool,
    pub exited: bool,
}

/// A file some source wants tailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredFile {
    pub key: ScanKey,
    pub candidate: FileCandidate,
    pub source: String,
    pub start_at: StartAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No source matches the file anymore
    Removed,
    /// Another file now lives at the path
    Rotated,
    /// The file shrank below the tailer offset
    Truncated,
    /// The read loop ended on an error
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStart {
    pub file: DesiredFile,
    /// Replaces a rotated or truncated tailer, so reading starts at 0
    pub restart: bool,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub stop: Vec<(ScanKey, StopReason)>,
    pub start: Vec<PlannedStart>,
    pub unchanged: Vec<ScanKey>,
    pub deferred: Vec<ScanKey>,
}

/// Diff running tailers against desired files.
///
/// When several desired entries share a key, the first one wins. New tailers
/// are started by path, then key, while the number of tailers stays within
/// `limit`; the rest are deferred to a later pass.
pub fn reconcile(observed: &[ObservedTailer], desired: &[DesiredFile], limit: usize) -> Plan {
    let mut wanted: HashMap<&ScanKey, &DesiredFile> = HashMap::with_capacity(desired.len());
    for file in desired {
        wanted.entry(&file.key).or_insert(file);
    }

    let mut plan = Plan::default();
    let mut replacements: Vec<PlannedStart> = Vec::new();
    let mut tailed: HashSet<&ScanKey> = HashSet::with_capacity(observed.len());

    for tailer in observed {
        tailed.insert(&tailer.key);

        let Some(file) = wanted.get(&tailer.key) else {
            plan.stop.push((tailer.key.clone(), StopReason::Removed));
            continue;
        };

        let reason = if tailer.exited {
            Some(StopReason::Exited)
        } else if file.candidate.file_id != tailer.file_id {
            Some(StopReason::Rotated)
        } else if tailer.truncated || file.candidate.size < tailer.offset {
            Some(StopReason::Truncated)
        } else {
            None
        };

        match reason {
            None => plan.unchanged.push(tailer.key.clone()),
            Some(reason) => {
                plan.stop.push((tailer.key.clone(), reason));
                replacements.push(PlannedStart {
                    file: (*file).clone(),
                    restart: reason != StopReason::Exited,
                });
            }
        }
    }

    let mut fresh: Vec<&DesiredFile> = Vec::new();
    let mut seen: HashSet<&ScanKey> = HashSet::with_capacity(desired.len());
    for file in desired {
        if tailed.contains(&file.key) || !seen.insert(&file.key) {
            continue;
        }
        fresh.push(file);
    }
    fresh.sort_by(|a, b| start_order(a, b));

    // Replacements reuse the slot of the tailer they replace. Slots of removed
    // tailers only become available on the next pass.
    let mut live = observed.len();
    plan.start = replacements;
    for file in fresh {
        if live < limit {
            live += 1;
            plan.start.push(PlannedStart {
                file: file.clone(),
                restart: false,
            });
        } else {
            plan.deferred.push(file.key.clone());
        }
    }
    plan.start.sort_by(|a, b| start_order(&a.file, &b.file));

    plan
}

fn start_order(a: &DesiredFile, b: &DesiredFile) -> std::cmp::Ordering {
    a.candidate
        .path
        .cmp(&b.candidate.path)
        .then_with(|| a.key.cmp(&b.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn file(path: &str, identifier: &str, ino: u64, size: u64) -> DesiredFile {
        DesiredFile {
            key: ScanKey::from_parts(Path::new(path), identifier),
            candidate: FileCandidate {
                path: PathBuf::from(path),
                file_id: FileId::new(1, ino),
                size,
            },
            source: "test".to_string(),
            start_at: StartAt::Beginning,
        }
    }

    fn running(file: &DesiredFile, offset: u64) -> ObservedTailer {
        ObservedTailer {
            key: file.key.clone(),
            file_id: file.candidate.file_id,
            offset,
            truncated: false,
            exited: false,
        }
    }

    fn keys(starts: &[PlannedStart]) -> Vec<&str> {
        starts.iter().map(|s| s.file.key.as_str()).collect()
    }

    #[test]
    fn test_unchanged_files_keep_their_tailers() {
        let a = file("/log/a.log", "", 1, 10);
        let b = file("/log/b.log", "", 2, 20);

        let plan = reconcile(&[running(&a, 10), running(&b, 5)], &[a, b], 10);
        assert!(plan.stop.is_empty());
        assert!(plan.start.is_empty());
        assert_eq!(plan.unchanged.len(), 2);
    }

    #[test]
    fn test_new_files_start_in_path_order() {
        let plan = reconcile(
            &[],
            &[
                file("/log/c.log", "", 3, 0),
                file("/log/a.log", "x", 1, 0),
                file("/log/a.log", "", 1, 0),
            ],
            10,
        );
        assert_eq!(keys(&plan.start), vec!["/log/a.log", "/log/a.log/x", "/log/c.log"]);
        assert!(plan.start.iter().all(|s| !s.restart));
    }

    #[test]
    fn test_removed_file_is_stopped() {
        let a = file("/log/a.log", "", 1, 10);
        let plan = reconcile(&[running(&a, 10)], &[], 10);
        assert_eq!(plan.stop, vec![(a.key, StopReason::Removed)]);
        assert!(plan.start.is_empty());
    }

    #[test]
    fn test_rotation_restarts_from_zero() {
        let old = file("/log/a.log", "", 1, 100);
        let new = file("/log/a.log", "", 2, 5);

        let plan = reconcile(&[running(&old, 100)], &[new.clone()], 10);
        assert_eq!(plan.stop, vec![(new.key.clone(), StopReason::Rotated)]);
        assert_eq!(
            plan.start,
            vec![PlannedStart {
                file: new,
                restart: true
            }]
        );
    }

    #[test]
    fn test_truncation_restarts_from_zero() {
        let before = file("/log/a.log", "", 1, 100);
        let after = file("/log/a.log", "", 1, 10);

        let plan = reconcile(&[running(&before, 100)], &[after.clone()], 10);
        assert_eq!(plan.stop, vec![(after.key.clone(), StopReason::Truncated)]);
        assert!(plan.start[0].restart);

        // Grown back past the old offset, but the tailer saw the truncation
        let mut flagged = running(&before, 100);
        flagged.truncated = true;
        let regrown = file("/log/a.log", "", 1, 150);
        let plan = reconcile(&[flagged], &[regrown], 10);
        assert_eq!(plan.stop[0].1, StopReason::Truncated);
    }

    #[test]
    fn test_exited_tailer_is_restarted_as_new() {
        let a = file("/log/a.log", "", 1, 10);
        let mut tailer = running(&a, 4);
        tailer.exited = true;

        let plan = reconcile(&[tailer], &[a], 10);
        assert_eq!(plan.stop[0].1, StopReason::Exited);
        assert_eq!(plan.start.len(), 1);
        assert!(!plan.start[0].restart);
    }

    #[test]
    fn test_budget_defers_extra_files() {
        let a = file("/log/a.log", "", 1, 0);
        let b = file("/log/b.log", "", 2, 0);
        let c = file("/log/c.log", "", 3, 0);

        let plan = reconcile(&[], &[c.clone(), b.clone(), a.clone()], 2);
        assert_eq!(keys(&plan.start), vec!["/log/a.log", "/log/b.log"]);
        assert_eq!(plan.deferred, vec![c.key.clone()]);

        // b removed: its slot is free from the next pass on
        let plan = reconcile(
            &[running(&a, 0), running(&b, 0)],
            &[a.clone(), c.clone()],
            2,
        );
        assert_eq!(plan.stop, vec![(b.key.clone(), StopReason::Removed)]);
        assert!(plan.start.is_empty());
        assert_eq!(plan.deferred, vec![c.key.clone()]);

        let plan = reconcile(&[running(&a, 0)], &[a, c], 2);
        assert_eq!(keys(&plan.start), vec!["/log/c.log"]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_rotation_at_limit_keeps_its_slot() {
        let a = file("/log/a.log", "", 1, 10);
        let b = file("/log/b.log", "", 2, 10);
        let rotated = file("/log/a.log", "", 3, 0);

        let plan = reconcile(&[running(&a, 10), running(&b, 10)], &[rotated, b], 2);
        assert_eq!(keys(&plan.start), vec!["/log/a.log"]);
        assert!(plan.start[0].restart);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_duplicate_keys_first_source_wins() {
        let mut first = file("/log/a.log", "", 1, 0);
        first.source = "first".to_string();
        let mut second = file("/log/a.log", "", 1, 0);
        second.source = "second".to_string();

        let plan = reconcile(&[], &[first, second], 10);
        assert_eq!(plan.start.len(), 1);
        assert_eq!(plan.start[0].file.source, "first");
    }
}

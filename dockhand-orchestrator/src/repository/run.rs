//! Run Repository
//!
//! In-memory storage for pipeline runs and their logs. Nothing is written to
//! disk. Only the most recent runs are kept: once the limit is exceeded the
//! oldest finished runs are evicted together with their logs.

use dockhand_core::domain::log::LogEntry;
use dockhand_core::domain::run::PipelineRun;
use dockhand_runner::RunReporter;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use uuid::Uuid;

/// Maximum log entries kept per run; older lines are dropped first
const MAX_LOG_ENTRIES: usize = 10_000;

/// Runs kept by default
pub const DEFAULT_RUN_LIMIT: usize = 100;

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, PipelineRun>,
    /// Run ids in request order
    order: VecDeque<Uuid>,
    logs: HashMap<Uuid, VecDeque<LogEntry>>,
}

impl Inner {
    /// Drops the oldest finished runs until at most `limit` remain
    ///
    /// Queued and in-flight runs are never evicted, so the store can briefly
    /// hold more than `limit` runs while they are pending.
    fn evict(&mut self, limit: usize) {
        let mut excess = self.order.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }

        let runs = &self.runs;
        let mut evicted = Vec::new();
        self.order.retain(|id| {
            let finished = runs.get(id).is_none_or(|r| r.state.is_terminal());
            if excess > 0 && finished {
                excess -= 1;
                evicted.push(*id);
                false
            } else {
                true
            }
        });

        for id in evicted {
            tracing::debug!("Evicting run {} from history", id);
            self.runs.remove(&id);
            self.logs.remove(&id);
        }
    }
}

/// Store of the most recent runs seen by this server
pub struct RunRepository {
    inner: RwLock<Inner>,
    limit: usize,
}

impl Default for RunRepository {
    fn default() -> Self {
        Self::with_limit(DEFAULT_RUN_LIMIT)
    }
}

impl RunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository that keeps at most `limit` finished runs
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            limit: limit.max(1),
        }
    }

    /// Inserts or replaces a run snapshot
    pub fn save(&self, run: &PipelineRun) {
        let Ok(mut inner) = self.inner.write() else {
            tracing::error!("Run repository lock poisoned; dropping update for {}", run.id);
            return;
        };
        if inner.runs.insert(run.id, run.clone()).is_none() {
            inner.order.push_back(run.id);
        }
        if run.state.is_terminal() {
            inner.evict(self.limit);
        }
    }

    /// Find a run by ID
    pub fn find_by_id(&self, id: Uuid) -> Option<PipelineRun> {
        self.inner.read().ok()?.runs.get(&id).cloned()
    }

    /// All runs, newest first
    pub fn list_all(&self) -> Vec<PipelineRun> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect()
    }

    /// Appends a log entry to a run
    pub fn add_entry(&self, run_id: Uuid, entry: LogEntry) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        let logs = inner.logs.entry(run_id).or_default();
        if logs.len() >= MAX_LOG_ENTRIES {
            logs.pop_front();
        }
        logs.push_back(entry);
    }

    /// All log entries of a run, oldest first
    pub fn find_logs(&self, run_id: Uuid) -> Vec<LogEntry> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .logs
                    .get(&run_id)
                    .map(|logs| logs.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl RunReporter for RunRepository {
    fn update(&self, run: &PipelineRun) {
        self.save(run);
    }

    fn log(&self, run_id: Uuid, entry: LogEntry) {
        self.add_entry(run_id, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_core::domain::log::LogLevel;
    use dockhand_core::domain::run::{RunState, Trigger};

    fn run() -> PipelineRun {
        PipelineRun::new("tutorials", Trigger::Manual, &["backend".to_string()])
    }

    fn finished() -> PipelineRun {
        let mut run = run();
        run.transition(RunState::Building).unwrap();
        run.fail(&dockhand_core::error::PipelineError::deploy("boom")).unwrap();
        run
    }

    #[test]
    fn test_list_is_newest_first() {
        let repo = RunRepository::new();
        let first = run();
        let second = run();
        repo.save(&first);
        repo.save(&second);

        let ids: Vec<Uuid> = repo.list_all().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_save_replaces_snapshot_without_reordering() {
        let repo = RunRepository::new();
        let mut first = run();
        let second = run();
        repo.save(&first);
        repo.save(&second);

        first.transition(RunState::Building).unwrap();
        repo.save(&first);

        assert_eq!(repo.find_by_id(first.id).unwrap().state, RunState::Building);
        assert_eq!(repo.list_all().len(), 2);
        assert_eq!(repo.list_all()[0].id, second.id);
    }

    #[test]
    fn test_logs_are_kept_per_run() {
        let repo = RunRepository::new();
        let a = run();
        let b = run();
        repo.log(a.id, LogEntry::now(LogLevel::Info, None, "a1"));
        repo.log(b.id, LogEntry::now(LogLevel::Info, None, "b1"));
        repo.log(a.id, LogEntry::now(LogLevel::Error, Some("deploy"), "a2"));

        let messages: Vec<String> = repo.find_logs(a.id).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["a1", "a2"]);
        assert!(repo.find_logs(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_oldest_finished_run_and_its_logs_are_evicted() {
        let repo = RunRepository::with_limit(3);
        let runs: Vec<PipelineRun> = (0..4).map(|_| finished()).collect();
        for r in &runs {
            repo.save(r);
            repo.log(r.id, LogEntry::now(LogLevel::Info, None, "done"));
        }

        assert_eq!(repo.list_all().len(), 3);
        assert!(repo.find_by_id(runs[0].id).is_none());
        assert!(repo.find_logs(runs[0].id).is_empty());
        assert!(repo.find_by_id(runs[3].id).is_some());
        assert_eq!(repo.find_logs(runs[1].id).len(), 1);
    }

    #[test]
    fn test_pending_runs_are_never_evicted() {
        let repo = RunRepository::with_limit(1);
        let queued = run();
        repo.save(&queued);
        let done = finished();
        repo.save(&done);
        let newer = finished();
        repo.save(&newer);

        assert!(repo.find_by_id(queued.id).is_some());
        assert!(repo.find_by_id(done.id).is_none());
        assert!(repo.find_by_id(newer.id).is_some());
    }

    #[test]
    fn test_log_cap_drops_oldest_entries() {
        let repo = RunRepository::new();
        let r = run();
        for i in 0..=MAX_LOG_ENTRIES {
            repo.log(r.id, LogEntry::now(LogLevel::Debug, None, i.to_string()));
        }

        let logs = repo.find_logs(r.id);
        assert_eq!(logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(logs[0].message, "1");
    }
}

//! Script Manager
//!
//! Owns the registry of running scripts and the start/stop lifecycle. Every
//! started script gets its own OS thread; the registry guarantees at most one
//! running instance per name no matter how many triggers race.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scriptmill_engine::EngineCatalog;

use crate::config::ScriptingConfig;
use crate::context::{ContextHandle, ExecutionContext, ScriptState};
use crate::error::{ManagerError, ManagerResult, StoreError};
use crate::host::{HostBridge, HostHandle, RuntimeLocator};
use crate::store::ScriptStore;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Registry entry for one running script
struct ExecutionRecord {
    run_id: Uuid,
    context: ContextHandle,
    unit: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

/// Execution unit that was stopped but may still be unwinding
struct StoppedUnit {
    name: String,
    unit: JoinHandle<()>,
}

type Registry = DashMap<String, ExecutionRecord>;

/// Removes the owning record when an execution unit finishes.
///
/// Only the record with a matching `run_id` is removed, so a unit that was
/// stopped never evicts a newer run started under the same name.
struct Deregister {
    registry: Arc<Registry>,
    name: String,
    run_id: Uuid,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        let removed = self
            .registry
            .remove_if(&self.name, |_, record| record.run_id == self.run_id);
        if removed.is_some() {
            debug!(script = %self.name, "Script deregistered");
        }
    }
}

/// Listing entry for a stored script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptDescriptor {
    pub name: String,
    pub file_name: String,
    pub running: bool,
    pub state: Option<ScriptState>,
    pub started_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Central manager for script storage and execution
pub struct ScriptManager {
    config: ScriptingConfig,
    catalog: Arc<EngineCatalog>,
    registry: Arc<Registry>,
    runtime: RwLock<Option<HostHandle>>,
    locator: Option<Arc<dyn RuntimeLocator>>,
    stopped: Mutex<Vec<StoppedUnit>>,
    /// Set by `shutdown`; hides the locator until a runtime is set again
    closed: AtomicBool,
}

impl ScriptManager {
    pub fn new(config: ScriptingConfig, catalog: Arc<EngineCatalog>) -> Self {
        Self {
            config,
            catalog,
            registry: Arc::new(DashMap::new()),
            runtime: RwLock::new(None),
            locator: None,
            stopped: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Fall back to `locator` when no runtime has been set explicitly
    pub fn with_locator(mut self, locator: Arc<dyn RuntimeLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host runtime
    // ─────────────────────────────────────────────────────────────────────────

    /// Set (or clear) the host runtime used for new executions.
    ///
    /// Setting a runtime after [`shutdown`](Self::shutdown) opens a new host
    /// session.
    pub fn set_runtime(&self, runtime: Option<HostHandle>) {
        match &runtime {
            Some(r) => {
                info!("Host runtime set to '{}'", r.name());
                self.closed.store(false, Ordering::SeqCst);
            }
            None => info!("Host runtime cleared"),
        }
        *self.runtime.write() = runtime;
    }

    /// The host runtime: the one set explicitly, else whatever the locator
    /// currently reports. Always `None` once the manager is shut down.
    pub fn runtime(&self) -> Option<HostHandle> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Script manager is shut down");
            return None;
        }
        if let Some(runtime) = self.runtime.read().clone() {
            return Some(runtime);
        }

        let located = self.locator.as_ref().and_then(|locator| locator.current());
        match &located {
            Some(runtime) => debug!("Using host runtime '{}' from locator", runtime.name()),
            None => warn!("No host runtime available"),
        }
        located
    }

    fn store(&self) -> ManagerResult<ScriptStore> {
        let runtime = self.runtime().ok_or(ManagerError::RuntimeUnavailable)?;
        let dir = self.config.scripts_path(&runtime.world_dir());
        Ok(ScriptStore::open(dir, self.config.extension.as_str())?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Storage
    // ─────────────────────────────────────────────────────────────────────────

    pub fn script_exists(&self, name: &str) -> bool {
        match self.store() {
            Ok(store) => store.exists(name),
            Err(e) => {
                warn!(script = %name, error = %e, "Cannot check script existence");
                false
            }
        }
    }

    /// Create or overwrite a script
    pub fn create_script(&self, name: &str, source: &str) -> ManagerResult<()> {
        self.store()?.write(name, source)?;
        info!(script = %name, "Script saved");
        Ok(())
    }

    pub fn read_script(&self, name: &str) -> ManagerResult<String> {
        self.store()?.read(name).map_err(|e| match e {
            StoreError::NotFound(name) => ManagerError::NotFound(name),
            other => other.into(),
        })
    }

    /// Stop any running instance, then delete the script file
    pub fn delete_script(&self, name: &str) -> ManagerResult<()> {
        let store = self.store()?;
        self.stop_script(name);
        store.delete(name)?;
        info!(script = %name, "Script deleted");
        Ok(())
    }

    /// All stored scripts, with their execution status
    pub fn list(&self) -> ManagerResult<BTreeMap<String, ScriptDescriptor>> {
        let store = self.store()?;
        let scripts = store
            .list()?
            .into_iter()
            .map(|name| {
                let record = self.registry.get(&name);
                let descriptor = ScriptDescriptor {
                    file_name: store.file_name(&name),
                    running: record.is_some(),
                    state: record.as_ref().map(|r| r.context.state()),
                    started_at: record.as_ref().map(|r| r.started_at),
                    name: name.clone(),
                };
                drop(record);
                (name, descriptor)
            })
            .collect();

        Ok(scripts)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Start `name` on a new execution unit. Returns once the unit is spawned.
    pub fn start_script(&self, name: &str) -> ManagerResult<()> {
        if self.registry.contains_key(name) {
            return Err(ManagerError::AlreadyRunning(name.to_string()));
        }

        let runtime = self.runtime().ok_or(ManagerError::RuntimeUnavailable)?;
        let store = ScriptStore::open(
            self.config.scripts_path(&runtime.world_dir()),
            self.config.extension.as_str(),
        )?;
        let source = store.read(name).map_err(|e| match e {
            StoreError::NotFound(name) => ManagerError::NotFound(name),
            other => other.into(),
        })?;

        // Holding the vacant entry makes check-then-insert atomic
        let vacant = match self.registry.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(ManagerError::AlreadyRunning(name.to_string())),
            Entry::Vacant(vacant) => vacant,
        };

        let bridge = HostBridge::new(Some(runtime), self.config.command_timeout());
        let context = ExecutionContext::new(name, source, bridge, self.catalog.clone());
        let handle = context.handle();
        let run_id = Uuid::new_v4();

        let registry = self.registry.clone();
        let owner = name.to_string();

        // The unit blocks in `Deregister` until the record below is inserted.
        // The guard is built on the unit so a failed spawn never touches the
        // locked shard.
        let unit = thread::Builder::new()
            .name(format!("script-{}", name))
            .spawn(move || {
                let _deregister = Deregister {
                    registry,
                    name: owner,
                    run_id,
                };
                let state = context.execute();
                debug!(script = %context.name(), %state, "Execution unit exiting");
            })
            .map_err(|source| ManagerError::Spawn {
                name: name.to_string(),
                source,
            })?;

        vacant.insert(ExecutionRecord {
            run_id,
            context: handle,
            unit: Some(unit),
            started_at: Utc::now(),
        });

        info!(script = %name, %run_id, "Script started");
        Ok(())
    }

    /// Start `name`, returning `false` if it is already running or cannot be
    /// started.
    pub fn execute_script(&self, name: &str) -> bool {
        match self.start_script(name) {
            Ok(()) => true,
            Err(ManagerError::AlreadyRunning(_)) => {
                debug!(script = %name, "Script already running");
                false
            }
            Err(e) => {
                error!(script = %name, error = %e, "Failed to start script");
                false
            }
        }
    }

    /// Stop a running script. Returns `true` if it was running.
    ///
    /// The record is gone when this returns, even if the execution unit is
    /// still unwinding.
    pub fn stop_script(&self, name: &str) -> bool {
        let Some((_, mut record)) = self.registry.remove(name) else {
            debug!(script = %name, "Script was not running");
            return false;
        };

        record.context.stop();
        if let Some(unit) = record.unit.take() {
            let mut stopped = self.stopped.lock();
            stopped.retain(|s| !s.unit.is_finished());
            stopped.push(StoppedUnit {
                name: name.to_string(),
                unit,
            });
        }

        info!(script = %name, run_id = %record.run_id, "Script stopped");
        true
    }

    /// Stop every running script, returning how many were stopped
    pub fn stop_all_scripts(&self) -> usize {
        let names: Vec<String> = self.registry.iter().map(|r| r.key().clone()).collect();
        let count = names.iter().filter(|name| self.stop_script(name)).count();
        if count > 0 {
            info!("Stopped {} script(s)", count);
        }
        count
    }

    pub fn is_script_running(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// State of the running instance of `name`, if any
    pub fn script_state(&self, name: &str) -> Option<ScriptState> {
        self.registry.get(name).map(|record| record.context.state())
    }

    /// Names of all running scripts
    pub fn running_scripts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Stop all scripts, release the host runtime and wait for execution
    /// units to unwind.
    pub fn shutdown(&self) -> ManagerResult<()> {
        info!("Shutting down script manager");
        self.closed.store(true, Ordering::SeqCst);
        self.set_runtime(None);
        self.stop_all_scripts();
        self.drain(self.config.shutdown_timeout())
    }

    /// Join stopped units, waiting at most `timeout` for them to finish
    fn drain(&self, timeout: Duration) -> ManagerResult<()> {
        let deadline = Instant::now() + timeout;
        let mut pending = std::mem::take(&mut *self.stopped.lock());

        loop {
            let (finished, still_running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|s| s.unit.is_finished());

            for stopped in finished {
                if stopped.unit.join().is_err() {
                    error!(script = %stopped.name, "Execution unit panicked");
                }
            }

            pending = still_running;
            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let count = pending.len();
                for stopped in &pending {
                    warn!(script = %stopped.name, "Execution unit did not stop in time");
                }
                // Keep them so a later shutdown can retry
                self.stopped.lock().extend(pending);
                return Err(ManagerError::ShutdownTimeout(count));
            }

            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl std::fmt::Debug for ScriptManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptManager")
            .field("running", &self.running_scripts())
            .field("catalog", &self.catalog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostRuntime, LocalHost};
    use crate::testing::{RecordingProcessor, wait_until};
    use std::sync::Barrier;
    use tempfile::TempDir;

    const SPIN: &str = "while (true) {}";

    struct Fixture {
        _dir: TempDir,
        host: Arc<LocalHost>,
        processor: RecordingProcessor,
        manager: Arc<ScriptManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let processor = RecordingProcessor::new();
            let host = LocalHost::spawn("test-host", dir.path(), processor.clone()).unwrap();

            let config = ScriptingConfig {
                command_timeout_ms: 2_000,
                ..ScriptingConfig::default()
            };
            let manager = ScriptManager::new(config, Arc::new(EngineCatalog::with_defaults()));
            manager.set_runtime(Some(host.clone() as HostHandle));

            Self {
                _dir: dir,
                host,
                processor,
                manager: Arc::new(manager),
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = self.manager.shutdown();
            self.host.stop();
        }
    }

    struct FixedLocator(Option<HostHandle>);

    impl RuntimeLocator for FixedLocator {
        fn current(&self) -> Option<HostHandle> {
            self.0.clone()
        }
    }

    #[test]
    fn test_second_start_is_rejected() {
        let f = Fixture::new();
        f.manager.create_script("spin", SPIN).unwrap();

        assert!(f.manager.execute_script("spin"));
        assert!(f.manager.is_script_running("spin"));
        assert!(!f.manager.execute_script("spin"));
        assert!(matches!(
            f.manager.start_script("spin"),
            Err(ManagerError::AlreadyRunning(_))
        ));
        assert_eq!(f.manager.running_scripts(), vec!["spin"]);
    }

    #[test]
    fn test_concurrent_starts_have_one_winner() {
        let f = Fixture::new();
        f.manager.create_script("race", SPIN).unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let racers: Vec<_> = (0..8)
            .map(|_| {
                let manager = f.manager.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    manager.execute_script("race")
                })
            })
            .collect();

        let wins = racers
            .into_iter()
            .map(|racer| racer.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(f.manager.running_scripts(), vec!["race"]);
    }

    #[test]
    fn test_completion_deregisters() {
        let f = Fixture::new();
        f.manager
            .create_script("hello", "function main(c) { c.exec('say hello'); }")
            .unwrap();

        assert!(f.manager.execute_script("hello"));
        assert!(wait_until(Duration::from_secs(5), || {
            !f.manager.is_script_running("hello")
        }));
        assert_eq!(f.processor.commands(), vec!["say hello"]);

        // Can be started again once finished
        assert!(f.manager.execute_script("hello"));
        assert!(wait_until(Duration::from_secs(5), || {
            f.processor.commands().len() == 2
        }));
    }

    #[test]
    fn test_failure_deregisters_and_broadcasts() {
        let f = Fixture::new();
        f.manager.create_script("broken", "throw new Error('nope');").unwrap();

        assert!(f.manager.execute_script("broken"));
        assert!(wait_until(Duration::from_secs(5), || {
            !f.manager.is_script_running("broken")
        }));
        assert!(wait_until(Duration::from_secs(2), || {
            f.processor.broadcasts() == vec!["Script error in broken: Error: nope".to_string()]
        }));
    }

    #[test]
    fn test_stop_running_script() {
        let f = Fixture::new();
        f.manager.create_script("spin", SPIN).unwrap();
        assert!(f.manager.execute_script("spin"));

        assert!(f.manager.stop_script("spin"));
        assert!(!f.manager.is_script_running("spin"));
        assert!(f.manager.script_state("spin").is_none());
        assert!(!f.manager.stop_script("spin"));
        assert!(!f.manager.stop_script("never-started"));

        f.manager.shutdown().unwrap();
    }

    #[test]
    fn test_restart_after_stop_keeps_new_record() {
        let f = Fixture::new();
        f.manager
            .create_script("loop", "function main(c) { while (true) { global.sleep(5); } }")
            .unwrap();

        assert!(f.manager.execute_script("loop"));
        assert!(f.manager.stop_script("loop"));
        assert!(f.manager.execute_script("loop"));

        // The first unit finishing must not remove the second run's record
        thread::sleep(Duration::from_millis(200));
        assert!(f.manager.is_script_running("loop"));
        assert_eq!(f.manager.script_state("loop"), Some(ScriptState::Running));
    }

    #[test]
    fn test_stop_all_scripts() {
        let f = Fixture::new();
        for name in ["a", "b", "c"] {
            f.manager.create_script(name, SPIN).unwrap();
            assert!(f.manager.execute_script(name));
        }

        assert_eq!(f.manager.stop_all_scripts(), 3);
        assert!(f.manager.running_scripts().is_empty());
        assert_eq!(f.manager.stop_all_scripts(), 0);
    }

    #[test]
    fn test_missing_script_fails_closed() {
        let f = Fixture::new();

        assert!(matches!(
            f.manager.start_script("ghost"),
            Err(ManagerError::NotFound(name)) if name == "ghost"
        ));
        assert!(!f.manager.execute_script("ghost"));
        assert!(!f.manager.is_script_running("ghost"));
        assert!(matches!(
            f.manager.start_script("../etc/passwd"),
            Err(ManagerError::Store(StoreError::InvalidName(_)))
        ));
    }

    #[test]
    fn test_no_runtime_fails_closed() {
        let manager = ScriptManager::new(
            ScriptingConfig::default(),
            Arc::new(EngineCatalog::with_defaults()),
        );

        assert!(manager.runtime().is_none());
        assert!(!manager.execute_script("anything"));
        assert!(matches!(
            manager.start_script("anything"),
            Err(ManagerError::RuntimeUnavailable)
        ));
        assert!(!manager.script_exists("anything"));
        assert!(matches!(manager.list(), Err(ManagerError::RuntimeUnavailable)));
    }

    #[test]
    fn test_locator_is_consulted_each_time() {
        let dir = TempDir::new().unwrap();
        let host = LocalHost::spawn("located", dir.path(), RecordingProcessor::new()).unwrap();

        let manager = ScriptManager::new(
            ScriptingConfig::default(),
            Arc::new(EngineCatalog::with_defaults()),
        )
        .with_locator(Arc::new(FixedLocator(Some(host.clone() as HostHandle))));

        assert_eq!(manager.runtime().map(|r| r.name().to_string()).as_deref(), Some("located"));
        manager.create_script("x", "").unwrap();
        assert!(dir.path().join("scripts/x.js").is_file());

        manager.set_runtime(None);
        assert!(manager.runtime().is_some());

        let unlocated = ScriptManager::new(
            ScriptingConfig::default(),
            Arc::new(EngineCatalog::with_defaults()),
        )
        .with_locator(Arc::new(FixedLocator(None)));
        assert!(unlocated.runtime().is_none());

        host.stop();
    }

    #[test]
    fn test_shutdown_hides_locator() {
        let dir = TempDir::new().unwrap();
        let host = LocalHost::spawn("located", dir.path(), RecordingProcessor::new()).unwrap();

        let manager = ScriptManager::new(
            ScriptingConfig::default(),
            Arc::new(EngineCatalog::with_defaults()),
        )
        .with_locator(Arc::new(FixedLocator(Some(host.clone() as HostHandle))));
        manager.create_script("late", "var x = 1;").unwrap();

        manager.shutdown().unwrap();
        assert!(manager.runtime().is_none());
        assert!(!manager.execute_script("late"));
        assert!(matches!(
            manager.start_script("late"),
            Err(ManagerError::RuntimeUnavailable)
        ));

        // A new session reopens the manager
        manager.set_runtime(Some(host.clone() as HostHandle));
        assert!(manager.script_exists("late"));
        manager.shutdown().unwrap();

        host.stop();
    }

    #[test]
    fn test_list_reports_running_state() {
        let f = Fixture::new();
        f.manager.create_script("idle", "var x = 1;").unwrap();
        f.manager.create_script("busy", SPIN).unwrap();
        assert!(f.manager.execute_script("busy"));

        let scripts = f.manager.list().unwrap();
        assert_eq!(scripts.keys().collect::<Vec<_>>(), vec!["busy", "idle"]);

        let busy = &scripts["busy"];
        assert_eq!(busy.file_name, "busy.js");
        assert!(busy.running);
        assert!(busy.started_at.is_some());
        assert!(matches!(
            busy.state,
            Some(ScriptState::Starting) | Some(ScriptState::Running)
        ));

        let idle = &scripts["idle"];
        assert!(!idle.running);
        assert_eq!(idle.state, None);
    }

    #[test]
    fn test_delete_stops_running_script() {
        let f = Fixture::new();
        f.manager.create_script("doomed", SPIN).unwrap();
        assert!(f.manager.execute_script("doomed"));

        f.manager.delete_script("doomed").unwrap();
        assert!(!f.manager.is_script_running("doomed"));
        assert!(!f.manager.script_exists("doomed"));
        assert!(matches!(
            f.manager.read_script("doomed"),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_storage_round_trip_under_world_dir() {
        let f = Fixture::new();
        f.manager.create_script("saved", "print('x')").unwrap();

        assert!(f.manager.script_exists("saved"));
        assert_eq!(f.manager.read_script("saved").unwrap(), "print('x')");
        assert!(f.host.world_dir().join("scripts/saved.js").is_file());
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let f = Fixture::new();
        for name in ["one", "two"] {
            f.manager.create_script(name, SPIN).unwrap();
            assert!(f.manager.execute_script(name));
        }
        f.manager
            .create_script("napper", "function main(c) { global.sleep(60000); }")
            .unwrap();
        assert!(f.manager.execute_script("napper"));

        let started = Instant::now();
        f.manager.shutdown().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(f.manager.running_scripts().is_empty());
        assert!(f.manager.runtime().is_none());
        assert!(!f.manager.execute_script("one"));
    }
}

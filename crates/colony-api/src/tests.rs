use super::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use contracts::{ErrorCode, TaskInstance, SCHEMA_VERSION_V1};

/// Memory store whose saves can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryWorldStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl WorldStore for FlakyStore {
    fn load_world(&self) -> Result<Option<WorldSnapshot>, PersistenceError> {
        self.inner.load_world()
    }

    fn save_world(&self, snapshot: &WorldSnapshot) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::other("disk unplugged")));
        }
        self.inner.save_world(snapshot)
    }
}

/// Memory store whose saves can be made to stall. Saves are serialized the
/// same way the real stores serialize them.
struct StallingStore {
    inner: MemoryWorldStore,
    stall: std::sync::Mutex<Option<Duration>>,
}

impl StallingStore {
    fn new() -> Self {
        Self {
            inner: MemoryWorldStore::new(),
            stall: std::sync::Mutex::new(None),
        }
    }

    fn set_stall(&self, stall: Option<Duration>) {
        *self.stall.lock().expect("stall lock") = stall;
    }
}

impl WorldStore for StallingStore {
    fn load_world(&self) -> Result<Option<WorldSnapshot>, PersistenceError> {
        self.inner.load_world()
    }

    fn save_world(&self, snapshot: &WorldSnapshot) -> Result<(), PersistenceError> {
        let stall = self.stall.lock().map_err(|_| PersistenceError::Poisoned)?;
        if let Some(delay) = *stall {
            std::thread::sleep(delay);
        }
        self.inner.save_world(snapshot)
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_interval_secs: 0.02,
        persistence_timeout_ms: 1_000,
        ..EngineConfig::default()
    }
}

fn temp_db_path() -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("colony_engine_{nanos}.sqlite"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_world_is_saved_on_open() {
    let store = Arc::new(MemoryWorldStore::new());
    let engine = Engine::open(EngineConfig::default(), store.clone())
        .await
        .expect("open");

    let saved = store.last_saved().expect("bootstrap save");
    assert_eq!(saved.tick, 0);
    assert_eq!(saved.resources.get("energy"), Some(&75));
    assert_eq!(saved.resources.get("materials"), Some(&60));
    assert_eq!(saved.resources.get("data"), Some(&40));

    let state = engine.query_state().await;
    assert_eq!(state.scheduler, SchedulerState::Stopped);
    assert!(state.active_tasks.is_empty());
    assert_eq!(engine.catalog().await.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn world_survives_reopen_from_sqlite() {
    let path = temp_db_path();
    let mut config = EngineConfig::default();
    config.initial_resources.insert("materials".to_string(), 120);
    let store = open_store(&path, Duration::from_millis(500)).expect("store");
    let engine = Engine::open(config.clone(), store)
        .await
        .expect("open");

    engine
        .assign_task(AdmissionRequest::new("Repair Comms Hub", "Comms Room"))
        .await
        .expect("admitted");
    for _ in 0..5 {
        engine.tick_once().await.expect("tick");
    }
    engine
        .assign_task(AdmissionRequest::new("Upgrade Antennas", "Roof"))
        .await
        .expect("prerequisite met");
    let before = engine.query_state().await;
    drop(engine);

    let store = open_store(&path, Duration::from_millis(500)).expect("reopen store");
    let reopened = Engine::open(config, store)
        .await
        .expect("reopen");
    let after = reopened.query_state().await;

    assert_eq!(after, before);
    assert_eq!(after.tick, 5);
    assert_eq!(after.resources.get("energy"), Some(&85));
    assert_eq!(after.resources.get("materials"), Some(&50));
    assert_eq!(after.active_tasks.len(), 1);
    assert!(after.completed_tasks.contains("Repair Comms Hub"));

    drop(reopened);
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        let _ = std::fs::remove_file(std::path::PathBuf::from(name));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_admission_is_not_saved() {
    let store = Arc::new(MemoryWorldStore::new());
    let engine = Engine::open(EngineConfig::default(), store.clone())
        .await
        .expect("open");
    let saved = store.last_saved();

    let err = engine
        .assign_task(AdmissionRequest::new("Terraform", "Outside"))
        .await
        .expect_err("unknown task");
    assert_eq!(err.code(), ErrorCode::UnknownTask);

    let err = engine
        .assign_task(AdmissionRequest::new("Upgrade Antennas", "Roof"))
        .await
        .expect_err("prerequisite");
    assert_eq!(err.code(), ErrorCode::PrerequisiteUnmet);

    assert_eq!(store.last_saved(), saved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_save_rolls_back_admission() {
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::open(EngineConfig::default(), store.clone())
        .await
        .expect("open");
    let before = engine.query_state().await;

    store.set_failing(true);
    let err = engine
        .assign_task(AdmissionRequest::new("Repair Comms Hub", "Comms Room"))
        .await
        .expect_err("save fails");
    assert_eq!(err.code(), ErrorCode::PersistenceFailed);
    assert_eq!(engine.query_state().await, before);
    assert!(engine
        .last_persistence_error()
        .await
        .is_some_and(|message| message.contains("disk unplugged")));

    store.set_failing(false);
    let id = engine
        .assign_task(AdmissionRequest::new("Repair Comms Hub", "Comms Room"))
        .await
        .expect("admitted");
    assert_eq!(id, 1, "rolled back admission does not burn an id");
    assert_eq!(engine.last_persistence_error().await, None);
    assert_eq!(
        store.inner.last_saved().map(|saved| saved.resources),
        Some(engine.query_state().await.resources)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_tick_is_retried_without_double_credit() {
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::open(EngineConfig::default(), store.clone())
        .await
        .expect("open");
    engine
        .assign_task(AdmissionRequest::new("Organize Storage", "Cargo Bay").with_duration(1))
        .await
        .expect("admitted");
    assert_eq!(engine.query_state().await.resources.get("materials"), Some(&50));

    store.set_failing(true);
    engine.tick_once().await.expect_err("save fails");
    let state = engine.query_state().await;
    assert_eq!(state.tick, 0);
    assert_eq!(state.active_tasks.len(), 1);
    assert_eq!(state.resources.get("materials"), Some(&50));
    assert!(state.completed_tasks.is_empty());

    store.set_failing(false);
    let report = engine.tick_once().await.expect("retried");
    assert_eq!(report.tick, 1);
    assert_eq!(report.completed.len(), 1);
    let state = engine.query_state().await;
    assert_eq!(state.resources.get("materials"), Some(&65));
    assert!(state.active_tasks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_save_is_overwritten_with_the_rolled_back_world() {
    let store = Arc::new(StallingStore::new());
    let config = EngineConfig {
        persistence_timeout_ms: 50,
        ..EngineConfig::default()
    };
    let engine = Engine::open(config.clone(), store.clone()).await.expect("open");
    let before = engine.query_state().await;

    store.set_stall(Some(Duration::from_millis(300)));
    let err = engine
        .assign_task(AdmissionRequest::new("Send Signal", "Array"))
        .await
        .expect_err("times out");
    assert_eq!(err.code(), ErrorCode::PersistenceTimeout);
    assert_eq!(engine.query_state().await, before);

    // Returns once the abandoned save has landed.
    store.set_stall(None);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while store.inner.last_saved().map(|saved| saved.active_tasks.len()) != Some(0)
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let saved = store.inner.last_saved().expect("saved");
    assert!(saved.active_tasks.is_empty());
    assert_eq!(saved.resources, before.resources);
    assert_eq!(saved.resources.get("energy"), Some(&75));

    engine.settle().await.expect("settled");
    drop(engine);
    let reopened = Engine::open(config, store.clone()).await.expect("reopen");
    assert_eq!(reopened.query_state().await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_behind_a_stalled_save_waits_for_reconcile() {
    let store = Arc::new(StallingStore::new());
    let config = EngineConfig {
        persistence_timeout_ms: 50,
        ..EngineConfig::default()
    };
    let engine = Engine::open(config, store.clone()).await.expect("open");
    let before = engine.query_state().await;

    store.set_stall(Some(Duration::from_millis(300)));
    engine
        .assign_task(AdmissionRequest::new("Send Signal", "Array"))
        .await
        .expect_err("times out");

    // The stalled save and its reconcile are still queued, so this one gives
    // up without writing anything.
    let err = engine
        .assign_task(AdmissionRequest::new("Genetic Experiment", "Lab"))
        .await
        .expect_err("still reconciling");
    assert_eq!(err.code(), ErrorCode::PersistenceTimeout);
    assert_eq!(engine.query_state().await, before);

    store.set_stall(None);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match engine.settle().await {
            Ok(()) => break,
            Err(err) if tokio::time::Instant::now() < deadline => {
                assert_eq!(err.code(), ErrorCode::PersistenceTimeout);
            }
            Err(err) => panic!("store never settled: {err}"),
        }
    }

    engine
        .assign_task(AdmissionRequest::new("Genetic Experiment", "Lab"))
        .await
        .expect("admitted");
    let state = engine.query_state().await;
    let saved = store.inner.last_saved().expect("saved");
    assert_eq!(saved.active_tasks, state.active_tasks);
    assert_eq!(saved.resources, state.resources);
    assert_eq!(saved.active_tasks.len(), 1);
    assert_eq!(saved.active_tasks[0].task_name, "Genetic Experiment");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_ticks_until_stopped() {
    let engine = Engine::open(fast_config(), Arc::new(MemoryWorldStore::new()))
        .await
        .expect("open");
    engine
        .assign_task(AdmissionRequest::new("Organize Storage", "Cargo Bay"))
        .await
        .expect("admitted");

    assert!(engine.start_scheduler().await);
    assert!(!engine.start_scheduler().await, "already running");
    assert_eq!(engine.scheduler_state().await, SchedulerState::Running);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(engine.stop_scheduler().await);
    assert!(!engine.stop_scheduler().await, "already stopped");

    let stopped = engine.query_state().await;
    assert_eq!(stopped.scheduler, SchedulerState::Stopped);
    assert!(stopped.tick >= 3, "tick={}", stopped.tick);
    assert!(stopped.completed_tasks.contains("Organize Storage"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.query_state().await.tick, stopped.tick);

    assert!(engine.start_scheduler().await, "restartable");
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop_scheduler().await;
    assert!(engine.query_state().await.tick > stopped.tick);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_a_tick_waits_for_the_lock_skips_that_tick() {
    let engine = Engine::open(fast_config(), Arc::new(MemoryWorldStore::new()))
        .await
        .expect("open");

    let held = engine.core.lock().await;
    assert!(engine.start_scheduler().await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let tick = held.world().current_tick();

    let stopper = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.stop_scheduler().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(held);

    assert!(stopper.await.expect("stop task"));
    assert_eq!(engine.query_state().await.tick, tick);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_survives_failing_saves() {
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::open(fast_config(), store.clone()).await.expect("open");

    store.set_failing(true);
    engine.start_scheduler().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.scheduler_state().await, SchedulerState::Running);
    assert_eq!(engine.query_state().await.tick, 0);
    assert!(engine.last_persistence_error().await.is_some());

    store.set_failing(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.stop_scheduler().await;
    assert!(engine.query_state().await.tick > 0);
    assert_eq!(engine.last_persistence_error().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_and_ticks_conserve_resources() {
    let config = EngineConfig {
        tick_interval_secs: 0.005,
        ..EngineConfig::default()
    };
    let engine = Engine::open(config, Arc::new(MemoryWorldStore::new()))
        .await
        .expect("open");
    engine.start_scheduler().await;

    let mut handles = Vec::new();
    for worker in 0..12 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let placement = format!("Array {worker}");
            let admitted = engine
                .assign_task(AdmissionRequest::new("Send Signal", placement))
                .await
                .is_ok();
            let _ = engine.query_state().await;
            admitted
        }));
    }
    let mut admitted = 0_u64;
    for handle in handles {
        if handle.await.expect("join") {
            admitted += 1;
        }
    }
    engine.stop_scheduler().await;

    for _ in 0..4 {
        engine.tick_once().await.expect("drain queue");
    }
    let state = engine.query_state().await;
    assert_eq!(admitted, 7, "energy 75 funds exactly seven signals");
    assert!(state.active_tasks.is_empty());
    assert_eq!(state.resources.get("energy"), Some(&(75 - 10 * admitted)));
    assert_eq!(state.resources.get("data"), Some(&(40 + 10 * admitted)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_alerts_returns_messages_and_saves_the_empty_list() {
    let store = Arc::new(MemoryWorldStore::new());
    let config = EngineConfig {
        low_resource_threshold: 100,
        ..EngineConfig::default()
    };
    let engine = Engine::open(config, store.clone()).await.expect("open");

    let report = engine.tick_once().await.expect("tick");
    assert_eq!(report.raised_alerts.len(), 3);
    assert_eq!(store.last_saved().map(|saved| saved.alerts.len()), Some(3));

    let drained = engine.drain_alerts().await.expect("drain");
    assert_eq!(
        drained,
        vec![
            "Low data levels!".to_string(),
            "Low energy levels!".to_string(),
            "Low materials levels!".to_string(),
        ]
    );
    assert!(engine.query_state().await.alerts.is_empty());
    assert_eq!(store.last_saved().map(|saved| saved.alerts.len()), Some(0));

    engine.tick_once().await.expect("tick");
    engine.clear_alerts().await.expect("clear");
    assert!(engine.query_state().await.alerts.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_rejects_bad_config_and_foreign_worlds() {
    let config = EngineConfig {
        failure_probability: 3.0,
        ..EngineConfig::default()
    };
    let err = Engine::open(config, Arc::new(MemoryWorldStore::new()))
        .await
        .expect_err("bad config");
    assert_eq!(err.code(), ErrorCode::InvalidConfig);

    let foreign = WorldSnapshot {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        tick: 3,
        next_instance_id: 2,
        resources: contracts::default_initial_resources(),
        active_tasks: vec![TaskInstance {
            instance_id: 1,
            task_name: "eval(resources)".to_string(),
            placement: "Lab".to_string(),
            ticks_remaining: 1,
            admitted_at_tick: 2,
        }],
        completed_tasks: Default::default(),
        alerts: Vec::new(),
    };
    let err = Engine::open(
        EngineConfig::default(),
        Arc::new(MemoryWorldStore::with_snapshot(foreign)),
    )
    .await
    .expect_err("unknown task");
    assert_eq!(err.code(), ErrorCode::InvalidSnapshot);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_catalog_replaces_built_in_tasks() {
    let config = EngineConfig {
        tasks: vec![
            TaskDefinition::new("Scavenge", 1).with_reward("materials", 5),
            TaskDefinition::new("Fabricate", 2)
                .with_cost("materials", 65)
                .with_prerequisite("Scavenge"),
        ],
        ..EngineConfig::default()
    };
    let engine = Engine::open(config, Arc::new(MemoryWorldStore::new()))
        .await
        .expect("open");

    let names = |tasks: Vec<TaskDefinition>| {
        tasks
            .into_iter()
            .map(|definition| definition.name)
            .collect::<Vec<_>>()
    };
    assert_eq!(names(engine.catalog().await), vec!["Scavenge", "Fabricate"]);
    assert_eq!(names(engine.available_tasks().await), vec!["Scavenge"]);

    engine
        .assign_task(AdmissionRequest::new("Scavenge", "Wreck"))
        .await
        .expect("admitted");
    engine.tick_once().await.expect("tick");
    assert_eq!(
        names(engine.available_tasks().await),
        vec!["Scavenge", "Fabricate"]
    );

    let err = engine
        .assign_task(AdmissionRequest::new("Repair Comms Hub", "Comms Room"))
        .await
        .expect_err("not in this catalog");
    assert_eq!(err.code(), ErrorCode::UnknownTask);
}

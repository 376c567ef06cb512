use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{TaskInstance, WorldSnapshot};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    Io(std::io::Error),
    Corrupt(String),
    Timeout { after_ms: u64 },
    Poisoned,
    Join(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Corrupt(detail) => write!(f, "stored world is corrupt: {detail}"),
            Self::Timeout { after_ms } => write!(f, "persistence timed out after {after_ms}ms"),
            Self::Poisoned => write!(f, "store lock poisoned by an earlier panic"),
            Self::Join(detail) => write!(f, "persistence task failed: {detail}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Durable home of one world. Implementations serialize their own saves so
/// that a save still running after its caller gave up is always followed,
/// not overtaken, by the next one.
pub trait WorldStore: Send + Sync {
    /// `None` when nothing has been saved yet.
    fn load_world(&self) -> Result<Option<WorldSnapshot>, PersistenceError>;
    fn save_world(&self, snapshot: &WorldSnapshot) -> Result<(), PersistenceError>;
}

/// A store call running on the blocking pool.
pub(crate) type StoreJob<T> = JoinHandle<Result<T, PersistenceError>>;

pub(crate) fn spawn_store_job<T, F>(job: F) -> StoreJob<T>
where
    F: FnOnce() -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
}

/// Waits up to `limit` for `job`. `None` means it is still running; the job
/// is left untouched so the caller can keep waiting on it later.
pub(crate) async fn wait_bounded<T>(
    limit: Duration,
    job: &mut StoreJob<T>,
) -> Option<Result<T, PersistenceError>> {
    match tokio::time::timeout(limit, job).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(err)) => Some(Err(PersistenceError::Join(err.to_string()))),
        Err(_) => None,
    }
}

pub(crate) fn timed_out(limit: Duration) -> PersistenceError {
    PersistenceError::Timeout {
        after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Runs a store call on the blocking pool, giving up after `limit`. The call
/// itself keeps running if it overshoots; only the caller stops waiting.
pub(crate) async fn run_bounded<T, F>(limit: Duration, job: F) -> Result<T, PersistenceError>
where
    F: FnOnce() -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    let mut job = spawn_store_job(job);
    wait_bounded(limit, &mut job)
        .await
        .unwrap_or_else(|| Err(timed_out(limit)))
}

/// Picks a store from the path: `.json` gets the document store, anything
/// else is opened as SQLite.
pub fn open_store(
    path: impl AsRef<Path>,
    busy_timeout: Duration,
) -> Result<Arc<dyn WorldStore>, PersistenceError> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(Arc::new(JsonFileWorldStore::new(path)))
    } else {
        Ok(Arc::new(SqliteWorldStore::open(path, busy_timeout)?))
    }
}

#[derive(Debug)]
pub struct SqliteWorldStore {
    conn: Mutex<Connection>,
}

impl SqliteWorldStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, PersistenceError> {
        let mut conn = Connection::open(path)?;
        configure(&conn, busy_timeout)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }
}

impl WorldStore for SqliteWorldStore {
    fn load_world(&self) -> Result<Option<WorldSnapshot>, PersistenceError> {
        let conn = self.lock()?;

        let Some(tick) = read_meta(&conn, "tick")? else {
            return Ok(None);
        };
        let tick = parse_u64("tick", &tick)?;
        let next_instance_id = match read_meta(&conn, "next_instance_id")? {
            Some(raw) => parse_u64("next_instance_id", &raw)?,
            None => return Err(PersistenceError::Corrupt("next_instance_id missing".to_string())),
        };
        let schema_version = read_meta(&conn, "schema_version")?
            .ok_or_else(|| PersistenceError::Corrupt("schema_version missing".to_string()))?;

        let mut stmt = conn.prepare("SELECT name, amount FROM resources ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut resources = BTreeMap::new();
        for row in rows {
            let (name, amount) = row?;
            let amount = non_negative(&format!("resources.{name}"), amount)?;
            resources.insert(name, amount);
        }

        let mut stmt = conn.prepare(
            "SELECT instance_id, task_name, placement, ticks_remaining, admitted_at_tick
             FROM active_tasks
             ORDER BY instance_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut active_tasks = Vec::new();
        for row in rows {
            let (instance_id, task_name, placement, ticks_remaining, admitted_at_tick) = row?;
            active_tasks.push(TaskInstance {
                instance_id: non_negative("active_tasks.instance_id", instance_id)?,
                task_name,
                placement,
                ticks_remaining: non_negative("active_tasks.ticks_remaining", ticks_remaining)?,
                admitted_at_tick: non_negative("active_tasks.admitted_at_tick", admitted_at_tick)?,
            });
        }

        let mut stmt = conn.prepare("SELECT task_name FROM completed_tasks ORDER BY task_name ASC")?;
        let completed_tasks = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT message FROM alerts ORDER BY position ASC")?;
        let alerts = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(WorldSnapshot {
            schema_version,
            tick,
            next_instance_id,
            resources,
            active_tasks,
            completed_tasks,
            alerts,
        }))
    }

    /// Replaces the stored world in one transaction.
    fn save_world(&self, snapshot: &WorldSnapshot) -> Result<(), PersistenceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute_batch(
            "DELETE FROM resources;
             DELETE FROM active_tasks;
             DELETE FROM completed_tasks;
             DELETE FROM alerts;",
        )?;

        for (key, value) in [
            ("schema_version", snapshot.schema_version.clone()),
            ("tick", snapshot.tick.to_string()),
            ("next_instance_id", snapshot.next_instance_id.to_string()),
        ] {
            tx.execute(
                "INSERT INTO world_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }

        for (name, amount) in &snapshot.resources {
            tx.execute(
                "INSERT INTO resources (name, amount) VALUES (?1, ?2)",
                params![name, to_sql_int(&format!("resources.{name}"), *amount)?],
            )?;
        }

        for instance in &snapshot.active_tasks {
            tx.execute(
                "INSERT INTO active_tasks (
                    instance_id,
                    task_name,
                    placement,
                    ticks_remaining,
                    admitted_at_tick
                 ) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    to_sql_int("active_tasks.instance_id", instance.instance_id)?,
                    instance.task_name.as_str(),
                    instance.placement.as_str(),
                    to_sql_int("active_tasks.ticks_remaining", instance.ticks_remaining)?,
                    to_sql_int("active_tasks.admitted_at_tick", instance.admitted_at_tick)?,
                ],
            )?;
        }

        for task_name in &snapshot.completed_tasks {
            tx.execute(
                "INSERT INTO completed_tasks (task_name) VALUES (?1)",
                params![task_name],
            )?;
        }

        for (position, message) in snapshot.alerts.iter().enumerate() {
            tx.execute(
                "INSERT INTO alerts (position, message) VALUES (?1, ?2)",
                params![i64::try_from(position).unwrap_or(i64::MAX), message],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn configure(conn: &Connection, busy_timeout: Duration) -> Result<(), PersistenceError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS world_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS resources (
            name TEXT PRIMARY KEY,
            amount INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS active_tasks (
            instance_id INTEGER PRIMARY KEY,
            task_name TEXT NOT NULL,
            placement TEXT NOT NULL,
            ticks_remaining INTEGER NOT NULL,
            admitted_at_tick INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS completed_tasks (
            task_name TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS alerts (
            position INTEGER PRIMARY KEY,
            message TEXT NOT NULL UNIQUE
        );
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
         VALUES(1, 'colony_world_v1', 'tick-000000')",
        [],
    )?;

    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, PersistenceError> {
    Ok(conn
        .query_row(
            "SELECT value FROM world_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn parse_u64(field: &str, raw: &str) -> Result<u64, PersistenceError> {
    raw.parse::<u64>()
        .map_err(|_| PersistenceError::Corrupt(format!("{field}={raw:?} is not an unsigned integer")))
}

fn non_negative(field: &str, value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::Corrupt(format!("{field}={value} is negative")))
}

fn to_sql_int(field: &str, value: u64) -> Result<i64, PersistenceError> {
    i64::try_from(value)
        .map_err(|_| PersistenceError::Corrupt(format!("{field}={value} exceeds the sqlite integer range")))
}

/// One JSON document holding the whole world, replaced atomically by
/// writing a sibling temp file and renaming it over the target.
#[derive(Debug)]
pub struct JsonFileWorldStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileWorldStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl WorldStore for JsonFileWorldStore {
    fn load_world(&self) -> Result<Option<WorldSnapshot>, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save_world(&self, snapshot: &WorldSnapshot) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().map_err(|_| PersistenceError::Poisoned)?;
        let payload = serde_json::to_vec_pretty(snapshot)?;
        let temp_path = self.temp_path();

        let mut file = File::create(&temp_path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryWorldStore {
    saved: Mutex<Option<WorldSnapshot>>,
}

impl MemoryWorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: WorldSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
        }
    }

    pub fn last_saved(&self) -> Option<WorldSnapshot> {
        self.saved.lock().ok().and_then(|saved| saved.clone())
    }
}

impl WorldStore for MemoryWorldStore {
    fn load_world(&self) -> Result<Option<WorldSnapshot>, PersistenceError> {
        let saved = self.saved.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(saved.clone())
    }

    fn save_world(&self, snapshot: &WorldSnapshot) -> Result<(), PersistenceError> {
        let mut saved = self.saved.lock().map_err(|_| PersistenceError::Poisoned)?;
        *saved = Some(snapshot.clone());
        Ok(())
    }
}

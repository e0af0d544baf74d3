use bim_core::{
    BriefcaseId, CodeSpecId, CodeState, DgnCode, DgnCodeInfo, DgnLock, LockLevel, LockableId,
    LockableType,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const LOCAL_SCHEMA_VERSION: i64 = 1;

/// Stamped into every local file; a mismatch forces the file to be rebuilt.
pub const LOCAL_PROFILE_VERSION: &str = "1.0";

const PROP_PROFILE_VERSION: &str = "profile_version";
const PROP_DB_CREATION_DATE: &str = "db_creation_date";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Which half of the cache a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Owned,
    Unavailable,
}

impl Holder {
    fn lock_table(&self) -> &'static str {
        match self {
            Holder::Owned => "locks",
            Holder::Unavailable => "unavailable_locks",
        }
    }

    fn code_table(&self) -> &'static str {
        match self {
            Holder::Owned => "codes",
            Holder::Unavailable => "unavailable_codes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStamp {
    pub profile_version: String,
    pub db_creation_date: DateTime<Utc>,
}

impl LocalStamp {
    pub fn current(db_creation_date: DateTime<Utc>) -> Self {
        Self {
            profile_version: LOCAL_PROFILE_VERSION.to_string(),
            db_creation_date,
        }
    }
}

/// Durable lock/code tables for one briefcase. Changes accumulate in an open
/// transaction and only become durable on [`LocalResourceStore::save`].
pub struct LocalResourceStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl LocalResourceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let store = Self {
            conn,
            path: Some(path),
        };
        store.migrate()?;
        store.conn.execute_batch("BEGIN")?;
        Ok(store)
    }

    /// Opens an existing file for inspection. Nothing is migrated and every
    /// write fails.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let store = Self {
            conn,
            path: Some(path),
        };
        let found = store.schema_version()?;
        if found != LOCAL_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found,
                supported: LOCAL_SCHEMA_VERSION,
            });
        }
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.migrate()?;
        store.conn.execute_batch("BEGIN")?;
        Ok(store)
    }

    /// Deletes whatever is at `path` and opens a fresh, empty store there.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        remove_local_file(path.as_ref())?;
        Self::open(path)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > LOCAL_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: LOCAL_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_resource_tables.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn save(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT; BEGIN")?;
        Ok(())
    }

    pub fn discard_changes(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("ROLLBACK; BEGIN")?;
        Ok(())
    }

    pub fn write_stamp(&self, stamp: &LocalStamp) -> Result<(), StorageError> {
        self.set_property(PROP_PROFILE_VERSION, &stamp.profile_version)?;
        self.set_property(
            PROP_DB_CREATION_DATE,
            &stamp.db_creation_date.to_rfc3339(),
        )?;
        Ok(())
    }

    pub fn read_stamp(&self) -> Result<Option<LocalStamp>, StorageError> {
        let Some(profile_version) = self.property(PROP_PROFILE_VERSION)? else {
            return Ok(None);
        };
        let Some(created) = self.property(PROP_DB_CREATION_DATE)? else {
            return Ok(None);
        };

        Ok(Some(LocalStamp {
            profile_version,
            db_creation_date: parse_timestamp(created)?,
        }))
    }

    fn set_property(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO local_properties (name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value=excluded.value
            ",
            params![name, value],
        )?;
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM local_properties WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Upserts keeping the higher of the stored and incoming level.
    pub fn insert_lock(&self, holder: Holder, lock: &DgnLock) -> Result<(), StorageError> {
        if lock.level == LockLevel::None {
            return Ok(());
        }
        let sql = format!(
            "
            INSERT INTO {table} (type, id, level) VALUES (?1, ?2, ?3)
            ON CONFLICT(type, id) DO UPDATE SET level=MAX(level, excluded.level)
            ",
            table = holder.lock_table()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params![
            lockable_type_as_i64(lock.id.kind()),
            lock.id.id() as i64,
            lock_level_as_i64(lock.level),
        ])?;
        Ok(())
    }

    pub fn insert_locks<'a>(
        &self,
        holder: Holder,
        locks: impl IntoIterator<Item = &'a DgnLock>,
    ) -> Result<usize, StorageError> {
        let mut count = 0usize;
        for lock in locks {
            self.insert_lock(holder, lock)?;
            count += 1;
        }
        Ok(count)
    }

    /// Overwrites the stored level; `None` deletes the row.
    pub fn set_lock_level(&self, holder: Holder, lock: &DgnLock) -> Result<(), StorageError> {
        if lock.level == LockLevel::None {
            self.remove_lock(holder, &lock.id)?;
            return Ok(());
        }
        let sql = format!(
            "
            INSERT INTO {table} (type, id, level) VALUES (?1, ?2, ?3)
            ON CONFLICT(type, id) DO UPDATE SET level=excluded.level
            ",
            table = holder.lock_table()
        );
        self.conn.execute(
            &sql,
            params![
                lockable_type_as_i64(lock.id.kind()),
                lock.id.id() as i64,
                lock_level_as_i64(lock.level),
            ],
        )?;
        Ok(())
    }

    pub fn remove_lock(&self, holder: Holder, id: &LockableId) -> Result<bool, StorageError> {
        let sql = format!(
            "DELETE FROM {table} WHERE type = ?1 AND id = ?2",
            table = holder.lock_table()
        );
        let changes = self.conn.execute(
            &sql,
            params![lockable_type_as_i64(id.kind()), id.id() as i64],
        )?;
        Ok(changes > 0)
    }

    pub fn lock_level(
        &self,
        holder: Holder,
        id: &LockableId,
    ) -> Result<Option<LockLevel>, StorageError> {
        let sql = format!(
            "SELECT level FROM {table} WHERE type = ?1 AND id = ?2",
            table = holder.lock_table()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let level = stmt
            .query_row(
                params![lockable_type_as_i64(id.kind()), id.id() as i64],
                |row| parse_lock_level(row.get(0)?, 0),
            )
            .optional()?;
        Ok(level)
    }

    pub fn locks(&self, holder: Holder) -> Result<Vec<DgnLock>, StorageError> {
        let sql = format!(
            "SELECT type, id, level FROM {table} ORDER BY type ASC, id ASC",
            table = holder.lock_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let kind = parse_lockable_type(row.get(0)?, 0)?;
            let id = row.get::<_, i64>(1)? as u64;
            let level = parse_lock_level(row.get(2)?, 2)?;
            Ok(DgnLock::new(LockableId::new(kind, id), level))
        })?;

        let mut locks = Vec::new();
        for row in rows {
            locks.push(row?);
        }
        Ok(locks)
    }

    /// Ids of every lockable of `kind` held exclusively.
    pub fn exclusive_ids(
        &self,
        holder: Holder,
        kind: LockableType,
    ) -> Result<Vec<u64>, StorageError> {
        let sql = format!(
            "SELECT id FROM {table} WHERE type = ?1 AND level = ?2 ORDER BY id ASC",
            table = holder.lock_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                lockable_type_as_i64(kind),
                lock_level_as_i64(LockLevel::Exclusive)
            ],
            |row| row.get::<_, i64>(0),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row? as u64);
        }
        Ok(ids)
    }

    pub fn insert_code(&self, code: &DgnCode) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO codes (code_spec, scope, value) VALUES (?1, ?2, ?3)",
        )?;
        stmt.execute(params![code.spec.0 as i64, code.scope, code.value])?;
        Ok(())
    }

    pub fn insert_unavailable_code(&self, info: &DgnCodeInfo) -> Result<(), StorageError> {
        let briefcase = match info.state {
            CodeState::Reserved(owner) => Some(i64::from(owner.0)),
            _ => None,
        };
        self.conn.execute(
            "
            INSERT INTO unavailable_codes (code_spec, scope, value, state, briefcase)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(code_spec, scope, value) DO UPDATE SET
                state=excluded.state,
                briefcase=excluded.briefcase
            ",
            params![
                info.code.spec.0 as i64,
                info.code.scope,
                info.code.value,
                info.state.as_str(),
                briefcase,
            ],
        )?;
        Ok(())
    }

    pub fn remove_code(&self, holder: Holder, code: &DgnCode) -> Result<bool, StorageError> {
        let sql = format!(
            "DELETE FROM {table} WHERE code_spec = ?1 AND scope = ?2 AND value = ?3",
            table = holder.code_table()
        );
        let changes = self.conn.execute(
            &sql,
            params![code.spec.0 as i64, code.scope, code.value],
        )?;
        Ok(changes > 0)
    }

    pub fn contains_code(&self, code: &DgnCode) -> Result<bool, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "
            SELECT 1 FROM codes
            WHERE code_spec = ?1 AND scope = ?2 AND value = ?3
            LIMIT 1
            ",
        )?;
        let found = stmt
            .query_row(params![code.spec.0 as i64, code.scope, code.value], |_| {
                Ok(())
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn unavailable_code_state(
        &self,
        code: &DgnCode,
    ) -> Result<Option<CodeState>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "
            SELECT state, briefcase FROM unavailable_codes
            WHERE code_spec = ?1 AND scope = ?2 AND value = ?3
            ",
        )?;
        let state = stmt
            .query_row(params![code.spec.0 as i64, code.scope, code.value], |row| {
                parse_code_state(row.get(0)?, row.get(1)?)
            })
            .optional()?;
        Ok(state)
    }

    pub fn codes(&self) -> Result<Vec<DgnCode>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT code_spec, scope, value FROM codes
            ORDER BY code_spec ASC, scope ASC, value ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DgnCode::new(
                CodeSpecId(row.get::<_, i64>(0)? as u64),
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut codes = Vec::new();
        for row in rows {
            codes.push(row?);
        }
        Ok(codes)
    }

    pub fn unavailable_codes(&self) -> Result<Vec<DgnCodeInfo>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT code_spec, scope, value, state, briefcase FROM unavailable_codes
            ORDER BY code_spec ASC, scope ASC, value ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            let code = DgnCode::new(
                CodeSpecId(row.get::<_, i64>(0)? as u64),
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            );
            let state = parse_code_state(row.get(3)?, row.get(4)?)?;
            Ok(DgnCodeInfo::new(code, state))
        })?;

        let mut codes = Vec::new();
        for row in rows {
            codes.push(row?);
        }
        Ok(codes)
    }

    pub fn clear_locks(&self, holder: Holder) -> Result<(), StorageError> {
        self.conn
            .execute(&format!("DELETE FROM {}", holder.lock_table()), [])?;
        Ok(())
    }

    pub fn clear_codes(&self, holder: Holder) -> Result<(), StorageError> {
        self.conn
            .execute(&format!("DELETE FROM {}", holder.code_table()), [])?;
        Ok(())
    }

    pub fn clear(&self, holder: Holder) -> Result<(), StorageError> {
        self.clear_locks(holder)?;
        self.clear_codes(holder)?;
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.clear(Holder::Owned)?;
        self.clear(Holder::Unavailable)?;
        debug!("cleared local resource tables");
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

/// `<dbfile>.local`
pub fn local_db_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".local");
    PathBuf::from(name)
}

/// Removes a local file and its sqlite journal; a missing file is not an error.
pub fn remove_local_file(path: &Path) -> Result<(), StorageError> {
    let mut journal = path.as_os_str().to_os_string();
    journal.push("-journal");
    for candidate in [path.to_path_buf(), PathBuf::from(journal)] {
        match std::fs::remove_file(&candidate) {
            Ok(()) => debug!(path = %candidate.display(), "removed local file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn lockable_type_as_i64(kind: LockableType) -> i64 {
    match kind {
        LockableType::Db => 0,
        LockableType::Model => 1,
        LockableType::Element => 2,
        LockableType::Schemas => 3,
    }
}

fn parse_lockable_type(value: i64, column: usize) -> rusqlite::Result<LockableType> {
    match value {
        0 => Ok(LockableType::Db),
        1 => Ok(LockableType::Model),
        2 => Ok(LockableType::Element),
        3 => Ok(LockableType::Schemas),
        other => Err(rusqlite::Error::IntegralValueOutOfRange(column, other)),
    }
}

fn lock_level_as_i64(level: LockLevel) -> i64 {
    match level {
        LockLevel::None => 0,
        LockLevel::Shared => 1,
        LockLevel::Exclusive => 2,
    }
}

fn parse_lock_level(value: i64, column: usize) -> rusqlite::Result<LockLevel> {
    match value {
        0 => Ok(LockLevel::None),
        1 => Ok(LockLevel::Shared),
        2 => Ok(LockLevel::Exclusive),
        other => Err(rusqlite::Error::IntegralValueOutOfRange(column, other)),
    }
}

fn parse_code_state(state: String, briefcase: Option<i64>) -> rusqlite::Result<CodeState> {
    match state.as_str() {
        "available" => Ok(CodeState::Available),
        "reserved" => Ok(CodeState::Reserved(BriefcaseId(
            briefcase.unwrap_or_default() as u32,
        ))),
        "used" => Ok(CodeState::Used),
        "discarded" => Ok(CodeState::Discarded),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown code state: {other}").into(),
        )),
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bim_core::{ElementId, ModelId};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn migration_creates_resource_tables() {
        let store = LocalResourceStore::open_in_memory().expect("open store");

        assert_eq!(store.schema_version().expect("version"), LOCAL_SCHEMA_VERSION);
        for table in ["locks", "unavailable_locks", "codes", "unavailable_codes"] {
            assert!(store.table_exists(table).expect("table lookup"), "{table}");
        }
    }

    #[test]
    fn insert_lock_never_lowers_stored_level() {
        let store = LocalResourceStore::open_in_memory().expect("open store");
        let id = LockableId::model(ModelId(12));

        store
            .insert_lock(Holder::Owned, &DgnLock::new(id, LockLevel::Exclusive))
            .expect("insert exclusive");
        store
            .insert_lock(Holder::Owned, &DgnLock::new(id, LockLevel::Shared))
            .expect("insert shared");

        assert_eq!(
            store.lock_level(Holder::Owned, &id).expect("level"),
            Some(LockLevel::Exclusive)
        );
        assert_eq!(store.locks(Holder::Owned).expect("locks").len(), 1);
        assert_eq!(
            store.lock_level(Holder::Unavailable, &id).expect("level"),
            None
        );
    }

    #[test]
    fn set_lock_level_overwrites_and_none_removes() {
        let store = LocalResourceStore::open_in_memory().expect("open store");
        let id = LockableId::element(ElementId(40));

        store
            .insert_lock(Holder::Owned, &DgnLock::new(id, LockLevel::Exclusive))
            .expect("insert");
        store
            .set_lock_level(Holder::Owned, &DgnLock::new(id, LockLevel::Shared))
            .expect("demote");
        assert_eq!(
            store.lock_level(Holder::Owned, &id).expect("level"),
            Some(LockLevel::Shared)
        );

        store
            .set_lock_level(Holder::Owned, &DgnLock::new(id, LockLevel::None))
            .expect("release");
        assert_eq!(store.lock_level(Holder::Owned, &id).expect("level"), None);
    }

    #[test]
    fn exclusive_ids_filters_by_type_and_level() {
        let store = LocalResourceStore::open_in_memory().expect("open store");
        store
            .insert_locks(
                Holder::Owned,
                &[
                    DgnLock::new(LockableId::model(ModelId(1)), LockLevel::Exclusive),
                    DgnLock::new(LockableId::model(ModelId(2)), LockLevel::Shared),
                    DgnLock::new(LockableId::element(ElementId(3)), LockLevel::Exclusive),
                ],
            )
            .expect("insert");

        assert_eq!(
            store
                .exclusive_ids(Holder::Owned, LockableType::Model)
                .expect("ids"),
            vec![1]
        );
    }

    #[test]
    fn codes_roundtrip_with_unavailable_state() {
        let store = LocalResourceStore::open_in_memory().expect("open store");
        let mine = DgnCode::new(CodeSpecId(5), "site", "pump-1");
        let theirs = DgnCode::new(CodeSpecId(5), "site", "pump-2");

        store.insert_code(&mine).expect("insert owned");
        store.insert_code(&mine).expect("insert owned twice");
        store
            .insert_unavailable_code(&DgnCodeInfo::new(
                theirs.clone(),
                CodeState::Reserved(BriefcaseId(9)),
            ))
            .expect("insert unavailable");

        assert!(store.contains_code(&mine).expect("contains"));
        assert!(!store.contains_code(&theirs).expect("contains"));
        assert_eq!(store.codes().expect("codes"), vec![mine.clone()]);
        assert_eq!(
            store.unavailable_code_state(&theirs).expect("state"),
            Some(CodeState::Reserved(BriefcaseId(9)))
        );

        store.clear(Holder::Owned).expect("clear owned");
        assert!(store.codes().expect("codes").is_empty());
        assert_eq!(store.unavailable_codes().expect("unavailable").len(), 1);
    }

    #[test]
    fn only_saved_changes_survive_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let path = local_db_path(&dir.path().join("plant.bim"));
        let saved = DgnLock::new(LockableId::model(ModelId(7)), LockLevel::Shared);
        let unsaved = DgnLock::new(LockableId::model(ModelId(8)), LockLevel::Shared);

        {
            let store = LocalResourceStore::create(&path).expect("create");
            store
                .write_stamp(&LocalStamp::current(created()))
                .expect("stamp");
            store.insert_lock(Holder::Owned, &saved).expect("insert");
            store.save().expect("save");
            store.insert_lock(Holder::Owned, &unsaved).expect("insert");
        }

        let store = LocalResourceStore::open(&path).expect("reopen");
        assert_eq!(store.locks(Holder::Owned).expect("locks"), vec![saved]);
        assert_eq!(
            store.read_stamp().expect("stamp"),
            Some(LocalStamp::current(created()))
        );
    }

    #[test]
    fn create_discards_previous_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("plant.bim.local");

        {
            let store = LocalResourceStore::open(&path).expect("open");
            store
                .insert_code(&DgnCode::new(CodeSpecId(1), "", "x"))
                .expect("insert");
            store.save().expect("save");
        }

        let store = LocalResourceStore::create(&path).expect("create");
        assert!(store.codes().expect("codes").is_empty());
        assert_eq!(store.read_stamp().expect("stamp"), None);
    }

    #[test]
    fn read_only_open_leaves_file_untouched() {
        let dir = TempDir::new().expect("temp dir");
        let path = local_db_path(&dir.path().join("plant.bim"));
        let held = DgnLock::new(LockableId::model(ModelId(7)), LockLevel::Exclusive);
        {
            let store = LocalResourceStore::create(&path).expect("create");
            store.insert_lock(Holder::Owned, &held).expect("insert");
            store.save().expect("save");
        }
        let before = std::fs::read(&path).expect("read file");

        {
            let store = LocalResourceStore::open_read_only(&path).expect("open read-only");
            assert_eq!(store.locks(Holder::Owned).expect("locks"), vec![held]);
            let other = DgnLock::new(LockableId::model(ModelId(8)), LockLevel::Shared);
            assert!(store.insert_lock(Holder::Owned, &other).is_err());
        }

        assert_eq!(std::fs::read(&path).expect("read file"), before);
    }

    #[test]
    fn read_only_open_refuses_unmigrated_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("plain.sqlite");
        Connection::open(&path)
            .and_then(|conn| conn.execute_batch("CREATE TABLE other (x INTEGER)"))
            .expect("plain sqlite file");

        let err = LocalResourceStore::open_read_only(&path)
            .err()
            .expect("unmigrated file");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 0, .. }
        ));
    }

    #[test]
    fn local_path_appends_suffix() {
        assert_eq!(
            local_db_path(Path::new("/data/plant.bim")),
            PathBuf::from("/data/plant.bim.local")
        );
    }
}

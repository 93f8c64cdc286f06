//! Model registry: known model files and the single active one.
//!
//! Invariant: at most one `Model` row has `isactive = 1`. [`ModelRegistry::activate`]
//! clears every flag and sets one inside a single transaction, so a reader
//! never observes two active rows.

use std::path::{Path, PathBuf};

use rusqlite::{ErrorCode, OptionalExtension, Row, ffi, params};
use tracing::{debug, info, warn};

use crate::error::AppError;
use super::{Database, storage_err};

/// One row of the `Model` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub id: i64,
    /// Unique name, the file's basename (e.g. `"mistral-7b.Q4_K_M.gguf"`).
    pub name: String,
    pub path: PathBuf,
    pub is_active: bool,
}

impl ModelRecord {
    /// Name with its final extension stripped, for display.
    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            path: PathBuf::from(row.get::<_, String>(2)?),
            is_active: row.get::<_, i64>(3)? != 0,
        })
    }
}

/// `"m1.gguf"` → `"m1"`, `"a.b.gguf"` → `"a.b"`; names without a dot are unchanged.
pub fn display_name(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    db: Database,
}

impl ModelRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new, inactive model. Fails with [`AppError::DuplicateName`]
    /// when `name` is already registered.
    pub fn register(&self, name: &str, path: impl AsRef<Path>) -> Result<ModelRecord, AppError> {
        let path = path.as_ref();
        let conn = self.db.connect()?;
        let result = conn.execute(
            "INSERT INTO Model (name, path, isactive) VALUES (?1, ?2, 0)",
            params![name, path.to_string_lossy()],
        );

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                info!(%name, path = %path.display(), id, "model registered");
                Ok(ModelRecord {
                    id,
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    is_active: false,
                })
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                warn!(%name, "model name already registered");
                Err(AppError::DuplicateName(name.to_string()))
            }
            Err(e) => Err(storage_err(&format!("insert model {name}"), e)),
        }
    }

    /// Register a model file under its basename. The file itself is not
    /// opened; it is validated when the model is loaded.
    pub fn register_file(&self, path: impl AsRef<Path>) -> Result<ModelRecord, AppError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AppError::Storage(format!("cannot derive a model name from {}", path.display()))
            })?;
        self.register(&name, path)
    }

    /// All models in insertion order.
    pub fn list(&self) -> Result<Vec<ModelRecord>, AppError> {
        let conn = self.db.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, name, path, isactive FROM Model ORDER BY id")
            .map_err(|e| storage_err("prepare list models", e))?;

        let rows = stmt
            .query_map([], ModelRecord::from_row)
            .map_err(|e| storage_err("query list models", e))?;

        let mut models = Vec::new();
        for row in rows {
            models.push(row.map_err(|e| storage_err("map model row", e))?);
        }
        Ok(models)
    }

    pub fn get(&self, name: &str) -> Result<Option<ModelRecord>, AppError> {
        let conn = self.db.connect()?;
        conn.query_row(
            "SELECT id, name, path, isactive FROM Model WHERE name = ?1",
            params![name],
            ModelRecord::from_row,
        )
        .optional()
        .map_err(|e| storage_err(&format!("get model {name}"), e))
    }

    /// Delete the model named `name`. Returns `false` when nothing matched;
    /// a missing name is not an error.
    pub fn remove(&self, name: &str) -> Result<bool, AppError> {
        let conn = self.db.connect()?;
        let deleted = conn
            .execute("DELETE FROM Model WHERE name = ?1", params![name])
            .map_err(|e| storage_err(&format!("delete model {name}"), e))?;
        if deleted > 0 {
            info!(%name, "model removed");
        } else {
            debug!(%name, "remove: no such model");
        }
        Ok(deleted > 0)
    }

    /// Make `name` the only active model.
    ///
    /// Clearing and setting happen in one transaction. When `name` is not
    /// registered the clear still commits, leaving no active model, and the
    /// call returns `false`.
    pub fn activate(&self, name: &str) -> Result<bool, AppError> {
        let mut conn = self.db.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| storage_err("begin activate tx", e))?;

        tx.execute("UPDATE Model SET isactive = 0", [])
            .map_err(|e| storage_err("clear active flags", e))?;
        let updated = tx
            .execute("UPDATE Model SET isactive = 1 WHERE name = ?1", params![name])
            .map_err(|e| storage_err(&format!("set {name} active"), e))?;

        tx.commit()
            .map_err(|e| storage_err("commit activate tx", e))?;

        if updated > 0 {
            info!(%name, "model activated");
        } else {
            warn!(%name, "activate: no such model, no model is active now");
        }
        Ok(updated > 0)
    }

    pub fn is_any_active(&self) -> Result<bool, AppError> {
        let conn = self.db.connect()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM Model WHERE isactive = 1", [], |row| row.get(0))
            .map_err(|e| storage_err("count active models", e))?;
        Ok(count > 0)
    }

    pub fn active(&self) -> Result<Option<ModelRecord>, AppError> {
        let conn = self.db.connect()?;
        conn.query_row(
            "SELECT id, name, path, isactive FROM Model WHERE isactive = 1 ORDER BY id LIMIT 1",
            [],
            ModelRecord::from_row,
        )
        .optional()
        .map_err(|e| storage_err("get active model", e))
    }

    pub fn active_path(&self) -> Result<Option<PathBuf>, AppError> {
        Ok(self.active()?.map(|m| m.path))
    }

    pub fn active_name(&self) -> Result<Option<String>, AppError> {
        Ok(self.active()?.map(|m| m.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, ModelRegistry) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(&tmp.path().join("chat.db")).unwrap();
        (tmp, db.models())
    }

    fn active_count(reg: &ModelRegistry) -> usize {
        reg.list().unwrap().iter().filter(|m| m.is_active).count()
    }

    #[test]
    fn register_starts_inactive() {
        let (_tmp, reg) = registry();
        let m = reg.register("m1.gguf", "/models/m1.gguf").unwrap();
        assert!(!m.is_active);
        assert!(!reg.is_any_active().unwrap());
        assert_eq!(reg.active_path().unwrap(), None);
    }

    #[test]
    fn other_constraint_failures_are_storage_errors() {
        let (_tmp, reg) = registry();
        reg.db
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER no_partial_downloads BEFORE INSERT ON Model
                 WHEN NEW.name LIKE '%.part'
                 BEGIN SELECT RAISE(ABORT, 'partial download'); END;",
            )
            .unwrap();

        let err = reg.register("m1.gguf.part", "/models/m1.gguf.part").unwrap_err();
        assert!(matches!(err, AppError::Storage(ref m) if m.contains("partial download")));
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_name_rejected() {
        let (_tmp, reg) = registry();
        reg.register("m1.gguf", "/models/m1.gguf").unwrap();
        let err = reg.register("m1.gguf", "/elsewhere/m1.gguf").unwrap_err();
        assert!(matches!(err, AppError::DuplicateName(ref n) if n == "m1.gguf"));
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn register_file_uses_basename() {
        let (_tmp, reg) = registry();
        let m = reg.register_file("/models/llama/llama-2-7b.Q4_0.gguf").unwrap();
        assert_eq!(m.name, "llama-2-7b.Q4_0.gguf");
        assert_eq!(m.path, PathBuf::from("/models/llama/llama-2-7b.Q4_0.gguf"));
        assert_eq!(m.display_name(), "llama-2-7b.Q4_0");
    }

    #[test]
    fn register_file_without_basename_fails() {
        let (_tmp, reg) = registry();
        assert!(reg.register_file("/").is_err());
    }

    #[test]
    fn list_is_insertion_ordered() {
        let (_tmp, reg) = registry();
        for n in ["c.gguf", "a.gguf", "b.gguf"] {
            reg.register(n, format!("/m/{n}")).unwrap();
        }
        let names: Vec<_> = reg.list().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["c.gguf", "a.gguf", "b.gguf"]);
    }

    #[test]
    fn activating_b_deactivates_a() {
        let (_tmp, reg) = registry();
        reg.register("a.gguf", "/m/a.gguf").unwrap();
        reg.register("b.gguf", "/m/b.gguf").unwrap();

        assert!(reg.activate("a.gguf").unwrap());
        assert!(reg.activate("b.gguf").unwrap());

        let models = reg.list().unwrap();
        assert!(!models[0].is_active);
        assert!(models[1].is_active);
        assert_eq!(reg.active_name().unwrap().as_deref(), Some("b.gguf"));
    }

    #[test]
    fn at_most_one_active_over_any_sequence() {
        let (_tmp, reg) = registry();
        let names = ["a.gguf", "b.gguf", "c.gguf"];
        for n in names {
            reg.register(n, format!("/m/{n}")).unwrap();
        }
        let sequence = ["a.gguf", "c.gguf", "c.gguf", "b.gguf", "missing.gguf", "a.gguf"];
        for n in sequence {
            reg.activate(n).unwrap();
            assert!(active_count(&reg) <= 1, "more than one active after activating {n}");
        }
        reg.register("d.gguf", "/m/d.gguf").unwrap();
        assert_eq!(active_count(&reg), 1);
    }

    #[test]
    fn activating_unknown_leaves_none_active() {
        let (_tmp, reg) = registry();
        reg.register("a.gguf", "/m/a.gguf").unwrap();
        reg.activate("a.gguf").unwrap();

        assert!(!reg.activate("ghost.gguf").unwrap());
        assert!(!reg.is_any_active().unwrap());
    }

    #[test]
    fn removing_active_model_clears_active() {
        let (_tmp, reg) = registry();
        reg.register("a.gguf", "/m/a.gguf").unwrap();
        reg.activate("a.gguf").unwrap();

        assert!(reg.remove("a.gguf").unwrap());
        assert!(!reg.is_any_active().unwrap());
        assert_eq!(reg.active_path().unwrap(), None);
    }

    #[test]
    fn remove_missing_is_noop() {
        let (_tmp, reg) = registry();
        reg.register("a.gguf", "/m/a.gguf").unwrap();
        assert!(!reg.remove("zzz.gguf").unwrap());
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn get_by_name() {
        let (_tmp, reg) = registry();
        reg.register("a.gguf", "/m/a.gguf").unwrap();
        assert_eq!(reg.get("a.gguf").unwrap().unwrap().path, PathBuf::from("/m/a.gguf"));
        assert!(reg.get("b.gguf").unwrap().is_none());
    }

    #[test]
    fn display_name_strips_last_extension() {
        assert_eq!(display_name("m1.gguf"), "m1");
        assert_eq!(display_name("a.b.gguf"), "a.b");
        assert_eq!(display_name("plain"), "plain");
        assert_eq!(display_name(".hidden"), ".hidden");
    }
}

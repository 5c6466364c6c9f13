//! Storage bootstrap
//!
//! Runs once, first, with zero dependencies: before any module hook is
//! invoked, every database declared anywhere in the module tree is created
//! and its schema applied, and an immutable base handle per database is
//! published. This breaks the chicken-and-egg of "modules need a database
//! client, but the client needs to know what modules declare".
//!
//! The relational engine itself is an external collaborator behind
//! [`StorageEngine`]; the bootstrap only groups declarations and drives the
//! create calls.

use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::EngineError;

/// Errors produced by a storage collaborator. Any of these aborts the
/// whole bootstrap; no safe partial state exists without databases.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage engine error: {0}")]
    Engine(String),
}

/// One table declaration found in the module tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableDecl {
    pub name: String,
    /// Engine-opaque schema text (DDL or equivalent).
    pub schema: String,
}

impl TableDecl {
    pub fn new(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
        }
    }
}

/// All tables declared for one database name, merged across modules.
/// Ordered containers keep the grouping deterministic between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseGroup {
    pub database: String,
    pub tables: BTreeSet<TableDecl>,
}

/// Opaque shared handle to a created database.
///
/// Read-mostly and never mutated after creation, so clones may be read
/// concurrently without synchronization. The concrete type is the storage
/// collaborator's business; consumers downcast when they know it.
#[derive(Clone)]
pub struct BaseHandle {
    inner: Arc<dyn Any + Send + Sync>,
}

impl BaseHandle {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for BaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BaseHandle")
    }
}

/// External storage collaborator.
///
/// The engine calls each method exactly once per startup, before any
/// module object exists. `create_database` must be create-or-open and must
/// apply the given schema idempotently: re-running bootstrap over an
/// already-built directory may not duplicate or corrupt schema objects.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Statically scan the module tree for table declarations, grouped by
    /// database name. A pure metadata/text scan; no module code runs.
    async fn discover_declared_tables(
        &self,
        module_tree: &Path,
    ) -> Result<BTreeMap<String, BTreeSet<TableDecl>>, StorageError>;

    /// Create (or open) the named database and apply the schema eagerly.
    async fn create_database(
        &self,
        name: &str,
        tables: &BTreeSet<TableDecl>,
    ) -> Result<BaseHandle, StorageError>;
}

/// Output of the bootstrap: the deterministic grouping plus one shared
/// handle per database, keyed by database name. Immutable after creation.
pub struct StorageLayout {
    pub groups: Vec<DatabaseGroup>,
    handles: Arc<HashMap<String, BaseHandle>>,
}

impl std::fmt::Debug for StorageLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLayout")
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl StorageLayout {
    /// Empty layout for hosts that configure no storage collaborator.
    pub fn empty() -> Self {
        Self {
            groups: Vec::new(),
            handles: Arc::new(HashMap::new()),
        }
    }

    pub fn handle(&self, database: &str) -> Option<BaseHandle> {
        self.handles.get(database).cloned()
    }

    pub fn handles(&self) -> Arc<HashMap<String, BaseHandle>> {
        Arc::clone(&self.handles)
    }
}

/// Drives the pre-module storage step.
pub struct StorageBootstrap;

impl StorageBootstrap {
    /// Scan, group, create every database eagerly, publish base handles.
    ///
    /// `declared_databases` carries database names taken from module
    /// descriptors, so a database declared by a module but holding no
    /// scanned tables is still created (empty) and gets a handle.
    pub async fn run<'a>(
        engine: &dyn StorageEngine,
        module_tree: &Path,
        declared_databases: impl IntoIterator<Item = &'a str>,
    ) -> Result<StorageLayout, EngineError> {
        info!(tree = %module_tree.display(), "running storage bootstrap");

        let mut grouped = engine
            .discover_declared_tables(module_tree)
            .await
            .map_err(|e| EngineError::storage_bootstrap(format!("table scan failed: {e}")))?;

        for database in declared_databases {
            grouped.entry(database.to_string()).or_default();
        }

        let mut groups = Vec::with_capacity(grouped.len());
        let mut handles = HashMap::with_capacity(grouped.len());
        for (database, tables) in grouped {
            debug!(database, tables = tables.len(), "creating database");
            let handle = engine.create_database(&database, &tables).await.map_err(|e| {
                EngineError::storage_bootstrap(format!("create database '{database}' failed: {e}"))
            })?;
            handles.insert(database.clone(), handle);
            groups.push(DatabaseGroup { database, tables });
        }

        info!(databases = groups.len(), "storage bootstrap complete");
        Ok(StorageLayout {
            groups,
            handles: Arc::new(handles),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Directory-backed engine: each database is a subdirectory, each
    /// table a file holding its schema text. Create-or-open semantics.
    struct DirEngine {
        root: std::path::PathBuf,
        created: Mutex<Vec<String>>,
    }

    impl DirEngine {
        fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StorageEngine for DirEngine {
        async fn discover_declared_tables(
            &self,
            module_tree: &Path,
        ) -> Result<BTreeMap<String, BTreeSet<TableDecl>>, StorageError> {
            // One `tables.toml`-free fake: every `<module>/<db>.tables`
            // file contributes `name=schema` lines to database <db>.
            let mut grouped: BTreeMap<String, BTreeSet<TableDecl>> = BTreeMap::new();
            for entry in std::fs::read_dir(module_tree)? {
                let dir = entry?.path();
                if !dir.is_dir() {
                    continue;
                }
                for file in std::fs::read_dir(&dir)? {
                    let file = file?.path();
                    if file.extension().and_then(|e| e.to_str()) != Some("tables") {
                        continue;
                    }
                    let database = file.file_stem().unwrap().to_string_lossy().into_owned();
                    let set = grouped.entry(database).or_default();
                    for line in std::fs::read_to_string(&file)?.lines() {
                        if let Some((name, schema)) = line.split_once('=') {
                            set.insert(TableDecl::new(name.trim(), schema.trim()));
                        }
                    }
                }
            }
            Ok(grouped)
        }

        async fn create_database(
            &self,
            name: &str,
            tables: &BTreeSet<TableDecl>,
        ) -> Result<BaseHandle, StorageError> {
            self.created.lock().unwrap().push(name.to_string());
            let db_dir = self.root.join(name);
            std::fs::create_dir_all(&db_dir)?;
            for table in tables {
                // Overwrite-with-same-content keeps the apply idempotent.
                std::fs::write(db_dir.join(&table.name), &table.schema)?;
            }
            Ok(BaseHandle::new(db_dir))
        }
    }

    fn write_module_tree(tree: &Path) {
        let billing = tree.join("acme.billing");
        std::fs::create_dir_all(&billing).unwrap();
        std::fs::write(
            billing.join("billing.tables"),
            "invoices = create invoices\npayments = create payments\n",
        )
        .unwrap();

        let users = tree.join("acme.users");
        std::fs::create_dir_all(&users).unwrap();
        std::fs::write(users.join("users.tables"), "accounts = create accounts\n").unwrap();
        // A second module adds a table to the same database.
        std::fs::write(users.join("billing.tables"), "refunds = create refunds\n").unwrap();
    }

    #[tokio::test]
    async fn groups_tables_by_database_across_modules() {
        let tree = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_module_tree(tree.path());

        let engine = DirEngine::new(data.path());
        let layout = StorageBootstrap::run(&engine, tree.path(), []).await.unwrap();

        assert_eq!(layout.groups.len(), 2);
        let billing = layout
            .groups
            .iter()
            .find(|g| g.database == "billing")
            .unwrap();
        let names: Vec<_> = billing.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["invoices", "payments", "refunds"]);
        assert!(layout.handle("billing").is_some());
        assert!(layout.handle("users").is_some());
        assert!(layout.handle("absent").is_none());
    }

    #[tokio::test]
    async fn declared_but_unscanned_databases_are_created_empty() {
        let tree = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let engine = DirEngine::new(data.path());

        let layout = StorageBootstrap::run(&engine, tree.path(), ["audit"]).await.unwrap();

        assert_eq!(layout.groups.len(), 1);
        assert!(layout.groups[0].tables.is_empty());
        assert!(layout.handle("audit").is_some());
    }

    #[tokio::test]
    async fn rerun_over_built_directory_is_idempotent() {
        let tree = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_module_tree(tree.path());

        let engine = DirEngine::new(data.path());
        let first = StorageBootstrap::run(&engine, tree.path(), ["audit"]).await.unwrap();
        let second = StorageBootstrap::run(&engine, tree.path(), ["audit"]).await.unwrap();

        assert_eq!(first.groups, second.groups);
        // Same databases created on both runs, no extras.
        let created = engine.created.lock().unwrap();
        assert_eq!(created.len(), 6);
        // And no duplicate schema objects on disk.
        let billing_tables: Vec<_> = std::fs::read_dir(data.path().join("billing"))
            .unwrap()
            .collect();
        assert_eq!(billing_tables.len(), 3);
    }

    #[tokio::test]
    async fn scan_failure_is_fatal() {
        let data = tempfile::tempdir().unwrap();
        let engine = DirEngine::new(data.path());
        let err = StorageBootstrap::run(&engine, Path::new("/nonexistent/tree"), [])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn base_handle_downcasts_to_known_type() {
        let handle = BaseHandle::new(String::from("dsn://billing"));
        assert_eq!(*handle.downcast::<String>().unwrap(), "dsn://billing");
        assert!(handle.downcast::<u32>().is_none());
    }
}

//! Table catalog and compile-state registry.
//!
//! Responsibilities:
//! - hold each table's immutable DDL behind a shared handle;
//! - track the per-table compile lifecycle (`compiling` / `compiled` /
//!   `failed`) with the owning task as the only mutator until a terminal
//!   state;
//! - load table definitions from `.json` / `.toml` catalog files.
//!
//! The registry is process-local and rebuilt on restart; it makes no
//! durability guarantees.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tfq_common::{QueryError, Result, TfqError};

use crate::ddl::TableDdl;

/// Compile lifecycle of one table's helper module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileState {
    /// The owning task is still compiling the table.
    Compiling,
    /// The table is ready to serve queries.
    Compiled,
    /// Compilation failed; the table cannot be served.
    Failed,
}

#[derive(Debug, Clone)]
struct TableEntry {
    ddl: Arc<TableDdl>,
    owner: String,
    state: CompileState,
}

/// Process-wide table catalog and compile-state registry.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<String, TableEntry>>,
}

impl Catalog {
    /// Initialize an empty catalog.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Unconditional upsert of a table's row.
    pub fn insert(&self, ddl: Arc<TableDdl>, owner: &str, state: CompileState) {
        let mut tables = self.tables.write().expect("catalog lock poisoned");
        tables.insert(
            ddl.name.clone(),
            TableEntry {
                ddl,
                owner: owner.to_string(),
                state,
            },
        );
    }

    /// Owner of an in-flight compile, when the table is currently compiling.
    pub fn is_compiling(&self, table: &str) -> Option<String> {
        let tables = self.tables.read().expect("catalog lock poisoned");
        tables.get(table).and_then(|e| match e.state {
            CompileState::Compiling => Some(e.owner.clone()),
            _ => None,
        })
    }

    /// Current compile state, or `None` for a table never inserted.
    pub fn get_state(&self, table: &str) -> Option<CompileState> {
        let tables = self.tables.read().expect("catalog lock poisoned");
        tables.get(table).map(|e| e.state)
    }

    /// Flip the state of the (unique) row held by `owner`.
    ///
    /// The row's table name and DDL binding are preserved. Unknown owners
    /// surface the wire not-found reason.
    pub fn update_state(&self, owner: &str, state: CompileState) -> Result<()> {
        let mut tables = self.tables.write().expect("catalog lock poisoned");
        match tables.values_mut().find(|e| e.owner == owner) {
            Some(entry) => {
                entry.state = state;
                Ok(())
            }
            None => Err(QueryError::NotFound(format!("no compile entry owned by '{owner}'")).into()),
        }
    }

    /// Shared handle to a table's DDL.
    pub fn ddl(&self, table: &str) -> Result<Arc<TableDdl>> {
        let tables = self.tables.read().expect("catalog lock poisoned");
        tables
            .get(table)
            .map(|e| Arc::clone(&e.ddl))
            .ok_or_else(|| QueryError::MissingHelperModule(table.to_string()).into())
    }

    /// All registered DDLs, sorted by table name.
    pub fn tables(&self) -> Vec<Arc<TableDdl>> {
        let tables = self.tables.read().expect("catalog lock poisoned");
        let mut v = tables.values().map(|e| Arc::clone(&e.ddl)).collect::<Vec<_>>();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// Load a catalog from a JSON file of table DDLs.
    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let parsed: CatalogFile =
            serde_json::from_str(&s).map_err(|e| TfqError::InvalidConfig(e.to_string()))?;
        Self::from_tables(parsed.into_tables())
    }

    /// Load a catalog from a TOML file of table DDLs.
    pub fn load_from_toml(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let parsed: CatalogFile =
            toml::from_str(&s).map_err(|e| TfqError::InvalidConfig(e.to_string()))?;
        Self::from_tables(parsed.into_tables())
    }

    /// Load a catalog file, dispatching on the `.json` / `.toml` extension.
    pub fn load(path: &str) -> Result<Self> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_from_json(path),
            Some("toml") => Self::load_from_toml(path),
            Some(other) => Err(TfqError::InvalidConfig(format!(
                "unsupported catalog extension '.{other}'; use .json or .toml"
            ))),
            None => Err(TfqError::InvalidConfig(
                "catalog path must include extension .json or .toml".to_string(),
            )),
        }
    }

    fn from_tables(tables: Vec<TableDdl>) -> Result<Self> {
        let catalog = Catalog::new();
        for ddl in tables {
            ddl.validate()?;
            catalog.insert(Arc::new(ddl), "catalog-load", CompileState::Compiled);
        }
        Ok(catalog)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    TableList(Vec<TableDdl>),
    Wrapped { tables: Vec<TableDdl> },
}

impl CatalogFile {
    fn into_tables(self) -> Vec<TableDdl> {
        match self {
            Self::TableList(tables) => tables,
            Self::Wrapped { tables } => tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{Catalog, CompileState};
    use crate::ddl::{FieldDef, FieldType, KeyComponent, QuantumUnit, TableDdl};
    use tfq_common::{QueryError, TfqError};

    fn ddl(name: &str) -> Arc<TableDdl> {
        Arc::new(TableDdl {
            name: name.to_string(),
            fields: vec![
                FieldDef {
                    name: "user".to_string(),
                    field_type: FieldType::Varchar,
                    nullable: false,
                },
                FieldDef {
                    name: "time".to_string(),
                    field_type: FieldType::Timestamp,
                    nullable: false,
                },
            ],
            partition_key: vec![
                KeyComponent::Param {
                    field: "user".to_string(),
                },
                KeyComponent::Quantum {
                    field: "time".to_string(),
                    every: 15,
                    unit: QuantumUnit::Second,
                },
            ],
            local_key: vec!["user".to_string(), "time".to_string()],
        })
    }

    fn unique_path(ext: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("tfq_catalog_test_{nanos}.{ext}"))
    }

    #[test]
    fn last_write_wins_per_table() {
        let catalog = Catalog::new();
        catalog.insert(ddl("t"), "task-1", CompileState::Compiling);
        catalog.insert(ddl("t"), "task-2", CompileState::Compiled);
        assert_eq!(catalog.get_state("t"), Some(CompileState::Compiled));
        assert_eq!(catalog.is_compiling("t"), None);
    }

    #[test]
    fn is_compiling_reports_the_owner() {
        let catalog = Catalog::new();
        catalog.insert(ddl("t"), "task-9", CompileState::Compiling);
        assert_eq!(catalog.is_compiling("t"), Some("task-9".to_string()));
    }

    #[test]
    fn update_state_by_owner_preserves_bindings() {
        let catalog = Catalog::new();
        catalog.insert(ddl("t"), "task-1", CompileState::Compiling);
        catalog
            .update_state("task-1", CompileState::Compiled)
            .expect("owner exists");
        assert_eq!(catalog.get_state("t"), Some(CompileState::Compiled));
        assert_eq!(catalog.ddl("t").expect("ddl").name, "t");
    }

    #[test]
    fn update_state_with_unknown_owner_is_not_found() {
        let catalog = Catalog::new();
        let err = catalog
            .update_state("nobody", CompileState::Failed)
            .expect_err("unknown owner");
        match err {
            TfqError::Query(QueryError::NotFound(_)) => {}
            other => panic!("expected not-found, got {other}"),
        }
    }

    #[test]
    fn never_inserted_table_has_no_state() {
        let catalog = Catalog::new();
        assert_eq!(catalog.get_state("ghost"), None);
    }

    #[test]
    fn loads_catalog_from_json() {
        let path = unique_path("json");
        let payload = r#"[{
            "name": "t_json",
            "fields": [
                {"name": "user", "type": "varchar"},
                {"name": "time", "type": "timestamp"}
            ],
            "partition_key": [
                {"kind": "param", "field": "user"},
                {"kind": "quantum", "field": "time", "every": 15, "unit": "s"}
            ],
            "local_key": ["user", "time"]
        }]"#;
        std::fs::write(&path, payload).expect("write json");

        let catalog = Catalog::load(path.to_str().expect("path utf8")).expect("load json");
        assert_eq!(catalog.get_state("t_json"), Some(CompileState::Compiled));
        let ddl = catalog.ddl("t_json").expect("ddl");
        assert_eq!(ddl.quantum().expect("quantum").bucket_ms(), 15_000);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn loads_catalog_from_toml_wrapped_tables() {
        let path = unique_path("toml");
        let payload = r#"
            [[tables]]
            name = "t_toml"
            local_key = ["user", "time"]

            [[tables.fields]]
            name = "user"
            type = "varchar"

            [[tables.fields]]
            name = "time"
            type = "timestamp"

            [[tables.partition_key]]
            kind = "param"
            field = "user"

            [[tables.partition_key]]
            kind = "quantum"
            field = "time"
            every = 15
            unit = "s"
        "#;
        std::fs::write(&path, payload).expect("write toml");

        let catalog = Catalog::load(path.to_str().expect("path utf8")).expect("load toml");
        assert_eq!(catalog.tables().len(), 1);
        assert_eq!(catalog.tables()[0].name, "t_toml");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rejects_invalid_ddl_in_catalog_file() {
        let path = unique_path("json");
        // No quantum component.
        let payload = r#"[{
            "name": "bad",
            "fields": [{"name": "user", "type": "varchar"}],
            "partition_key": [{"kind": "param", "field": "user"}],
            "local_key": ["user"]
        }]"#;
        std::fs::write(&path, payload).expect("write json");

        let err = Catalog::load(path.to_str().expect("path utf8")).expect_err("reject");
        assert!(format!("{err}").contains("quantum"));

        let _ = std::fs::remove_file(path);
    }
}

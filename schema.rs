//! C2: the schema registry. A `Schema` owns named `TableDescriptor`s; a
//! table is either view XOR module-backed, enforced at insertion time
//! (spec §3 Invariants).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::ast::SelectStmt;
use crate::error::{Error, Result};
use crate::value::Affinity;
use crate::vtab::VTable;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub affinity: Affinity,
    pub not_null: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryKeyColumn {
    pub column_index: usize,
    pub desc: bool,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TableFlags: u8 {
        const TEMPORARY    = 0b0001;
        const VIEW         = 0b0010;
        const STRICT       = 0b0100;
        const WITHOUT_ROWID = 0b1000;
    }
}

#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    pub table: String,
    pub columns: Vec<(usize, bool)>,
    pub unique: bool,
}

/// A table or view entry in the schema (spec §3).
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<Column>,
    /// case-insensitive column name -> index
    column_index: HashMap<String, usize>,
    pub primary_key: Vec<PrimaryKeyColumn>,
    pub check_constraints: Vec<crate::ast::Expr>,
    pub flags: TableFlags,
    /// Module-backed tables carry the module name, the live table handle,
    /// and the original construction args. Views carry `view_select`
    /// instead; exactly one of the two is populated (invariant).
    pub module_name: Option<String>,
    pub module_args: Vec<String>,
    pub table: Option<Rc<dyn VTable>>,
    pub view_select: Option<SelectStmt>,
    pub indexes: Vec<IndexDescriptor>,
}

impl std::fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("flags", &self.flags)
            .finish()
    }
}

impl TableDescriptor {
    pub fn is_view(&self) -> bool {
        self.flags.contains(TableFlags::VIEW)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn rebuild_column_index(&mut self) {
        self.column_index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_ascii_lowercase(), i))
            .collect();
    }

    /// True when the declared primary key is a single rowid-aliasing
    /// integer column (`INTEGER PRIMARY KEY`), i.e. there's no separate
    /// rowid-to-key side map needed.
    pub fn rowid_is_pk(&self) -> bool {
        self.primary_key.len() == 1
            && matches!(
                self.columns.get(self.primary_key[0].column_index),
                Some(c) if c.affinity == Affinity::Integer
            )
    }
}

fn make_column_index(columns: &[Column]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.to_ascii_lowercase(), i))
        .collect()
}

pub fn new_table_descriptor(
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<PrimaryKeyColumn>,
    flags: TableFlags,
) -> TableDescriptor {
    let column_index = make_column_index(&columns);
    TableDescriptor {
        name,
        columns,
        column_index,
        primary_key,
        check_constraints: Vec::new(),
        flags,
        module_name: None,
        module_args: Vec::new(),
        table: None,
        view_select: None,
        indexes: Vec::new(),
    }
}

/// Stringify a table descriptor back to `CREATE TABLE` DDL (spec §8
/// round-trip property, §3 SPEC_FULL supplement).
pub fn to_sql(desc: &TableDescriptor) -> String {
    let mut s = String::new();
    if desc.is_view() {
        // Views are stringified by the caller via their `view_select`;
        // this helper only covers table DDL.
        return s;
    }
    write!(s, "CREATE TABLE {}(", desc.name).unwrap();
    let pk_set: HashMap<usize, bool> = desc
        .primary_key
        .iter()
        .map(|pk| (pk.column_index, pk.desc))
        .collect();
    for (i, col) in desc.columns.iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        write!(s, "{} {}", col.name, affinity_decl(col.affinity)).unwrap();
        if col.not_null {
            s.push_str(" NOT NULL");
        }
        if let Some(desc_flag) = pk_set.get(&i) {
            s.push_str(" PRIMARY KEY");
            if *desc_flag {
                s.push_str(" DESC");
            }
        }
    }
    s.push(')');
    if desc.flags.contains(TableFlags::STRICT) {
        s.push_str(" STRICT");
    }
    if desc.flags.contains(TableFlags::WITHOUT_ROWID) {
        s.push_str(" WITHOUT ROWID");
    }
    s
}

fn affinity_decl(aff: Affinity) -> &'static str {
    match aff {
        Affinity::None => "BLOB",
        Affinity::Numeric => "NUMERIC",
        Affinity::Integer => "INTEGER",
        Affinity::Real => "REAL",
        Affinity::Text => "TEXT",
        Affinity::Blob => "BLOB",
    }
}

/// The inverse of `affinity_decl`: derives a column's affinity from its
/// declared type name, using the same substring rules as the reference
/// affinity algorithm (CREATE TABLE DDL execution, SPEC_FULL.md §3).
pub fn affinity_from_decl(decl: Option<&str>) -> Affinity {
    let Some(decl) = decl else {
        return Affinity::None;
    };
    let upper = decl.to_ascii_uppercase();
    if upper.contains("INT") {
        Affinity::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        Affinity::Text
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        Affinity::Real
    } else if upper.contains("BLOB") || upper.is_empty() {
        Affinity::None
    } else {
        Affinity::Numeric
    }
}

/// A named collection of tables/views (spec §2 C2). Mirrors the teacher's
/// `schema::Schema`, generalized to module-backed tables instead of
/// on-disk B-tree root pages.
#[derive(Default)]
pub struct Schema {
    tables: HashMap<String, Rc<TableDescriptor>>,
    /// Governs which module a bare `CREATE TABLE t(...)` instantiates.
    pub default_vtab_module: String,
    pub default_vtab_args: Vec<String>,
}

impl Schema {
    pub fn new() -> Self {
        Schema {
            tables: HashMap::new(),
            default_vtab_module: "mem".to_string(),
            default_vtab_args: Vec::new(),
        }
    }

    pub fn get_table(&self, name: &str) -> Option<Rc<TableDescriptor>> {
        self.tables.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn add_table(&mut self, table: TableDescriptor) -> Result<()> {
        let key = table.name.to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            return Err(Error::compile(format!(
                "table or view {} already exists",
                table.name
            )));
        }
        self.tables.insert(key, Rc::new(table));
        Ok(())
    }

    pub fn add_view(&mut self, table: TableDescriptor) -> Result<()> {
        self.add_table(table)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if self.tables.remove(&key).is_none() {
            return Err(Error::not_found(format!("no such table: {}", name)));
        }
        Ok(())
    }

    pub fn drop_view(&mut self, name: &str) -> Result<()> {
        self.drop_table(name)
    }

    pub fn rename_table(&mut self, old: &str, new: &str) -> Result<()> {
        let key = old.to_ascii_lowercase();
        let mut desc = (*self
            .tables
            .remove(&key)
            .ok_or_else(|| Error::not_found(format!("no such table: {}", old)))?)
        .clone_shallow();
        desc.name = new.to_string();
        self.tables.insert(new.to_ascii_lowercase(), Rc::new(desc));
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.values().map(|t| t.name.clone()).collect()
    }

    pub fn all_tables(&self) -> Vec<Rc<TableDescriptor>> {
        self.tables.values().cloned().collect()
    }

    /// Mutates a copy of the named table's descriptor and swaps it back in
    /// (the same pattern `rename_table` uses below). `ALTER TABLE` and
    /// index maintenance go through this rather than duplicating the
    /// copy-mutate-reinsert dance at each call site.
    pub fn with_table_mut<R>(&mut self, name: &str, f: impl FnOnce(&mut TableDescriptor) -> R) -> Result<R> {
        let key = name.to_ascii_lowercase();
        let mut desc = self
            .tables
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("no such table: {}", name)))?
            .clone_shallow();
        let result = f(&mut desc);
        desc.rebuild_column_index();
        self.tables.insert(key, Rc::new(desc));
        Ok(result)
    }

    /// Replace a table descriptor in place (used by `ALTER TABLE` and by
    /// DDL that needs to swap a descriptor's column list after a module
    /// call completes).
    pub fn replace_table(&mut self, table: TableDescriptor) {
        let key = table.name.to_ascii_lowercase();
        self.tables.insert(key, Rc::new(table));
    }
}

impl TableDescriptor {
    /// A cheap clone used only by schema-management operations
    /// (rename/alter) that need to mutate an otherwise-shared descriptor.
    fn clone_shallow(&self) -> TableDescriptor {
        TableDescriptor {
            name: self.name.clone(),
            columns: self.columns.clone(),
            column_index: self.column_index.clone(),
            primary_key: self.primary_key.clone(),
            check_constraints: self.check_constraints.clone(),
            flags: self.flags,
            module_name: self.module_name.clone(),
            module_args: self.module_args.clone(),
            table: self.table.clone(),
            view_select: self.view_select.clone(),
            indexes: self.indexes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table(name: &str) -> TableDescriptor {
        new_table_descriptor(
            name.to_string(),
            vec![
                Column {
                    name: "a".into(),
                    affinity: Affinity::Integer,
                    not_null: false,
                    hidden: false,
                },
                Column {
                    name: "b".into(),
                    affinity: Affinity::Text,
                    not_null: false,
                    hidden: false,
                },
            ],
            vec![PrimaryKeyColumn {
                column_index: 0,
                desc: false,
            }],
            TableFlags::empty(),
        )
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut schema = Schema::new();
        schema.add_table(sample_table("t")).unwrap();
        let err = schema.add_table(sample_table("T")).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn column_lookup_case_insensitive() {
        let t = sample_table("t");
        assert_eq!(t.column_index("A"), Some(0));
        assert_eq!(t.column_index("b"), Some(1));
        assert_eq!(t.column_index("z"), None);
    }

    #[test]
    fn ddl_roundtrip_contains_declared_columns() {
        let t = sample_table("t");
        let sql = to_sql(&t);
        assert!(sql.contains("a INTEGER"));
        assert!(sql.contains("b TEXT"));
        assert!(sql.contains("PRIMARY KEY"));
    }
}

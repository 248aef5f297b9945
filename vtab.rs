//! C3: the virtual table protocol — module lifecycle, cursor API, and the
//! best-index planning contract (spec §4.3). Modeled as a capability-set
//! trait pair rather than a `repr(C)` FFI surface (that shape belongs to
//! dynamically loaded extensions, out of scope here); the memory table
//! module (`mem_table`) is the authoritative implementation.

use std::rc::Rc;

use crate::error::Result;
use crate::schema::{Column, IndexDescriptor, PrimaryKeyColumn};
use crate::value::Value;

/// A single pushed-down WHERE constraint on one column of the target
/// cursor (spec §4.5 constraint extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintInfo {
    pub column_index: ColumnRef,
    pub op: ConstraintOp,
    /// false when the constraint references a later table in the join
    /// order and can't be evaluated yet, but is still forwarded so a
    /// module can decide to use it with `usable=false` bookkeeping upstream.
    pub usable: bool,
}

/// Either an ordinary column or the synthetic rowid column (bit 63 in the
/// column usage mask, spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef {
    Column(usize),
    Rowid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderByInfo {
    pub column_index: usize,
    pub desc: bool,
}

/// Per-constraint usage decision returned from `best_index`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintUsage {
    /// 1-based slot in the `filter` argv this constraint's value lands in.
    pub argv_index: Option<usize>,
    /// Tells the VDBE this constraint is fully handled by the module, so
    /// the WHERE residue evaluator can skip it (handled-node tracking,
    /// spec §4.5).
    pub omit: bool,
}

/// The module's plan decision for one cursor (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct IndexInfo {
    pub idx_num: i32,
    pub idx_str: Option<String>,
    pub constraint_usages: Vec<ConstraintUsage>,
    pub estimated_cost: f64,
    pub estimated_rows: u64,
    pub order_by_consumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Abort,
    Rollback,
    Fail,
    Ignore,
    Replace,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::Abort
    }
}

/// Result of a `VTable::update` call (spec §4.3 update calling convention).
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// The rowid of the affected row after INSERT/UPDATE. `None` for
    /// DELETE, or for an INSERT/UPDATE silently dropped by `IGNORE`.
    pub rowid: Option<i64>,
    /// true when a conflict under `ConflictPolicy::Ignore` caused the
    /// write to be skipped rather than erroring.
    pub ignored: bool,
}

#[derive(Debug, Clone)]
pub enum SchemaChange {
    AddColumn(Column),
    DropColumn(String),
    RenameColumn { from: String, to: String },
}

/// Options passed to `create`/`connect`: the raw module argument strings
/// from `CREATE TABLE t USING module(args...)` plus the column list parsed
/// from the DDL (for modules, like the memory table, that take their shape
/// from the declaring statement rather than from `create_schema`-style
/// introspection).
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub args: Vec<String>,
    pub columns: Vec<Column>,
    pub primary_key: Vec<PrimaryKeyColumn>,
}

/// A stateful iterator over a virtual table (glossary: Cursor). Positioned
/// by `filter`/`next`; `column`/`rowid` read the current row.
pub trait VTabCursor {
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &[Value]) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn eof(&self) -> bool;
    fn column(&self, i: usize) -> Result<Value>;
    fn rowid(&self) -> Result<i64>;
    /// Advance (or retreat, for negative `n`) `n` rows; returns false if the
    /// seek ran off the end.
    fn seek_relative(&mut self, n: i64) -> Result<bool>;
    fn seek_to_rowid(&mut self, rowid: i64) -> Result<bool>;
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The live handle for one table backed by a module (spec §4.3). A single
/// `Rc<dyn VTable>` is shared between the schema's `TableDescriptor` and
/// every VDBE cursor opened against it; interior mutability (as
/// implemented by `mem_table::MemTable`) is the implementer's concern.
pub trait VTable {
    fn columns(&self) -> Vec<Column>;
    fn primary_key(&self) -> Vec<PrimaryKeyColumn>;

    fn open(&self) -> Result<Box<dyn VTabCursor>>;
    fn best_index(&self, constraints: &[ConstraintInfo], order_by: &[OrderByInfo]) -> IndexInfo;

    /// `values[0]` is the rowid slot, `values[1..]` are column values, per
    /// the update calling convention in spec §4.3.
    fn update(&self, values: &[Value], conflict: ConflictPolicy) -> Result<UpdateOutcome>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    fn sync(&self) -> Result<()> {
        Ok(())
    }
    fn savepoint(&self, index: usize) -> Result<()>;
    fn release(&self, index: usize) -> Result<()>;
    fn rollback_to(&self, index: usize) -> Result<()>;

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }
    fn destroy(&self) -> Result<()> {
        Ok(())
    }

    fn alter_schema(&self, _change: &SchemaChange) -> Result<()> {
        Err(crate::error::Error::misuse(
            "this module does not support ALTER TABLE",
        ))
    }
    fn create_index(&self, _index: &IndexDescriptor) -> Result<()> {
        Err(crate::error::Error::misuse(
            "this module does not support secondary indexes",
        ))
    }
    fn drop_index(&self, _name: &str) -> Result<()> {
        Err(crate::error::Error::misuse(
            "this module does not support secondary indexes",
        ))
    }
}

/// A module: the factory that constructs/binds table instances
/// (spec §4.3 `create`/`connect`).
pub trait VTabModule {
    fn name(&self) -> &str;
    fn create(&self, schema: &str, table: &str, options: &CreateOptions) -> Result<Rc<dyn VTable>>;
    fn connect(&self, schema: &str, table: &str, options: &CreateOptions) -> Result<Rc<dyn VTable>>;
}

/// Process-wide registry of installed modules, keyed by module name
/// (case-insensitive), consulted by DDL translation and by
/// `Schema::default_vtab_module`.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: std::collections::HashMap<String, Rc<dyn VTabModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Rc<dyn VTabModule>) {
        self.modules
            .insert(module.name().to_ascii_lowercase(), module);
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn VTabModule>> {
        self.modules.get(&name.to_ascii_lowercase()).cloned()
    }
}

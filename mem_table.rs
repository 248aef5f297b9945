//! C4: the in-memory B-tree-backed virtual table, with MVCC-style
//! transaction buffers and savepoints (spec §4.4). This module is the
//! authoritative `VTable`/`VTabModule` implementation in the crate.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::schema::{Column, PrimaryKeyColumn};
use crate::value::{Collation, Value};
use crate::vtab::{
    ColumnRef, ConflictPolicy, ConstraintInfo, ConstraintOp, ConstraintUsage, CreateOptions,
    IndexInfo, OrderByInfo, UpdateOutcome, VTabCursor, VTabModule, VTable,
};

/// The B-tree key: either the single rowid, or the ordered tuple of
/// primary-key column values (spec §4.4 Keying).
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey(pub Vec<Value>);

/// `Value` only derives `PartialEq` (it carries an `f64`), but equality here
/// is defined by `Ord::cmp` below being a total, reflexive order over the
/// finite set of storage classes this crate produces, so the `Eq` contract
/// holds in practice.
impl Eq for RowKey {}

impl RowKey {
    fn rowid_key(rowid: i64) -> RowKey {
        RowKey(vec![Value::Integer(rowid)])
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.compare(b, Collation::Binary);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub rowid: i64,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    old_row: Row,
    new_row: Row,
    old_key: RowKey,
    new_key: RowKey,
}

#[derive(Debug, Clone)]
struct PendingDelete {
    old_row: Row,
    old_key: RowKey,
}

#[derive(Debug, Clone, Default)]
struct TxnBuffers {
    pending_inserts: BTreeMap<RowKey, Row>,
    pending_insert_rowids: HashMap<i64, RowKey>,
    pending_updates: HashMap<i64, PendingUpdate>,
    pending_deletes: HashMap<i64, PendingDelete>,
}

impl TxnBuffers {
    fn is_empty(&self) -> bool {
        self.pending_inserts.is_empty()
            && self.pending_updates.is_empty()
            && self.pending_deletes.is_empty()
    }
}

enum Location {
    PendingUpdate,
    PendingInsert,
    Committed,
}

struct MemTableState {
    columns: Vec<Column>,
    primary_key: Vec<PrimaryKeyColumn>,
    rows: BTreeMap<RowKey, Row>,
    /// Only populated when the declared PK is neither absent nor a single
    /// integer column aliasing the rowid (spec §4.4: "A rowid-to-key side
    /// map exists only when PK != rowid").
    rowid_to_key: HashMap<i64, RowKey>,
    next_rowid: i64,
    in_transaction: bool,
    buffers: TxnBuffers,
    savepoints: Vec<TxnBuffers>,
}

impl MemTableState {
    fn rowid_is_pk(&self) -> bool {
        self.primary_key.len() == 1
            && self
                .columns
                .get(self.primary_key[0].column_index)
                .map(|c| c.affinity == crate::value::Affinity::Integer)
                .unwrap_or(false)
    }

    fn needs_rowid_map(&self) -> bool {
        !self.primary_key.is_empty() && !self.rowid_is_pk()
    }

    fn compute_key(&self, rowid: i64, values: &[Value]) -> RowKey {
        if self.primary_key.is_empty() {
            return RowKey::rowid_key(rowid);
        }
        if self.rowid_is_pk() {
            return RowKey::rowid_key(rowid);
        }
        RowKey(
            self.primary_key
                .iter()
                .map(|pk| values[pk.column_index].clone())
                .collect(),
        )
    }

    fn key_for_rowid(&self, rowid: i64) -> Option<RowKey> {
        if self.primary_key.is_empty() || self.rowid_is_pk() {
            return Some(RowKey::rowid_key(rowid));
        }
        self.rowid_to_key.get(&rowid).cloned()
    }

    /// Whether `key` is already taken by a committed row not shadowed by a
    /// pending delete, by a pending insert, or by the *new* key of a
    /// pending update. See SPEC_FULL.md §5 for the open-question
    /// resolution this implements.
    fn key_conflicts(&self, key: &RowKey, ignore_rowid: Option<i64>) -> bool {
        if let Some(row) = self.rows.get(key) {
            if Some(row.rowid) != ignore_rowid {
                let vacated = self.buffers.pending_deletes.contains_key(&row.rowid)
                    || self.buffers.pending_updates.contains_key(&row.rowid);
                if !vacated {
                    return true;
                }
            }
        }
        if self.buffers.pending_inserts.contains_key(key) {
            return true;
        }
        if self
            .buffers
            .pending_updates
            .iter()
            .any(|(rid, u)| Some(*rid) != ignore_rowid && u.new_key == *key)
        {
            return true;
        }
        false
    }

    fn locate(&self, rowid: i64) -> Option<(Location, RowKey, Row)> {
        if let Some(u) = self.buffers.pending_updates.get(&rowid) {
            return Some((Location::PendingUpdate, u.new_key.clone(), u.new_row.clone()));
        }
        if let Some(key) = self.buffers.pending_insert_rowids.get(&rowid) {
            if let Some(row) = self.buffers.pending_inserts.get(key) {
                return Some((Location::PendingInsert, key.clone(), row.clone()));
            }
        }
        if self.buffers.pending_deletes.contains_key(&rowid) {
            return None;
        }
        let key = self.key_for_rowid(rowid)?;
        let row = self.rows.get(&key)?;
        Some((Location::Committed, key, row.clone()))
    }
}

/// Per-`"<op>:<schema>.<table>"` write lock (spec §4.4/§5 Concurrency).
/// Single-threaded cooperative execution means contention never actually
/// blocks, but entry points still acquire the named lock so the intended
/// serialization is explicit and enforced if the runtime is ever driven
/// from more than one task.
fn table_locks() -> &'static Mutex<HashMap<String, Rc<Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Rc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn with_table_lock<T>(op: &str, schema: &str, table: &str, f: impl FnOnce() -> T) -> T {
    let key = format!("{op}:{schema}.{table}");
    let lock = {
        let mut locks = table_locks().lock();
        locks.entry(key).or_insert_with(|| Rc::new(Mutex::new(()))).clone()
    };
    let _guard = lock.lock();
    f()
}

/// The memory table: an ordered-key B-tree with MVCC-style transaction
/// buffers (spec §4.4). `schema_name`/`table_name` are only used to key
/// the per-table write lock.
pub struct MemTable {
    schema_name: String,
    table_name: String,
    state: RefCell<MemTableState>,
}

impl MemTable {
    pub fn new(
        schema_name: &str,
        table_name: &str,
        columns: Vec<Column>,
        primary_key: Vec<PrimaryKeyColumn>,
    ) -> Self {
        MemTable {
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
            state: RefCell::new(MemTableState {
                columns,
                primary_key,
                rows: BTreeMap::new(),
                rowid_to_key: HashMap::new(),
                next_rowid: 1,
                in_transaction: false,
                buffers: TxnBuffers::default(),
                savepoints: Vec::new(),
            }),
        }
    }

    fn lock(&self, op: &str, f: impl FnOnce() -> Result<UpdateOutcome>) -> Result<UpdateOutcome> {
        with_table_lock(op, &self.schema_name, &self.table_name, f)
    }

    fn add_row(&self, values: Vec<Value>, conflict: ConflictPolicy) -> Result<UpdateOutcome> {
        let mut state = self.state.borrow_mut();
        // An `INTEGER PRIMARY KEY` column aliases the rowid: its declared
        // value (when not NULL) *is* the row's identity, not just a
        // uniqueness-checked column. A NULL falls back to auto-assignment.
        let rowid = if state.rowid_is_pk() {
            match values.get(state.primary_key[0].column_index) {
                Some(Value::Integer(v)) => *v,
                Some(Value::Null) | None => state.next_rowid,
                Some(_) => {
                    return Err(Error::Type {
                        message: "INTEGER PRIMARY KEY value must be an integer or NULL".into(),
                    })
                }
            }
        } else {
            state.next_rowid
        };
        let key = state.compute_key(rowid, &values);
        if state.key_conflicts(&key, None) {
            return if conflict == ConflictPolicy::Ignore {
                Ok(UpdateOutcome {
                    rowid: None,
                    ignored: true,
                })
            } else {
                Err(Error::constraint(format!(
                    "UNIQUE constraint failed: {}.{:?}",
                    self.table_name, key.0
                )))
            };
        }
        if rowid >= state.next_rowid {
            state.next_rowid = rowid + 1;
        }
        let row = Row {
            rowid,
            values,
        };
        if state.in_transaction {
            state.buffers.pending_inserts.insert(key.clone(), row);
            state.buffers.pending_insert_rowids.insert(rowid, key);
        } else {
            let needs_map = state.needs_rowid_map();
            if needs_map {
                state.rowid_to_key.insert(rowid, key.clone());
            }
            state.rows.insert(key, row);
        }
        Ok(UpdateOutcome {
            rowid: Some(rowid),
            ignored: false,
        })
    }

    fn update_row(
        &self,
        rowid: i64,
        new_values: Vec<Value>,
        conflict: ConflictPolicy,
    ) -> Result<UpdateOutcome> {
        let mut state = self.state.borrow_mut();
        let Some((location, old_key, old_row)) = state.locate(rowid) else {
            return Err(Error::not_found(format!(
                "no such row: rowid {rowid} in {}",
                self.table_name
            )));
        };
        let new_key = state.compute_key(rowid, &new_values);
        if new_key != old_key && state.key_conflicts(&new_key, Some(rowid)) {
            return if conflict == ConflictPolicy::Ignore {
                Ok(UpdateOutcome {
                    rowid: None,
                    ignored: true,
                })
            } else {
                Err(Error::constraint(format!(
                    "UNIQUE constraint failed: {}.{:?}",
                    self.table_name, new_key.0
                )))
            };
        }
        let new_row = Row {
            rowid,
            values: new_values,
        };

        if !state.in_transaction {
            let needs_map = state.needs_rowid_map();
            state.rows.remove(&old_key);
            state.rows.insert(new_key.clone(), new_row);
            if needs_map {
                state.rowid_to_key.insert(rowid, new_key);
            }
            return Ok(UpdateOutcome {
                rowid: Some(rowid),
                ignored: false,
            });
        }

        match location {
            Location::PendingInsert => {
                state.buffers.pending_inserts.remove(&old_key);
                state.buffers.pending_inserts.insert(new_key.clone(), new_row);
                state.buffers.pending_insert_rowids.insert(rowid, new_key);
            }
            Location::PendingUpdate | Location::Committed => {
                // the *original* pre-transaction row, preserved across a
                // chain of updates within the same transaction.
                let original_old_row = match state.buffers.pending_updates.get(&rowid) {
                    Some(existing) => existing.old_row.clone(),
                    None => old_row,
                };
                let original_old_key = match state.buffers.pending_updates.get(&rowid) {
                    Some(existing) => existing.old_key.clone(),
                    None => old_key,
                };
                state.buffers.pending_updates.insert(
                    rowid,
                    PendingUpdate {
                        old_row: original_old_row,
                        new_row,
                        old_key: original_old_key,
                        new_key,
                    },
                );
            }
        }
        Ok(UpdateOutcome {
            rowid: Some(rowid),
            ignored: false,
        })
    }

    fn delete_row(&self, rowid: i64) -> Result<UpdateOutcome> {
        let mut state = self.state.borrow_mut();
        let Some((location, key, row)) = state.locate(rowid) else {
            return Err(Error::not_found(format!(
                "no such row: rowid {rowid} in {}",
                self.table_name
            )));
        };
        if !state.in_transaction {
            state.rows.remove(&key);
            state.rowid_to_key.remove(&rowid);
            return Ok(UpdateOutcome {
                rowid: None,
                ignored: false,
            });
        }
        match location {
            Location::PendingInsert => {
                state.buffers.pending_inserts.remove(&key);
                state.buffers.pending_insert_rowids.remove(&rowid);
            }
            Location::PendingUpdate => {
                let update = state.buffers.pending_updates.remove(&rowid).unwrap();
                state.buffers.pending_deletes.insert(
                    rowid,
                    PendingDelete {
                        old_row: update.old_row,
                        old_key: update.old_key,
                    },
                );
            }
            Location::Committed => {
                state
                    .buffers
                    .pending_deletes
                    .insert(rowid, PendingDelete { old_row: row, old_key: key });
            }
        }
        Ok(UpdateOutcome {
            rowid: None,
            ignored: false,
        })
    }

    /// Build the merged transactional view (spec §4.4 Reads): in-range
    /// committed rows minus pending deletes, substituting pending updates'
    /// new rows (re-keyed), unioned with pending inserts, sorted by key.
    fn scan_transactional(&self, range: &KeyRange, desc: bool) -> Vec<Row> {
        let state = self.state.borrow();
        let mut out: Vec<(RowKey, Row)> = Vec::new();
        for (key, row) in state.rows.iter() {
            if state.buffers.pending_deletes.contains_key(&row.rowid) {
                continue;
            }
            if let Some(update) = state.buffers.pending_updates.get(&row.rowid) {
                out.push((update.new_key.clone(), update.new_row.clone()));
            } else {
                out.push((key.clone(), row.clone()));
            }
        }
        for (key, row) in state.buffers.pending_inserts.iter() {
            out.push((key.clone(), row.clone()));
        }
        out.retain(|(key, _)| range.contains(key));
        out.sort_by(|(a, _), (b, _)| a.cmp(b));
        if desc {
            out.reverse();
        }
        out.dedup_by(|a, b| a.1.rowid == b.1.rowid);
        out.into_iter().map(|(_, row)| row).collect()
    }

    fn scan_committed(&self, range: &KeyRange, desc: bool) -> Vec<Row> {
        let state = self.state.borrow();
        let mut out: Vec<Row> = state
            .rows
            .iter()
            .filter(|(key, _)| range.contains(key))
            .map(|(_, row)| row.clone())
            .collect();
        if desc {
            out.reverse();
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
struct KeyRange {
    lower: Option<Value>,
    lower_inclusive: bool,
    upper: Option<Value>,
    upper_inclusive: bool,
}

impl KeyRange {
    fn contains(&self, key: &RowKey) -> bool {
        let Some(first) = key.0.first() else {
            return true;
        };
        if let Some(lo) = &self.lower {
            let ord = first.compare(lo, Collation::Binary);
            if ord == std::cmp::Ordering::Less
                || (!self.lower_inclusive && ord == std::cmp::Ordering::Equal)
            {
                return false;
            }
        }
        if let Some(hi) = &self.upper {
            let ord = first.compare(hi, Collation::Binary);
            if ord == std::cmp::Ordering::Greater
                || (!self.upper_inclusive && ord == std::cmp::Ordering::Equal)
            {
                return false;
            }
        }
        true
    }
}

/// `idx_str` token format emitted by `MemTable::best_index`: a
/// comma-separated list of `<column-index-or--1-for-rowid>:<op>` in argv
/// order, parsed back by `filter`.
fn encode_idx_str(tokens: &[(i64, &str)]) -> Option<String> {
    if tokens.is_empty() {
        None
    } else {
        Some(
            tokens
                .iter()
                .map(|(c, op)| format!("{c}:{op}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

fn parse_idx_str(idx_str: Option<&str>, args: &[Value]) -> KeyRange {
    let mut range = KeyRange::default();
    let Some(idx_str) = idx_str else {
        return range;
    };
    for (i, token) in idx_str.split(',').enumerate() {
        let Some((_, op)) = token.split_once(':') else {
            continue;
        };
        let Some(val) = args.get(i) else { continue };
        match op {
            "eq" => {
                range.lower = Some(val.clone());
                range.lower_inclusive = true;
                range.upper = Some(val.clone());
                range.upper_inclusive = true;
            }
            "ge" => {
                range.lower = Some(val.clone());
                range.lower_inclusive = true;
            }
            "gt" => {
                range.lower = Some(val.clone());
                range.lower_inclusive = false;
            }
            "le" => {
                range.upper = Some(val.clone());
                range.upper_inclusive = true;
            }
            "lt" => {
                range.upper = Some(val.clone());
                range.upper_inclusive = false;
            }
            _ => {}
        }
    }
    range
}

pub struct MemTableCursor {
    table: Rc<MemTable>,
    rows: Vec<Row>,
    position: usize,
}

impl VTabCursor for MemTableCursor {
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &[Value]) -> Result<()> {
        let desc = idx_num & 1 != 0;
        let range = parse_idx_str(idx_str, args);
        let in_txn = self.table.state.borrow().in_transaction;
        self.rows = if in_txn {
            self.table.scan_transactional(&range, desc)
        } else {
            self.table.scan_committed(&range, desc)
        };
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.position += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.position >= self.rows.len()
    }

    fn column(&self, i: usize) -> Result<Value> {
        self.rows
            .get(self.position)
            .and_then(|r| r.values.get(i))
            .cloned()
            .ok_or_else(|| Error::internal("cursor column index out of range"))
    }

    fn rowid(&self) -> Result<i64> {
        self.rows
            .get(self.position)
            .map(|r| r.rowid)
            .ok_or_else(|| Error::internal("cursor has no current row"))
    }

    fn seek_relative(&mut self, n: i64) -> Result<bool> {
        let target = self.position as i64 + n;
        if target < 0 || target as usize >= self.rows.len() {
            self.position = self.rows.len();
            return Ok(false);
        }
        self.position = target as usize;
        Ok(true)
    }

    fn seek_to_rowid(&mut self, rowid: i64) -> Result<bool> {
        match self.rows.iter().position(|r| r.rowid == rowid) {
            Some(idx) => {
                self.position = idx;
                Ok(true)
            }
            None => {
                self.position = self.rows.len();
                Ok(false)
            }
        }
    }
}

impl VTable for MemTable {
    fn columns(&self) -> Vec<Column> {
        self.state.borrow().columns.clone()
    }

    fn primary_key(&self) -> Vec<PrimaryKeyColumn> {
        self.state.borrow().primary_key.clone()
    }

    fn open(&self) -> Result<Box<dyn VTabCursor>> {
        Err(Error::internal(
            "MemTable::open must be called through Rc<MemTable>::open_shared",
        ))
    }

    fn best_index(&self, constraints: &[ConstraintInfo], order_by: &[OrderByInfo]) -> IndexInfo {
        let state = self.state.borrow();
        let pk_cols: Vec<usize> = state.primary_key.iter().map(|pk| pk.column_index).collect();
        let single_key_col: Option<i64> = if pk_cols.len() == 1 {
            Some(pk_cols[0] as i64)
        } else if pk_cols.is_empty() {
            Some(-1)
        } else {
            None
        };

        let mut usages = vec![ConstraintUsage::default(); constraints.len()];
        let mut tokens: Vec<(i64, &str)> = Vec::new();
        let mut argv = 0usize;
        let mut cost = 1_000_000.0f64;
        let mut rows = (state.rows.len() + state.buffers.pending_inserts.len()) as u64;

        if let Some(key_col) = single_key_col {
            for (i, c) in constraints.iter().enumerate() {
                if !c.usable {
                    continue;
                }
                let col_matches = match c.column_index {
                    ColumnRef::Rowid => key_col == -1 || (pk_cols.len() == 1 && state.rowid_is_pk()),
                    ColumnRef::Column(ci) => ci as i64 == key_col,
                };
                if !col_matches {
                    continue;
                }
                let op = match c.op {
                    ConstraintOp::Eq => "eq",
                    ConstraintOp::Ge => "ge",
                    ConstraintOp::Gt => "gt",
                    ConstraintOp::Le => "le",
                    ConstraintOp::Lt => "lt",
                    ConstraintOp::IsNull | ConstraintOp::IsNotNull => continue,
                };
                argv += 1;
                usages[i] = ConstraintUsage {
                    argv_index: Some(argv),
                    omit: true,
                };
                tokens.push((key_col, op));
                cost = if op == "eq" { 1.0 } else { cost.min(rows.max(1) as f64 / 2.0) };
                if op == "eq" {
                    rows = 1;
                }
            }
        }

        let mut idx_num = 0i32;
        let mut order_by_consumed = false;
        if let (Some(key_col), Some(ob)) = (single_key_col, order_by.first()) {
            if order_by.len() == 1 && ob.column_index as i64 == key_col.max(0) {
                order_by_consumed = true;
                if ob.desc {
                    idx_num |= 1;
                }
            }
        }

        IndexInfo {
            idx_num,
            idx_str: encode_idx_str(&tokens),
            constraint_usages: usages,
            estimated_cost: cost,
            estimated_rows: rows,
            order_by_consumed,
        }
    }

    fn update(&self, values: &[Value], conflict: ConflictPolicy) -> Result<UpdateOutcome> {
        self.lock("update", || {
            let rowid_slot = &values[0];
            if values.len() == 1 {
                let Value::Integer(rowid) = rowid_slot else {
                    return Err(Error::Type {
                        message: "DELETE requires an integer rowid".into(),
                    });
                };
                return self.delete_row(*rowid);
            }
            let cols = values[1..].to_vec();
            match rowid_slot {
                Value::Null => self.add_row(cols, conflict),
                Value::Integer(rowid) => self.update_row(*rowid, cols, conflict),
                _ => Err(Error::Type {
                    message: "rowid slot must be NULL or an integer".into(),
                }),
            }
        })
    }

    fn begin(&self) -> Result<()> {
        with_table_lock("begin", &self.schema_name, &self.table_name, || {
            let mut state = self.state.borrow_mut();
            if state.in_transaction {
                return Err(Error::misuse("transaction already in progress"));
            }
            state.in_transaction = true;
            state.buffers = TxnBuffers::default();
            state.savepoints.clear();
            Ok(())
        })
    }

    fn commit(&self) -> Result<()> {
        with_table_lock("commit", &self.schema_name, &self.table_name, || {
            let mut state = self.state.borrow_mut();
            if !state.in_transaction {
                return Ok(());
            }
            let buffers = std::mem::take(&mut state.buffers);
            for (rowid, delete) in buffers.pending_deletes {
                if state.rows.remove(&delete.old_key).is_none() {
                    tracing::error!(table = %self.table_name, rowid, "commit: delete target missing, skipping");
                }
                state.rowid_to_key.remove(&rowid);
            }
            for (rowid, update) in buffers.pending_updates {
                if state.rows.remove(&update.old_key).is_none() {
                    tracing::error!(table = %self.table_name, rowid, "commit: update target missing, skipping");
                    continue;
                }
                let needs_map = state.needs_rowid_map();
                state.rows.insert(update.new_key.clone(), update.new_row);
                if needs_map {
                    state.rowid_to_key.insert(rowid, update.new_key);
                } else {
                    state.rowid_to_key.remove(&rowid);
                }
            }
            for (key, row) in buffers.pending_inserts {
                let needs_map = state.needs_rowid_map();
                let rowid = row.rowid;
                if needs_map {
                    state.rowid_to_key.insert(rowid, key.clone());
                }
                state.rows.insert(key, row);
            }
            state.in_transaction = false;
            state.savepoints.clear();
            Ok(())
        })
    }

    fn rollback(&self) -> Result<()> {
        with_table_lock("rollback", &self.schema_name, &self.table_name, || {
            let mut state = self.state.borrow_mut();
            state.in_transaction = false;
            state.buffers = TxnBuffers::default();
            state.savepoints.clear();
            Ok(())
        })
    }

    fn savepoint(&self, index: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        while state.savepoints.len() <= index {
            let snapshot = state.buffers.clone();
            state.savepoints.push(snapshot);
        }
        state.savepoints[index] = state.buffers.clone();
        Ok(())
    }

    fn release(&self, index: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.savepoints.truncate(index);
        Ok(())
    }

    fn rollback_to(&self, index: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let snapshot = state
            .savepoints
            .get(index)
            .cloned()
            .ok_or_else(|| Error::internal("rollback_to: no such savepoint"))?;
        state.buffers = snapshot;
        state.savepoints.truncate(index + 1);
        Ok(())
    }

    /// ADD COLUMN/DROP COLUMN/RENAME COLUMN against the live table.
    /// Dropping or renaming a primary-key column is rejected outright
    /// rather than re-keying every row (SPEC_FULL.md §5 open question).
    fn alter_schema(&self, change: &crate::vtab::SchemaChange) -> Result<()> {
        use crate::vtab::SchemaChange;
        let mut state = self.state.borrow_mut();
        match change {
            SchemaChange::AddColumn(col) => {
                state.columns.push(col.clone());
                for row in state.rows.values_mut() {
                    row.values.push(Value::Null);
                }
                for row in state.buffers.pending_inserts.values_mut() {
                    row.values.push(Value::Null);
                }
                for u in state.buffers.pending_updates.values_mut() {
                    u.old_row.values.push(Value::Null);
                    u.new_row.values.push(Value::Null);
                }
                Ok(())
            }
            SchemaChange::DropColumn(name) => {
                let idx = state
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| Error::not_found(format!("no such column: {name}")))?;
                if state.primary_key.iter().any(|pk| pk.column_index == idx) {
                    return Err(Error::misuse(
                        "cannot drop a column that is part of the primary key",
                    ));
                }
                state.columns.remove(idx);
                for pk in state.primary_key.iter_mut() {
                    if pk.column_index > idx {
                        pk.column_index -= 1;
                    }
                }
                for row in state.rows.values_mut() {
                    row.values.remove(idx);
                }
                for row in state.buffers.pending_inserts.values_mut() {
                    row.values.remove(idx);
                }
                for u in state.buffers.pending_updates.values_mut() {
                    u.old_row.values.remove(idx);
                    u.new_row.values.remove(idx);
                }
                Ok(())
            }
            SchemaChange::RenameColumn { from, to } => {
                let idx = state
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(from))
                    .ok_or_else(|| Error::not_found(format!("no such column: {from}")))?;
                if state.primary_key.iter().any(|pk| pk.column_index == idx) {
                    return Err(Error::misuse(
                        "cannot rename a column that is part of the primary key",
                    ));
                }
                state.columns[idx].name = to.clone();
                Ok(())
            }
        }
    }
}

impl MemTable {
    /// Separate from the `VTable::open` trait method because the cursor
    /// needs a strong ref back to the table to borrow its state on
    /// `filter`, which requires the table to already be `Rc`-wrapped.
    pub fn open_shared(table: &Rc<MemTable>) -> Box<dyn VTabCursor> {
        Box::new(MemTableCursor {
            table: table.clone(),
            rows: Vec::new(),
            position: 0,
        })
    }
}

/// The module that creates/connects `MemTable` instances (spec §4.3).
/// Registered under the name `"mem"`.
pub struct MemTableModule;

impl VTabModule for MemTableModule {
    fn name(&self) -> &str {
        "mem"
    }

    fn create(&self, schema: &str, table: &str, options: &CreateOptions) -> Result<Rc<dyn VTable>> {
        let t = Rc::new(MemTable::new(
            schema,
            table,
            options.columns.clone(),
            options.primary_key.clone(),
        ));
        Ok(shared_vtable(t))
    }

    fn connect(&self, schema: &str, table: &str, options: &CreateOptions) -> Result<Rc<dyn VTable>> {
        self.create(schema, table, options)
    }
}

/// Wraps `Rc<MemTable>` so it satisfies `Rc<dyn VTable>` while still
/// allowing cursors to hold the concrete `Rc<MemTable>` they need for
/// `open_shared`.
struct SharedMemTable(Rc<MemTable>);

impl VTable for SharedMemTable {
    fn columns(&self) -> Vec<Column> {
        self.0.columns()
    }
    fn primary_key(&self) -> Vec<PrimaryKeyColumn> {
        self.0.primary_key()
    }
    fn open(&self) -> Result<Box<dyn VTabCursor>> {
        Ok(MemTable::open_shared(&self.0))
    }
    fn best_index(&self, constraints: &[ConstraintInfo], order_by: &[OrderByInfo]) -> IndexInfo {
        self.0.best_index(constraints, order_by)
    }
    fn update(&self, values: &[Value], conflict: ConflictPolicy) -> Result<UpdateOutcome> {
        self.0.update(values, conflict)
    }
    fn begin(&self) -> Result<()> {
        self.0.begin()
    }
    fn commit(&self) -> Result<()> {
        self.0.commit()
    }
    fn rollback(&self) -> Result<()> {
        self.0.rollback()
    }
    fn savepoint(&self, index: usize) -> Result<()> {
        self.0.savepoint(index)
    }
    fn release(&self, index: usize) -> Result<()> {
        self.0.release(index)
    }
    fn rollback_to(&self, index: usize) -> Result<()> {
        self.0.rollback_to(index)
    }
    fn alter_schema(&self, change: &crate::vtab::SchemaChange) -> Result<()> {
        self.0.alter_schema(change)
    }
}

fn shared_vtable(t: Rc<MemTable>) -> Rc<dyn VTable> {
    Rc::new(SharedMemTable(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PrimaryKeyColumn;
    use crate::value::Affinity;

    fn table() -> Rc<MemTable> {
        Rc::new(MemTable::new(
            "main",
            "t",
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
        ))
    }

    fn scan(t: &Rc<MemTable>) -> Vec<(i64, String)> {
        let mut cursor = MemTable::open_shared(t);
        cursor.filter(0, None, &[]).unwrap();
        let mut out = Vec::new();
        while !cursor.eof() {
            let Value::Integer(a) = cursor.column(0).unwrap() else {
                unreachable!()
            };
            let Value::Text(b) = cursor.column(1).unwrap() else {
                unreachable!()
            };
            out.push((a, b));
            cursor.next().unwrap();
        }
        out
    }

    #[test]
    fn insert_then_scan_round_trips() {
        let t = table();
        t.update(
            &[Value::Null, Value::Integer(1), Value::Text("x".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        t.update(
            &[Value::Null, Value::Integer(2), Value::Text("y".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        assert_eq!(scan(&t), vec![(1, "x".into()), (2, "y".into())]);
    }

    #[test]
    fn uniqueness_enforced_outside_txn() {
        let t = table();
        t.update(
            &[Value::Null, Value::Integer(1), Value::Text("x".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        let err = t
            .update(
                &[Value::Null, Value::Integer(1), Value::Text("z".into())],
                ConflictPolicy::Abort,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Constraint { .. }));
        let outcome = t
            .update(
                &[Value::Null, Value::Integer(1), Value::Text("z".into())],
                ConflictPolicy::Ignore,
            )
            .unwrap();
        assert!(outcome.ignored);
        assert_eq!(scan(&t), vec![(1, "x".into())]);
    }

    #[test]
    fn transaction_isolation_and_rollback() {
        let t = table();
        t.update(
            &[Value::Null, Value::Integer(1), Value::Text("x".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        t.begin().unwrap();
        t.update(
            &[Value::Null, Value::Integer(2), Value::Text("y".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        assert_eq!(scan(&t), vec![(1, "x".into()), (2, "y".into())]);
        t.rollback().unwrap();
        assert_eq!(scan(&t), vec![(1, "x".into())]);
    }

    #[test]
    fn savepoint_nesting() {
        let t = table();
        t.begin().unwrap();
        t.update(
            &[Value::Null, Value::Integer(3), Value::Text("c".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        t.savepoint(0).unwrap();
        t.update(
            &[Value::Null, Value::Integer(4), Value::Text("d".into())],
            ConflictPolicy::Abort,
        )
        .unwrap();
        t.rollback_to(0).unwrap();
        t.commit().unwrap();
        assert_eq!(scan(&t), vec![(3, "c".into())]);
    }

    #[test]
    fn empty_transaction_is_noop() {
        let t = table();
        t.begin().unwrap();
        t.commit().unwrap();
        assert_eq!(scan(&t), vec![]);
        t.begin().unwrap();
        t.rollback().unwrap();
        assert_eq!(scan(&t), vec![]);
    }

    #[test]
    fn best_index_is_deterministic() {
        let t = table();
        let constraints = vec![ConstraintInfo {
            column_index: ColumnRef::Column(0),
            op: ConstraintOp::Eq,
            usable: true,
        }];
        let a = t.best_index(&constraints, &[]);
        let b = t.best_index(&constraints, &[]);
        assert_eq!(a.idx_num, b.idx_num);
        assert_eq!(a.idx_str, b.idx_str);
        assert_eq!(
            a.constraint_usages.len(),
            b.constraint_usages.len()
        );
    }
}

//! C8: the statement façade — `Database`, `Connection`, `Statement`
//! (spec §4.8). Prepare compiles via `translate::compile`; `SELECT`/
//! `INSERT`/`UPDATE`/`DELETE` run through a `Vm`, while DDL/transaction-
//! control/pragma statements (`translate::DirectStmt`) have no bytecode
//! and are applied the moment they're prepared.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{AlterAction, DropKind, ParamRef, Stmt};
use crate::error::{Error, Result};
use crate::function::FunctionRegistry;
use crate::mem_table::MemTableModule;
use crate::schema::{affinity_from_decl, new_table_descriptor, Column, IndexDescriptor, PrimaryKeyColumn, Schema, TableFlags};
use crate::translate::{self, CompiledStatement, DirectStmt, ParamSlot};
use crate::value::Value;
use crate::vdbe::{Program, StepResult as VStepResult, Vm};
use crate::vtab::{CreateOptions, ModuleRegistry, SchemaChange, VTabModule};

/// Builder/factory for connections: owns the installed module registry and
/// the default function set, analogous to the teacher's top-level
/// `Database` handle. Cheap to `connect()` from repeatedly; every
/// connection gets its own `Schema`.
pub struct Database {
    modules: ModuleRegistry,
    functions: Rc<FunctionRegistry>,
    default_vtab_module: String,
    default_vtab_args: Vec<String>,
}

impl Database {
    /// A database with the `mem` module and the built-in function set
    /// installed (spec §4.4/§6).
    pub fn new() -> Self {
        let mut modules = ModuleRegistry::new();
        modules.register(Rc::new(MemTableModule));
        Database {
            modules,
            functions: Rc::new(FunctionRegistry::with_builtins()),
            default_vtab_module: "mem".to_string(),
            default_vtab_args: Vec::new(),
        }
    }

    pub fn register_module(&mut self, module: Rc<dyn VTabModule>) {
        self.modules.register(module);
    }

    pub fn set_default_vtab_module(&mut self, name: impl Into<String>, args: Vec<String>) {
        self.default_vtab_module = name.into();
        self.default_vtab_args = args;
    }

    pub fn connect(&self) -> Connection {
        let mut schema = Schema::new();
        schema.default_vtab_module = self.default_vtab_module.clone();
        schema.default_vtab_args = self.default_vtab_args.clone();
        Connection {
            schema,
            modules: self.modules.clone(),
            functions: Rc::clone(&self.functions),
            in_transaction: false,
            savepoints: Vec::new(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// One connection's schema plus transaction state. Transactions in this
/// build span every table the connection knows about rather than tracking
/// per-statement table sets (SPEC_FULL.md open-question decision,
/// DESIGN.md).
pub struct Connection {
    schema: Schema,
    modules: ModuleRegistry,
    functions: Rc<FunctionRegistry>,
    in_transaction: bool,
    savepoints: Vec<String>,
}

impl Connection {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Compiles `stmt`. `SELECT`/`INSERT`/`UPDATE`/`DELETE` return a
    /// `Statement` ready to bind/step; DDL, transaction control, and
    /// `PRAGMA` are applied immediately and return a `Statement` whose
    /// `step()` always reports `Done`.
    pub fn prepare(&mut self, stmt: &Stmt) -> Result<Statement> {
        tracing::debug!(?stmt, "preparing statement");
        match translate::compile(&self.schema, &self.functions, stmt)? {
            CompiledStatement::Query { program, column_names, params } => {
                let vm = Vm::new(program, Rc::clone(&self.functions));
                Ok(Statement::query(vm, column_names, params))
            }
            CompiledStatement::Write { program, params } => {
                let vm = Vm::new(program, Rc::clone(&self.functions));
                Ok(Statement::write(vm, params))
            }
            CompiledStatement::Direct(direct) => {
                self.apply_direct(&direct)?;
                Ok(Statement::direct())
            }
        }
    }

    fn vtable_for(&self, table: &str) -> Result<(Rc<crate::schema::TableDescriptor>, Rc<dyn crate::vtab::VTable>)> {
        let desc = self.schema.get_table(table).ok_or_else(|| Error::compile(format!("no such table: {table}")))?;
        let vtable = desc
            .table
            .clone()
            .ok_or_else(|| Error::internal(format!("table {table} has no storage module attached")))?;
        Ok((desc, vtable))
    }

    fn apply_direct(&mut self, direct: &DirectStmt) -> Result<()> {
        match direct {
            DirectStmt::CreateTable(stmt) => self.create_table(stmt),
            DirectStmt::CreateView(stmt) => self.create_view(stmt),
            DirectStmt::CreateIndex(stmt) => self.create_index(stmt),
            DirectStmt::Drop(stmt) => self.drop_object(stmt),
            DirectStmt::AlterTable(stmt) => self.alter_table(stmt),
            DirectStmt::Begin => self.begin(),
            DirectStmt::Commit => self.commit(),
            DirectStmt::Rollback { savepoint } => self.rollback(savepoint.as_deref()),
            DirectStmt::Savepoint(name) => self.savepoint(name),
            DirectStmt::Release(name) => self.release(name),
            DirectStmt::Pragma(p) => translate::pragma::apply_pragma(&mut self.schema, p),
        }
    }

    fn create_table(&mut self, stmt: &crate::ast::CreateTableStmt) -> Result<()> {
        if self.schema.get_table(&stmt.name).is_some() {
            return if stmt.if_not_exists {
                Ok(())
            } else {
                Err(Error::compile(format!("table {} already exists", stmt.name)))
            };
        }
        let module_name = stmt.module_name.clone().unwrap_or_else(|| self.schema.default_vtab_module.clone());
        let module = self
            .modules
            .get(&module_name)
            .ok_or_else(|| Error::misuse(format!("no such module: {module_name}")))?;

        let columns: Vec<Column> = stmt
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                affinity: affinity_from_decl(c.affinity_decl.as_deref()),
                not_null: c.not_null,
                hidden: false,
            })
            .collect();
        let primary_key: Vec<PrimaryKeyColumn> = stmt
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, c)| PrimaryKeyColumn { column_index: i, desc: c.pk_desc })
            .collect();
        let args = if stmt.module_args.is_empty() {
            self.schema.default_vtab_args.clone()
        } else {
            stmt.module_args.clone()
        };
        let options = CreateOptions { args: args.clone(), columns: columns.clone(), primary_key: primary_key.clone() };
        let schema_name = stmt.schema.as_deref().unwrap_or("main");
        let table = module.create(schema_name, &stmt.name, &options)?;

        let mut flags = TableFlags::empty();
        if stmt.strict {
            flags |= TableFlags::STRICT;
        }
        if stmt.without_rowid {
            flags |= TableFlags::WITHOUT_ROWID;
        }
        if stmt.temporary {
            flags |= TableFlags::TEMPORARY;
        }

        let mut desc = new_table_descriptor(stmt.name.clone(), columns, primary_key, flags);
        desc.module_name = Some(module_name);
        desc.module_args = args;
        desc.table = Some(table);
        self.schema.add_table(desc)
    }

    fn create_view(&mut self, stmt: &crate::ast::CreateViewStmt) -> Result<()> {
        if self.schema.get_table(&stmt.name).is_some() {
            return if stmt.if_not_exists {
                Ok(())
            } else {
                Err(Error::compile(format!("table or view {} already exists", stmt.name)))
            };
        }
        let mut desc = new_table_descriptor(stmt.name.clone(), Vec::new(), Vec::new(), TableFlags::VIEW);
        desc.view_select = Some((*stmt.select).clone());
        self.schema.add_view(desc)
    }

    fn create_index(&mut self, stmt: &crate::ast::CreateIndexStmt) -> Result<()> {
        let (desc, vtable) = self.vtable_for(&stmt.table)?;
        if desc.indexes.iter().any(|ix| ix.name.eq_ignore_ascii_case(&stmt.name)) {
            return if stmt.if_not_exists {
                Ok(())
            } else {
                Err(Error::compile(format!("index {} already exists", stmt.name)))
            };
        }
        let columns = stmt
            .columns
            .iter()
            .map(|(name, order)| {
                desc.column_index(name)
                    .map(|i| (i, *order == crate::ast::SortOrder::Desc))
                    .ok_or_else(|| Error::compile(format!("no such column: {name}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let index = IndexDescriptor { name: stmt.name.clone(), table: stmt.table.clone(), columns, unique: stmt.unique };
        vtable.create_index(&index)?;
        self.schema.with_table_mut(&stmt.table, |d| d.indexes.push(index))?;
        Ok(())
    }

    fn drop_object(&mut self, stmt: &crate::ast::DropStmt) -> Result<()> {
        match stmt.kind {
            DropKind::Table => match self.schema.get_table(&stmt.name) {
                Some(desc) if !desc.is_view() => {
                    if let Some(t) = &desc.table {
                        t.destroy()?;
                    }
                    self.schema.drop_table(&stmt.name)
                }
                Some(_) => Err(Error::compile(format!("{} is a view, not a table", stmt.name))),
                None if stmt.if_exists => Ok(()),
                None => Err(Error::not_found(format!("no such table: {}", stmt.name))),
            },
            DropKind::View => match self.schema.get_table(&stmt.name) {
                Some(desc) if desc.is_view() => self.schema.drop_view(&stmt.name),
                Some(_) => Err(Error::compile(format!("{} is a table, not a view", stmt.name))),
                None if stmt.if_exists => Ok(()),
                None => Err(Error::not_found(format!("no such view: {}", stmt.name))),
            },
            DropKind::Index => {
                let owner = self
                    .schema
                    .all_tables()
                    .into_iter()
                    .find(|d| d.indexes.iter().any(|ix| ix.name.eq_ignore_ascii_case(&stmt.name)));
                match owner {
                    Some(desc) => {
                        if let Some(t) = &desc.table {
                            t.drop_index(&stmt.name)?;
                        }
                        let table_name = desc.name.clone();
                        self.schema
                            .with_table_mut(&table_name, |d| d.indexes.retain(|ix| !ix.name.eq_ignore_ascii_case(&stmt.name)))?;
                        Ok(())
                    }
                    None if stmt.if_exists => Ok(()),
                    None => Err(Error::not_found(format!("no such index: {}", stmt.name))),
                }
            }
        }
    }

    fn alter_table(&mut self, stmt: &crate::ast::AlterTableStmt) -> Result<()> {
        let (_, vtable) = self.vtable_for(&stmt.table)?;
        match &stmt.action {
            AlterAction::AddColumn(col_def) => {
                let col = Column {
                    name: col_def.name.clone(),
                    affinity: affinity_from_decl(col_def.affinity_decl.as_deref()),
                    not_null: col_def.not_null,
                    hidden: false,
                };
                vtable.alter_schema(&SchemaChange::AddColumn(col.clone()))?;
                self.schema.with_table_mut(&stmt.table, |d| d.columns.push(col))?;
                Ok(())
            }
            AlterAction::DropColumn(name) => {
                vtable.alter_schema(&SchemaChange::DropColumn(name.clone()))?;
                self.schema.with_table_mut(&stmt.table, |d| {
                    if let Some(idx) = d.column_index(name) {
                        d.columns.remove(idx);
                        for pk in d.primary_key.iter_mut() {
                            if pk.column_index > idx {
                                pk.column_index -= 1;
                            }
                        }
                    }
                })?;
                Ok(())
            }
            AlterAction::RenameColumn { from, to } => {
                vtable.alter_schema(&SchemaChange::RenameColumn { from: from.clone(), to: to.clone() })?;
                self.schema.with_table_mut(&stmt.table, |d| {
                    if let Some(idx) = d.column_index(from) {
                        d.columns[idx].name = to.clone();
                    }
                })?;
                Ok(())
            }
            AlterAction::RenameTable(new_name) => self.schema.rename_table(&stmt.table, new_name),
        }
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::misuse("transaction already in progress"));
        }
        for desc in self.schema.all_tables() {
            if let Some(t) = &desc.table {
                t.begin()?;
            }
        }
        self.in_transaction = true;
        self.savepoints.clear();
        tracing::info!("transaction begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        for desc in self.schema.all_tables() {
            if let Some(t) = &desc.table {
                t.commit()?;
            }
        }
        self.in_transaction = false;
        self.savepoints.clear();
        tracing::info!("transaction commit");
        Ok(())
    }

    fn rollback(&mut self, savepoint: Option<&str>) -> Result<()> {
        match savepoint {
            Some(name) => {
                let idx = self
                    .savepoints
                    .iter()
                    .position(|s| s == name)
                    .ok_or_else(|| Error::not_found(format!("no such savepoint: {name}")))?;
                for desc in self.schema.all_tables() {
                    if let Some(t) = &desc.table {
                        t.rollback_to(idx)?;
                    }
                }
                self.savepoints.truncate(idx + 1);
                Ok(())
            }
            None => {
                for desc in self.schema.all_tables() {
                    if let Some(t) = &desc.table {
                        t.rollback()?;
                    }
                }
                self.in_transaction = false;
                self.savepoints.clear();
                tracing::info!("transaction rollback");
                Ok(())
            }
        }
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::misuse("SAVEPOINT requires an active transaction"));
        }
        self.savepoints.push(name.to_string());
        let idx = self.savepoints.len() - 1;
        for desc in self.schema.all_tables() {
            if let Some(t) = &desc.table {
                t.savepoint(idx)?;
            }
        }
        Ok(())
    }

    fn release(&mut self, name: &str) -> Result<()> {
        let idx = self
            .savepoints
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| Error::not_found(format!("no such savepoint: {name}")))?;
        for desc in self.schema.all_tables() {
            if let Some(t) = &desc.table {
                t.release(idx)?;
            }
        }
        self.savepoints.truncate(idx);
        Ok(())
    }
}

enum StmtKind {
    Query { vm: Vm, column_names: Vec<String>, params: Vec<ParamSlot> },
    Write { vm: Vm, params: Vec<ParamSlot> },
    /// Already applied when the statement was prepared; stepping it is a
    /// formality that reports `Done`.
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Row,
    Done,
}

/// A prepared statement (spec §4.8). `SELECT`/`INSERT`/`UPDATE`/`DELETE`
/// drive a `Vm`; DDL/transaction-control/pragma statements are inert
/// (already applied by `Connection::prepare`).
pub struct Statement {
    kind: StmtKind,
    bindings: HashMap<ParamRef, Value>,
    finalized: bool,
}

impl Statement {
    fn query(vm: Vm, column_names: Vec<String>, params: Vec<ParamSlot>) -> Self {
        Statement { kind: StmtKind::Query { vm, column_names, params }, bindings: HashMap::new(), finalized: false }
    }

    fn write(vm: Vm, params: Vec<ParamSlot>) -> Self {
        Statement { kind: StmtKind::Write { vm, params }, bindings: HashMap::new(), finalized: false }
    }

    fn direct() -> Self {
        Statement { kind: StmtKind::Direct, bindings: HashMap::new(), finalized: false }
    }

    pub fn column_names(&self) -> &[String] {
        match &self.kind {
            StmtKind::Query { column_names, .. } => column_names,
            _ => &[],
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::misuse("statement is finalized"));
        }
        Ok(())
    }

    /// Bind by position or by name (spec §4.8). Binding a name the
    /// compiled program never referenced is accepted and simply unused,
    /// the same way SQLite tolerates over-binding.
    pub fn bind(&mut self, param: ParamRef, value: Value) -> Result<()> {
        self.check_open()?;
        if let StmtKind::Query { vm, params, .. } | StmtKind::Write { vm, params, .. } = &mut self.kind {
            if let Some(slot) = params.iter().find(|s| s.param == param) {
                vm.set_register(slot.register, value.clone());
            }
        }
        self.bindings.insert(param, value);
        Ok(())
    }

    /// Rewinds to the start of the program, re-applying whatever bindings
    /// are currently in effect (a bare `Vm::reset` would zero them).
    pub fn reset(&mut self) -> Result<()> {
        self.check_open()?;
        match &mut self.kind {
            StmtKind::Query { vm, .. } | StmtKind::Write { vm, .. } => vm.reset(),
            StmtKind::Direct => {}
        }
        for (param, value) in self.bindings.clone() {
            if let StmtKind::Query { vm, params, .. } | StmtKind::Write { vm, params, .. } = &mut self.kind {
                if let Some(slot) = params.iter().find(|s| s.param == param) {
                    vm.set_register(slot.register, value);
                }
            }
        }
        Ok(())
    }

    pub fn step(&mut self) -> Result<StepOutcome> {
        self.check_open()?;
        match &mut self.kind {
            StmtKind::Direct => Ok(StepOutcome::Done),
            StmtKind::Query { vm, .. } | StmtKind::Write { vm, .. } => match vm.step() {
                Ok(VStepResult::Row) => Ok(StepOutcome::Row),
                Ok(VStepResult::Done) => Ok(StepOutcome::Done),
                Err(e) => {
                    tracing::warn!(error = %e, "statement halted with an error");
                    Err(e)
                }
            },
        }
    }

    pub fn row(&self) -> &[Value] {
        match &self.kind {
            StmtKind::Query { vm, .. } | StmtKind::Write { vm, .. } => vm.row(),
            StmtKind::Direct => &[],
        }
    }

    /// A hard close (spec §4.8): after this, every other method returns
    /// `Error::Misuse`.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Binds `params`, steps to completion, discards any rows.
    pub fn run(&mut self, params: &[(ParamRef, Value)]) -> Result<()> {
        self.reset()?;
        for (p, v) in params {
            self.bind(p.clone(), v.clone())?;
        }
        loop {
            if self.step()? == StepOutcome::Done {
                return Ok(());
            }
        }
    }

    /// Binds `params`, returns the first row (or `None` for an empty
    /// result / a write statement).
    pub fn get(&mut self, params: &[(ParamRef, Value)]) -> Result<Option<Vec<Value>>> {
        self.reset()?;
        for (p, v) in params {
            self.bind(p.clone(), v.clone())?;
        }
        match self.step()? {
            StepOutcome::Row => Ok(Some(self.row().to_vec())),
            StepOutcome::Done => Ok(None),
        }
    }

    /// Binds `params`, materializes every row.
    pub fn all(&mut self, params: &[(ParamRef, Value)]) -> Result<Vec<Vec<Value>>> {
        self.reset()?;
        for (p, v) in params {
            self.bind(p.clone(), v.clone())?;
        }
        let mut rows = Vec::new();
        loop {
            match self.step()? {
                StepOutcome::Row => rows.push(self.row().to_vec()),
                StepOutcome::Done => return Ok(rows),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::value::Value;

    fn create_t(conn: &mut Connection) {
        let stmt = Stmt::CreateTable(CreateTableStmt {
            schema: None,
            name: "t".into(),
            columns: vec![
                ColumnDef { name: "a".into(), affinity_decl: Some("INTEGER".into()), primary_key: true, pk_desc: false, not_null: false },
                ColumnDef { name: "b".into(), affinity_decl: Some("TEXT".into()), primary_key: false, pk_desc: false, not_null: false },
            ],
            is_virtual: false,
            module_name: None,
            module_args: vec![],
            strict: false,
            without_rowid: false,
            temporary: false,
            if_not_exists: false,
        });
        conn.prepare(&stmt).unwrap().step().unwrap();
    }

    fn insert(conn: &mut Connection, a: i64, b: &str) {
        let stmt = Stmt::Insert(InsertStmt {
            table: "t".into(),
            columns: vec![],
            values: vec![vec![Expr::Literal(Value::Integer(a)), Expr::Literal(Value::Text(b.into()))]],
            select: None,
            or_conflict: None,
            returning: vec![],
        });
        conn.prepare(&stmt).unwrap().run(&[]).unwrap();
    }

    #[test]
    fn duplicate_primary_key_is_rejected_not_auto_assigned() {
        let db = Database::new();
        let mut conn = db.connect();
        create_t(&mut conn);
        insert(&mut conn, 1, "x");

        let dup = Stmt::Insert(InsertStmt {
            table: "t".into(),
            columns: vec![],
            values: vec![vec![Expr::Literal(Value::Integer(1)), Expr::Literal(Value::Text("z".into()))]],
            select: None,
            or_conflict: None,
            returning: vec![],
        });
        let err = conn.prepare(&dup).unwrap().run(&[]).unwrap_err();
        assert!(matches!(err, Error::Constraint { .. }));

        let dup_ignored = Stmt::Insert(InsertStmt {
            table: "t".into(),
            columns: vec![],
            values: vec![vec![Expr::Literal(Value::Integer(1)), Expr::Literal(Value::Text("z".into()))]],
            select: None,
            or_conflict: Some(ConflictClause::Ignore),
            returning: vec![],
        });
        conn.prepare(&dup_ignored).unwrap().run(&[]).unwrap();

        let select = Stmt::Select(SelectStmt {
            columns: vec![ResultColumn { expr: Expr::Column { table: None, name: "b".into() }, alias: None }],
            from: Some(FromClause { first: TableRef { schema: None, name: "t".into(), alias: None }, joins: vec![] }),
            ..Default::default()
        });
        let rows = conn.prepare(&select).unwrap().all(&[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Text("x".into())]]);
    }

    #[test]
    fn create_insert_select_end_to_end() {
        let db = Database::new();
        let mut conn = db.connect();
        create_t(&mut conn);
        insert(&mut conn, 1, "x");
        insert(&mut conn, 2, "y");

        let select = Stmt::Select(SelectStmt {
            columns: vec![ResultColumn { expr: Expr::Column { table: None, name: "b".into() }, alias: None }],
            from: Some(FromClause { first: TableRef { schema: None, name: "t".into(), alias: None }, joins: vec![] }),
            order_by: vec![OrderingTerm { expr: Expr::Column { table: None, name: "a".into() }, order: SortOrder::Asc }],
            ..Default::default()
        });
        let mut stmt = conn.prepare(&select).unwrap();
        let rows = stmt.all(&[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Text("x".into())], vec![Value::Text("y".into())]]);
    }

    #[test]
    fn offset_skips_exactly_n_rows() {
        let db = Database::new();
        let mut conn = db.connect();
        create_t(&mut conn);
        for (a, b) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            insert(&mut conn, a, b);
        }

        let select = |offset: i64| {
            Stmt::Select(SelectStmt {
                columns: vec![ResultColumn { expr: Expr::Column { table: None, name: "a".into() }, alias: None }],
                from: Some(FromClause { first: TableRef { schema: None, name: "t".into(), alias: None }, joins: vec![] }),
                order_by: vec![OrderingTerm { expr: Expr::Column { table: None, name: "a".into() }, order: SortOrder::Asc }],
                offset: Some(Expr::Literal(Value::Integer(offset))),
                ..Default::default()
            })
        };

        let rows = conn.prepare(&select(0)).unwrap().all(&[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)], vec![Value::Integer(4)]]);

        let rows = conn.prepare(&select(1)).unwrap().all(&[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(2)], vec![Value::Integer(3)], vec![Value::Integer(4)]]);

        let rows = conn.prepare(&select(2)).unwrap().all(&[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(3)], vec![Value::Integer(4)]]);
    }

    #[test]
    fn parameter_binding_by_name() {
        let db = Database::new();
        let mut conn = db.connect();
        create_t(&mut conn);
        insert(&mut conn, 1, "x");
        insert(&mut conn, 2, "y");
        insert(&mut conn, 3, "x");

        let select = Stmt::Select(SelectStmt {
            columns: vec![ResultColumn { expr: Expr::Column { table: None, name: "a".into() }, alias: None }],
            from: Some(FromClause { first: TableRef { schema: None, name: "t".into(), alias: None }, joins: vec![] }),
            where_clause: Some(Expr::Binary(
                Box::new(Expr::Column { table: None, name: "b".into() }),
                BinaryOp::Eq,
                Box::new(Expr::Parameter(ParamRef::Named("v".into()))),
            )),
            ..Default::default()
        });
        let mut stmt = conn.prepare(&select).unwrap();
        let rows = stmt.all(&[(ParamRef::Named("v".into()), Value::Text("y".into()))]).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(2)]]);

        let rows = stmt.all(&[(ParamRef::Named("v".into()), Value::Text("x".into()))]).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(3)]]);
    }

    #[test]
    fn finalized_statement_is_unusable() {
        let db = Database::new();
        let mut conn = db.connect();
        create_t(&mut conn);
        let select = Stmt::Select(SelectStmt {
            columns: vec![ResultColumn { expr: Expr::Literal(Value::Integer(1)), alias: None }],
            ..Default::default()
        });
        let mut stmt = conn.prepare(&select).unwrap();
        stmt.finalize();
        assert!(matches!(stmt.step(), Err(Error::Misuse { .. })));
    }

    #[test]
    fn savepoint_rollback_end_to_end() {
        let db = Database::new();
        let mut conn = db.connect();
        create_t(&mut conn);
        insert(&mut conn, 1, "x");
        insert(&mut conn, 2, "y");

        conn.prepare(&Stmt::Begin).unwrap().step().unwrap();
        insert(&mut conn, 3, "c");
        conn.prepare(&Stmt::Savepoint("s1".into())).unwrap().step().unwrap();
        insert(&mut conn, 4, "d");
        conn.prepare(&Stmt::Rollback { savepoint: Some("s1".into()) }).unwrap().step().unwrap();
        conn.prepare(&Stmt::Commit).unwrap().step().unwrap();

        let select = Stmt::Select(SelectStmt {
            columns: vec![ResultColumn { expr: Expr::Column { table: None, name: "a".into() }, alias: None }],
            from: Some(FromClause { first: TableRef { schema: None, name: "t".into(), alias: None }, joins: vec![] }),
            order_by: vec![OrderingTerm { expr: Expr::Column { table: None, name: "a".into() }, order: SortOrder::Asc }],
            ..Default::default()
        });
        let rows = conn.prepare(&select).unwrap().all(&[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)]]);
    }
}

//! The AST shape produced by the external SQL lexer/parser (spec §1, §6).
//!
//! This module is a *data contract*, not a parser: lexing and parsing are
//! out of scope for this crate (spec §1 names them an external
//! collaborator). Everything the compiler (`translate`) consumes is defined
//! here so the rest of the crate has a fixed shape to compile against.

use crate::error::SourceLocation;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub loc: Option<SourceLocation>,
}

impl<T> Spanned<T> {
    pub fn new(node: T) -> Self {
        Spanned { node, loc: None }
    }

    pub fn at(node: T, loc: SourceLocation) -> Self {
        Spanned {
            node,
            loc: Some(loc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictClause {
    Abort,
    Rollback,
    Fail,
    Ignore,
    Replace,
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub affinity_decl: Option<String>,
    pub primary_key: bool,
    pub pk_desc: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub is_virtual: bool,
    pub module_name: Option<String>,
    pub module_args: Vec<String>,
    pub strict: bool,
    pub without_rowid: bool,
    pub temporary: bool,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone)]
pub struct CreateViewStmt {
    pub schema: Option<String>,
    pub name: String,
    pub select: Box<SelectStmt>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone)]
pub struct CreateIndexStmt {
    pub name: String,
    pub table: String,
    pub columns: Vec<(String, SortOrder)>,
    pub unique: bool,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone)]
pub struct DropStmt {
    pub kind: DropKind,
    pub name: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    Table,
    View,
    Index,
}

#[derive(Debug, Clone)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn { from: String, to: String },
    RenameTable(String),
}

#[derive(Debug, Clone)]
pub struct AlterTableStmt {
    pub table: String,
    pub action: AlterAction,
}

#[derive(Debug, Clone)]
pub struct ResultColumn {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: TableRef,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub first: TableRef,
    pub joins: Vec<JoinClause>,
}

#[derive(Debug, Clone)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct CteDef {
    pub name: String,
    pub select: Box<SelectStmt>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectStmt {
    pub ctes: Vec<CteDef>,
    pub columns: Vec<ResultColumn>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Expr>>,
    pub select: Option<Box<SelectStmt>>,
    pub or_conflict: Option<ConflictClause>,
    pub returning: Vec<ResultColumn>,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub or_conflict: Option<ConflictClause>,
    pub returning: Vec<ResultColumn>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub where_clause: Option<Expr>,
    pub returning: Vec<ResultColumn>,
}

#[derive(Debug, Clone)]
pub struct PragmaStmt {
    pub name: String,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    CreateView(CreateViewStmt),
    CreateIndex(CreateIndexStmt),
    Drop(DropStmt),
    AlterTable(AlterTableStmt),
    Begin,
    Commit,
    Rollback { savepoint: Option<String> },
    Savepoint(String),
    Release(String),
    Pragma(PragmaStmt),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    ShiftLeft,
    ShiftRight,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Not,
    BitNot,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone)]
pub enum WindowSpec {
    /// A minimal named-or-inline window frame; only a running total frame
    /// (`ROWS UNBOUNDED PRECEDING` style) is needed for this crate's scope.
    RunningTotal,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Parameter(ParamRef),
    Column {
        table: Option<String>,
        name: String,
    },
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Between {
        expr: Box<Expr>,
        lo: Box<Expr>,
        hi: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        select: Box<SelectStmt>,
        negated: bool,
    },
    Exists {
        select: Box<SelectStmt>,
        negated: bool,
    },
    ScalarSubquery(Box<SelectStmt>),
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        filter: Option<Box<Expr>>,
    },
    WindowFunctionCall {
        name: String,
        args: Vec<Expr>,
        window: WindowSpec,
    },
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
    Collate {
        expr: Box<Expr>,
        collation: String,
    },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamRef {
    Positional(usize),
    Named(String),
}

// Copyright 2023-2025 the Limbo authors. All rights reserved. MIT license.

//! An embeddable SQL engine core: a parser-agnostic compiler, a
//! register-based bytecode runtime, and a virtual-table storage protocol.
//! The crate takes an already-parsed AST (`ast::Stmt`) in and drives a
//! `vtab::VTable` implementation; lexing/parsing and on-disk storage are
//! external collaborators, not this crate's job.
//!
//! `statement` is the usual entry point: `Database::new().connect()`,
//! `connection.prepare(&stmt)`, then `run`/`get`/`all`.

pub mod ast;
pub mod error;
pub mod function;
pub mod mem_table;
pub mod planner;
pub mod schema;
pub mod statement;
pub mod translate;
pub mod value;
pub mod vdbe;
pub mod vtab;

pub use error::{Error, Result};
pub use statement::{Connection, Database, Statement, StepOutcome};
pub use value::Value;

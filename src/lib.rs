//! LinkDB - A relational engine core with foreign-key aware rule checking
//!
//! This library provides the core components of the engine:
//! - Schema catalog with foreign keys, reverse keys, rules and views
//! - Compilation of statement trees into column and table plans
//! - Rule re-evaluation across reference chains
//! - Resource descriptors and an all-or-nothing lock manager
//! - In-memory row storage with unique and multi-value indexes

pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod sql;
pub mod storage;
pub mod transaction;

pub use config::DatabaseConfig;
pub use error::{Error, ErrorKind, Result, Span};
pub use executor::{Database, QueryResult, StatementResult};
pub use sql::ast::Statement;

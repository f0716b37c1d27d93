//! Compiled metadata model
//!
//! Statements are compiled against the catalog into column accessors
//! ([`ColumnMeta`]) and table plans ([`TableMeta`]) that stream rows from
//! storage.

pub mod column;
pub mod compiler;
pub mod dependencies;
pub mod functions;
pub mod references;
pub mod table;

pub use column::{AggrColumn, ColumnMeta, DerivedColumn, IndexColumn};
pub use compiler::{compile_expr, compile_rule, compile_select, compile_view, CompiledRule, Scope};
pub use dependencies::{TableDependencies, TableDependency};
pub use functions::{AggregateFunction, Aggregator, Function};
pub use references::ReferencedTable;
pub use table::{OutputColumn, SelectPlan, TableMeta};

//! Query execution module
//!
//! This module contains the planner, the runtime resources handed to
//! compiled plans, the rule checker and the database engine.

pub mod context;
pub mod executor;
pub mod planner;
pub mod rules;

pub use context::{EvalContext, Resources};
pub use executor::{Database, QueryResult, StatementResult};
pub use planner::{CompiledStatement, Plan, Planner};
pub use rules::{Mutation, RowChange, RuleChecker};

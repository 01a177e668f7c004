//! Application Layer
//!
//! Use cases built on top of endpoint clients.

pub mod counter_check;
pub mod failover_group;

pub use counter_check::{CounterCheck, ExprNode, NodeKind, Problem, Severity};
pub use failover_group::FailoverGroup;

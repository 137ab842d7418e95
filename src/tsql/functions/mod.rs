//! Function tables keyed by name.
//!
//! Literal functions fold to constants at compile time, built-ins run once per
//! decoded row, and script functions render into backend script text. The
//! aggregate tables live next to each backend planner.

pub mod builtin;
pub mod literal;
pub mod script;

use bitflags::bitflags;
use std::collections::HashMap;

pub use builtin::{builtin_functions, BuiltinFn};
pub use literal::{literal_functions, reduce_literal, LiteralFn};
pub use script::{clickhouse_functions, painless_functions, ScriptFunction};

bitflags! {
    /// Clauses a function may appear in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FuncFlag: u32 {
        const SELECT = 1 << 0;
        const ORDER_BY = 1 << 1;
    }
}

/// Immutable name → definition table.
pub struct FunctionTable<F> {
    entries: HashMap<&'static str, F>,
}

impl<F> FunctionTable<F> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, name: &'static str, f: F) -> Self {
        self.entries.insert(name, f);
        self
    }

    pub fn get(&self, name: &str) -> Option<&F> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl<F> Default for FunctionTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Argument count a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Min(usize),
    Any,
}

impl Arity {
    pub fn check(self, name: &str, got: usize) -> crate::error::Result<()> {
        match self {
            Arity::Exact(n) => crate::error::must_args_num(name, got, n),
            Arity::Min(n) => crate::error::must_args_min_num(name, got, n),
            Arity::Any => Ok(()),
        }
    }
}

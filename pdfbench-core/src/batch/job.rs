//! Batch job definitions and types

use crate::batch::TaskContext;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity fields of a unit of work
///
/// Carried into every result record, including synthesized failures, so a
/// row can always be traced back to its input.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitIdentity {
    /// Document identity
    pub path: String,
    /// Additional label columns such as the tool name or run number
    pub labels: BTreeMap<String, String>,
}

impl UnitIdentity {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.labels.insert(key.into(), value.to_string());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Copy of this identity restricted to the given label keys
    pub fn project(&self, keys: &[&str]) -> UnitIdentity {
        UnitIdentity {
            path: self.path.clone(),
            labels: self
                .labels
                .iter()
                .filter(|(k, _)| keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.labels.is_empty() {
            let labels: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " [{}]", labels.join(", "))?;
        }
        Ok(())
    }
}

/// A unit of work scheduled by the worker pool
///
/// Jobs own their inputs; nothing mutable is shared between jobs.
pub trait BatchJob: Send + 'static {
    type Output: Send + 'static;

    /// Identity used for result records
    fn identity(&self) -> UnitIdentity;

    /// Execute the unit
    fn run(self, ctx: &TaskContext) -> Result<Self::Output>;
}

type Operation<T> = Box<dyn FnOnce(&TaskContext) -> Result<T> + Send>;

/// Job wrapping a closure
pub struct CustomJob<T> {
    identity: UnitIdentity,
    operation: Operation<T>,
}

impl<T: Send + 'static> CustomJob<T> {
    pub fn new<F>(identity: UnitIdentity, operation: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<T> + Send + 'static,
    {
        Self {
            identity,
            operation: Box::new(operation),
        }
    }
}

impl<T: Send + 'static> BatchJob for CustomJob<T> {
    type Output = T;

    fn identity(&self) -> UnitIdentity {
        self.identity.clone()
    }

    fn run(self, ctx: &TaskContext) -> Result<T> {
        (self.operation)(ctx)
    }
}

impl<T> fmt::Debug for CustomJob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomJob")
            .field("identity", &self.identity)
            .finish()
    }
}

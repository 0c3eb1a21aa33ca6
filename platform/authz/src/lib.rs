//! Authorization primitives: which role may call which workflow operation.
//!
//! Ownership checks on individual leads live in the workflow core; this crate
//! only answers the coarse "may this role call this operation at all" question.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("role {role} may not perform {operation:?}")]
    Denied { role: String, operation: Operation },
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ReadBoard,
    MoveCard,
    IngestLead,
    ManageStages,
    RunSla,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::ReadBoard,
        Operation::MoveCard,
        Operation::IngestLead,
        Operation::ManageStages,
        Operation::RunSla,
    ];
}

#[derive(Clone, Debug)]
pub struct PermissionTable {
    grants: HashMap<String, HashSet<Operation>>,
}

impl Default for PermissionTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.grant("admin", Operation::ALL);
        table.grant("manager", Operation::ALL);
        table.grant(
            "seller",
            [
                Operation::ReadBoard,
                Operation::MoveCard,
                Operation::IngestLead,
            ],
        );
        table.grant("viewer", [Operation::ReadBoard]);
        table
    }
}

impl PermissionTable {
    pub fn empty() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    pub fn grant(&mut self, role: &str, operations: impl IntoIterator<Item = Operation>) {
        self.grants
            .entry(role.to_ascii_lowercase())
            .or_default()
            .extend(operations);
    }

    pub fn allows(&self, role: &str, operation: Operation) -> bool {
        self.grants
            .get(&role.to_ascii_lowercase())
            .is_some_and(|ops| ops.contains(&operation))
    }

    pub fn check(&self, role: &str, operation: Operation) -> Result<(), AuthzError> {
        if self.allows(role, operation) {
            Ok(())
        } else {
            Err(AuthzError::Denied {
                role: role.to_string(),
                operation,
            })
        }
    }
}

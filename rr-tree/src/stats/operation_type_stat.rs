use serde::{Deserialize, Serialize};

use crate::operation::{Operation, OperationType};

/// Named counter of operations split by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTypeStat {
    name: String,
    insertions: u64,
    deletions: u64,
}

impl OperationTypeStat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insertions: 0,
            deletions: 0,
        }
    }

    pub fn register(&mut self, op: &Operation) {
        match op.kind() {
            OperationType::Insertion => self.insertions += 1,
            OperationType::Deletion => self.deletions += 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insertions(&self) -> u64 {
        self.insertions
    }

    pub fn deletions(&self) -> u64 {
        self.deletions
    }

    pub fn total(&self) -> u64 {
        self.insertions + self.deletions
    }

    pub fn add(&mut self, other: &OperationTypeStat) {
        self.insertions += other.insertions;
        self.deletions += other.deletions;
    }

    pub fn reset(&mut self) {
        self.insertions = 0;
        self.deletions = 0;
    }
}

impl std::fmt::Display for OperationTypeStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} insertions, {} deletions",
            self.name, self.insertions, self.deletions
        )
    }
}

//! Operation records: the unit of deferred work kept in the buffer.
//!
//! An [`Operation`] pairs a [`DataObject`] with an [`OperationType`]. Two
//! records are equal when they have the same kind and the same object value,
//! id and extent alike. Moving an object leaves a deletion of the old extent
//! and an insertion of the new one, which must never be mistaken for each
//! other.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::bounding_box::BoundingBox;

/// Identity of a data object, used for annihilation and de-duplication.
pub type ObjectId = u64;

/// A data object stored in the tree: an id plus its spatial extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataObject {
    pub id: ObjectId,
    pub bbox: BoundingBox,
}

impl DataObject {
    pub fn new(id: ObjectId, bbox: BoundingBox) -> Self {
        Self { id, bbox }
    }
}

/// Kind of a buffered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Insertion,
    Deletion,
}

impl OperationType {
    /// The kind that annihilates this one.
    pub fn opposite(self) -> OperationType {
        match self {
            OperationType::Insertion => OperationType::Deletion,
            OperationType::Deletion => OperationType::Insertion,
        }
    }
}

/// An immutable insert or delete of one data object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Operation {
    kind: OperationType,
    object: DataObject,
}

impl Operation {
    pub fn new(kind: OperationType, object: DataObject) -> Self {
        Self { kind, object }
    }

    pub fn insertion(object: DataObject) -> Self {
        Self::new(OperationType::Insertion, object)
    }

    pub fn deletion(object: DataObject) -> Self {
        Self::new(OperationType::Deletion, object)
    }

    pub fn kind(&self) -> OperationType {
        self.kind
    }

    pub fn object(&self) -> &DataObject {
        &self.object
    }

    pub fn id(&self) -> ObjectId {
        self.object.id
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.object.bbox
    }

    pub fn is_insertion(&self) -> bool {
        self.kind == OperationType::Insertion
    }

    pub fn is_deletion(&self) -> bool {
        self.kind == OperationType::Deletion
    }

    /// The record that would cancel this one out.
    pub fn opposite(&self) -> Operation {
        Operation::new(self.kind.opposite(), self.object)
    }

    /// Returns `true` if `other` is the opposite operation on the same
    /// object value.
    pub fn annihilates(&self, other: &Operation) -> bool {
        self.object == other.object && self.kind == other.kind.opposite()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.object == other.object
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.kind {
            OperationType::Insertion => '+',
            OperationType::Deletion => '-',
        };
        write!(f, "{}{}", sign, self.object.id)
    }
}

/// Minimum bounding rectangle of a group of operations.
pub fn compute_mbr<'a, I>(operations: I) -> Option<BoundingBox>
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut iter = operations.into_iter();
    let first = *iter.next()?.bbox();
    Some(iter.fold(first, |acc, op| acc.union(op.bbox())))
}

/// Returns `true` if the group holds no deletions.
pub fn is_insertion_only<'a, I>(operations: I) -> bool
where
    I: IntoIterator<Item = &'a Operation>,
{
    operations.into_iter().all(Operation::is_insertion)
}

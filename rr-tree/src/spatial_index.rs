//! SpatialIndex trait definition.

use crate::bounding_box::BoundingBox;
use crate::errors::RRTreeResult;
use crate::operation::DataObject;
use crate::rr_tree::RRTree;
use crate::tracer::ObjectTracer;

/// A spatial index over data objects.
///
/// Callers that only add, remove and search objects can be written against
/// this trait instead of a concrete tree.
pub trait SpatialIndex {
    /// Adds an object, replacing one stored under the same id.
    fn insert(&mut self, object: DataObject) -> RRTreeResult<()>;

    /// Removes an object.
    fn remove(&mut self, object: DataObject) -> RRTreeResult<()>;

    /// Finds the objects intersecting `region`.
    fn query(&mut self, region: &BoundingBox) -> RRTreeResult<Vec<DataObject>>;

    /// Gets the number of stored objects.
    fn size(&self) -> u64;

    /// Persists pending changes.
    fn flush(&mut self) -> RRTreeResult<()>;

    /// Closes this index, applying all pending changes.
    fn close(&mut self) -> RRTreeResult<()>;
}

impl<T: ObjectTracer> SpatialIndex for RRTree<T> {
    fn insert(&mut self, object: DataObject) -> RRTreeResult<()> {
        RRTree::insert(self, object)
    }

    fn remove(&mut self, object: DataObject) -> RRTreeResult<()> {
        RRTree::remove(self, object)
    }

    fn query(&mut self, region: &BoundingBox) -> RRTreeResult<Vec<DataObject>> {
        RRTree::query(self, region)
    }

    fn size(&self) -> u64 {
        RRTree::size(self)
    }

    fn flush(&mut self) -> RRTreeResult<()> {
        RRTree::flush(self)
    }

    fn close(&mut self) -> RRTreeResult<()> {
        RRTree::close(self)
    }
}

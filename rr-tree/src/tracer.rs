//! Object tracing hooks.
//!
//! A tracer follows a handful of registered object ids through every
//! lifecycle transition of their buffered operations. The default
//! [`NullObjectTracer`] is a zero-sized type whose methods are empty and
//! inlined, so a tree instantiated with it pays nothing on its hot paths.

use std::collections::HashSet;
use std::fmt::{self, Display};

use parking_lot::Mutex;

use crate::operation::{DataObject, ObjectId, Operation};

/// Groups of trace phases that can be switched on and off together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceClass {
    RRTree,
    Piggybacking,
    EntryCollection,
    QueryProcessing,
    Gc,
}

impl TraceClass {
    pub const ALL: [TraceClass; 5] = [
        TraceClass::RRTree,
        TraceClass::Piggybacking,
        TraceClass::EntryCollection,
        TraceClass::QueryProcessing,
        TraceClass::Gc,
    ];
}

/// A lifecycle transition an object can be traced through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TracePhase {
    InsertToBuffer,
    RemoveFromBuffer,
    PutOpBackToBuffer,
    GroupUpdateStart,
    GroupUpdateBeforeIndexPiggybacking,
    GroupUpdateAfterIndexPiggybacking,
    UpdateLeafNode,
    CompleteOperation,

    IndexNodePiggybacking,
    LeafNodePiggybacking,

    EntryCollectionAdd,
    EntryCollectionAddAnnihilate,
    EntryCollectionAddIncrease,

    DataTreeQueryFirstLoop,
    DataTreeQueryBufferLoop,
    DataTreeQueryFinalLoop,
    UpdateTreeQueryInitialResult,
    UpdateTreeQueryExternalResult,

    BulkReloaderGcFirstPass,
    BulkReloaderGcRemovingFromEntryToTmpMap,
    BulkReloaderGcFirstPassWrite,
    BulkReloaderGcSecondPassWrite,
    BulkReloaderGcSecondPassRead,
    BulkReloaderGcSecondPassReadIncrease,
    BulkReloaderGcSecondPassReadAnnihilation,
}

impl TracePhase {
    pub fn class(self) -> TraceClass {
        use TracePhase::*;
        match self {
            InsertToBuffer
            | RemoveFromBuffer
            | PutOpBackToBuffer
            | GroupUpdateStart
            | GroupUpdateBeforeIndexPiggybacking
            | GroupUpdateAfterIndexPiggybacking
            | UpdateLeafNode
            | CompleteOperation => TraceClass::RRTree,
            IndexNodePiggybacking | LeafNodePiggybacking => TraceClass::Piggybacking,
            EntryCollectionAdd | EntryCollectionAddAnnihilate | EntryCollectionAddIncrease => {
                TraceClass::EntryCollection
            }
            DataTreeQueryFirstLoop
            | DataTreeQueryBufferLoop
            | DataTreeQueryFinalLoop
            | UpdateTreeQueryInitialResult
            | UpdateTreeQueryExternalResult => TraceClass::QueryProcessing,
            BulkReloaderGcFirstPass
            | BulkReloaderGcRemovingFromEntryToTmpMap
            | BulkReloaderGcFirstPassWrite
            | BulkReloaderGcSecondPassWrite
            | BulkReloaderGcSecondPassRead
            | BulkReloaderGcSecondPassReadIncrease
            | BulkReloaderGcSecondPassReadAnnihilation => TraceClass::Gc,
        }
    }
}

impl Display for TracePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Diagnostic observer of object lifecycles.
///
/// Tracing is best-effort: implementations must not panic and cannot
/// return errors, so a tracer can never abort a structural operation.
pub trait ObjectTracer {
    /// Starts tracing the object with the given id.
    fn register_object(&mut self, id: ObjectId);

    fn trace_object(&self, object: &DataObject, phase: TracePhase);

    fn trace_update_tree_entry(
        &self,
        op: &Operation,
        phase: TracePhase,
        extra_info: Option<&dyn Display>,
    );

    /// `false` when every trace call is a no-op. Callers may skip building
    /// extra info when this is `false`.
    fn is_enabled(&self) -> bool;
}

// ============================================================================
// Null Tracer
// ============================================================================

/// Tracer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObjectTracer;

impl ObjectTracer for NullObjectTracer {
    #[inline(always)]
    fn register_object(&mut self, _id: ObjectId) {}

    #[inline(always)]
    fn trace_object(&self, _object: &DataObject, _phase: TracePhase) {}

    #[inline(always)]
    fn trace_update_tree_entry(
        &self,
        _op: &Operation,
        _phase: TracePhase,
        _extra_info: Option<&dyn Display>,
    ) {
    }

    #[inline(always)]
    fn is_enabled(&self) -> bool {
        false
    }
}

// ============================================================================
// Logging Tracer
// ============================================================================

/// One recorded trace event.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub id: ObjectId,
    pub phase: TracePhase,
    pub description: String,
}

/// Tracer that logs registered objects through the `log` facade
/// (target `rr_tree::tracer`) and keeps the most recent events in memory.
#[derive(Debug)]
pub struct LoggingObjectTracer {
    registered: HashSet<ObjectId>,
    enabled_classes: HashSet<TraceClass>,
    events: Mutex<Vec<TraceEvent>>,
    max_events: usize,
}

impl Default for LoggingObjectTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingObjectTracer {
    const DEFAULT_MAX_EVENTS: usize = 4096;

    /// Creates a tracer with every class enabled.
    pub fn new() -> Self {
        Self::with_max_events(Self::DEFAULT_MAX_EVENTS)
    }

    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            registered: HashSet::new(),
            enabled_classes: TraceClass::ALL.into_iter().collect(),
            events: Mutex::new(Vec::new()),
            max_events,
        }
    }

    pub fn enable_class(&mut self, class: TraceClass) {
        self.enabled_classes.insert(class);
    }

    pub fn disable_class(&mut self, class: TraceClass) {
        self.enabled_classes.remove(&class);
    }

    pub fn is_registered(&self, id: ObjectId) -> bool {
        self.registered.contains(&id)
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Phases recorded for one object, oldest first.
    pub fn phases_of(&self, id: ObjectId) -> Vec<TracePhase> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.id == id)
            .map(|e| e.phase)
            .collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn should_trace(&self, id: ObjectId, phase: TracePhase) -> bool {
        self.registered.contains(&id) && self.enabled_classes.contains(&phase.class())
    }

    fn record(&self, id: ObjectId, phase: TracePhase, description: String) {
        log::info!(target: "rr_tree::tracer", "[{}] {}", phase, description);
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(TraceEvent {
            id,
            phase,
            description,
        });
    }
}

impl ObjectTracer for LoggingObjectTracer {
    fn register_object(&mut self, id: ObjectId) {
        self.registered.insert(id);
    }

    fn trace_object(&self, object: &DataObject, phase: TracePhase) {
        if self.should_trace(object.id, phase) {
            self.record(object.id, phase, format!("object {} at {}", object.id, object.bbox));
        }
    }

    fn trace_update_tree_entry(
        &self,
        op: &Operation,
        phase: TracePhase,
        extra_info: Option<&dyn Display>,
    ) {
        if self.should_trace(op.id(), phase) {
            let description = match extra_info {
                Some(extra) => format!("entry {} at {} ({})", op, op.bbox(), extra),
                None => format!("entry {} at {}", op, op.bbox()),
            };
            self.record(op.id(), phase, description);
        }
    }

    fn is_enabled(&self) -> bool {
        !self.registered.is_empty() && !self.enabled_classes.is_empty()
    }
}

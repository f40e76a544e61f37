// Incremental garbage collector
//
// Tri-color mark-sweep coupled to the allocator. A cycle runs
// Idle -> Mark -> Sweep -> Idle; `step` is the sole phase function and is
// invoked by the allocator whenever the byte threshold is crossed or a
// cycle is already in flight, so a cycle once begun progresses on every
// allocation.
//
// Gray objects live on an explicit worklist. The root walk is resumable:
// at most GC_ROOT_CHUNK items are processed per step so that long
// compilations cannot stall the mutator inside a single call.
//
// The two header bits drive the sweep protocol:
// - marked: reachable in the cycle in flight
// - on_current_cycle: existed when the cycle started
// An object with neither bit was allocated mid-cycle and must survive.

mod gc_object;
mod object_pool;
mod string_interner;

pub use gc_object::*;
pub use object_pool::ObjectPool;
pub use string_interner::{StringInterner, hash_string};

use crate::luna_value::{LunaValue, Table};
use crate::luna_vm::CallFrame;
use crate::luna_vm::luna_limits::{GC_HEAP_GROW_FACTOR, GC_NEXT_INITIAL, GC_ROOT_CHUNK};

/// Collector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    Mark,
    Sweep,
}

/// Cursor into the resumable root walk.
#[derive(Debug, Clone, Copy)]
enum MarkStage {
    StackSlots(usize),
    Frames(usize),
    OpenUpvalues(Option<GcId>),
    Globals(usize),
    CompilerRoots(usize),
    InitString,
    Gray,
}

/// Borrowed view of everything the mutator considers reachable. Assembled
/// by the VM for each collector step.
pub struct GcRoots<'a> {
    pub stack: &'a [LunaValue],
    pub frames: &'a [CallFrame],
    pub open_upvalues: Option<GcId>,
    pub globals: &'a Table,
    /// Function objects of the active compiler chain, outermost first.
    pub compiler_roots: &'a [GcId],
    pub init_string: Option<GcId>,
}

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collection_count: usize,
    pub objects_collected: usize,
    pub bytes_freed: usize,
}

pub struct GC {
    pub phase: GcPhase,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<GcId>,
    stage: MarkStage,
    pub stats: GcStats,
}

impl GC {
    pub fn new() -> Self {
        GC {
            phase: GcPhase::Idle,
            bytes_allocated: 0,
            next_gc: GC_NEXT_INITIAL,
            gray: Vec::with_capacity(128),
            stage: MarkStage::StackSlots(0),
            stats: GcStats::default(),
        }
    }

    /// Record a new allocation of `size` bytes.
    #[inline]
    pub fn track_allocation(&mut self, size: usize) {
        self.bytes_allocated += size;
    }

    #[inline]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// The allocator must call `step` when this is true: either the
    /// threshold was crossed or a cycle is already in flight.
    #[inline]
    pub fn should_step(&self) -> bool {
        self.bytes_allocated > self.next_gc || self.phase != GcPhase::Idle
    }

    /// Override the next collection threshold. Zero makes every
    /// allocation drive the collector (stress mode).
    pub fn set_next_gc(&mut self, bytes: usize) {
        self.next_gc = bytes;
    }

    /// Run one bounded slice of collector work.
    pub fn step(&mut self, roots: &GcRoots, pool: &mut ObjectPool, interner: &mut StringInterner) {
        match self.phase {
            GcPhase::Idle => self.begin_cycle(pool),
            GcPhase::Mark => self.mark_step(roots, pool),
            GcPhase::Sweep => self.sweep(pool, interner),
        }
    }

    /// Idle -> Mark. Stamp every live object as a participant of this
    /// cycle; anything allocated afterwards carries neither bit and is
    /// immune to this cycle's sweep.
    fn begin_cycle(&mut self, pool: &mut ObjectPool) {
        self.stats.collection_count += 1;
        for (_, object) in pool.iter_mut() {
            object.header.on_current_cycle = true;
        }
        self.gray.clear();
        self.stage = MarkStage::StackSlots(0);
        self.phase = GcPhase::Mark;
    }

    /// One resumable slice of the mark phase: walk up to GC_ROOT_CHUNK
    /// root items, then drain the gray worklist in the same sized slices.
    /// When roots and worklist are exhausted, advance to Sweep.
    fn mark_step(&mut self, roots: &GcRoots, pool: &mut ObjectPool) {
        let mut budget = GC_ROOT_CHUNK;

        while budget > 0 {
            match self.stage {
                MarkStage::StackSlots(index) => {
                    if index < roots.stack.len() {
                        self.mark_value(roots.stack[index], pool);
                        self.stage = MarkStage::StackSlots(index + 1);
                        budget -= 1;
                    } else {
                        self.stage = MarkStage::Frames(0);
                    }
                }
                MarkStage::Frames(index) => {
                    if index < roots.frames.len() {
                        self.mark_object(roots.frames[index].closure, pool);
                        self.stage = MarkStage::Frames(index + 1);
                        budget -= 1;
                    } else {
                        self.stage = MarkStage::OpenUpvalues(roots.open_upvalues);
                    }
                }
                MarkStage::OpenUpvalues(cursor) => {
                    if let Some(id) = cursor {
                        self.mark_object(id, pool);
                        self.stage = MarkStage::OpenUpvalues(pool.upvalue(id).next);
                        budget -= 1;
                    } else {
                        self.stage = MarkStage::Globals(0);
                    }
                }
                MarkStage::Globals(index) => {
                    // Insertions between slices may reorder the table;
                    // entries skipped by the shifting cursor are caught
                    // by the atomic re-walk before the sweep.
                    if let Some((&name, &value)) = roots.globals.iter().nth(index) {
                        self.mark_object(name, pool);
                        self.mark_value(value, pool);
                        self.stage = MarkStage::Globals(index + 1);
                        budget -= 1;
                    } else {
                        self.stage = MarkStage::CompilerRoots(0);
                    }
                }
                MarkStage::CompilerRoots(index) => {
                    if index < roots.compiler_roots.len() {
                        self.mark_object(roots.compiler_roots[index], pool);
                        self.stage = MarkStage::CompilerRoots(index + 1);
                        budget -= 1;
                    } else {
                        self.stage = MarkStage::InitString;
                    }
                }
                MarkStage::InitString => {
                    if let Some(init) = roots.init_string {
                        self.mark_object(init, pool);
                        budget -= 1;
                    }
                    self.stage = MarkStage::Gray;
                }
                MarkStage::Gray => {
                    if let Some(id) = self.gray.pop() {
                        self.blacken(id, pool);
                        budget -= 1;
                    } else {
                        // The mutator kept running while marking was
                        // sliced; one atomic re-walk catches roots that
                        // changed underneath the cursor.
                        self.atomic(roots, pool);
                        self.phase = GcPhase::Sweep;
                        return;
                    }
                }
            }
        }
    }

    /// Re-mark every root and drain the worklist to completion in one
    /// call, closing the gap between the resumable walk and the sweep.
    fn atomic(&mut self, roots: &GcRoots, pool: &mut ObjectPool) {
        for &value in roots.stack {
            self.mark_value(value, pool);
        }
        for frame in roots.frames {
            self.mark_object(frame.closure, pool);
        }
        let mut cursor = roots.open_upvalues;
        while let Some(id) = cursor {
            self.mark_object(id, pool);
            cursor = pool.upvalue(id).next;
        }
        for (&name, &value) in roots.globals.iter() {
            self.mark_object(name, pool);
            self.mark_value(value, pool);
        }
        for &function in roots.compiler_roots {
            self.mark_object(function, pool);
        }
        if let Some(init) = roots.init_string {
            self.mark_object(init, pool);
        }

        while let Some(id) = self.gray.pop() {
            self.blacken(id, pool);
        }
    }

    #[inline]
    fn mark_value(&mut self, value: LunaValue, pool: &mut ObjectPool) {
        if let LunaValue::Object(id) = value {
            self.mark_object(id, pool);
        }
    }

    fn mark_object(&mut self, id: GcId, pool: &mut ObjectPool) {
        let header = &mut pool.get_mut(id).header;
        if header.marked {
            return;
        }
        header.marked = true;
        self.gray.push(id);
    }

    /// Trace the outgoing edges of one gray object. Children are
    /// collected first so the pool is not borrowed across the marking.
    fn blacken(&mut self, id: GcId, pool: &mut ObjectPool) {
        let mut child_ids: Vec<GcId> = Vec::new();
        let mut child_values: Vec<LunaValue> = Vec::new();

        match &pool.get(id).data {
            GcObjectData::BoundMethod(bound) => {
                child_values.push(bound.receiver);
                child_ids.push(bound.method);
            }
            GcObjectData::Struct(structure) => {
                child_ids.push(structure.name);
                for (&name, &method) in structure.methods.iter() {
                    child_ids.push(name);
                    child_values.push(method);
                }
            }
            GcObjectData::Instance(instance) => {
                child_ids.push(instance.structure);
                for (&name, &value) in instance.fields.iter() {
                    child_ids.push(name);
                    child_values.push(value);
                }
            }
            GcObjectData::Closure(closure) => {
                child_ids.push(closure.function);
                child_ids.extend(closure.upvalues.iter().copied().flatten());
            }
            GcObjectData::Function(function) => {
                if let Some(name) = function.name {
                    child_ids.push(name);
                }
                child_values.extend(function.chunk.constants.iter().copied());
            }
            GcObjectData::Upvalue(upvalue) => {
                if let Some(value) = upvalue.closed_value() {
                    child_values.push(value);
                }
            }
            GcObjectData::List(list) => {
                child_values.extend(list.elements.iter().copied());
            }
            GcObjectData::Native(_) | GcObjectData::String(_) => {}
        }

        for child in child_ids {
            self.mark_object(child, pool);
        }
        for child in child_values {
            self.mark_value(child, pool);
        }
    }

    /// One full pass over the pool. Survivors get their bits cleared,
    /// unreachable cycle participants are freed, mid-cycle allocations
    /// are left untouched.
    fn sweep(&mut self, pool: &mut ObjectPool, interner: &mut StringInterner) {
        let mut dead: Vec<GcId> = Vec::new();

        for (id, object) in pool.iter_mut() {
            if object.header.marked {
                object.header.marked = false;
                object.header.on_current_cycle = false;
            } else if object.header.on_current_cycle {
                dead.push(id);
            }
        }

        for id in dead {
            if let GcObjectData::String(s) = &pool.get(id).data {
                interner.remove_dead(s.hash, id);
            }
            let size = pool.free(id);
            self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
            self.stats.objects_collected += 1;
            self.stats.bytes_freed += size;
        }

        self.phase = GcPhase::Idle;
        self.next_gc = (self.bytes_allocated as f64 * GC_HEAP_GROW_FACTOR) as usize;
    }
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}

// IndexMap-backed pool for GC objects
// - O(1) lookup by id
// - O(live_objects) iteration for the sweep pass (no empty slots)
// - Free list for id reuse to prevent unbounded growth

use ahash::RandomState;
use indexmap::IndexMap;

use super::gc_object::{
    GcId, GcObject, LunaBoundMethod, LunaClosure, LunaFunction, LunaInstance, LunaList,
    LunaNative, LunaString, LunaStruct, LunaUpvalue,
};
use super::GcObjectData;

pub struct ObjectPool {
    objects: IndexMap<u32, GcObject, RandomState>,
    free_list: Vec<u32>,
    next_id: u32,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool {
            objects: IndexMap::with_capacity_and_hasher(256, RandomState::new()),
            free_list: Vec::new(),
            next_id: 0,
        }
    }

    /// Allocate a new object and return its handle, recycling freed ids.
    pub fn alloc(&mut self, object: GcObject) -> GcId {
        let id = if let Some(free_id) = self.free_list.pop() {
            free_id
        } else {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            debug_assert!(self.next_id != 0, "object pool exhausted u32 ids");
            id
        };

        self.objects.insert(id, object);
        GcId(id)
    }

    #[inline(always)]
    pub fn get(&self, id: GcId) -> &GcObject {
        &self.objects[&id.0]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: GcId) -> &mut GcObject {
        &mut self.objects[&id.0]
    }

    #[inline(always)]
    pub fn try_get(&self, id: GcId) -> Option<&GcObject> {
        self.objects.get(&id.0)
    }

    /// Unlink and drop an object, returning its estimated size for the
    /// GC accounting.
    pub fn free(&mut self, id: GcId) -> usize {
        if let Some(object) = self.objects.swap_remove(&id.0) {
            self.free_list.push(id.0);
            object.data.heap_size()
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcId, &GcObject)> + '_ {
        self.objects.iter().map(|(&id, object)| (GcId(id), object))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (GcId, &mut GcObject)> + '_ {
        self.objects
            .iter_mut()
            .map(|(&id, object)| (GcId(id), object))
    }

    // ===== Typed accessors =====
    //
    // Handles are only produced by this pool and kind-checked at the
    // allocation site, so a payload mismatch is a corrupted-handle bug,
    // not a recoverable condition.

    pub fn string(&self, id: GcId) -> &LunaString {
        match &self.get(id).data {
            GcObjectData::String(s) => s,
            other => panic!("handle is not a string: {:?}", other.kind()),
        }
    }

    pub fn function(&self, id: GcId) -> &LunaFunction {
        match &self.get(id).data {
            GcObjectData::Function(f) => f,
            other => panic!("handle is not a function: {:?}", other.kind()),
        }
    }

    pub fn function_mut(&mut self, id: GcId) -> &mut LunaFunction {
        match &mut self.get_mut(id).data {
            GcObjectData::Function(f) => f,
            other => panic!("handle is not a function: {:?}", other.kind()),
        }
    }

    pub fn native(&self, id: GcId) -> &LunaNative {
        match &self.get(id).data {
            GcObjectData::Native(n) => n,
            other => panic!("handle is not a native: {:?}", other.kind()),
        }
    }

    pub fn closure(&self, id: GcId) -> &LunaClosure {
        match &self.get(id).data {
            GcObjectData::Closure(c) => c,
            other => panic!("handle is not a closure: {:?}", other.kind()),
        }
    }

    pub fn closure_mut(&mut self, id: GcId) -> &mut LunaClosure {
        match &mut self.get_mut(id).data {
            GcObjectData::Closure(c) => c,
            other => panic!("handle is not a closure: {:?}", other.kind()),
        }
    }

    pub fn upvalue(&self, id: GcId) -> &LunaUpvalue {
        match &self.get(id).data {
            GcObjectData::Upvalue(u) => u,
            other => panic!("handle is not an upvalue: {:?}", other.kind()),
        }
    }

    pub fn upvalue_mut(&mut self, id: GcId) -> &mut LunaUpvalue {
        match &mut self.get_mut(id).data {
            GcObjectData::Upvalue(u) => u,
            other => panic!("handle is not an upvalue: {:?}", other.kind()),
        }
    }

    pub fn structure(&self, id: GcId) -> &LunaStruct {
        match &self.get(id).data {
            GcObjectData::Struct(s) => s,
            other => panic!("handle is not a struct: {:?}", other.kind()),
        }
    }

    pub fn structure_mut(&mut self, id: GcId) -> &mut LunaStruct {
        match &mut self.get_mut(id).data {
            GcObjectData::Struct(s) => s,
            other => panic!("handle is not a struct: {:?}", other.kind()),
        }
    }

    pub fn instance(&self, id: GcId) -> &LunaInstance {
        match &self.get(id).data {
            GcObjectData::Instance(i) => i,
            other => panic!("handle is not an instance: {:?}", other.kind()),
        }
    }

    pub fn instance_mut(&mut self, id: GcId) -> &mut LunaInstance {
        match &mut self.get_mut(id).data {
            GcObjectData::Instance(i) => i,
            other => panic!("handle is not an instance: {:?}", other.kind()),
        }
    }

    pub fn bound_method(&self, id: GcId) -> &LunaBoundMethod {
        match &self.get(id).data {
            GcObjectData::BoundMethod(b) => b,
            other => panic!("handle is not a bound method: {:?}", other.kind()),
        }
    }

    pub fn list(&self, id: GcId) -> &LunaList {
        match &self.get(id).data {
            GcObjectData::List(l) => l,
            other => panic!("handle is not a list: {:?}", other.kind()),
        }
    }

    pub fn list_mut(&mut self, id: GcId) -> &mut LunaList {
        match &mut self.get_mut(id).data {
            GcObjectData::List(l) => l,
            other => panic!("handle is not a list: {:?}", other.kind()),
        }
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

// ============ GC header and managed object payloads ============

use smol_str::SmolStr;

use crate::luna_value::{Chunk, LunaValue, Table};
use crate::luna_vm::{LunaResult, LunaVM};

/// Handle to a pool-allocated object. Copyable, compared by identity.
///
/// Objects reference each other through these indices into the
/// [`ObjectPool`](super::ObjectPool) rather than raw pointers; the sweep
/// pass is a linear walk over the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcId(pub(crate) u32);

/// Discriminant mirrored in the header so the sweep pass and the
/// disassembler can inspect an object's kind without matching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Struct,
    Instance,
    BoundMethod,
    List,
}

/// Common header embedded in every managed object.
///
/// `marked` means "reachable in the cycle in flight". `on_current_cycle`
/// means "existed when the cycle started"; objects allocated mid-cycle
/// carry neither bit and survive the in-flight sweep untouched.
#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub kind: ObjKind,
    pub marked: bool,
    pub on_current_cycle: bool,
}

impl GcHeader {
    #[inline]
    pub fn new(kind: ObjKind) -> Self {
        GcHeader {
            kind,
            marked: false,
            on_current_cycle: false,
        }
    }
}

/// Interned immutable string with its FNV-1a hash.
#[derive(Debug)]
pub struct LunaString {
    pub data: String,
    pub hash: u32,
}

impl LunaString {
    pub fn as_str(&self) -> &str {
        &self.data
    }
}

/// Compiled function prototype. The chunk lives inside the object so the
/// collector reaches in-progress constants through the compiler roots.
#[derive(Debug)]
pub struct LunaFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<GcId>,
}

impl LunaFunction {
    pub fn new() -> Self {
        LunaFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name: None,
        }
    }
}

impl Default for LunaFunction {
    fn default() -> Self {
        Self::new()
    }
}

/// Foreign function callable from Luna code.
pub type NativeFn = fn(&mut LunaVM, &[LunaValue]) -> LunaResult<LunaValue>;

pub struct LunaNative {
    pub function: NativeFn,
    pub arity: u8,
    pub name: SmolStr,
}

impl std::fmt::Debug for LunaNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// Runtime closure: a function plus its captured upvalues. Slots are
/// `None` between the allocation of the closure and the capture loop of
/// the `Closure` instruction; the tracer skips empty slots.
#[derive(Debug)]
pub struct LunaClosure {
    pub function: GcId,
    pub upvalues: Vec<Option<GcId>>,
}

/// An upvalue is open while its variable still lives on the VM stack and
/// closed once the frame unwinds. Open upvalues form a singly-linked list
/// through `next`, sorted by descending stack slot.
#[derive(Debug)]
pub struct LunaUpvalue {
    pub state: UpvalueState,
    pub next: Option<GcId>,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(LunaValue),
}

impl LunaUpvalue {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open(_))
    }

    #[inline]
    pub fn stack_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Move the variable off the stack into the upvalue.
    #[inline]
    pub fn close(&mut self, value: LunaValue) {
        self.state = UpvalueState::Closed(value);
    }

    /// The closed value, if any. Safe to call whether open or closed.
    #[inline]
    pub fn closed_value(&self) -> Option<LunaValue> {
        match self.state {
            UpvalueState::Closed(value) => Some(value),
            UpvalueState::Open(_) => None,
        }
    }
}

/// Struct template: a name and a method table.
#[derive(Debug)]
pub struct LunaStruct {
    pub name: GcId,
    pub methods: Table,
}

/// Instance of a struct with its own field table.
#[derive(Debug)]
pub struct LunaInstance {
    pub structure: GcId,
    pub fields: Table,
}

/// A method closure paired with the receiver it was plucked from.
#[derive(Debug)]
pub struct LunaBoundMethod {
    pub receiver: LunaValue,
    pub method: GcId,
}

/// Growable list of values.
#[derive(Debug)]
pub struct LunaList {
    pub elements: Vec<LunaValue>,
}

/// Payload of a managed object.
#[derive(Debug)]
pub enum GcObjectData {
    String(LunaString),
    Function(LunaFunction),
    Native(LunaNative),
    Closure(LunaClosure),
    Upvalue(LunaUpvalue),
    Struct(LunaStruct),
    Instance(LunaInstance),
    BoundMethod(LunaBoundMethod),
    List(LunaList),
}

impl GcObjectData {
    pub fn kind(&self) -> ObjKind {
        match self {
            GcObjectData::String(_) => ObjKind::String,
            GcObjectData::Function(_) => ObjKind::Function,
            GcObjectData::Native(_) => ObjKind::Native,
            GcObjectData::Closure(_) => ObjKind::Closure,
            GcObjectData::Upvalue(_) => ObjKind::Upvalue,
            GcObjectData::Struct(_) => ObjKind::Struct,
            GcObjectData::Instance(_) => ObjKind::Instance,
            GcObjectData::BoundMethod(_) => ObjKind::BoundMethod,
            GcObjectData::List(_) => ObjKind::List,
        }
    }

    /// Estimated heap footprint in bytes, used for the GC trigger
    /// accounting. An estimate is enough: the threshold only paces the
    /// collector.
    pub fn heap_size(&self) -> usize {
        match self {
            GcObjectData::String(s) => 32 + s.data.len(),
            GcObjectData::Function(f) => {
                64 + f.chunk.code.len()
                    + f.chunk.lines.len() * 4
                    + f.chunk.constants.len() * std::mem::size_of::<LunaValue>()
            }
            GcObjectData::Native(_) => 32,
            GcObjectData::Closure(c) => 32 + c.upvalues.len() * 8,
            GcObjectData::Upvalue(_) => 48,
            GcObjectData::Struct(s) => 64 + s.methods.len() * 32,
            GcObjectData::Instance(i) => 64 + i.fields.len() * 32,
            GcObjectData::BoundMethod(_) => 48,
            GcObjectData::List(l) => 32 + l.elements.len() * std::mem::size_of::<LunaValue>(),
        }
    }
}

/// A managed object: header plus payload.
#[derive(Debug)]
pub struct GcObject {
    pub header: GcHeader,
    pub data: GcObjectData,
}

impl GcObject {
    pub fn new(data: GcObjectData) -> Self {
        GcObject {
            header: GcHeader::new(data.kind()),
            data,
        }
    }
}

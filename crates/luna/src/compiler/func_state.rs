// Per-function compiler state. Compilers form a stack (one entry per
// function being compiled); resolution walks it by index so an inner
// function can capture locals of any enclosing one.

use smol_str::SmolStr;

use super::scanner::Token;
use crate::gc::GcId;
use crate::luna_vm::luna_limits::UINT8_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
    /// Compiles into the enclosing function: `import` splices the module
    /// body into the importer's chunk.
    Import,
}

/// A local variable slot. `depth == -1` marks "declared but not yet
/// initialized"; reading such a local is the self-initializer error.
pub struct Local {
    pub name: SmolStr,
    pub depth: i32,
    pub is_captured: bool,
}

/// Compile-time upvalue descriptor, emitted verbatim after the `Closure`
/// instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub index: u8,
    pub is_local: bool,
}

pub struct FuncState {
    /// The function object being filled in. A GC root while this state
    /// is on the compiler stack.
    pub function: GcId,
    pub kind: FunctionKind,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueDesc>,
    pub scope_depth: i32,
}

impl FuncState {
    /// Slot 0 is reserved: it holds the receiver (`self`) in methods and
    /// initializers and is nameless otherwise, so user code can never
    /// resolve it except through the `self` keyword.
    pub fn new(function: GcId, kind: FunctionKind) -> Self {
        let slot_zero = Local {
            name: if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
                SmolStr::new("self")
            } else {
                SmolStr::default()
            },
            depth: 0,
            is_captured: false,
        };
        FuncState {
            function,
            kind,
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// One entry per textually enclosing `struct` declaration.
pub struct StructScope {
    pub has_superstruct: bool,
}

/// Outcome of a local lookup.
pub enum LocalResolution {
    Slot(u8),
    /// Name found but still mid-definition.
    OwnInitializer(u8),
    NotFound,
}

/// Scan locals innermost-first.
pub fn resolve_local(state: &FuncState, name: &Token) -> LocalResolution {
    for (slot, local) in state.locals.iter().enumerate().rev() {
        if local.name == name.lexeme {
            if local.depth == -1 {
                return LocalResolution::OwnInitializer(slot as u8);
            }
            return LocalResolution::Slot(slot as u8);
        }
    }
    LocalResolution::NotFound
}

/// Register an upvalue on `states[level]`, deduplicating. `Err` means the
/// 256-descriptor budget is exhausted.
pub fn add_upvalue(
    states: &mut [FuncState],
    level: usize,
    index: u8,
    is_local: bool,
) -> Result<u8, ()> {
    let state = &mut states[level];
    for (i, upvalue) in state.upvalues.iter().enumerate() {
        if upvalue.index == index && upvalue.is_local == is_local {
            return Ok(i as u8);
        }
    }

    if state.upvalues.len() >= UINT8_COUNT {
        return Err(());
    }

    state.upvalues.push(UpvalueDesc { index, is_local });
    Ok((state.upvalues.len() - 1) as u8)
}

/// Resolve `name` as an upvalue of `states[level]`, recursing outwards:
/// a hit in the enclosing function's locals marks that local captured;
/// a hit further out chains through the enclosing function's upvalues.
pub fn resolve_upvalue(
    states: &mut [FuncState],
    level: usize,
    name: &Token,
) -> Result<Option<u8>, UpvalueError> {
    if level == 0 {
        return Ok(None);
    }
    let enclosing = level - 1;

    match resolve_local(&states[enclosing], name) {
        LocalResolution::Slot(slot) => {
            states[enclosing].locals[slot as usize].is_captured = true;
            return add_upvalue(states, level, slot, true)
                .map(Some)
                .map_err(|_| UpvalueError::TooMany);
        }
        LocalResolution::OwnInitializer(_) => return Err(UpvalueError::OwnInitializer),
        LocalResolution::NotFound => {}
    }

    match resolve_upvalue(states, enclosing, name)? {
        Some(upvalue) => add_upvalue(states, level, upvalue, false)
            .map(Some)
            .map_err(|_| UpvalueError::TooMany),
        None => Ok(None),
    }
}

pub enum UpvalueError {
    TooMany,
    OwnInitializer,
}

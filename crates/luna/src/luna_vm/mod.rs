// Luna virtual machine
// Owns every piece of process-wide state: the value stack, call frames,
// globals, the open-upvalue list, the object pool, the string interner and
// the garbage collector. Single-threaded and cooperative; the collector
// only runs inside `allocate`.

mod call_frame;
pub mod debug_info;
mod luna_error;
pub mod luna_limits;
mod opcode;

pub use call_frame::CallFrame;
pub use luna_error::{LunaError, LunaFullError, LunaResult};
pub use opcode::OpCode;

use ahash::RandomState;
use smol_str::SmolStr;
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use crate::gc::{
    GC, GcId, GcObject, GcObjectData, GcPhase, GcRoots, LunaBoundMethod, LunaClosure,
    LunaInstance, LunaNative, LunaString, LunaStruct, LunaUpvalue, NativeFn, ObjKind, ObjectPool,
    StringInterner, UpvalueState, hash_string,
};
use crate::luna_value::{LunaValue, Table};
use luna_limits::{FRAMES_MAX, STACK_MAX};

pub struct LunaVM {
    pub(crate) stack: Vec<LunaValue>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    /// Head of the open-upvalue list, sorted by descending stack slot.
    pub(crate) open_upvalues: Option<GcId>,
    pub(crate) pool: ObjectPool,
    pub(crate) gc: GC,
    pub(crate) interner: StringInterner,
    /// Interned "init", looked up on every struct call.
    pub(crate) init_string: Option<GcId>,
    /// Function objects of the active compiler chain. The collector
    /// treats these as roots so in-progress chunks keep their constants.
    pub(crate) compiler_roots: Vec<GcId>,
    /// Filenames already pulled in by `import`; blocks double imports
    /// and trivial import cycles.
    pub(crate) imported_modules: HashSet<SmolStr, RandomState>,
    /// Directory module imports resolve against.
    pub(crate) module_root: PathBuf,
    pub error_message: String,
    start_time: Instant,
    print_capture: Option<String>,
}

impl LunaVM {
    pub fn new() -> Self {
        let mut vm = LunaVM {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::default(),
            open_upvalues: None,
            pool: ObjectPool::new(),
            gc: GC::new(),
            interner: StringInterner::new(),
            init_string: None,
            compiler_roots: Vec::new(),
            imported_modules: HashSet::default(),
            module_root: PathBuf::from("."),
            error_message: String::new(),
            start_time: Instant::now(),
            print_capture: None,
        };
        vm.init_string = Some(vm.copy_string("init"));
        vm
    }

    /// Register the native library into globals.
    pub fn open_libs(&mut self) {
        crate::stdlib::open_libs(self);
    }

    /// Compile a module to its top-level function object.
    pub fn compile(&mut self, module: &str, source: &str) -> LunaResult<GcId> {
        crate::compiler::compile(self, module, source)
    }

    /// Compile and run in one go.
    pub fn interpret(&mut self, module: &str, source: &str) -> LunaResult<LunaValue> {
        let function = self.compile(module, source)?;
        self.execute(function)
    }

    /// Wrap the top-level function in a closure and run it.
    pub fn execute(&mut self, function: GcId) -> LunaResult<LunaValue> {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;

        self.push(LunaValue::object(function));
        let closure = self.allocate(GcObjectData::Closure(LunaClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(LunaValue::object(closure));
        self.call_closure(closure, 0)?;
        self.run()
    }

    /// Read access to the object pool, for tooling (the disassembler)
    /// and tests.
    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    /// Attach the stored message to an error kind.
    pub fn into_full_error(&self, kind: LunaError) -> LunaFullError {
        LunaFullError {
            kind,
            message: self.error_message.clone(),
        }
    }

    pub fn set_module_root(&mut self, root: impl Into<PathBuf>) {
        self.module_root = root.into();
    }

    // ============ Allocation and GC ============

    /// Single allocation funnel. Accounting first, then at most one
    /// collector step, then the actual pool insertion - so a step never
    /// sees the object being born.
    pub(crate) fn allocate(&mut self, data: GcObjectData) -> GcId {
        self.gc.track_allocation(data.heap_size());
        if self.gc.should_step() {
            self.collect_garbage();
        }
        self.pool.alloc(GcObject::new(data))
    }

    /// One collector step over the current root set.
    pub fn collect_garbage(&mut self) {
        let LunaVM {
            gc,
            pool,
            interner,
            stack,
            frames,
            globals,
            open_upvalues,
            compiler_roots,
            init_string,
            ..
        } = self;
        let roots = GcRoots {
            stack: stack.as_slice(),
            frames: frames.as_slice(),
            open_upvalues: *open_upvalues,
            globals,
            compiler_roots: compiler_roots.as_slice(),
            init_string: *init_string,
        };
        gc.step(&roots, pool, interner);
    }

    /// Drive a complete mark-sweep cycle to the Idle phase.
    pub fn collect_all_garbage(&mut self) {
        self.collect_garbage();
        while self.gc.phase != GcPhase::Idle {
            self.collect_garbage();
        }
    }

    // ============ String interning ============

    /// Intern a borrowed string. Equal content always returns the same
    /// handle.
    pub fn copy_string(&mut self, text: &str) -> GcId {
        let hash = hash_string(text.as_bytes());
        if let Some(id) = self.interner.find(&self.pool, text, hash) {
            self.resurrect(id);
            return id;
        }
        let id = self.allocate(GcObjectData::String(LunaString {
            data: text.to_string(),
            hash,
        }));
        self.interner.insert(hash, id);
        id
    }

    /// Intern an owned string; the buffer is dropped on an interner hit.
    pub fn take_string(&mut self, text: String) -> GcId {
        let hash = hash_string(text.as_bytes());
        if let Some(id) = self.interner.find(&self.pool, &text, hash) {
            self.resurrect(id);
            return id;
        }
        let id = self.allocate(GcObjectData::String(LunaString { data: text, hash }));
        self.interner.insert(hash, id);
        id
    }

    /// An interner hit during an in-flight cycle may hand out a string
    /// the mark phase already passed over. Mark it so the pending sweep
    /// keeps it.
    fn resurrect(&mut self, id: GcId) {
        if self.gc.phase != GcPhase::Idle {
            self.pool.get_mut(id).header.marked = true;
        }
    }

    // ============ Globals and natives ============

    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let name_id = self.copy_string(name);
        self.push(LunaValue::object(name_id));
        let native = self.allocate(GcObjectData::Native(LunaNative {
            function,
            arity,
            name: SmolStr::new(name),
        }));
        self.push(LunaValue::object(native));
        self.globals.insert(name_id, LunaValue::object(native));
        self.pop();
        self.pop();
    }

    pub fn get_global(&mut self, name: &str) -> Option<LunaValue> {
        let id = self.copy_string(name);
        self.globals.get(&id).copied()
    }

    // ============ Output ============

    pub(crate) fn write_out(&mut self, text: &str) {
        if let Some(buffer) = &mut self.print_capture {
            buffer.push_str(text);
        } else {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
    }

    /// Redirect `print`/`println` into an internal buffer.
    pub fn capture_output(&mut self) {
        self.print_capture = Some(String::new());
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.print_capture {
            Some(buffer) => std::mem::take(buffer),
            None => String::new(),
        }
    }

    /// Seconds since this VM was created; backs the `clock` native.
    pub(crate) fn elapsed_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Render a value the way `print` does.
    pub fn stringify(&self, value: LunaValue) -> String {
        match value {
            LunaValue::Null => "null".to_string(),
            LunaValue::Bool(b) => b.to_string(),
            LunaValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    let mut buffer = itoa::Buffer::new();
                    buffer.format(n as i64).to_string()
                } else {
                    n.to_string()
                }
            }
            LunaValue::Object(id) => match &self.pool.get(id).data {
                GcObjectData::String(s) => s.data.clone(),
                GcObjectData::Function(_) => self.function_label(id),
                GcObjectData::Native(_) => "<native fn>".to_string(),
                GcObjectData::Closure(c) => self.function_label(c.function),
                GcObjectData::Upvalue(_) => "<upvalue>".to_string(),
                GcObjectData::Struct(s) => {
                    format!("<struct {}>", self.pool.string(s.name).as_str())
                }
                GcObjectData::Instance(i) => {
                    let name = self.pool.structure(i.structure).name;
                    format!("<{} instance>", self.pool.string(name).as_str())
                }
                GcObjectData::BoundMethod(b) => {
                    self.function_label(self.pool.closure(b.method).function)
                }
                GcObjectData::List(_) => "<list>".to_string(),
            },
        }
    }

    /// Owned copy of a string value's content, or `None` for any other
    /// kind of value.
    pub(crate) fn value_as_str(&self, value: LunaValue) -> Option<String> {
        match value {
            LunaValue::Object(id) if self.pool.get(id).header.kind == ObjKind::String => {
                Some(self.pool.string(id).data.clone())
            }
            _ => None,
        }
    }

    fn function_label(&self, function: GcId) -> String {
        match self.pool.function(function).name {
            Some(name) => format!("<fn {}>", self.pool.string(name).as_str()),
            None => "<script>".to_string(),
        }
    }

    // ============ Stack ============

    #[inline(always)]
    pub(crate) fn push(&mut self, value: LunaValue) {
        self.stack.push(value);
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self) -> LunaValue {
        self.stack.pop().expect("value stack underflow")
    }

    #[inline(always)]
    fn peek(&self, distance: usize) -> LunaValue {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ============ Errors ============

    fn build_error_message(&mut self, message: &str) {
        let mut out = String::new();
        out.push_str(message);
        out.push('\n');
        for frame in self.frames.iter().rev() {
            let function = self.pool.function(frame.function);
            let line = function
                .chunk
                .lines
                .get(frame.ip.saturating_sub(1))
                .copied()
                .unwrap_or(0);
            match function.name {
                Some(name) => out.push_str(&format!(
                    "[line {}] in {}()\n",
                    line,
                    self.pool.string(name).as_str()
                )),
                None => out.push_str(&format!("[line {}] in script\n", line)),
            }
        }
        self.error_message = out;
    }

    pub(crate) fn runtime_error(&mut self, message: &str) -> LunaError {
        self.build_error_message(message);
        LunaError::RuntimeError
    }

    fn overflow_error(&mut self) -> LunaError {
        self.build_error_message("Stack overflow.");
        LunaError::StackOverflow
    }

    // ============ Calls ============

    fn call_value(&mut self, callee: LunaValue, arg_count: usize) -> LunaResult<()> {
        if let LunaValue::Object(id) = callee {
            match self.pool.get(id).header.kind {
                ObjKind::Closure => return self.call_closure(id, arg_count),
                ObjKind::Native => return self.call_native(id, arg_count),
                ObjKind::Struct => return self.call_struct(id, arg_count),
                ObjKind::BoundMethod => {
                    let bound = self.pool.bound_method(id);
                    let (receiver, method) = (bound.receiver, bound.method);
                    let slot = self.stack.len() - arg_count - 1;
                    self.stack[slot] = receiver;
                    return self.call_closure(method, arg_count);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and structs."))
    }

    fn call_closure(&mut self, closure: GcId, arg_count: usize) -> LunaResult<()> {
        let function = self.pool.closure(closure).function;
        let arity = self.pool.function(function).arity as usize;
        if arg_count != arity {
            let message = format!("Expected {} arguments but got {}.", arity, arg_count);
            return Err(self.runtime_error(&message));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.overflow_error());
        }
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            base: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    fn call_native(&mut self, native: GcId, arg_count: usize) -> LunaResult<()> {
        let n = self.pool.native(native);
        let (function, arity) = (n.function, n.arity as usize);
        if arg_count != arity {
            let message = format!("Expected {} arguments but got {}.", arity, arg_count);
            return Err(self.runtime_error(&message));
        }
        let base = self.stack.len() - arg_count;
        let args: Vec<LunaValue> = self.stack[base..].to_vec();
        let result = function(self, &args)?;
        self.stack.truncate(base - 1);
        self.push(result);
        Ok(())
    }

    fn call_struct(&mut self, structure: GcId, arg_count: usize) -> LunaResult<()> {
        let instance = self.allocate(GcObjectData::Instance(LunaInstance {
            structure,
            fields: Table::default(),
        }));
        let slot = self.stack.len() - arg_count - 1;
        self.stack[slot] = LunaValue::object(instance);

        let init = self
            .init_string
            .and_then(|name| self.pool.structure(structure).methods.get(&name).copied());
        if let Some(initializer) = init {
            let method = initializer
                .as_object()
                .expect("initializer is not a closure");
            self.call_closure(method, arg_count)
        } else if arg_count != 0 {
            let message = format!("Expected 0 arguments but got {}.", arg_count);
            Err(self.runtime_error(&message))
        } else {
            Ok(())
        }
    }

    fn invoke_from_struct(
        &mut self,
        structure: GcId,
        name: GcId,
        arg_count: usize,
    ) -> LunaResult<()> {
        let Some(method) = self.pool.structure(structure).methods.get(&name).copied() else {
            let message = format!("Undefined property '{}'.", self.pool.string(name).as_str());
            return Err(self.runtime_error(&message));
        };
        let closure = method.as_object().expect("method is not a closure");
        self.call_closure(closure, arg_count)
    }

    /// Replace the receiver at stack top with a bound method.
    fn bind_method(&mut self, structure: GcId, name: GcId) -> LunaResult<()> {
        let Some(method) = self.pool.structure(structure).methods.get(&name).copied() else {
            let message = format!("Undefined property '{}'.", self.pool.string(name).as_str());
            return Err(self.runtime_error(&message));
        };
        let closure = method.as_object().expect("method is not a closure");
        let bound = self.allocate(GcObjectData::BoundMethod(LunaBoundMethod {
            receiver: self.peek(0),
            method: closure,
        }));
        self.pop();
        self.push(LunaValue::object(bound));
        Ok(())
    }

    // ============ Upvalues ============

    /// Find or create an open upvalue for the given absolute stack slot,
    /// keeping the list sorted by descending slot.
    fn capture_upvalue(&mut self, slot: usize) -> GcId {
        let mut previous: Option<GcId> = None;
        let mut cursor = self.open_upvalues;
        while let Some(id) = cursor {
            match self.pool.upvalue(id).stack_slot() {
                Some(s) if s > slot => {
                    previous = Some(id);
                    cursor = self.pool.upvalue(id).next;
                }
                Some(s) if s == slot => return id,
                _ => break,
            }
        }

        let created = self.allocate(GcObjectData::Upvalue(LunaUpvalue {
            state: UpvalueState::Open(slot),
            next: cursor,
        }));
        match previous {
            Some(id) => self.pool.upvalue_mut(id).next = Some(created),
            None => self.open_upvalues = Some(created),
        }
        created
    }

    /// Close every open upvalue at or above `from`, moving the stack
    /// values into the upvalue objects.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(id) = self.open_upvalues {
            let Some(slot) = self.pool.upvalue(id).stack_slot() else {
                break;
            };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            let upvalue = self.pool.upvalue_mut(id);
            upvalue.close(value);
            self.open_upvalues = upvalue.next;
            upvalue.next = None;
        }
    }

    fn upvalue_handle(&self, closure: GcId, index: usize) -> GcId {
        self.pool.closure(closure).upvalues[index].expect("upvalue slot not yet captured")
    }

    // ============ Dispatch helpers ============

    #[inline(always)]
    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active call frame");
        let byte = self.pool.function(frame.function).chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    #[inline(always)]
    fn read_short(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    #[inline(always)]
    fn read_constant(&mut self) -> LunaValue {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("no active call frame");
        self.pool.function(frame.function).chunk.constants[index]
    }

    /// Read a constant that the compiler guarantees to be an interned
    /// string (identifier operands).
    #[inline(always)]
    fn read_string(&mut self) -> GcId {
        self.read_constant()
            .as_object()
            .expect("identifier constant is not a string")
    }

    fn is_string(&self, value: LunaValue) -> bool {
        matches!(
            value,
            LunaValue::Object(id) if self.pool.get(id).header.kind == ObjKind::String
        )
    }

    fn numeric_operands(&mut self) -> LunaResult<(f64, f64)> {
        let (b, a) = (self.peek(0), self.peek(1));
        match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                Ok((a, b))
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    // ============ The interpreter loop ============

    fn run(&mut self) -> LunaResult<LunaValue> {
        loop {
            let byte = self.read_byte();
            let Some(op) = OpCode::from_byte(byte) else {
                let message = format!("Unknown opcode {}.", byte);
                return Err(self.runtime_error(&message));
            };

            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Null => self.push(LunaValue::Null),
                OpCode::True => self.push(LunaValue::Bool(true)),
                OpCode::False => self.push(LunaValue::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active call frame").base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active call frame").base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let Some(value) = self.globals.get(&name).copied() else {
                        let message =
                            format!("Undefined variable '{}'.", self.pool.string(name).as_str());
                        return Err(self.runtime_error(&message));
                    };
                    self.push(value);
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    if !self.globals.contains_key(&name) {
                        let message =
                            format!("Undefined variable '{}'.", self.pool.string(name).as_str());
                        return Err(self.runtime_error(&message));
                    }
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                }
                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active call frame").closure;
                    let upvalue = self.upvalue_handle(closure, index);
                    let state = self.pool.upvalue(upvalue).state;
                    let value = match state {
                        UpvalueState::Open(slot) => self.stack[slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active call frame").closure;
                    let upvalue = self.upvalue_handle(closure, index);
                    let value = self.peek(0);
                    let state = self.pool.upvalue(upvalue).state;
                    match state {
                        UpvalueState::Open(slot) => self.stack[slot] = value,
                        UpvalueState::Closed(_) => {
                            self.pool.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                }

                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    let Some(instance) = self.as_instance(receiver) else {
                        return Err(self.runtime_error("Only instances have properties."));
                    };
                    let field = self.pool.instance(instance).fields.get(&name).copied();
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let structure = self.pool.instance(instance).structure;
                        self.bind_method(structure, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let Some(instance) = self.as_instance(self.peek(1)) else {
                        return Err(self.runtime_error("Only instances have fields."));
                    };
                    let value = self.peek(0);
                    self.pool.instance_mut(instance).fields.insert(name, value);
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superstruct = self
                        .pop()
                        .as_object()
                        .expect("superstruct is not an object");
                    self.bind_method(superstruct, name)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(LunaValue::Bool(a == b));
                }
                OpCode::Greater => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(LunaValue::Bool(a > b));
                }
                OpCode::Less => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(LunaValue::Bool(a < b));
                }

                OpCode::Add => {
                    let (b, a) = (self.peek(0), self.peek(1));
                    if self.is_string(a) && self.is_string(b) {
                        self.concatenate()?;
                    } else if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
                        self.pop();
                        self.pop();
                        self.push(LunaValue::Number(a + b));
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                OpCode::Subtract => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(LunaValue::Number(a - b));
                }
                OpCode::Multiply => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(LunaValue::Number(a * b));
                }
                OpCode::Divide => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(LunaValue::Number(a / b));
                }
                OpCode::Mod => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(LunaValue::Number(a % b));
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(LunaValue::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let Some(n) = self.peek(0).as_number() else {
                        return Err(self.runtime_error("Operand must be a number."));
                    };
                    self.pop();
                    self.push(LunaValue::Number(-n));
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.stringify(value);
                    self.write_out(&text);
                }
                OpCode::Println => {
                    let value = self.pop();
                    let mut text = self.stringify(value);
                    text.push('\n');
                    self.write_out(&text);
                }

                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("no active call frame").ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().expect("no active call frame").ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("no active call frame").ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    self.call_value(self.peek(arg_count), arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    let receiver = self.peek(arg_count);
                    let Some(instance) = self.as_instance(receiver) else {
                        return Err(self.runtime_error("Only instances have methods."));
                    };
                    let field = self.pool.instance(instance).fields.get(&name).copied();
                    if let Some(field) = field {
                        // A field shadows a method of the same name.
                        let slot = self.stack.len() - arg_count - 1;
                        self.stack[slot] = field;
                        self.call_value(field, arg_count)?;
                    } else {
                        let structure = self.pool.instance(instance).structure;
                        self.invoke_from_struct(structure, name, arg_count)?;
                    }
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    let superstruct = self
                        .pop()
                        .as_object()
                        .expect("superstruct is not an object");
                    self.invoke_from_struct(superstruct, name, arg_count)?;
                }
                OpCode::Closure => {
                    let function = self
                        .read_constant()
                        .as_object()
                        .expect("closure constant is not a function");
                    let upvalue_count = self.pool.function(function).upvalue_count;
                    let closure = self.allocate(GcObjectData::Closure(LunaClosure {
                        function,
                        upvalues: vec![None; upvalue_count],
                    }));
                    // On the stack before the captures below can allocate.
                    self.push(LunaValue::object(closure));
                    let (base, enclosing) = {
                        let frame = self.frames.last().expect("no active call frame");
                        (frame.base, frame.closure)
                    };
                    for i in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let captured = if is_local {
                            self.capture_upvalue(base + index)
                        } else {
                            self.upvalue_handle(enclosing, index)
                        };
                        self.pool.closure_mut(closure).upvalues[i] = Some(captured);
                    }
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no active call frame");
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.push(result);
                }

                OpCode::Struct => {
                    let name = self.read_string();
                    let structure = self.allocate(GcObjectData::Struct(LunaStruct {
                        name,
                        methods: Table::default(),
                    }));
                    self.push(LunaValue::object(structure));
                }
                OpCode::Inherit => {
                    let Some(superstruct) = self.as_struct(self.peek(1)) else {
                        return Err(self.runtime_error("Superstruct must be a struct."));
                    };
                    let substruct = self
                        .peek(0)
                        .as_object()
                        .expect("inheriting struct is not an object");
                    // Copy-down inheritance: methods land in the substruct
                    // before its own methods are installed, so overrides win.
                    let methods = self.pool.structure(superstruct).methods.clone();
                    self.pool.structure_mut(substruct).methods.extend(methods);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let structure = self
                        .peek(1)
                        .as_object()
                        .expect("method target is not a struct");
                    self.pool.structure_mut(structure).methods.insert(name, method);
                    self.pop();
                }

                OpCode::AddList => {
                    let value = self.pop();
                    let Some(list) = self.as_list(self.peek(0)) else {
                        return Err(self.runtime_error("Can only append to lists."));
                    };
                    self.pool.list_mut(list).elements.push(value);
                }
            }
        }
    }

    /// Concatenate the two strings at stack top. Operands stay on the
    /// stack until the result exists so a collector step cannot free
    /// them.
    fn concatenate(&mut self) -> LunaResult<()> {
        let b = self.peek(0).as_object().expect("operand is not an object");
        let a = self.peek(1).as_object().expect("operand is not an object");
        let mut text = String::with_capacity(
            self.pool.string(a).data.len() + self.pool.string(b).data.len(),
        );
        text.push_str(&self.pool.string(a).data);
        text.push_str(&self.pool.string(b).data);
        let result = self.take_string(text);
        self.pop();
        self.pop();
        self.push(LunaValue::object(result));
        Ok(())
    }

    fn as_instance(&self, value: LunaValue) -> Option<GcId> {
        match value {
            LunaValue::Object(id) if self.pool.get(id).header.kind == ObjKind::Instance => {
                Some(id)
            }
            _ => None,
        }
    }

    fn as_struct(&self, value: LunaValue) -> Option<GcId> {
        match value {
            LunaValue::Object(id) if self.pool.get(id).header.kind == ObjKind::Struct => Some(id),
            _ => None,
        }
    }

    fn as_list(&self, value: LunaValue) -> Option<GcId> {
        match value {
            LunaValue::Object(id) if self.pool.get(id).header.kind == ObjKind::List => Some(id),
            _ => None,
        }
    }
}

impl Default for LunaVM {
    fn default() -> Self {
        Self::new()
    }
}

// Luna single-pass compiler
// A Pratt parser that emits bytecode as it consumes tokens; there is no
// AST. Compilers stack one entry per function being compiled, and every
// in-progress function object is a GC root for the duration.

mod code;
mod expr;
mod func_state;
pub mod scanner;
mod stmt;

pub use func_state::{FunctionKind, UpvalueDesc};

use smol_str::SmolStr;
use std::path::Path;

use crate::gc::{GcId, GcObjectData, LunaFunction};
use crate::luna_vm::{LunaError, LunaResult, LunaVM};
use func_state::{FuncState, StructScope};
use scanner::{Scanner, Token, TokenKind};

pub(crate) struct Parser {
    current: Token,
    previous: Token,
    had_error: bool,
    panic_mode: bool,
}

impl Parser {
    fn new() -> Self {
        Parser {
            current: Token::placeholder(),
            previous: Token::placeholder(),
            had_error: false,
            panic_mode: false,
        }
    }
}

pub struct Compiler<'vm> {
    vm: &'vm mut LunaVM,
    scanner: Scanner,
    parser: Parser,
    /// One entry per function being compiled, innermost last.
    states: Vec<FuncState>,
    /// One entry per textually enclosing struct declaration.
    struct_scopes: Vec<StructScope>,
    module_name: SmolStr,
}

/// Compile a module to its top-level function object. Diagnostics go to
/// stderr; any error makes the whole compilation fail.
pub(crate) fn compile(vm: &mut LunaVM, module: &str, source: &str) -> LunaResult<GcId> {
    let mut compiler = Compiler {
        vm,
        scanner: Scanner::new(source),
        parser: Parser::new(),
        states: Vec::new(),
        struct_scopes: Vec::new(),
        module_name: SmolStr::new(module),
    };

    compiler.init_func_state(FunctionKind::Script);

    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }

    let (function, _) = compiler.end_func_state();
    if compiler.parser.had_error {
        Err(LunaError::CompileError)
    } else {
        Ok(function)
    }
}

impl<'vm> Compiler<'vm> {
    /// Public entry point; equivalent to [`LunaVM::compile`].
    pub fn compile(vm: &mut LunaVM, module: &str, source: &str) -> LunaResult<GcId> {
        compile(vm, module, source)
    }

    // ===== Compiler stack =====

    pub(super) fn current_state(&self) -> &FuncState {
        self.states.last().expect("no function under compilation")
    }

    pub(super) fn current_state_mut(&mut self) -> &mut FuncState {
        self.states
            .last_mut()
            .expect("no function under compilation")
    }

    /// Push a fresh function state. Import reuses the enclosing function
    /// so the module body is appended in place; everything else gets a
    /// new function object, registered as a GC root right away.
    fn init_func_state(&mut self, kind: FunctionKind) {
        let function = if kind == FunctionKind::Import {
            self.current_state().function
        } else {
            self.vm
                .allocate(GcObjectData::Function(LunaFunction::new()))
        };
        self.vm.compiler_roots.push(function);
        self.states.push(FuncState::new(function, kind));

        if !matches!(kind, FunctionKind::Script | FunctionKind::Import) {
            let name = self.vm.copy_string(&self.parser.previous.lexeme);
            self.vm.pool.function_mut(function).name = Some(name);
        }
    }

    /// Seal the innermost function: synthesize its return, record the
    /// final upvalue count and hand back the descriptors for the
    /// `Closure` operand stream.
    fn end_func_state(&mut self) -> (GcId, Vec<UpvalueDesc>) {
        self.emit_return();
        let state = self.states.pop().expect("no function under compilation");
        self.vm.pool.function_mut(state.function).upvalue_count = state.upvalues.len();
        self.vm.compiler_roots.pop();
        (state.function, state.upvalues)
    }

    /// Unwind an import state. No synthetic return and no upvalue count:
    /// the function object belongs to the importer.
    fn end_import_state(&mut self) {
        self.states.pop();
        self.vm.compiler_roots.pop();
    }

    // ===== Token primitives =====

    pub(super) fn advance(&mut self) {
        self.parser.previous = std::mem::replace(&mut self.parser.current, Token::placeholder());

        loop {
            self.parser.current = self.scanner.scan_token();
            if self.parser.current.kind != TokenKind::Error {
                break;
            }
            let message = self.parser.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    pub(super) fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.parser.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.parser.current.kind == kind
    }

    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ===== Diagnostics =====

    pub(super) fn error(&mut self, message: &str) {
        let token = self.parser.previous.clone();
        self.error_at(&token, message);
    }

    pub(super) fn error_at_current(&mut self, message: &str) {
        let token = self.parser.current.clone();
        self.error_at(&token, message);
    }

    /// First error wins until the next synchronization point.
    pub(super) fn error_at(&mut self, token: &Token, message: &str) {
        if self.parser.panic_mode {
            return;
        }
        self.parser.panic_mode = true;

        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {} - in {}", message, self.module_name);

        self.parser.had_error = true;
    }

    // ===== Module import =====

    pub(super) fn import_declaration(&mut self) {
        self.consume(TokenKind::String, "Expect module name.");
        let token = self.parser.previous.clone();
        let lexeme = token.lexeme.as_str();
        let name = lexeme.trim_matches('"');
        self.import_module(&token, name);
    }

    /// Splice a module into the current compilation. The scanner, parser
    /// and module name are saved, a fresh Import state reuses the
    /// enclosing function, and everything is restored when the module
    /// runs out of tokens.
    fn import_module(&mut self, token: &Token, name: &str) {
        if self.current_state().scope_depth > 0 {
            let message = match self.current_state().kind {
                FunctionKind::Method => "Cannot import modules inside a method.",
                FunctionKind::Initializer => "Cannot import modules inside struct initializer.",
                FunctionKind::Function => "Cannot import modules inside function.",
                FunctionKind::Import | FunctionKind::Script => {
                    "Cannot import modules inside statement."
                }
            };
            self.error_at(token, message);
            return;
        }

        let file_name = format!("{}.luna", name);

        if self.vm.imported_modules.contains(file_name.as_str()) {
            let message = format!("module '{}' already imported.", file_name);
            self.error_at(token, &message);
            return;
        }
        self.vm.imported_modules.insert(SmolStr::new(&file_name));

        let path = self.vm.module_root.join(&file_name);
        let source = match read_module_file(&path) {
            Some(source) => source,
            None => {
                let message = format!("Could not open module file '{}'.", file_name);
                self.error_at(token, &message);
                return;
            }
        };

        let saved_scanner = std::mem::replace(&mut self.scanner, Scanner::new(&source));
        let saved_parser = std::mem::replace(&mut self.parser, Parser::new());
        let saved_module =
            std::mem::replace(&mut self.module_name, SmolStr::new(&file_name));

        self.init_func_state(FunctionKind::Import);

        self.advance();
        while !self.match_token(TokenKind::Eof) {
            self.declaration();
        }

        self.end_import_state();

        let module_had_error = self.parser.had_error;
        self.scanner = saved_scanner;
        self.parser = saved_parser;
        self.module_name = saved_module;
        // An error anywhere fails the whole compilation.
        self.parser.had_error |= module_had_error;
    }
}

/// Read a module source file, stripping a UTF-8 BOM if present.
fn read_module_file(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let bytes = match bytes.strip_prefix(&[0xef, 0xbb, 0xbf][..]) {
        Some(rest) => rest,
        None => &bytes,
    };
    Some(String::from_utf8_lossy(bytes).into_owned())
}

// Luna Runtime
// A compact scripting-language implementation: single-pass bytecode
// compiler, incremental mark-sweep GC and a stack-based VM.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod gc;
pub mod luna_value;
pub mod luna_vm;
pub mod stdlib;

pub use compiler::Compiler;
pub use gc::{GC, GcId, GcPhase, ObjectPool};
pub use luna_value::{Chunk, LunaValue};
pub use luna_vm::{LunaError, LunaFullError, LunaResult, LunaVM, OpCode};

/// Main entry point for executing Luna code.
pub fn execute(module: &str, source: &str) -> Result<LunaValue, LunaFullError> {
    let mut vm = LunaVM::new();
    vm.open_libs();
    vm.interpret(module, source)
        .map_err(|kind| vm.into_full_error(kind))
}

/// Execute Luna code on a caller-managed VM instance.
pub fn execute_with_vm(
    vm: &mut LunaVM,
    module: &str,
    source: &str,
) -> Result<LunaValue, LunaFullError> {
    vm.interpret(module, source)
        .map_err(|kind| vm.into_full_error(kind))
}

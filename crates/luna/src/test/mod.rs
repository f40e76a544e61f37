// Test module organization
pub mod test_compiler;
pub mod test_closures;
pub mod test_gc;
pub mod test_imports;
pub mod test_structs;

use crate::gc::GcId;
use crate::luna_vm::LunaVM;

/// Compile a snippet and hand back the VM plus the script function.
pub(crate) fn compile_program(source: &str) -> (LunaVM, GcId) {
    let mut vm = LunaVM::new();
    let function = vm
        .compile("test", source)
        .expect("program failed to compile");
    (vm, function)
}

/// Run a snippet with the native library loaded and captured output.
pub(crate) fn run_program(source: &str) -> String {
    let mut vm = LunaVM::new();
    vm.open_libs();
    vm.capture_output();
    if let Err(kind) = vm.interpret("test", source) {
        panic!("program failed: {} {}", kind, vm.error_message);
    }
    vm.take_output()
}

/// Run a snippet expecting a runtime failure; returns the error message.
pub(crate) fn run_program_expect_error(source: &str) -> String {
    let mut vm = LunaVM::new();
    vm.open_libs();
    vm.capture_output();
    match vm.interpret("test", source) {
        Ok(_) => panic!("program unexpectedly succeeded"),
        Err(_) => vm.error_message.clone(),
    }
}

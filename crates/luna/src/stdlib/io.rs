// I/O natives. Soft failures (missing file, bad argument) yield null
// rather than a runtime error.

use std::io::BufRead;

use crate::luna_value::LunaValue;
use crate::luna_vm::{LunaResult, LunaVM};

/// Seconds elapsed since the VM was created.
pub(super) fn clock(vm: &mut LunaVM, _args: &[LunaValue]) -> LunaResult<LunaValue> {
    Ok(LunaValue::number(vm.elapsed_seconds()))
}

/// Read one line from stdin, without the trailing newline.
pub(super) fn input(vm: &mut LunaVM, _args: &[LunaValue]) -> LunaResult<LunaValue> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => Ok(LunaValue::null()),
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            let id = vm.take_string(line);
            Ok(LunaValue::object(id))
        }
    }
}

/// `write(path, content)`: write the content string to a file. True on
/// success, false when the write fails, null on bad arguments.
pub(super) fn write(vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    let (Some(path), Some(content)) = (vm.value_as_str(args[0]), vm.value_as_str(args[1])) else {
        return Ok(LunaValue::null());
    };
    match std::fs::write(&path, content.as_bytes()) {
        Ok(()) => Ok(LunaValue::boolean(true)),
        Err(_) => Ok(LunaValue::boolean(false)),
    }
}

/// Read a whole file into a string; null when it cannot be read.
pub(super) fn open(vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    let Some(path) = vm.value_as_str(args[0]) else {
        return Ok(LunaValue::null());
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let id = vm.take_string(contents);
            Ok(LunaValue::object(id))
        }
        Err(_) => Ok(LunaValue::null()),
    }
}

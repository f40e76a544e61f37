// Compile a script and dump the bytecode of every function in it,
// without executing anything.

use luna::gc::GcObjectData;
use luna::luna_vm::debug_info::disassemble_chunk;
use luna::LunaVM;
use std::process::exit;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: bytecode_dump <script.luna>");
        exit(64);
    }

    let source = match std::fs::read_to_string(&args[1]) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", args[1]);
            exit(74);
        }
    };

    let mut vm = LunaVM::new();
    let script = match vm.compile(&args[1], &source) {
        Ok(function) => function,
        Err(_) => exit(65),
    };

    // The script function plus every function reachable through the
    // constant pools, compilation order preserved.
    let mut pending = vec![script];
    while let Some(function) = pending.pop() {
        let name = vm.stringify(luna::LunaValue::object(function));
        print!("{}", disassemble_chunk(vm.pool(), &vm.pool().function(function).chunk, &name));

        for constant in &vm.pool().function(function).chunk.constants {
            if let Some(id) = constant.as_object() {
                if matches!(vm.pool().get(id).data, GcObjectData::Function(_)) {
                    pending.push(id);
                }
            }
        }
    }
}

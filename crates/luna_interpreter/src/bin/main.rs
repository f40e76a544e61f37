use luna::LunaVM;
use luna::luna_vm::LunaError;
use luna::luna_vm::luna_limits::REPL_LINE_MAX;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::exit;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = "Luna Version - 0.1.0";

// Exit codes follow the BSD sysexits convention.
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

fn repl(vm: &mut LunaVM) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(_)) | None => {
                println!();
                break;
            }
        };
        if line.len() > REPL_LINE_MAX {
            let mut cut = REPL_LINE_MAX;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }

        if line.trim() == "exit" {
            println!();
            break;
        }

        if let Err(kind) = vm.interpret("REPL", &line) {
            if kind != LunaError::CompileError {
                eprint!("{}", vm.error_message);
            }
        }
    }
}

fn run_file(vm: &mut LunaVM, path: &str) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path);
            return EX_IOERR;
        }
    };

    // Imports resolve relative to the script's directory.
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            vm.set_module_root(parent);
        }
    }

    match vm.interpret(path, &source) {
        Ok(_) => 0,
        Err(LunaError::CompileError) => EX_DATAERR,
        Err(_) => {
            eprint!("{}", vm.error_message);
            EX_SOFTWARE
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut vm = LunaVM::new();
    vm.open_libs();

    match args.len() {
        1 => repl(&mut vm),
        2 => {
            if args[1] == "--version" {
                println!("{}", VERSION);
                return;
            }
            let code = run_file(&mut vm, &args[1]);
            if code != 0 {
                exit(code);
            }
        }
        _ => {
            eprintln!("Usage: luna [path]");
            exit(EX_USAGE);
        }
    }
}

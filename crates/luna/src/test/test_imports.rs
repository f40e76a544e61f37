use crate::luna_vm::LunaVM;
use std::path::PathBuf;

/// Fresh module directory per test so parallel runs cannot collide.
fn module_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("luna_modules_{}_{}", std::process::id(), name));
    std::fs::create_dir_all(&dir).expect("failed to create module dir");
    dir
}

fn write_module(dir: &PathBuf, name: &str, source: &str) {
    std::fs::write(dir.join(format!("{}.luna", name)), source).expect("failed to write module");
}

#[test]
fn test_import_defines_globals() {
    let dir = module_dir("defines");
    write_module(&dir, "answers", "var answer = 42\ndef double(x) { return x * 2 }");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    vm.capture_output();
    vm.interpret("main", "import \"answers\"\nprint double(answer)")
        .expect("program failed");
    assert_eq!(vm.take_output(), "84");
}

#[test]
fn test_import_strips_bom() {
    let dir = module_dir("bom");
    let mut bytes = vec![0xef, 0xbb, 0xbf];
    bytes.extend_from_slice(b"var bom_ok = true");
    std::fs::write(dir.join("bommed.luna"), bytes).expect("failed to write module");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    vm.capture_output();
    vm.interpret("main", "import \"bommed\"\nprint bom_ok")
        .expect("program failed");
    assert_eq!(vm.take_output(), "true");
}

#[test]
fn test_duplicate_import_is_an_error() {
    let dir = module_dir("duplicate");
    write_module(&dir, "lib", "var lib_value = 1");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    assert!(
        vm.compile("main", "import \"lib\"\nimport \"lib\"")
            .is_err()
    );
}

#[test]
fn test_import_registry_spans_compilations() {
    let dir = module_dir("registry");
    write_module(&dir, "once", "var once_value = 1");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    vm.interpret("first", "import \"once\"").expect("program failed");
    // The registry is VM-wide: a later compilation hits the block too.
    assert!(vm.compile("second", "import \"once\"").is_err());
}

#[test]
fn test_missing_module_is_an_error() {
    let dir = module_dir("missing");
    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    assert!(vm.compile("main", "import \"does_not_exist\"").is_err());
}

#[test]
fn test_import_inside_function_is_an_error() {
    let dir = module_dir("nested_fn");
    write_module(&dir, "lib", "var x = 1");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    assert!(
        vm.compile("main", "def f() { import \"lib\" }")
            .is_err()
    );
}

#[test]
fn test_import_inside_block_is_an_error() {
    let dir = module_dir("nested_block");
    write_module(&dir, "lib", "var x = 1");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    assert!(vm.compile("main", "{ import \"lib\" }").is_err());
}

#[test]
fn test_import_error_propagates_to_importer() {
    let dir = module_dir("broken");
    write_module(&dir, "broken", "var = 1");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    assert!(vm.compile("main", "import \"broken\"").is_err());
}

#[test]
fn test_transitive_imports() {
    let dir = module_dir("transitive");
    write_module(&dir, "inner", "var base = 10");
    write_module(&dir, "outer", "import \"inner\"\nvar derived = base + 5");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    vm.capture_output();
    vm.interpret("main", "import \"outer\"\nprint derived")
        .expect("program failed");
    assert_eq!(vm.take_output(), "15");
}

#[test]
fn test_import_cycle_is_blocked() {
    let dir = module_dir("cycle");
    write_module(&dir, "a", "import \"b\"\nvar from_a = 1");
    write_module(&dir, "b", "import \"a\"\nvar from_b = 2");

    let mut vm = LunaVM::new();
    vm.set_module_root(&dir);
    // b's import of a hits the registry and reports a duplicate; the
    // cycle terminates instead of recursing forever.
    assert!(vm.compile("main", "import \"a\"").is_err());
}

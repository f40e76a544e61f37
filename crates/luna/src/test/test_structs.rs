use super::{compile_program, run_program, run_program_expect_error};
use crate::luna_vm::{LunaVM, OpCode};

#[test]
fn test_struct_declaration_and_instantiation() {
    let output = run_program(
        "
struct Point;
var p = Point()
print Point
print p
",
    );
    assert_eq!(output, "<struct Point><Point instance>");
}

#[test]
fn test_fields() {
    let output = run_program(
        "
struct Box;
var b = Box()
b.value = 41
b.value = b.value + 1
print b.value
",
    );
    assert_eq!(output, "42");
}

#[test]
fn test_initializer_runs_and_returns_receiver() {
    let output = run_program(
        "
struct Pair {
    def init(a, b) {
        self.a = a
        self.b = b
    }
    def sum() { return self.a + self.b }
}
print Pair(3, 4).sum()
",
    );
    assert_eq!(output, "7");
}

#[test]
fn test_methods_bind_their_receiver() {
    let output = run_program(
        "
struct Greeter {
    def init(name) { self.name = name }
    def greet() { return \"hi \" + self.name }
}
var g = Greeter(\"luna\")
var bound = g.greet
print bound()
",
    );
    assert_eq!(output, "hi luna");
}

#[test]
fn test_inheritance_and_super_invoke() {
    let output = run_program(
        "
struct A {
    def init() { self.v = 1 }
    def m() { return self.v }
}
struct B : A {
    def m() { return super.m() + 1 }
}
print B().m()
",
    );
    assert_eq!(output, "2");
}

#[test]
fn test_super_invoke_is_emitted() {
    let (vm, script) = compile_program(
        "
struct A { def m() { return 1 } }
struct B : A { def m() { return super.m() + 1 } }
",
    );
    // Walk every function constant transitively looking for the fused
    // super-dispatch opcode.
    let mut pending = vec![script];
    let mut found = false;
    while let Some(function) = pending.pop() {
        let chunk = &vm.pool().function(function).chunk;
        let mut offset = 0;
        while offset < chunk.code.len() {
            let op = OpCode::from_byte(chunk.code[offset]).expect("bad opcode");
            if op == OpCode::SuperInvoke {
                found = true;
            }
            offset += match op {
                OpCode::Jump | OpCode::Loop | OpCode::JumpIfFalse => 3,
                OpCode::Invoke | OpCode::SuperInvoke => 3,
                OpCode::Closure => {
                    let constant = chunk.code[offset + 1];
                    let inner = chunk.constants[constant as usize]
                        .as_object()
                        .expect("closure constant");
                    pending.push(inner);
                    2 + 2 * vm.pool().function(inner).upvalue_count
                }
                OpCode::Constant
                | OpCode::GetLocal
                | OpCode::SetLocal
                | OpCode::GetGlobal
                | OpCode::DefineGlobal
                | OpCode::SetGlobal
                | OpCode::GetUpvalue
                | OpCode::SetUpvalue
                | OpCode::GetProperty
                | OpCode::SetProperty
                | OpCode::GetSuper
                | OpCode::Call
                | OpCode::Struct
                | OpCode::Method => 2,
                _ => 1,
            };
        }
    }
    assert!(found, "no SuperInvoke emitted");
}

#[test]
fn test_inherited_method_without_override() {
    let output = run_program(
        "
struct A { def hello() { return \"hello\" } }
struct B : A;
print B().hello()
",
    );
    assert_eq!(output, "hello");
}

#[test]
fn test_get_super_without_call() {
    let output = run_program(
        "
struct A { def m() { return 10 } }
struct B : A {
    def m() {
        var parent = super.m
        return parent() + 5
    }
}
print B().m()
",
    );
    assert_eq!(output, "15");
}

#[test]
fn test_field_shadows_method_on_invoke() {
    let output = run_program(
        "
def free() { return \"field\" }
struct S {
    def act() { return \"method\" }
}
var s = S()
s.act = free
print s.act()
",
    );
    assert_eq!(output, "field");
}

#[test]
fn test_self_outside_struct_fails() {
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", "print self").is_err());
}

#[test]
fn test_super_outside_struct_fails() {
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", "print super.m()").is_err());
}

#[test]
fn test_super_in_leaf_struct_fails() {
    let mut vm = LunaVM::new();
    assert!(
        vm.compile("test", "struct A { def m() { return super.m() } }")
            .is_err()
    );
}

#[test]
fn test_struct_in_local_scope_fails() {
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", "{ struct S; }").is_err());
}

#[test]
fn test_struct_inheriting_itself_fails() {
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", "struct S : S;").is_err());
}

#[test]
fn test_calling_struct_with_args_but_no_init_fails() {
    let message = run_program_expect_error("struct S;\nS(1)");
    assert!(message.contains("Expected 0 arguments but got 1."));
}

#[test]
fn test_property_access_on_non_instance_fails() {
    let message = run_program_expect_error("var x = 1\nprint x.field");
    assert!(message.contains("Only instances have properties."));
}

#[test]
fn test_undefined_property_fails() {
    let message = run_program_expect_error("struct S;\nprint S().missing");
    assert!(message.contains("Undefined property 'missing'."));
}

use super::compile_program;
use crate::luna_value::LunaValue;
use crate::luna_vm::{LunaError, LunaVM, OpCode};

fn code_of(source: &str) -> Vec<u8> {
    let (vm, function) = compile_program(source);
    vm.pool().function(function).chunk.code.clone()
}

fn compile_error(source: &str) -> LunaError {
    let mut vm = LunaVM::new();
    vm.compile("test", source)
        .expect_err("program unexpectedly compiled")
}

#[test]
fn test_empty_program_emits_null_return() {
    assert_eq!(
        code_of(""),
        vec![OpCode::Null as u8, OpCode::Return as u8]
    );
}

#[test]
fn test_arithmetic_precedence_emission() {
    // Multiplication binds tighter than addition.
    assert_eq!(
        code_of("print 1 + 2 * 3"),
        vec![
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::Constant as u8,
            2,
            OpCode::Multiply as u8,
            OpCode::Add as u8,
            OpCode::Print as u8,
            OpCode::Null as u8,
            OpCode::Return as u8,
        ]
    );
}

#[test]
fn test_comparison_lowering() {
    // != lowers to Equal + Not, >= to Less + Not, <= to Greater + Not.
    let code = code_of("print 1 != 2");
    assert_eq!(
        &code[4..6],
        &[OpCode::Equal as u8, OpCode::Not as u8]
    );

    let code = code_of("print 1 >= 2");
    assert_eq!(&code[4..6], &[OpCode::Less as u8, OpCode::Not as u8]);

    let code = code_of("print 1 <= 2");
    assert_eq!(&code[4..6], &[OpCode::Greater as u8, OpCode::Not as u8]);
}

#[test]
fn test_constants_recorded_in_order() {
    let (vm, function) = compile_program("print 1 + 2 * 3");
    let constants = &vm.pool().function(function).chunk.constants;
    assert_eq!(
        constants,
        &vec![
            LunaValue::number(1.0),
            LunaValue::number(2.0),
            LunaValue::number(3.0)
        ]
    );
}

#[test]
fn test_expression_statement_pops() {
    assert_eq!(
        code_of("1"),
        vec![
            OpCode::Constant as u8,
            0,
            OpCode::Pop as u8,
            OpCode::Null as u8,
            OpCode::Return as u8,
        ]
    );
}

#[test]
fn test_global_var_declaration() {
    let (vm, function) = compile_program("var x = 1");
    let chunk = &vm.pool().function(function).chunk;
    // Constant for the initializer plus the interned name.
    assert_eq!(chunk.code[0], OpCode::Constant as u8);
    assert_eq!(chunk.code[2], OpCode::DefineGlobal as u8);
}

#[test]
fn test_var_without_initializer_defaults_to_null() {
    let code = code_of("var x");
    assert_eq!(code[0], OpCode::Null as u8);
    assert_eq!(code[1], OpCode::DefineGlobal as u8);
}

#[test]
fn test_local_slots() {
    let code = code_of("{ var a = 1 var b = a }");
    // `a` initializes from constant, `b` reads slot 1 (slot 0 reserved),
    // then both pop on scope exit.
    assert_eq!(
        code,
        vec![
            OpCode::Constant as u8,
            0,
            OpCode::GetLocal as u8,
            1,
            OpCode::Pop as u8,
            OpCode::Pop as u8,
            OpCode::Null as u8,
            OpCode::Return as u8,
        ]
    );
}

#[test]
fn test_line_map_parallels_code() {
    let (vm, function) = compile_program("var x = 1\nprint x");
    let chunk = &vm.pool().function(function).chunk;
    assert_eq!(chunk.code.len(), chunk.lines.len());
    assert_eq!(chunk.lines[0], 1);
    assert_eq!(chunk.lines[chunk.code.len() - 3], 2);
}

#[test]
fn test_jump_operands_are_big_endian() {
    let code = code_of("if (true) print 1");
    // True, JumpIfFalse <hi lo>, ...
    assert_eq!(code[0], OpCode::True as u8);
    assert_eq!(code[1], OpCode::JumpIfFalse as u8);
    let offset = ((code[2] as u16) << 8) | code[3] as u16;
    // Skips Pop, Constant k, Print and the 3-byte Jump over the else
    // branch, landing on the falsey-path Pop.
    assert_eq!(offset, 7);
}

#[test]
fn test_self_initializer_is_an_error() {
    assert_eq!(
        compile_error("{ var a = a }"),
        LunaError::CompileError
    );
}

#[test]
fn test_invalid_assignment_target() {
    assert_eq!(compile_error("1 + 2 = 3"), LunaError::CompileError);
}

#[test]
fn test_leading_semicolon_is_an_error() {
    assert_eq!(compile_error("; print 1"), LunaError::CompileError);
}

#[test]
fn test_duplicate_local_in_same_scope() {
    assert_eq!(
        compile_error("{ var a = 1 var a = 2 }"),
        LunaError::CompileError
    );
}

#[test]
fn test_return_at_top_level_is_an_error() {
    assert_eq!(compile_error("return 1"), LunaError::CompileError);
}

#[test]
fn test_256_constants_compile() {
    let mut source = String::new();
    for i in 0..256 {
        source.push_str(&format!("print {}\n", i));
    }
    let (vm, function) = compile_program(&source);
    assert_eq!(vm.pool().function(function).chunk.constants.len(), 256);
}

#[test]
fn test_constant_pool_overflow() {
    let mut source = String::new();
    for i in 0..257 {
        source.push_str(&format!("print {}\n", i));
    }
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", &source).is_err());
}

#[test]
fn test_255_locals_compile() {
    // Slot 0 is reserved, so 255 declared locals fill the frame.
    let mut source = String::from("{\n");
    for i in 0..255 {
        source.push_str(&format!("var l{} = 0\n", i));
    }
    source.push('}');
    let (_, _) = compile_program(&source);
}

#[test]
fn test_too_many_locals() {
    let mut source = String::from("{\n");
    for i in 0..256 {
        source.push_str(&format!("var l{} = 0\n", i));
    }
    source.push('}');
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", &source).is_err());
}

#[test]
fn test_255_arguments_compile() {
    let args: Vec<String> = (0..255).map(|i| i.to_string()).collect();
    let source = format!("f({})", args.join(", "));
    // 255 numbers but the pool also holds the callee name; fits in 256.
    let (_, _) = compile_program(&source);
}

#[test]
fn test_256_arguments_fail() {
    let args = vec!["0"; 256];
    let source = format!("f({})", args.join(", "));
    let mut vm = LunaVM::new();
    assert!(vm.compile("test", &source).is_err());
}

#[test]
fn test_script_function_has_no_name() {
    let (vm, function) = compile_program("print 1");
    assert!(vm.pool().function(function).name.is_none());
    assert_eq!(vm.pool().function(function).arity, 0);
}

#[test]
fn test_function_declaration_records_name_and_arity() {
    let (vm, function) = compile_program("def add(a, b) { return a + b }");
    let constants = &vm.pool().function(function).chunk.constants;
    let inner = constants
        .iter()
        .find_map(|value| {
            value.as_object().filter(|&id| {
                matches!(
                    vm.pool().get(id).data,
                    crate::gc::GcObjectData::Function(_)
                )
            })
        })
        .expect("no function constant");
    let inner = vm.pool().function(inner);
    assert_eq!(inner.arity, 2);
    let name = inner.name.expect("function has no name");
    assert_eq!(vm.pool().string(name).as_str(), "add");
}

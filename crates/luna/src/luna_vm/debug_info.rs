// Chunk disassembler. Renders one instruction per line as
// `offset line mnemonic operands`; consumed by the bytecode_dump binary
// and by tests that assert on emitted code shape.

use std::fmt::Write;

use super::OpCode;
use crate::gc::{GcObjectData, ObjectPool};
use crate::luna_value::{Chunk, LunaValue};

pub fn disassemble_chunk(pool: &ObjectPool, chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(pool, chunk, offset, &mut out);
    }
    out
}

pub fn disassemble_instruction(
    pool: &ObjectPool,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let _ = write!(out, "{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        let _ = write!(out, "  |  ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        let _ = writeln!(out, "unknown opcode {}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant => constant_instruction("push_constant", pool, chunk, offset, out),
        OpCode::Null => simple_instruction("push_null", offset, out),
        OpCode::True => simple_instruction("push_true", offset, out),
        OpCode::False => simple_instruction("push_false", offset, out),
        OpCode::Pop => simple_instruction("pop", offset, out),

        OpCode::GetLocal => byte_instruction("get_local", chunk, offset, out),
        OpCode::SetLocal => byte_instruction("set_local", chunk, offset, out),
        OpCode::GetGlobal => constant_instruction("get_global", pool, chunk, offset, out),
        OpCode::DefineGlobal => constant_instruction("define_global", pool, chunk, offset, out),
        OpCode::SetGlobal => constant_instruction("set_global", pool, chunk, offset, out),
        OpCode::GetUpvalue => byte_instruction("get_upvalue", chunk, offset, out),
        OpCode::SetUpvalue => byte_instruction("set_upvalue", chunk, offset, out),
        OpCode::CloseUpvalue => simple_instruction("close_upvalue", offset, out),

        OpCode::GetProperty => constant_instruction("get_property", pool, chunk, offset, out),
        OpCode::SetProperty => constant_instruction("set_property", pool, chunk, offset, out),
        OpCode::GetSuper => constant_instruction("get_super", pool, chunk, offset, out),

        OpCode::Equal => simple_instruction("op_equal", offset, out),
        OpCode::Greater => simple_instruction("op_greater", offset, out),
        OpCode::Less => simple_instruction("op_less", offset, out),

        OpCode::Add => simple_instruction("add", offset, out),
        OpCode::Subtract => simple_instruction("sub", offset, out),
        OpCode::Multiply => simple_instruction("mul", offset, out),
        OpCode::Divide => simple_instruction("div", offset, out),
        OpCode::Mod => simple_instruction("mod", offset, out),
        OpCode::Not => simple_instruction("not", offset, out),
        OpCode::Negate => simple_instruction("negate", offset, out),

        OpCode::Print => simple_instruction("print", offset, out),
        OpCode::Println => simple_instruction("println", offset, out),

        OpCode::Jump => jump_instruction("jump", 1, chunk, offset, out),
        OpCode::JumpIfFalse => jump_instruction("jump_if_false", 1, chunk, offset, out),
        OpCode::Loop => jump_instruction("loop", -1, chunk, offset, out),

        OpCode::Call => byte_instruction("call", chunk, offset, out),
        OpCode::Invoke => invoke_instruction("invoke", pool, chunk, offset, out),
        OpCode::SuperInvoke => invoke_instruction("super_invoke", pool, chunk, offset, out),
        OpCode::Closure => closure_instruction(pool, chunk, offset, out),
        OpCode::Return => simple_instruction("return", offset, out),

        OpCode::Struct => constant_instruction("struct", pool, chunk, offset, out),
        OpCode::Inherit => simple_instruction("inherit", offset, out),
        OpCode::Method => constant_instruction("method", pool, chunk, offset, out),

        OpCode::AddList => simple_instruction("add_list", offset, out),
    }
}

fn simple_instruction(name: &str, offset: usize, out: &mut String) -> usize {
    let _ = writeln!(out, "{}", name);
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code[offset + 1];
    let _ = writeln!(out, "{:<16} {:4}", name, slot);
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let jump = ((chunk.code[offset + 1] as u16) << 8) | chunk.code[offset + 2] as u16;
    let target = offset as i64 + 3 + sign as i64 * jump as i64;
    let _ = writeln!(out, "{:<16} {:4} -> {}", name, offset, target);
    offset + 3
}

fn constant_instruction(
    name: &str,
    pool: &ObjectPool,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let constant = chunk.code[offset + 1];
    let _ = writeln!(
        out,
        "{:<16} {:4} '{}'",
        name,
        constant,
        render_constant(pool, chunk.constants[constant as usize])
    );
    offset + 2
}

fn invoke_instruction(
    name: &str,
    pool: &ObjectPool,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let constant = chunk.code[offset + 1];
    let arg_count = chunk.code[offset + 2];
    let _ = writeln!(
        out,
        "{:<16} ({} args) {:4} '{}'",
        name,
        arg_count,
        constant,
        render_constant(pool, chunk.constants[constant as usize])
    );
    offset + 3
}

fn closure_instruction(pool: &ObjectPool, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset];
    offset += 1;
    let _ = writeln!(
        out,
        "{:<16} {:4} {}",
        "closure",
        constant,
        render_constant(pool, chunk.constants[constant as usize])
    );

    if let Some(id) = chunk.constants[constant as usize].as_object() {
        for _ in 0..pool.function(id).upvalue_count {
            let is_local = chunk.code[offset];
            let index = chunk.code[offset + 1];
            let _ = writeln!(
                out,
                "{:04}  |  {} {}",
                offset,
                if is_local != 0 { "local" } else { "upvalue" },
                index
            );
            offset += 2;
        }
    }
    offset
}

fn render_constant(pool: &ObjectPool, value: LunaValue) -> String {
    match value {
        LunaValue::Null => "null".to_string(),
        LunaValue::Bool(b) => b.to_string(),
        LunaValue::Number(n) => n.to_string(),
        LunaValue::Object(id) => match &pool.get(id).data {
            GcObjectData::String(s) => s.data.clone(),
            GcObjectData::Function(f) => match f.name {
                Some(name) => format!("<fn {}>", pool.string(name).as_str()),
                None => "<script>".to_string(),
            },
            GcObjectData::List(_) => "<list>".to_string(),
            other => format!("<{:?}>", other.kind()),
        },
    }
}

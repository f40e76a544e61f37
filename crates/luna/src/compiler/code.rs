// Bytecode emission helpers. Every byte is written into the chunk of the
// function object currently being compiled, tagged with the line of the
// previously consumed token.

use super::Compiler;
use super::func_state::FunctionKind;
use super::scanner::Token;
use crate::luna_value::{Chunk, LunaValue};
use crate::luna_vm::OpCode;
use crate::luna_vm::luna_limits::{MAX_JUMP, UINT8_COUNT};

impl Compiler<'_> {
    pub(super) fn current_chunk_mut(&mut self) -> &mut Chunk {
        let function = self.current_state().function;
        &mut self.vm.pool.function_mut(function).chunk
    }

    pub(super) fn current_chunk_len(&self) -> usize {
        let function = self.current_state().function;
        self.vm.pool.function(function).chunk.code.len()
    }

    pub(super) fn emit_byte(&mut self, byte: u8) {
        let line = self.parser.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    pub(super) fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    pub(super) fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    pub(super) fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    /// Backward jump to `loop_start`. The operand counts from the byte
    /// after itself, hence the +2.
    pub(super) fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.current_chunk_len() - loop_start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    /// Forward jump with a placeholder operand; returns the operand
    /// offset for `patch_jump`.
    pub(super) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk_len() - 2
    }

    /// Point the placeholder at `offset` to the current write head.
    pub(super) fn patch_jump(&mut self, offset: usize) {
        // -2 skips the operand itself.
        let jump = self.current_chunk_len() - offset - 2;

        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
        }

        let chunk = self.current_chunk_mut();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    /// Synthetic return: initializers yield the receiver, everything
    /// else yields null.
    pub(super) fn emit_return(&mut self) {
        if self.current_state().kind == FunctionKind::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Null);
        }
        self.emit_op(OpCode::Return);
    }

    pub(super) fn make_constant(&mut self, value: LunaValue) -> u8 {
        if self.current_chunk_mut().constants.len() >= UINT8_COUNT {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.current_chunk_mut().add_constant(value) as u8
    }

    pub(super) fn emit_constant(&mut self, value: LunaValue) {
        let constant = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, constant);
    }

    /// Intern the identifier's lexeme and store it in the constant pool.
    pub(super) fn identifier_constant(&mut self, name: &Token) -> u8 {
        let id = self.vm.copy_string(&name.lexeme);
        self.make_constant(LunaValue::object(id))
    }
}

// Declarations and statements. Statement terminators are positional:
// newlines carry no tokens and semicolons are only legal in for-clauses,
// bare returns and empty struct declarations.

use super::Compiler;
use super::func_state::{FunctionKind, Local, StructScope};
use super::scanner::{Token, TokenKind};
use crate::luna_value::LunaValue;
use crate::luna_vm::OpCode;
use crate::luna_vm::luna_limits::UINT8_COUNT;

impl Compiler<'_> {
    pub(super) fn declaration(&mut self) {
        if self.match_token(TokenKind::Semicolon) {
            self.error("Unexpected token ';'.");
        } else if self.match_token(TokenKind::Import) {
            self.import_declaration();
        } else if self.match_token(TokenKind::Struct) {
            self.struct_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.synchronize();
        }
    }

    pub(super) fn statement(&mut self) {
        if self.match_token(TokenKind::Semicolon) {
            self.error("Unexpected token ';'.");
        } else if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::Println) {
            self.println_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    /// Discard tokens until a statement boundary so one mistake does not
    /// cascade into a wall of diagnostics.
    fn synchronize(&mut self) {
        self.parser.panic_mode = false;

        while self.parser.current.kind != TokenKind::Eof {
            if self.parser.previous.kind == TokenKind::Semicolon {
                return;
            }

            match self.parser.current.kind {
                TokenKind::Struct
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }

            self.advance();
        }
    }

    // ===== Declarations =====

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Null);
        }

        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized before the body compiles, so the function can
        // recurse through its own name.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    pub(super) fn function(&mut self, kind: FunctionKind) {
        self.init_func_state(kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let function = self.current_state().function;
                if self.vm.pool.function(function).arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.vm.pool.function_mut(function).arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after function parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");

        self.block();

        let (function, upvalues) = self.end_func_state();
        let constant = self.make_constant(LunaValue::object(function));
        self.emit_op_byte(OpCode::Closure, constant);

        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Fun, "Expect 'def' keyword to declare method.");
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.parser.previous.clone();
        let constant = self.identifier_constant(&name);

        // The exact lexeme `init` compiles as the initializer, whose
        // implicit return is the receiver.
        let kind = if name.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };

        self.function(kind);
        self.emit_op_byte(OpCode::Method, constant);
    }

    fn struct_declaration(&mut self) {
        if self.current_state().scope_depth > 0 {
            self.error("Cannot declare struct out of global scope.");
        }

        self.consume(TokenKind::Identifier, "Expect struct name.");
        let struct_name = self.parser.previous.clone();
        let name_constant = self.identifier_constant(&struct_name);
        self.declare_variable();

        self.emit_op_byte(OpCode::Struct, name_constant);
        self.define_variable(name_constant);

        self.struct_scopes.push(StructScope {
            has_superstruct: false,
        });

        if self.match_token(TokenKind::Colon) {
            self.consume(TokenKind::Identifier, "Expect superstruct name.");
            let superstruct = self.parser.previous.clone();
            self.named_variable(&superstruct, false);

            if struct_name.lexeme == superstruct.lexeme {
                self.error("A struct can't copy behavior from itself.");
            }

            // A scope holding the `super` local wraps the methods so
            // they capture it as an upvalue.
            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(&struct_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(scope) = self.struct_scopes.last_mut() {
                scope.has_superstruct = true;
            }
        }

        // Load the struct back on the stack so methods bind to it.
        self.named_variable(&struct_name, false);

        if self.check(TokenKind::LeftBrace) {
            self.consume(TokenKind::LeftBrace, "Expect '{' before struct body.");
            while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                self.method();
            }
            self.consume(TokenKind::RightBrace, "Expect '}' after struct body.");
        } else {
            self.consume(
                TokenKind::Semicolon,
                "Expect ';' after empty struct declaration.",
            );
        }

        self.emit_op(OpCode::Pop);

        let had_superstruct = self
            .struct_scopes
            .pop()
            .is_some_and(|scope| scope.has_superstruct);
        if had_superstruct {
            self.end_scope();
        }
    }

    // ===== Statements =====

    fn print_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Print);
    }

    fn println_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Println);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// Classic three-clause desugaring: the increment compiles before the
    /// body in the code stream, so the body jumps over it forwards and
    /// loops back through it.
    fn for_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // Empty initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
            self.consume(
                TokenKind::Semicolon,
                "Expect ';' after 'for' var declaration.",
            );
        } else {
            self.expression_statement();
            self.consume(
                TokenKind::Semicolon,
                "Expect ';' after 'for' expression clause.",
            );
        }

        let mut loop_start = self.current_chunk_len();
        let mut exit_jump: Option<usize> = None;

        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after 'for' clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.current_state().kind == FunctionKind::Script {
            self.error("Can't return from top level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current_state().kind == FunctionKind::Initializer {
                self.error("Cannot return a value from initializer.");
            }

            self.expression();
            self.emit_op(OpCode::Return);
        }
    }

    pub(super) fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    // ===== Variables and scope =====

    /// Consume an identifier; locals are declared here, globals get a
    /// constant-pool slot for their name.
    pub(super) fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.current_state().scope_depth > 0 {
            return 0;
        }

        let name = self.parser.previous.clone();
        self.identifier_constant(&name)
    }

    pub(super) fn declare_variable(&mut self) {
        if self.current_state().scope_depth == 0 {
            return;
        }

        let name = self.parser.previous.clone();
        let state = self.current_state();

        let mut duplicate = false;
        for local in state.locals.iter().rev() {
            if local.depth != -1 && local.depth < state.scope_depth {
                break;
            }
            if local.name == name.lexeme {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name);
    }

    pub(super) fn add_local(&mut self, name: Token) {
        if self.current_state().locals.len() >= UINT8_COUNT {
            self.error("Too many local variables in function.");
            return;
        }

        self.current_state_mut().locals.push(Local {
            name: name.lexeme,
            depth: -1,
            is_captured: false,
        });
    }

    pub(super) fn mark_initialized(&mut self) {
        let state = self.current_state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = depth;
        }
    }

    pub(super) fn define_variable(&mut self, global: u8) {
        if self.current_state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    pub(super) fn begin_scope(&mut self) {
        self.current_state_mut().scope_depth += 1;
    }

    /// Pop every local belonging to the closed scope. A captured local
    /// gets hoisted into its upvalue before the slot is popped.
    pub(super) fn end_scope(&mut self) {
        self.current_state_mut().scope_depth -= 1;

        loop {
            let state = self.current_state();
            let Some(local) = state.locals.last() else {
                break;
            };
            if local.depth <= state.scope_depth {
                break;
            }
            let captured = local.is_captured;

            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            }
            self.emit_op(OpCode::Pop);

            self.current_state_mut().locals.pop();
        }
    }
}

// Pratt expression parsing. Each token kind maps to an optional prefix
// handler, an optional infix handler and a precedence; `parse_precedence`
// drives the climb and threads the single `can_assign` flag that makes
// assignment targets explicit.

use super::Compiler;
use super::func_state::{LocalResolution, UpvalueError, resolve_local, resolve_upvalue};
use super::scanner::{Token, TokenKind};
use crate::gc::{GcObjectData, LunaList};
use crate::luna_value::LunaValue;
use crate::luna_vm::OpCode;
use crate::luna_vm::luna_limits::{MAX_ARGS, MAX_LIST_ITEMS};

/// Precedence ladder, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = for<'a, 'b> fn(&'a mut Compiler<'b>, bool);

pub(super) struct ParseRule {
    pub prefix: Option<ParseFn>,
    pub infix: Option<ParseFn>,
    pub precedence: Precedence,
}

const fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

pub(super) fn get_rule(kind: TokenKind) -> ParseRule {
    match kind {
        TokenKind::LeftParen => rule(Some(grouping), Some(call), Precedence::Call),
        TokenKind::Dot => rule(None, Some(dot), Precedence::Call),
        TokenKind::LeftBracket => rule(Some(list), None, Precedence::None),
        TokenKind::Minus => rule(Some(unary), Some(binary), Precedence::Term),
        TokenKind::Plus => rule(None, Some(binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star | TokenKind::Mod => {
            rule(None, Some(binary), Precedence::Factor)
        }
        TokenKind::Bang => rule(Some(unary), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            rule(None, Some(binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => rule(None, Some(binary), Precedence::Comparison),
        TokenKind::Identifier => rule(Some(variable), None, Precedence::None),
        TokenKind::String => rule(Some(string), None, Precedence::None),
        TokenKind::Number => rule(Some(number), None, Precedence::None),
        TokenKind::And => rule(None, Some(and_), Precedence::And),
        TokenKind::Or => rule(None, Some(or_), Precedence::Or),
        TokenKind::False | TokenKind::True | TokenKind::Null => {
            rule(Some(literal), None, Precedence::None)
        }
        TokenKind::Super => rule(Some(super_), None, Precedence::None),
        TokenKind::Self_ => rule(Some(self_), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

impl Compiler<'_> {
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.parser.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        // Assignment is only legal when the surrounding context parses at
        // assignment precedence; the flag travels to the lvalue handlers.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.parser.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.parser.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Comma-separated arguments up to the 255 limit.
    pub(super) fn argument_list(&mut self) -> u8 {
        let mut arg_count: usize = 0;

        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                }
                arg_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count.min(MAX_ARGS) as u8
    }

    /// Resolve an identifier local -> upvalue -> global and emit the
    /// matching get or set.
    pub(super) fn named_variable(&mut self, name: &Token, can_assign: bool) {
        let (get_op, set_op, arg) = match resolve_local(self.current_state(), name) {
            LocalResolution::Slot(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            LocalResolution::OwnInitializer(slot) => {
                self.error("Can't read local variable in its own initializer.");
                (OpCode::GetLocal, OpCode::SetLocal, slot)
            }
            LocalResolution::NotFound => {
                let level = self.states.len() - 1;
                match resolve_upvalue(&mut self.states, level, name) {
                    Ok(Some(index)) => (OpCode::GetUpvalue, OpCode::SetUpvalue, index),
                    Ok(None) => {
                        let arg = self.identifier_constant(name);
                        (OpCode::GetGlobal, OpCode::SetGlobal, arg)
                    }
                    Err(UpvalueError::TooMany) => {
                        self.error("Too many closure variables in function.");
                        (OpCode::GetUpvalue, OpCode::SetUpvalue, 0)
                    }
                    Err(UpvalueError::OwnInitializer) => {
                        self.error("Can't read local variable in its own initializer.");
                        (OpCode::GetUpvalue, OpCode::SetUpvalue, 0)
                    }
                }
            }
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }
}

// ===== Prefix and infix handlers =====

fn grouping(c: &mut Compiler, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expect ')' after expression.");
}

fn number(c: &mut Compiler, _can_assign: bool) {
    let value: f64 = c.parser.previous.lexeme.parse().unwrap_or(0.0);
    c.emit_constant(LunaValue::number(value));
}

fn string(c: &mut Compiler, _can_assign: bool) {
    let lexeme = c.parser.previous.lexeme.clone();
    let inner = &lexeme[1..lexeme.len() - 1];
    let id = c.vm.copy_string(inner);
    c.emit_constant(LunaValue::object(id));
}

fn literal(c: &mut Compiler, _can_assign: bool) {
    match c.parser.previous.kind {
        TokenKind::False => c.emit_op(OpCode::False),
        TokenKind::True => c.emit_op(OpCode::True),
        TokenKind::Null => c.emit_op(OpCode::Null),
        _ => {}
    }
}

fn variable(c: &mut Compiler, can_assign: bool) {
    let name = c.parser.previous.clone();
    c.named_variable(&name, can_assign);
}

fn unary(c: &mut Compiler, _can_assign: bool) {
    let operator = c.parser.previous.kind;

    c.parse_precedence(Precedence::Unary);

    match operator {
        TokenKind::Bang => c.emit_op(OpCode::Not),
        TokenKind::Minus => c.emit_op(OpCode::Negate),
        _ => {}
    }
}

fn binary(c: &mut Compiler, _can_assign: bool) {
    let operator = c.parser.previous.kind;
    let precedence = get_rule(operator).precedence;
    c.parse_precedence(precedence.next());

    match operator {
        TokenKind::BangEqual => c.emit_ops(OpCode::Equal, OpCode::Not),
        TokenKind::EqualEqual => c.emit_op(OpCode::Equal),
        TokenKind::Greater => c.emit_op(OpCode::Greater),
        TokenKind::GreaterEqual => c.emit_ops(OpCode::Less, OpCode::Not),
        TokenKind::Less => c.emit_op(OpCode::Less),
        TokenKind::LessEqual => c.emit_ops(OpCode::Greater, OpCode::Not),
        TokenKind::Plus => c.emit_op(OpCode::Add),
        TokenKind::Minus => c.emit_op(OpCode::Subtract),
        TokenKind::Star => c.emit_op(OpCode::Multiply),
        TokenKind::Slash => c.emit_op(OpCode::Divide),
        TokenKind::Mod => c.emit_op(OpCode::Mod),
        _ => {}
    }
}

fn and_(c: &mut Compiler, _can_assign: bool) {
    let end_jump = c.emit_jump(OpCode::JumpIfFalse);

    c.emit_op(OpCode::Pop);
    c.parse_precedence(Precedence::And);

    c.patch_jump(end_jump);
}

fn or_(c: &mut Compiler, _can_assign: bool) {
    let else_jump = c.emit_jump(OpCode::JumpIfFalse);
    let end_jump = c.emit_jump(OpCode::Jump);

    c.patch_jump(else_jump);
    c.emit_op(OpCode::Pop);

    c.parse_precedence(Precedence::Or);
    c.patch_jump(end_jump);
}

fn call(c: &mut Compiler, _can_assign: bool) {
    let arg_count = c.argument_list();
    c.emit_op_byte(OpCode::Call, arg_count);
}

fn dot(c: &mut Compiler, can_assign: bool) {
    c.consume(TokenKind::Identifier, "Expect property name after '.'.");
    let property = c.parser.previous.clone();
    let name = c.identifier_constant(&property);

    if can_assign && c.match_token(TokenKind::Equal) {
        c.expression();
        c.emit_op_byte(OpCode::SetProperty, name);
    } else if c.match_token(TokenKind::LeftParen) {
        let arg_count = c.argument_list();
        c.emit_op_byte(OpCode::Invoke, name);
        c.emit_byte(arg_count);
    } else {
        c.emit_op_byte(OpCode::GetProperty, name);
    }
}

fn super_(c: &mut Compiler, _can_assign: bool) {
    match c.struct_scopes.last() {
        None => c.error("Can't use 'super' outside of struct."),
        Some(scope) if !scope.has_superstruct => c.error("Can't use 'super' in leaf struct."),
        _ => {}
    }

    c.consume(TokenKind::Dot, "Expect '.' after 'super'.");
    c.consume(TokenKind::Identifier, "Expect superstruct method name.");
    let method = c.parser.previous.clone();
    let name = c.identifier_constant(&method);

    c.named_variable(&Token::synthetic("self"), false);

    if c.match_token(TokenKind::LeftParen) {
        let arg_count = c.argument_list();
        c.named_variable(&Token::synthetic("super"), false);
        c.emit_op_byte(OpCode::SuperInvoke, name);
        c.emit_byte(arg_count);
    } else {
        c.named_variable(&Token::synthetic("super"), false);
        c.emit_op_byte(OpCode::GetSuper, name);
    }
}

fn self_(c: &mut Compiler, _can_assign: bool) {
    if c.struct_scopes.is_empty() {
        c.error("Can't use 'self' outside of struct.");
        return;
    }
    variable(c, false);
}

/// List literal. The empty list is created at compile time and lives in
/// the constant pool; it stays pinned on the VM stack while the element
/// expressions compile, since those can allocate and wake the collector.
fn list(c: &mut Compiler, _can_assign: bool) {
    let list = c.vm.allocate(GcObjectData::List(LunaList {
        elements: Vec::new(),
    }));
    c.vm.push(LunaValue::object(list));

    let constant = c.make_constant(LunaValue::object(list));
    c.emit_op_byte(OpCode::Constant, constant);

    let mut length: usize = 0;
    if !c.check(TokenKind::RightBracket) {
        loop {
            if length < MAX_LIST_ITEMS {
                c.expression();
                c.emit_op(OpCode::AddList);
                length += 1;
            } else {
                c.error("Can't have more than 255 values in one list.");
            }
            if !c.match_token(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightBracket, "Expect ']' after list values.");

    c.vm.pop();
}

//! Single-pass Pratt compiler: drives the scanner and emits bytecode directly,
//! with no intermediate AST. Tracks a stack of nested function compilers (for
//! closures/upvalues) and a stack of active classes (so `this` can be
//! rejected outside one).

use crate::bytecode::{Chunk, OpCode};
use crate::gc::Heap;
use crate::lexer::Scanner;
use crate::object::{FunctionKind, GcRef, ObjFunction, ObjString};
use crate::table::Table;
use crate::token::{Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_PARAMS: u8 = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
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

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

#[derive(Clone, Copy)]
struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

fn rule<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    macro_rules! r {
        ($prefix:expr, $infix:expr, $prec:ident) => {
            ParseRule { prefix: $prefix, infix: $infix, precedence: Precedence::$prec }
        };
    }
    match kind {
        TokenKind::LeftParen => r!(Some(Parser::grouping), Some(Parser::call), Call),
        TokenKind::Dot => r!(None, Some(Parser::dot), Call),
        TokenKind::Minus => r!(Some(Parser::unary), Some(Parser::binary), Term),
        TokenKind::Plus => r!(None, Some(Parser::binary), Term),
        TokenKind::Slash => r!(None, Some(Parser::binary), Factor),
        TokenKind::Star => r!(None, Some(Parser::binary), Factor),
        TokenKind::Bang => r!(Some(Parser::unary), None, None),
        TokenKind::BangEqual => r!(None, Some(Parser::binary), Equality),
        TokenKind::EqualEqual => r!(None, Some(Parser::binary), Equality),
        TokenKind::Greater => r!(None, Some(Parser::binary), Comparison),
        TokenKind::GreaterEqual => r!(None, Some(Parser::binary), Comparison),
        TokenKind::Less => r!(None, Some(Parser::binary), Comparison),
        TokenKind::LessEqual => r!(None, Some(Parser::binary), Comparison),
        TokenKind::Identifier => r!(Some(Parser::variable), None, None),
        TokenKind::String => r!(Some(Parser::string), None, None),
        TokenKind::Number => r!(Some(Parser::number), None, None),
        TokenKind::And => r!(None, Some(Parser::and), And),
        TokenKind::Or => r!(None, Some(Parser::or), Or),
        TokenKind::False => r!(Some(Parser::literal), None, None),
        TokenKind::Nil => r!(Some(Parser::literal), None, None),
        TokenKind::True => r!(Some(Parser::literal), None, None),
        TokenKind::This => r!(Some(Parser::this), None, None),
        // No `super` prefix rule: this dialect has no inheritance (see DESIGN.md),
        // so `super` parses as a bare keyword with no expression form.
        _ => r!(None, None, None),
    }
}

#[derive(Clone)]
struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionScope {
    function: GcRef<ObjFunction>,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
}

/// One entry per syntactically-enclosing class, so `this` can be rejected
/// outside of any method body.
struct ClassScope;

struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    scopes: Vec<FunctionScope>,
    classes: Vec<ClassScope>,
    heap: &'h mut Heap,
    globals: &'h Table,
    init_string: GcRef<ObjString>,
    stress_gc: bool,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(
        source: &'src str,
        heap: &'h mut Heap,
        globals: &'h Table,
        init_string: GcRef<ObjString>,
        stress_gc: bool,
    ) -> Self {
        let mut scanner = Scanner::new(source);
        let first = scanner.scan_token();
        Parser {
            scanner,
            previous: first,
            current: first,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            scopes: Vec::new(),
            classes: Vec::new(),
            heap,
            globals,
            init_string,
            stress_gc,
        }
    }

    // ---- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let context = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors
            .push(CompileError { line: token.line, message: format!("Error{context}: {message}") });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- emission -----------------------------------------------------

    fn current_scope(&self) -> &FunctionScope {
        self.scopes.last().expect("no active function scope")
    }

    fn current_scope_mut(&mut self) -> &mut FunctionScope {
        self.scopes.last_mut().expect("no active function scope")
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        let function = self.current_scope().function;
        &mut self.heap.function_mut(function).chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        let kind = self.current_scope().kind;
        if kind == FunctionKind::Method {
            // `init()` implicitly returns the instance (slot 0, `this`); every
            // other method falls through to the normal implicit nil return.
            let name = self
                .heap
                .function(self.current_scope().function)
                .name
                .map(|n| self.heap.string(n).as_str().into_owned());
            if name.as_deref() == Some("init") {
                self.emit_op_byte(OpCode::GetLocal, 0);
                self.emit_op(OpCode::Return);
                return;
            }
        }
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    /// Interns `bytes` and pushes the constant, reporting overflow.
    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, idx);
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let r = self.heap.intern(name.lexeme.as_bytes().to_vec());
        self.make_constant(Value::Obj(r.erase()))
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.current_chunk().emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.current_chunk().patch_jump(offset).is_err() {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        if self.current_chunk().emit_loop(loop_start, line).is_err() {
            self.error("Loop body too large.");
        }
    }

    // ---- scope / locals -----------------------------------------------------

    fn begin_scope(&mut self) {
        self.current_scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let line = self.previous.line;
        self.current_scope_mut().scope_depth -= 1;
        let depth = self.current_scope().scope_depth;
        while let Some(local) = self.current_scope().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = local.is_captured;
            self.current_scope_mut().locals.pop();
            if captured {
                self.current_chunk().write_op(OpCode::CloseUpvalue, line);
            } else {
                self.current_chunk().write_op(OpCode::Pop, line);
            }
        }
    }

    fn add_local(&mut self, name: String) {
        // `locals` always carries one reserved slot-0 entry (the callee, or
        // `this` for a method) alongside user-declared ones. GET_LOCAL/SET_LOCAL
        // address a slot with a `u8` operand, so 256 total entries (indices
        // 0..255) is a hard ceiling, not just a convention to enforce.
        if self.current_scope().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_scope_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self, name: Token<'src>) {
        if self.current_scope().scope_depth == 0 {
            return;
        }
        let lexeme = name.lexeme.to_string();
        let depth = self.current_scope().scope_depth;
        for local in self.current_scope().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == lexeme {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(lexeme);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous;
        self.declare_variable(name);
        if self.current_scope().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        if self.current_scope().scope_depth == 0 {
            return;
        }
        let depth = self.current_scope().scope_depth;
        self.current_scope_mut().locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_scope().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        let locals = &self.scopes[scope_idx].locals;
        for (i, local) in locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn add_upvalue(&mut self, scope_idx: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &self.scopes[scope_idx].upvalues;
        for (i, uv) in upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.scopes[scope_idx].upvalues.push(UpvalueDesc { index, is_local });
        (self.scopes[scope_idx].upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        if scope_idx == 0 {
            return None;
        }
        let enclosing = scope_idx - 1;
        if let Some(local_idx) = self.resolve_local(enclosing, name) {
            self.scopes[enclosing].locals[local_idx as usize].is_captured = true;
            return Some(self.add_upvalue(scope_idx, local_idx, true));
        }
        if let Some(upvalue_idx) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(scope_idx, upvalue_idx, false));
        }
        None
    }

    // ---- Pratt core -----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = rule::<'src, 'h>(self.previous.kind).prefix;
        let Some(prefix) = prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule::<'src, 'h>(self.current.kind).precedence {
            self.advance();
            let infix = rule::<'src, 'h>(self.previous.kind).infix.expect("infix rule must exist");
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    // ---- expression rules -----------------------------------------------------

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let bytes = lexeme[1..lexeme.len() - 1].as_bytes().to_vec();
        let r = self.heap.intern(bytes);
        self.emit_constant(Value::Obj(r.erase()));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable(self.previous, false);
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let lexeme = name.lexeme;
        let scope_idx = self.scopes.len() - 1;

        let (get_op, set_op, slot) = if let Some(idx) = self.resolve_local(scope_idx, lexeme) {
            (OpCode::GetLocal, OpCode::SetLocal, idx)
        } else if let Some(idx) = self.resolve_upvalue(scope_idx, lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, slot);
        } else {
            self.emit_op_byte(get_op, slot);
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        let rule = rule::<'src, 'h>(kind);
        self.parse_precedence(rule.precedence.next());
        match kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous;
        let constant = self.identifier_constant(name);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, constant);
        } else {
            self.emit_op_byte(OpCode::GetProperty, constant);
        }
    }

    // ---- statements -----------------------------------------------------

    fn declaration(&mut self) {
        self.maybe_collect();
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name_token = self.previous;
        let name_constant = self.identifier_constant(name_token);
        self.declare_variable(name_token);
        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassScope);
        self.named_variable(name_token, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_token = self.previous;
        let constant = self.identifier_constant(name_token);
        self.function(FunctionKind::Method);
        self.emit_op_byte(OpCode::Method, constant);
    }

    /// Compiles a nested function body (for `fun` declarations and methods),
    /// pushing a fresh `FunctionScope`, and — once the body is compiled — emits
    /// a `CLOSURE` instruction into the *enclosing* scope's chunk.
    fn function(&mut self, kind: FunctionKind) {
        let name_token = self.previous;
        let name_bytes = name_token.lexeme.as_bytes().to_vec();
        let name_ref = self.heap.intern(name_bytes);

        let mut function = ObjFunction::new();
        function.name = Some(name_ref);
        let function_ref = self.heap.alloc_function(function);

        let reserved = if kind == FunctionKind::Method { "this" } else { "" };
        let locals = vec![Local { name: reserved.to_string(), depth: 0, is_captured: false }];
        self.scopes.push(FunctionScope { function: function_ref, kind, locals, scope_depth: 0, upvalues: Vec::new() });
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = self.heap.function(self.current_scope().function).arity;
                if arity == MAX_PARAMS {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    let function_ref = self.current_scope().function;
                    self.heap.function_mut(function_ref).arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        let scope = self.scopes.pop().expect("pushed above");
        self.heap.function_mut(function_ref).upvalue_count = scope.upvalues.len();

        let const_idx = self.make_constant(Value::Obj(function_ref.erase()));
        self.emit_op_byte(OpCode::Closure, const_idx);
        for uv in &scope.upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
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

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn return_statement(&mut self) {
        if self.current_scope().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current_scope().kind == FunctionKind::Method {
                let name = self
                    .heap
                    .function(self.current_scope().function)
                    .name
                    .map(|n| self.heap.string(n).as_str().into_owned());
                if name.as_deref() == Some("init") {
                    self.error("Can't return a value from an initializer.");
                }
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
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

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
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
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

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

    fn current_chunk_len(&mut self) -> usize {
        self.current_chunk().len()
    }

    /// Triggers a collection at a statement boundary — a safe point where every
    /// live value is either on the (currently empty, at compile time) VM stack,
    /// in globals, or reachable from the active function-compiler chain, all of
    /// which `maybe_collect`'s roots closure covers.
    fn maybe_collect(&mut self) {
        if !self.heap.should_collect(self.stress_gc) {
            return;
        }
        let scopes: Vec<GcRef<ObjFunction>> = self.scopes.iter().map(|s| s.function).collect();
        let globals = self.globals;
        let init_string = self.init_string;
        self.heap.collect_garbage(|heap, gray| {
            for f in &scopes {
                heap.mark_object(f.erase(), gray);
            }
            for (k, v) in globals.iter() {
                heap.mark_object(k.erase(), gray);
                heap.mark_value(v, gray);
            }
            heap.mark_object(init_string.erase(), gray);
        });
    }
}

/// Compiles `source` into a top-level script function. `globals` and
/// `init_string` are only read (to serve as extra GC roots while compiling) —
/// compilation never mutates the VM's global table itself.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    globals: &Table,
    init_string: GcRef<ObjString>,
    stress_gc: bool,
) -> Result<GcRef<ObjFunction>, Vec<CompileError>> {
    let mut parser = Parser::new(source, heap, globals, init_string, stress_gc);

    let script = ObjFunction::new();
    let script_ref = parser.heap.alloc_function(script);
    parser.scopes.push(FunctionScope {
        function: script_ref,
        kind: FunctionKind::Script,
        locals: vec![Local { name: String::new(), depth: 0, is_captured: false }],
        scope_depth: 0,
        upvalues: Vec::new(),
    });

    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }

    parser.emit_return();
    let scope = parser.scopes.pop().expect("script scope");
    parser.heap.function_mut(script_ref).upvalue_count = scope.upvalues.len();

    if parser.had_error {
        Err(parser.errors)
    } else {
        Ok(script_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_source(source: &str) -> Result<GcRef<ObjFunction>, Vec<CompileError>> {
        let mut heap = Heap::new();
        let init_string = heap.intern(b"init".to_vec());
        let globals = Table::new();
        compile(source, &mut heap, &globals, init_string, false)
    }

    #[test]
    fn valid_program_compiles() {
        assert!(compile_source("print 1 + 2;").is_ok());
    }

    #[test]
    fn error_message_names_the_offending_token() {
        let errors = compile_source("var x = ;").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("at ';'"));
        assert!(errors[0].message.contains("Expect expression"));
    }

    #[test]
    fn panic_mode_suppresses_cascaded_errors_until_a_statement_boundary() {
        // Two statements, each missing its semicolon: without synchronization
        // at the `;`/statement-keyword boundary this would report far more
        // than two errors as the parser desyncs across the rest of the file.
        let errors = compile_source("var x = 1 var y = 2;").unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn reading_a_local_in_its_own_initializer_is_an_error() {
        let errors = compile_source("{ var a = a; }").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("own initializer")));
    }

    #[test]
    fn returning_from_top_level_is_an_error() {
        let errors = compile_source("return 1;").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("return from top-level")));
    }

    #[test]
    fn this_outside_a_class_is_an_error() {
        let errors = compile_source("fun f() { return this; }").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("'this' outside")));
    }

    #[test]
    fn returning_a_value_from_init_is_an_error() {
        let errors = compile_source("class C { init() { return 1; } }").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("return a value from an initializer")));
    }
}

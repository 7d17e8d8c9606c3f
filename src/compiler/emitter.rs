use crate::compiler::chunk::{
    CatchEntry, ClassTemplate, ClosureUse, CodeChunk, ConstInit, ConstTemplate, FuncParam,
    LvalPath, MethodTemplate, PathBase, PathStep, PropertyTemplate, TypeHint, UserFunc,
};
use crate::core::interner::Interner;
use crate::core::with_stack;
use crate::core::value::{ArrayData, ArrayKey, PhpStr, Symbol, Val, Visibility};
use crate::parser::ast::visitor::{self, Visitor};
use crate::parser::ast::{
    Arg, ArrayItem, ArrowFnDecl, BinaryOp, CastKind, ClassMember, ClassRef, ClosureDecl, Expr,
    ExprId, MagicConst, MemberName, Param, Program, Stmt, StmtId, SyntaxError, Type, UnaryOp,
};
use crate::parser::line_index::LineIndex;
use crate::parser::span::Span;
use crate::vm::opcode::{ClassOperand, IncDecKind, OpCode};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

struct LoopInfo {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
    is_foreach: bool,
    is_switch: bool,
    /// Finally-guarded try regions open when the loop began.
    finally_guard: usize,
    completion_depth: u16,
}

#[derive(Clone, Copy)]
struct ClassScope {
    name: Symbol,
}

/// What a function body is made of.
enum Body<'ast> {
    Block(&'ast [StmtId<'ast>]),
    Arrow(ExprId<'ast>),
    Abstract,
}

struct FunctionSpec<'ast> {
    name: Symbol,
    params: &'ast [Param<'ast>],
    uses: Vec<ClosureUse>,
    by_ref: bool,
    return_type: Option<&'ast Type<'ast>>,
    is_generator: bool,
    is_static: bool,
    is_closure: bool,
    is_method: bool,
    span: Span,
}

/// Variables an arrow function reads from its defining scope.
#[derive(Default)]
struct FreeVariables {
    names: Vec<Vec<u8>>,
}

impl FreeVariables {
    fn add(&mut self, name: &[u8]) {
        if name != b"this" && !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_vec());
        }
    }
}

impl<'ast> Visitor<'ast> for FreeVariables {
    fn visit_expr(&mut self, expr: ExprId<'ast>) {
        if let Expr::Variable { name, .. } = expr {
            self.add(name);
        }
        visitor::walk_expr(self, expr);
    }

    fn visit_closure(&mut self, decl: &'ast ClosureDecl<'ast>) {
        for var in decl.uses {
            self.add(var.name.name);
        }
    }
}

pub struct Emitter<'src> {
    chunk: CodeChunk,
    source: &'src [u8],
    lines: Rc<LineIndex>,
    interner: &'src mut Interner,
    file_path: Rc<str>,
    current_line: u32,
    loop_stack: Vec<LoopInfo>,
    /// Try regions with a finally block enclosing the current instruction.
    finally_guard: usize,
    /// Finally bodies enclosing the current instruction.
    completion_depth: u16,
    /// Foreach loops enclosing the current instruction.
    iter_depth: u16,
    current_class: Option<ClassScope>,
    current_function: Option<Symbol>,
    in_method: bool,
    nullsafe_jumps: Vec<usize>,
    chain_target: bool,
    temp_counter: u32,
    error: Option<SyntaxError>,
}

impl<'src> Emitter<'src> {
    pub fn new(source: &'src [u8], interner: &'src mut Interner) -> Self {
        Self {
            chunk: CodeChunk::default(),
            source,
            lines: Rc::new(LineIndex::new(source)),
            interner,
            file_path: Rc::from("Standard input code"),
            current_line: 1,
            loop_stack: Vec::new(),
            finally_guard: 0,
            completion_depth: 0,
            iter_depth: 0,
            current_class: None,
            current_function: None,
            in_method: false,
            nullsafe_jumps: Vec::new(),
            chain_target: false,
            temp_counter: 0,
            error: None,
        }
    }

    /// File name reported by `__FILE__`, warnings and stack traces.
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Rc::from(path.into());
        self
    }

    pub fn compile(mut self, program: &Program) -> Result<CodeChunk, SyntaxError> {
        self.chunk.strict_types = program.strict_types;
        self.chunk.file = self.file_path.clone();
        self.chunk.name = self.interner.intern(b"{main}");

        self.emit_toplevel_decls(program.statements);
        for stmt in program.statements {
            match stmt {
                // Already declared by the prologue.
                Stmt::Function(_) => {}
                Stmt::Class(_) | Stmt::Interface(_) => self.emit_class_stmt(stmt, true),
                _ => self.emit_stmt(stmt),
            }
        }
        self.push_op(OpCode::ReturnVoid);

        match self.error {
            Some(err) => Err(err),
            None => Ok(self.chunk),
        }
    }

    fn child(&mut self) -> Emitter<'_> {
        let chunk = CodeChunk {
            file: self.file_path.clone(),
            strict_types: self.chunk.strict_types,
            ..CodeChunk::default()
        };
        Emitter {
            chunk,
            source: self.source,
            lines: self.lines.clone(),
            interner: &mut *self.interner,
            file_path: self.file_path.clone(),
            current_line: self.current_line,
            loop_stack: Vec::new(),
            finally_guard: 0,
            completion_depth: 0,
            iter_depth: 0,
            current_class: self.current_class,
            current_function: self.current_function,
            in_method: self.in_method,
            nullsafe_jumps: Vec::new(),
            chain_target: false,
            temp_counter: 0,
            error: None,
        }
    }

    fn record_error(&mut self, span: Span, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(SyntaxError::new(self.source, span, message));
        }
    }

    fn set_current_line(&mut self, span: Span) {
        self.current_line = self.lines.line(span.start);
    }

    fn push_op(&mut self, op: OpCode) -> usize {
        self.chunk.code.push(op);
        self.chunk.lines.push(self.current_line);
        self.chunk.code.len() - 1
    }

    fn here(&self) -> usize {
        self.chunk.code.len()
    }

    fn patch_jump(&mut self, idx: usize, target: usize) {
        let target = target as u32;
        let op = match self.chunk.code[idx] {
            OpCode::Jmp(_) => OpCode::Jmp(target),
            OpCode::JmpIfFalse(_) => OpCode::JmpIfFalse(target),
            OpCode::JmpIfTrue(_) => OpCode::JmpIfTrue(target),
            OpCode::JmpIfFalseKeep(_) => OpCode::JmpIfFalseKeep(target),
            OpCode::JmpIfTrueKeep(_) => OpCode::JmpIfTrueKeep(target),
            OpCode::JmpIfNotNullKeep(_) => OpCode::JmpIfNotNullKeep(target),
            OpCode::JmpIfNullKeep(_) => OpCode::JmpIfNullKeep(target),
            OpCode::LeaveJmp {
                completion_depth, ..
            } => OpCode::LeaveJmp {
                target,
                completion_depth,
            },
            OpCode::IterInit { by_ref, .. } => OpCode::IterInit {
                by_ref,
                exit: target,
            },
            OpCode::IterFetch { with_key, .. } => OpCode::IterFetch {
                exit: target,
                with_key,
            },
            OpCode::JmpIfArgPassed { param, .. } => OpCode::JmpIfArgPassed { param, target },
            OpCode::CatchMatch { classes, .. } => OpCode::CatchMatch {
                classes,
                next: target,
            },
            op => panic!("Cannot patch non-jump opcode: {:?}", op),
        };
        self.chunk.code[idx] = op;
    }

    fn patch_here(&mut self, jumps: &[usize]) {
        let target = self.here();
        for &jump in jumps {
            self.patch_jump(jump, target);
        }
    }

    fn add_constant(&mut self, val: Val) -> u32 {
        self.chunk.constants.push(val);
        (self.chunk.constants.len() - 1) as u32
    }

    fn emit_const(&mut self, val: Val) {
        match val {
            Val::Null => self.push_op(OpCode::PushNull),
            Val::Bool(true) => self.push_op(OpCode::PushTrue),
            Val::Bool(false) => self.push_op(OpCode::PushFalse),
            val => {
                let idx = self.add_constant(val);
                self.push_op(OpCode::Const(idx))
            }
        };
    }

    fn intern(&mut self, name: &[u8]) -> Symbol {
        self.interner.intern(name)
    }

    /// Class and function names as written, without a leading backslash.
    fn intern_name(&mut self, name: &[u8]) -> Symbol {
        let name = name.strip_prefix(b"\\").unwrap_or(name);
        self.interner.intern(name)
    }

    fn temp_local(&mut self) -> Symbol {
        let name = format!("\0tmp{}", self.temp_counter);
        self.temp_counter += 1;
        self.interner.intern(name.as_bytes())
    }

    fn add_path(&mut self, path: LvalPath) -> u32 {
        self.chunk.paths.push(path);
        (self.chunk.paths.len() - 1) as u32
    }

    fn local_path(&mut self, name: Symbol) -> u32 {
        self.add_path(LvalPath::local(name))
    }

    fn emit_toplevel_decls(&mut self, stmts: &[StmtId]) {
        let mut has_classes = false;
        for stmt in stmts {
            match stmt {
                Stmt::Function(decl) => {
                    let idx = self.emit_function_decl(decl);
                    self.push_op(OpCode::DeclareFunction(idx));
                }
                Stmt::Class(_) | Stmt::Interface(_) => has_classes = true,
                _ => {}
            }
        }
        if has_classes {
            self.push_op(OpCode::HoistClasses);
        }
    }

    fn emit_function_decl(&mut self, decl: &crate::parser::ast::FunctionDecl) -> u32 {
        let name = self.intern_name(decl.name.name);
        let func = self.emit_function(
            FunctionSpec {
                name,
                params: decl.params,
                uses: Vec::new(),
                by_ref: decl.by_ref,
                return_type: decl.return_type,
                is_generator: decl.is_generator,
                is_static: false,
                is_closure: false,
                is_method: false,
                span: decl.span,
            },
            Body::Block(decl.body),
        );
        self.chunk.functions.push(func);
        (self.chunk.functions.len() - 1) as u32
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        with_stack(|| self.emit_stmt_inner(stmt));
    }

    fn emit_stmt_inner(&mut self, stmt: &Stmt) {
        self.set_current_line(stmt.span());
        match stmt {
            Stmt::Echo { exprs, .. } => {
                for expr in exprs.iter() {
                    self.emit_expr(expr);
                    self.push_op(OpCode::Echo);
                }
            }
            Stmt::InlineHtml { value, .. } => {
                self.emit_const(Val::String(PhpStr::from(*value)));
                self.push_op(OpCode::Echo);
            }
            Stmt::Expression { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::Pop);
            }
            Stmt::If {
                condition,
                then_block,
                else_block,
                ..
            } => {
                self.emit_expr(condition);
                let to_else = self.push_op(OpCode::JmpIfFalse(0));
                self.emit_block(then_block);
                match else_block {
                    Some(else_block) => {
                        let to_end = self.push_op(OpCode::Jmp(0));
                        self.patch_here(&[to_else]);
                        self.emit_block(else_block);
                        self.patch_here(&[to_end]);
                    }
                    None => self.patch_here(&[to_else]),
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                let start = self.here();
                self.emit_expr(condition);
                let exit = self.push_op(OpCode::JmpIfFalse(0));
                self.push_loop(false, false);
                self.emit_block(body);
                self.push_op(OpCode::Jmp(start as u32));
                let info = self.pop_loop();
                self.patch_here(&[exit]);
                self.patch_here(&info.break_jumps);
                for jump in info.continue_jumps {
                    self.patch_jump(jump, start);
                }
            }
            Stmt::DoWhile {
                body, condition, ..
            } => {
                let start = self.here();
                self.push_loop(false, false);
                self.emit_block(body);
                let info = self.pop_loop();
                self.patch_here(&info.continue_jumps);
                self.emit_expr(condition);
                self.push_op(OpCode::JmpIfTrue(start as u32));
                self.patch_here(&info.break_jumps);
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
                ..
            } => {
                for expr in init.iter() {
                    self.emit_expr(expr);
                    self.push_op(OpCode::Pop);
                }
                let start = self.here();
                let mut exit = None;
                if let Some((last, rest)) = condition.split_last() {
                    for expr in rest {
                        self.emit_expr(expr);
                        self.push_op(OpCode::Pop);
                    }
                    self.emit_expr(last);
                    exit = Some(self.push_op(OpCode::JmpIfFalse(0)));
                }
                self.push_loop(false, false);
                self.emit_block(body);
                let info = self.pop_loop();
                self.patch_here(&info.continue_jumps);
                for expr in step.iter() {
                    self.emit_expr(expr);
                    self.push_op(OpCode::Pop);
                }
                self.push_op(OpCode::Jmp(start as u32));
                if let Some(exit) = exit {
                    self.patch_here(&[exit]);
                }
                self.patch_here(&info.break_jumps);
            }
            Stmt::Foreach {
                expr,
                key_var,
                value_var,
                by_ref,
                body,
                ..
            } => self.emit_foreach(expr, *key_var, value_var, *by_ref, body),
            Stmt::Switch { subject, cases, .. } => {
                self.emit_expr(subject);
                let tmp = self.temp_local();
                let tmp_path = self.local_path(tmp);
                self.push_op(OpCode::Assign(tmp_path));
                self.push_op(OpCode::Pop);

                let mut case_jumps = Vec::with_capacity(cases.len());
                for case in cases.iter() {
                    match case.condition {
                        Some(condition) => {
                            self.push_op(OpCode::LoadVarQuiet(tmp));
                            self.emit_expr(condition);
                            self.push_op(OpCode::IsEqual);
                            case_jumps.push(Some(self.push_op(OpCode::JmpIfTrue(0))));
                        }
                        None => case_jumps.push(None),
                    }
                }
                let to_default = self.push_op(OpCode::Jmp(0));

                self.push_loop(false, true);
                let mut default_target = None;
                for (case, jump) in cases.iter().zip(case_jumps) {
                    let target = self.here();
                    match jump {
                        Some(jump) => self.patch_jump(jump, target),
                        None => default_target = Some(target),
                    }
                    self.emit_block(case.body);
                }
                let info = self.pop_loop();
                let end = self.here();
                self.patch_jump(to_default, default_target.unwrap_or(end));
                self.patch_here(&info.break_jumps);
                self.patch_here(&info.continue_jumps);
                let tmp_path = self.local_path(tmp);
                self.push_op(OpCode::Unset(tmp_path));
            }
            Stmt::Break { levels, span } => self.emit_break(*levels, false, *span),
            Stmt::Continue { levels, span } => self.emit_break(*levels, true, *span),
            Stmt::Return { expr, .. } => match expr {
                Some(expr) => {
                    self.emit_expr(expr);
                    self.push_op(OpCode::Return);
                }
                None => {
                    self.push_op(OpCode::ReturnVoid);
                }
            },
            Stmt::Block { statements, .. } => self.emit_block(statements),
            Stmt::Function(decl) => {
                let idx = self.emit_function_decl(decl);
                self.push_op(OpCode::DeclareFunction(idx));
            }
            Stmt::Class(_) | Stmt::Interface(_) => self.emit_class_stmt(stmt, false),
            Stmt::Try {
                body,
                catches,
                finally,
                ..
            } => self.emit_try(body, catches, *finally),
            Stmt::Throw { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::Throw);
            }
            Stmt::Global { vars, .. } => {
                for var in vars.iter() {
                    let name = self.intern(var.name);
                    self.push_op(OpCode::BindGlobal(name));
                }
            }
            Stmt::Static { vars, .. } => {
                for var in vars.iter() {
                    let name = self.intern(var.name.name);
                    let init = match var.default {
                        Some(default) => self.const_init(default),
                        None => ConstInit::Value(Val::Null),
                    };
                    self.chunk.thunks.push(init);
                    let init = (self.chunk.thunks.len() - 1) as u32;
                    self.push_op(OpCode::BindStatic { name, init });
                }
            }
            Stmt::Unset { vars, .. } => {
                for var in vars.iter() {
                    let path = self.emit_path(var);
                    self.push_op(OpCode::Unset(path));
                }
            }
            Stmt::Const { items, .. } => {
                for item in items.iter() {
                    self.emit_expr(item.value);
                    let name = self.intern(item.name.name);
                    self.push_op(OpCode::DeclareConst(name));
                }
            }
            Stmt::Declare { body, .. } => {
                if let Some(body) = body {
                    self.emit_block(body);
                }
            }
            Stmt::HaltCompiler { .. } => {
                self.push_op(OpCode::ReturnVoid);
            }
            Stmt::Nop { .. } => {}
        }
    }

    fn emit_block(&mut self, stmts: &[StmtId]) {
        for stmt in stmts {
            self.emit_stmt(stmt);
        }
    }

    fn push_loop(&mut self, is_foreach: bool, is_switch: bool) {
        self.loop_stack.push(LoopInfo {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            is_foreach,
            is_switch,
            finally_guard: self.finally_guard,
            completion_depth: self.completion_depth,
        });
    }

    fn pop_loop(&mut self) -> LoopInfo {
        match self.loop_stack.pop() {
            Some(info) => info,
            None => panic!("loop stack underflow"),
        }
    }

    fn emit_break(&mut self, levels: u32, is_continue: bool, span: Span) {
        let keyword = if is_continue { "continue" } else { "break" };
        let levels = levels.max(1) as usize;
        if self.loop_stack.is_empty() {
            self.record_error(
                span,
                format!("'{}' not in the 'loop' or 'switch' context", keyword),
            );
            return;
        }
        if levels > self.loop_stack.len() {
            self.record_error(
                span,
                format!(
                    "Cannot '{}' {} level{}",
                    keyword,
                    levels,
                    if levels == 1 { "" } else { "s" }
                ),
            );
            return;
        }

        let target = self.loop_stack.len() - levels;
        let inner_iterators = self.loop_stack[target + 1..]
            .iter()
            .filter(|info| info.is_foreach)
            .count();
        for _ in 0..inner_iterators {
            self.push_op(OpCode::IterFree);
        }

        let (guard, depth) = {
            let info = &self.loop_stack[target];
            (info.finally_guard, info.completion_depth)
        };
        let jump = if guard < self.finally_guard || depth < self.completion_depth {
            self.push_op(OpCode::LeaveJmp {
                target: 0,
                completion_depth: depth,
            })
        } else {
            self.push_op(OpCode::Jmp(0))
        };

        let info = &mut self.loop_stack[target];
        if is_continue && !info.is_switch {
            info.continue_jumps.push(jump);
        } else {
            info.break_jumps.push(jump);
        }
    }

    fn emit_foreach(
        &mut self,
        expr: ExprId,
        key_var: Option<ExprId>,
        value_var: ExprId,
        by_ref: bool,
        body: &[StmtId],
    ) {
        if by_ref && expr.is_writable() {
            let path = self.emit_path(expr);
            self.push_op(OpCode::MakeRef(path));
        } else {
            self.emit_expr(expr);
        }
        let init = self.push_op(OpCode::IterInit { by_ref, exit: 0 });
        self.iter_depth += 1;

        let start = self.here();
        let fetch = self.push_op(OpCode::IterFetch {
            exit: 0,
            with_key: key_var.is_some(),
        });
        if let Some(key_var) = key_var {
            self.assign_from_stack(key_var, false);
        }
        self.assign_from_stack(value_var, by_ref);

        self.push_loop(true, false);
        self.emit_block(body);
        self.push_op(OpCode::Jmp(start as u32));
        let info = self.pop_loop();
        for jump in info.continue_jumps {
            self.patch_jump(jump, start);
        }
        self.patch_here(&info.break_jumps);
        self.push_op(OpCode::IterFree);
        self.iter_depth -= 1;
        self.patch_here(&[init, fetch]);
    }

    /// Store the value on top of the stack into `target` and pop it.
    fn assign_from_stack(&mut self, target: ExprId, by_ref: bool) {
        match target {
            Expr::Variable { name, span } if *name != b"this" => {
                let sym = self.intern(name);
                let path = self.local_path(sym);
                self.set_current_line(*span);
                self.push_op(if by_ref {
                    OpCode::AssignRef(path)
                } else {
                    OpCode::Assign(path)
                });
                self.push_op(OpCode::Pop);
            }
            Expr::List { items, .. } | Expr::Array { items, .. } => {
                let tmp = self.temp_local();
                let tmp_path = self.local_path(tmp);
                self.push_op(OpCode::Assign(tmp_path));
                self.push_op(OpCode::Pop);
                self.emit_destructure(items, tmp);
                self.push_op(OpCode::Unset(tmp_path));
            }
            _ => {
                // Target operands must precede the value, so park it first.
                let tmp = self.temp_local();
                let tmp_path = self.local_path(tmp);
                self.push_op(if by_ref {
                    OpCode::AssignRef(tmp_path)
                } else {
                    OpCode::Assign(tmp_path)
                });
                self.push_op(OpCode::Pop);
                let path = self.emit_write_path(target);
                if by_ref {
                    self.push_op(OpCode::MakeRef(tmp_path));
                    self.push_op(OpCode::AssignRef(path));
                } else {
                    self.push_op(OpCode::LoadVarQuiet(tmp));
                    self.push_op(OpCode::Assign(path));
                }
                self.push_op(OpCode::Pop);
                self.push_op(OpCode::Unset(tmp_path));
            }
        }
    }

    fn emit_destructure(&mut self, items: &[ArrayItem], source: Symbol) {
        let mut position = 0i64;
        for item in items {
            let Some(target) = item.value else {
                position += 1;
                continue;
            };
            if item.unpack {
                self.record_error(item.span, "Spread operator is not supported in assignments");
                return;
            }
            if item.by_ref {
                self.record_error(item.span, "Cannot assign reference to non referenceable value");
                return;
            }
            let nested = matches!(target, Expr::List { .. } | Expr::Array { .. });
            let path = if nested {
                None
            } else {
                Some(self.emit_write_path(target))
            };
            self.push_op(OpCode::LoadVarQuiet(source));
            match item.key {
                Some(key) => self.emit_expr(key),
                None => {
                    self.emit_const(Val::Int(position));
                    position += 1;
                }
            }
            self.push_op(OpCode::FetchListElement);
            match path {
                Some(path) => {
                    self.push_op(OpCode::Assign(path));
                    self.push_op(OpCode::Pop);
                }
                None => self.assign_from_stack(target, false),
            }
        }
    }

    fn emit_try(
        &mut self,
        body: &[StmtId],
        catches: &[crate::parser::ast::Catch],
        finally: Option<&[StmtId]>,
    ) {
        let start = self.here() as u32;
        let iter_depth = self.iter_depth;
        let completion_depth = self.completion_depth;
        if finally.is_some() {
            self.finally_guard += 1;
        }

        self.emit_block(body);
        let body_end = self.here() as u32;
        let mut to_exit = vec![self.push_op(OpCode::Jmp(0))];

        let catch_target = self.here() as u32;
        for catch in catches {
            self.set_current_line(catch.span);
            let classes: Vec<Symbol> = catch
                .types
                .iter()
                .map(|ty| self.intern_name(ty.name))
                .collect();
            self.chunk.class_lists.push(classes);
            let classes = (self.chunk.class_lists.len() - 1) as u32;
            let matcher = self.push_op(OpCode::CatchMatch { classes, next: 0 });
            match catch.var {
                Some(var) => {
                    let name = self.intern(var.name);
                    let path = self.local_path(name);
                    self.push_op(OpCode::Assign(path));
                    self.push_op(OpCode::Pop);
                }
                None => {
                    self.push_op(OpCode::Pop);
                }
            }
            self.emit_block(catch.body);
            to_exit.push(self.push_op(OpCode::Jmp(0)));
            self.patch_here(&[matcher]);
        }
        if !catches.is_empty() {
            self.push_op(OpCode::Rethrow);
            self.chunk.catch_table.push(CatchEntry {
                start,
                end: body_end,
                catch_target: Some(catch_target),
                finally_target: None,
                finally_end: 0,
                iter_depth,
                completion_depth,
            });
        }
        let catches_end = self.here() as u32;

        match finally {
            Some(finally) => {
                self.finally_guard -= 1;
                self.patch_here(&to_exit);
                self.push_op(OpCode::EnterFinally);
                let finally_target = self.here() as u32;
                self.completion_depth += 1;
                self.emit_block(finally);
                self.completion_depth -= 1;
                self.push_op(OpCode::EndFinally);
                self.chunk.catch_table.push(CatchEntry {
                    start,
                    end: catches_end,
                    catch_target: None,
                    finally_target: Some(finally_target),
                    finally_end: self.here() as u32,
                    iter_depth,
                    completion_depth,
                });
            }
            None => self.patch_here(&to_exit),
        }
    }

    fn emit_class_stmt(&mut self, stmt: &Stmt, top_level: bool) {
        self.set_current_line(stmt.span());
        let template = match stmt {
            Stmt::Class(decl) => {
                let name = self.intern_name(decl.name.name);
                let parent = decl.extends.map(|p| self.intern_name(p.name));
                let interfaces = decl
                    .implements
                    .iter()
                    .map(|i| self.intern_name(i.name))
                    .collect();
                let mut template = self.emit_class_body(
                    name,
                    parent,
                    interfaces,
                    decl.members,
                    false,
                    decl.modifiers.is_readonly,
                );
                template.is_abstract = decl.modifiers.is_abstract;
                template.is_final = decl.modifiers.is_final;
                template
            }
            Stmt::Interface(decl) => {
                let name = self.intern_name(decl.name.name);
                let interfaces = decl
                    .extends
                    .iter()
                    .map(|i| self.intern_name(i.name))
                    .collect();
                self.emit_class_body(name, None, interfaces, decl.members, true, false)
            }
            _ => return,
        };
        let template = ClassTemplate {
            top_level,
            line: self.current_line,
            ..template
        };
        self.chunk.classes.push(Rc::new(template));
        let idx = (self.chunk.classes.len() - 1) as u32;
        self.push_op(OpCode::DeclareClass(idx));
    }

    fn emit_class_body(
        &mut self,
        name: Symbol,
        parent: Option<Symbol>,
        interfaces: Vec<Symbol>,
        members: &[ClassMember],
        is_interface: bool,
        readonly_class: bool,
    ) -> ClassTemplate {
        let saved_class = self.current_class.replace(ClassScope { name });
        let saved_function = self.current_function.take();
        let saved_method = self.in_method;

        let mut template = ClassTemplate {
            name,
            parent,
            interfaces,
            is_interface,
            is_abstract: is_interface,
            is_final: false,
            constants: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            top_level: false,
            line: self.current_line,
        };

        for member in members {
            match member {
                ClassMember::Property {
                    modifiers,
                    ty,
                    entries,
                    ..
                } => {
                    let ty = ty.map(|t| self.convert_type(t));
                    for entry in entries.iter() {
                        let default = match entry.default {
                            Some(expr) => Some(self.const_init(expr)),
                            None if ty.is_none() => Some(ConstInit::Value(Val::Null)),
                            None => None,
                        };
                        template.properties.push(PropertyTemplate {
                            name: self.intern(entry.name.name),
                            visibility: modifiers.visibility.unwrap_or(Visibility::Public),
                            is_static: modifiers.is_static,
                            is_readonly: modifiers.is_readonly || readonly_class,
                            ty: ty.clone(),
                            default,
                        });
                    }
                }
                ClassMember::Const {
                    visibility, items, ..
                } => {
                    for item in items.iter() {
                        let init = self.const_init(item.value);
                        template.constants.push(ConstTemplate {
                            name: self.intern(item.name.name),
                            visibility: visibility.unwrap_or(Visibility::Public),
                            init,
                        });
                    }
                }
                ClassMember::Method(method) => {
                    let method_name = self.intern(method.name.name);
                    for param in method.params.iter() {
                        let Some(promote) = param.promote else {
                            continue;
                        };
                        let ty = param.ty.map(|t| self.convert_type(t));
                        let default = if ty.is_none() {
                            Some(ConstInit::Value(Val::Null))
                        } else {
                            None
                        };
                        template.properties.push(PropertyTemplate {
                            name: self.intern(param.name.name),
                            visibility: promote.visibility.unwrap_or(Visibility::Public),
                            is_static: false,
                            is_readonly: promote.is_readonly || readonly_class,
                            ty,
                            default,
                        });
                    }
                    let is_abstract = is_interface || method.body.is_none();
                    let body = match method.body {
                        Some(body) => Body::Block(body),
                        None => Body::Abstract,
                    };
                    let func = self.emit_function(
                        FunctionSpec {
                            name: method_name,
                            params: method.params,
                            uses: Vec::new(),
                            by_ref: method.by_ref,
                            return_type: method.return_type,
                            is_generator: method.is_generator,
                            is_static: method.modifiers.is_static,
                            is_closure: false,
                            is_method: true,
                            span: method.span,
                        },
                        body,
                    );
                    template.methods.push(MethodTemplate {
                        name: method_name,
                        func,
                        visibility: method.modifiers.visibility.unwrap_or(Visibility::Public),
                        is_static: method.modifiers.is_static,
                        is_abstract,
                        is_final: method.modifiers.is_final,
                    });
                }
            }
        }

        self.current_class = saved_class;
        self.current_function = saved_function;
        self.in_method = saved_method;
        template
    }

    fn emit_function(&mut self, spec: FunctionSpec, body: Body) -> Rc<UserFunc> {
        let params: Vec<FuncParam> = spec
            .params
            .iter()
            .map(|p| FuncParam {
                name: self.interner.intern(p.name.name),
                by_ref: p.by_ref,
                ty: p.ty.map(|t| self.convert_type(t)),
                variadic: p.variadic,
                has_default: p.default.is_some(),
                promote: p
                    .promote
                    .map(|m| m.visibility.unwrap_or(Visibility::Public)),
            })
            .collect();
        let return_type = spec.return_type.map(|t| self.convert_type(t));

        let mut child = self.child();
        child.chunk.name = spec.name;
        child.current_function = Some(spec.name);
        child.in_method = spec.is_method;
        child.set_current_line(spec.span);
        match body {
            Body::Block(stmts) => {
                child.emit_prologue(spec.params);
                child.emit_block(stmts);
                child.push_op(OpCode::ReturnVoid);
            }
            Body::Arrow(expr) => {
                child.emit_prologue(spec.params);
                child.emit_expr(expr);
                child.push_op(OpCode::Return);
            }
            Body::Abstract => {
                child.push_op(OpCode::ReturnVoid);
            }
        }
        let Emitter { chunk, error, .. } = child;
        if let Some(err) = error {
            if self.error.is_none() {
                self.error = Some(err);
            }
        }

        Rc::new(UserFunc {
            name: spec.name,
            params,
            uses: spec.uses,
            chunk: Rc::new(chunk),
            is_generator: spec.is_generator,
            returns_ref: spec.by_ref,
            is_static: spec.is_static,
            is_closure: spec.is_closure,
            return_type,
            statics: RefCell::new(HashMap::new()),
        })
    }

    /// Default initializers and promoted constructor properties.
    fn emit_prologue(&mut self, params: &[Param]) {
        for (i, param) in params.iter().enumerate() {
            if let Some(default) = param.default {
                let skip = self.push_op(OpCode::JmpIfArgPassed {
                    param: i as u32,
                    target: 0,
                });
                self.emit_expr(default);
                self.push_op(OpCode::BindDefault(i as u32));
                self.patch_here(&[skip]);
            }
        }
        for param in params.iter().filter(|p| p.promote.is_some()) {
            let name = self.intern(param.name.name);
            let path = self.add_path(LvalPath {
                base: PathBase::This,
                steps: vec![PathStep::Prop(name)],
            });
            self.push_op(OpCode::LoadVarQuiet(name));
            self.push_op(OpCode::Assign(path));
            self.push_op(OpCode::Pop);
        }
    }

    fn convert_type(&mut self, ty: &Type) -> TypeHint {
        match ty {
            Type::Named(ident) => {
                let lower = ident.name.to_ascii_lowercase();
                match lower.as_slice() {
                    b"int" => TypeHint::Int,
                    b"float" => TypeHint::Float,
                    b"string" => TypeHint::String,
                    b"bool" => TypeHint::Bool,
                    b"array" => TypeHint::Array,
                    b"object" => TypeHint::Object,
                    b"callable" => TypeHint::Callable,
                    b"iterable" => TypeHint::Iterable,
                    b"mixed" => TypeHint::Mixed,
                    b"void" => TypeHint::Void,
                    b"never" => TypeHint::Never,
                    b"null" => TypeHint::Null,
                    b"false" => TypeHint::False,
                    b"true" => TypeHint::True,
                    b"self" => TypeHint::SelfType,
                    b"parent" => TypeHint::Parent,
                    b"static" => TypeHint::Static,
                    _ => TypeHint::Class(self.intern_name(ident.name)),
                }
            }
            Type::Nullable(inner) => TypeHint::Nullable(Box::new(self.convert_type(inner))),
            Type::Union(types) => TypeHint::Union(types.iter().map(|t| self.convert_type(t)).collect()),
            Type::Intersection(types) => {
                TypeHint::Intersection(types.iter().map(|t| self.convert_type(t)).collect())
            }
        }
    }

    fn const_init(&mut self, expr: ExprId) -> ConstInit {
        if let Some(val) = Self::literal_value(expr) {
            return ConstInit::Value(val);
        }
        let mut child = self.child();
        child.chunk.name = child.interner.intern(b"{const}");
        child.emit_expr(expr);
        child.push_op(OpCode::Return);
        let Emitter { chunk, error, .. } = child;
        if let Some(err) = error {
            if self.error.is_none() {
                self.error = Some(err);
            }
        }
        ConstInit::Thunk(Rc::new(chunk))
    }

    fn literal_value(expr: &Expr) -> Option<Val> {
        match expr {
            Expr::Null { .. } => Some(Val::Null),
            Expr::Bool { value, .. } => Some(Val::Bool(*value)),
            Expr::Int { value, .. } => Some(Val::Int(*value)),
            Expr::Float { value, .. } => Some(Val::Float(*value)),
            Expr::String { value, .. } => Some(Val::String(PhpStr::from(*value))),
            Expr::Unary {
                op: UnaryOp::Minus,
                expr,
                ..
            } => match Self::literal_value(expr)? {
                Val::Int(i) => Some(match i.checked_neg() {
                    Some(n) => Val::Int(n),
                    None => Val::Float(-(i as f64)),
                }),
                Val::Float(f) => Some(Val::Float(-f)),
                _ => None,
            },
            Expr::Unary {
                op: UnaryOp::Plus,
                expr,
                ..
            } => match Self::literal_value(expr)? {
                val @ (Val::Int(_) | Val::Float(_)) => Some(val),
                _ => None,
            },
            Expr::Array { items, .. } => {
                let mut array = ArrayData::with_capacity(items.len());
                for item in items.iter() {
                    if item.by_ref || item.unpack {
                        return None;
                    }
                    let value = Self::literal_value(item.value?)?;
                    match item.key {
                        Some(key) => {
                            let key = match Self::literal_value(key)? {
                                Val::Int(i) => ArrayKey::Int(i),
                                Val::String(s) => ArrayKey::from_str_val(&s),
                                _ => return None,
                            };
                            array.insert(key, value);
                        }
                        None => {
                            array.push(value);
                        }
                    }
                }
                Some(Val::Array(Rc::new(array)))
            }
            _ => None,
        }
    }

    fn class_operand(&mut self, class: &ClassRef) -> ClassOperand {
        match class {
            ClassRef::Named(ident) if ident.is(b"self") => ClassOperand::SelfClass,
            ClassRef::Named(ident) if ident.is(b"parent") => ClassOperand::Parent,
            ClassRef::Named(ident) if ident.is(b"static") => ClassOperand::Static,
            ClassRef::Named(ident) => ClassOperand::Named(self.intern_name(ident.name)),
            ClassRef::Dynamic(expr) => {
                self.emit_expr(expr);
                ClassOperand::Dynamic
            }
        }
    }

    /// Build an lvalue path, pushing its operands, and register it.
    fn emit_path(&mut self, expr: ExprId) -> u32 {
        let path = self.build_path(expr);
        self.add_path(path)
    }

    /// Like `emit_path`, rejecting `$this` as a whole target.
    fn emit_write_path(&mut self, expr: ExprId) -> u32 {
        let path = self.build_path(expr);
        if matches!(path.base, PathBase::This) && path.steps.is_empty() {
            self.record_error(expr.span(), "Cannot re-assign $this");
        }
        self.add_path(path)
    }

    fn build_path(&mut self, expr: ExprId) -> LvalPath {
        with_stack(|| self.build_path_inner(expr))
    }

    fn build_path_inner(&mut self, expr: ExprId) -> LvalPath {
        match expr {
            Expr::Variable { name, .. } if *name == b"this" => LvalPath {
                base: PathBase::This,
                steps: Vec::new(),
            },
            Expr::Variable { name, .. } => {
                let sym = self.intern(name);
                LvalPath::local(sym)
            }
            Expr::VariableVariable { expr, .. } => {
                self.emit_expr(expr);
                LvalPath {
                    base: PathBase::Dynamic,
                    steps: Vec::new(),
                }
            }
            Expr::ArrayDim { array, dim, .. } => {
                let mut path = self.build_path(array);
                match dim {
                    Some(dim) => {
                        self.emit_expr(dim);
                        path.steps.push(PathStep::Dim);
                    }
                    None => path.steps.push(PathStep::Append),
                }
                path
            }
            Expr::Property { target, name, .. } => {
                let mut path = self.build_path(target);
                match name {
                    MemberName::Ident(ident) => {
                        let sym = self.intern(ident.name);
                        path.steps.push(PathStep::Prop(sym));
                    }
                    MemberName::Dynamic(name) => {
                        self.emit_expr(name);
                        path.steps.push(PathStep::PropDyn);
                    }
                }
                path
            }
            Expr::StaticProperty { class, name, .. } => {
                let class = self.class_operand(class);
                let name = self.intern(name.name);
                LvalPath {
                    base: PathBase::StaticProp(class, name),
                    steps: Vec::new(),
                }
            }
            _ => {
                self.emit_expr(expr);
                LvalPath {
                    base: PathBase::Temp,
                    steps: Vec::new(),
                }
            }
        }
    }

    fn emit_args(&mut self, args: &[Arg]) {
        for arg in args {
            if arg.unpack {
                self.emit_expr(arg.value);
                self.push_op(OpCode::SendUnpack);
            } else if arg.value.is_writable() && !matches!(arg.value, Expr::List { .. }) {
                let path = self.emit_path(arg.value);
                self.push_op(OpCode::SendPath(path));
            } else {
                self.emit_expr(arg.value);
                self.push_op(OpCode::SendVal);
            }
        }
    }

    fn emit_expr(&mut self, expr: &Expr) {
        self.emit_expr_mode(expr, false);
    }

    /// Read without undefined-variable, -index or -property notices.
    fn emit_quiet(&mut self, expr: &Expr) {
        self.emit_expr_mode(expr, true);
    }

    /// Compile the object or array of a member access. Nullsafe jumps raised
    /// inside it are resolved by the outermost access of the chain.
    fn emit_chain_target(&mut self, expr: &Expr, quiet: bool) {
        self.chain_target = true;
        self.emit_expr_mode(expr, quiet);
    }

    fn emit_expr_mode(&mut self, expr: &Expr, quiet: bool) {
        let chained = std::mem::replace(&mut self.chain_target, false);
        let mark = self.nullsafe_jumps.len();
        let saved_line = self.current_line;
        self.set_current_line(expr.span());

        // Left-deep chains such as `'a' . 'b' . ...` are not bounded by the
        // parser's nesting limit.
        with_stack(|| self.emit_expr_inner(expr, quiet));

        if !chained && self.nullsafe_jumps.len() > mark {
            let jumps: Vec<usize> = self.nullsafe_jumps.drain(mark..).collect();
            self.patch_here(&jumps);
        }
        self.current_line = saved_line;
    }

    fn emit_expr_inner(&mut self, expr: &Expr, quiet: bool) {
        match expr {
            Expr::Null { .. } => self.emit_const(Val::Null),
            Expr::Bool { value, .. } => self.emit_const(Val::Bool(*value)),
            Expr::Int { value, .. } => self.emit_const(Val::Int(*value)),
            Expr::Float { value, .. } => self.emit_const(Val::Float(*value)),
            Expr::String { value, .. } => self.emit_const(Val::String(PhpStr::from(*value))),
            Expr::Interpolated { parts, .. } => {
                for part in parts.iter() {
                    self.emit_expr(part);
                }
                self.push_op(OpCode::ConcatN(parts.len() as u32));
            }
            Expr::Variable { name, .. } => {
                let sym = self.intern(name);
                if quiet {
                    self.push_op(OpCode::LoadVarQuiet(sym));
                } else if *name == b"this" {
                    self.push_op(OpCode::LoadThis);
                } else {
                    self.push_op(OpCode::LoadVar(sym));
                }
            }
            Expr::VariableVariable { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::LoadVarDynamic { quiet });
            }
            Expr::Name { name, .. } => {
                let sym = self.intern_name(name.name);
                self.push_op(OpCode::FetchConst(sym));
            }
            Expr::Array { items, .. } => self.emit_array_literal(items),
            Expr::List { span, .. } => {
                self.record_error(*span, "Cannot use list() outside assignment context");
                self.push_op(OpCode::PushNull);
            }
            Expr::ArrayDim { array, dim, span } => {
                self.emit_chain_target(array, quiet);
                match dim {
                    Some(dim) => {
                        self.emit_expr(dim);
                        self.push_op(OpCode::FetchDim { quiet });
                    }
                    None => {
                        self.record_error(*span, "Cannot use [] for reading");
                    }
                }
            }
            Expr::Property {
                target,
                name,
                nullsafe,
                ..
            } => {
                self.emit_chain_target(target, quiet);
                if *nullsafe {
                    let jump = self.push_op(OpCode::JmpIfNullKeep(0));
                    self.nullsafe_jumps.push(jump);
                }
                match name {
                    MemberName::Ident(ident) => {
                        let name = self.intern(ident.name);
                        self.push_op(OpCode::FetchProp { name, quiet });
                    }
                    MemberName::Dynamic(name) => {
                        self.emit_expr(name);
                        self.push_op(OpCode::FetchPropDynamic { quiet });
                    }
                }
            }
            Expr::StaticProperty { class, name, .. } => {
                let class = self.class_operand(class);
                let name = self.intern(name.name);
                self.push_op(OpCode::FetchStaticProp { class, name, quiet });
            }
            Expr::ClassConst { class, name, .. } => {
                if name.is(b"class") {
                    match class {
                        ClassRef::Named(ident)
                            if !ident.is(b"self")
                                && !ident.is(b"static")
                                && !ident.is(b"parent") =>
                        {
                            let name = ident.name.strip_prefix(b"\\").unwrap_or(ident.name);
                            self.emit_const(Val::String(PhpStr::from(name)));
                        }
                        _ => {
                            let class = self.class_operand(class);
                            self.push_op(OpCode::FetchClassName(class));
                        }
                    }
                } else {
                    let class = self.class_operand(class);
                    let name = self.intern(name.name);
                    self.push_op(OpCode::FetchClassConst(class, name));
                }
            }
            Expr::Call { func, args, .. } => {
                match func {
                    Expr::Name { name, .. } => {
                        let sym = self.intern_name(name.name);
                        self.push_op(OpCode::InitFcall(sym));
                    }
                    _ => {
                        self.emit_chain_target(func, false);
                        self.push_op(OpCode::InitDynamicCall);
                    }
                }
                self.emit_args(args);
                self.push_op(OpCode::DoCall);
            }
            Expr::MethodCall {
                target,
                method,
                args,
                nullsafe,
                ..
            } => {
                self.emit_chain_target(target, false);
                if *nullsafe {
                    let jump = self.push_op(OpCode::JmpIfNullKeep(0));
                    self.nullsafe_jumps.push(jump);
                }
                match method {
                    MemberName::Ident(ident) => {
                        let name = self.intern(ident.name);
                        self.push_op(OpCode::InitMethodCall(name));
                    }
                    MemberName::Dynamic(name) => {
                        self.emit_expr(name);
                        self.push_op(OpCode::InitMethodCallDynamic);
                    }
                }
                self.emit_args(args);
                self.push_op(OpCode::DoCall);
            }
            Expr::StaticCall {
                class,
                method,
                args,
                ..
            } => {
                let class = self.class_operand(class);
                match method {
                    MemberName::Ident(ident) => {
                        let name = self.intern(ident.name);
                        self.push_op(OpCode::InitStaticCall(class, name));
                    }
                    MemberName::Dynamic(name) => {
                        self.emit_expr(name);
                        self.push_op(OpCode::InitStaticCallDynamic(class));
                    }
                }
                self.emit_args(args);
                self.push_op(OpCode::DoCall);
            }
            Expr::New { class, args, .. } => {
                let class = self.class_operand(class);
                self.push_op(OpCode::NewObject(class));
                self.emit_args(args);
                self.push_op(OpCode::DoConstructorCall);
            }
            Expr::Clone { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::Clone);
            }
            Expr::Assign { target, value, .. } => match target {
                Expr::List { items, .. } | Expr::Array { items, .. } => {
                    self.emit_expr(value);
                    let tmp = self.temp_local();
                    let tmp_path = self.local_path(tmp);
                    self.push_op(OpCode::Assign(tmp_path));
                    self.push_op(OpCode::Pop);
                    self.emit_destructure(items, tmp);
                    self.push_op(OpCode::LoadVarQuiet(tmp));
                    self.push_op(OpCode::Unset(tmp_path));
                }
                _ => {
                    let path = self.emit_write_path(target);
                    self.emit_expr(value);
                    self.push_op(OpCode::Assign(path));
                }
            },
            Expr::AssignRef { target, value, .. } => {
                let path = self.emit_write_path(target);
                if value.is_writable() {
                    let source = self.emit_path(value);
                    self.push_op(OpCode::MakeRef(source));
                } else {
                    self.emit_expr(value);
                }
                self.push_op(OpCode::AssignRef(path));
            }
            Expr::AssignOp {
                op: BinaryOp::Coalesce,
                target,
                value,
                ..
            } => {
                self.emit_quiet(target);
                let done = self.push_op(OpCode::JmpIfNotNullKeep(0));
                let path = self.emit_write_path(target);
                self.emit_expr(value);
                self.push_op(OpCode::Assign(path));
                self.patch_here(&[done]);
            }
            Expr::AssignOp {
                op, target, value, ..
            } => {
                let path = self.emit_write_path(target);
                self.emit_expr(value);
                self.push_op(OpCode::AssignOp(path, *op));
            }
            Expr::IncDec {
                increment,
                prefix,
                target,
                ..
            } => {
                let kind = match (increment, prefix) {
                    (true, true) => IncDecKind::PreInc,
                    (true, false) => IncDecKind::PostInc,
                    (false, true) => IncDecKind::PreDec,
                    (false, false) => IncDecKind::PostDec,
                };
                let path = self.emit_write_path(target);
                self.push_op(OpCode::IncDec(path, kind));
            }
            Expr::Binary {
                op, left, right, ..
            } => self.emit_binary(*op, left, right),
            Expr::Unary { op, expr, .. } => match op {
                UnaryOp::Silence => {
                    self.push_op(OpCode::BeginSilence);
                    self.emit_expr(expr);
                    self.push_op(OpCode::EndSilence);
                }
                _ => {
                    self.emit_expr(expr);
                    self.push_op(match op {
                        UnaryOp::Plus => OpCode::UnaryPlus,
                        UnaryOp::Minus => OpCode::Negate,
                        UnaryOp::Not => OpCode::BoolNot,
                        _ => OpCode::BitwiseNot,
                    });
                }
            },
            Expr::Ternary {
                condition,
                then,
                otherwise,
                ..
            } => match then {
                Some(then) => {
                    self.emit_expr(condition);
                    let to_else = self.push_op(OpCode::JmpIfFalse(0));
                    self.emit_expr(then);
                    let to_end = self.push_op(OpCode::Jmp(0));
                    self.patch_here(&[to_else]);
                    self.emit_expr(otherwise);
                    self.patch_here(&[to_end]);
                }
                None => {
                    self.emit_expr(condition);
                    self.push_op(OpCode::Dup);
                    let to_end = self.push_op(OpCode::JmpIfTrue(0));
                    self.push_op(OpCode::Pop);
                    self.emit_expr(otherwise);
                    self.patch_here(&[to_end]);
                }
            },
            Expr::Instanceof { expr, class, .. } => {
                self.emit_expr(expr);
                let class = self.class_operand(class);
                self.push_op(OpCode::InstanceOf(class));
            }
            Expr::Cast { kind, expr, span } => {
                self.emit_expr(expr);
                if *kind == CastKind::Unset {
                    self.record_error(*span, "The (unset) cast is no longer supported");
                }
                self.push_op(OpCode::Cast(*kind));
            }
            Expr::Isset { vars, .. } => {
                let mut jumps = Vec::new();
                for (i, var) in vars.iter().enumerate() {
                    if i > 0 {
                        jumps.push(self.push_op(OpCode::JmpIfFalseKeep(0)));
                    }
                    self.emit_quiet(var);
                    self.push_op(OpCode::IsSet);
                }
                self.patch_here(&jumps);
            }
            Expr::Empty { expr, .. } => {
                self.emit_quiet(expr);
                self.push_op(OpCode::IsEmpty);
            }
            Expr::Closure(decl) => {
                let uses = decl
                    .uses
                    .iter()
                    .map(|u| ClosureUse {
                        name: self.interner.intern(u.name.name),
                        by_ref: u.by_ref,
                    })
                    .collect();
                let name = self.intern(b"{closure}");
                let func = self.emit_function(
                    FunctionSpec {
                        name,
                        params: decl.params,
                        uses,
                        by_ref: decl.by_ref,
                        return_type: decl.return_type,
                        is_generator: decl.is_generator,
                        is_static: decl.is_static,
                        is_closure: true,
                        is_method: false,
                        span: decl.span,
                    },
                    Body::Block(decl.body),
                );
                self.chunk.functions.push(func);
                let func = (self.chunk.functions.len() - 1) as u32;
                self.push_op(OpCode::MakeClosure { func, arrow: false });
            }
            Expr::ArrowFn(decl) => self.emit_arrow_fn(decl),
            Expr::Yield { key, value, .. } => {
                if let Some(key) = key {
                    self.emit_expr(key);
                }
                match value {
                    Some(value) => self.emit_expr(value),
                    None => self.emit_const(Val::Null),
                }
                self.push_op(OpCode::Yield {
                    with_key: key.is_some(),
                });
            }
            Expr::YieldFrom { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::YieldFrom);
            }
            Expr::Throw { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::Throw);
            }
            Expr::Print { expr, .. } => {
                self.emit_expr(expr);
                self.push_op(OpCode::Echo);
                self.emit_const(Val::Int(1));
            }
            Expr::Exit { expr, .. } => {
                match expr {
                    Some(expr) => self.emit_expr(expr),
                    None => self.emit_const(Val::Null),
                }
                self.push_op(OpCode::Exit);
            }
            Expr::Match { subject, arms, .. } => self.emit_match(subject, arms),
            Expr::MagicConst { kind, .. } => {
                let val = self.magic_constant(*kind);
                self.emit_const(val);
            }
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) {
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                self.emit_expr(left);
                self.push_op(OpCode::ToBool);
                let short = if op == BinaryOp::LogicalAnd {
                    self.push_op(OpCode::JmpIfFalseKeep(0))
                } else {
                    self.push_op(OpCode::JmpIfTrueKeep(0))
                };
                self.emit_expr(right);
                self.push_op(OpCode::ToBool);
                self.patch_here(&[short]);
            }
            BinaryOp::Coalesce => {
                self.emit_quiet(left);
                let done = self.push_op(OpCode::JmpIfNotNullKeep(0));
                self.emit_expr(right);
                self.patch_here(&[done]);
            }
            _ => {
                // Walk the left spine in a loop: `'a' . 'b' . 'c' ...` nests
                // to the left without bound.
                let mut spine = vec![(op, right, self.current_line)];
                let mut leftmost = left;
                while let Expr::Binary {
                    op, left, right, span,
                } = leftmost
                {
                    if is_short_circuit(*op) {
                        break;
                    }
                    spine.push((*op, *right, self.lines.line(span.start)));
                    leftmost = *left;
                }
                self.emit_expr(leftmost);
                for (op, right, line) in spine.into_iter().rev() {
                    self.current_line = line;
                    self.emit_expr(right);
                    self.push_op(binary_opcode(op));
                }
            }
        }
    }

    fn emit_array_literal(&mut self, items: &[ArrayItem]) {
        self.push_op(OpCode::InitArray(items.len() as u32));
        for item in items {
            let Some(value) = item.value else {
                self.record_error(item.span, "Cannot use empty array elements in arrays");
                continue;
            };
            if item.unpack {
                self.emit_expr(value);
                self.push_op(OpCode::SpreadElement);
                continue;
            }
            if let Some(key) = item.key {
                self.emit_expr(key);
            }
            if item.by_ref && value.is_writable() {
                let path = self.emit_path(value);
                self.push_op(OpCode::MakeRef(path));
                self.push_op(if item.key.is_some() {
                    OpCode::AddElementRef
                } else {
                    OpCode::AppendElementRef
                });
            } else {
                self.emit_expr(value);
                self.push_op(if item.key.is_some() {
                    OpCode::AddElement
                } else {
                    OpCode::AppendElement
                });
            }
        }
    }

    fn emit_arrow_fn(&mut self, decl: &ArrowFnDecl) {
        let mut free = FreeVariables::default();
        free.visit_expr(decl.body);
        let uses = free
            .names
            .iter()
            .filter(|name| !decl.params.iter().any(|p| p.name.name == name.as_slice()))
            .map(|name| ClosureUse {
                name: self.interner.intern(name),
                by_ref: false,
            })
            .collect();
        let name = self.intern(b"{closure}");
        let func = self.emit_function(
            FunctionSpec {
                name,
                params: decl.params,
                uses,
                by_ref: decl.by_ref,
                return_type: decl.return_type,
                is_generator: decl.is_generator,
                is_static: decl.is_static,
                is_closure: true,
                is_method: false,
                span: decl.span,
            },
            Body::Arrow(decl.body),
        );
        self.chunk.functions.push(func);
        let func = (self.chunk.functions.len() - 1) as u32;
        self.push_op(OpCode::MakeClosure { func, arrow: true });
    }

    fn emit_match(&mut self, subject: &Expr, arms: &[crate::parser::ast::MatchArm]) {
        self.emit_expr(subject);
        let tmp = self.temp_local();
        let tmp_path = self.local_path(tmp);
        self.push_op(OpCode::Assign(tmp_path));
        self.push_op(OpCode::Pop);

        let mut to_end = Vec::new();
        let mut default_arm = None;
        for arm in arms {
            let Some(conditions) = arm.conditions else {
                default_arm = Some(arm);
                continue;
            };
            let mut to_body = Vec::new();
            for condition in conditions.iter() {
                self.push_op(OpCode::LoadVarQuiet(tmp));
                self.emit_expr(condition);
                self.push_op(OpCode::IsIdentical);
                to_body.push(self.push_op(OpCode::JmpIfTrue(0)));
            }
            let to_next = self.push_op(OpCode::Jmp(0));
            self.patch_here(&to_body);
            self.emit_expr(arm.body);
            to_end.push(self.push_op(OpCode::Jmp(0)));
            self.patch_here(&[to_next]);
        }
        match default_arm {
            Some(arm) => self.emit_expr(arm.body),
            None => {
                self.push_op(OpCode::LoadVarQuiet(tmp));
                self.push_op(OpCode::MatchError);
            }
        }
        self.patch_here(&to_end);
        let tmp_path = self.local_path(tmp);
        self.push_op(OpCode::Unset(tmp_path));
    }

    fn magic_constant(&mut self, kind: MagicConst) -> Val {
        let text = |bytes: &[u8]| Val::String(PhpStr::from(bytes));
        match kind {
            MagicConst::Line => Val::Int(self.current_line as i64),
            MagicConst::File => text(self.file_path.as_bytes()),
            MagicConst::Dir => {
                let dir = Path::new(&*self.file_path)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| ".".to_string());
                text(dir.as_bytes())
            }
            MagicConst::Class => match self.current_class {
                Some(class) => Val::String(PhpStr::from(self.interner.name(class.name))),
                None => text(b""),
            },
            MagicConst::Function => match self.current_function {
                Some(func) => Val::String(PhpStr::from(self.interner.name(func))),
                None => text(b""),
            },
            MagicConst::Method => match (self.current_class, self.current_function) {
                (Some(class), Some(func)) if self.in_method => Val::String(PhpStr::from(format!(
                    "{}::{}",
                    self.interner.name(class.name),
                    self.interner.name(func)
                ))),
                (_, Some(func)) => Val::String(PhpStr::from(self.interner.name(func))),
                _ => text(b""),
            },
            MagicConst::Namespace | MagicConst::Trait => text(b""),
        }
    }
}

fn is_short_circuit(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::Coalesce)
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Plus => OpCode::Add,
        BinaryOp::Minus => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Pow => OpCode::Pow,
        BinaryOp::Concat => OpCode::Concat,
        BinaryOp::BitAnd => OpCode::BitwiseAnd,
        BinaryOp::BitOr => OpCode::BitwiseOr,
        BinaryOp::BitXor => OpCode::BitwiseXor,
        BinaryOp::ShiftLeft => OpCode::ShiftLeft,
        BinaryOp::ShiftRight => OpCode::ShiftRight,
        BinaryOp::LogicalXor => OpCode::BoolXor,
        BinaryOp::Equal => OpCode::IsEqual,
        BinaryOp::NotEqual => OpCode::IsNotEqual,
        BinaryOp::Identical => OpCode::IsIdentical,
        BinaryOp::NotIdentical => OpCode::IsNotIdentical,
        BinaryOp::Less => OpCode::IsLess,
        BinaryOp::LessEqual => OpCode::IsLessOrEqual,
        BinaryOp::Greater => OpCode::IsGreater,
        BinaryOp::GreaterEqual => OpCode::IsGreaterOrEqual,
        BinaryOp::Spaceship => OpCode::Spaceship,
        // Short-circuit operators are lowered by emit_binary.
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::Coalesce => OpCode::Nop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;
    use bumpalo::Bump;

    fn compile(source: &str) -> Result<(CodeChunk, Interner), SyntaxError> {
        let arena = Bump::new();
        let program = parse(source.as_bytes(), &arena)?;
        let mut interner = Interner::new();
        let chunk = Emitter::new(source.as_bytes(), &mut interner)
            .with_file_path("/tmp/test.php")
            .compile(&program)?;
        Ok((chunk, interner))
    }

    #[test]
    fn functions_are_declared_before_the_body_runs() {
        let (chunk, _) = compile("<?php echo f(); function f() { return 1; }").unwrap();
        assert!(matches!(chunk.code[0], OpCode::DeclareFunction(0)));
        assert!(matches!(chunk.code.last(), Some(OpCode::ReturnVoid)));
    }

    #[test]
    fn top_level_classes_are_hoisted() {
        let (chunk, _) = compile("<?php class A {} if (true) { class B {} }").unwrap();
        assert!(matches!(chunk.code[0], OpCode::HoistClasses));
        assert!(chunk.classes[0].top_level);
        assert!(!chunk.classes[1].top_level);
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = compile("<?php break;").unwrap_err();
        assert_eq!(err.message, "'break' not in the 'loop' or 'switch' context");
        let err = compile("<?php while (1) { break 2; }").unwrap_err();
        assert_eq!(err.message, "Cannot 'break' 2 levels");
    }

    #[test]
    fn break_out_of_try_finally_leaves_through_the_finally() {
        let (chunk, _) =
            compile("<?php while (true) { try { break; } finally { echo 1; } }").unwrap();
        assert!(chunk
            .code
            .iter()
            .any(|op| matches!(op, OpCode::LeaveJmp { completion_depth: 0, .. })));
        assert_eq!(chunk.catch_table.len(), 1);
        assert!(chunk.catch_table[0].finally_target.is_some());
    }

    #[test]
    fn catch_entry_precedes_its_finally_entry() {
        let (chunk, _) =
            compile("<?php try { f(); } catch (Exception $e) { } finally { }").unwrap();
        assert_eq!(chunk.catch_table.len(), 2);
        assert!(chunk.catch_table[0].catch_target.is_some());
        assert!(chunk.catch_table[1].finally_target.is_some());
        assert!(chunk.catch_table[1].end > chunk.catch_table[0].end);
    }

    #[test]
    fn arrow_functions_capture_free_variables() {
        let (chunk, interner) = compile("<?php $fn = fn($x) => $x + $y * $z;").unwrap();
        let names: Vec<String> = chunk.functions[0]
            .uses
            .iter()
            .map(|u| interner.name(u.name))
            .collect();
        assert_eq!(names, vec!["y", "z"]);
    }

    #[test]
    fn class_name_constant_folds() {
        let (chunk, _) = compile("<?php echo Foo::class;").unwrap();
        assert!(chunk
            .constants
            .iter()
            .any(|c| c == &Val::String(PhpStr::from("Foo"))));
    }

    #[test]
    fn literal_defaults_do_not_need_thunks() {
        let (chunk, _) =
            compile("<?php class A { const X = [1, 'a' => -2]; const Y = self::X; }").unwrap();
        let class = &chunk.classes[0];
        assert!(matches!(class.constants[0].init, ConstInit::Value(Val::Array(_))));
        assert!(matches!(class.constants[1].init, ConstInit::Thunk(_)));
    }

    #[test]
    fn reassigning_this_is_a_compile_error() {
        let err = compile("<?php class A { function f() { $this = 1; } }").unwrap_err();
        assert_eq!(err.message, "Cannot re-assign $this");
    }

    #[test]
    fn line_numbers_follow_statements() {
        let (chunk, _) = compile("<?php\n$a = 1;\n\necho $a;\n").unwrap();
        let echo = chunk
            .code
            .iter()
            .position(|op| matches!(op, OpCode::Echo))
            .unwrap();
        assert_eq!(chunk.line_at(echo), 4);
    }
}

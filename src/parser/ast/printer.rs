use super::*;
use crate::core::with_stack;

const INDENT: &[u8] = b"    ";

// Printing precedence, loosest first. Mirrors the parser's binding powers.
const PREC_NONE: u8 = 0;
const PREC_XOR: u8 = 2;
const PREC_ASSIGN: u8 = 4;
const PREC_TERNARY: u8 = 5;
const PREC_COALESCE: u8 = 6;
const PREC_OR: u8 = 7;
const PREC_AND: u8 = 8;
const PREC_BIT_OR: u8 = 9;
const PREC_BIT_XOR: u8 = 10;
const PREC_BIT_AND: u8 = 11;
const PREC_EQUALITY: u8 = 12;
const PREC_RELATIONAL: u8 = 13;
const PREC_CONCAT: u8 = 14;
const PREC_SHIFT: u8 = 15;
const PREC_ADDITIVE: u8 = 16;
const PREC_MULTIPLICATIVE: u8 = 17;
const PREC_NOT: u8 = 18;
const PREC_INSTANCEOF: u8 = 19;
const PREC_UNARY: u8 = 20;
const PREC_POW: u8 = 21;
const PREC_CLONE: u8 = 22;
const PREC_PRIMARY: u8 = 23;

/// Renders an AST back to PHP source with normalized layout: four-space
/// indentation, braces on the opening line, single-quoted plain strings.
/// Comments and alternative `endif;` syntax do not survive the trip.
pub struct SourcePrinter {
    out: Vec<u8>,
    indent: usize,
    in_php: bool,
}

impl Default for SourcePrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `source` and print it back in canonical layout.
pub fn format_source(source: &[u8]) -> Result<Vec<u8>, SyntaxError> {
    let arena = bumpalo::Bump::new();
    let program = crate::parser::parser::parse(source, &arena)?;
    Ok(SourcePrinter::new().print_program(&program))
}

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::LogicalXor => PREC_XOR,
        BinaryOp::Coalesce => PREC_COALESCE,
        BinaryOp::LogicalOr => PREC_OR,
        BinaryOp::LogicalAnd => PREC_AND,
        BinaryOp::BitOr => PREC_BIT_OR,
        BinaryOp::BitXor => PREC_BIT_XOR,
        BinaryOp::BitAnd => PREC_BIT_AND,
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::Identical
        | BinaryOp::NotIdentical
        | BinaryOp::Spaceship => PREC_EQUALITY,
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            PREC_RELATIONAL
        }
        BinaryOp::Concat => PREC_CONCAT,
        BinaryOp::ShiftLeft | BinaryOp::ShiftRight => PREC_SHIFT,
        BinaryOp::Plus | BinaryOp::Minus => PREC_ADDITIVE,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => PREC_MULTIPLICATIVE,
        BinaryOp::Pow => PREC_POW,
    }
}

/// Minimum precedence of the `(left, right)` operands of `op`.
fn operand_precedence(op: BinaryOp) -> (u8, u8) {
    let prec = binary_precedence(op);
    match op {
        BinaryOp::Coalesce => (prec + 1, prec),
        BinaryOp::Pow => (PREC_CLONE, prec),
        // Non-associative.
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::Identical
        | BinaryOp::NotIdentical
        | BinaryOp::Spaceship
        | BinaryOp::Less
        | BinaryOp::LessEqual
        | BinaryOp::Greater
        | BinaryOp::GreaterEqual => (prec + 1, prec + 1),
        _ => (prec, prec + 1),
    }
}

fn precedence(expr: &Expr<'_>) -> u8 {
    match expr {
        Expr::Assign { .. }
        | Expr::AssignRef { .. }
        | Expr::AssignOp { .. }
        | Expr::Yield { .. }
        | Expr::YieldFrom { .. }
        | Expr::Print { .. }
        | Expr::Throw { .. }
        | Expr::ArrowFn(_) => PREC_ASSIGN,
        Expr::Ternary { .. } => PREC_TERNARY,
        Expr::Binary { op, .. } => binary_precedence(*op),
        Expr::Instanceof { .. } => PREC_INSTANCEOF,
        Expr::Unary {
            op: UnaryOp::Not, ..
        } => PREC_NOT,
        Expr::Unary { .. } | Expr::Cast { .. } => PREC_UNARY,
        Expr::IncDec { prefix: true, .. } => PREC_UNARY,
        Expr::IncDec { prefix: false, .. } | Expr::Clone { .. } | Expr::New { .. } => PREC_CLONE,
        Expr::Closure(_) => PREC_CLONE,
        _ => PREC_PRIMARY,
    }
}

/// Whether `->`, `[]`, `::` or `()` can follow the expression unparenthesized.
fn is_dereferencable(expr: &Expr<'_>) -> bool {
    matches!(
        expr,
        Expr::Variable { .. }
            | Expr::VariableVariable { .. }
            | Expr::ArrayDim { .. }
            | Expr::Property { .. }
            | Expr::StaticProperty { .. }
            | Expr::ClassConst { .. }
            | Expr::Call { .. }
            | Expr::MethodCall { .. }
            | Expr::StaticCall { .. }
            | Expr::String { .. }
            | Expr::Array { .. }
            | Expr::Name { .. }
    )
}

fn visibility_keyword(visibility: Visibility) -> &'static [u8] {
    match visibility {
        Visibility::Public => b"public",
        Visibility::Protected => b"protected",
        Visibility::Private => b"private",
    }
}

fn cast_keyword(kind: CastKind) -> &'static [u8] {
    match kind {
        CastKind::Int => b"(int)",
        CastKind::Float => b"(float)",
        CastKind::String => b"(string)",
        CastKind::Bool => b"(bool)",
        CastKind::Array => b"(array)",
        CastKind::Object => b"(object)",
        CastKind::Unset => b"(unset)",
    }
}

fn magic_name(kind: MagicConst) -> &'static [u8] {
    match kind {
        MagicConst::Line => b"__LINE__",
        MagicConst::File => b"__FILE__",
        MagicConst::Dir => b"__DIR__",
        MagicConst::Class => b"__CLASS__",
        MagicConst::Function => b"__FUNCTION__",
        MagicConst::Method => b"__METHOD__",
        MagicConst::Namespace => b"__NAMESPACE__",
        MagicConst::Trait => b"__TRAIT__",
    }
}

impl SourcePrinter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            indent: 0,
            in_php: false,
        }
    }

    pub fn print_program(mut self, program: &Program<'_>) -> Vec<u8> {
        self.stmts(program.statements);
        self.out
    }

    pub fn print_expr(mut self, expr: &Expr<'_>) -> Vec<u8> {
        self.in_php = true;
        self.expr(expr, PREC_NONE);
        self.out
    }

    fn write(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn write_str(&mut self, text: &str) {
        self.out.extend_from_slice(text.as_bytes());
    }

    /// Start a new line at the current indentation, reopening PHP mode
    /// after inline HTML.
    fn begin_line(&mut self) {
        if !self.in_php {
            self.write(b"<?php\n");
            self.in_php = true;
        }
        for _ in 0..self.indent {
            self.out.extend_from_slice(INDENT);
        }
    }

    fn end_line(&mut self) {
        self.out.push(b'\n');
    }

    fn stmts(&mut self, stmts: &[StmtId<'_>]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    /// ` {`, the indented statements, then `}` on its own line.
    fn block(&mut self, stmts: &[StmtId<'_>]) {
        self.write(b" {");
        self.end_line();
        self.indent += 1;
        self.stmts(stmts);
        self.indent -= 1;
        self.begin_line();
        self.write(b"}");
    }

    fn stmt(&mut self, stmt: &Stmt<'_>) {
        with_stack(|| self.stmt_inner(stmt));
    }

    fn stmt_inner(&mut self, stmt: &Stmt<'_>) {
        match stmt {
            Stmt::Nop { .. } => return,
            Stmt::InlineHtml { value, .. } => {
                if self.in_php {
                    self.write(b"?>");
                    // The newline right after `?>` belongs to the tag.
                    if value.first() == Some(&b'\n') {
                        self.end_line();
                    }
                }
                self.write(value);
                self.in_php = false;
                return;
            }
            Stmt::Declare {
                strict_types: None,
                body: None,
                ..
            } => return,
            _ => {}
        }

        self.begin_line();
        match stmt {
            Stmt::Echo { exprs, .. } => {
                self.write(b"echo ");
                self.expr_list(exprs);
                self.write(b";");
            }
            Stmt::Expression { expr, .. } => {
                // A leading `function` would start a declaration.
                let wrap = matches!(expr, Expr::Closure(_));
                self.expr(expr, if wrap { PREC_PRIMARY } else { PREC_NONE });
                self.write(b";");
            }
            Stmt::If {
                condition,
                then_block,
                else_block,
                ..
            } => self.if_chain(condition, then_block, *else_block),
            Stmt::While {
                condition, body, ..
            } => {
                self.write(b"while (");
                self.expr(condition, PREC_NONE);
                self.write(b")");
                self.block(body);
            }
            Stmt::DoWhile {
                body, condition, ..
            } => {
                self.write(b"do");
                self.block(body);
                self.write(b" while (");
                self.expr(condition, PREC_NONE);
                self.write(b");");
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
                ..
            } => {
                self.write(b"for (");
                self.expr_list(init);
                self.write(b";");
                if !condition.is_empty() {
                    self.write(b" ");
                    self.expr_list(condition);
                }
                self.write(b";");
                if !step.is_empty() {
                    self.write(b" ");
                    self.expr_list(step);
                }
                self.write(b")");
                self.block(body);
            }
            Stmt::Foreach {
                expr,
                key_var,
                value_var,
                by_ref,
                body,
                ..
            } => {
                self.write(b"foreach (");
                self.expr(expr, PREC_NONE);
                self.write(b" as ");
                if let Some(key) = key_var {
                    self.expr(key, PREC_NONE);
                    self.write(b" => ");
                }
                if *by_ref {
                    self.write(b"&");
                }
                self.expr(value_var, PREC_NONE);
                self.write(b")");
                self.block(body);
            }
            Stmt::Switch { subject, cases, .. } => {
                self.write(b"switch (");
                self.expr(subject, PREC_NONE);
                self.write(b") {");
                self.end_line();
                self.indent += 1;
                for case in cases.iter() {
                    self.begin_line();
                    match case.condition {
                        Some(condition) => {
                            self.write(b"case ");
                            self.expr(condition, PREC_NONE);
                            self.write(b":");
                        }
                        None => self.write(b"default:"),
                    }
                    self.end_line();
                    self.indent += 1;
                    self.stmts(case.body);
                    self.indent -= 1;
                }
                self.indent -= 1;
                self.begin_line();
                self.write(b"}");
            }
            Stmt::Break { levels, .. } => self.jump(b"break", *levels),
            Stmt::Continue { levels, .. } => self.jump(b"continue", *levels),
            Stmt::Return { expr, .. } => {
                self.write(b"return");
                if let Some(expr) = expr {
                    self.write(b" ");
                    self.expr(expr, PREC_NONE);
                }
                self.write(b";");
            }
            Stmt::Block { statements, .. } => {
                self.write(b"{");
                self.end_line();
                self.indent += 1;
                self.stmts(statements);
                self.indent -= 1;
                self.begin_line();
                self.write(b"}");
            }
            Stmt::Function(decl) => {
                self.write(b"function ");
                if decl.by_ref {
                    self.write(b"&");
                }
                self.write(decl.name.name);
                self.params(decl.params);
                self.return_type(decl.return_type);
                self.block(decl.body);
            }
            Stmt::Class(decl) => self.class(decl),
            Stmt::Interface(decl) => {
                self.write(b"interface ");
                self.write(decl.name.name);
                if !decl.extends.is_empty() {
                    self.write(b" extends ");
                    self.names(decl.extends, b", ");
                }
                self.members(decl.members);
            }
            Stmt::Try {
                body,
                catches,
                finally,
                ..
            } => {
                self.write(b"try");
                self.block(body);
                for catch in catches.iter() {
                    self.write(b" catch (");
                    self.names(catch.types, b" | ");
                    if let Some(var) = catch.var {
                        self.write(b" $");
                        self.write(var.name);
                    }
                    self.write(b")");
                    self.block(catch.body);
                }
                if let Some(finally) = finally {
                    self.write(b" finally");
                    self.block(finally);
                }
            }
            Stmt::Throw { expr, .. } => {
                self.write(b"throw ");
                self.expr(expr, PREC_NONE);
                self.write(b";");
            }
            Stmt::Global { vars, .. } => {
                self.write(b"global ");
                for (i, var) in vars.iter().enumerate() {
                    if i > 0 {
                        self.write(b", ");
                    }
                    self.write(b"$");
                    self.write(var.name);
                }
                self.write(b";");
            }
            Stmt::Static { vars, .. } => {
                self.write(b"static ");
                for (i, var) in vars.iter().enumerate() {
                    if i > 0 {
                        self.write(b", ");
                    }
                    self.write(b"$");
                    self.write(var.name.name);
                    if let Some(default) = var.default {
                        self.write(b" = ");
                        self.expr(default, PREC_ASSIGN);
                    }
                }
                self.write(b";");
            }
            Stmt::Unset { vars, .. } => {
                self.write(b"unset(");
                self.expr_list(vars);
                self.write(b");");
            }
            Stmt::Const { items, .. } => {
                self.write(b"const ");
                self.const_items(items);
                self.write(b";");
            }
            Stmt::Declare {
                strict_types, body, ..
            } => {
                if let Some(strict) = strict_types {
                    self.write(b"declare(strict_types=");
                    self.write_str(if *strict { "1" } else { "0" });
                    self.write(b")");
                }
                match body {
                    Some(body) if strict_types.is_some() => self.block(body),
                    Some(body) => {
                        self.write(b"{");
                        self.end_line();
                        self.indent += 1;
                        self.stmts(body);
                        self.indent -= 1;
                        self.begin_line();
                        self.write(b"}");
                    }
                    None => self.write(b";"),
                }
            }
            Stmt::HaltCompiler { .. } => self.write(b"__halt_compiler();"),
            Stmt::Nop { .. } | Stmt::InlineHtml { .. } => {}
        }
        self.end_line();
    }

    fn if_chain(
        &mut self,
        condition: &Expr<'_>,
        then_block: &[StmtId<'_>],
        else_block: Option<&[StmtId<'_>]>,
    ) {
        self.write(b"if (");
        self.expr(condition, PREC_NONE);
        self.write(b")");
        self.block(then_block);
        match else_block {
            Some(
                [
                    Stmt::If {
                        condition,
                        then_block,
                        else_block,
                        ..
                    },
                ],
            ) => {
                self.write(b" else ");
                self.if_chain(condition, then_block, *else_block);
            }
            Some(else_block) => {
                self.write(b" else");
                self.block(else_block);
            }
            None => {}
        }
    }

    fn jump(&mut self, keyword: &[u8], levels: u32) {
        self.write(keyword);
        if levels > 1 {
            self.write_str(&format!(" {}", levels));
        }
        self.write(b";");
    }

    fn names(&mut self, names: &[Ident<'_>], separator: &[u8]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.write(separator);
            }
            self.write(name.name);
        }
    }

    fn const_items(&mut self, items: &[ConstItem<'_>]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(b", ");
            }
            self.write(item.name.name);
            self.write(b" = ");
            self.expr(item.value, PREC_ASSIGN);
        }
    }

    fn class(&mut self, decl: &ClassDecl<'_>) {
        if decl.modifiers.is_abstract {
            self.write(b"abstract ");
        }
        if decl.modifiers.is_final {
            self.write(b"final ");
        }
        if decl.modifiers.is_readonly {
            self.write(b"readonly ");
        }
        self.write(b"class ");
        self.write(decl.name.name);
        if let Some(parent) = decl.extends {
            self.write(b" extends ");
            self.write(parent.name);
        }
        if !decl.implements.is_empty() {
            self.write(b" implements ");
            self.names(decl.implements, b", ");
        }
        self.members(decl.members);
    }

    fn members(&mut self, members: &[ClassMember<'_>]) {
        self.write(b" {");
        self.end_line();
        self.indent += 1;
        let mut previous_was_method = false;
        for (i, member) in members.iter().enumerate() {
            let is_method = matches!(member, ClassMember::Method(_));
            if i > 0 && (is_method || previous_was_method) {
                self.end_line();
            }
            previous_was_method = is_method;
            self.begin_line();
            match member {
                ClassMember::Property {
                    modifiers,
                    ty,
                    entries,
                    ..
                } => {
                    self.member_modifiers(modifiers, true);
                    if let Some(ty) = ty {
                        self.ty(ty);
                        self.write(b" ");
                    }
                    for (i, entry) in entries.iter().enumerate() {
                        if i > 0 {
                            self.write(b", ");
                        }
                        self.write(b"$");
                        self.write(entry.name.name);
                        if let Some(default) = entry.default {
                            self.write(b" = ");
                            self.expr(default, PREC_ASSIGN);
                        }
                    }
                    self.write(b";");
                }
                ClassMember::Method(method) => {
                    self.member_modifiers(&method.modifiers, false);
                    self.write(b"function ");
                    if method.by_ref {
                        self.write(b"&");
                    }
                    self.write(method.name.name);
                    self.params(method.params);
                    self.return_type(method.return_type);
                    match method.body {
                        Some(body) => self.block(body),
                        None => self.write(b";"),
                    }
                }
                ClassMember::Const {
                    visibility, items, ..
                } => {
                    if let Some(visibility) = visibility {
                        self.write(visibility_keyword(*visibility));
                        self.write(b" ");
                    }
                    self.write(b"const ");
                    self.const_items(items);
                    self.write(b";");
                }
            }
            self.end_line();
        }
        self.indent -= 1;
        self.begin_line();
        self.write(b"}");
    }

    /// Modifier keywords, each followed by a space. Properties always get
    /// at least one.
    fn member_modifiers(&mut self, modifiers: &MemberModifiers, property: bool) {
        if modifiers.is_abstract {
            self.write(b"abstract ");
        }
        if modifiers.is_final {
            self.write(b"final ");
        }
        if let Some(visibility) = modifiers.visibility {
            self.write(visibility_keyword(visibility));
            self.write(b" ");
        }
        if modifiers.is_static {
            self.write(b"static ");
        }
        if modifiers.is_readonly {
            self.write(b"readonly ");
        }
        if property && *modifiers == MemberModifiers::default() {
            self.write(b"public ");
        }
    }

    fn params(&mut self, params: &[Param<'_>]) {
        self.write(b"(");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.write(b", ");
            }
            if let Some(promote) = &param.promote {
                self.member_modifiers(promote, false);
            }
            if let Some(ty) = param.ty {
                self.ty(ty);
                self.write(b" ");
            }
            if param.by_ref {
                self.write(b"&");
            }
            if param.variadic {
                self.write(b"...");
            }
            self.write(b"$");
            self.write(param.name.name);
            if let Some(default) = param.default {
                self.write(b" = ");
                self.expr(default, PREC_ASSIGN);
            }
        }
        self.write(b")");
    }

    fn return_type(&mut self, ty: Option<&Type<'_>>) {
        if let Some(ty) = ty {
            self.write(b": ");
            self.ty(ty);
        }
    }

    fn ty(&mut self, ty: &Type<'_>) {
        match ty {
            Type::Named(name) => self.write(name.name),
            Type::Nullable(inner) => {
                self.write(b"?");
                self.ty(inner);
            }
            Type::Union(types) => {
                for (i, member) in types.iter().enumerate() {
                    if i > 0 {
                        self.write(b"|");
                    }
                    if matches!(member, Type::Intersection(_)) {
                        self.write(b"(");
                        self.ty(member);
                        self.write(b")");
                    } else {
                        self.ty(member);
                    }
                }
            }
            Type::Intersection(types) => {
                for (i, member) in types.iter().enumerate() {
                    if i > 0 {
                        self.write(b"&");
                    }
                    self.ty(member);
                }
            }
        }
    }

    fn expr_list(&mut self, exprs: &[ExprId<'_>]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.write(b", ");
            }
            self.expr(expr, PREC_NONE);
        }
    }

    fn args(&mut self, args: &[Arg<'_>]) {
        self.write(b"(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.write(b", ");
            }
            if arg.unpack {
                self.write(b"...");
            }
            self.expr(arg.value, PREC_NONE);
        }
        self.write(b")");
    }

    fn items(&mut self, items: &[ArrayItem<'_>]) {
        self.write(b"[");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(b", ");
            }
            if let Some(key) = item.key {
                self.expr(key, PREC_NONE);
                self.write(b" => ");
            }
            if item.unpack {
                self.write(b"...");
            }
            if item.by_ref {
                self.write(b"&");
            }
            if let Some(value) = item.value {
                self.expr(value, PREC_NONE);
            }
        }
        self.write(b"]");
    }

    /// Operand of `->`, `[]`, `::` or a call.
    fn base(&mut self, expr: &Expr<'_>) {
        if is_dereferencable(expr) {
            self.expr(expr, PREC_NONE);
        } else {
            self.parenthesized(expr);
        }
    }

    fn parenthesized(&mut self, expr: &Expr<'_>) {
        self.write(b"(");
        self.expr(expr, PREC_NONE);
        self.write(b")");
    }

    fn class_ref(&mut self, class: &ClassRef<'_>) {
        match class {
            ClassRef::Named(name) => self.write(name.name),
            ClassRef::Dynamic(expr @ Expr::Variable { .. }) => self.expr(expr, PREC_NONE),
            ClassRef::Dynamic(expr) => self.parenthesized(expr),
        }
    }

    fn member(&mut self, name: &MemberName<'_>) {
        match name {
            MemberName::Ident(ident) => self.write(ident.name),
            MemberName::Dynamic(expr) => {
                self.write(b"{");
                self.expr(expr, PREC_NONE);
                self.write(b"}");
            }
        }
    }

    fn single_quoted(&mut self, value: &[u8]) {
        self.out.push(b'\'');
        for &byte in value {
            if byte == b'\'' || byte == b'\\' {
                self.out.push(b'\\');
            }
            self.out.push(byte);
        }
        self.out.push(b'\'');
    }

    fn double_quoted_text(&mut self, value: &[u8]) {
        for &byte in value {
            match byte {
                b'"' | b'\\' | b'$' => {
                    self.out.push(b'\\');
                    self.out.push(byte);
                }
                b'\n' => self.write(b"\\n"),
                b'\t' => self.write(b"\\t"),
                b'\r' => self.write(b"\\r"),
                0x0b => self.write(b"\\v"),
                0x0c => self.write(b"\\f"),
                0x1b => self.write(b"\\e"),
                0x00..=0x1f | 0x7f => self.write_str(&format!("\\x{:02x}", byte)),
                _ => self.out.push(byte),
            }
        }
    }

    fn expr(&mut self, expr: &Expr<'_>, min_prec: u8) {
        with_stack(|| {
            if precedence(expr) < min_prec {
                self.parenthesized(expr);
            } else {
                self.expr_inner(expr);
            }
        });
    }

    fn expr_inner(&mut self, expr: &Expr<'_>) {
        match expr {
            Expr::Null { .. } => self.write(b"null"),
            Expr::Bool { value, .. } => self.write_str(if *value { "true" } else { "false" }),
            Expr::Int { value, .. } => self.write_str(&value.to_string()),
            Expr::Float { value, .. } => {
                if value.is_infinite() {
                    self.write_str(if *value > 0.0 { "INF" } else { "-INF" });
                } else {
                    self.write_str(&format!("{:?}", value));
                }
            }
            Expr::String { value, .. } => self.single_quoted(value),
            Expr::Interpolated { parts, .. } => {
                self.out.push(b'"');
                for part in parts.iter() {
                    match part {
                        Expr::String { value, .. } => self.double_quoted_text(value),
                        _ => {
                            self.write(b"{");
                            self.expr(part, PREC_NONE);
                            self.write(b"}");
                        }
                    }
                }
                self.out.push(b'"');
            }
            Expr::Variable { name, .. } => {
                self.write(b"$");
                self.write(name);
            }
            Expr::VariableVariable { expr, .. } => {
                self.write(b"${");
                self.expr(expr, PREC_NONE);
                self.write(b"}");
            }
            Expr::Name { name, .. } => self.write(name.name),
            Expr::Array { items, .. } | Expr::List { items, .. } => self.items(items),
            Expr::ArrayDim { array, dim, .. } => {
                self.base(array);
                self.write(b"[");
                if let Some(dim) = dim {
                    self.expr(dim, PREC_NONE);
                }
                self.write(b"]");
            }
            Expr::Property {
                target,
                name,
                nullsafe,
                ..
            } => {
                self.base(target);
                self.write_str(if *nullsafe { "?->" } else { "->" });
                self.member(name);
            }
            Expr::StaticProperty { class, name, .. } => {
                self.class_ref(class);
                self.write(b"::$");
                self.write(name.name);
            }
            Expr::ClassConst { class, name, .. } => {
                self.class_ref(class);
                self.write(b"::");
                self.write(name.name);
            }
            Expr::Call { func, args, .. } => {
                self.base(func);
                self.args(args);
            }
            Expr::MethodCall {
                target,
                method,
                args,
                nullsafe,
                ..
            } => {
                self.base(target);
                self.write_str(if *nullsafe { "?->" } else { "->" });
                self.member(method);
                self.args(args);
            }
            Expr::StaticCall {
                class,
                method,
                args,
                ..
            } => {
                self.class_ref(class);
                self.write(b"::");
                self.member(method);
                self.args(args);
            }
            Expr::New { class, args, .. } => {
                self.write(b"new ");
                self.class_ref(class);
                self.args(args);
            }
            Expr::Clone { expr, .. } => {
                self.write(b"clone ");
                self.expr(expr, PREC_CLONE);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target, PREC_NONE);
                self.write(b" = ");
                self.expr(value, PREC_ASSIGN);
            }
            Expr::AssignRef { target, value, .. } => {
                self.expr(target, PREC_NONE);
                self.write(b" = &");
                self.expr(value, PREC_ASSIGN);
            }
            Expr::AssignOp {
                op, target, value, ..
            } => {
                self.expr(target, PREC_NONE);
                self.write(b" ");
                self.write_str(op.symbol());
                self.write(b"= ");
                self.expr(value, PREC_ASSIGN);
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let (left_prec, right_prec) = operand_precedence(*op);
                self.expr(left, left_prec);
                self.write(b" ");
                self.write_str(op.symbol());
                self.write(b" ");
                self.expr(right, right_prec);
            }
            Expr::Unary { op, expr, .. } => {
                let (symbol, operand_prec) = match op {
                    UnaryOp::Plus => ("+", PREC_UNARY),
                    UnaryOp::Minus => ("-", PREC_UNARY),
                    UnaryOp::Not => ("!", PREC_NOT),
                    UnaryOp::BitNot => ("~", PREC_UNARY),
                    UnaryOp::Silence => ("@", PREC_UNARY),
                };
                self.write_str(symbol);
                // `- -$a`, not the decrement `--$a`.
                let glued = matches!(
                    expr,
                    Expr::Unary {
                        op: UnaryOp::Plus | UnaryOp::Minus,
                        ..
                    } | Expr::IncDec { prefix: true, .. }
                );
                if glued && matches!(op, UnaryOp::Plus | UnaryOp::Minus) {
                    self.write(b" ");
                }
                self.expr(expr, operand_prec);
            }
            Expr::IncDec {
                increment,
                prefix,
                target,
                ..
            } => {
                let symbol = if *increment { "++" } else { "--" };
                if *prefix {
                    self.write_str(symbol);
                    self.expr(target, PREC_PRIMARY);
                } else {
                    self.expr(target, PREC_PRIMARY);
                    self.write_str(symbol);
                }
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
                ..
            } => {
                self.expr(condition, PREC_TERNARY + 1);
                match then {
                    Some(then) => {
                        self.write(b" ? ");
                        self.expr(then, PREC_NONE);
                        self.write(b" : ");
                    }
                    None => self.write(b" ?: "),
                }
                self.expr(otherwise, PREC_TERNARY + 1);
            }
            Expr::Instanceof { expr, class, .. } => {
                self.expr(expr, PREC_UNARY);
                self.write(b" instanceof ");
                self.class_ref(class);
            }
            Expr::Cast { kind, expr, .. } => {
                self.write(cast_keyword(*kind));
                self.write(b" ");
                self.expr(expr, PREC_UNARY);
            }
            Expr::Isset { vars, .. } => {
                self.write(b"isset(");
                self.expr_list(vars);
                self.write(b")");
            }
            Expr::Empty { expr, .. } => {
                self.write(b"empty(");
                self.expr(expr, PREC_NONE);
                self.write(b")");
            }
            Expr::Closure(decl) => {
                if decl.is_static {
                    self.write(b"static ");
                }
                self.write(b"function ");
                if decl.by_ref {
                    self.write(b"&");
                }
                self.params(decl.params);
                if !decl.uses.is_empty() {
                    self.write(b" use (");
                    for (i, captured) in decl.uses.iter().enumerate() {
                        if i > 0 {
                            self.write(b", ");
                        }
                        if captured.by_ref {
                            self.write(b"&");
                        }
                        self.write(b"$");
                        self.write(captured.name.name);
                    }
                    self.write(b")");
                }
                self.return_type(decl.return_type);
                self.block(decl.body);
            }
            Expr::ArrowFn(decl) => {
                if decl.is_static {
                    self.write(b"static ");
                }
                self.write(b"fn ");
                if decl.by_ref {
                    self.write(b"&");
                }
                self.params(decl.params);
                self.return_type(decl.return_type);
                self.write(b" => ");
                self.expr(decl.body, PREC_ASSIGN);
            }
            Expr::Yield { key, value, .. } => {
                self.write(b"yield");
                if let Some(key) = key {
                    self.write(b" ");
                    self.expr(key, PREC_ASSIGN + 1);
                    self.write(b" =>");
                }
                if let Some(value) = value {
                    self.write(b" ");
                    self.expr(value, PREC_ASSIGN);
                }
            }
            Expr::YieldFrom { expr, .. } => {
                self.write(b"yield from ");
                self.expr(expr, PREC_ASSIGN);
            }
            Expr::Throw { expr, .. } => {
                self.write(b"throw ");
                self.expr(expr, PREC_NONE);
            }
            Expr::Print { expr, .. } => {
                self.write(b"print ");
                self.expr(expr, PREC_ASSIGN);
            }
            Expr::Exit { expr, .. } => {
                self.write(b"exit(");
                if let Some(expr) = expr {
                    self.expr(expr, PREC_NONE);
                }
                self.write(b")");
            }
            Expr::Match { subject, arms, .. } => {
                self.write(b"match (");
                self.expr(subject, PREC_NONE);
                self.write(b") {");
                self.end_line();
                self.indent += 1;
                for arm in arms.iter() {
                    self.begin_line();
                    match arm.conditions {
                        Some(conditions) => self.expr_list(conditions),
                        None => self.write(b"default"),
                    }
                    self.write(b" => ");
                    self.expr(arm.body, PREC_NONE);
                    self.write(b",");
                    self.end_line();
                }
                self.indent -= 1;
                self.begin_line();
                self.write(b"}");
            }
            Expr::MagicConst { kind, .. } => self.write(magic_name(*kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;
    use bumpalo::Bump;

    fn format(src: &str) -> String {
        match format_source(src.as_bytes()) {
            Ok(out) => String::from_utf8(out).unwrap(),
            Err(err) => panic!("{} in {:?}", err, src),
        }
    }

    fn sexpr(src: &[u8]) -> String {
        let arena = Bump::new();
        let program = parse(src, &arena).unwrap();
        crate::parser::ast::sexpr::SexprPrinter::new().print_program(&program)
    }

    /// Printing keeps the tree and is a fixed point.
    fn assert_stable(src: &str) {
        let once = format(src);
        assert_eq!(sexpr(src.as_bytes()), sexpr(once.as_bytes()), "{}", once);
        assert_eq!(format(&once), once);
    }

    #[test]
    fn empty_script_prints_nothing() {
        assert_eq!(format(""), "");
    }

    #[test]
    fn normalizes_layout() {
        assert_eq!(format("<?php $var = \"x\"; "), "<?php\n$var = 'x';\n");
        assert_eq!(
            format("<?php if($a){echo 1;}elseif($b){echo 2;}else{echo 3;}"),
            "<?php\nif ($a) {\n    echo 1;\n} else if ($b) {\n    echo 2;\n} else {\n    echo 3;\n}\n"
        );
        assert_eq!(
            format("<?php foreach ($xs as $k => &$v): unset($v); endforeach;"),
            "<?php\nforeach ($xs as $k => &$v) {\n    unset($v);\n}\n"
        );
    }

    #[test]
    fn parenthesizes_only_where_needed() {
        assert_eq!(format("<?php echo (1 + 2) * 3;"), "<?php\necho (1 + 2) * 3;\n");
        assert_eq!(format("<?php echo 1 + (2 * 3);"), "<?php\necho 1 + 2 * 3;\n");
        assert_eq!(format("<?php echo 1 - (2 - 3);"), "<?php\necho 1 - (2 - 3);\n");
        assert_eq!(format("<?php echo (-2) ** 2;"), "<?php\necho (-2) ** 2;\n");
        assert_eq!(format("<?php echo 2 ** 3 ** 2;"), "<?php\necho 2 ** 3 ** 2;\n");
        assert_eq!(format("<?php echo -(-$a);"), "<?php\necho - -$a;\n");
        assert_eq!(format("<?php echo !($a instanceof B);"), "<?php\necho !$a instanceof B;\n");
        assert_eq!(format("<?php (new Foo)->bar();"), "<?php\n(new Foo())->bar();\n");
        assert_eq!(format("<?php $a = $b ?? $c ?? 1;"), "<?php\n$a = $b ?? $c ?? 1;\n");
    }

    #[test]
    fn strings_round_trip_through_escapes() {
        assert_eq!(format(r"<?php echo 'it\'s \\ here';"), "<?php\necho 'it\\'s \\\\ here';\n");
        assert_eq!(
            format("<?php echo \"a\\t{$b['k']} \\$c $d->e\";"),
            "<?php\necho \"a\\t{$b['k']} \\$c {$d->e}\";\n"
        );
    }

    #[test]
    fn inline_html_reopens_php() {
        assert_eq!(
            format("<p><?php echo 1; ?>\n<b>x</b>\n"),
            "<p><?php\necho 1;\n?><b>x</b>\n"
        );
    }

    #[test]
    fn declarations_print_back_the_same_tree() {
        assert_stable(
            "<?php
            declare(strict_types=1);
            interface Shape extends Countable { public function area(): float; }
            abstract class Base implements Shape {
                const SIDES = 0, NAME = 'base';
                protected static ?int $count = null;
                public function __construct(private readonly int $id, ...$rest) {}
                abstract protected function area(): float;
                public static function &make(int|string $x = [1, 2]): static { return new static($x); }
            }
            function &counter(Iterator&Countable $it): ?int {
                static $n = 0, $m;
                global $config;
                try { $n++; } catch (TypeError | ValueError $e) { throw $e; } finally { --$n; }
                return $n;
            }",
        );
    }

    #[test]
    fn expressions_print_back_the_same_tree() {
        assert_stable(
            "<?php
            $f = static function ($a, &$b) use ($c, &$d): int { return $a <=> $b; };
            $g = fn($x) => $x * 2 + $y;
            [$p, [, $q]] = list($r, $s) = $t;
            $u = match (true) { $a > 1, $a < -1 => 'far', default => 'near' };
            $v = $a ? $b : ($c ?: $d);
            $w = (string) $x . (int) @$y['k'] . Foo::$bar . Foo::BAZ . static::class;
            $obj->prop->{$name}[0] = $arr[] = clone $other?->copy;
            $cls::create(...$args)->run(fn() => $x);
            echo isset($a, $b->c) && !empty($d), print 'x', $$name, ${'dyn' . $i};
            $i += 1; $s .= 'x'; $n ??= 5; $bits <<= 2;
            while (true) { do { continue 2; } while (false); break; }
            for ($i = 0, $j = 1; $i < 10; $i++, $j--) {}
            switch ($x) { case 1: case 2: echo 'low'; break; default: echo 'high'; }
            exit(1);",
        );
    }

    #[test]
    fn generators_print_back_the_same_tree() {
        assert_stable(
            "<?php function g() { $x = yield 1 => 2; yield from inner(); $y = yield; return $x . $y; }",
        );
    }

    #[test]
    fn long_chains_print_without_overflow() {
        let src = format!("<?php $s = {};", vec!["'a'"; 20_000].join(" . "));
        let out = format(&src);
        assert!(out.starts_with("<?php\n$s = 'a' . 'a'"));
        assert!(out.ends_with("'a';\n"));
    }
}

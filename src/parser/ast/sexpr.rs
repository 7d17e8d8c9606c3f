use super::*;
use crate::core::with_stack;

/// Renders an AST as a single-line S-expression. Used by `--dump-ast` and
/// by parser tests, so the format is kept stable.
#[derive(Default)]
pub struct SexprPrinter {
    out: String,
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn quoted(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() + 2);
    s.push('"');
    for ch in String::from_utf8_lossy(bytes).chars() {
        match ch {
            '"' => s.push_str("\\\""),
            '\\' => s.push_str("\\\\"),
            '\n' => s.push_str("\\n"),
            '\t' => s.push_str("\\t"),
            '\r' => s.push_str("\\r"),
            c => s.push(c),
        }
    }
    s.push('"');
    s
}

pub fn type_to_string(ty: &Type<'_>) -> String {
    match ty {
        Type::Named(name) => lossy(name.name),
        Type::Nullable(inner) => format!("?{}", type_to_string(inner)),
        Type::Union(types) => types.iter().map(type_to_string).collect::<Vec<_>>().join("|"),
        Type::Intersection(types) => {
            types.iter().map(type_to_string).collect::<Vec<_>>().join("&")
        }
    }
}

fn visibility_name(visibility: Option<Visibility>) -> &'static str {
    match visibility {
        Some(Visibility::Private) => "private",
        Some(Visibility::Protected) => "protected",
        _ => "public",
    }
}

impl SexprPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_program(mut self, program: &Program<'_>) -> String {
        self.open("program");
        for stmt in program.statements {
            self.space();
            self.stmt(stmt);
        }
        self.close();
        self.out
    }

    pub fn print_stmt(mut self, stmt: &Stmt<'_>) -> String {
        self.stmt(stmt);
        self.out
    }

    pub fn print_expr(mut self, expr: &Expr<'_>) -> String {
        self.expr(expr);
        self.out
    }

    fn open(&mut self, head: &str) {
        self.out.push('(');
        self.out.push_str(head);
    }

    fn close(&mut self) {
        self.out.push(')');
    }

    fn space(&mut self) {
        self.out.push(' ');
    }

    fn word(&mut self, word: &str) {
        self.out.push(' ');
        self.out.push_str(word);
    }

    fn stmts(&mut self, stmts: &[StmtId<'_>]) {
        for stmt in stmts {
            self.space();
            self.stmt(stmt);
        }
    }

    fn block(&mut self, head: &str, stmts: &[StmtId<'_>]) {
        self.space();
        self.open(head);
        self.stmts(stmts);
        self.close();
    }

    fn exprs(&mut self, exprs: &[ExprId<'_>]) {
        for expr in exprs {
            self.space();
            self.expr(expr);
        }
    }

    fn stmt(&mut self, stmt: &Stmt<'_>) {
        with_stack(|| self.stmt_inner(stmt));
    }

    fn stmt_inner(&mut self, stmt: &Stmt<'_>) {
        match stmt {
            Stmt::Echo { exprs, .. } => {
                self.open("echo");
                self.exprs(exprs);
            }
            Stmt::InlineHtml { value, .. } => {
                self.open("inline-html");
                self.word(&quoted(value));
            }
            Stmt::Expression { expr, .. } => {
                self.open("expr");
                self.space();
                self.expr(expr);
            }
            Stmt::If {
                condition,
                then_block,
                else_block,
                ..
            } => {
                self.open("if");
                self.space();
                self.expr(condition);
                self.block("then", then_block);
                if let Some(else_block) = else_block {
                    self.block("else", else_block);
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.open("while");
                self.space();
                self.expr(condition);
                self.stmts(body);
            }
            Stmt::DoWhile {
                body, condition, ..
            } => {
                self.open("do-while");
                self.space();
                self.expr(condition);
                self.stmts(body);
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
                ..
            } => {
                self.open("for");
                for (head, list) in [("init", init), ("cond", condition), ("step", step)] {
                    self.space();
                    self.open(head);
                    self.exprs(list);
                    self.close();
                }
                self.stmts(body);
            }
            Stmt::Foreach {
                expr,
                key_var,
                value_var,
                by_ref,
                body,
                ..
            } => {
                self.open("foreach");
                self.space();
                self.expr(expr);
                if let Some(key) = key_var {
                    self.space();
                    self.expr(key);
                }
                self.space();
                if *by_ref {
                    self.out.push('&');
                }
                self.expr(value_var);
                self.stmts(body);
            }
            Stmt::Switch { subject, cases, .. } => {
                self.open("switch");
                self.space();
                self.expr(subject);
                for case in *cases {
                    self.space();
                    match case.condition {
                        Some(cond) => {
                            self.open("case");
                            self.space();
                            self.expr(cond);
                        }
                        None => self.open("default"),
                    }
                    self.stmts(case.body);
                    self.close();
                }
            }
            Stmt::Break { levels, .. } => {
                self.open("break");
                if *levels != 1 {
                    self.word(&levels.to_string());
                }
            }
            Stmt::Continue { levels, .. } => {
                self.open("continue");
                if *levels != 1 {
                    self.word(&levels.to_string());
                }
            }
            Stmt::Return { expr, .. } => {
                self.open("return");
                if let Some(expr) = expr {
                    self.space();
                    self.expr(expr);
                }
            }
            Stmt::Block { statements, .. } => {
                self.open("block");
                self.stmts(statements);
            }
            Stmt::Function(decl) => {
                self.open("function");
                self.word(&lossy(decl.name.name));
                if decl.by_ref {
                    self.word("by-ref");
                }
                if decl.is_generator {
                    self.word("generator");
                }
                self.params(decl.params);
                self.return_type(decl.return_type);
                self.stmts(decl.body);
            }
            Stmt::Class(decl) => {
                self.open("class");
                self.word(&lossy(decl.name.name));
                if decl.modifiers.is_abstract {
                    self.word("abstract");
                }
                if decl.modifiers.is_final {
                    self.word("final");
                }
                if decl.modifiers.is_readonly {
                    self.word("readonly");
                }
                if let Some(parent) = decl.extends {
                    self.space();
                    self.open("extends");
                    self.word(&lossy(parent.name));
                    self.close();
                }
                self.name_list("implements", decl.implements);
                self.members(decl.members);
            }
            Stmt::Interface(decl) => {
                self.open("interface");
                self.word(&lossy(decl.name.name));
                self.name_list("extends", decl.extends);
                self.members(decl.members);
            }
            Stmt::Try {
                body,
                catches,
                finally,
                ..
            } => {
                self.open("try");
                self.stmts(body);
                for catch in *catches {
                    self.space();
                    self.open("catch");
                    self.space();
                    self.out.push('(');
                    let names: Vec<String> = catch.types.iter().map(|t| lossy(t.name)).collect();
                    self.out.push_str(&names.join(" "));
                    self.out.push(')');
                    if let Some(var) = catch.var {
                        self.word(&lossy(var.name));
                    }
                    self.stmts(catch.body);
                    self.close();
                }
                if let Some(finally) = finally {
                    self.block("finally", finally);
                }
            }
            Stmt::Throw { expr, .. } => {
                self.open("throw");
                self.space();
                self.expr(expr);
            }
            Stmt::Global { vars, .. } => {
                self.open("global");
                for var in *vars {
                    self.word(&lossy(var.name));
                }
            }
            Stmt::Static { vars, .. } => {
                self.open("static");
                for var in *vars {
                    self.space();
                    self.open(&lossy(var.name.name));
                    if let Some(default) = var.default {
                        self.space();
                        self.expr(default);
                    }
                    self.close();
                }
            }
            Stmt::Unset { vars, .. } => {
                self.open("unset");
                self.exprs(vars);
            }
            Stmt::Const { items, .. } => {
                self.open("const");
                for item in *items {
                    self.word(&lossy(item.name.name));
                    self.space();
                    self.expr(item.value);
                }
            }
            Stmt::Declare {
                strict_types, body, ..
            } => {
                self.open("declare");
                if let Some(strict) = strict_types {
                    self.word(if *strict { "strict_types=1" } else { "strict_types=0" });
                }
                if let Some(body) = body {
                    self.stmts(body);
                }
            }
            Stmt::HaltCompiler { .. } => self.open("halt-compiler"),
            Stmt::Nop { .. } => self.open("nop"),
        }
        self.close();
    }

    fn name_list(&mut self, head: &str, names: &[Ident<'_>]) {
        if names.is_empty() {
            return;
        }
        self.space();
        self.open(head);
        for name in names {
            self.word(&lossy(name.name));
        }
        self.close();
    }

    fn return_type(&mut self, ty: Option<&Type<'_>>) {
        if let Some(ty) = ty {
            self.space();
            self.open("returns");
            self.word(&type_to_string(ty));
            self.close();
        }
    }

    fn params(&mut self, params: &[Param<'_>]) {
        self.space();
        self.out.push('(');
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.space();
            }
            self.open("param");
            self.word(&lossy(param.name.name));
            if let Some(ty) = param.ty {
                self.word(&type_to_string(ty));
            }
            if param.by_ref {
                self.word("by-ref");
            }
            if param.variadic {
                self.word("variadic");
            }
            if let Some(promote) = param.promote {
                self.word(&format!("promote-{}", visibility_name(promote.visibility)));
            }
            if let Some(default) = param.default {
                self.space();
                self.expr(default);
            }
            self.close();
        }
        self.out.push(')');
    }

    fn members(&mut self, members: &[ClassMember<'_>]) {
        for member in members {
            self.space();
            match member {
                ClassMember::Const {
                    visibility, items, ..
                } => {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            self.space();
                        }
                        self.open("const");
                        if let Some(visibility) = visibility {
                            self.word(visibility_name(Some(*visibility)));
                        }
                        self.word(&lossy(item.name.name));
                        self.space();
                        self.expr(item.value);
                        self.close();
                    }
                }
                ClassMember::Property {
                    modifiers,
                    ty,
                    entries,
                    ..
                } => {
                    for (i, entry) in entries.iter().enumerate() {
                        if i > 0 {
                            self.space();
                        }
                        self.open("property");
                        self.modifiers(modifiers);
                        if let Some(ty) = ty {
                            self.word(&type_to_string(ty));
                        }
                        self.word(&lossy(entry.name.name));
                        if let Some(default) = entry.default {
                            self.space();
                            self.expr(default);
                        }
                        self.close();
                    }
                }
                ClassMember::Method(method) => {
                    self.open("method");
                    self.modifiers(&method.modifiers);
                    self.word(&lossy(method.name.name));
                    if method.is_generator {
                        self.word("generator");
                    }
                    self.params(method.params);
                    self.return_type(method.return_type);
                    if let Some(body) = method.body {
                        self.stmts(body);
                    }
                    self.close();
                }
            }
        }
    }

    fn modifiers(&mut self, modifiers: &MemberModifiers) {
        self.word(visibility_name(modifiers.visibility));
        if modifiers.is_static {
            self.word("static");
        }
        if modifiers.is_abstract {
            self.word("abstract");
        }
        if modifiers.is_final {
            self.word("final");
        }
        if modifiers.is_readonly {
            self.word("readonly");
        }
    }

    fn class_ref(&mut self, class: &ClassRef<'_>) {
        match class {
            ClassRef::Named(name) => self.out.push_str(&lossy(name.name)),
            ClassRef::Dynamic(expr) => self.expr(expr),
        }
    }

    fn member_name(&mut self, name: &MemberName<'_>) {
        match name {
            MemberName::Ident(ident) => self.out.push_str(&lossy(ident.name)),
            MemberName::Dynamic(expr) => self.expr(expr),
        }
    }

    fn args(&mut self, args: &[Arg<'_>]) {
        for arg in args {
            self.space();
            if arg.unpack {
                self.open("...");
                self.space();
                self.expr(arg.value);
                self.close();
            } else {
                self.expr(arg.value);
            }
        }
    }

    fn items(&mut self, items: &[ArrayItem<'_>]) {
        for item in items {
            self.space();
            let Some(value) = item.value else {
                self.out.push('_');
                continue;
            };
            if item.unpack {
                self.open("...");
                self.space();
                self.expr(value);
                self.close();
                continue;
            }
            if let Some(key) = item.key {
                self.open("=>");
                self.space();
                self.expr(key);
                self.space();
            }
            if item.by_ref {
                self.out.push('&');
            }
            self.expr(value);
            if item.key.is_some() {
                self.close();
            }
        }
    }

    fn expr(&mut self, expr: &Expr<'_>) {
        with_stack(|| self.expr_inner(expr));
    }

    fn expr_inner(&mut self, expr: &Expr<'_>) {
        match expr {
            Expr::Null { .. } => self.open("null"),
            Expr::Bool { value, .. } => {
                self.open("bool");
                self.word(if *value { "true" } else { "false" });
            }
            Expr::Int { value, .. } => {
                self.open("int");
                self.word(&value.to_string());
            }
            Expr::Float { value, .. } => {
                self.open("float");
                self.word(&value.to_string());
            }
            Expr::String { value, .. } => {
                self.open("str");
                self.word(&quoted(value));
            }
            Expr::Interpolated { parts, .. } => {
                self.open("interp");
                self.exprs(parts);
            }
            Expr::Variable { name, .. } => {
                self.open("var");
                self.word(&lossy(name));
            }
            Expr::VariableVariable { expr, .. } => {
                self.open("var-var");
                self.space();
                self.expr(expr);
            }
            Expr::Name { name, .. } => {
                self.open("name");
                self.word(&lossy(name.name));
            }
            Expr::Array { items, .. } => {
                self.open("array");
                self.items(items);
            }
            Expr::List { items, .. } => {
                self.open("list");
                self.items(items);
            }
            Expr::ArrayDim { array, dim, .. } => {
                self.open("dim");
                self.space();
                self.expr(array);
                if let Some(dim) = dim {
                    self.space();
                    self.expr(dim);
                }
            }
            Expr::Property {
                target,
                name,
                nullsafe,
                ..
            } => {
                self.open(if *nullsafe { "nullsafe-prop" } else { "prop" });
                self.space();
                self.expr(target);
                self.space();
                self.member_name(name);
            }
            Expr::StaticProperty { class, name, .. } => {
                self.open("static-prop");
                self.space();
                self.class_ref(class);
                self.word(&lossy(name.name));
            }
            Expr::ClassConst { class, name, .. } => {
                self.open("class-const");
                self.space();
                self.class_ref(class);
                self.word(&lossy(name.name));
            }
            Expr::Call { func, args, .. } => {
                self.open("call");
                self.space();
                self.expr(func);
                self.args(args);
            }
            Expr::MethodCall {
                target,
                method,
                args,
                nullsafe,
                ..
            } => {
                self.open(if *nullsafe {
                    "nullsafe-method-call"
                } else {
                    "method-call"
                });
                self.space();
                self.expr(target);
                self.space();
                self.member_name(method);
                self.args(args);
            }
            Expr::StaticCall {
                class,
                method,
                args,
                ..
            } => {
                self.open("static-call");
                self.space();
                self.class_ref(class);
                self.space();
                self.member_name(method);
                self.args(args);
            }
            Expr::New { class, args, .. } => {
                self.open("new");
                self.space();
                self.class_ref(class);
                self.args(args);
            }
            Expr::Clone { expr, .. } => {
                self.open("clone");
                self.space();
                self.expr(expr);
            }
            Expr::Assign { target, value, .. } => {
                self.open("assign");
                self.space();
                self.expr(target);
                self.space();
                self.expr(value);
            }
            Expr::AssignRef { target, value, .. } => {
                self.open("assign-ref");
                self.space();
                self.expr(target);
                self.space();
                self.expr(value);
            }
            Expr::AssignOp {
                op, target, value, ..
            } => {
                self.open(&format!("{}=", op.symbol()));
                self.space();
                self.expr(target);
                self.space();
                self.expr(value);
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                self.open(op.symbol());
                self.space();
                self.expr(left);
                self.space();
                self.expr(right);
            }
            Expr::Unary { op, expr, .. } => {
                self.open(match op {
                    UnaryOp::Plus => "pos",
                    UnaryOp::Minus => "neg",
                    UnaryOp::Not => "not",
                    UnaryOp::BitNot => "bit-not",
                    UnaryOp::Silence => "silence",
                });
                self.space();
                self.expr(expr);
            }
            Expr::IncDec {
                increment,
                prefix,
                target,
                ..
            } => {
                self.open(match (prefix, increment) {
                    (true, true) => "pre-inc",
                    (true, false) => "pre-dec",
                    (false, true) => "post-inc",
                    (false, false) => "post-dec",
                });
                self.space();
                self.expr(target);
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
                ..
            } => {
                self.open(if then.is_some() { "?" } else { "?:" });
                self.space();
                self.expr(condition);
                if let Some(then) = then {
                    self.space();
                    self.expr(then);
                }
                self.space();
                self.expr(otherwise);
            }
            Expr::Instanceof { expr, class, .. } => {
                self.open("instanceof");
                self.space();
                self.expr(expr);
                self.space();
                self.class_ref(class);
            }
            Expr::Cast { kind, expr, .. } => {
                self.open("cast");
                self.word(match kind {
                    CastKind::Int => "int",
                    CastKind::Float => "float",
                    CastKind::String => "string",
                    CastKind::Bool => "bool",
                    CastKind::Array => "array",
                    CastKind::Object => "object",
                    CastKind::Unset => "unset",
                });
                self.space();
                self.expr(expr);
            }
            Expr::Isset { vars, .. } => {
                self.open("isset");
                self.exprs(vars);
            }
            Expr::Empty { expr, .. } => {
                self.open("empty");
                self.space();
                self.expr(expr);
            }
            Expr::Closure(decl) => {
                self.open("closure");
                if decl.is_static {
                    self.word("static");
                }
                if decl.is_generator {
                    self.word("generator");
                }
                self.params(decl.params);
                if !decl.uses.is_empty() {
                    self.space();
                    self.open("use");
                    for used in decl.uses {
                        self.space();
                        if used.by_ref {
                            self.out.push('&');
                        }
                        self.out.push_str(&lossy(used.name.name));
                    }
                    self.close();
                }
                self.return_type(decl.return_type);
                self.stmts(decl.body);
            }
            Expr::ArrowFn(decl) => {
                self.open("fn");
                if decl.is_static {
                    self.word("static");
                }
                self.params(decl.params);
                self.return_type(decl.return_type);
                self.space();
                self.expr(decl.body);
            }
            Expr::Yield { key, value, .. } => {
                self.open("yield");
                if let Some(key) = key {
                    self.space();
                    self.expr(key);
                }
                if let Some(value) = value {
                    self.space();
                    self.expr(value);
                }
            }
            Expr::YieldFrom { expr, .. } => {
                self.open("yield-from");
                self.space();
                self.expr(expr);
            }
            Expr::Throw { expr, .. } => {
                self.open("throw");
                self.space();
                self.expr(expr);
            }
            Expr::Print { expr, .. } => {
                self.open("print");
                self.space();
                self.expr(expr);
            }
            Expr::Exit { expr, .. } => {
                self.open("exit");
                if let Some(expr) = expr {
                    self.space();
                    self.expr(expr);
                }
            }
            Expr::Match { subject, arms, .. } => {
                self.open("match");
                self.space();
                self.expr(subject);
                for arm in *arms {
                    self.space();
                    match arm.conditions {
                        Some(conditions) => {
                            self.open("arm");
                            self.space();
                            self.out.push('(');
                            for (i, cond) in conditions.iter().enumerate() {
                                if i > 0 {
                                    self.space();
                                }
                                self.expr(cond);
                            }
                            self.out.push(')');
                        }
                        None => self.open("default"),
                    }
                    self.space();
                    self.expr(arm.body);
                    self.close();
                }
            }
            Expr::MagicConst { kind, .. } => {
                self.open("magic");
                self.word(match kind {
                    MagicConst::Line => "__LINE__",
                    MagicConst::File => "__FILE__",
                    MagicConst::Dir => "__DIR__",
                    MagicConst::Class => "__CLASS__",
                    MagicConst::Function => "__FUNCTION__",
                    MagicConst::Method => "__METHOD__",
                    MagicConst::Namespace => "__NAMESPACE__",
                    MagicConst::Trait => "__TRAIT__",
                });
            }
        }
        self.close();
    }
}

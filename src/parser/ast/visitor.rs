use super::*;
use crate::core::with_stack;

/// Read-only AST walk. Override a `visit_*` method and call the matching
/// `walk_*` function to keep descending.
pub trait Visitor<'ast> {
    fn visit_stmt(&mut self, stmt: StmtId<'ast>) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: ExprId<'ast>) {
        walk_expr(self, expr);
    }

    fn visit_param(&mut self, param: &'ast Param<'ast>) {
        walk_param(self, param);
    }

    /// Closures, arrow functions, functions and class bodies. The default
    /// descends into them.
    fn visit_closure(&mut self, decl: &'ast ClosureDecl<'ast>) {
        walk_closure(self, decl);
    }

    fn visit_arrow_fn(&mut self, decl: &'ast ArrowFnDecl<'ast>) {
        walk_arrow_fn(self, decl);
    }
}

pub fn walk_block<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, stmts: &'ast [StmtId<'ast>]) {
    for stmt in stmts {
        visitor.visit_stmt(stmt);
    }
}

fn walk_exprs<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, exprs: &'ast [ExprId<'ast>]) {
    for expr in exprs {
        visitor.visit_expr(expr);
    }
}

fn walk_args<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, args: &'ast [Arg<'ast>]) {
    for arg in args {
        visitor.visit_expr(arg.value);
    }
}

fn walk_items<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, items: &'ast [ArrayItem<'ast>]) {
    for item in items {
        if let Some(key) = item.key {
            visitor.visit_expr(key);
        }
        if let Some(value) = item.value {
            visitor.visit_expr(value);
        }
    }
}

fn walk_class_ref<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, class: &ClassRef<'ast>) {
    if let ClassRef::Dynamic(expr) = class {
        visitor.visit_expr(expr);
    }
}

fn walk_member<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, name: &MemberName<'ast>) {
    if let MemberName::Dynamic(expr) = name {
        visitor.visit_expr(expr);
    }
}

fn walk_members<'ast, V: Visitor<'ast> + ?Sized>(
    visitor: &mut V,
    members: &'ast [ClassMember<'ast>],
) {
    for member in members {
        match member {
            ClassMember::Property { entries, .. } => {
                for entry in entries.iter() {
                    if let Some(default) = entry.default {
                        visitor.visit_expr(default);
                    }
                }
            }
            ClassMember::Method(method) => {
                for param in method.params {
                    visitor.visit_param(param);
                }
                if let Some(body) = method.body {
                    walk_block(visitor, body);
                }
            }
            ClassMember::Const { items, .. } => {
                for item in items.iter() {
                    visitor.visit_expr(item.value);
                }
            }
        }
    }
}

pub fn walk_param<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, param: &'ast Param<'ast>) {
    if let Some(default) = param.default {
        visitor.visit_expr(default);
    }
}

pub fn walk_closure<'ast, V: Visitor<'ast> + ?Sized>(
    visitor: &mut V,
    decl: &'ast ClosureDecl<'ast>,
) {
    for param in decl.params {
        visitor.visit_param(param);
    }
    walk_block(visitor, decl.body);
}

pub fn walk_arrow_fn<'ast, V: Visitor<'ast> + ?Sized>(
    visitor: &mut V,
    decl: &'ast ArrowFnDecl<'ast>,
) {
    for param in decl.params {
        visitor.visit_param(param);
    }
    visitor.visit_expr(decl.body);
}

pub fn walk_stmt<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, stmt: StmtId<'ast>) {
    with_stack(|| walk_stmt_inner(visitor, stmt));
}

fn walk_stmt_inner<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, stmt: StmtId<'ast>) {
    match stmt {
        Stmt::Echo { exprs, .. } => walk_exprs(visitor, exprs),
        Stmt::Expression { expr, .. } | Stmt::Throw { expr, .. } => visitor.visit_expr(expr),
        Stmt::If {
            condition,
            then_block,
            else_block,
            ..
        } => {
            visitor.visit_expr(condition);
            walk_block(visitor, then_block);
            if let Some(else_block) = else_block {
                walk_block(visitor, else_block);
            }
        }
        Stmt::While {
            condition, body, ..
        }
        | Stmt::DoWhile {
            condition, body, ..
        } => {
            visitor.visit_expr(condition);
            walk_block(visitor, body);
        }
        Stmt::For {
            init,
            condition,
            step,
            body,
            ..
        } => {
            walk_exprs(visitor, init);
            walk_exprs(visitor, condition);
            walk_exprs(visitor, step);
            walk_block(visitor, body);
        }
        Stmt::Foreach {
            expr,
            key_var,
            value_var,
            body,
            ..
        } => {
            visitor.visit_expr(expr);
            if let Some(key) = key_var {
                visitor.visit_expr(key);
            }
            visitor.visit_expr(value_var);
            walk_block(visitor, body);
        }
        Stmt::Switch { subject, cases, .. } => {
            visitor.visit_expr(subject);
            for case in cases.iter() {
                if let Some(condition) = case.condition {
                    visitor.visit_expr(condition);
                }
                walk_block(visitor, case.body);
            }
        }
        Stmt::Return { expr, .. } => {
            if let Some(expr) = expr {
                visitor.visit_expr(expr);
            }
        }
        Stmt::Block { statements, .. } => walk_block(visitor, statements),
        Stmt::Function(decl) => {
            for param in decl.params {
                visitor.visit_param(param);
            }
            walk_block(visitor, decl.body);
        }
        Stmt::Class(decl) => walk_members(visitor, decl.members),
        Stmt::Interface(decl) => walk_members(visitor, decl.members),
        Stmt::Try {
            body,
            catches,
            finally,
            ..
        } => {
            walk_block(visitor, body);
            for catch in catches.iter() {
                walk_block(visitor, catch.body);
            }
            if let Some(finally) = finally {
                walk_block(visitor, finally);
            }
        }
        Stmt::Static { vars, .. } => {
            for var in vars.iter() {
                if let Some(default) = var.default {
                    visitor.visit_expr(default);
                }
            }
        }
        Stmt::Unset { vars, .. } => walk_exprs(visitor, vars),
        Stmt::Const { items, .. } => {
            for item in items.iter() {
                visitor.visit_expr(item.value);
            }
        }
        Stmt::Declare { body, .. } => {
            if let Some(body) = body {
                walk_block(visitor, body);
            }
        }
        Stmt::InlineHtml { .. }
        | Stmt::Break { .. }
        | Stmt::Continue { .. }
        | Stmt::Global { .. }
        | Stmt::HaltCompiler { .. }
        | Stmt::Nop { .. } => {}
    }
}

pub fn walk_expr<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, expr: ExprId<'ast>) {
    with_stack(|| walk_expr_inner(visitor, expr));
}

fn walk_expr_inner<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, expr: ExprId<'ast>) {
    match expr {
        Expr::Interpolated { parts, .. } => walk_exprs(visitor, parts),
        Expr::VariableVariable { expr, .. }
        | Expr::Clone { expr, .. }
        | Expr::Unary { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::Empty { expr, .. }
        | Expr::YieldFrom { expr, .. }
        | Expr::Throw { expr, .. }
        | Expr::Print { expr, .. } => visitor.visit_expr(expr),
        Expr::Array { items, .. } | Expr::List { items, .. } => walk_items(visitor, items),
        Expr::ArrayDim { array, dim, .. } => {
            visitor.visit_expr(array);
            if let Some(dim) = dim {
                visitor.visit_expr(dim);
            }
        }
        Expr::Property { target, name, .. } => {
            visitor.visit_expr(target);
            walk_member(visitor, name);
        }
        Expr::StaticProperty { class, .. } | Expr::ClassConst { class, .. } => {
            walk_class_ref(visitor, class)
        }
        Expr::Call { func, args, .. } => {
            visitor.visit_expr(func);
            walk_args(visitor, args);
        }
        Expr::MethodCall {
            target,
            method,
            args,
            ..
        } => {
            visitor.visit_expr(target);
            walk_member(visitor, method);
            walk_args(visitor, args);
        }
        Expr::StaticCall {
            class,
            method,
            args,
            ..
        } => {
            walk_class_ref(visitor, class);
            walk_member(visitor, method);
            walk_args(visitor, args);
        }
        Expr::New { class, args, .. } => {
            walk_class_ref(visitor, class);
            walk_args(visitor, args);
        }
        Expr::Assign { target, value, .. }
        | Expr::AssignRef { target, value, .. }
        | Expr::AssignOp { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        Expr::Binary { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::IncDec { target, .. } => visitor.visit_expr(target),
        Expr::Ternary {
            condition,
            then,
            otherwise,
            ..
        } => {
            visitor.visit_expr(condition);
            if let Some(then) = then {
                visitor.visit_expr(then);
            }
            visitor.visit_expr(otherwise);
        }
        Expr::Instanceof { expr, class, .. } => {
            visitor.visit_expr(expr);
            walk_class_ref(visitor, class);
        }
        Expr::Isset { vars, .. } => walk_exprs(visitor, vars),
        Expr::Closure(decl) => visitor.visit_closure(decl),
        Expr::ArrowFn(decl) => visitor.visit_arrow_fn(decl),
        Expr::Yield { key, value, .. } => {
            if let Some(key) = key {
                visitor.visit_expr(key);
            }
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        Expr::Exit { expr, .. } => {
            if let Some(expr) = expr {
                visitor.visit_expr(expr);
            }
        }
        Expr::Match { subject, arms, .. } => {
            visitor.visit_expr(subject);
            for arm in arms.iter() {
                if let Some(conditions) = arm.conditions {
                    walk_exprs(visitor, conditions);
                }
                visitor.visit_expr(arm.body);
            }
        }
        Expr::Null { .. }
        | Expr::Bool { .. }
        | Expr::Int { .. }
        | Expr::Float { .. }
        | Expr::String { .. }
        | Expr::Variable { .. }
        | Expr::Name { .. }
        | Expr::MagicConst { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;
    use bumpalo::Bump;

    struct VariableCounter {
        names: Vec<Vec<u8>>,
    }

    impl<'ast> Visitor<'ast> for VariableCounter {
        fn visit_expr(&mut self, expr: ExprId<'ast>) {
            if let Expr::Variable { name, .. } = expr {
                self.names.push(name.to_vec());
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn walks_nested_expressions() {
        let arena = Bump::new();
        let program = parse(b"<?php foreach ($a as $k => $v) { echo $k . $b[$c]; }", &arena)
            .unwrap();
        let mut counter = VariableCounter { names: Vec::new() };
        walk_block(&mut counter, program.statements);
        let names: Vec<&[u8]> = counter.names.iter().map(|n| n.as_slice()).collect();
        assert_eq!(names, vec![&b"a"[..], b"k", b"v", b"k", b"b", b"c"]);
    }
}

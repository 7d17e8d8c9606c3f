//! Declarations nothing in the script refers to.
//!
//! Every call, `new`, `::` access, `instanceof`, `extends`, `implements`
//! and `catch` in the program counts as a use, including those inside
//! other dead code. String literals naming a function, or `Class::method`,
//! count too since they are usually callbacks. Magic methods are called
//! by the engine and are never reported.

use super::visitor::{Visitor, walk_expr, walk_stmt};
use super::*;
use indexmap::IndexSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Function,
    Method,
    Class,
    Interface,
}

/// A declaration with no reference to its name.
#[derive(Debug, Clone, Copy)]
pub struct DeadDecl<'ast> {
    pub kind: DeclKind,
    pub name: Ident<'ast>,
    /// Declaring class of a method.
    pub owner: Option<Ident<'ast>>,
}

/// Functions and methods that are never called by name.
pub fn dead_functions<'ast>(program: &Program<'ast>) -> Vec<DeadDecl<'ast>> {
    let usage = Usage::collect(program);
    usage
        .declarations
        .iter()
        .filter(|decl| match decl.kind {
            DeclKind::Function => !usage.functions.contains(&lower(decl.name.name)),
            DeclKind::Method => {
                !decl.name.name.starts_with(b"__") && !usage.methods.contains(&lower(decl.name.name))
            }
            DeclKind::Class | DeclKind::Interface => false,
        })
        .copied()
        .collect()
}

/// Classes and interfaces that are never instantiated, extended or named.
pub fn dead_classes<'ast>(program: &Program<'ast>) -> Vec<DeadDecl<'ast>> {
    let usage = Usage::collect(program);
    usage
        .declarations
        .iter()
        .filter(|decl| {
            matches!(decl.kind, DeclKind::Class | DeclKind::Interface)
                && !usage.classes.contains(&lower(decl.name.name))
        })
        .copied()
        .collect()
}

fn lower(name: &[u8]) -> Vec<u8> {
    name.to_ascii_lowercase()
}

#[derive(Default)]
struct Usage<'ast> {
    declarations: Vec<DeadDecl<'ast>>,
    functions: IndexSet<Vec<u8>>,
    methods: IndexSet<Vec<u8>>,
    classes: IndexSet<Vec<u8>>,
}

impl<'ast> Usage<'ast> {
    fn collect(program: &Program<'ast>) -> Self {
        let mut usage = Self::default();
        for stmt in program.statements {
            usage.visit_stmt(stmt);
        }
        usage
    }

    fn use_class(&mut self, class: &ClassRef<'ast>) {
        if let ClassRef::Named(name) = class {
            self.classes.insert(lower(name.name));
        }
    }

    fn use_method(&mut self, method: &MemberName<'ast>) {
        if let MemberName::Ident(name) = method {
            self.methods.insert(lower(name.name));
        }
    }

    fn use_callable_string(&mut self, value: &[u8]) {
        let value = value.strip_prefix(b"\\").unwrap_or(value);
        match value.iter().position(|&b| b == b':') {
            Some(colon) if value.get(colon + 1) == Some(&b':') => {
                self.classes.insert(lower(&value[..colon]));
                self.methods.insert(lower(&value[colon + 2..]));
            }
            _ => {
                self.functions.insert(lower(value));
            }
        }
    }

    fn declare(&mut self, kind: DeclKind, name: Ident<'ast>, owner: Option<Ident<'ast>>) {
        self.declarations.push(DeadDecl { kind, name, owner });
    }

    fn declare_methods(&mut self, owner: Ident<'ast>, members: &'ast [ClassMember<'ast>]) {
        for member in members {
            if let ClassMember::Method(method) = member {
                self.declare(DeclKind::Method, method.name, Some(owner));
            }
        }
    }
}

impl<'ast> Visitor<'ast> for Usage<'ast> {
    fn visit_stmt(&mut self, stmt: StmtId<'ast>) {
        match stmt {
            Stmt::Function(decl) => self.declare(DeclKind::Function, decl.name, None),
            Stmt::Class(decl) => {
                self.declare(DeclKind::Class, decl.name, None);
                self.declare_methods(decl.name, decl.members);
                if let Some(parent) = decl.extends {
                    self.classes.insert(lower(parent.name));
                }
                for interface in decl.implements {
                    self.classes.insert(lower(interface.name));
                }
            }
            Stmt::Interface(decl) => {
                self.declare(DeclKind::Interface, decl.name, None);
                for parent in decl.extends {
                    self.classes.insert(lower(parent.name));
                }
            }
            Stmt::Try { catches, .. } => {
                for catch in catches.iter() {
                    for ty in catch.types {
                        self.classes.insert(lower(ty.name));
                    }
                }
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: ExprId<'ast>) {
        match expr {
            Expr::Call { func, .. } => {
                if let Expr::Name { name, .. } = func {
                    self.functions.insert(lower(name.name));
                }
            }
            Expr::MethodCall { method, .. } => self.use_method(method),
            Expr::StaticCall { class, method, .. } => {
                self.use_class(class);
                self.use_method(method);
            }
            Expr::New { class, .. }
            | Expr::ClassConst { class, .. }
            | Expr::StaticProperty { class, .. }
            | Expr::Instanceof { class, .. } => self.use_class(class),
            Expr::String { value, .. } => self.use_callable_string(value),
            _ => {}
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;
    use bumpalo::Bump;

    fn names(decls: &[DeadDecl<'_>]) -> Vec<String> {
        decls
            .iter()
            .map(|decl| String::from_utf8_lossy(decl.name.name).into_owned())
            .collect()
    }

    #[test]
    fn uncalled_functions_and_methods_are_dead() {
        let arena = Bump::new();
        let program = parse(
            b"<?php
            $var1 = 'a';
            function simple() { $var2 = 'b'; }
            class fizz {
                const buzz = 'fizzbuzz';
                static function notsimple() { $var4 = 'd'; }
                function other() {}
                function __toString(): string { return ''; }
            }
            fizz::notsimple();",
            &arena,
        )
        .unwrap();
        let dead = dead_functions(&program);
        assert_eq!(names(&dead), vec!["simple", "other"]);
        assert_eq!(dead[0].kind, DeclKind::Function);
        assert_eq!(dead[1].kind, DeclKind::Method);
        assert_eq!(dead[1].owner.map(|owner| owner.name), Some(&b"fizz"[..]));
    }

    #[test]
    fn calls_from_anywhere_keep_functions_alive() {
        let arena = Bump::new();
        let program = parse(
            b"<?php
            function helper() {}
            function callback($x) { return $x; }
            function Shout() {}
            function unused() { helper(); }
            array_map('callback', [1]);
            SHOUT();
            $f = fn() => $obj->method();",
            &arena,
        )
        .unwrap();
        assert_eq!(names(&dead_functions(&program)), vec!["unused"]);
    }

    #[test]
    fn unreferenced_classes_are_dead() {
        let arena = Bump::new();
        let program = parse(
            b"<?php
            class fizz { static function a() {} }
            class buzz { static function b() {} }
            class fizzbuzz {}
            interface Marker {}
            class Base {}
            class Child extends Base implements Marker {}
            class Failure extends Exception {}
            fizz::notsimple();
            $x = new fizzbuzz();
            try { $x = Child::class; } catch (Failure $e) {}",
            &arena,
        )
        .unwrap();
        assert_eq!(names(&dead_classes(&program)), vec!["buzz"]);
    }
}

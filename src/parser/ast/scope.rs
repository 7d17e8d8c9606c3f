//! Variable scopes of a script: the top level, each function, method and
//! closure body, and which names each one touches.

use super::visitor::{Visitor, walk_block, walk_expr, walk_stmt};
use super::*;
use indexmap::{IndexMap, IndexSet};

const SUPERGLOBALS: &[&[u8]] = &[
    b"GLOBALS", b"_SERVER", b"_GET", b"_POST", b"_FILES", b"_COOKIE", b"_SESSION", b"_REQUEST",
    b"_ENV",
];

#[derive(Debug, Clone, Copy)]
pub enum ScopeKind<'ast> {
    Script,
    Function(Ident<'ast>),
    Method { class: Ident<'ast>, name: Ident<'ast> },
    Closure,
    ArrowFn,
}

#[derive(Debug)]
pub struct Scope<'ast> {
    pub kind: ScopeKind<'ast>,
    pub span: Span,
    /// Index of the enclosing scope.
    pub parent: Option<usize>,
    pub params: Vec<&'ast [u8]>,
    /// Each variable name with every place it appears, in source order.
    pub variables: IndexMap<&'ast [u8], Vec<Span>>,
    /// `$$name` and `${expr}` accesses.
    pub dynamic: Vec<Span>,
    /// Names bound by `global`.
    pub globals: IndexSet<&'ast [u8]>,
    /// Names bound by `static`.
    pub statics: IndexSet<&'ast [u8]>,
}

impl<'ast> Scope<'ast> {
    fn new(kind: ScopeKind<'ast>, span: Span, parent: Option<usize>) -> Self {
        Self {
            kind,
            span,
            parent,
            params: Vec::new(),
            variables: IndexMap::new(),
            dynamic: Vec::new(),
            globals: IndexSet::new(),
            statics: IndexSet::new(),
        }
    }

    pub fn name(&self) -> String {
        match self.kind {
            ScopeKind::Script => "{main}".to_string(),
            ScopeKind::Function(name) => String::from_utf8_lossy(name.name).into_owned(),
            ScopeKind::Method { class, name } => format!(
                "{}::{}",
                String::from_utf8_lossy(class.name),
                String::from_utf8_lossy(name.name)
            ),
            ScopeKind::Closure => "{closure}".to_string(),
            ScopeKind::ArrowFn => "{arrow fn}".to_string(),
        }
    }

    /// Variables read from the enclosing scope without a `use` clause.
    /// Only arrow functions capture this way.
    pub fn implicit_captures(&self) -> Vec<&'ast [u8]> {
        if !matches!(self.kind, ScopeKind::ArrowFn) {
            return Vec::new();
        }
        self.variables
            .keys()
            .filter(|name| !self.params.contains(name) && **name != b"this")
            .copied()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct ScopeAnalysis<'ast> {
    /// The script scope comes first, the rest in source order.
    pub scopes: Vec<Scope<'ast>>,
    pub superglobals: IndexMap<&'ast [u8], Vec<Span>>,
}

impl<'ast> ScopeAnalysis<'ast> {
    pub fn of(program: &Program<'ast>) -> Self {
        let mut builder = Builder {
            analysis: ScopeAnalysis::default(),
            stack: Vec::new(),
        };
        builder.enter(ScopeKind::Script, program.span);
        walk_block(&mut builder, program.statements);
        builder.leave();
        builder.analysis
    }
}

struct Builder<'ast> {
    analysis: ScopeAnalysis<'ast>,
    stack: Vec<usize>,
}

impl<'ast> Builder<'ast> {
    fn enter(&mut self, kind: ScopeKind<'ast>, span: Span) {
        let parent = self.stack.last().copied();
        self.analysis.scopes.push(Scope::new(kind, span, parent));
        self.stack.push(self.analysis.scopes.len() - 1);
    }

    fn leave(&mut self) {
        let Some(index) = self.stack.pop() else {
            return;
        };
        // A nested arrow function reads through to its own parent.
        let captured: Vec<(&'ast [u8], Vec<Span>)> = match self.analysis.scopes.get(index) {
            Some(scope) => {
                let names = scope.implicit_captures();
                scope
                    .variables
                    .iter()
                    .filter(|(name, _)| names.contains(name))
                    .map(|(name, spans)| (*name, spans.clone()))
                    .collect()
            }
            None => Vec::new(),
        };
        for (name, spans) in captured {
            for span in spans {
                self.record(name, span);
            }
        }
    }

    fn current(&mut self) -> Option<&mut Scope<'ast>> {
        let index = *self.stack.last()?;
        self.analysis.scopes.get_mut(index)
    }

    fn record(&mut self, name: &'ast [u8], span: Span) {
        if SUPERGLOBALS.contains(&name) {
            self.analysis.superglobals.entry(name).or_default().push(span);
            return;
        }
        if let Some(scope) = self.current() {
            scope.variables.entry(name).or_default().push(span);
        }
    }

    fn params(&mut self, params: &'ast [Param<'ast>]) {
        for param in params {
            if let Some(scope) = self.current() {
                scope.params.push(param.name.name);
            }
            self.record(param.name.name, param.name.span);
            if let Some(default) = param.default {
                self.visit_expr(default);
            }
        }
    }

    fn function_body(
        &mut self,
        kind: ScopeKind<'ast>,
        span: Span,
        params: &'ast [Param<'ast>],
        body: &'ast [StmtId<'ast>],
    ) {
        self.enter(kind, span);
        self.params(params);
        walk_block(self, body);
        self.leave();
    }

    fn members(&mut self, class: Ident<'ast>, members: &'ast [ClassMember<'ast>]) {
        for member in members {
            match member {
                ClassMember::Method(method) => {
                    if let Some(body) = method.body {
                        let kind = ScopeKind::Method {
                            class,
                            name: method.name,
                        };
                        self.function_body(kind, method.span, method.params, body);
                    }
                }
                ClassMember::Property { entries, .. } => {
                    for entry in entries.iter() {
                        if let Some(default) = entry.default {
                            self.visit_expr(default);
                        }
                    }
                }
                ClassMember::Const { items, .. } => {
                    for item in items.iter() {
                        self.visit_expr(item.value);
                    }
                }
            }
        }
    }
}

impl<'ast> Visitor<'ast> for Builder<'ast> {
    fn visit_stmt(&mut self, stmt: StmtId<'ast>) {
        match stmt {
            Stmt::Function(decl) => self.function_body(
                ScopeKind::Function(decl.name),
                decl.span,
                decl.params,
                decl.body,
            ),
            Stmt::Class(decl) => self.members(decl.name, decl.members),
            Stmt::Interface(decl) => self.members(decl.name, decl.members),
            Stmt::Global { vars, .. } => {
                for var in vars.iter() {
                    if let Some(scope) = self.current() {
                        scope.globals.insert(var.name);
                    }
                    self.record(var.name, var.span);
                }
            }
            Stmt::Static { vars, .. } => {
                for var in vars.iter() {
                    if let Some(scope) = self.current() {
                        scope.statics.insert(var.name.name);
                    }
                    self.record(var.name.name, var.name.span);
                }
                walk_stmt(self, stmt);
            }
            Stmt::Try { catches, .. } => {
                for catch in catches.iter() {
                    if let Some(var) = catch.var {
                        self.record(var.name, var.span);
                    }
                }
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: ExprId<'ast>) {
        match expr {
            Expr::Variable { name, span } => self.record(*name, *span),
            Expr::VariableVariable { span, .. } => {
                if let Some(scope) = self.current() {
                    scope.dynamic.push(*span);
                }
                walk_expr(self, expr);
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_closure(&mut self, decl: &'ast ClosureDecl<'ast>) {
        for captured in decl.uses {
            self.record(captured.name.name, captured.span);
        }
        self.enter(ScopeKind::Closure, decl.span);
        for captured in decl.uses {
            self.record(captured.name.name, captured.span);
        }
        self.params(decl.params);
        walk_block(self, decl.body);
        self.leave();
    }

    fn visit_arrow_fn(&mut self, decl: &'ast ArrowFnDecl<'ast>) {
        self.enter(ScopeKind::ArrowFn, decl.span);
        self.params(decl.params);
        self.visit_expr(decl.body);
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;
    use bumpalo::Bump;

    fn names<'a>(scope: &Scope<'a>) -> Vec<&'a [u8]> {
        scope.variables.keys().copied().collect()
    }

    #[test]
    fn functions_and_methods_get_their_own_scope() {
        let arena = Bump::new();
        let program = parse(
            b"<?php
            $var1 = 'a';
            function simple($arg) { global $config; $var2 = $arg . $config; }
            class fizz {
                function other() { static $count = 0; return $this->x + $count; }
            }
            echo $var1, $_GET['q'];",
            &arena,
        )
        .unwrap();
        let analysis = ScopeAnalysis::of(&program);
        let scopes = &analysis.scopes;
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes[0].name(), "{main}");
        assert_eq!(names(&scopes[0]), vec![&b"var1"[..]]);
        assert_eq!(scopes[0].variables[&b"var1"[..]].len(), 2);

        assert_eq!(scopes[1].name(), "simple");
        assert_eq!(scopes[1].parent, Some(0));
        assert_eq!(scopes[1].params, vec![&b"arg"[..]]);
        assert_eq!(names(&scopes[1]), vec![&b"arg"[..], b"config", b"var2"]);
        assert!(scopes[1].globals.contains(&b"config"[..]));

        assert_eq!(scopes[2].name(), "fizz::other");
        assert!(scopes[2].statics.contains(&b"count"[..]));
        assert_eq!(names(&scopes[2]), vec![&b"count"[..], b"this"]);

        assert_eq!(analysis.superglobals.keys().copied().collect::<Vec<_>>(), vec![&b"_GET"[..]]);
    }

    #[test]
    fn closures_import_and_arrow_functions_capture() {
        let arena = Bump::new();
        let program = parse(
            b"<?php
            $factor = 2; $total = 0;
            $f = function ($x) use ($factor, &$total) { $total += $x * $factor; };
            $g = fn($y) => fn($z) => $y * $z * $factor;
            $h = $$name;",
            &arena,
        )
        .unwrap();
        let analysis = ScopeAnalysis::of(&program);
        let scopes = &analysis.scopes;
        assert_eq!(scopes.len(), 4);

        let closure = &scopes[1];
        assert_eq!(closure.name(), "{closure}");
        assert_eq!(names(closure), vec![&b"factor"[..], b"total", b"x"]);
        assert!(closure.implicit_captures().is_empty());

        let outer = &scopes[2];
        let inner = &scopes[3];
        assert_eq!(inner.parent, Some(2));
        assert_eq!(inner.implicit_captures(), vec![&b"y"[..], b"factor"]);
        assert_eq!(outer.implicit_captures(), vec![&b"factor"[..]]);

        assert_eq!(
            names(&scopes[0]),
            vec![&b"factor"[..], b"total", b"f", b"g", b"h", b"name"]
        );
        assert_eq!(scopes[0].dynamic.len(), 1);
    }
}

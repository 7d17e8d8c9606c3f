use super::{PResult, Parser};
use crate::core::value::Visibility;
use crate::parser::ast::{
    ClassDecl, ClassMember, ClassModifiers, FunctionDecl, Ident, InterfaceDecl, MemberModifiers,
    MethodDecl, Param, PropertyEntry, Stmt, StmtId,
};
use crate::parser::lexer::token::TokenKind;
use crate::parser::span::Span;

const RESERVED_CLASS_NAMES: &[&[u8]] = &[
    b"self", b"parent", b"static", b"int", b"float", b"bool", b"string", b"true", b"false",
    b"null", b"void", b"never", b"mixed", b"iterable", b"object",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberOwner {
    Class { is_abstract: bool },
    Interface,
}

impl<'src, 'ast> Parser<'src, 'ast> {
    /// Name of a declared class, interface or function.
    fn parse_decl_name(&mut self, what: &str) -> PResult<Ident<'ast>> {
        let token = self.current_token;
        if token.kind != TokenKind::Identifier {
            return Err(self.unexpected_expecting("identifier"));
        }
        self.bump();
        let ident = self.ident_from(token);
        if what != "function" && RESERVED_CLASS_NAMES.iter().any(|r| ident.is(r)) {
            return Err(self.error_at(
                token.span,
                format!(
                    "Cannot use '{}' as {what} name as it is reserved",
                    String::from_utf8_lossy(ident.name)
                ),
            ));
        }
        Ok(ident)
    }

    pub(super) fn parse_function_decl(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.expect(TokenKind::Function, "\"function\"")?;
        let by_ref = self.eat(TokenKind::Ampersand);
        let name = self.parse_decl_name("function")?;
        let params = self.parse_params(false)?;
        let return_type = self.parse_return_type()?;

        self.function_stack.push(false);
        let body = self.parse_block();
        let is_generator = self.function_stack.pop().unwrap_or(false);
        let body = body?;

        Ok(self.arena.alloc(Stmt::Function(self.arena.alloc(FunctionDecl {
            name,
            by_ref,
            params,
            return_type,
            body,
            is_generator,
            span: Span::new(start, self.prev_end()),
        }))))
    }

    pub(super) fn parse_params(&mut self, allow_promotion: bool) -> PResult<&'ast [Param<'ast>]> {
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let mut params: Vec<Param<'ast>> = Vec::new();
        while !self.at(TokenKind::CloseParen) {
            if self.at(TokenKind::Attribute) {
                self.skip_attributes()?;
            }
            let start = self.current_token.span.start;

            let mut promote: Option<MemberModifiers> = None;
            while matches!(
                self.current_token.kind,
                TokenKind::Public | TokenKind::Protected | TokenKind::Private | TokenKind::Readonly
            ) {
                let token = self.current_token;
                if !allow_promotion {
                    return Err(self.error_at(
                        token.span,
                        "Cannot declare promoted property outside a constructor",
                    ));
                }
                let modifiers = promote.get_or_insert_with(MemberModifiers::default);
                match token.kind {
                    TokenKind::Readonly => modifiers.is_readonly = true,
                    kind => {
                        if modifiers.visibility.is_some() {
                            return Err(self.error_at(
                                token.span,
                                "Multiple access type modifiers are not allowed",
                            ));
                        }
                        modifiers.visibility = Some(match kind {
                            TokenKind::Protected => Visibility::Protected,
                            TokenKind::Private => Visibility::Private,
                            _ => Visibility::Public,
                        });
                    }
                }
                self.bump();
            }

            let ty = if self.at_type_start() {
                Some(self.parse_type()?)
            } else {
                None
            };
            let by_ref = self.eat(TokenKind::Ampersand);
            let variadic = self.eat(TokenKind::Ellipsis);
            let var = self.expect(TokenKind::Variable, "variable")?;
            let name = self.variable_ident(var);

            if name.is(b"this") {
                return Err(self.error_at(var.span, "Cannot use $this as parameter"));
            }
            if params.iter().any(|p| p.name.name == name.name) {
                return Err(self.error_at(
                    var.span,
                    format!(
                        "Redefinition of parameter ${}",
                        String::from_utf8_lossy(name.name)
                    ),
                ));
            }
            if variadic && promote.is_some() {
                return Err(self.error_at(var.span, "Cannot declare variadic promoted property"));
            }

            let default = if self.eat(TokenKind::Eq) {
                if variadic {
                    return Err(self.error_at(
                        var.span,
                        "Variadic parameter cannot have a default value",
                    ));
                }
                Some(self.parse_expr()?)
            } else {
                None
            };

            params.push(Param {
                name,
                ty,
                default,
                by_ref,
                variadic,
                promote,
                span: Span::new(start, self.prev_end()),
            });

            let last = self.at(TokenKind::CloseParen)
                || (self.at(TokenKind::Comma) && self.next_token.kind == TokenKind::CloseParen);
            if variadic && !last {
                return Err(self.error_at(
                    self.current_token.span,
                    "Only the last parameter can be variadic",
                ));
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "\")\"")?;
        Ok(self.alloc_vec(params))
    }

    pub(super) fn parse_class_decl(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        let mut modifiers = ClassModifiers::default();
        loop {
            let token = self.current_token;
            let flag = match token.kind {
                TokenKind::Abstract => &mut modifiers.is_abstract,
                TokenKind::Final => &mut modifiers.is_final,
                TokenKind::Readonly => &mut modifiers.is_readonly,
                _ => break,
            };
            if *flag {
                return Err(self.error_at(
                    token.span,
                    "Multiple modifiers of the same kind are not allowed",
                ));
            }
            *flag = true;
            self.bump();
        }
        if modifiers.is_abstract && modifiers.is_final {
            return Err(self.error_at(
                self.current_token.span,
                "Cannot use the final modifier on an abstract class",
            ));
        }
        self.expect(TokenKind::Class, "\"class\"")?;
        let name = self.parse_decl_name("class")?;

        let extends = if self.eat(TokenKind::Extends) {
            Some(self.parse_qualified_name()?)
        } else {
            None
        };

        let mut implements = Vec::new();
        if self.eat(TokenKind::Implements) {
            loop {
                implements.push(self.parse_qualified_name()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        let members = self.parse_members(
            name,
            MemberOwner::Class {
                is_abstract: modifiers.is_abstract,
            },
        )?;

        Ok(self.arena.alloc(Stmt::Class(self.arena.alloc(ClassDecl {
            name,
            modifiers,
            extends,
            implements: self.alloc_vec(implements),
            members,
            span: Span::new(start, self.prev_end()),
        }))))
    }

    pub(super) fn parse_interface_decl(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let name = self.parse_decl_name("interface")?;

        let mut extends = Vec::new();
        if self.eat(TokenKind::Extends) {
            loop {
                extends.push(self.parse_qualified_name()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        let members = self.parse_members(name, MemberOwner::Interface)?;

        Ok(self.arena.alloc(Stmt::Interface(self.arena.alloc(InterfaceDecl {
            name,
            extends: self.alloc_vec(extends),
            members,
            span: Span::new(start, self.prev_end()),
        }))))
    }

    fn parse_members(
        &mut self,
        class_name: Ident<'ast>,
        owner: MemberOwner,
    ) -> PResult<&'ast [ClassMember<'ast>]> {
        self.expect(TokenKind::OpenBrace, "\"{\"")?;
        let mut members = Vec::new();
        while !self.eat(TokenKind::CloseBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.unexpected_expecting("\"}\""));
            }
            self.enter()?;
            let member = self.parse_member(class_name, owner);
            self.leave();
            members.push(member?);
        }
        Ok(self.alloc_vec(members))
    }

    fn parse_member_modifiers(&mut self) -> PResult<(MemberModifiers, bool)> {
        let mut modifiers = MemberModifiers::default();
        let mut any = false;
        loop {
            let token = self.current_token;
            match token.kind {
                TokenKind::Public | TokenKind::Protected | TokenKind::Private => {
                    if modifiers.visibility.is_some() {
                        return Err(self.error_at(
                            token.span,
                            "Multiple access type modifiers are not allowed",
                        ));
                    }
                    modifiers.visibility = Some(match token.kind {
                        TokenKind::Protected => Visibility::Protected,
                        TokenKind::Private => Visibility::Private,
                        _ => Visibility::Public,
                    });
                }
                TokenKind::Static | TokenKind::Abstract | TokenKind::Final | TokenKind::Readonly => {
                    let flag = match token.kind {
                        TokenKind::Static => &mut modifiers.is_static,
                        TokenKind::Abstract => &mut modifiers.is_abstract,
                        TokenKind::Final => &mut modifiers.is_final,
                        _ => &mut modifiers.is_readonly,
                    };
                    if *flag {
                        let word = String::from_utf8_lossy(token.text(self.source)).to_ascii_lowercase();
                        return Err(self.error_at(
                            token.span,
                            format!("Multiple {word} modifiers are not allowed"),
                        ));
                    }
                    *flag = true;
                }
                _ => break,
            }
            any = true;
            self.bump();
        }
        if modifiers.is_abstract && modifiers.is_final {
            return Err(self.error_at(
                self.current_token.span,
                "Cannot use the final modifier on an abstract class member",
            ));
        }
        Ok((modifiers, any))
    }

    fn parse_member(
        &mut self,
        class_name: Ident<'ast>,
        owner: MemberOwner,
    ) -> PResult<ClassMember<'ast>> {
        if self.at(TokenKind::Attribute) {
            self.skip_attributes()?;
        }
        let start = self.current_token.span.start;
        let (modifiers, has_modifiers) = self.parse_member_modifiers()?;

        match self.current_token.kind {
            TokenKind::Use => Err(self.error_at(self.current_token.span, "Traits are not supported")),
            TokenKind::Const => {
                if modifiers.is_static || modifiers.is_abstract || modifiers.is_readonly {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Cannot use 'static', 'abstract' or 'readonly' as constant modifier",
                    ));
                }
                self.bump();
                let items = self.parse_const_items()?;
                self.expect_semicolon()?;
                Ok(ClassMember::Const {
                    visibility: modifiers.visibility,
                    items,
                    span: Span::new(start, self.prev_end()),
                })
            }
            TokenKind::Function => self.parse_method(start, class_name, owner, modifiers),
            _ => {
                if owner == MemberOwner::Interface {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Interfaces may not include properties",
                    ));
                }
                if !has_modifiers {
                    return Err(self.unexpected_expecting("\"function\" or \"const\""));
                }
                if modifiers.is_abstract {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Properties cannot be declared abstract",
                    ));
                }
                if modifiers.is_final {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Cannot declare property final, the final modifier is allowed only for methods and classes",
                    ));
                }
                let ty = if self.at_type_start() {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                if modifiers.is_readonly && ty.is_none() {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Readonly property must have type",
                    ));
                }

                let mut entries = Vec::new();
                loop {
                    let var = self.expect(TokenKind::Variable, "variable")?;
                    let name = self.variable_ident(var);
                    let default = if self.eat(TokenKind::Eq) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    entries.push(PropertyEntry {
                        name,
                        default,
                        span: Span::new(var.span.start, self.prev_end()),
                    });
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_semicolon()?;
                Ok(ClassMember::Property {
                    modifiers,
                    ty,
                    entries: self.alloc_vec(entries),
                    span: Span::new(start, self.prev_end()),
                })
            }
        }
    }

    fn parse_method(
        &mut self,
        start: usize,
        class_name: Ident<'ast>,
        owner: MemberOwner,
        modifiers: MemberModifiers,
    ) -> PResult<ClassMember<'ast>> {
        self.bump();
        let by_ref = self.eat(TokenKind::Ampersand);
        let name = self.parse_member_ident()?;
        let qualified = format!(
            "{}::{}()",
            String::from_utf8_lossy(class_name.name),
            String::from_utf8_lossy(name.name)
        );

        let is_constructor = name.is(b"__construct");
        let params = self.parse_params(is_constructor && owner != MemberOwner::Interface)?;
        if is_constructor && modifiers.is_abstract && params.iter().any(|p| p.promote.is_some()) {
            return Err(self.error_at(
                name.span,
                "Cannot declare promoted property in an abstract constructor",
            ));
        }
        let return_type = self.parse_return_type()?;

        let body = if self.at(TokenKind::OpenBrace) {
            match owner {
                MemberOwner::Interface => {
                    return Err(self.error_at(
                        name.span,
                        format!("Interface function {qualified} cannot contain body"),
                    ));
                }
                MemberOwner::Class { .. } if modifiers.is_abstract => {
                    return Err(self.error_at(
                        name.span,
                        format!("Abstract function {qualified} cannot contain body"),
                    ));
                }
                MemberOwner::Class { .. } => {}
            }
            self.function_stack.push(false);
            let body = self.parse_block();
            let is_generator = self.function_stack.pop().unwrap_or(false);
            Some((body?, is_generator))
        } else {
            self.expect_semicolon()?;
            if let MemberOwner::Class { is_abstract } = owner {
                if !modifiers.is_abstract {
                    return Err(self.error_at(
                        name.span,
                        format!("Non-abstract method {qualified} must contain body"),
                    ));
                }
                if !is_abstract {
                    return Err(self.error_at(
                        name.span,
                        format!(
                            "Class {} declares abstract method {} and must therefore be declared abstract",
                            String::from_utf8_lossy(class_name.name),
                            String::from_utf8_lossy(name.name)
                        ),
                    ));
                }
                if modifiers.visibility == Some(Visibility::Private) {
                    return Err(self.error_at(
                        name.span,
                        format!("Abstract function {qualified} cannot be declared private"),
                    ));
                }
            }
            None
        };

        let (body, is_generator) = match body {
            Some((body, is_generator)) => (Some(body), is_generator),
            None => (None, false),
        };

        Ok(ClassMember::Method(self.arena.alloc(MethodDecl {
            name,
            modifiers,
            by_ref,
            params,
            return_type,
            body,
            is_generator,
            span: Span::new(start, self.prev_end()),
        })))
    }
}

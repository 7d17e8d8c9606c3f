//! Visibility checks for properties, methods and class constants.
//!
//! - public: always accessible
//! - private: only from the declaring class
//! - protected: from the declaring class, its ancestors and descendants

use crate::core::value::{Symbol, Visibility};
use crate::runtime::context::ClassDef;
use crate::vm::engine::VM;
use std::rc::Rc;

pub(crate) fn can_access(
    visibility: Visibility,
    declaring_class: Symbol,
    scope: Option<&Rc<ClassDef>>,
) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Private => scope.is_some_and(|s| s.lc_name == declaring_class),
        Visibility::Protected => scope.is_some_and(|s| s.extends_class(declaring_class)),
    }
}

impl VM {
    /// Whether the running code may touch a member with `visibility`.
    pub(crate) fn member_visible(&self, visibility: Visibility, declaring_class: Symbol) -> bool {
        if visibility == Visibility::Public {
            return true;
        }
        let scope = self.current_scope();
        if can_access(visibility, declaring_class, scope.as_ref()) {
            return true;
        }
        // Protected members declared in a subclass of the scope.
        if visibility == Visibility::Protected {
            if let (Some(scope), Some(declaring)) =
                (scope, self.context.classes.get(&declaring_class))
            {
                return declaring.extends_class(scope.lc_name);
            }
        }
        false
    }

    /// `from global scope` or `from scope Foo`, for visibility errors.
    pub(crate) fn scope_description(&self) -> String {
        match self.current_scope() {
            Some(scope) => format!("scope {}", self.sym_name(scope.name)),
            None => "global scope".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: u32, parent: Option<Rc<ClassDef>>) -> Rc<ClassDef> {
        Rc::new(ClassDef::derive(Symbol(name), Symbol(name), parent))
    }

    #[test]
    fn private_needs_declaring_scope() {
        let a = class(1, None);
        let b = class(2, Some(a.clone()));
        assert!(can_access(Visibility::Private, Symbol(1), Some(&a)));
        assert!(!can_access(Visibility::Private, Symbol(1), Some(&b)));
        assert!(!can_access(Visibility::Private, Symbol(1), None));
    }

    #[test]
    fn protected_is_visible_to_subclasses() {
        let a = class(1, None);
        let b = class(2, Some(a.clone()));
        assert!(can_access(Visibility::Protected, Symbol(1), Some(&b)));
        assert!(!can_access(Visibility::Protected, Symbol(1), None));
        assert!(can_access(Visibility::Public, Symbol(1), None));
    }
}

//! Error message formatting
//!
//! Type names for diagnostics and the text of uncaught exceptions.

use crate::core::heap::ObjectRef;
use crate::core::value::{Symbol, Val};
use crate::vm::engine::VM;

impl VM {
    /// `get_debug_type()`: class names for objects, `int`/`float`/... otherwise.
    pub(crate) fn debug_type(&self, value: &Val) -> String {
        match value {
            Val::Object(obj) => self.class_name_of(obj),
            Val::Resource(id) => match self.context.resources.type_name(*id) {
                Some("Unknown") | None => "resource (closed)".to_string(),
                Some(kind) => format!("resource ({})", kind),
            },
            Val::Ref(cell) => self.debug_type(&cell.borrow()),
            other => other.type_name().to_string(),
        }
    }

    pub(crate) fn class_name_of(&self, obj: &ObjectRef) -> String {
        self.context.interner.name(obj.borrow().class.name)
    }

    pub(crate) fn sym_name(&self, sym: Symbol) -> String {
        self.context.interner.name(sym)
    }

    /// Property value as stored, or null.
    pub(crate) fn raw_prop(&self, obj: &ObjectRef, name: Symbol) -> Val {
        obj.borrow()
            .properties
            .get(&name)
            .map(Val::deref_val)
            .unwrap_or(Val::Null)
    }

    /// `Exception::__toString()`:
    /// `Class: message in file:line` followed by the stack trace.
    pub(crate) fn exception_string(&self, exc: &ObjectRef) -> String {
        let mut parts = Vec::new();
        let mut current = Some(exc.clone());
        let mut depth = 0;
        while let Some(obj) = current {
            parts.push(self.exception_headline(&obj));
            depth += 1;
            current = match self.raw_prop(&obj, self.names.previous) {
                Val::Object(prev) if depth < 16 => Some(prev),
                _ => None,
            };
        }
        // Innermost cause first, the thrown exception last.
        parts.reverse();
        let mut out = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\nNext ");
            }
            out.push_str(part);
            out.push_str("\nStack trace:\n#0 {main}");
        }
        out
    }

    fn exception_headline(&self, exc: &ObjectRef) -> String {
        let class = self.class_name_of(exc);
        let message = self.raw_prop(exc, self.names.message);
        let file = self.raw_prop(exc, self.names.file);
        let line = self.raw_prop(exc, self.names.line);
        let message = match message {
            Val::String(s) => s.to_string_lossy(),
            other => String::from_utf8_lossy(&other.scalar_to_bytes(14).unwrap_or_default())
                .into_owned(),
        };
        let file = match file {
            Val::String(s) => s.to_string_lossy(),
            _ => String::new(),
        };
        let line = line.to_int();
        if message.is_empty() {
            format!("{} in {}:{}", class, file, line)
        } else {
            format!("{}: {} in {}:{}", class, message, file, line)
        }
    }

    /// Class name and message of a thrown object.
    pub fn throwable_summary(&self, exc: &ObjectRef) -> (String, String) {
        let message = match self.raw_prop(exc, self.names.message) {
            Val::String(s) => s.to_string_lossy(),
            _ => String::new(),
        };
        (self.class_name_of(exc), message)
    }

    /// Message for an exception that escaped the script.
    pub(crate) fn uncaught_message(&self, exc: &ObjectRef) -> String {
        let file = match self.raw_prop(exc, self.names.file) {
            Val::String(s) => s.to_string_lossy(),
            _ => String::new(),
        };
        let line = self.raw_prop(exc, self.names.line).to_int();
        format!(
            "Uncaught {}\n  thrown in {} on line {}",
            self.exception_string(exc),
            file,
            line
        )
    }
}

use crate::core::value::Symbol;
use std::collections::HashMap;

/// Byte-string interner shared by the compiler and the request that runs its output.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    map: HashMap<Vec<u8>, Symbol>,
    vec: Vec<Vec<u8>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &[u8]) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Symbol(self.vec.len() as u32);
        self.vec.push(s.to_vec());
        self.map.insert(s.to_vec(), sym);
        sym
    }

    /// Intern the ASCII-lowercased form. Function, class and method names
    /// are looked up through these.
    pub fn intern_lower(&mut self, s: &[u8]) -> Symbol {
        if s.iter().any(u8::is_ascii_uppercase) {
            self.intern(&s.to_ascii_lowercase())
        } else {
            self.intern(s)
        }
    }

    pub fn find(&self, s: &[u8]) -> Option<Symbol> {
        self.map.get(s).copied()
    }

    pub fn find_lower(&self, s: &[u8]) -> Option<Symbol> {
        if s.iter().any(u8::is_ascii_uppercase) {
            self.find(&s.to_ascii_lowercase())
        } else {
            self.find(s)
        }
    }

    pub fn lookup(&self, sym: Symbol) -> Option<&[u8]> {
        self.vec.get(sym.0 as usize).map(|v| v.as_slice())
    }

    /// Lossy text form, for messages.
    pub fn name(&self, sym: Symbol) -> String {
        self.lookup(sym)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_interning_shares_symbols() {
        let mut interner = Interner::new();
        let a = interner.intern_lower(b"StdClass");
        let b = interner.intern(b"stdclass");
        assert_eq!(a, b);
        assert_eq!(interner.find_lower(b"STDCLASS"), Some(a));
        assert_eq!(interner.name(a), "stdclass");
    }
}

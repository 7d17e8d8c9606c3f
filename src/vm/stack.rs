use crate::core::value::Val;

/// Operand stack shared by every frame of a request. Each frame owns the
/// slice above its `stack_base`.
#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<Val>,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            values: Vec::with_capacity(1024),
        }
    }

    pub fn push(&mut self, v: Val) {
        self.values.push(v);
    }

    pub fn pop(&mut self) -> Option<Val> {
        self.values.pop()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn peek(&self) -> Option<&Val> {
        self.values.last()
    }

    pub fn peek_at(&self, offset: usize) -> Option<&Val> {
        if offset >= self.values.len() {
            None
        } else {
            Some(&self.values[self.values.len() - 1 - offset])
        }
    }

    /// Remove the top `n` values, oldest first.
    pub fn pop_n(&mut self, n: usize) -> Vec<Val> {
        let at = self.values.len().saturating_sub(n);
        self.values.split_off(at)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Val> {
        self.values.iter()
    }

    /// Drop everything above `len`.
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Take the slice above `base`, for a suspending generator.
    pub fn split_off(&mut self, base: usize) -> Vec<Val> {
        let base = base.min(self.values.len());
        self.values.split_off(base)
    }

    pub fn extend(&mut self, values: Vec<Val>) {
        self.values.extend(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_n_keeps_order() {
        let mut stack = Stack::new();
        for i in 0..4 {
            stack.push(Val::Int(i));
        }
        assert_eq!(stack.pop_n(2), vec![Val::Int(2), Val::Int(3)]);
        assert_eq!(stack.peek(), Some(&Val::Int(1)));
        assert_eq!(stack.peek_at(1), Some(&Val::Int(0)));
    }
}

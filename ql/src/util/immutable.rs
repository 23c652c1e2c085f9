use std::ops::Deref;

/// Read-only wrapper for values which must not change after construction,
/// like an already validated [Parameter](crate::ql::learn::deep_q_agent::Parameter) set.
#[derive(Debug, Clone)]
pub struct Immutable<T> {
    value: T,
}

impl<T> Immutable<T> {
    pub fn new(value: T) -> Self { Self { value } }
}

impl<T> Deref for Immutable<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target { &self.value }
}

//! Uniform access to handler outputs that may carry an error.
//!
//! The cached query decorator stores only the success value and hands back
//! whatever shape the wrapped handler declares. Handlers return either
//! `Result<T, E>` or a bare value wrapped in [`Bare`].

/// A handler output that is either a value or an error.
pub trait Envelope: Sized {
    /// The success payload; this is what gets cached.
    type Value;

    /// Borrow the success value, or `None` when the output holds an error.
    fn value(&self) -> Option<&Self::Value>;

    /// Build a successful output around a value read back from the cache.
    fn from_value(value: Self::Value) -> Self;

    fn is_error(&self) -> bool {
        self.value().is_none()
    }
}

impl<T, E> Envelope for Result<T, E> {
    type Value = T;

    fn value(&self) -> Option<&T> {
        self.as_ref().ok()
    }

    fn from_value(value: T) -> Self {
        Ok(value)
    }
}

/// Output of a handler that cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bare<T>(pub T);

impl<T> Bare<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Envelope for Bare<T> {
    type Value = T;

    fn value(&self) -> Option<&T> {
        Some(&self.0)
    }

    fn from_value(value: T) -> Self {
        Bare(value)
    }
}

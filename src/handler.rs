//! Identity-carrying callbacks.
//!
//! Closures have no identity of their own, so every handler is wrapped in an
//! `Rc` and compared by pointer. Subscribing stores a clone of the handle;
//! unsubscribing with the same handle removes exactly that clone.

use std::fmt;
use std::rc::Rc;

use crate::Name;
use crate::batch::Watch;

/// Event delivered to plain, one-shot and any-property-changed handlers.
///
/// `block` is the block that raised the event. When a compound forwards a
/// child's change, `block` is the compound and `property` is the dotted path
/// from the compound down to the leaf (`"Reels.Spinning"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyChanged {
    pub block: Name,
    pub property: Name,
}

impl PropertyChanged {
    pub(crate) fn new(block: Name, property: Name) -> Self {
        Self { block, property }
    }
}

/// Shared callback compared by identity.
pub struct Callback<F: ?Sized>(Rc<F>);

/// Handler for per-name, one-shot and any-property-changed subscriptions.
pub type ChangeHandler = Callback<dyn Fn(&PropertyChanged)>;

/// Handler receiving `(old, new)` for a single typed property.
pub type ValueHandler<T> = Callback<dyn Fn(&T, &T)>;

/// Handler receiving every watched pair that changed during one tick.
pub type BatchHandler = Callback<dyn Fn(&[Watch])>;

impl<F: ?Sized> Callback<F> {
    /// Whether both handles point at the same callback.
    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<F: ?Sized> Clone for Callback<F> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<F: ?Sized> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

impl Callback<dyn Fn(&PropertyChanged)> {
    pub fn new(f: impl Fn(&PropertyChanged) + 'static) -> Self {
        Self(Rc::new(f))
    }

    #[inline]
    pub(crate) fn call(&self, event: &PropertyChanged) {
        (self.0)(event)
    }
}

impl<T: 'static> Callback<dyn Fn(&T, &T)> {
    pub fn new(f: impl Fn(&T, &T) + 'static) -> Self {
        Self(Rc::new(f))
    }

    #[inline]
    pub(crate) fn call(&self, old: &T, new: &T) {
        (self.0)(old, new)
    }
}

impl Callback<dyn Fn(&[Watch])> {
    pub fn new(f: impl Fn(&[Watch]) + 'static) -> Self {
        Self(Rc::new(f))
    }

    #[inline]
    pub(crate) fn call(&self, changed: &[Watch]) {
        (self.0)(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let a = ChangeHandler::new(|_| {});
        let b = a.clone();
        let c = ChangeHandler::new(|_| {});
        assert!(a.same(&b));
        assert!(!a.same(&c));
    }

    #[test]
    fn value_handler_receives_old_then_new() {
        let seen = Rc::new(std::cell::Cell::new((0, 0)));
        let sink = seen.clone();
        let handler = ValueHandler::<i32>::new(move |old, new| sink.set((*old, *new)));
        handler.call(&1, &2);
        assert_eq!(seen.get(), (1, 2));
    }
}

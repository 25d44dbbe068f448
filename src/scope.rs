//! Scoped registrations: every subscribe paired with its unsubscribe.
//!
//! A block's `wire` step records what it attaches to other blocks through a
//! [`Registrations`] value. Teardown releases them all. The value is move-only
//! and its `Drop` releases whatever is still held, so each unregister action
//! runs exactly once no matter how teardown is reached.

use std::rc::Rc;

use crate::batch::{BatchRegistry, Watch};
use crate::block::Block;
use crate::error::Result;
use crate::handler::{BatchHandler, ChangeHandler, ValueHandler};
use crate::node::StatusBlock;
use crate::property::Property;

type Unregister = Box<dyn FnOnce() -> Result<()>>;

struct Registration {
    label: String,
    unregister: Unregister,
}

/// Ordered list of live registrations owned by one block.
#[derive(Default)]
pub struct Registrations {
    entries: Vec<Registration>,
}

impl Registrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `register` now and keep `unregister` for [`release_all`](Self::release_all).
    ///
    /// Nothing is recorded when `register` fails. Registering more pairs before
    /// a release is additive.
    pub fn register<R, U>(&mut self, label: impl Into<String>, register: R, unregister: U) -> Result<()>
    where
        R: FnOnce() -> Result<()>,
        U: FnOnce() -> Result<()> + 'static,
    {
        register()?;
        self.entries.push(Registration {
            label: label.into(),
            unregister: Box::new(unregister),
        });
        Ok(())
    }

    /// Plain handler on `block.property`.
    pub fn subscribe(&mut self, block: &Block, property: &str, handler: &ChangeHandler) -> Result<()> {
        let (b, h, p) = (block.clone(), handler.clone(), property.to_owned());
        self.register(
            format!("{}.{}", block.name(), property),
            || block.subscribe(property, handler),
            move || b.unsubscribe(&p, &h),
        )
    }

    /// Typed handler on a property handle.
    pub fn subscribe_value<T: Clone + 'static>(
        &mut self,
        property: &Property<T>,
        handler: &ValueHandler<T>,
    ) -> Result<()> {
        let (p, h) = (property.clone(), handler.clone());
        self.register(
            format!("{}.{} (typed)", property.block_name(), property.name()),
            || {
                property.subscribe(handler);
                Ok(())
            },
            move || p.unsubscribe(&h),
        )
    }

    /// Any-property-changed on a block kind. Compounds are reference counted.
    pub fn subscribe_any<N>(&mut self, node: &Rc<N>, handler: &ChangeHandler) -> Result<()>
    where
        N: StatusBlock + ?Sized,
    {
        let (n, h) = (Rc::clone(node), handler.clone());
        self.register(
            format!("{} (any)", node.block().name()),
            || {
                node.subscribe_any(handler);
                Ok(())
            },
            move || n.unsubscribe_any(&h),
        )
    }

    /// Batch subscription over `watches`.
    pub fn subscribe_batch(
        &mut self,
        registry: &BatchRegistry,
        watches: Vec<Watch>,
        handler: &BatchHandler,
    ) -> Result<()> {
        let (r, w, h) = (registry.clone(), watches.clone(), handler.clone());
        self.register(
            format!("batch over {} pairs", watches.len()),
            || registry.register(watches, handler).map(drop),
            move || r.unregister(&w, &h),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every stored unregister action in registration order, then forget them.
    ///
    /// Failures are logged and do not stop the remaining releases.
    pub fn release_all(&mut self) {
        for Registration { label, unregister } in self.entries.drain(..) {
            if let Err(err) = unregister() {
                tracing::error!(registration = %label, error = %err, "failed to release registration");
            }
        }
    }

    pub(crate) fn absorb(&mut self, mut other: Registrations) {
        self.entries.append(&mut other.entries);
    }
}

impl Drop for Registrations {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tracing_test::traced_test;

    #[test]
    fn register_runs_immediately_and_release_runs_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scope = Registrations::new();
        let (a, b) = (log.clone(), log.clone());
        scope
            .register(
                "counter",
                || {
                    a.borrow_mut().push("register");
                    Ok(())
                },
                move || {
                    b.borrow_mut().push("unregister");
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(*log.borrow(), ["register"]);
        assert_eq!(scope.len(), 1);

        scope.release_all();
        scope.release_all();
        drop(scope);
        assert_eq!(*log.borrow(), ["register", "unregister"]);
    }

    #[test]
    fn failed_register_is_not_recorded() {
        let block = Block::new("Meters");
        let handler = ChangeHandler::new(|_| {});
        let mut scope = Registrations::new();
        assert!(scope.subscribe(&block, "Missing", &handler).is_err());
        assert!(scope.is_empty());
    }

    #[test]
    fn registrations_are_additive_and_symmetric() {
        let block = Block::new("Meters");
        let credits = block.declare("Credits", 0u64).unwrap();
        let plain = ChangeHandler::new(|_| {});
        let typed = ValueHandler::<u64>::new(|_, _| {});

        let mut scope = Registrations::new();
        scope.subscribe(&block, "Credits", &plain).unwrap();
        scope.subscribe_value(&credits, &typed).unwrap();
        scope.subscribe(&block, "Credits", &plain).unwrap();
        assert_eq!(block.attached_handler_count(), 3);

        scope.release_all();
        assert_eq!(block.attached_handler_count(), 0);
    }

    #[test]
    fn dropping_the_scope_releases() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        let plain = ChangeHandler::new(|_| {});
        {
            let mut scope = Registrations::new();
            scope.subscribe(&block, "Credits", &plain).unwrap();
            assert_eq!(block.attached_handler_count(), 1);
        }
        assert_eq!(block.attached_handler_count(), 0);
    }

    #[test]
    #[traced_test]
    fn failed_unregister_is_logged_not_propagated() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        let plain = ChangeHandler::new(|_| {});
        let mut scope = Registrations::new();
        scope.subscribe(&block, "Credits", &plain).unwrap();
        // Removed behind the scope's back.
        block.unsubscribe("Credits", &plain).unwrap();
        scope.release_all();
        assert!(logs_contain("failed to release registration"));
    }
}

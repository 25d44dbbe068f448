//! Teardown leak assertions.
//!
//! After a tree releases its wiring, no handler should remain attached to any
//! block. Survivors are logged at error level under the `reel_status::leak`
//! target instead of panicking, so one forgotten unsubscribe cannot derail the
//! rest of a shutdown while test and CI runs still surface it.
//!
//! The check is compiled in for debug builds and for the `leak-check`
//! feature. Elsewhere [`check`] is a no-op.

use std::cell::Cell;

use crate::block::Block;

thread_local! {
    static ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether teardown on this thread currently reports leaks.
pub fn is_enabled() -> bool {
    cfg!(any(debug_assertions, feature = "leak-check")) && ENABLED.with(Cell::get)
}

/// Scoped override of the leak check, restored on drop.
pub struct LeakCheckGuard {
    previous: bool,
}

impl LeakCheckGuard {
    pub fn new(enabled: bool) -> Self {
        let previous = ENABLED.with(|e| e.replace(enabled));
        Self { previous }
    }
}

impl Drop for LeakCheckGuard {
    fn drop(&mut self) {
        ENABLED.with(|e| e.set(self.previous));
    }
}

/// Report every handler still attached to `block`. Returns how many were found.
#[cfg(any(debug_assertions, feature = "leak-check"))]
pub(crate) fn check(block: &Block) -> usize {
    if !is_enabled() {
        return 0;
    }
    let mut total = 0;
    for survivor in block.attached_handlers() {
        total += survivor.count;
        let property = survivor.property.as_deref().unwrap_or("*");
        tracing::error!(
            target: "reel_status::leak",
            block = %block.name(),
            registry = survivor.registry,
            property,
            count = survivor.count,
            "handler leaked past teardown"
        );
    }
    total
}

#[cfg(not(any(debug_assertions, feature = "leak-check")))]
#[inline(always)]
pub(crate) fn check(_block: &Block) -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ChangeHandler;
    use tracing_test::traced_test;

    #[cfg(any(debug_assertions, feature = "leak-check"))]
    #[test]
    #[traced_test]
    fn survivors_are_logged_with_their_registry() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        let handler = ChangeHandler::new(|_| {});
        block.subscribe("Credits", &handler).unwrap();
        block.subscribe("Credits", &handler).unwrap();

        assert_eq!(check(&block), 2);
        assert!(logs_contain("handler leaked past teardown"));
        assert!(logs_contain("plain"));
        assert!(logs_contain("Credits"));
    }

    #[cfg(any(debug_assertions, feature = "leak-check"))]
    #[test]
    #[traced_test]
    fn guard_disables_and_restores() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        let handler = ChangeHandler::new(|_| {});
        block.subscribe("Credits", &handler).unwrap();
        {
            let _off = LeakCheckGuard::new(false);
            assert!(!is_enabled());
            assert_eq!(check(&block), 0);
        }
        assert!(is_enabled());
        assert!(!logs_contain("handler leaked past teardown"));
    }

    #[test]
    fn clean_block_reports_nothing() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        assert_eq!(check(&block), 0);
    }
}

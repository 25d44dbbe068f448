//! The block-kind trait and its tree-recursive lifecycle.
//!
//! Concrete status kinds (meters, game state, cabinet config) embed a
//! [`Block`] and implement [`StatusBlock`]. Compound kinds also embed a
//! [`Compound`] and return it from [`StatusBlock::compound`]; the provided
//! lifecycle methods then recurse into its children.
//!
//! The provided methods carry the tick and lifecycle ordering. Kinds customise
//! behaviour through the hooks (`wire`, `reset_properties`) and are not meant
//! to override the rest.

use std::any::Any;
use std::rc::Rc;

use crate::block::Block;
use crate::compound::Compound;
use crate::error::Result;
use crate::handler::ChangeHandler;
use crate::leak;
use crate::scope::Registrations;

/// Which boundary a reset belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetScope {
    /// A new player session starts. Kinds holding cabinet or configuration
    /// state usually keep their values.
    NewSession,
    /// Everything returns to its declared state.
    Full,
}

/// Type-erasure helper so `Rc<dyn StatusBlock>` can be downcast to its kind.
pub trait AsAny: Any {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A node of the status tree.
pub trait StatusBlock: AsAny {
    /// The block holding this kind's own properties.
    fn block(&self) -> &Block;

    /// Child container, for compound kinds.
    fn compound(&self) -> Option<&Compound> {
        None
    }

    /// Wire this kind's dependencies on other blocks.
    ///
    /// Called once per initialize. Everything attached elsewhere must go
    /// through `scope` so teardown can undo it.
    fn wire(&self, scope: &mut Registrations) -> Result<()> {
        let _ = scope;
        Ok(())
    }

    /// Return this kind's own properties to their declared state.
    fn reset_properties(&self, scope: ResetScope) {
        let _ = scope;
        self.block().reset_properties();
    }

    fn name(&self) -> &str {
        self.block().name()
    }

    /// Wire this node, then initialize children in order.
    ///
    /// If a child fails, everything this call wired in the subtree is released
    /// again before the error is returned.
    fn initialize(&self) -> Result<()> {
        let block = self.block();
        let fresh = !block.is_initialized();
        if fresh {
            block.set_initialized(true);
            let mut scope = block.take_registrations();
            let wired = self.wire(&mut scope);
            block.restore_registrations(scope);
            if let Err(err) = wired {
                block.release_registrations();
                block.set_initialized(false);
                return Err(err);
            }
            tracing::debug!(block = %block.name(), "initialized status block");
        }
        if let Some(compound) = self.compound() {
            if let Err(err) = compound.initialize_children() {
                if fresh {
                    self.release_wiring();
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Release all wiring in the subtree, then report handlers left behind.
    ///
    /// Releasing the whole subtree before checking anything means wiring
    /// between siblings is gone regardless of teardown order.
    fn teardown(&self) {
        if !self.block().is_initialized() {
            return;
        }
        self.release_wiring();
        self.report_leaks();
    }

    #[doc(hidden)]
    fn release_wiring(&self) {
        let block = self.block();
        block.release_registrations();
        if let Some(compound) = self.compound() {
            compound.release_children();
        }
        block.set_initialized(false);
        tracing::debug!(block = %block.name(), "tore down status block");
    }

    #[doc(hidden)]
    fn report_leaks(&self) {
        leak::check(self.block());
        if let Some(compound) = self.compound() {
            for child in compound.children() {
                child.report_leaks();
            }
        }
    }

    /// Phase 1: own cells first, then children in order.
    fn detect_changes(&self) -> bool {
        let mut pending = self.block().detect_changes();
        if let Some(compound) = self.compound() {
            let mut index = 0;
            while let Some(child) = compound.child(index) {
                pending |= child.detect_changes();
                index += 1;
            }
        }
        pending
    }

    /// Phase 2: own cells first, then children in order.
    fn announce_changes(&self) {
        self.block().announce_changes();
        if let Some(compound) = self.compound() {
            let mut index = 0;
            while let Some(child) = compound.child(index) {
                child.announce_changes();
                index += 1;
            }
        }
    }

    /// Reset this node and then every descendant.
    fn reset(&self, scope: ResetScope) {
        self.reset_properties(scope);
        if let Some(compound) = self.compound() {
            for child in compound.children() {
                child.reset(scope);
            }
        }
    }

    /// Listen to every property change in this node and, for compounds, below it.
    fn subscribe_any(&self, handler: &ChangeHandler) {
        match self.compound() {
            Some(compound) => compound.add_listener(handler),
            None => self.block().add_any_listener(handler),
        }
    }

    fn unsubscribe_any(&self, handler: &ChangeHandler) -> Result<()> {
        match self.compound() {
            Some(compound) => compound.remove_listener(handler),
            None => self.block().remove_any_listener(handler),
        }
    }
}

/// A plain leaf kind with no hooks, handy for tests and ad-hoc blocks.
impl StatusBlock for Block {
    fn block(&self) -> &Block {
        self
    }
}

//! The root of a status tree and the once-per-frame driver.
//!
//! The hosting frame loop owns one [`StatusRoot`]:
//!
//! ```ignore
//! let root = StatusRoot::new("Status");
//! root.attach(meters.clone())?;
//! root.attach(game.clone())?;
//! root.initialize()?;
//!
//! loop {
//!     run_game_logic();                // producers write cells
//!     if root.apply_and_notify()? {    // detect, announce, deliver batches
//!         redraw();
//!     }
//! }
//!
//! root.teardown();                      // releases wiring, reports leaks
//! ```

use std::any::type_name;
use std::cell::Cell;
use std::rc::Rc;

use crate::Name;
use crate::batch::BatchRegistry;
use crate::block::Block;
use crate::compound::Compound;
use crate::error::{Error, Result};
use crate::leak::LeakCheckGuard;
use crate::node::{ResetScope, StatusBlock};

/// Root configuration.
///
/// ```ignore
/// let root = StatusRoot::with_config(Config::new("Status").leak_check(false));
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    name: Name,
    leak_check: bool,
}

impl Config {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            leak_check: true,
        }
    }

    /// Report leaked handlers at teardown.
    ///
    /// Only takes effect in builds with leak assertions compiled in
    /// (debug builds, or the `leak-check` feature).
    pub fn leak_check(mut self, enabled: bool) -> Self {
        self.leak_check = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("Root")
    }
}

/// Marks a tick in progress; clears the flag on drop, panics included.
struct TickGuard<'a> {
    ticking: &'a Cell<bool>,
}

impl<'a> TickGuard<'a> {
    fn enter(ticking: &'a Cell<bool>) -> Option<Self> {
        if ticking.replace(true) {
            return None;
        }
        Some(Self { ticking })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.ticking.set(false);
    }
}

/// Top-level compound plus the batch registry it drains.
pub struct StatusRoot {
    compound: Compound,
    batches: BatchRegistry,
    config: Config,
    ticking: Cell<bool>,
    tick: Cell<u64>,
}

impl StatusRoot {
    pub fn new(name: impl Into<Name>) -> Self {
        Self::with_config(Config::new(name))
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            compound: Compound::new(config.name.clone()),
            batches: BatchRegistry::new(),
            config,
            ticking: Cell::new(false),
            tick: Cell::new(0),
        }
    }

    /// Registry drained at the end of every tick. Clone it into block kinds
    /// that register batch subscriptions while wiring.
    pub fn batches(&self) -> &BatchRegistry {
        &self.batches
    }

    /// Number of completed ticks.
    pub fn tick(&self) -> u64 {
        self.tick.get()
    }

    pub fn attach(&self, child: Rc<dyn StatusBlock>) -> Result<()> {
        self.compound.attach(child)
    }

    pub fn detach(&self, child: &Rc<dyn StatusBlock>) -> Result<()> {
        self.compound.detach(child)
    }

    /// Detect, announce, then deliver batches. Call once per frame.
    ///
    /// Returns whether any property changed. Handlers that write cells during
    /// the tick are picked up by the next one.
    pub fn apply_and_notify(&self) -> Result<bool> {
        let Some(_guard) = TickGuard::enter(&self.ticking) else {
            return Err(Error::NestedTick {
                root: self.compound.block().name().to_string(),
            });
        };
        let changed = self.detect_changes();
        // Cells left queued by an interrupted announce still go out here.
        self.announce_changes();
        let batches = self.batches.deliver();
        let tick = self.tick.get() + 1;
        self.tick.set(tick);
        tracing::trace!(tick, changed, batches, "applied status tick");
        Ok(changed)
    }

    /// Reset at a player-session boundary.
    pub fn reset_for_new_session(&self) {
        tracing::debug!(root = %self.compound.block().name(), "session reset");
        self.reset(ResetScope::NewSession);
    }

    /// Reset every block to its declared state.
    pub fn reset_all(&self) {
        tracing::debug!(root = %self.compound.block().name(), "full reset");
        self.reset(ResetScope::Full);
    }

    /// Release all wiring and report leaked handlers.
    pub fn teardown(&self) {
        let _leak_check = LeakCheckGuard::new(self.config.leak_check);
        StatusBlock::teardown(self);
    }

    /// First block of kind `K`, or an error when the tree has none.
    pub fn block<K: StatusBlock>(&self) -> Result<Rc<K>> {
        self.find_block::<K>(true)?.ok_or_else(|| self.missing::<K>())
    }

    /// First block of kind `K`. A miss is an error only when `required` is set.
    pub fn find_block<K: StatusBlock>(&self, required: bool) -> Result<Option<Rc<K>>> {
        match self.compound.find::<K>() {
            Some(found) => Ok(Some(found)),
            None if required => Err(self.missing::<K>()),
            None => Ok(None),
        }
    }

    fn missing<K>(&self) -> Error {
        Error::BlockNotFound {
            root: self.compound.block().name().to_string(),
            kind: type_name::<K>(),
        }
    }
}

impl StatusBlock for StatusRoot {
    fn block(&self) -> &Block {
        self.compound.block()
    }

    fn compound(&self) -> Option<&Compound> {
        Some(&self.compound)
    }
}

impl std::fmt::Debug for StatusRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRoot")
            .field("compound", &self.compound)
            .field("batches", &self.batches)
            .field("tick", &self.tick.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_tick_reports_no_change() {
        let root = StatusRoot::new("Status");
        let meters = Rc::new(Block::new("Meters"));
        let credits = meters.declare("Credits", 0u64).unwrap();
        root.attach(meters).unwrap();
        root.initialize().unwrap();

        assert!(!root.apply_and_notify().unwrap());
        credits.set(5);
        assert!(root.apply_and_notify().unwrap());
        assert!(!root.apply_and_notify().unwrap());
        assert_eq!(root.tick(), 3);
    }

    #[test]
    fn lookup_policies_differ() {
        struct Absent(Block);
        impl StatusBlock for Absent {
            fn block(&self) -> &Block {
                &self.0
            }
        }

        let root = StatusRoot::new("Status");
        root.attach(Rc::new(Block::new("Meters"))).unwrap();

        assert!(root.block::<Block>().is_ok());
        assert!(matches!(
            root.block::<Absent>(),
            Err(Error::BlockNotFound { kind, .. }) if kind.ends_with("Absent")
        ));
        assert!(root.find_block::<Absent>(true).is_err());
        assert!(root.find_block::<Absent>(false).unwrap().is_none());
        assert!(root.compound().unwrap().find::<Absent>().is_none());
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(&*config.name, "Root");
        assert!(config.leak_check);
        assert!(!Config::new("Status").leak_check(false).leak_check);
    }
}

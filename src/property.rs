//! Dirty-tracking property cells.
//!
//! A cell keeps two values: the one producers last wrote, and the one
//! subscribers last heard about. Writes only flip the `written` flag; nothing
//! is delivered until the owning tree runs a tick:
//!
//! 1. `detect` looks at cells written since the previous tick and queues the
//!    ones whose value really moved away from the announced one.
//! 2. `announce` fires each queued cell once, carrying the final value of the
//!    tick and the value announced before it.
//!
//! Any number of writes between two ticks therefore collapse into one
//! notification, and writing a cell back to its announced value collapses
//! into none.

use std::any::{Any, type_name};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::Name;
use crate::block::Block;
use crate::error::{Error, Result};
use crate::handler::ValueHandler;

/// Equality used to decide whether a written value differs from the announced one.
pub type Comparer<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Storage for a single named value. Owned by exactly one [`Block`].
pub struct PropertyCell<T> {
    block: Name,
    name: Name,
    initial: T,
    value: RefCell<T>,
    announced: RefCell<T>,
    comparer: Comparer<T>,
    written: Cell<bool>,
    queued: Cell<bool>,
    typed: RefCell<SmallVec<[ValueHandler<T>; 2]>>,
}

impl<T: Clone + 'static> PropertyCell<T> {
    pub(crate) fn new(block: Name, name: Name, initial: T, comparer: Comparer<T>) -> Self {
        Self {
            block,
            name,
            value: RefCell::new(initial.clone()),
            announced: RefCell::new(initial.clone()),
            initial,
            comparer,
            written: Cell::new(false),
            queued: Cell::new(false),
            typed: RefCell::new(SmallVec::new()),
        }
    }

    fn write(&self, value: T) {
        *self.value.borrow_mut() = value;
        self.written.set(true);
    }

    fn differs_from_announced(&self) -> bool {
        !(self.comparer)(&self.value.borrow(), &self.announced.borrow())
    }
}

/// Typed handle to a declared property.
///
/// Cloning the handle is cheap; all clones refer to the same cell.
pub struct Property<T>(Rc<PropertyCell<T>>);

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone + 'static> Property<T> {
    pub(crate) fn from_cell(cell: Rc<PropertyCell<T>>) -> Self {
        Self(cell)
    }

    /// Property name, unique within its block.
    pub fn name(&self) -> &Name {
        &self.0.name
    }

    /// Name of the block that owns this property.
    pub fn block_name(&self) -> &Name {
        &self.0.block
    }

    /// Current (possibly not yet announced) value.
    pub fn get(&self) -> T {
        self.0.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.value.borrow())
    }

    /// Replace the value. Subscribers hear about it on the next tick, if at all.
    pub fn set(&self, value: T) {
        self.0.write(value);
    }

    /// Replace the value and report whether it differs from the value last
    /// announced to subscribers.
    ///
    /// The comparison is against the announced value, not the previous write,
    /// so two probes within one tick can both report a change.
    pub fn set_probe(&self, value: T) -> bool {
        self.0.write(value);
        self.0.differs_from_announced()
    }

    /// Whether the cell was written since the last detect pass.
    pub fn is_dirty(&self) -> bool {
        self.0.written.get()
    }

    /// Whether the cell is queued to fire on the current tick's announce pass.
    pub fn is_queued(&self) -> bool {
        self.0.queued.get()
    }

    /// Add a typed `(old, new)` handler. Handlers on the same cell are additive.
    pub fn subscribe(&self, handler: &ValueHandler<T>) {
        self.0.typed.borrow_mut().push(handler.clone());
    }

    /// Remove a typed handler previously added with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, handler: &ValueHandler<T>) -> Result<()> {
        let mut typed = self.0.typed.borrow_mut();
        let Some(pos) = typed.iter().position(|h| h.same(handler)) else {
            return Err(Error::HandlerNotFound {
                block: self.0.block.to_string(),
                property: self.0.name.to_string(),
            });
        };
        typed.remove(pos);
        Ok(())
    }

    /// Number of typed handlers currently attached.
    pub fn handler_count(&self) -> usize {
        self.0.typed.borrow().len()
    }
}

impl<T: fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("block", &self.0.block)
            .field("name", &self.0.name)
            .field("value", &self.0.value.borrow())
            .field("announced", &self.0.announced.borrow())
            .finish()
    }
}

/// Type-erased view of a cell, used by its block for the tick passes.
pub(crate) trait ErasedCell {
    fn name(&self) -> &Name;

    fn value_type(&self) -> &'static str;

    /// Phase 1. Returns whether the cell will fire on this tick.
    fn detect(&self) -> bool;

    /// Phase 2. Fires the cell if it is queued.
    fn announce(&self, owner: &Block);

    /// Write the declared initial value through the normal write path.
    fn reset(&self);

    fn typed_handler_count(&self) -> usize;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Clone + 'static> ErasedCell for PropertyCell<T> {
    fn name(&self) -> &Name {
        &self.name
    }

    fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn detect(&self) -> bool {
        if !self.written.replace(false) {
            return false;
        }
        if self.queued.get() {
            cov_mark::hit!(rewrite_while_queued);
            return true;
        }
        if self.differs_from_announced() {
            self.queued.set(true);
            true
        } else {
            cov_mark::hit!(write_returned_to_baseline);
            false
        }
    }

    fn announce(&self, owner: &Block) {
        if !self.queued.get() {
            return;
        }
        let snapshot = self.value.borrow().clone();
        {
            let old = self.announced.borrow();
            let typed = self.typed.borrow().clone();
            for handler in &typed {
                handler.call(&old, &snapshot);
            }
        }
        owner.dispatch(&self.name);
        *self.announced.borrow_mut() = snapshot;
        self.queued.set(false);
    }

    fn reset(&self) {
        self.write(self.initial.clone());
    }

    fn typed_handler_count(&self) -> usize {
        self.typed.borrow().len()
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

pub(crate) fn default_comparer<T: PartialEq + 'static>() -> Comparer<T> {
    Rc::new(|a: &T, b: &T| a == b)
}

//! Flat collections of property cells and their subscriber registries.
//!
//! A [`Block`] is a cheap, clonable handle. Every clone refers to the same
//! cells and registries, which lets handlers and scoped registrations keep a
//! block around without borrowing the kind that embeds it.
//!
//! When a cell fires, listeners run in a fixed order:
//!
//! 1. typed `(old, new)` handlers on the cell
//! 2. plain handlers registered for the property name
//! 3. the name's pending one-shot handlers, which are removed as they fire
//! 4. the block's any-property-changed listeners
//!
//! Fine-grained handlers therefore always observe a change before coarse ones.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::Name;
use crate::error::{Error, Result};
use crate::handler::{ChangeHandler, PropertyChanged, ValueHandler};
use crate::hash::NameMap;
use crate::property::{ErasedCell, Property, PropertyCell, default_comparer};
use crate::scope::Registrations;

type HandlerList = SmallVec<[ChangeHandler; 2]>;

#[derive(Default)]
struct Handlers {
    plain: NameMap<HandlerList>,
    once: NameMap<HandlerList>,
    any: HandlerList,
}

struct BlockInner {
    name: Name,
    cells: RefCell<NameMap<Rc<dyn ErasedCell>>>,
    handlers: RefCell<Handlers>,
    registrations: RefCell<Registrations>,
    initialized: Cell<bool>,
}

/// Named, flat set of property cells.
#[derive(Clone)]
pub struct Block {
    inner: Rc<BlockInner>,
}

/// Non-owning reference to a block, held by forwarding handlers.
#[derive(Clone)]
pub(crate) struct WeakBlock(Weak<BlockInner>);

impl WeakBlock {
    pub(crate) fn upgrade(&self) -> Option<Block> {
        self.0.upgrade().map(|inner| Block { inner })
    }
}

/// One registry entry that still holds handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachedHandlers {
    pub registry: &'static str,
    pub property: Option<Name>,
    pub count: usize,
}

impl Block {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            inner: Rc::new(BlockInner {
                name: name.into(),
                cells: RefCell::new(NameMap::default()),
                handlers: RefCell::new(Handlers::default()),
                registrations: RefCell::new(Registrations::new()),
                initialized: Cell::new(false),
            }),
        }
    }

    pub fn name(&self) -> &Name {
        &self.inner.name
    }

    /// Whether both handles refer to the same block.
    pub fn ptr_eq(&self, other: &Block) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakBlock {
        WeakBlock(Rc::downgrade(&self.inner))
    }

    // =========================================================================
    // Declaration and reads
    // =========================================================================

    /// Declare a property compared with `PartialEq`.
    pub fn declare<T>(&self, name: &str, initial: T) -> Result<Property<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        self.declare_cell(name, initial, default_comparer())
    }

    /// Declare a property with a custom equality.
    pub fn declare_with<T, C>(&self, name: &str, initial: T, comparer: C) -> Result<Property<T>>
    where
        T: Clone + 'static,
        C: Fn(&T, &T) -> bool + 'static,
    {
        self.declare_cell(name, initial, Rc::new(comparer))
    }

    fn declare_cell<T: Clone + 'static>(
        &self,
        name: &str,
        initial: T,
        comparer: crate::property::Comparer<T>,
    ) -> Result<Property<T>> {
        let mut cells = self.inner.cells.borrow_mut();
        if cells.contains_key(name) {
            return Err(Error::DuplicateProperty {
                block: self.inner.name.to_string(),
                property: name.to_owned(),
            });
        }
        let name: Name = name.into();
        let cell = Rc::new(PropertyCell::new(
            self.inner.name.clone(),
            name.clone(),
            initial,
            comparer,
        ));
        cells.insert(name, cell.clone());
        Ok(Property::from_cell(cell))
    }

    /// Typed handle to a declared property.
    pub fn property<T: Clone + 'static>(&self, name: &str) -> Result<Property<T>> {
        let cell = self.cell(name)?;
        let actual = cell.value_type();
        cell.into_any()
            .downcast::<PropertyCell<T>>()
            .map(Property::from_cell)
            .map_err(|_| Error::TypeMismatch {
                block: self.inner.name.to_string(),
                property: name.to_owned(),
                requested: std::any::type_name::<T>(),
                actual,
            })
    }

    /// Current value of a declared property.
    pub fn get<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        self.property::<T>(name).map(|p| p.get())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.cells.borrow().contains_key(name)
    }

    /// Property names in declaration order.
    pub fn property_names(&self) -> Vec<Name> {
        self.inner.cells.borrow().keys().cloned().collect()
    }

    fn cell(&self, name: &str) -> Result<Rc<dyn ErasedCell>> {
        self.inner
            .cells
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    fn cell_at(&self, index: usize) -> Option<Rc<dyn ErasedCell>> {
        self.inner
            .cells
            .borrow()
            .get_index(index)
            .map(|(_, cell)| Rc::clone(cell))
    }

    /// Interned key for a declared property.
    fn key(&self, name: &str) -> Result<Name> {
        self.cell(name).map(|cell| cell.name().clone())
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownProperty {
            block: self.inner.name.to_string(),
            property: name.to_owned(),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add a plain handler for one property.
    pub fn subscribe(&self, property: &str, handler: &ChangeHandler) -> Result<()> {
        let key = self.key(property)?;
        self.inner
            .handlers
            .borrow_mut()
            .plain
            .entry(key)
            .or_default()
            .push(handler.clone());
        Ok(())
    }

    /// Remove a plain handler. Removing the last one frees the entry.
    pub fn unsubscribe(&self, property: &str, handler: &ChangeHandler) -> Result<()> {
        let mut handlers = self.inner.handlers.borrow_mut();
        if remove_from(&mut handlers.plain, property, handler) {
            Ok(())
        } else {
            Err(Error::HandlerNotFound {
                block: self.inner.name.to_string(),
                property: property.to_owned(),
            })
        }
    }

    /// Add a typed handler by name. The value type is checked against the cell.
    pub fn subscribe_value<T: Clone + 'static>(
        &self,
        property: &str,
        handler: &ValueHandler<T>,
    ) -> Result<()> {
        self.property::<T>(property)?.subscribe(handler);
        Ok(())
    }

    pub fn unsubscribe_value<T: Clone + 'static>(
        &self,
        property: &str,
        handler: &ValueHandler<T>,
    ) -> Result<()> {
        self.property::<T>(property)?.unsubscribe(handler)
    }

    /// Add a handler that fires on the next change of `property` only.
    pub fn subscribe_once(&self, property: &str, handler: &ChangeHandler) -> Result<()> {
        let key = self.key(property)?;
        self.inner
            .handlers
            .borrow_mut()
            .once
            .entry(key)
            .or_default()
            .push(handler.clone());
        Ok(())
    }

    /// Cancel a one-shot handler that has not fired yet.
    pub fn unsubscribe_once(&self, property: &str, handler: &ChangeHandler) -> Result<()> {
        let mut handlers = self.inner.handlers.borrow_mut();
        if remove_from(&mut handlers.once, property, handler) {
            Ok(())
        } else {
            Err(Error::OnceHandlerNotFound {
                block: self.inner.name.to_string(),
                property: property.to_owned(),
            })
        }
    }

    pub(crate) fn add_any_listener(&self, handler: &ChangeHandler) {
        self.inner.handlers.borrow_mut().any.push(handler.clone());
    }

    pub(crate) fn remove_any_listener(&self, handler: &ChangeHandler) -> Result<()> {
        let mut handlers = self.inner.handlers.borrow_mut();
        let Some(pos) = handlers.any.iter().position(|h| h.same(handler)) else {
            return Err(Error::AnyHandlerNotFound {
                block: self.inner.name.to_string(),
            });
        };
        handlers.any.remove(pos);
        Ok(())
    }

    /// Length of the any-property-changed invocation list.
    pub fn any_listener_count(&self) -> usize {
        self.inner.handlers.borrow().any.len()
    }

    /// Every handler attached to this block, across all registries.
    pub fn attached_handler_count(&self) -> usize {
        self.attached_handlers().iter().map(|a| a.count).sum()
    }

    /// Registry entries that still hold handlers, typed slots first.
    pub fn attached_handlers(&self) -> Vec<AttachedHandlers> {
        let mut attached = Vec::new();
        for (name, cell) in self.inner.cells.borrow().iter() {
            let count = cell.typed_handler_count();
            if count > 0 {
                attached.push(AttachedHandlers {
                    registry: "typed",
                    property: Some(name.clone()),
                    count,
                });
            }
        }
        let handlers = self.inner.handlers.borrow();
        for (registry, map) in [("plain", &handlers.plain), ("one-shot", &handlers.once)] {
            for (name, list) in map {
                attached.push(AttachedHandlers {
                    registry,
                    property: Some(name.clone()),
                    count: list.len(),
                });
            }
        }
        if !handlers.any.is_empty() {
            attached.push(AttachedHandlers {
                registry: "any-property-changed",
                property: None,
                count: handlers.any.len(),
            });
        }
        attached
    }

    // =========================================================================
    // Tick passes
    // =========================================================================

    /// Phase 1 over this block's own cells. Returns whether any will fire.
    pub fn detect_changes(&self) -> bool {
        let mut pending = false;
        let mut index = 0;
        while let Some(cell) = self.cell_at(index) {
            pending |= cell.detect();
            index += 1;
        }
        pending
    }

    /// Phase 2 over this block's own cells, in declaration order.
    pub fn announce_changes(&self) {
        let mut index = 0;
        while let Some(cell) = self.cell_at(index) {
            cell.announce(self);
            index += 1;
        }
    }

    /// Write every cell back to its declared initial value.
    ///
    /// Subscribers see the reset on the next tick. Repeating it is a no-op.
    pub fn reset_properties(&self) {
        let mut index = 0;
        while let Some(cell) = self.cell_at(index) {
            cell.reset();
            index += 1;
        }
    }

    /// Route an announced property to the per-name, one-shot and any registries.
    pub(crate) fn dispatch(&self, property: &Name) {
        let event = PropertyChanged::new(self.inner.name.clone(), property.clone());

        let plain = self.inner.handlers.borrow().plain.get(property).cloned();
        for handler in plain.iter().flatten() {
            handler.call(&event);
        }

        // Taken out before firing so a handler may re-arm itself for the next change.
        let once = self.inner.handlers.borrow_mut().once.swap_remove(property);
        for handler in once.iter().flatten() {
            handler.call(&event);
        }

        self.raise_any(&event);
    }

    pub(crate) fn raise_any(&self, event: &PropertyChanged) {
        let any = self.inner.handlers.borrow().any.clone();
        for handler in &any {
            handler.call(event);
        }
    }

    // =========================================================================
    // Lifecycle state
    // =========================================================================

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.get()
    }

    pub(crate) fn set_initialized(&self, initialized: bool) {
        self.inner.initialized.set(initialized);
    }

    /// Move the scoped registrations out so wiring can run without holding a borrow.
    pub(crate) fn take_registrations(&self) -> Registrations {
        std::mem::take(&mut *self.inner.registrations.borrow_mut())
    }

    pub(crate) fn restore_registrations(&self, scope: Registrations) {
        self.inner.registrations.borrow_mut().absorb(scope);
    }

    pub(crate) fn release_registrations(&self) {
        let mut scope = self.take_registrations();
        scope.release_all();
    }

    pub fn registration_count(&self) -> usize {
        self.inner.registrations.borrow().len()
    }
}

fn remove_from(map: &mut NameMap<HandlerList>, property: &str, handler: &ChangeHandler) -> bool {
    let Some(list) = map.get_mut(property) else {
        return false;
    };
    let Some(pos) = list.iter().position(|h| h.same(handler)) else {
        return false;
    };
    list.remove(pos);
    if list.is_empty() {
        map.swap_remove(property);
    }
    true
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.inner.name)
            .field("properties", &self.property_names())
            .field("initialized", &self.inner.initialized.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(block: &Block) -> bool {
        let changed = block.detect_changes();
        block.announce_changes();
        changed
    }

    fn recorder() -> (ChangeHandler, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let handler = ChangeHandler::new(move |e| {
            sink.borrow_mut().push(format!("{}.{}", e.block, e.property));
        });
        (handler, log)
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        let err = block.declare("Credits", 1u64).unwrap_err();
        assert!(matches!(err, Error::DuplicateProperty { .. }));
    }

    #[test]
    fn typed_lookup_checks_value_type() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        assert!(block.property::<u64>("Credits").is_ok());
        let err = block.property::<String>("Credits").unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch { requested, actual, .. }
                if requested.contains("String") && actual == "u64"
        ));
        let handler = ValueHandler::<i32>::new(|_, _| {});
        assert!(matches!(
            block.subscribe_value("Credits", &handler),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn subscribing_to_undeclared_property_fails() {
        let block = Block::new("Meters");
        let (handler, _) = recorder();
        assert!(matches!(
            block.subscribe("Missing", &handler),
            Err(Error::UnknownProperty { .. })
        ));
    }

    #[test]
    fn listener_categories_fire_in_contract_order() {
        let block = Block::new("Meters");
        let credits = block.declare("Credits", 0u64).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        let any = ChangeHandler::new(move |_| o.borrow_mut().push("any"));
        let o = order.clone();
        let once = ChangeHandler::new(move |_| o.borrow_mut().push("once"));
        let o = order.clone();
        let plain = ChangeHandler::new(move |_| o.borrow_mut().push("plain"));
        let o = order.clone();
        let typed = ValueHandler::<u64>::new(move |_, _| o.borrow_mut().push("typed"));

        // Registered in reverse to show the order is not registration order.
        block.add_any_listener(&any);
        block.subscribe_once("Credits", &once).unwrap();
        block.subscribe("Credits", &plain).unwrap();
        credits.subscribe(&typed);

        credits.set(10);
        tick(&block);
        assert_eq!(*order.borrow(), ["typed", "plain", "once", "any"]);

        order.borrow_mut().clear();
        credits.set(20);
        tick(&block);
        assert_eq!(*order.borrow(), ["typed", "plain", "any"]);
    }

    #[test]
    fn cells_announce_in_declaration_order() {
        let block = Block::new("Game");
        let b = block.declare("B", 0).unwrap();
        let a = block.declare("A", 0).unwrap();
        let (handler, log) = recorder();
        block.add_any_listener(&handler);
        a.set(1);
        b.set(1);
        tick(&block);
        assert_eq!(*log.borrow(), ["Game.B", "Game.A"]);
    }

    #[test]
    fn unsubscribing_last_handler_frees_entry() {
        let block = Block::new("Meters");
        block.declare("Credits", 0u64).unwrap();
        let (first, _) = recorder();
        let (second, _) = recorder();
        block.subscribe("Credits", &first).unwrap();
        block.subscribe("Credits", &second).unwrap();
        assert_eq!(block.attached_handler_count(), 2);
        block.unsubscribe("Credits", &first).unwrap();
        block.unsubscribe("Credits", &second).unwrap();
        assert!(block.attached_handlers().is_empty());
        assert!(matches!(
            block.unsubscribe("Credits", &first),
            Err(Error::HandlerNotFound { .. })
        ));
    }

    #[test]
    fn one_shot_can_be_cancelled() {
        let block = Block::new("Meters");
        let credits = block.declare("Credits", 0u64).unwrap();
        let (handler, log) = recorder();
        block.subscribe_once("Credits", &handler).unwrap();
        block.unsubscribe_once("Credits", &handler).unwrap();
        credits.set(1);
        tick(&block);
        assert!(log.borrow().is_empty());
        assert!(matches!(
            block.unsubscribe_once("Credits", &handler),
            Err(Error::OnceHandlerNotFound { .. })
        ));
    }

    #[test]
    fn one_shot_may_rearm_from_its_own_callback() {
        let block = Block::new("Meters");
        let credits = block.declare("Credits", 0u64).unwrap();
        let fired = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<ChangeHandler>>> = Rc::new(RefCell::new(None));

        let weak_block = block.downgrade();
        let f = fired.clone();
        let s = slot.clone();
        let handler = ChangeHandler::new(move |_| {
            f.set(f.get() + 1);
            if let (Some(block), Some(me)) = (weak_block.upgrade(), s.borrow().clone()) {
                block.subscribe_once("Credits", &me).unwrap();
            }
        });
        *slot.borrow_mut() = Some(handler.clone());
        block.subscribe_once("Credits", &handler).unwrap();

        credits.set(1);
        tick(&block);
        credits.set(2);
        tick(&block);
        assert_eq!(fired.get(), 2);
        slot.borrow_mut().take();
    }

    #[test]
    fn handler_write_is_deferred_to_next_tick() {
        let block = Block::new("Meters");
        let credits = block.declare("Credits", 0u64).unwrap();
        let win = block.declare("Win", 0u64).unwrap();
        let (handler, log) = recorder();
        block.subscribe("Win", &handler).unwrap();

        let w = win.clone();
        let bump = ValueHandler::<u64>::new(move |_, new| w.set(*new * 2));
        credits.subscribe(&bump);

        credits.set(5);
        assert!(tick(&block));
        // Win was written during phase 2 but detect already ran for this tick.
        assert!(log.borrow().is_empty());
        assert!(win.is_dirty());

        assert!(tick(&block));
        assert_eq!(*log.borrow(), ["Meters.Win"]);
        assert_eq!(win.get(), 10);
    }

    #[test]
    fn reset_restores_declared_values_and_is_idempotent() {
        let block = Block::new("Meters");
        let credits = block.declare("Credits", 100u64).unwrap();
        credits.set(40);
        tick(&block);
        block.reset_properties();
        block.reset_properties();
        assert_eq!(credits.get(), 100);
        assert!(tick(&block));
        block.reset_properties();
        assert!(!tick(&block));
    }
}

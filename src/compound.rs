//! Blocks that contain other blocks.
//!
//! A compound forwards lifecycle and tick passes to its children in attach
//! order, and offers an any-property-changed point that covers the whole
//! subtree. Fan-in from the children is only wired while somebody listens:
//! the first external listener attaches one forwarding handler to every
//! child, the last one to leave removes it again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::Name;
use crate::block::Block;
use crate::error::{Error, Result};
use crate::handler::{ChangeHandler, PropertyChanged};
use crate::node::{ResetScope, StatusBlock};

/// Child container embedded by compound kinds.
pub struct Compound {
    block: Block,
    children: RefCell<Vec<Rc<dyn StatusBlock>>>,
    listeners: Cell<usize>,
    forwarding: Cell<bool>,
    forwarder: ChangeHandler,
}

impl Compound {
    pub fn new(name: impl Into<Name>) -> Self {
        let block = Block::new(name);
        let owner = block.downgrade();
        // Re-raise a child's change on this compound, qualified by the child's name.
        let forwarder = ChangeHandler::new(move |event: &PropertyChanged| {
            if let Some(owner) = owner.upgrade() {
                let path: Name = format!("{}.{}", event.block, event.property).into();
                owner.raise_any(&PropertyChanged::new(owner.name().clone(), path));
            }
        });
        Self {
            block,
            children: RefCell::new(Vec::new()),
            listeners: Cell::new(0),
            forwarding: Cell::new(false),
            forwarder,
        }
    }

    /// The compound's own properties.
    pub fn block(&self) -> &Block {
        &self.block
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// Snapshot of the children in attach order.
    pub fn children(&self) -> Vec<Rc<dyn StatusBlock>> {
        self.children.borrow().clone()
    }

    pub fn child(&self, index: usize) -> Option<Rc<dyn StatusBlock>> {
        self.children.borrow().get(index).cloned()
    }

    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    /// First direct child with the given block name.
    pub fn child_named(&self, name: &str) -> Option<Rc<dyn StatusBlock>> {
        self.children
            .borrow()
            .iter()
            .find(|child| child.name() == name)
            .cloned()
    }

    /// Add a child at the end.
    ///
    /// The child is initialized if this compound already is, joins the
    /// forwarding fan-in if anyone is listening, and is reset last.
    pub fn attach(&self, child: Rc<dyn StatusBlock>) -> Result<()> {
        if self.block.is_initialized() {
            child.initialize()?;
        }
        if self.forwarding.get() {
            child.subscribe_any(&self.forwarder);
        }
        self.children.borrow_mut().push(Rc::clone(&child));
        child.reset(ResetScope::Full);
        tracing::debug!(compound = %self.block.name(), child = %child.name(), "attached status block");
        Ok(())
    }

    /// Remove a child, undoing what [`attach`](Self::attach) did.
    ///
    /// A forwarding handler already missing from the child is logged; the
    /// child is still removed and torn down.
    pub fn detach(&self, child: &Rc<dyn StatusBlock>) -> Result<()> {
        let removed = {
            let mut children = self.children.borrow_mut();
            let pos = children
                .iter()
                .position(|c| same_node(c, child))
                .ok_or_else(|| Error::ChildNotFound {
                    compound: self.block.name().to_string(),
                    child: child.name().to_owned(),
                })?;
            children.remove(pos)
        };
        if self.forwarding.get() {
            if let Err(err) = removed.unsubscribe_any(&self.forwarder) {
                tracing::error!(compound = %self.block.name(), error = %err, "forwarding handler missing from child");
            }
        }
        if self.block.is_initialized() {
            removed.teardown();
        }
        tracing::debug!(compound = %self.block.name(), child = %removed.name(), "detached status block");
        Ok(())
    }

    /// Depth-first search for the first descendant of kind `K`.
    ///
    /// A miss is `None`; the caller decides whether that matters.
    pub fn find<K: StatusBlock>(&self) -> Option<Rc<K>> {
        for child in self.children() {
            if let Ok(found) = Rc::clone(&child).into_any().downcast::<K>() {
                return Some(found);
            }
            if let Some(found) = child.compound().and_then(Compound::find::<K>) {
                return Some(found);
            }
        }
        None
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Resolve `["Child", "Grandchild", "Property"]` to the block owning the
    /// property and the property name. A single segment names one of this
    /// compound's own properties.
    pub fn resolve_path(&self, path: &[&str]) -> Result<(Block, String)> {
        let Some((property, segments)) = path.split_last() else {
            return Err(Error::UnresolvedPath {
                compound: self.block.name().to_string(),
                path: String::new(),
                segment: String::new(),
            });
        };
        let mut node: Option<Rc<dyn StatusBlock>> = None;
        for segment in segments {
            let next = match &node {
                None => self.child_named(segment),
                Some(parent) => parent.compound().and_then(|c| c.child_named(segment)),
            };
            let Some(next) = next else {
                let searched = node
                    .as_ref()
                    .map_or_else(|| self.block.name().to_string(), |n| n.name().to_owned());
                return Err(Error::UnresolvedPath {
                    compound: searched,
                    path: path.join("."),
                    segment: (*segment).to_owned(),
                });
            };
            node = Some(next);
        }
        let block = node.map_or_else(|| self.block.clone(), |n| n.block().clone());
        Ok((block, (*property).to_owned()))
    }

    /// Plain handler on the property a path resolves to.
    pub fn subscribe_path(&self, path: &[&str], handler: &ChangeHandler) -> Result<()> {
        let (block, property) = self.resolve_path(path)?;
        block.subscribe(&property, handler)
    }

    pub fn unsubscribe_path(&self, path: &[&str], handler: &ChangeHandler) -> Result<()> {
        let (block, property) = self.resolve_path(path)?;
        block.unsubscribe(&property, handler)
    }

    /// [`subscribe_path`](Self::subscribe_path) with a dotted string, `"Reels.Spinning"`.
    pub fn subscribe_dotted(&self, path: &str, handler: &ChangeHandler) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        self.subscribe_path(&segments, handler)
    }

    pub fn unsubscribe_dotted(&self, path: &str, handler: &ChangeHandler) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        self.unsubscribe_path(&segments, handler)
    }

    // =========================================================================
    // Reference-counted fan-in
    // =========================================================================

    /// External listeners on this compound's any-property-changed point.
    pub fn listener_count(&self) -> usize {
        self.listeners.get()
    }

    /// Whether the forwarding handler is attached to the children.
    pub fn is_forwarding(&self) -> bool {
        self.forwarding.get()
    }

    pub(crate) fn add_listener(&self, handler: &ChangeHandler) {
        self.block.add_any_listener(handler);
        self.listeners.set(self.listeners.get() + 1);
        if !self.forwarding.get() {
            cov_mark::hit!(fan_in_attached);
            self.attach_forwarding();
        }
    }

    pub(crate) fn remove_listener(&self, handler: &ChangeHandler) -> Result<()> {
        self.block.remove_any_listener(handler)?;
        let remaining = self.listeners.get().saturating_sub(1);
        self.listeners.set(remaining);
        if remaining == 0 && self.forwarding.get() {
            cov_mark::hit!(fan_in_detached);
            self.detach_forwarding();
        }
        Ok(())
    }

    fn attach_forwarding(&self) {
        for child in self.children() {
            child.subscribe_any(&self.forwarder);
        }
        self.forwarding.set(true);
    }

    fn detach_forwarding(&self) {
        for child in self.children() {
            if let Err(err) = child.unsubscribe_any(&self.forwarder) {
                tracing::error!(compound = %self.block.name(), error = %err, "forwarding handler missing from child");
            }
        }
        self.forwarding.set(false);
    }

    // =========================================================================
    // Lifecycle helpers used by StatusBlock's provided methods
    // =========================================================================

    pub(crate) fn initialize_children(&self) -> Result<()> {
        if self.listeners.get() > 0 && !self.forwarding.get() {
            self.attach_forwarding();
        }
        for child in self.children() {
            child.initialize()?;
        }
        Ok(())
    }

    /// Drop the fan-in and release every child's wiring.
    ///
    /// External listeners stay counted so the leak report can name them.
    pub(crate) fn release_children(&self) {
        if self.forwarding.get() {
            self.detach_forwarding();
        }
        for child in self.children() {
            child.release_wiring();
        }
    }
}

fn same_node(a: &Rc<dyn StatusBlock>, b: &Rc<dyn StatusBlock>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl fmt::Debug for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .children
            .borrow()
            .iter()
            .map(|c| c.name().to_owned())
            .collect();
        f.debug_struct("Compound")
            .field("name", self.block.name())
            .field("children", &names)
            .field("listeners", &self.listeners.get())
            .field("forwarding", &self.forwarding.get())
            .finish()
    }
}

impl StatusBlock for Compound {
    fn block(&self) -> &Block {
        &self.block
    }

    fn compound(&self) -> Option<&Compound> {
        Some(self)
    }
}

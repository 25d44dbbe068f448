//! Batch subscriptions: one handler over many `(block, property)` pairs.
//!
//! Each watched pair gets a small accumulator registered as a plain handler.
//! During the announce pass the accumulators only record which pairs fired.
//! Once the whole tree has announced, the root drains the registry and each
//! subscription with something recorded fires exactly once with the lot.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use slab::Slab;
use smallvec::SmallVec;

use crate::Name;
use crate::block::Block;
use crate::error::{Error, Result};
use crate::handler::{BatchHandler, ChangeHandler};

/// A watched `(block, property)` pair.
#[derive(Clone)]
pub struct Watch {
    block: Block,
    property: Name,
}

impl Watch {
    pub fn new(block: &Block, property: &str) -> Self {
        Self {
            block: block.clone(),
            property: property.into(),
        }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn property(&self) -> &Name {
        &self.property
    }
}

impl PartialEq for Watch {
    fn eq(&self, other: &Self) -> bool {
        self.block.ptr_eq(&other.block) && self.property == other.property
    }
}

impl Eq for Watch {}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.block.name(), self.property)
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watch({self})")
    }
}

/// Key of a registered batch subscription.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct BatchId(usize);

impl BatchId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct BatchSubscription {
    watches: Vec<Watch>,
    handler: BatchHandler,
    accumulators: Vec<ChangeHandler>,
    /// Indices into `watches` that fired this tick, in firing order.
    fired: Rc<RefCell<SmallVec<[usize; 4]>>>,
}

impl BatchSubscription {
    fn detach(&self) {
        for (watch, accumulator) in self.watches.iter().zip(&self.accumulators) {
            if let Err(err) = watch.block.unsubscribe(&watch.property, accumulator) {
                tracing::error!(pair = %watch, error = %err, "batch accumulator already removed");
            }
        }
    }
}

/// Registry of batch subscriptions, drained once per tick by the root.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct BatchRegistry {
    subscriptions: Rc<RefCell<Slab<BatchSubscription>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch every pair in `watches` with one handler.
    ///
    /// The same handler over the same ordered list is rejected and logged.
    /// Every pair must name a declared property; on failure nothing stays attached.
    pub fn register(&self, watches: Vec<Watch>, handler: &BatchHandler) -> Result<BatchId> {
        if self.position(&watches, handler).is_some() {
            let err = Error::DuplicateBatch {
                pairs: describe(&watches),
            };
            tracing::error!(error = %err, "rejected batch subscription");
            return Err(err);
        }

        let fired = Rc::new(RefCell::new(SmallVec::new()));
        let mut accumulators: Vec<ChangeHandler> = Vec::with_capacity(watches.len());
        for (index, watch) in watches.iter().enumerate() {
            let sink = Rc::clone(&fired);
            let accumulator = ChangeHandler::new(move |_| sink.borrow_mut().push(index));
            if let Err(err) = watch.block.subscribe(&watch.property, &accumulator) {
                for (attached, acc) in watches.iter().zip(&accumulators) {
                    if let Err(err) = attached.block.unsubscribe(&attached.property, acc) {
                        tracing::error!(pair = %attached, error = %err, "batch accumulator rollback failed");
                    }
                }
                return Err(err);
            }
            accumulators.push(accumulator);
        }

        let key = self.subscriptions.borrow_mut().insert(BatchSubscription {
            watches,
            handler: handler.clone(),
            accumulators,
            fired,
        });
        Ok(BatchId(key))
    }

    /// Remove the subscription matching `handler` and the exact ordered list.
    ///
    /// A miss is logged and returned as an error.
    pub fn unregister(&self, watches: &[Watch], handler: &BatchHandler) -> Result<()> {
        let Some(key) = self.position(watches, handler) else {
            let err = Error::BatchNotFound {
                pairs: describe(watches),
            };
            tracing::error!(error = %err, "cannot remove batch subscription");
            return Err(err);
        };
        let subscription = self.subscriptions.borrow_mut().remove(key);
        subscription.detach();
        Ok(())
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.borrow().is_empty()
    }

    fn position(&self, watches: &[Watch], handler: &BatchHandler) -> Option<usize> {
        self.subscriptions
            .borrow()
            .iter()
            .find(|(_, sub)| sub.handler.same(handler) && sub.watches == watches)
            .map(|(key, _)| key)
    }

    /// Fire every subscription that recorded changes this tick, then clear them.
    ///
    /// Returns the number of handlers invoked.
    pub(crate) fn deliver(&self) -> usize {
        let ready: Vec<(BatchHandler, Vec<Watch>)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter_map(|(_, sub)| {
                let fired = std::mem::take(&mut *sub.fired.borrow_mut());
                if fired.is_empty() {
                    return None;
                }
                let changed: Vec<Watch> = fired.iter().map(|&i| sub.watches[i].clone()).collect();
                Some((sub.handler.clone(), changed))
            })
            .collect();
        for (handler, changed) in &ready {
            handler.call(changed);
        }
        ready.len()
    }
}

impl fmt::Debug for BatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

fn describe(watches: &[Watch]) -> String {
    watches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

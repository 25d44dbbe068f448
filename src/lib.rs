//! Dirty-tracked status properties with a once-per-frame notification tick.
//!
//! Game logic writes named, typed property cells freely during a frame. The
//! presentation layer subscribes to those properties. Once per frame the root
//! runs a two-phase tick: every block first detects which cells really changed
//! against what was last announced, then every block announces. Handlers see a
//! single coalesced notification per property per tick, and writes that return
//! to the previously announced value produce none at all.
//!
//! # Quick Start
//!
//! ```ignore
//! use reel_status::{Block, ChangeHandler, StatusRoot};
//! use std::rc::Rc;
//!
//! let meters = Rc::new(Block::new("Meters"));
//! let credits = meters.declare("Credits", 0u64)?;
//!
//! let root = StatusRoot::new("Status");
//! root.attach(meters.clone())?;
//! root.initialize()?;
//!
//! let redraw = ChangeHandler::new(|e| println!("{}.{} changed", e.block, e.property));
//! meters.subscribe("Credits", &redraw)?;
//!
//! credits.set(250);
//! credits.set(500);
//! root.apply_and_notify()?;   // handler fires once
//! ```
//!
//! # Core Types
//!
//! - [`Block`] - A named set of declared properties and their subscribers.
//! - [`Property<T>`] - Typed handle to one cell. Writes are cheap and never notify directly.
//! - [`Compound`] - A block with children, forwarding the tick and lifecycle to them.
//! - [`StatusBlock`] - Trait implemented by every status kind; hooks for wiring and reset.
//! - [`StatusRoot`] - Owns the tree and the [`BatchRegistry`], drives the tick.
//! - [`Registrations`] - Subscriptions made while wiring, released at teardown.
//!
//! # Subscriptions
//!
//! ```ignore
//! meters.subscribe("Credits", &handler)?;          // every change
//! meters.subscribe_once("Credits", &handler)?;     // next change only
//! credits.subscribe(&ValueHandler::new(|old, new| { ... }));
//! game.subscribe_any(&handler);                    // whole subtree, path-qualified names
//! root.batches().register(watches, &batch)?;       // once per tick over many pairs
//! ```
//!
//! Within one announcement typed handlers run first, then plain, then
//! one-shot, then any-property-changed listeners.

mod batch;
mod block;
mod compound;
mod error;
mod handler;
mod hash;
mod leak;
mod node;
mod property;
mod root;
mod scope;

use std::rc::Rc;

/// Block and property names. Cheap to clone into events.
pub type Name = Rc<str>;

pub use batch::{BatchId, BatchRegistry, Watch};
pub use block::{AttachedHandlers, Block};
pub use compound::Compound;
pub use error::{Error, Result};
pub use handler::{BatchHandler, Callback, ChangeHandler, PropertyChanged, ValueHandler};
pub use leak::{LeakCheckGuard, is_enabled as leak_check_enabled};
pub use node::{AsAny, ResetScope, StatusBlock};
pub use property::{Comparer, Property, PropertyCell};
pub use root::{Config, StatusRoot};
pub use scope::Registrations;

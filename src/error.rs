//! Misuse errors reported by blocks, compounds and the root driver.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors caused by calling the status engine incorrectly.
///
/// None of these are transient: each one points at a wiring bug in the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A block declared the same property name twice.
    #[error("property '{property}' is already declared on block '{block}'")]
    DuplicateProperty { block: String, property: String },

    /// A property name was used that the block never declared.
    #[error("block '{block}' has no property named '{property}'")]
    UnknownProperty { block: String, property: String },

    /// A typed access asked for a different value type than the cell holds.
    #[error("property '{block}.{property}' holds `{actual}`, not `{requested}`")]
    TypeMismatch {
        block: String,
        property: String,
        requested: &'static str,
        actual: &'static str,
    },

    /// Removing a per-name handler that was never added.
    #[error("handler is not subscribed to '{block}.{property}'")]
    HandlerNotFound { block: String, property: String },

    /// Removing an any-property-changed handler that was never added.
    #[error("handler is not subscribed to any-property-changed on '{block}'")]
    AnyHandlerNotFound { block: String },

    /// Cancelling a one-shot handler that is not pending.
    #[error("no pending one-shot handler for '{block}.{property}'")]
    OnceHandlerNotFound { block: String, property: String },

    /// A path segment did not name a child of the compound being searched.
    #[error("cannot resolve '{segment}' in path '{path}': '{compound}' has no such child")]
    UnresolvedPath {
        compound: String,
        path: String,
        segment: String,
    },

    /// The identical handler was registered over the identical pair list twice.
    #[error("batch subscription over [{pairs}] is already registered with this handler")]
    DuplicateBatch { pairs: String },

    /// A batch subscription could not be matched for removal.
    #[error("no batch subscription over [{pairs}] is registered with this handler")]
    BatchNotFound { pairs: String },

    /// The root driver was asked for a block kind that is not in the tree.
    #[error("no block of kind `{kind}` is attached under '{root}'")]
    BlockNotFound { root: String, kind: &'static str },

    /// Detaching a block that is not a child of the compound.
    #[error("'{child}' is not a child of '{compound}'")]
    ChildNotFound { compound: String, child: String },

    /// `apply_and_notify` was re-entered from inside a handler.
    #[error("a status tick is already in progress on '{root}'")]
    NestedTick { root: String },
}

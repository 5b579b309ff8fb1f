//! Incremental registry of polymorphic operations.
//!
//! # Purpose
//!
//! An operation is a family of behaviors keyed by signature. Each behavior declares the other
//! operations (or specific overloads) it needs and a factory that builds its implementation
//! once those are resolved. The registry compiles every operation into one dispatcher on first
//! use and recompiles it only after something it depends on changed.
//!
//! # Mental Model
//!
//! 1. **Install:** [`Registry::install`] validates a whole [`Package`] of types, templates and
//!    behaviors before mutating anything, then marks every operation whose table could change as
//!    stale.
//! 2. **Compile:** [`Registry::function`] rebuilds a stale operation: generic behaviors are
//!    expanded over the template instantiations they were asked for, dependencies are resolved,
//!    and the table is frozen into a [`Dispatcher`].
//! 3. **Generic calls:** a generic signature with no matching expansion is served by a catch-all
//!    entry that infers the argument types, instantiates the template, expands the operation,
//!    and calls the new entry.
//!
//! # Invariants
//!
//! - Redefinition is an error; installing the identical definition again is a no-op.
//! - A fresh dispatcher reflects every install made before it was compiled.
//! - Template nesting never grows past the deepest type observed at a call site.
//! - A compiled table holds itself only weakly; dropping the registry and every
//!   [`Dispatcher`] handle frees it.

mod behavior;
mod compile;
mod config;
mod error;
mod names;
mod operation;
mod package;
mod registry;
mod resolve;
mod returns;
mod template;
mod types;

pub use behavior::{Behavior, Deps, Implementation};
pub use config::RegistryConfig;
pub use error::{ErrorKind, RegistryError};
pub use package::Package;
pub use polyop_dispatch::{ANY, Convert, Signature, Tagged, TypeName, TypeTest, Value};
pub use registry::Registry;
pub use returns::ReturnType;
pub use template::{ConvertFactory, Infer, InferFn, TemplateSpec, TestFactory};
pub use types::TypeSpec;

/// Implementation callable as stored in compiled dispatchers.
pub type Callable = polyop_dispatch::Callable<RegistryError>;

/// A compiled operation.
pub type Dispatcher = polyop_dispatch::Dispatcher<RegistryError>;

#[cfg(test)]
mod test_fixtures;

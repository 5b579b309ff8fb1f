//! Multi-argument dispatch over runtime value types.
//!
//! # Purpose
//!
//! This crate is the single-table dispatch primitive the operation registry builds on. It
//! knows nothing about operations, templates or dependencies: it only turns one table of
//! `{signature -> callable}` into one callable that picks an entry by the runtime types of
//! its arguments.
//!
//! # Mental Model
//!
//! 1. **Universe:** [`TypeUniverse`] holds named type predicates in priority order (the
//!    universal fallback [`ANY`] always last) plus the conversions between them.
//! 2. **Compilation:** [`TypeUniverse::compile`] freezes the tests and conversions every
//!    parameter needs into a [`Dispatcher`]. Later changes to the universe do not leak into
//!    dispatchers compiled earlier.
//! 3. **Call:** [`Dispatcher::call`] tries every entry with exact type tests first, then again
//!    allowing one conversion per argument. Variadic tails arrive packed as one
//!    [`Value::Seq`].
//! 4. **Self reference:** [`ForwardRef`] lets a table entry call the dispatcher that will only
//!    exist once the table is compiled.
//!
//! # Invariants
//!
//! - Entries are ordered by the priority of their parameter types, so a subtype entry is
//!   always tried before an entry on its supertype.
//! - A dispatcher never mutates the universe it was compiled from.

mod dispatcher;
mod error;
mod signature;
mod universe;
mod value;

pub use dispatcher::{Callable, Dispatcher, ForwardRef};
pub use error::DispatchError;
pub use signature::{Signature, TypeName, split_top_level};
pub use universe::{ANY, Convert, TypeTest, TypeUniverse};
pub use value::{Tagged, Value};

#[cfg(test)]
mod tests;

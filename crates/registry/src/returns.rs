//! Return-type annotations.

use std::fmt;
use std::rc::Rc;

use polyop_dispatch::{ANY, Signature, TypeName};

use crate::Registry;

/// Return type of an implementation: fixed, or computed from the matched signature.
#[derive(Clone)]
pub enum ReturnType {
	Fixed(TypeName),
	Computed(Rc<dyn Fn(&Signature, &Registry) -> TypeName>),
}

impl ReturnType {
	pub fn evaluate(&self, signature: &Signature, registry: &Registry) -> TypeName {
		match self {
			Self::Fixed(name) => name.clone(),
			Self::Computed(f) => f(signature, registry),
		}
	}
}

impl fmt::Debug for ReturnType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
			Self::Computed(_) => f.write_str("Computed(..)"),
		}
	}
}

/// Evaluates an optional annotation; unannotated implementations return [`ANY`].
pub(crate) fn evaluate(
	returns: Option<&ReturnType>,
	signature: &Signature,
	registry: &Registry,
) -> TypeName {
	returns.map_or_else(
		|| TypeName::from(ANY),
		|r| r.evaluate(signature, registry),
	)
}

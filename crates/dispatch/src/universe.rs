//! Ordered type predicates and conversions.
//!
//! # Role
//!
//! The universe is the only mutable part of this crate. It decides the priority in which
//! types are tested and which conversions exist; [`TypeUniverse::compile`] snapshots both
//! into a [`Dispatcher`].
//!
//! # Invariants
//!
//! - [`ANY`] is always present and always last.
//! - A type added with a `before` hint sits strictly before that type.

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::dispatcher::{Callable, Dispatcher, Entry, ParamMatcher};
use crate::{DispatchError, Signature, TypeName, Value};

/// Name of the universal fallback type; its test accepts every value.
pub const ANY: &str = "any";

/// Membership predicate of a type.
pub type TypeTest = Rc<dyn Fn(&Value) -> bool>;

/// Conversion of a value into another type.
pub type Convert = Rc<dyn Fn(&Value) -> Value>;

pub(crate) struct TypeEntry {
	pub(crate) name: TypeName,
	pub(crate) test: TypeTest,
}

#[derive(Clone)]
struct Conversion {
	from: TypeName,
	to: TypeName,
	convert: Convert,
}

/// Named type predicates in dispatch priority order, plus conversions.
pub struct TypeUniverse {
	order: Vec<Rc<TypeEntry>>,
	conversions: Vec<Conversion>,
}

impl Default for TypeUniverse {
	fn default() -> Self {
		Self::new()
	}
}

impl TypeUniverse {
	/// Creates a universe holding only [`ANY`].
	pub fn new() -> Self {
		let any: TypeTest = Rc::new(|_| true);
		Self {
			order: vec![Rc::new(TypeEntry {
				name: TypeName::from(ANY),
				test: any,
			})],
			conversions: Vec::new(),
		}
	}

	/// Adds a type, placing it strictly before `before` when given, else just before [`ANY`].
	pub fn add_type(
		&mut self,
		name: &str,
		test: TypeTest,
		before: Option<&str>,
	) -> Result<(), DispatchError> {
		if self.contains(name) {
			return Err(DispatchError::DuplicateType {
				name: name.to_string(),
			});
		}
		let at = match before {
			Some(b) => self.position(b).ok_or_else(|| DispatchError::UnknownType {
				name: b.to_string(),
			})?,
			None => self.order.len() - 1,
		};
		self.order.insert(
			at,
			Rc::new(TypeEntry {
				name: TypeName::from(name),
				test,
			}),
		);
		Ok(())
	}

	/// Adds a conversion. Returns `false` if one already exists for the pair.
	pub fn add_conversion(
		&mut self,
		from: &str,
		to: &str,
		convert: Convert,
	) -> Result<bool, DispatchError> {
		for name in [from, to] {
			if !self.contains(name) {
				return Err(DispatchError::UnknownType {
					name: name.to_string(),
				});
			}
		}
		if self.has_conversion(from, to) {
			return Ok(false);
		}
		self.conversions.push(Conversion {
			from: TypeName::from(from),
			to: TypeName::from(to),
			convert,
		});
		Ok(true)
	}

	/// Returns true if the type is known.
	pub fn contains(&self, name: &str) -> bool {
		self.position(name).is_some()
	}

	/// Returns the priority slot of a type; lower is tried first.
	pub fn position(&self, name: &str) -> Option<usize> {
		self.order.iter().position(|t| &*t.name == name)
	}

	/// Returns the test registered for a type.
	pub fn test(&self, name: &str) -> Option<TypeTest> {
		self.order
			.iter()
			.find(|t| &*t.name == name)
			.map(|t| t.test.clone())
	}

	/// Returns type names in priority order, [`ANY`] last.
	pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
		self.order.iter().map(|t| &*t.name)
	}

	/// Returns the first type in priority order whose test accepts `value`.
	pub fn type_of(&self, value: &Value) -> &str {
		self.order
			.iter()
			.find(|t| (t.test)(value))
			.map_or(ANY, |t| &*t.name)
	}

	/// Returns true if a direct conversion is registered.
	pub fn has_conversion(&self, from: &str, to: &str) -> bool {
		self.conversion(from, to).is_some()
	}

	/// Returns the direct conversion between two types, if registered.
	pub fn conversion(&self, from: &str, to: &str) -> Option<Convert> {
		self.conversions
			.iter()
			.find(|c| &*c.from == from && &*c.to == to)
			.map(|c| c.convert.clone())
	}

	/// Converts `value` into `to` with the first applicable conversion.
	///
	/// Values already accepted by `to` are returned unchanged.
	pub fn convert_to(&self, value: &Value, to: &str) -> Option<Value> {
		let test = self.test(to)?;
		if test(value) {
			return Some(value.clone());
		}
		self.conversions_into(to)
			.into_iter()
			.find(|(from_test, _)| from_test(value))
			.map(|(_, convert)| convert(value))
	}

	/// Conversions into `to`, ordered by the priority of their source type.
	fn conversions_into(&self, to: &str) -> Vec<(TypeTest, Convert)> {
		let mut found: Vec<(usize, TypeTest, Convert)> = self
			.conversions
			.iter()
			.filter(|c| &*c.to == to)
			.filter_map(|c| {
				let slot = self.position(&c.from)?;
				Some((slot, self.order[slot].test.clone(), c.convert.clone()))
			})
			.collect();
		found.sort_by_key(|(slot, _, _)| *slot);
		found.into_iter().map(|(_, t, c)| (t, c)).collect()
	}

	/// Freezes a signature table into a dispatcher.
	pub fn compile<E>(
		&self,
		name: &str,
		table: impl IntoIterator<Item = (Signature, Callable<E>)>,
	) -> Result<Dispatcher<E>, DispatchError>
	where
		E: From<DispatchError> + 'static,
	{
		let mut seen = FxHashSet::default();
		let mut entries = Vec::new();
		for (signature, call) in table {
			if !seen.insert(signature.clone()) {
				return Err(DispatchError::DuplicateSignature {
					function: name.to_string(),
					signature: signature.to_string(),
				});
			}
			let params = signature
				.params()
				.iter()
				.map(|ty| self.matcher(ty))
				.collect::<Result<Vec<_>, _>>()?;
			entries.push(Entry {
				signature,
				params,
				call,
			});
		}
		entries.sort_by_cached_key(Entry::rank);
		Ok(Dispatcher::new(name, entries, self.order.iter().cloned().collect()))
	}

	fn matcher(&self, ty: &TypeName) -> Result<ParamMatcher, DispatchError> {
		let slot = self.position(ty).ok_or_else(|| DispatchError::UnknownType {
			name: ty.to_string(),
		})?;
		Ok(ParamMatcher {
			slot,
			test: self.order[slot].test.clone(),
			conversions: self.conversions_into(ty),
		})
	}
}

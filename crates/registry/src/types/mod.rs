//! Type & subtype index.
//!
//! # Role
//!
//! Owns the [`TypeUniverse`] the dispatchers are compiled against and the derived orderings the
//! compiler needs: strict subtypes of every type (most refined first) and prior types (subtypes
//! plus every type with a direct conversion into it).
//!
//! # Invariants
//!
//! - `refines` forms a forest and the supertype is installed before the subtype.
//! - A subtype sits strictly before every ancestor in the universe order.
//! - `subtypes[t]` is a subset of `prior[t]`.
//! - A conversion into a type is also registered into every ancestor, stopping at the first
//!   ancestor that already treats the source as prior.

use std::iter;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use polyop_dispatch::{ANY, Convert, TypeName, TypeTest, TypeUniverse, Value};
use rustc_hash::FxHashMap;

use crate::RegistryError;
use crate::names::SOURCE_PARAM;


/// Specification of a concrete type.
#[derive(Clone)]
pub struct TypeSpec {
	pub(crate) test: TypeTest,
	pub(crate) refines: Option<TypeName>,
	pub(crate) before: Vec<TypeName>,
	pub(crate) from: Vec<(TypeName, Convert)>,
}

impl TypeSpec {
	/// Creates a spec from the type's own membership test.
	pub fn new(test: impl Fn(&Value) -> bool + 'static) -> Self {
		Self::from_test(Rc::new(test))
	}

	pub fn from_test(test: TypeTest) -> Self {
		Self {
			test,
			refines: None,
			before: Vec::new(),
			from: Vec::new(),
		}
	}

	/// Declares the direct supertype. Its test is implied.
	pub fn refines(mut self, supertype: &str) -> Self {
		self.refines = Some(TypeName::from(supertype));
		self
	}

	/// Asks for priority over `other` if it is installed.
	pub fn before(mut self, other: &str) -> Self {
		self.before.push(TypeName::from(other));
		self
	}

	/// Declares a conversion from `source` into this type.
	pub fn convert_from(self, source: &str, convert: impl Fn(&Value) -> Value + 'static) -> Self {
		self.with_conversion(TypeName::from(source), Rc::new(convert))
	}

	pub(crate) fn with_conversion(mut self, source: TypeName, convert: Convert) -> Self {
		self.from.push((source, convert));
		self
	}

	/// Returns true if both specs share the same test, hints and conversion functions.
	pub fn same_as(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.test, &other.test)
			&& self.refines == other.refines
			&& self.before == other.before
			&& self.from.len() == other.from.len()
			&& self
				.from
				.iter()
				.zip(&other.from)
				.all(|((a, f), (b, g))| a == b && Rc::ptr_eq(f, g))
	}

	pub(crate) fn converts_from(&self, source: &str) -> Option<&Convert> {
		self.from
			.iter()
			.find(|(s, _)| &**s == source)
			.map(|(_, c)| c)
	}
}

pub(crate) struct TypeRecord {
	pub(crate) spec: TypeSpec,
	/// Own test conjoined with every ancestor's test.
	pub(crate) test: TypeTest,
	/// `(base, arg)` for template instantiations.
	pub(crate) instance: Option<(TypeName, TypeName)>,
}

pub(crate) struct TypeIndex {
	universe: TypeUniverse,
	records: IndexMap<TypeName, TypeRecord>,
	subtypes: FxHashMap<TypeName, Vec<TypeName>>,
	prior: FxHashMap<TypeName, IndexSet<TypeName>>,
}

impl TypeIndex {
	pub(crate) fn new() -> Self {
		Self {
			universe: TypeUniverse::new(),
			records: IndexMap::new(),
			subtypes: FxHashMap::default(),
			prior: FxHashMap::default(),
		}
	}

	pub(crate) fn universe(&self) -> &TypeUniverse {
		&self.universe
	}

	pub(crate) fn contains(&self, name: &str) -> bool {
		name == ANY || self.records.contains_key(name)
	}

	pub(crate) fn record(&self, name: &str) -> Option<&TypeRecord> {
		self.records.get(name)
	}

	/// Records in install order.
	pub(crate) fn records(&self) -> impl Iterator<Item = (&TypeName, &TypeRecord)> + '_ {
		self.records.iter()
	}

	/// Refinement chain above `name`, nearest first.
	pub(crate) fn supertypes_of(&self, name: &str) -> Vec<TypeName> {
		let mut chain = Vec::new();
		let mut current = self.records.get(name).and_then(|r| r.spec.refines.clone());
		while let Some(sup) = current {
			current = self.records.get(&sup).and_then(|r| r.spec.refines.clone());
			chain.push(sup);
		}
		chain
	}

	/// Strict subtypes of `name`, most refined first.
	pub(crate) fn subtypes_of(&self, name: &str) -> &[TypeName] {
		self.subtypes.get(name).map(Vec::as_slice).unwrap_or(&[])
	}

	pub(crate) fn is_subtype_of(&self, sub: &str, sup: &str) -> bool {
		if sub == sup {
			return false;
		}
		if sup == ANY {
			return self.contains(sub);
		}
		self.subtypes_of(sup).iter().any(|s| &**s == sub)
	}

	pub(crate) fn is_prior_to(&self, earlier: &str, later: &str) -> bool {
		if earlier == later {
			return false;
		}
		if later == ANY {
			return self.contains(earlier);
		}
		self.prior
			.get(later)
			.is_some_and(|set| set.contains(earlier))
	}

	/// Types prior to `name` in dispatch priority order.
	pub(crate) fn prior_types(&self, name: &str) -> Vec<TypeName> {
		let mut found: Vec<TypeName> = self
			.prior
			.get(name)
			.map(|set| set.iter().cloned().collect())
			.unwrap_or_default();
		found.sort_by_key(|t| self.universe.position(t).unwrap_or(usize::MAX));
		found
	}

	/// Least common supertype of two types, optionally via conversions; [`ANY`] if none.
	pub(crate) fn join(&self, a: &str, b: &str, allow_conversions: bool) -> TypeName {
		if a == ANY || b == ANY {
			return TypeName::from(ANY);
		}
		if a == b {
			return TypeName::from(a);
		}
		let covers = |outer: &str, inner: &str| {
			outer == inner
				|| if allow_conversions {
					self.is_prior_to(inner, outer)
				} else {
					self.is_subtype_of(inner, outer)
				}
		};
		for candidate in iter::once(TypeName::from(a)).chain(self.supertypes_of(a)) {
			if covers(&candidate, b) {
				return candidate;
			}
		}
		if allow_conversions {
			for candidate in iter::once(TypeName::from(b)).chain(self.supertypes_of(b)) {
				if covers(&candidate, a) {
					return candidate;
				}
			}
		}
		TypeName::from(ANY)
	}

	pub(crate) fn join_all<'a>(
		&self,
		types: impl IntoIterator<Item = &'a str>,
		allow_conversions: bool,
	) -> TypeName {
		let mut joined: Option<TypeName> = None;
		for ty in types {
			joined = Some(match joined {
				None => TypeName::from(ty),
				Some(acc) => self.join(&acc, ty, allow_conversions),
			});
		}
		joined.unwrap_or_else(|| TypeName::from(ANY))
	}

	/// Installs a type and returns every type whose derived orderings changed, itself included.
	///
	/// Re-installing an identical spec is a no-op returning nothing.
	pub(crate) fn install(
		&mut self,
		name: &str,
		spec: TypeSpec,
		instance: Option<(TypeName, TypeName)>,
	) -> Result<Vec<TypeName>, RegistryError> {
		if let Some(existing) = self.records.get(name) {
			if existing.spec.same_as(&spec) {
				return Ok(Vec::new());
			}
			return Err(RegistryError::TypeConflict {
				name: name.to_string(),
			});
		}
		if name == ANY {
			return Err(RegistryError::TypeConflict {
				name: name.to_string(),
			});
		}

		let ancestors: Vec<TypeName> = match &spec.refines {
			Some(sup) => {
				if !self.records.contains_key(sup) {
					return Err(RegistryError::UnknownSupertype {
						name: name.to_string(),
						supertype: sup.to_string(),
					});
				}
				iter::once(sup.clone())
					.chain(self.supertypes_of(sup))
					.collect()
			}
			None => Vec::new(),
		};
		if let Some((to, _)) = self
			.records
			.iter()
			.find(|(to, rec)| ancestors.contains(*to) && rec.spec.converts_from(name).is_some())
		{
			return Err(RegistryError::ConversionToSupertype {
				from: name.to_string(),
				to: to.to_string(),
			});
		}

		let test = match spec.refines.as_deref().and_then(|sup| self.records.get(sup)) {
			Some(sup) => {
				let (outer, own) = (sup.test.clone(), spec.test.clone());
				Rc::new(move |v: &Value| outer(v) && own(v)) as TypeTest
			}
			None => spec.test.clone(),
		};
		let before = self.placement(&spec);
		self.universe.add_type(name, test.clone(), before.as_deref())?;

		let name = TypeName::from(name);
		self.records.insert(
			name.clone(),
			TypeRecord {
				spec: spec.clone(),
				test,
				instance,
			},
		);
		self.subtypes.entry(name.clone()).or_default();
		self.prior.entry(name.clone()).or_default();

		let mut touched = IndexSet::new();
		touched.insert(name.clone());
		for sup in &ancestors {
			let list = self.subtypes.entry(sup.clone()).or_default();
			let at = list
				.iter()
				.position(|s| ancestors.contains(s))
				.unwrap_or(list.len());
			list.insert(at, name.clone());
			self.prior
				.entry(sup.clone())
				.or_default()
				.insert(name.clone());
			touched.insert(sup.clone());
		}

		// Whatever treats an ancestor as prior can take the new subtype too.
		let inherits: Vec<TypeName> = self
			.prior
			.iter()
			.filter(|(ty, set)| {
				**ty != name && !ancestors.contains(*ty) && ancestors.iter().any(|a| set.contains(a))
			})
			.map(|(ty, _)| ty.clone())
			.collect();
		for ty in inherits {
			self.prior.entry(ty.clone()).or_default().insert(name.clone());
			touched.insert(ty);
		}

		for (source, convert) in &spec.from {
			if self.records.contains_key(source) {
				touched.extend(self.add_conversion(source, &name, convert.clone())?);
			}
		}

		let outgoing: Vec<(TypeName, Convert)> = self
			.records
			.iter()
			.filter(|(to, _)| **to != name)
			.filter_map(|(to, rec)| Some((to.clone(), rec.spec.converts_from(&name)?.clone())))
			.collect();
		for (to, convert) in outgoing {
			touched.extend(self.add_conversion(&name, &to, convert)?);
		}

		tracing::debug!(ty = %name, touched = touched.len(), "installed type");
		Ok(touched.into_iter().collect())
	}

	/// Registers `source -> to` and propagates it up `to`'s refinement chain.
	pub(crate) fn add_conversion(
		&mut self,
		source: &str,
		to: &str,
		convert: Convert,
	) -> Result<Vec<TypeName>, RegistryError> {
		let mut touched = Vec::new();
		let chain: Vec<TypeName> = iter::once(TypeName::from(to))
			.chain(self.supertypes_of(to))
			.collect();
		let carried: Vec<TypeName> = iter::once(TypeName::from(source))
			.chain(self.subtypes_of(source).iter().cloned())
			.collect();
		for target in chain {
			if &*target == source || self.is_prior_to(source, &target) {
				break;
			}
			self.universe
				.add_conversion(source, &target, convert.clone())?;
			let set = self.prior.entry(target.clone()).or_default();
			set.extend(carried.iter().filter(|c| **c != target).cloned());
			touched.push(target);
		}
		Ok(touched)
	}

	fn placement(&self, spec: &TypeSpec) -> Option<TypeName> {
		let mut hinted = spec
			.before
			.iter()
			.filter(|b| self.records.contains_key(*b));
		match &spec.refines {
			Some(sup) => iter::once(sup)
				.chain(hinted)
				.min_by_key(|n| self.universe.position(n).unwrap_or(usize::MAX))
				.cloned(),
			None => hinted.next().cloned(),
		}
	}
}

/// Rejects names that would collide with signature syntax or registry placeholders.
pub(crate) fn check_type_name(name: &str, param: &str) -> Result<(), RegistryError> {
	let reason = if name.is_empty() {
		Some("empty name")
	} else if name.starts_with('_') {
		Some("names starting with _ are reserved")
	} else if name == ANY {
		Some("the universal type is built in")
	} else if name == param || name == SOURCE_PARAM {
		Some("template placeholders cannot name types")
	} else if name
		.chars()
		.any(|c| matches!(c, '<' | '>' | ',' | '(' | ')' | '.') || c.is_whitespace())
	{
		Some("contains signature punctuation")
	} else {
		None
	};
	match reason {
		Some(reason) => Err(RegistryError::InvalidTypeName {
			name: name.to_string(),
			reason,
		}),
		None => Ok(()),
	}
}

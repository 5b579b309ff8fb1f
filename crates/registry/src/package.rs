//! Leaf packages: batches of types, templates and behaviors installed together.

use indexmap::IndexMap;
use polyop_dispatch::{Signature, TypeName};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::behavior::{Behavior, Dependency, Target};
use crate::names;
use crate::operation::Slot;
use crate::registry::State;
use crate::template::TemplateSpec;
use crate::types::{TypeSpec, check_type_name};
use crate::RegistryError;

/// A batch of definitions for [`crate::Registry::install`].
#[derive(Clone, Default)]
pub struct Package {
	name: String,
	types: IndexMap<TypeName, TypeSpec>,
	templates: IndexMap<TypeName, TemplateSpec>,
	behaviors: Vec<(TypeName, String, Behavior)>,
}

/// A behavior checked against the registry and ready to be stored.
pub(crate) struct PreparedBehavior {
	pub(crate) operation: TypeName,
	pub(crate) signature: Signature,
	pub(crate) slot: Slot,
}

impl Package {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Adds a concrete type. Types are installed in the order they are added.
	pub fn with_type(mut self, name: &str, spec: TypeSpec) -> Self {
		self.types.insert(TypeName::from(name), spec);
		self
	}

	/// Adds a template under its pattern name, e.g. `Pair<T>`.
	pub fn with_template(mut self, pattern: &str, spec: TemplateSpec) -> Self {
		self.templates.insert(TypeName::from(pattern), spec);
		self
	}

	/// Adds a behavior for `operation` under the signature text `signature`.
	pub fn with_behavior(mut self, operation: &str, signature: &str, behavior: Behavior) -> Self {
		self.behaviors
			.push((TypeName::from(operation), signature.to_string(), behavior));
		self
	}

	pub(crate) fn types(&self) -> impl Iterator<Item = (&TypeName, &TypeSpec)> + '_ {
		self.types.iter()
	}

	pub(crate) fn templates(&self) -> impl Iterator<Item = (&TypeName, &TemplateSpec)> + '_ {
		self.templates.iter()
	}

	/// Checks the whole batch against `state` without mutating it.
	pub(crate) fn validate(&self, state: &State) -> Result<Vec<PreparedBehavior>, RegistryError> {
		let param = state.config.template_param.as_str();

		for (name, spec) in &self.types {
			check_type_name(name, param)?;
			if let Some(existing) = state.types.record(name) {
				if !existing.spec.same_as(spec) {
					return Err(RegistryError::TypeConflict {
						name: name.to_string(),
					});
				}
			}
			if let Some(sup) = &spec.refines {
				let earlier = self
					.types
					.get_index_of(sup)
					.zip(self.types.get_index_of(name))
					.is_some_and(|(s, n)| s < n);
				if !earlier && !state.types.contains(sup) {
					return Err(RegistryError::UnknownSupertype {
						name: name.to_string(),
						supertype: sup.to_string(),
					});
				}
			}
			if let Some(to) = self.converting_ancestor(state, name, spec) {
				return Err(RegistryError::ConversionToSupertype {
					from: name.to_string(),
					to: to.to_string(),
				});
			}
		}

		for (pattern, spec) in &self.templates {
			let base = state.template_base(pattern)?;
			if let Some(existing) = state.templates.get(base) {
				if !existing.same_as(spec) {
					return Err(RegistryError::TemplateConflict {
						name: pattern.to_string(),
					});
				}
			}
			if !state.types.contains(base) && !self.types.contains_key(base) {
				return Err(RegistryError::MissingTemplateBase {
					template: pattern.to_string(),
					base: base.to_string(),
				});
			}
		}

		let mut seen: FxHashMap<(TypeName, Signature), Behavior> = FxHashMap::default();
		let mut prepared = Vec::with_capacity(self.behaviors.len());
		for (operation, text, behavior) in &self.behaviors {
			state.check_operation_name(operation)?;
			let signature = Signature::parse(text)?;
			let conflict = || RegistryError::SignatureConflict {
				operation: operation.to_string(),
				signature: signature.to_string(),
			};

			let installed = state
				.ops
				.id(operation)
				.and_then(|id| state.ops.get(id).slots.get(&signature));
			if let Some(slot) = installed {
				if !slot.behavior.ptr_eq(behavior) {
					return Err(conflict());
				}
			}
			match seen.get(&(operation.clone(), signature.clone())) {
				Some(earlier) if earlier.ptr_eq(behavior) => continue,
				Some(_) => return Err(conflict()),
				None => {
					seen.insert((operation.clone(), signature.clone()), behavior.clone());
				}
			}
			if installed.is_some() {
				continue;
			}

			let generic = names::is_generic(&signature, param);
			let uses = behavior
				.uses()
				.iter()
				.map(|token| {
					let invalid = |reason| RegistryError::InvalidDependency {
						operation: operation.to_string(),
						signature: signature.to_string(),
						token: token.clone(),
						reason,
					};
					let dep = Dependency::parse(token, param).map_err(invalid)?;
					if !generic && mentions_param(&dep, param) {
						return Err(invalid("the template parameter is only available to generic signatures"));
					}
					Ok(dep)
				})
				.collect::<Result<Vec<_>, _>>()?;

			prepared.push(PreparedBehavior {
				operation: operation.clone(),
				signature,
				slot: Slot {
					behavior: behavior.clone(),
					uses,
					generic,
					instantiations: Default::default(),
					unresolved: false,
				},
			});
		}
		Ok(prepared)
	}

	/// First ancestor of `name` that declares a conversion from it, looking at this package's
	/// specs before installed ones.
	fn converting_ancestor<'a>(
		&'a self,
		state: &'a State,
		name: &str,
		spec: &'a TypeSpec,
	) -> Option<&'a TypeName> {
		let mut visited = FxHashSet::default();
		let mut next = spec.refines.as_ref();
		while let Some(sup) = next {
			if !visited.insert(sup) {
				break;
			}
			let sup_spec = self
				.types
				.get(sup)
				.or_else(|| state.types.record(sup).map(|record| &record.spec))?;
			if sup_spec.converts_from(name).is_some() {
				return Some(sup);
			}
			next = sup_spec.refines.as_ref();
		}
		None
	}

	/// Captures every definition of `state` other than template instantiations.
	pub(crate) fn snapshot(state: &State) -> Self {
		let mut package = Self::new(state.config.label.clone());
		for (name, record) in state.types.records() {
			if record.instance.is_none() {
				package.types.insert(name.clone(), record.spec.clone());
			}
		}
		for (base, spec) in &state.templates {
			package.templates.insert(
				names::instance_name(base, &state.config.template_param),
				spec.clone(),
			);
		}
		for (_, op) in state.ops.iter() {
			for (signature, slot) in &op.slots {
				package.behaviors.push((
					op.name.clone(),
					signature.to_string(),
					slot.behavior.clone(),
				));
			}
		}
		package
	}
}

fn mentions_param(dep: &Dependency, param: &str) -> bool {
	dep.target == Target::Param
		|| dep
			.signature
			.as_ref()
			.is_some_and(|s| names::is_generic(s, param))
}

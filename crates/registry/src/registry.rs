//! The registry handle and its install and introspection surface.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use polyop_dispatch::{ANY, Signature, TypeName, Value};
use rustc_hash::FxHashMap;

use crate::behavior::{Behavior, CONFIG_TOKEN, Target};
use crate::config::RegistryConfig;
use crate::names::{self, SOURCE_PARAM};
use crate::operation::{Operations, type_key};
use crate::package::{Package, PreparedBehavior};
use crate::template::{Instantiation, TemplateSpec};
use crate::types::{TypeIndex, TypeSpec, check_type_name};
use crate::{Callable, RegistryError};

/// Operation names taken by the registry surface itself.
const RESERVED_OPERATIONS: &[&str] = &["self", "install", "merge", CONFIG_TOKEN, SOURCE_PARAM];

pub(crate) struct State {
	pub(crate) config: RegistryConfig,
	pub(crate) types: TypeIndex,
	pub(crate) templates: FxHashMap<TypeName, TemplateSpec>,
	/// Instantiations per template base, in creation order.
	pub(crate) instantiations: IndexMap<TypeName, Vec<TypeName>>,
	pub(crate) ops: Operations,
	pub(crate) max_depth_seen: usize,
}

impl State {
	fn new(config: RegistryConfig) -> Self {
		let max_depth_seen = config.initial_depth;
		Self {
			config,
			types: TypeIndex::new(),
			templates: FxHashMap::default(),
			instantiations: IndexMap::new(),
			ops: Operations::default(),
			max_depth_seen,
		}
	}

	pub(crate) fn invalidate_types(&mut self, touched: &[TypeName]) -> usize {
		self.ops
			.invalidate_keys(touched.iter().map(|t| type_key(t)))
	}

	pub(crate) fn check_operation_name(&self, name: &str) -> Result<(), RegistryError> {
		let reserved = name.is_empty()
			|| name.starts_with('_')
			|| name == self.config.template_param
			|| RESERVED_OPERATIONS.contains(&name)
			|| name
				.chars()
				.any(|c| matches!(c, '<' | '>' | ',' | '(' | ')') || c.is_whitespace());
		if reserved {
			return Err(RegistryError::ReservedName {
				name: name.to_string(),
			});
		}
		Ok(())
	}

	/// Returns true if a generic parameter token only names installed templates.
	pub(crate) fn is_generic_resolvable(&self, token: &str) -> bool {
		let param = self.config.template_param.as_str();
		if token == param {
			return true;
		}
		if !names::mentions(token, param) {
			return self.is_resolvable(token);
		}
		match names::split_instance(token) {
			Some((base, arg)) => {
				self.templates.contains_key(base) && self.is_generic_resolvable(arg)
			}
			None => false,
		}
	}

	/// Adds a validated behavior. Returns false for an identical re-install.
	fn add_behavior(&mut self, prepared: PreparedBehavior) -> Result<bool, RegistryError> {
		let id = self.ops.get_or_insert(&prepared.operation);
		let op = self.ops.get_mut(id);
		if let Some(existing) = op.slots.get(&prepared.signature) {
			if existing.behavior.ptr_eq(&prepared.slot.behavior) {
				return Ok(false);
			}
			return Err(RegistryError::SignatureConflict {
				operation: prepared.operation.to_string(),
				signature: prepared.signature.to_string(),
			});
		}

		let mut keys: Vec<TypeName> = prepared
			.slot
			.uses
			.iter()
			.filter_map(|dep| match &dep.target {
				Target::Op(other) => Some(other.clone()),
				Target::Config => Some(TypeName::from(CONFIG_TOKEN)),
				Target::SelfOp | Target::Param => None,
			})
			.collect();
		let param = self.config.template_param.as_str();
		for token in prepared.signature.params() {
			if &**token == param {
				continue;
			}
			if !names::mentions(token, param) {
				keys.push(type_key(token));
				continue;
			}
			// Generic tokens depend on every template they nest.
			for base in names::template_bases(token) {
				let key = type_key(&names::instance_name(base, param));
				if !keys.contains(&key) {
					keys.push(key);
				}
			}
		}
		op.slots.insert(prepared.signature.clone(), prepared.slot);
		for key in keys {
			self.ops.add_edge(key, id);
		}
		self.ops.invalidate_op(id);
		tracing::debug!(
			operation = %prepared.operation,
			signature = %prepared.signature,
			"installed behavior"
		);
		Ok(true)
	}

	/// Raises the observed nesting depth and re-invalidates operations whose expansions the
	/// depth guard dropped.
	pub(crate) fn observe_depth(&mut self, depth: usize) {
		if depth <= self.max_depth_seen {
			return;
		}
		self.max_depth_seen = depth;
		let retry = self.ops.unresolved();
		tracing::debug!(depth, retry = retry.len(), "raised observed depth");
		for id in retry {
			self.ops.invalidate_op(id);
		}
	}
}

pub(crate) struct Shared {
	state: RefCell<State>,
}

/// An operation registry.
///
/// Cloning yields another handle to the same registry. Dispatchers compiled by the registry
/// hold only weak handles back to it.
#[derive(Clone)]
pub struct Registry {
	shared: Rc<Shared>,
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Registry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state();
		f.debug_struct("Registry")
			.field("label", &state.config.label)
			.field("types", &state.types.records().count())
			.field("operations", &state.ops.iter().count())
			.finish()
	}
}

/// Weak handle captured by compiled closures.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<Shared>);

impl WeakRegistry {
	pub(crate) fn upgrade(&self, operation: &str) -> Result<Registry, RegistryError> {
		self.0
			.upgrade()
			.map(|shared| Registry { shared })
			.ok_or_else(|| RegistryError::Detached {
				operation: operation.to_string(),
			})
	}
}

impl Registry {
	/// Creates an empty registry with the default configuration.
	pub fn new() -> Self {
		Self::from_state(State::new(RegistryConfig::default()))
	}

	pub fn with_config(config: RegistryConfig) -> Result<Self, RegistryError> {
		config.validate()?;
		Ok(Self::from_state(State::new(config)))
	}

	/// Creates a registry from a TOML configuration document.
	pub fn from_toml_str(text: &str) -> Result<Self, RegistryError> {
		Self::with_config(RegistryConfig::from_toml_str(text)?)
	}

	fn from_state(state: State) -> Self {
		Self {
			shared: Rc::new(Shared {
				state: RefCell::new(state),
			}),
		}
	}

	pub(crate) fn state(&self) -> Ref<'_, State> {
		self.shared.state.borrow()
	}

	pub(crate) fn state_mut(&self) -> RefMut<'_, State> {
		self.shared.state.borrow_mut()
	}

	pub(crate) fn downgrade(&self) -> WeakRegistry {
		WeakRegistry(Rc::downgrade(&self.shared))
	}

	pub fn config(&self) -> RegistryConfig {
		self.state().config.clone()
	}

	/// Replaces the configuration and recompiles behaviors that declared `config`.
	///
	/// The template parameter is fixed for the lifetime of a registry.
	pub fn update_config(&self, config: RegistryConfig) -> Result<(), RegistryError> {
		config.validate()?;
		let mut state = self.state_mut();
		if config.template_param != state.config.template_param {
			return Err(RegistryError::InvalidConfig {
				reason: "template_param cannot change after creation",
			});
		}
		if config == state.config {
			return Ok(());
		}
		let depth = config.initial_depth;
		let cap_changed = config.max_depth != state.config.max_depth;
		state.config = config;
		if cap_changed {
			for id in state.ops.unresolved() {
				state.ops.invalidate_op(id);
			}
		}
		state.observe_depth(depth);
		let marked = state.ops.invalidate_keys([TypeName::from(CONFIG_TOKEN)]);
		tracing::debug!(registry = %state.config.label, marked, "updated configuration");
		Ok(())
	}

	/// Installs a batch of types, templates and behaviors.
	///
	/// The whole batch is validated against the registry before anything is mutated.
	pub fn install(&self, package: &Package) -> Result<(), RegistryError> {
		let prepared = package.validate(&self.state())?;
		for (name, spec) in package.types() {
			self.install_type(name, spec.clone())?;
		}
		for (pattern, spec) in package.templates() {
			self.install_template(pattern, spec.clone())?;
		}
		let mut state = self.state_mut();
		let mut added = 0;
		for behavior in prepared {
			added += usize::from(state.add_behavior(behavior)?);
		}
		tracing::debug!(
			registry = %state.config.label,
			package = package.name(),
			added,
			"installed package"
		);
		Ok(())
	}

	/// Installs one concrete type.
	pub fn install_type(&self, name: &str, spec: TypeSpec) -> Result<(), RegistryError> {
		let mut state = self.state_mut();
		check_type_name(name, &state.config.template_param)?;
		let touched = state.types.install(name, spec, None)?;
		state.invalidate_types(&touched);
		Ok(())
	}

	/// Installs a template under its pattern name, e.g. `Pair<T>`.
	pub fn install_template(&self, pattern: &str, spec: TemplateSpec) -> Result<(), RegistryError> {
		let mut state = self.state_mut();
		if state.install_template(pattern, spec)? {
			state.invalidate_types(&[TypeName::from(pattern)]);
		}
		Ok(())
	}

	/// Installs one behavior under `operation` for the signature text `signature`.
	pub fn install_behavior(
		&self,
		operation: &str,
		signature: &str,
		behavior: Behavior,
	) -> Result<(), RegistryError> {
		self.install(&Package::new(operation).with_behavior(operation, signature, behavior))
	}

	/// Installs every type, template and behavior of `other`.
	///
	/// Definitions present in both registries must be identical.
	pub fn merge(&self, other: &Registry) -> Result<(), RegistryError> {
		if Rc::ptr_eq(&self.shared, &other.shared) {
			return Ok(());
		}
		let package = {
			let theirs = other.state();
			if theirs.config.template_param != self.state().config.template_param {
				return Err(RegistryError::InvalidConfig {
					reason: "cannot merge registries with different template parameters",
				});
			}
			Package::snapshot(&theirs)
		};
		self.install(&package)
	}

	/// Calls an operation with dispatch on the runtime types of `args`.
	pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, RegistryError> {
		self.function(name)?.call(args)
	}

	/// Lazy accessor that checks freshness on every call.
	pub fn handle(&self, name: &str) -> Callable {
		let weak = self.downgrade();
		let name = TypeName::from(name);
		Rc::new(move |args: &[Value]| weak.upgrade(&name)?.call(&name, args))
	}

	/// Runtime type of `value`, with template arguments inferred structurally.
	pub fn type_of(&self, value: &Value) -> TypeName {
		self.state().type_of(value)
	}

	/// Most specific common type of `types`; [`ANY`] if none exists.
	pub fn join_types(&self, types: &[&str], allow_conversions: bool) -> TypeName {
		self.state()
			.types
			.join_all(types.iter().copied(), allow_conversions)
	}

	pub fn is_subtype_of(&self, sub: &str, sup: &str) -> bool {
		self.state().types.is_subtype_of(sub, sup)
	}

	pub fn is_prior_to(&self, earlier: &str, later: &str) -> bool {
		self.state().types.is_prior_to(earlier, later)
	}

	/// Strict subtypes, most refined first.
	pub fn subtypes_of(&self, name: &str) -> Vec<TypeName> {
		self.state().types.subtypes_of(name).to_vec()
	}

	/// Refinement chain, nearest supertype first.
	pub fn supertypes_of(&self, name: &str) -> Vec<TypeName> {
		self.state().types.supertypes_of(name)
	}

	pub fn has_type(&self, name: &str) -> bool {
		self.state().types.contains(name)
	}

	/// Materializes `base<arg>`. Returns `None` if the depth guard declined it.
	pub fn instantiate_template(
		&self,
		base: &str,
		arg: &str,
	) -> Result<Option<TypeName>, RegistryError> {
		let mut state = self.state_mut();
		let mut touched = Vec::new();
		let outcome = state.instantiate(base, arg, &mut touched);
		state.invalidate_types(&touched);
		let outcome = outcome?;
		if outcome == Instantiation::Declined {
			tracing::warn!(
				base,
				arg,
				max_depth_seen = state.max_depth_seen,
				"instantiation declined by depth guard"
			);
		}
		Ok(outcome.name().cloned())
	}

	/// Instantiations of a template base, in creation order.
	pub fn instantiations_of(&self, base: &str) -> Vec<TypeName> {
		self.state()
			.instantiations
			.get(base)
			.cloned()
			.unwrap_or_default()
	}

	/// Deepest template nesting observed at a call site so far.
	pub fn observed_depth(&self) -> usize {
		self.state().max_depth_seen
	}

	/// Installed operation names, in install order.
	pub fn operation_names(&self) -> Vec<TypeName> {
		self.state()
			.ops
			.iter()
			.map(|(_, op)| op.name.clone())
			.collect()
	}

	/// Installed signatures of an operation, in install order.
	pub fn signatures_of(&self, name: &str) -> Result<Vec<Signature>, RegistryError> {
		let state = self.state();
		let id = state
			.ops
			.id(name)
			.ok_or_else(|| RegistryError::UnknownOperation {
				name: name.to_string(),
			})?;
		Ok(state.ops.get(id).slots.keys().cloned().collect())
	}

	/// Type names used in installed signatures that are neither installed nor instantiable.
	pub fn undefined_types(&self) -> Vec<TypeName> {
		let state = self.state();
		let mut undefined = IndexSet::new();
		for (_, op) in state.ops.iter() {
			for token in op.slots.keys().flat_map(|s| s.params().iter()) {
				if &**token != ANY && !state.is_generic_resolvable(token) {
					undefined.insert(token.clone());
				}
			}
		}
		undefined.into_iter().collect()
	}
}

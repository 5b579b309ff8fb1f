//! Dependency resolution and generic calls.
//!
//! # Role
//!
//! Turns the dependency tokens of a planned entry into callables, and implements the catch-all
//! entries that route calls on not-yet-instantiated generic signatures.
//!
//! # Invariants
//!
//! - A dependency on an operation that is being compiled, not installed yet, or not usable yet
//!   resolves to a late-binding stub that looks the target up on every call.
//! - A catch-all never calls itself: it only calls the exact concrete entry it requested.
//! - Compiled closures hold the registry weakly; calling them after the registry is dropped
//!   fails with [`RegistryError::Detached`].

use std::rc::Rc;

use indexmap::IndexMap;
use polyop_dispatch::{ANY, ForwardRef, Signature, TypeName, Value};
use rustc_hash::FxHashMap;

use crate::behavior::{Deps, Target};
use crate::compile::{Plan, PlannedEntry};
use crate::names;
use crate::operation::{OpId, Status};
use crate::registry::State;
use crate::returns;
use crate::{Callable, Dispatcher, Registry, RegistryError};

impl State {
	/// The candidate every parameter of `wanted` refines, preferring the most specific. When
	/// none exists, the candidate `wanted` converts into, as dispatch would pick it.
	pub(crate) fn compatible_signature<'a>(
		&self,
		candidates: impl IntoIterator<Item = &'a Signature> + Clone,
		wanted: &Signature,
	) -> Option<Signature> {
		self.closest_signature(candidates.clone(), wanted, false)
			.or_else(|| self.closest_signature(candidates, wanted, true))
	}

	fn closest_signature<'a>(
		&self,
		candidates: impl IntoIterator<Item = &'a Signature>,
		wanted: &Signature,
		convert: bool,
	) -> Option<Signature> {
		let universe = self.types.universe();
		let accepts = |have: &str, want: &str| {
			have == want
				|| if convert {
					self.types.is_prior_to(want, have)
				} else {
					self.types.is_subtype_of(want, have)
				}
		};
		candidates
			.into_iter()
			.filter(|candidate| {
				candidate.arity() == wanted.arity()
					&& candidate.is_variadic() == wanted.is_variadic()
					&& candidate
						.params()
						.iter()
						.zip(wanted.params())
						.all(|(have, want)| accepts(have, want))
			})
			.min_by_key(|candidate| {
				candidate
					.params()
					.iter()
					.map(|p| universe.position(p).unwrap_or(usize::MAX))
					.collect::<Vec<_>>()
			})
			.cloned()
	}

	/// Makes sure every resolvable type in `wanted` exists and returns those that do.
	fn ensure_all(
		&mut self,
		wanted: &[TypeName],
		touched: &mut Vec<TypeName>,
	) -> Result<Vec<TypeName>, RegistryError> {
		let mut available = Vec::with_capacity(wanted.len());
		for name in wanted {
			if self.is_resolvable(name) && self.ensure_type(name, touched)?.name().is_some() {
				available.push(name.clone());
			}
		}
		Ok(available)
	}
}

impl Registry {
	pub(crate) fn resolve_dependencies(
		&self,
		plan: &Plan,
		entry: &PlannedEntry,
		this: &ForwardRef<RegistryError>,
		planned: &[Signature],
		pending: &mut IndexMap<Signature, ForwardRef<RegistryError>>,
	) -> Result<Deps, RegistryError> {
		let mut resolved = FxHashMap::default();
		let mut config = None;
		for dep in &entry.uses {
			let callable = match (&dep.target, &dep.signature) {
				(Target::Param, _) => continue,
				(Target::Config, _) => {
					config = Some(self.state().config.clone());
					continue;
				}
				(Target::SelfOp, None) => this.callable(),
				(Target::SelfOp, Some(wanted)) => {
					let target = if planned.contains(wanted) {
						Some(wanted.clone())
					} else {
						self.state().compatible_signature(planned, wanted)
					};
					let Some(target) = target else {
						return Err(RegistryError::UnresolvedSelfReference {
							operation: plan.name.to_string(),
							signature: wanted.to_string(),
						});
					};
					pending
						.entry(target)
						.or_insert_with(|| ForwardRef::new(&plan.name))
						.callable()
				}
				(Target::Op(other), None) => self.dependency(other)?,
				(Target::Op(other), Some(wanted)) => self.overload(other, wanted)?,
			};
			resolved.insert(dep.token.clone(), callable);
		}
		Ok(Deps {
			resolved,
			param: entry.param.clone(),
			config,
		})
	}

	/// Whole dispatcher of another operation.
	fn dependency(&self, other: &TypeName) -> Result<Callable, RegistryError> {
		if !self.is_settled(other) {
			return Ok(self.late_binding(other, None));
		}
		match self.function(other) {
			Ok(dispatcher) => Ok(dispatcher.callable()),
			Err(RegistryError::NoUsableSignatures { .. }) => Ok(self.late_binding(other, None)),
			Err(err) => Err(err),
		}
	}

	/// Exact overload of another operation, instantiating generic behaviors when needed and
	/// falling back to the most specific compatible signature.
	pub(crate) fn overload(&self, other: &str, wanted: &Signature) -> Result<Callable, RegistryError> {
		if !self.is_settled(other) {
			return Ok(self.late_binding(other, Some(wanted.clone())));
		}
		let (dispatcher, signature) = self.matching_signature(other, wanted)?;
		dispatcher
			.find(&signature)
			.ok_or_else(|| RegistryError::UnresolvedOverload {
				operation: other.to_string(),
				signature: wanted.to_string(),
			})
	}

	/// False while `name` is being compiled or not installed at all.
	fn is_settled(&self, name: &str) -> bool {
		let state = self.state();
		state
			.ops
			.id(name)
			.is_some_and(|id| !matches!(state.ops.get(id).status, Status::Building { .. }))
	}

	fn matching_signature(
		&self,
		name: &str,
		wanted: &Signature,
	) -> Result<(Dispatcher, Signature), RegistryError> {
		let mut dispatcher = self.function(name)?;
		if !dispatcher.contains(wanted) && self.request_instantiation(name, wanted)? {
			dispatcher = self.function(name)?;
		}
		if dispatcher.contains(wanted) {
			return Ok((dispatcher, wanted.clone()));
		}
		let known: Vec<&Signature> = dispatcher.signatures().collect();
		let signature = self
			.state()
			.compatible_signature(known.iter().copied(), wanted)
			.ok_or_else(|| RegistryError::UnresolvedOverload {
				operation: name.to_string(),
				signature: wanted.to_string(),
			})?;
		Ok((dispatcher, signature))
	}

	/// Records the instantiation of every generic behavior of `name` that `wanted` unifies
	/// with. Returns true if anything new was recorded.
	fn request_instantiation(&self, name: &str, wanted: &Signature) -> Result<bool, RegistryError> {
		let mut state = self.state_mut();
		let Some(id) = state.ops.id(name) else {
			return Ok(false);
		};
		let param = state.config.template_param.clone();
		let mut touched = Vec::new();
		let available = state.ensure_signature(wanted, &mut touched);
		state.invalidate_types(&touched);
		if !available? {
			return Ok(false);
		}
		let matches: Vec<(Signature, TypeName)> = state
			.ops
			.get(id)
			.slots
			.iter()
			.filter(|(_, slot)| slot.generic)
			.filter_map(|(sig, _)| {
				names::unify_signature(sig, wanted, &param).map(|ty| (sig.clone(), ty))
			})
			.collect();
		let mut added = false;
		for (sig, ty) in matches {
			added |= state.record_instantiation(id, &sig, &ty);
		}
		if added {
			state.ops.invalidate_op(id);
		}
		Ok(added)
	}

	/// Stub resolving `other` (or one of its overloads) on every call.
	fn late_binding(&self, other: &str, signature: Option<Signature>) -> Callable {
		let weak = self.downgrade();
		let other = TypeName::from(other);
		tracing::trace!(operation = %other, "late-binding dependency");
		Rc::new(move |args: &[Value]| {
			let registry = weak.upgrade(&other)?;
			match &signature {
				None => registry.call(&other, args),
				Some(signature) => (registry.overload(&other, signature)?)(args),
			}
		})
	}

	/// Entry standing in for the generic signature `generic` on every type not yet expanded.
	pub(crate) fn catch_all(&self, name: &TypeName, generic: &Signature) -> Callable {
		let weak = self.downgrade();
		let name = name.clone();
		let generic = generic.clone();
		Rc::new(move |args: &[Value]| weak.upgrade(&name)?.call_generic(&name, &generic, args))
	}

	/// Infers the instantiation type of a call on a generic signature, expands the operation
	/// for it, and calls the concrete entry.
	fn call_generic(
		&self,
		name: &str,
		generic: &Signature,
		packed: &[Value],
	) -> Result<Value, RegistryError> {
		let args: Vec<Value> = match packed.split_last() {
			Some((tail, fixed)) if generic.is_variadic() => {
				fixed.iter().chain(tail.items()).cloned().collect()
			}
			_ => packed.to_vec(),
		};

		let (id, concrete) = {
			let mut state = self.state_mut();
			let id = state
				.ops
				.id(name)
				.ok_or_else(|| RegistryError::UnknownOperation {
					name: name.to_string(),
				})?;
			let param = state.config.template_param.clone();
			let types: Vec<TypeName> = args.iter().map(|v| state.type_of(v)).collect();
			// Every argument in a generic position must bind the parameter.
			let mut candidates: Vec<TypeName> = Vec::with_capacity(types.len());
			let mut unbound = false;
			for (i, ty) in types.iter().enumerate() {
				let Some(pattern) = generic.param_for(i) else {
					continue;
				};
				if !names::mentions(pattern, &param) {
					continue;
				}
				match names::unify(pattern, ty, &param) {
					Some(candidate) => candidates.push(candidate),
					None => unbound = true,
				}
			}
			let depth = types.iter().map(|t| names::depth(t)).max().unwrap_or(0);
			state.observe_depth(depth);

			// Argument types first, so conversions between siblings exist before the join.
			let mut touched = Vec::new();
			let available = state
				.ensure_all(&types, &mut touched)
				.and_then(|_| state.ensure_all(&candidates, &mut touched));
			state.invalidate_types(&touched);
			let available = available?;

			let joined = state.join_lenient(available.iter().map(|t| &**t));
			if unbound
				|| available.is_empty()
				|| available.len() < candidates.len()
				|| &*joined == ANY
			{
				return Err(RegistryError::NoJoin {
					operation: name.to_string(),
					args: types.iter().map(ToString::to_string).collect(),
					types: candidates.iter().map(ToString::to_string).collect(),
				});
			}

			let concrete = names::instantiate_signature(generic, &param, &joined);
			let mut touched = Vec::new();
			let ready = state.ensure_signature(&concrete, &mut touched);
			state.invalidate_types(&touched);
			if !ready? {
				return Err(RegistryError::UnresolvedOverload {
					operation: name.to_string(),
					signature: concrete.to_string(),
				});
			}
			if state.record_instantiation(id, generic, &joined) {
				state.ops.invalidate_op(id);
			}
			tracing::debug!(operation = name, ty = %joined, "generic call");
			(id, concrete)
		};

		let result = self.function(name)?.call_with(&concrete, &args)?;
		self.propagate_return(id, &concrete);
		Ok(result)
	}

	/// Makes sure the declared return type of a freshly expanded entry exists.
	fn propagate_return(&self, id: OpId, signature: &Signature) {
		let annotation = {
			let state = self.state();
			state
				.ops
				.get(id)
				.compiled
				.as_ref()
				.and_then(|c| c.returns.get(signature).cloned())
		};
		let Some(annotation) = annotation else {
			return;
		};
		let ty = annotation.evaluate(signature, self);
		let mut state = self.state_mut();
		if state.types.contains(&ty) || !state.is_resolvable(&ty) {
			return;
		}
		let mut touched = Vec::new();
		if let Err(err) = state.ensure_type(&ty, &mut touched) {
			tracing::warn!(ty = %ty, error = %err, "cannot materialize return type");
		}
		state.invalidate_types(&touched);
	}

	/// Declared return type of the overload of `name` selected for the signature text
	/// `signature`; [`ANY`] when unannotated.
	pub fn return_type_of(&self, name: &str, signature: &str) -> Result<TypeName, RegistryError> {
		let wanted = Signature::parse(signature)?;
		let (_, matched) = self.matching_signature(name, &wanted)?;
		let id = self.op_id(name)?;
		let annotation = {
			let state = self.state();
			state
				.ops
				.get(id)
				.compiled
				.as_ref()
				.and_then(|c| c.returns.get(&matched).cloned())
		};
		Ok(returns::evaluate(annotation.as_ref(), &matched, self))
	}
}

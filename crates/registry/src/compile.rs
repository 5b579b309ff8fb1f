//! Dispatch compiler.
//!
//! # Mental Model
//!
//! 1. **Plan:** under a mutable borrow of the state, filter the operation's behaviors to usable
//!    signatures, expand generic ones over their recorded instantiations (and every type prior
//!    to each), chase partial self references into further expansions, and add one catch-all
//!    per generic signature. Templates are instantiated here; nothing user-defined runs.
//! 2. **Build:** with no borrow held, resolve every entry's dependencies and run its factory.
//! 3. **Freeze:** compile the table through the type universe, bind the self reference and the
//!    pending partial self references, and record the result.
//!
//! # Invariants
//!
//! - The operation is [`Status::Building`] exactly while step 2 and 3 run.
//! - A failed build leaves the operation stale; it never stays in the building state.
//! - Explicit signatures always win over generic expansions with the same signature.

use indexmap::IndexMap;
use polyop_dispatch::{ANY, ForwardRef, Signature, TypeName};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::behavior::{Behavior, Dependency, Target};
use crate::names;
use crate::operation::{Compiled, OpId, Status, type_key};
use crate::registry::State;
use crate::returns::ReturnType;
use crate::template::Instantiation;
use crate::{Callable, Dispatcher, Registry, RegistryError};

/// One concrete table entry to build.
pub(crate) struct PlannedEntry {
	pub(crate) signature: Signature,
	pub(crate) behavior: Behavior,
	pub(crate) uses: Vec<Dependency>,
	/// Instantiation type for expansions of generic behaviors.
	pub(crate) param: Option<TypeName>,
}

/// Catch-all entry standing in for a generic signature.
pub(crate) struct CatchAll {
	pub(crate) signature: Signature,
	pub(crate) generic: Signature,
}

pub(crate) struct Plan {
	pub(crate) name: TypeName,
	pub(crate) entries: Vec<PlannedEntry>,
	pub(crate) catch_alls: Vec<CatchAll>,
}

struct GenericSlot {
	signature: Signature,
	behavior: Behavior,
	uses: Vec<Dependency>,
}

impl State {
	/// Makes sure every parameter type of `signature` exists. Returns false if one is unknown
	/// or declined by the depth guard.
	pub(crate) fn ensure_signature(
		&mut self,
		signature: &Signature,
		touched: &mut Vec<TypeName>,
	) -> Result<bool, RegistryError> {
		for ty in signature.params() {
			if &**ty == ANY || self.types.contains(ty) {
				continue;
			}
			if !self.is_resolvable(ty) {
				return Ok(false);
			}
			if self.ensure_type(ty, touched)? == Instantiation::Declined {
				return Ok(false);
			}
		}
		Ok(true)
	}

	fn signature_usable(&self, signature: &Signature) -> bool {
		signature
			.params()
			.iter()
			.all(|ty| &**ty == ANY || self.is_generic_resolvable(ty))
	}

	/// Records `ty` as an instantiation of the generic slot `signature`.
	pub(crate) fn record_instantiation(&mut self, id: OpId, signature: &Signature, ty: &str) -> bool {
		let added = self
			.ops
			.get_mut(id)
			.slots
			.get_mut(signature)
			.is_some_and(|slot| slot.instantiations.insert(TypeName::from(ty)));
		if added {
			self.ops.add_edge(type_key(ty), id);
			tracing::debug!(
				operation = %self.ops.get(id).name,
				signature = %signature,
				ty,
				"recorded instantiation"
			);
		}
		added
	}

	/// Phase one of a build. See the module docs.
	pub(crate) fn plan(&mut self, id: OpId, touched: &mut Vec<TypeName>) -> Result<Plan, RegistryError> {
		let param = self.config.template_param.clone();
		let op = self.ops.get_mut(id);
		let name = op.name.clone();
		for slot in op.slots.values_mut() {
			slot.unresolved = false;
		}
		let snapshot: Vec<(Signature, Behavior, Vec<Dependency>, bool, Vec<TypeName>)> = op
			.slots
			.iter()
			.map(|(sig, slot)| {
				(
					sig.clone(),
					slot.behavior.clone(),
					slot.uses.clone(),
					slot.generic,
					slot.instantiations.iter().cloned().collect(),
				)
			})
			.collect();

		let mut rejected = Vec::new();
		let mut explicit = FxHashSet::default();
		let mut concrete = Vec::new();
		let mut generic = Vec::new();
		let mut seeds = Vec::new();
		for (signature, behavior, uses, is_generic, instantiations) in snapshot {
			if !self.signature_usable(&signature) {
				rejected.push(signature.to_string());
				continue;
			}
			explicit.insert(signature.clone());
			if is_generic {
				let index = generic.len();
				seeds.extend(instantiations.into_iter().map(|ty| (index, ty)));
				generic.push(GenericSlot {
					signature,
					behavior,
					uses,
				});
			} else {
				concrete.push((signature, behavior, uses));
			}
		}
		if explicit.is_empty() {
			return Err(RegistryError::NoUsableSignatures {
				operation: name.to_string(),
				rejected,
			});
		}
		if !rejected.is_empty() {
			tracing::debug!(operation = %name, rejected = ?rejected, "skipped unusable signatures");
		}

		let mut planned: IndexMap<Signature, PlannedEntry> = IndexMap::new();
		let mut dropped: Vec<Signature> = Vec::new();
		for (signature, behavior, uses) in concrete {
			if self.ensure_signature(&signature, touched)? {
				planned.insert(
					signature.clone(),
					PlannedEntry {
						signature,
						behavior,
						uses,
						param: None,
					},
				);
			} else {
				dropped.push(signature);
			}
		}

		let mut queue: Vec<(usize, TypeName)> = Vec::new();
		for (index, ty) in seeds {
			queue.push((index, ty.clone()));
			queue.extend(
				self.types
					.prior_types(&ty)
					.into_iter()
					.map(|prior| (index, prior)),
			);
		}

		let mut cursor = 0;
		loop {
			for (index, ty) in queue.drain(..) {
				let slot = &generic[index];
				let signature = names::instantiate_signature(&slot.signature, &param, &ty);
				if explicit.contains(&signature) || planned.contains_key(&signature) {
					continue;
				}
				if !self.ensure_signature(&signature, touched)? {
					dropped.push(slot.signature.clone());
					continue;
				}
				let uses = slot
					.uses
					.iter()
					.map(|dep| dep.instantiate(&param, &ty))
					.collect();
				planned.insert(
					signature.clone(),
					PlannedEntry {
						signature,
						behavior: slot.behavior.clone(),
						uses,
						param: Some(ty),
					},
				);
			}

			// Partial self references may ask for overloads only an instantiation provides.
			while let Some((_, entry)) = planned.get_index(cursor) {
				let wanted: Vec<Signature> = entry
					.uses
					.iter()
					.filter(|dep| dep.target == Target::SelfOp)
					.filter_map(|dep| dep.signature.clone())
					.filter(|sig| !explicit.contains(sig) && !planned.contains_key(sig))
					.collect();
				cursor += 1;
				for sig in wanted {
					let found = generic.iter().enumerate().find_map(|(index, slot)| {
						names::unify_signature(&slot.signature, &sig, &param).map(|ty| (index, ty))
					});
					if let Some((index, ty)) = found {
						self.record_instantiation(id, &generic[index].signature, &ty);
						queue.push((index, ty));
					}
				}
			}
			if queue.is_empty() {
				break;
			}
		}

		let mut catch_alls: Vec<CatchAll> = Vec::new();
		for slot in &generic {
			let erased = slot.signature.map_params(|p| names::erase(p, &param));
			if explicit.contains(&erased)
				|| planned.contains_key(&erased)
				|| catch_alls.iter().any(|c| c.signature == erased)
			{
				continue;
			}
			if self.ensure_signature(&erased, touched)? {
				catch_alls.push(CatchAll {
					signature: erased,
					generic: slot.signature.clone(),
				});
			}
		}

		let op = self.ops.get_mut(id);
		for signature in &dropped {
			if let Some(slot) = op.slots.get_mut(signature) {
				slot.unresolved = true;
			}
		}
		if !dropped.is_empty() {
			tracing::debug!(operation = %name, dropped = dropped.len(), "deferred expansions past the depth guard");
		}

		Ok(Plan {
			name,
			entries: planned.into_values().collect(),
			catch_alls,
		})
	}
}

impl Registry {
	/// Fresh dispatcher of `name`, compiling it first when stale.
	pub fn function(&self, name: &str) -> Result<Dispatcher, RegistryError> {
		let id = self.op_id(name)?;
		{
			let state = self.state();
			let op = state.ops.get(id);
			match (&op.status, &op.compiled) {
				(Status::Fresh, Some(compiled)) => return Ok(compiled.dispatcher.clone()),
				(Status::Building { .. }, _) => {
					return Err(RegistryError::BuildInProgress {
						operation: name.to_string(),
					});
				}
				_ => {}
			}
		}
		self.compile(id)
	}

	pub(crate) fn op_id(&self, name: &str) -> Result<OpId, RegistryError> {
		self.state()
			.ops
			.id(name)
			.ok_or_else(|| RegistryError::UnknownOperation {
				name: name.to_string(),
			})
	}

	fn compile(&self, id: OpId) -> Result<Dispatcher, RegistryError> {
		let plan = {
			let mut state = self.state_mut();
			let mut touched = Vec::new();
			let plan = state.plan(id, &mut touched);
			state.invalidate_types(&touched);
			plan?
		};

		let this = ForwardRef::new(&plan.name);
		{
			let mut state = self.state_mut();
			let op = state.ops.get_mut(id);
			op.status = Status::Building { restale: false };
			op.building = Some(this.clone());
		}

		let built = self.build(&plan, &this);

		let mut state = self.state_mut();
		let op = state.ops.get_mut(id);
		let restale = op.status == Status::Building { restale: true };
		op.building = None;
		match built {
			Ok((dispatcher, returns)) => {
				op.status = if restale { Status::Stale } else { Status::Fresh };
				op.compiled = Some(Compiled {
					dispatcher: dispatcher.clone(),
					returns,
				});
				tracing::debug!(
					operation = %plan.name,
					entries = dispatcher.len(),
					restale,
					"compiled operation"
				);
				Ok(dispatcher)
			}
			Err(err) => {
				op.status = Status::Stale;
				tracing::debug!(operation = %plan.name, error = %err, "build failed");
				Err(err)
			}
		}
	}

	/// Phases two and three of a build.
	fn build(
		&self,
		plan: &Plan,
		this: &ForwardRef<RegistryError>,
	) -> Result<(Dispatcher, FxHashMap<Signature, ReturnType>), RegistryError> {
		let planned: Vec<Signature> = plan.entries.iter().map(|e| e.signature.clone()).collect();
		let mut pending: IndexMap<Signature, ForwardRef<RegistryError>> = IndexMap::new();
		let mut table: Vec<(Signature, Callable)> = Vec::with_capacity(planned.len());
		let mut returns = FxHashMap::default();

		for entry in &plan.entries {
			let built = self
				.resolve_dependencies(plan, entry, this, &planned, &mut pending)
				.and_then(|deps| entry.behavior.build(&deps));
			let implementation = match built {
				Ok(implementation) => implementation,
				Err(err) if entry.param.is_some() => {
					tracing::warn!(
						operation = %plan.name,
						signature = %entry.signature,
						error = %err,
						"dropped generic expansion"
					);
					continue;
				}
				Err(err) => return Err(err),
			};
			if let Some(annotation) = implementation.returns {
				returns.insert(entry.signature.clone(), annotation);
			}
			table.push((entry.signature.clone(), implementation.callable));
		}
		for catch_all in &plan.catch_alls {
			table.push((
				catch_all.signature.clone(),
				self.catch_all(&plan.name, &catch_all.generic),
			));
		}

		let dispatcher = self
			.state()
			.types
			.universe()
			.compile(&plan.name, table)?;
		// Self references hold the table weakly; `Compiled` owns it.
		this.bind(dispatcher.weak_callable());
		for (signature, cell) in pending {
			match dispatcher.find_weak(&signature) {
				Some(target) => {
					cell.bind(target);
				}
				None => tracing::warn!(
					operation = %plan.name,
					signature = %signature,
					"self reference left unbound"
				),
			}
		}
		Ok((dispatcher, returns))
	}
}

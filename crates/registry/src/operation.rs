//! Operation arena and the affects graph.
//!
//! # Role
//!
//! Operations are stored in a dense arena indexed by [`OpId`]. Each keeps its behaviors by
//! signature, an explicit [`Status`], and the last compiled dispatcher, which invalidation marks
//! stale but never discards.
//!
//! # Invariants
//!
//! - Every affects edge points at an existing operation.
//! - Invalidation visits each operation at most once per walk, so cycles in the graph terminate.
//! - Invalidating an operation mid-build only flags it; the build completes and the next read
//!   rebuilds it.

use indexmap::{IndexMap, IndexSet};
use polyop_dispatch::{ForwardRef, Signature, TypeName};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::behavior::{Behavior, Dependency};
use crate::returns::ReturnType;
use crate::{Dispatcher, RegistryError};

/// Dense operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OpId(u32);

impl OpId {
	fn index(self) -> usize {
		self.0 as usize
	}
}

/// One signature of an operation.
pub(crate) struct Slot {
	pub(crate) behavior: Behavior,
	pub(crate) uses: Vec<Dependency>,
	pub(crate) generic: bool,
	/// Instantiation types requested so far, in arrival order.
	pub(crate) instantiations: IndexSet<TypeName>,
	/// Set when the depth guard dropped an expansion of this slot.
	pub(crate) unresolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
	Stale,
	Building { restale: bool },
	Fresh,
}

pub(crate) struct Compiled {
	pub(crate) dispatcher: Dispatcher,
	pub(crate) returns: FxHashMap<Signature, ReturnType>,
}

pub(crate) struct Operation {
	pub(crate) name: TypeName,
	pub(crate) slots: IndexMap<Signature, Slot>,
	pub(crate) status: Status,
	pub(crate) compiled: Option<Compiled>,
	/// Self reference of the build in flight.
	pub(crate) building: Option<ForwardRef<RegistryError>>,
}

impl Operation {
	fn new(name: TypeName) -> Self {
		Self {
			name,
			slots: IndexMap::new(),
			status: Status::Stale,
			compiled: None,
			building: None,
		}
	}

	fn mark_stale(&mut self) -> bool {
		match self.status {
			Status::Fresh => {
				self.status = Status::Stale;
				true
			}
			Status::Building { .. } => {
				self.status = Status::Building { restale: true };
				true
			}
			Status::Stale => false,
		}
	}
}

#[derive(Default)]
pub(crate) struct Operations {
	ops: Vec<Operation>,
	by_name: FxHashMap<TypeName, OpId>,
	/// `key -> dependents`; keys are operation names or `:` + type name.
	affects: FxHashMap<TypeName, IndexSet<OpId>>,
}

/// Affects key of a type.
pub(crate) fn type_key(ty: &str) -> TypeName {
	TypeName::from(format!(":{ty}"))
}

impl Operations {
	pub(crate) fn id(&self, name: &str) -> Option<OpId> {
		self.by_name.get(name).copied()
	}

	pub(crate) fn get(&self, id: OpId) -> &Operation {
		&self.ops[id.index()]
	}

	pub(crate) fn get_mut(&mut self, id: OpId) -> &mut Operation {
		&mut self.ops[id.index()]
	}

	pub(crate) fn get_or_insert(&mut self, name: &str) -> OpId {
		if let Some(id) = self.id(name) {
			return id;
		}
		let id = OpId(self.ops.len() as u32);
		let name = TypeName::from(name);
		self.ops.push(Operation::new(name.clone()));
		self.by_name.insert(name, id);
		id
	}

	pub(crate) fn iter(&self) -> impl Iterator<Item = (OpId, &Operation)> + '_ {
		self.ops
			.iter()
			.enumerate()
			.map(|(i, op)| (OpId(i as u32), op))
	}

	pub(crate) fn add_edge(&mut self, key: TypeName, id: OpId) -> bool {
		self.affects.entry(key).or_default().insert(id)
	}

	/// Marks `id` and everything it transitively affects as stale.
	pub(crate) fn invalidate_op(&mut self, id: OpId) -> usize {
		let mut visited = FxHashSet::default();
		visited.insert(id);
		let marked = usize::from(self.get_mut(id).mark_stale());
		let name = self.get(id).name.clone();
		marked + self.walk(&mut visited, vec![name])
	}

	/// Marks every operation transitively affected by the given keys as stale.
	pub(crate) fn invalidate_keys(&mut self, keys: impl IntoIterator<Item = TypeName>) -> usize {
		let mut visited = FxHashSet::default();
		self.walk(&mut visited, keys.into_iter().collect())
	}

	fn walk(&mut self, visited: &mut FxHashSet<OpId>, mut work: Vec<TypeName>) -> usize {
		let mut marked = 0;
		while let Some(key) = work.pop() {
			let Some(successors) = self.affects.get(&key) else {
				continue;
			};
			for id in successors.clone() {
				if !visited.insert(id) {
					continue;
				}
				let op = self.get_mut(id);
				if op.mark_stale() {
					tracing::trace!(operation = %op.name, key = %key, "invalidated");
					marked += 1;
				}
				work.push(op.name.clone());
			}
		}
		marked
	}

	/// Operations with a slot whose expansion the depth guard dropped.
	pub(crate) fn unresolved(&self) -> Vec<OpId> {
		self.iter()
			.filter(|(_, op)| op.slots.values().any(|s| s.unresolved))
			.map(|(id, _)| id)
			.collect()
	}
}

//! Compiled dispatchers and forward references.

use std::cell::OnceCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::universe::{TypeEntry, TypeTest};
use crate::{ANY, Convert, DispatchError, Signature, TypeName, Value};

/// A callable implementation. Variadic tails arrive packed as one [`Value::Seq`].
pub type Callable<E> = Rc<dyn Fn(&[Value]) -> Result<Value, E>>;

pub(crate) struct ParamMatcher {
	pub(crate) slot: usize,
	pub(crate) test: TypeTest,
	pub(crate) conversions: Vec<(TypeTest, Convert)>,
}

impl ParamMatcher {
	fn accept(&self, value: &Value, convert: bool) -> Option<Value> {
		if (self.test)(value) {
			return Some(value.clone());
		}
		if !convert {
			return None;
		}
		self.conversions
			.iter()
			.find(|(from, _)| from(value))
			.map(|(_, c)| c(value))
	}
}

pub(crate) struct Entry<E> {
	pub(crate) signature: Signature,
	pub(crate) params: Vec<ParamMatcher>,
	pub(crate) call: Callable<E>,
}

impl<E> Entry<E> {
	/// Sort key: parameter priorities, then fixed arity before variadic.
	pub(crate) fn rank(&self) -> (Vec<usize>, bool) {
		(
			self.params.iter().map(|p| p.slot).collect(),
			self.signature.is_variadic(),
		)
	}

	/// Matches `args`, returning them packed for the entry's callable.
	fn accept(&self, args: &[Value], convert: bool) -> Option<Vec<Value>> {
		if !self.signature.accepts_arity(args.len()) {
			return None;
		}
		let fixed = if self.signature.is_variadic() {
			self.params.len() - 1
		} else {
			self.params.len()
		};

		let mut packed = Vec::with_capacity(self.params.len());
		for (matcher, arg) in self.params.iter().zip(&args[..fixed]) {
			packed.push(matcher.accept(arg, convert)?);
		}
		if self.signature.is_variadic() {
			let matcher = self.params.last()?;
			let rest = args[fixed..]
				.iter()
				.map(|arg| matcher.accept(arg, convert))
				.collect::<Option<Vec<_>>>()?;
			packed.push(Value::from(rest));
		}
		Some(packed)
	}
}

struct Inner<E> {
	name: TypeName,
	entries: Vec<Entry<E>>,
	types: Rc<[Rc<TypeEntry>]>,
}

/// One callable assembled from a signature table.
pub struct Dispatcher<E> {
	inner: Rc<Inner<E>>,
}

impl<E> Clone for Dispatcher<E> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<E> fmt::Debug for Dispatcher<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Dispatcher")
			.field("name", &self.inner.name)
			.field(
				"signatures",
				&self
					.inner
					.entries
					.iter()
					.map(|e| e.signature.to_string())
					.collect::<Vec<_>>(),
			)
			.finish()
	}
}

impl<E> Dispatcher<E>
where
	E: From<DispatchError> + 'static,
{
	pub(crate) fn new(name: &str, entries: Vec<Entry<E>>, types: Rc<[Rc<TypeEntry>]>) -> Self {
		Self {
			inner: Rc::new(Inner {
				name: TypeName::from(name),
				entries,
				types,
			}),
		}
	}

	/// Name the dispatcher was compiled under.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Calls the first entry accepting `args`, preferring entries that need no conversion.
	pub fn call(&self, args: &[Value]) -> Result<Value, E> {
		for convert in [false, true] {
			for entry in &self.inner.entries {
				if let Some(packed) = entry.accept(args, convert) {
					return (entry.call)(&packed);
				}
			}
		}
		Err(self.no_match(args).into())
	}

	/// Calls the entry compiled for exactly `signature`, converting arguments if needed.
	pub fn call_with(&self, signature: &Signature, args: &[Value]) -> Result<Value, E> {
		let packed = self
			.inner
			.entries
			.iter()
			.find(|e| &e.signature == signature)
			.and_then(|entry| {
				let packed = entry
					.accept(args, false)
					.or_else(|| entry.accept(args, true))?;
				Some((entry, packed))
			});
		match packed {
			Some((entry, packed)) => (entry.call)(&packed),
			None => Err(self.no_match(args).into()),
		}
	}

	/// Returns the entry compiled for exactly `signature`. The callable keeps the whole table
	/// alive, since entries may reach back into it.
	pub fn find(&self, signature: &Signature) -> Option<Callable<E>> {
		let index = self.position(signature)?;
		let this = self.clone();
		Some(Rc::new(move |args: &[Value]| {
			(this.inner.entries[index].call)(args)
		}))
	}

	/// Returns true if an entry was compiled for exactly `signature`.
	pub fn contains(&self, signature: &Signature) -> bool {
		self.position(signature).is_some()
	}

	fn position(&self, signature: &Signature) -> Option<usize> {
		self.inner
			.entries
			.iter()
			.position(|e| &e.signature == signature)
	}

	/// Signatures in dispatch order.
	pub fn signatures(&self) -> impl Iterator<Item = &Signature> + '_ {
		self.inner.entries.iter().map(|e| &e.signature)
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.inner.entries.len()
	}

	/// Returns true if the dispatcher has no entries.
	pub fn is_empty(&self) -> bool {
		self.inner.entries.is_empty()
	}

	/// Returns true if both handles share the same compiled table.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	/// Wraps the whole dispatcher as a [`Callable`].
	pub fn callable(&self) -> Callable<E> {
		let this = self.clone();
		Rc::new(move |args: &[Value]| this.call(args))
	}

	/// Like [`Dispatcher::callable`], but does not keep the table alive.
	///
	/// Meant for references from the table's own entries back into it. Calls after the last
	/// strong handle is dropped fail with [`DispatchError::Released`].
	pub fn weak_callable(&self) -> Callable<E> {
		let weak = Rc::downgrade(&self.inner);
		let name = self.inner.name.clone();
		Rc::new(move |args: &[Value]| {
			let inner = upgrade(&weak, &name)?;
			Self { inner }.call(args)
		})
	}

	/// Like [`Dispatcher::find`], but the returned callable does not keep the table alive.
	pub fn find_weak(&self, signature: &Signature) -> Option<Callable<E>> {
		let index = self.position(signature)?;
		let weak = Rc::downgrade(&self.inner);
		let name = self.inner.name.clone();
		Some(Rc::new(move |args: &[Value]| {
			let inner = upgrade(&weak, &name)?;
			(inner.entries[index].call)(args)
		}))
	}

	/// Runtime type name of `value` as seen by this dispatcher's snapshot.
	pub fn type_of(&self, value: &Value) -> &str {
		self.inner
			.types
			.iter()
			.find(|t| (t.test)(value))
			.map_or(ANY, |t| &*t.name)
	}

	fn no_match(&self, args: &[Value]) -> DispatchError {
		DispatchError::NoMatch {
			function: self.inner.name.to_string(),
			args: args.iter().map(|a| self.type_of(a).to_string()).collect(),
			signatures: self
				.inner
				.entries
				.iter()
				.map(|e| e.signature.to_string())
				.collect(),
		}
	}
}

fn upgrade<E>(weak: &Weak<Inner<E>>, name: &str) -> Result<Rc<Inner<E>>, E>
where
	E: From<DispatchError>,
{
	weak.upgrade().ok_or_else(|| {
		DispatchError::Released {
			function: name.to_string(),
		}
		.into()
	})
}

/// Single-assignment cell standing in for a callable that does not exist yet.
pub struct ForwardRef<E> {
	name: TypeName,
	cell: Rc<OnceCell<Callable<E>>>,
}

impl<E> Clone for ForwardRef<E> {
	fn clone(&self) -> Self {
		Self {
			name: self.name.clone(),
			cell: self.cell.clone(),
		}
	}
}

impl<E> ForwardRef<E>
where
	E: From<DispatchError> + 'static,
{
	/// Creates an unbound reference; `name` is used in the [`DispatchError::Unbound`] error.
	pub fn new(name: &str) -> Self {
		Self {
			name: TypeName::from(name),
			cell: Rc::new(OnceCell::new()),
		}
	}

	/// Binds the target. Returns `false` if the reference was already bound.
	pub fn bind(&self, target: Callable<E>) -> bool {
		self.cell.set(target).is_ok()
	}

	/// Returns true once [`ForwardRef::bind`] has succeeded.
	pub fn is_bound(&self) -> bool {
		self.cell.get().is_some()
	}

	/// Returns a callable that forwards to the bound target.
	pub fn callable(&self) -> Callable<E> {
		let name = self.name.clone();
		let cell = self.cell.clone();
		Rc::new(move |args: &[Value]| match cell.get() {
			Some(target) => target(args),
			None => Err(DispatchError::Unbound {
				function: name.to_string(),
			}
			.into()),
		})
	}
}

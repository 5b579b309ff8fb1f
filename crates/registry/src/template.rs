//! Template types and their lazy instantiation.
//!
//! A template `Base<T>` describes a family of concrete types. Members are materialized on
//! demand as `Base<arg>`, memoized by name, and refine the concrete `Base` type.
//!
//! # Invariants
//!
//! - An instantiation exists only if its argument exists; nested arguments are instantiated
//!   first.
//! - No instantiation is created whose argument is nested deeper than the deepest type observed
//!   at a call site (or the configured cap).
//! - `Base<S>` is prior to `Base<A>` whenever `S` is prior to `A` and a conversion for it can be
//!   produced.

use std::rc::Rc;

use polyop_dispatch::{ANY, Convert, TypeName, TypeTest, Value};

use crate::names::{self, SOURCE_PARAM};
use crate::registry::State;
use crate::types::TypeSpec;
use crate::RegistryError;

/// Builds the test of `Base<arg>` from the test of `arg`.
pub type TestFactory = Rc<dyn Fn(TypeTest) -> TypeTest>;

/// Infers the argument type of a base-type member.
pub type InferFn = Rc<dyn Fn(&Value, &Infer<'_>) -> TypeName>;

/// Builds a conversion into `Base<arg>` from the element conversion `U -> arg`.
pub type ConvertFactory = Rc<dyn Fn(Convert) -> Convert>;

/// Specification of a template type `Base<T>`.
#[derive(Clone)]
pub struct TemplateSpec {
	pub(crate) test: TestFactory,
	pub(crate) infer: Option<InferFn>,
	pub(crate) from: Vec<(TypeName, ConvertFactory)>,
	pub(crate) before: Vec<TypeName>,
}

impl TemplateSpec {
	/// Creates a template from its test factory. Values reaching the produced test already
	/// pass the base type's test.
	pub fn new(test: impl Fn(TypeTest) -> TypeTest + 'static) -> Self {
		Self {
			test: Rc::new(test),
			infer: None,
			from: Vec::new(),
			before: Vec::new(),
		}
	}

	/// Sets the argument inference used by `type_of` and by generic calls.
	pub fn infer(mut self, infer: impl Fn(&Value, &Infer<'_>) -> TypeName + 'static) -> Self {
		self.infer = Some(Rc::new(infer));
		self
	}

	/// Declares conversions into every instantiation.
	///
	/// `pattern` may mention the template parameter (replaced by the argument) and `U`, which
	/// ranges over every type prior to the argument. The factory receives the `U -> arg`
	/// conversion; patterns without `U` receive the identity.
	pub fn convert_from(
		mut self,
		pattern: &str,
		factory: impl Fn(Convert) -> Convert + 'static,
	) -> Self {
		self.from.push((TypeName::from(pattern), Rc::new(factory)));
		self
	}

	/// Asks every instantiation for priority over `other` if it is installed.
	pub fn before(mut self, other: &str) -> Self {
		self.before.push(TypeName::from(other));
		self
	}

	pub fn same_as(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.test, &other.test)
			&& match (&self.infer, &other.infer) {
				(Some(a), Some(b)) => Rc::ptr_eq(a, b),
				(None, None) => true,
				_ => false,
			} && self.before == other.before
			&& self.from.len() == other.from.len()
			&& self
				.from
				.iter()
				.zip(&other.from)
				.all(|((a, f), (b, g))| a == b && Rc::ptr_eq(f, g))
	}
}

/// Type queries available to [`TemplateSpec::infer`].
pub struct Infer<'a> {
	pub(crate) state: &'a State,
}

impl Infer<'_> {
	/// Runtime type of a value, inferring template arguments structurally.
	pub fn type_of(&self, value: &Value) -> TypeName {
		self.state.type_of(value)
	}

	/// Most specific common type, allowing conversions only when no strict join exists.
	pub fn join(&self, types: &[TypeName]) -> TypeName {
		self.state.join_lenient(types.iter().map(|t| &**t))
	}
}

/// Outcome of [`State::instantiate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Instantiation {
	Created(TypeName),
	Existing(TypeName),
	/// Refused by the depth guard; not an error.
	Declined,
}

impl Instantiation {
	pub(crate) fn name(&self) -> Option<&TypeName> {
		match self {
			Self::Created(name) | Self::Existing(name) => Some(name),
			Self::Declined => None,
		}
	}
}

fn identity() -> Convert {
	Rc::new(Value::clone)
}

impl State {
	/// Installs a template under `Base<T>`. Returns `false` for an identical re-install.
	pub(crate) fn install_template(
		&mut self,
		pattern: &str,
		spec: TemplateSpec,
	) -> Result<bool, RegistryError> {
		let base = self.template_base(pattern)?;
		if let Some(existing) = self.templates.get(base) {
			if existing.same_as(&spec) {
				return Ok(false);
			}
			return Err(RegistryError::TemplateConflict {
				name: pattern.to_string(),
			});
		}
		if !self.types.contains(base) {
			return Err(RegistryError::MissingTemplateBase {
				template: pattern.to_string(),
				base: base.to_string(),
			});
		}
		self.templates.insert(TypeName::from(base), spec);
		tracing::debug!(template = pattern, "installed template");
		Ok(true)
	}

	/// Splits `Base<T>` and checks the placeholder.
	pub(crate) fn template_base<'p>(&self, pattern: &'p str) -> Result<&'p str, RegistryError> {
		match names::split_instance(pattern) {
			Some((base, arg)) if arg == self.config.template_param && !base.contains('<') => {
				Ok(base)
			}
			_ => Err(RegistryError::InvalidTypeName {
				name: pattern.to_string(),
				reason: "template names have the form Base<T>",
			}),
		}
	}

	/// Returns true if `arg` may be used as a template argument under the depth guard.
	pub(crate) fn depth_allows(&self, arg: &str) -> bool {
		let depth = names::depth(arg);
		depth <= self.max_depth_seen && self.config.max_depth.is_none_or(|cap| depth < cap)
	}

	/// Returns true if `name` is installed, or could be instantiated from installed templates
	/// without consulting the depth guard.
	pub(crate) fn is_resolvable(&self, name: &str) -> bool {
		if self.types.contains(name) {
			return true;
		}
		match names::split_instance(name) {
			Some((base, arg)) => self.templates.contains_key(base) && self.is_resolvable(arg),
			None => false,
		}
	}

	/// Makes sure `name` exists, instantiating templates as needed.
	pub(crate) fn ensure_type(
		&mut self,
		name: &str,
		touched: &mut Vec<TypeName>,
	) -> Result<Instantiation, RegistryError> {
		if self.types.contains(name) {
			return Ok(Instantiation::Existing(TypeName::from(name)));
		}
		match names::split_instance(name) {
			Some((base, arg)) if self.templates.contains_key(base) => {
				self.instantiate(base, arg, touched)
			}
			_ => Err(RegistryError::UnknownType {
				name: name.to_string(),
			}),
		}
	}

	/// Materializes `base<arg>`, collecting every type whose orderings changed into `touched`.
	pub(crate) fn instantiate(
		&mut self,
		base: &str,
		arg: &str,
		touched: &mut Vec<TypeName>,
	) -> Result<Instantiation, RegistryError> {
		let name = names::instance_name(base, arg);
		if self.types.contains(&name) {
			return Ok(Instantiation::Existing(name));
		}
		let template = self
			.templates
			.get(base)
			.cloned()
			.ok_or_else(|| RegistryError::UnknownType {
				name: name.to_string(),
			})?;
		if let Instantiation::Declined = self.ensure_type(arg, touched)? {
			return Ok(Instantiation::Declined);
		}
		if !self.depth_allows(arg) {
			tracing::trace!(ty = %name, max_depth_seen = self.max_depth_seen, "declined instantiation");
			return Ok(Instantiation::Declined);
		}

		let Some(arg_test) = self.types.universe().test(arg) else {
			return Err(RegistryError::UnknownType {
				name: arg.to_string(),
			});
		};
		let param = self.config.template_param.clone();
		let mut spec = TypeSpec::from_test((template.test)(arg_test)).refines(base);
		for hint in &template.before {
			spec = spec.before(hint);
		}
		let siblings = self.instances_of(base);
		for (other, other_arg) in &siblings {
			if self.types.is_prior_to(arg, other_arg) {
				spec = spec.before(other);
			}
		}

		for (pattern, factory) in &template.from {
			if names::mentions(pattern, SOURCE_PARAM) {
				for source_arg in self.types.prior_types(arg) {
					let Some(convert) = self.element_conversion(&source_arg, arg) else {
						continue;
					};
					let source = names::substitute(
						&names::substitute(pattern, SOURCE_PARAM, &source_arg),
						&param,
						arg,
					);
					if source != name && self.types.contains(&source) {
						spec = spec.with_conversion(source, factory(convert));
					}
				}
			} else {
				let source = names::substitute(pattern, &param, arg);
				if source != name && self.types.contains(&source) {
					spec = spec.with_conversion(source, factory(identity()));
				}
			}
		}
		// Covariance: a member over a subtype is a member over the supertype as well.
		for sub in self.types.subtypes_of(arg).to_vec() {
			let source = names::instance_name(base, &sub);
			if self.types.contains(&source) && spec.converts_from(&source).is_none() {
				spec = spec.with_conversion(source, identity());
			}
		}

		touched.extend(self.types.install(
			&name,
			spec,
			Some((TypeName::from(base), TypeName::from(arg))),
		)?);

		// Conversions from the new member into existing members over later types.
		for (other, other_arg) in siblings {
			if !self.types.is_prior_to(arg, &other_arg) {
				continue;
			}
			let Some(convert) = self.sibling_conversion(&template, &param, arg, &other_arg)
			else {
				continue;
			};
			touched.extend(self.types.add_conversion(&name, &other, convert)?);
		}

		self.instantiations
			.entry(TypeName::from(base))
			.or_default()
			.push(name.clone());
		tracing::debug!(ty = %name, "instantiated template");
		Ok(Instantiation::Created(name))
	}

	/// Existing members of `base` with their arguments, in creation order.
	fn instances_of(&self, base: &str) -> Vec<(TypeName, TypeName)> {
		self.instantiations
			.get(base)
			.into_iter()
			.flatten()
			.filter_map(|inst| {
				let (_, arg) = self.types.record(inst)?.instance.clone()?;
				Some((inst.clone(), arg))
			})
			.collect()
	}

	/// Conversion of elements from `source` into `target`: identity for subtypes.
	fn element_conversion(&self, source: &str, target: &str) -> Option<Convert> {
		if self.types.is_subtype_of(source, target) {
			return Some(identity());
		}
		self.types.universe().conversion(source, target)
	}

	/// Conversion `base<arg> -> base<other_arg>` from a `Base<U>` pattern, or the identity when
	/// `arg` refines `other_arg`.
	fn sibling_conversion(
		&self,
		template: &TemplateSpec,
		param: &str,
		arg: &str,
		other_arg: &str,
	) -> Option<Convert> {
		let element = self.element_conversion(arg, other_arg)?;
		let from_pattern = template.from.iter().find(|(pattern, _)| {
			names::split_instance(pattern)
				.is_some_and(|(_, inner)| inner == SOURCE_PARAM && !names::mentions(pattern, param))
		});
		match from_pattern {
			Some((_, factory)) => Some(factory(element)),
			None if self.types.is_subtype_of(arg, other_arg) => Some(identity()),
			None => None,
		}
	}

	/// Runtime type of `value`: the first non-member type accepting it, with template
	/// arguments inferred structurally.
	pub(crate) fn type_of(&self, value: &Value) -> TypeName {
		for name in self.types.universe().names() {
			let Some(record) = self.types.record(name) else {
				continue;
			};
			if record.instance.is_some() || !(record.test)(value) {
				continue;
			}
			if let Some(infer) = self.templates.get(name).and_then(|t| t.infer.clone()) {
				let arg = infer(value, &Infer { state: self });
				if &*arg != ANY {
					return names::instance_name(name, &arg);
				}
			}
			return TypeName::from(name);
		}
		TypeName::from(ANY)
	}

	/// Strict join, retried with conversions when the strict one is [`ANY`].
	pub(crate) fn join_lenient<'a>(&self, types: impl Iterator<Item = &'a str> + Clone) -> TypeName {
		let strict = self.types.join_all(types.clone(), false);
		if &*strict != ANY {
			return strict;
		}
		self.types.join_all(types, true)
	}
}

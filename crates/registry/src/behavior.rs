//! Behaviors: declared dependencies plus an implementation factory.

use std::fmt;
use std::rc::Rc;

use polyop_dispatch::{Signature, TypeName, Value};
use rustc_hash::FxHashMap;

use crate::config::RegistryConfig;
use crate::returns::ReturnType;
use crate::{Callable, Registry, RegistryError};

/// Dependency token naming the registry's runtime configuration.
pub(crate) const CONFIG_TOKEN: &str = "config";

type Factory = dyn Fn(&Deps) -> Result<Implementation, RegistryError>;

struct BehaviorDef {
	uses: Vec<String>,
	does: Box<Factory>,
}

/// Declared dependencies plus the factory building an implementation from them.
///
/// Dependency tokens are `name`, `name(sig)`, `self`, `self(sig)`, `config` and the bare
/// template parameter, which requests the instantiation type. Identity is the shared handle: installing
/// a clone of the same behavior twice is a no-op.
#[derive(Clone)]
pub struct Behavior(Rc<BehaviorDef>);

impl Behavior {
	pub fn new<I, S>(
		uses: I,
		does: impl Fn(&Deps) -> Result<Implementation, RegistryError> + 'static,
	) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(Rc::new(BehaviorDef {
			uses: uses.into_iter().map(Into::into).collect(),
			does: Box::new(does),
		}))
	}

	/// A behavior without dependencies.
	pub fn leaf(f: impl Fn(&[Value]) -> Result<Value, RegistryError> + 'static) -> Self {
		let callable: Callable = Rc::new(f);
		Self::new(Vec::<String>::new(), move |_| {
			Ok(Implementation::from_callable(callable.clone()))
		})
	}

	/// Declared dependency tokens, as written.
	pub fn uses(&self) -> &[String] {
		&self.0.uses
	}

	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	pub(crate) fn build(&self, deps: &Deps) -> Result<Implementation, RegistryError> {
		(self.0.does)(deps)
	}
}

impl fmt::Debug for Behavior {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Behavior")
			.field("uses", &self.0.uses)
			.finish_non_exhaustive()
	}
}

/// A callable plus its optional return-type annotation.
#[derive(Clone)]
pub struct Implementation {
	pub(crate) callable: Callable,
	pub(crate) returns: Option<ReturnType>,
}

impl Implementation {
	pub fn new(f: impl Fn(&[Value]) -> Result<Value, RegistryError> + 'static) -> Self {
		Self::from_callable(Rc::new(f))
	}

	pub fn from_callable(callable: Callable) -> Self {
		Self {
			callable,
			returns: None,
		}
	}

	/// Annotates a fixed return type.
	pub fn returns(mut self, ty: &str) -> Self {
		self.returns = Some(ReturnType::Fixed(TypeName::from(ty)));
		self
	}

	/// Annotates a return type computed from the call signature.
	pub fn returns_with(
		mut self,
		f: impl Fn(&Signature, &Registry) -> TypeName + 'static,
	) -> Self {
		self.returns = Some(ReturnType::Computed(Rc::new(f)));
		self
	}
}

/// What a dependency token refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Target {
	/// The operation being compiled.
	SelfOp,
	/// Another operation.
	Op(TypeName),
	/// The instantiation type of a generic behavior.
	Param,
	/// The registry's runtime configuration.
	Config,
}

/// A parsed dependency token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Dependency {
	/// The token exactly as declared; implementations look dependencies up by it.
	pub(crate) token: String,
	pub(crate) target: Target,
	pub(crate) signature: Option<Signature>,
}

impl Dependency {
	/// Parses `name`, `name(sig)`, `self`, `self(sig)`, `config` or the bare template parameter.
	pub(crate) fn parse(token: &str, param: &str) -> Result<Self, &'static str> {
		let trimmed = token.trim();
		let (name, signature) = match trimmed.find('(') {
			Some(open) => {
				let inner = trimmed[open + 1..]
					.strip_suffix(')')
					.ok_or("missing closing parenthesis")?;
				let signature = Signature::parse(inner).map_err(|_| "malformed signature")?;
				(trimmed[..open].trim(), Some(signature))
			}
			None => (trimmed, None),
		};
		if name.is_empty() {
			return Err("empty operation name");
		}
		if name.chars().any(|c| matches!(c, '<' | '>' | ',' | '(' | ')') || c.is_whitespace()) {
			return Err("operation names cannot contain signature punctuation");
		}
		let target = if name == "self" {
			Target::SelfOp
		} else if name == CONFIG_TOKEN {
			if signature.is_some() {
				return Err("config takes no signature");
			}
			Target::Config
		} else if name == param {
			if signature.is_some() {
				return Err("the template parameter takes no signature");
			}
			Target::Param
		} else {
			Target::Op(TypeName::from(name))
		};
		Ok(Self {
			token: token.to_string(),
			target,
			signature,
		})
	}

	/// Copy with the template parameter substituted inside the signature.
	pub(crate) fn instantiate(&self, param: &str, with: &str) -> Self {
		Self {
			token: self.token.clone(),
			target: self.target.clone(),
			signature: self
				.signature
				.as_ref()
				.map(|s| crate::names::instantiate_signature(s, param, with)),
		}
	}
}

/// Resolved dependencies handed to a behavior factory.
pub struct Deps {
	pub(crate) resolved: FxHashMap<String, Callable>,
	pub(crate) param: Option<TypeName>,
	pub(crate) config: Option<RegistryConfig>,
}

impl Deps {
	/// Callable for a declared dependency token.
	pub fn get(&self, token: &str) -> Result<Callable, RegistryError> {
		self.resolved
			.get(token)
			.cloned()
			.ok_or_else(|| RegistryError::UndeclaredDependency {
				token: token.to_string(),
			})
	}

	/// Instantiation type of a generic behavior; `None` for concrete ones.
	pub fn param(&self) -> Option<&str> {
		self.param.as_deref()
	}

	/// Configuration at build time; requires a declared `config` dependency.
	pub fn config(&self) -> Result<&RegistryConfig, RegistryError> {
		self.config
			.as_ref()
			.ok_or_else(|| RegistryError::UndeclaredDependency {
				token: CONFIG_TOKEN.to_string(),
			})
	}
}

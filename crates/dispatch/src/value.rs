use std::fmt;
use std::rc::Rc;

/// A runtime value handed to dispatched callables.
///
/// Compound values defined by leaf packages (pairs, complex numbers, tuples, …) are
/// [`Value::Tagged`]: a constructor tag plus positional items. Payloads are reference counted
/// so cloning a value is cheap.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
	/// Absence of a value.
	#[default]
	Undefined,
	/// Boolean value.
	Bool(bool),
	/// Machine integer.
	Int(i64),
	/// Double precision float.
	Float(f64),
	/// String value.
	Str(Rc<str>),
	/// Ordered sequence; also carries packed variadic tails.
	Seq(Rc<[Value]>),
	/// Tagged compound value.
	Tagged(Rc<Tagged>),
}

/// Payload of [`Value::Tagged`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
	pub tag: Rc<str>,
	pub items: Vec<Value>,
}

impl Value {
	/// Builds a tagged compound value.
	pub fn tagged(tag: &str, items: impl IntoIterator<Item = Value>) -> Self {
		Value::Tagged(Rc::new(Tagged {
			tag: Rc::from(tag),
			items: items.into_iter().collect(),
		}))
	}

	/// Builds a sequence value.
	pub fn seq(items: impl IntoIterator<Item = Value>) -> Self {
		Value::Seq(items.into_iter().collect())
	}

	/// Returns the boolean value if this is a `Bool` variant.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(v) => Some(*v),
			_ => None,
		}
	}

	/// Returns the integer value if this is an `Int` variant.
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(v) => Some(*v),
			_ => None,
		}
	}

	/// Returns the float value if this is a `Float` variant.
	pub fn as_float(&self) -> Option<f64> {
		match self {
			Value::Float(v) => Some(*v),
			_ => None,
		}
	}

	/// Returns the string value if this is a `Str` variant.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(v) => Some(v),
			_ => None,
		}
	}

	/// Returns the items if this is a `Seq` variant.
	pub fn as_seq(&self) -> Option<&[Value]> {
		match self {
			Value::Seq(v) => Some(v),
			_ => None,
		}
	}

	/// Returns the payload if this is a `Tagged` variant.
	pub fn as_tagged(&self) -> Option<&Tagged> {
		match self {
			Value::Tagged(v) => Some(v),
			_ => None,
		}
	}

	/// Returns true if this is a tagged value carrying `tag`.
	pub fn is_tagged(&self, tag: &str) -> bool {
		self.as_tagged().is_some_and(|t| &*t.tag == tag)
	}

	/// Returns the items of a tagged value, or an empty slice.
	pub fn items(&self) -> &[Value] {
		match self {
			Value::Tagged(t) => &t.items,
			Value::Seq(items) => items,
			_ => &[],
		}
	}

	/// Returns the name of the variant.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Undefined => "undefined",
			Value::Bool(_) => "bool",
			Value::Int(_) => "int",
			Value::Float(_) => "float",
			Value::Str(_) => "string",
			Value::Seq(_) => "seq",
			Value::Tagged(_) => "tagged",
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Undefined => f.write_str("undefined"),
			Value::Bool(v) => write!(f, "{v}"),
			Value::Int(v) => write!(f, "{v}"),
			Value::Float(v) => write!(f, "{v:?}"),
			Value::Str(v) => write!(f, "{v:?}"),
			Value::Seq(items) => {
				f.write_str("[")?;
				write_items(f, items)?;
				f.write_str("]")
			}
			Value::Tagged(t) => {
				write!(f, "{}(", t.tag)?;
				write_items(f, &t.items)?;
				f.write_str(")")
			}
		}
	}
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
	for (i, item) in items.iter().enumerate() {
		if i > 0 {
			f.write_str(", ")?;
		}
		write!(f, "{item}")?;
	}
	Ok(())
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Float(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Str(Rc::from(v))
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Str(Rc::from(v))
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::Seq(Rc::from(v))
	}
}

//! Call signatures.
//!
//! A signature is an ordered list of parameter type names, optionally with a variadic last
//! parameter. The textual form is `A,B,...C`; the empty string is the nullary signature.
//! Commas inside `<…>` belong to the type name and never split parameters.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::DispatchError;

/// Interned-ish type name shared between signatures, tables and errors.
pub type TypeName = Rc<str>;

/// An ordered parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
	params: SmallVec<[TypeName; 4]>,
	variadic: bool,
}

impl Signature {
	/// Creates a signature from parameter type names.
	///
	/// `variadic` is ignored for an empty parameter list.
	pub fn new<I, S>(params: I, variadic: bool) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<TypeName>,
	{
		let params: SmallVec<[TypeName; 4]> = params.into_iter().map(Into::into).collect();
		let variadic = variadic && !params.is_empty();
		Self { params, variadic }
	}

	/// The signature taking no arguments.
	pub fn nullary() -> Self {
		Self::default()
	}

	/// Parses the textual form.
	pub fn parse(text: &str) -> Result<Self, DispatchError> {
		let invalid = |reason| DispatchError::InvalidSignature {
			signature: text.to_string(),
			reason,
		};

		let trimmed = text.trim();
		if trimmed.is_empty() {
			return Ok(Self::nullary());
		}

		let tokens = split_top_level(trimmed, ',');
		let last = tokens.len() - 1;
		let mut params = SmallVec::with_capacity(tokens.len());
		let mut variadic = false;
		for (i, token) in tokens.into_iter().enumerate() {
			let mut token = token.trim();
			if let Some(rest) = token.strip_prefix("...") {
				if i != last {
					return Err(invalid("only the last parameter may be variadic"));
				}
				variadic = true;
				token = rest.trim();
			}
			if token.is_empty() {
				return Err(invalid("empty parameter type"));
			}
			if token.chars().filter(|&c| c == '<').count()
				!= token.chars().filter(|&c| c == '>').count()
			{
				return Err(invalid("unbalanced angle brackets"));
			}
			params.push(TypeName::from(token));
		}

		Ok(Self { params, variadic })
	}

	/// Parameter type names in order; the last one repeats when variadic.
	pub fn params(&self) -> &[TypeName] {
		&self.params
	}

	/// Returns true if the last parameter accepts one or more trailing arguments.
	pub fn is_variadic(&self) -> bool {
		self.variadic
	}

	/// Number of declared parameters.
	pub fn arity(&self) -> usize {
		self.params.len()
	}

	/// Returns true if a call with `count` arguments fits this signature.
	pub fn accepts_arity(&self, count: usize) -> bool {
		if self.variadic {
			count >= self.params.len()
		} else {
			count == self.params.len()
		}
	}

	/// Returns the parameter type that receives argument `index`.
	pub fn param_for(&self, index: usize) -> Option<&TypeName> {
		match self.params.get(index) {
			Some(p) => Some(p),
			None if self.variadic => self.params.last(),
			None => None,
		}
	}

	/// Returns a copy with every parameter type rewritten by `f`.
	pub fn map_params(&self, mut f: impl FnMut(&str) -> TypeName) -> Self {
		Self {
			params: self.params.iter().map(|p| f(&**p)).collect(),
			variadic: self.variadic,
		}
	}
}

impl FromStr for Signature {
	type Err = DispatchError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for Signature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let last = self.params.len().saturating_sub(1);
		for (i, p) in self.params.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			if self.variadic && i == last {
				f.write_str("...")?;
			}
			f.write_str(p)?;
		}
		Ok(())
	}
}

/// Splits `text` on `sep`, ignoring separators nested inside `<…>`.
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut depth = 0usize;
	let mut start = 0;
	for (i, c) in text.char_indices() {
		match c {
			'<' => depth += 1,
			'>' => depth = depth.saturating_sub(1),
			c if c == sep && depth == 0 => {
				parts.push(&text[start..i]);
				start = i + c.len_utf8();
			}
			_ => {}
		}
	}
	parts.push(&text[start..]);
	parts
}

//! Structural helpers over textual type names such as `Pair<Tuple<Int>>`.

use polyop_dispatch::{ANY, Signature, TypeName};

/// Secondary placeholder in template conversion patterns; ranges over types prior to the argument.
pub(crate) const SOURCE_PARAM: &str = "U";

/// Number of template applications in `name`.
pub(crate) fn depth(name: &str) -> usize {
	name.matches('<').count()
}

/// Splits `Base<arg>` into base and argument.
pub(crate) fn split_instance(name: &str) -> Option<(&str, &str)> {
	let open = name.find('<')?;
	let inner = name.strip_suffix('>')?;
	let (base, arg) = (&name[..open], &inner[open + 1..]);
	if base.is_empty() || arg.is_empty() {
		return None;
	}
	Some((base, arg))
}

/// Template bases along the nesting of `name`, outermost first.
pub(crate) fn template_bases(name: &str) -> Vec<&str> {
	let mut bases = Vec::new();
	let mut rest = name;
	while let Some((base, arg)) = split_instance(rest) {
		bases.push(base);
		rest = arg;
	}
	bases
}

pub(crate) fn instance_name(base: &str, arg: &str) -> TypeName {
	TypeName::from(format!("{base}<{arg}>"))
}

fn is_delimiter(c: char) -> bool {
	matches!(c, '<' | '>' | ',')
}

/// Returns true if `name` mentions `param` as a whole identifier.
pub(crate) fn mentions(name: &str, param: &str) -> bool {
	name.split(is_delimiter).any(|token| token.trim() == param)
}

/// Replaces every whole-identifier occurrence of `param` in `name`.
pub(crate) fn substitute(name: &str, param: &str, with: &str) -> TypeName {
	if !mentions(name, param) {
		return TypeName::from(name);
	}
	let mut out = String::with_capacity(name.len() + with.len());
	let mut start = 0;
	for (i, c) in name.char_indices() {
		if is_delimiter(c) {
			push_token(&mut out, &name[start..i], param, with);
			out.push(c);
			start = i + c.len_utf8();
		}
	}
	push_token(&mut out, &name[start..], param, with);
	TypeName::from(out)
}

fn push_token(out: &mut String, token: &str, param: &str, with: &str) {
	if token.trim() == param {
		out.push_str(with);
	} else {
		out.push_str(token);
	}
}

/// Binds `param` by matching `pattern` against the concrete type `concrete`.
pub(crate) fn unify(pattern: &str, concrete: &str, param: &str) -> Option<TypeName> {
	if pattern == param {
		return Some(TypeName::from(concrete));
	}
	let (pattern_base, pattern_arg) = split_instance(pattern)?;
	let (base, arg) = split_instance(concrete)?;
	if pattern_base != base {
		return None;
	}
	unify(pattern_arg, arg, param)
}

/// Binds `param` by matching a generic signature against a concrete one.
pub(crate) fn unify_signature(
	pattern: &Signature,
	concrete: &Signature,
	param: &str,
) -> Option<TypeName> {
	if pattern.arity() != concrete.arity() || pattern.is_variadic() != concrete.is_variadic() {
		return None;
	}
	let mut bound: Option<TypeName> = None;
	for (p, c) in pattern.params().iter().zip(concrete.params()) {
		if !mentions(p, param) {
			if p != c {
				return None;
			}
			continue;
		}
		let binding = unify(p, c, param)?;
		match &bound {
			Some(existing) if *existing != binding => return None,
			Some(_) => {}
			None => bound = Some(binding),
		}
	}
	bound
}

pub(crate) fn is_generic(signature: &Signature, param: &str) -> bool {
	signature.params().iter().any(|p| mentions(p, param))
}

/// Substitutes `with` for `param` in every parameter.
pub(crate) fn instantiate_signature(signature: &Signature, param: &str, with: &str) -> Signature {
	signature.map_params(|p| substitute(p, param, with))
}

/// Parameter type of the catch-all entry: the bare parameter becomes [`ANY`],
/// a generic instance becomes its outermost base.
pub(crate) fn erase(token: &str, param: &str) -> TypeName {
	if token == param {
		return TypeName::from(ANY);
	}
	if !mentions(token, param) {
		return TypeName::from(token);
	}
	match split_instance(token) {
		Some((base, _)) => TypeName::from(base),
		None => TypeName::from(ANY),
	}
}

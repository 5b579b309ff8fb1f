//! Shared packages for registry tests: integers and floats, a `Pair<T>` template, and a few
//! operations over both.

use std::rc::Rc;

use crate::{
	Behavior, Convert, Deps, Implementation, Infer, Package, Registry, RegistryError, TemplateSpec,
	TypeName, TypeSpec, TypeTest, Value,
};

pub(crate) fn int(n: i64) -> Value {
	Value::Int(n)
}

pub(crate) fn float(x: f64) -> Value {
	Value::Float(x)
}

pub(crate) fn pair(a: Value, b: Value) -> Value {
	Value::tagged("Pair", [a, b])
}

fn int_of(v: &Value) -> Result<i64, RegistryError> {
	v.as_int()
		.ok_or_else(|| RegistryError::evaluation(format!("expected an integer, got {v}")))
}

fn float_of(v: &Value) -> Result<f64, RegistryError> {
	v.as_float()
		.ok_or_else(|| RegistryError::evaluation(format!("expected a float, got {v}")))
}

/// `NumInt` (integers) and `number` (floats, converting from `NumInt`), with `add`, `negate`,
/// `subtract`, `sum` and a recursive `factorial`.
pub(crate) fn numbers() -> Package {
	Package::new("numbers")
		.with_type(
			"number",
			TypeSpec::new(|v| v.as_float().is_some())
				.convert_from("NumInt", |v| Value::Float(v.as_int().unwrap_or_default() as f64)),
		)
		.with_type("NumInt", TypeSpec::new(|v| v.as_int().is_some()))
		.with_type("string", TypeSpec::new(|v| v.as_str().is_some()))
		.with_behavior(
			"add",
			"NumInt,NumInt",
			Behavior::new(Vec::<String>::new(), |_| {
				Ok(Implementation::new(|args: &[Value]| {
					Ok(int(int_of(&args[0])? + int_of(&args[1])?))
				})
				.returns("NumInt"))
			}),
		)
		.with_behavior(
			"add",
			"number,number",
			Behavior::new(Vec::<String>::new(), |_| {
				Ok(Implementation::new(|args: &[Value]| {
					Ok(float(float_of(&args[0])? + float_of(&args[1])?))
				})
				.returns("number"))
			}),
		)
		.with_behavior(
			"negate",
			"NumInt",
			Behavior::leaf(|args| Ok(int(-int_of(&args[0])?))),
		)
		.with_behavior(
			"negate",
			"number",
			Behavior::leaf(|args| Ok(float(-float_of(&args[0])?))),
		)
		.with_behavior(
			"subtract",
			"any,any",
			Behavior::new(["add", "negate"], |deps: &Deps| {
				let add = deps.get("add")?;
				let negate = deps.get("negate")?;
				Ok(Implementation::new(move |args: &[Value]| {
					let negated = negate(&args[1..2])?;
					add(&[args[0].clone(), negated])
				}))
			}),
		)
		.with_behavior(
			"sum",
			"...NumInt",
			Behavior::leaf(|args| {
				args[0]
					.items()
					.iter()
					.try_fold(0, |acc: i64, v| int_of(v).map(|n| acc + n))
					.map(int)
			}),
		)
		.with_behavior(
			"factorial",
			"NumInt",
			Behavior::new(["self"], |deps: &Deps| {
				let recur = deps.get("self")?;
				Ok(Implementation::new(move |args: &[Value]| {
					let n = int_of(&args[0])?;
					if n <= 1 {
						return Ok(int(1));
					}
					let rest = recur(&[int(n - 1)])?;
					Ok(int(n * int_of(&rest)?))
				}))
			}),
		)
}

pub(crate) fn pair_test(element: TypeTest) -> TypeTest {
	Rc::new(move |v: &Value| v.items().iter().all(|x| element(x)))
}

pub(crate) fn pair_infer(v: &Value, infer: &Infer<'_>) -> TypeName {
	let types: Vec<TypeName> = v.items().iter().map(|x| infer.type_of(x)).collect();
	infer.join(&types)
}

pub(crate) fn pair_convert(element: Convert) -> Convert {
	Rc::new(move |v: &Value| Value::tagged("Pair", v.items().iter().map(|x| element(x))))
}

/// Applies `op` to both components of two pairs.
pub(crate) fn zip_with(op: crate::Callable) -> Implementation {
	Implementation::new(move |args: &[Value]| {
		let (a, b) = (args[0].items(), args[1].items());
		Ok(pair(
			op(&[a[0].clone(), b[0].clone()])?,
			op(&[a[1].clone(), b[1].clone()])?,
		))
	})
}

/// The `Pair` base type, the `Pair<T>` template, and generic `add`, `negate`, `sum` and
/// `describe` over pairs. Install after [`numbers`].
pub(crate) fn pairs() -> Package {
	Package::new("pairs")
		.with_type(
			"Pair",
			TypeSpec::new(|v| v.is_tagged("Pair") && v.items().len() == 2),
		)
		.with_template(
			"Pair<T>",
			TemplateSpec::new(pair_test)
				.infer(pair_infer)
				.convert_from("Pair<U>", pair_convert),
		)
		.with_behavior(
			"add",
			"Pair<T>,Pair<T>",
			Behavior::new(["self(T,T)"], |deps: &Deps| {
				Ok(zip_with(deps.get("self(T,T)")?)
					.returns_with(|signature, _| signature.params()[0].clone()))
			}),
		)
		.with_behavior(
			"negate",
			"Pair<T>",
			Behavior::new(["negate(T)"], |deps: &Deps| {
				let negate = deps.get("negate(T)")?;
				Ok(Implementation::new(move |args: &[Value]| {
					let items = args[0].items();
					Ok(pair(
						negate(&items[0..1])?,
						negate(&items[1..2])?,
					))
				}))
			}),
		)
		.with_behavior(
			"sum",
			"...Pair<T>",
			Behavior::new(["add(Pair<T>,Pair<T>)"], |deps: &Deps| {
				let add = deps.get("add(Pair<T>,Pair<T>)")?;
				Ok(Implementation::new(move |args: &[Value]| {
					let items = args[0].items();
					let Some((first, rest)) = items.split_first() else {
						return Err(RegistryError::evaluation("sum of no pairs"));
					};
					rest.iter()
						.try_fold(first.clone(), |acc, v| add(&[acc, v.clone()]))
				}))
			}),
		)
		.with_behavior(
			"describe",
			"Pair<T>",
			Behavior::new(["T"], |deps: &Deps| {
				let element = deps.param().unwrap_or("?").to_string();
				Ok(Implementation::new(move |_: &[Value]| {
					Ok(Value::from(format!("pair of {element}")))
				}))
			}),
		)
}

/// Registry with [`numbers`] and [`pairs`] installed.
pub(crate) fn registry() -> Registry {
	let registry = Registry::new();
	registry.install(&numbers()).expect("numbers install");
	registry.install(&pairs()).expect("pairs install");
	registry
}

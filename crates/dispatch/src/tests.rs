use std::rc::Rc;

use pretty_assertions::assert_eq;

use super::*;

type Fn1 = Callable<DispatchError>;

fn is_int() -> TypeTest {
	Rc::new(|v: &Value| v.as_int().is_some())
}

fn is_float() -> TypeTest {
	Rc::new(|v: &Value| v.as_float().is_some())
}

fn is_str() -> TypeTest {
	Rc::new(|v: &Value| v.as_str().is_some())
}

fn constant(text: &'static str) -> Fn1 {
	Rc::new(move |_: &[Value]| Ok(Value::from(text)))
}

fn sig(text: &str) -> Signature {
	Signature::parse(text).expect("valid signature")
}

/// Universe with `int` before `float`, a string type, and an `int -> float` conversion.
fn numeric_universe() -> TypeUniverse {
	let mut universe = TypeUniverse::new();
	universe.add_type("float", is_float(), None).unwrap();
	universe.add_type("int", is_int(), Some("float")).unwrap();
	universe.add_type("string", is_str(), None).unwrap();
	universe
		.add_conversion(
			"int",
			"float",
			Rc::new(|v: &Value| Value::Float(v.as_int().unwrap_or_default() as f64)),
		)
		.unwrap();
	universe
}

#[test]
fn test_signature_parse_and_display() {
	let s = sig("Pair<Map<K,V>>, ...number");
	assert_eq!(s.arity(), 2);
	assert!(s.is_variadic());
	assert_eq!(&*s.params()[0], "Pair<Map<K,V>>");
	assert_eq!(s.to_string(), "Pair<Map<K,V>>,...number");
	assert_eq!(sig(&s.to_string()), s);

	assert_eq!(sig(""), Signature::nullary());
	assert_eq!(sig("  ").arity(), 0);
}

#[test]
fn test_signature_rejects_malformed_text() {
	for bad in ["...a,b", "a,,b", "a,", "Pair<a"] {
		assert!(
			matches!(
				Signature::parse(bad),
				Err(DispatchError::InvalidSignature { .. })
			),
			"{bad:?} should be rejected"
		);
	}
}

#[test]
fn test_signature_arity_rules() {
	let fixed = sig("a,b");
	assert!(fixed.accepts_arity(2));
	assert!(!fixed.accepts_arity(3));

	let variadic = sig("a,...b");
	assert!(!variadic.accepts_arity(1));
	assert!(variadic.accepts_arity(2));
	assert!(variadic.accepts_arity(5));
	assert_eq!(variadic.param_for(4).map(|p| &**p), Some("b"));
	assert_eq!(fixed.param_for(4), None);
}

#[test]
fn test_split_top_level_respects_nesting() {
	assert_eq!(split_top_level("A<B,C>,D", ','), vec!["A<B,C>", "D"]);
	assert_eq!(split_top_level("", ','), vec![""]);
}

#[test]
fn test_universe_ordering() {
	let universe = numeric_universe();
	assert_eq!(
		universe.names().collect::<Vec<_>>(),
		vec!["int", "float", "string", ANY]
	);
	assert_eq!(universe.type_of(&Value::Int(3)), "int");
	assert_eq!(universe.type_of(&Value::Bool(true)), ANY);
}

#[test]
fn test_universe_rejects_duplicates_and_unknown_hints() {
	let mut universe = numeric_universe();
	assert_eq!(
		universe.add_type("int", is_int(), None),
		Err(DispatchError::DuplicateType { name: "int".into() })
	);
	assert_eq!(
		universe.add_type("big", is_int(), Some("nope")),
		Err(DispatchError::UnknownType {
			name: "nope".into()
		})
	);
	let noop: Convert = Rc::new(|v: &Value| v.clone());
	assert_eq!(universe.add_conversion("int", "float", noop.clone()), Ok(false));
	assert!(universe.add_conversion("int", "nope", noop).is_err());
}

#[test]
fn test_convert_to() {
	let universe = numeric_universe();
	assert_eq!(
		universe.convert_to(&Value::Int(2), "float"),
		Some(Value::Float(2.0))
	);
	assert_eq!(
		universe.convert_to(&Value::Float(2.5), "float"),
		Some(Value::Float(2.5))
	);
	assert_eq!(universe.convert_to(&Value::from("x"), "float"), None);
}

#[test]
fn test_dispatch_prefers_higher_priority_types() {
	let universe = numeric_universe();
	let f = universe
		.compile::<DispatchError>(
			"f",
			[
				(sig("any"), constant("any")),
				(sig("float"), constant("float")),
				(sig("int"), constant("int")),
			],
		)
		.unwrap();

	assert_eq!(
		f.signatures().map(ToString::to_string).collect::<Vec<_>>(),
		vec!["int", "float", "any"]
	);
	assert_eq!(f.call(&[Value::Int(1)]), Ok(Value::from("int")));
	assert_eq!(f.call(&[Value::Float(1.0)]), Ok(Value::from("float")));
	assert_eq!(f.call(&[Value::Bool(false)]), Ok(Value::from("any")));
}

#[test]
fn test_dispatch_converts_only_after_exact_pass() {
	let universe = numeric_universe();
	let half: Fn1 = Rc::new(|args: &[Value]| Ok(Value::Float(args[0].as_float().unwrap_or_default() / 2.0)));
	let f = universe
		.compile::<DispatchError>("half", [(sig("float"), half)])
		.unwrap();
	assert_eq!(f.call(&[Value::Int(3)]), Ok(Value::Float(1.5)));
}

#[test]
fn test_variadic_tail_is_packed() {
	let universe = numeric_universe();
	let count: Fn1 = Rc::new(|args: &[Value]| Ok(Value::Int(args[1].items().len() as i64)));
	let f = universe
		.compile::<DispatchError>("count", [(sig("string,...int"), count)])
		.unwrap();
	assert_eq!(
		f.call(&[Value::from("x"), Value::Int(1), Value::Int(2)]),
		Ok(Value::Int(2))
	);
	assert!(f.call(&[Value::from("x")]).is_err());
}

#[test]
fn test_no_match_names_arguments_and_signatures() {
	let universe = numeric_universe();
	let f = universe
		.compile::<DispatchError>("f", [(sig("int,int"), constant("ok"))])
		.unwrap();
	let err = f.call(&[Value::Int(1), Value::from("x")]).unwrap_err();
	assert_eq!(
		err,
		DispatchError::NoMatch {
			function: "f".into(),
			args: vec!["int".into(), "string".into()],
			signatures: vec!["int,int".into()],
		}
	);
	assert!(err.to_string().contains("int, string"));
}

#[test]
fn test_compile_rejects_bad_tables() {
	let universe = numeric_universe();
	let dup = universe.compile::<DispatchError>(
		"f",
		[(sig("int"), constant("a")), (sig("int"), constant("b"))],
	);
	assert!(matches!(dup, Err(DispatchError::DuplicateSignature { .. })));

	let unknown = universe.compile::<DispatchError>("f", [(sig("Pair<int>"), constant("a"))]);
	assert!(matches!(unknown, Err(DispatchError::UnknownType { .. })));
}

#[test]
fn test_compiled_dispatcher_is_a_snapshot() {
	let mut universe = numeric_universe();
	let f = universe
		.compile::<DispatchError>("f", [(sig("any"), constant("any"))])
		.unwrap();
	universe
		.add_type("bool", Rc::new(|v: &Value| v.as_bool().is_some()), None)
		.unwrap();
	assert_eq!(f.type_of(&Value::Bool(true)), ANY);
	assert_eq!(universe.type_of(&Value::Bool(true)), "bool");
}

#[test]
fn test_find_extracts_exact_overload() {
	let universe = numeric_universe();
	let f = universe
		.compile::<DispatchError>(
			"f",
			[(sig("int"), constant("int")), (sig("float"), constant("float"))],
		)
		.unwrap();
	let float = f.find(&sig("float")).expect("float overload");
	assert_eq!(float(&[Value::Int(1)]), Ok(Value::from("float")));
	assert!(f.find(&sig("string")).is_none());

	assert_eq!(f.call_with(&sig("float"), &[Value::Int(1)]), Ok(Value::from("float")));
	assert!(matches!(
		f.call_with(&sig("int"), &[Value::from("x")]),
		Err(DispatchError::NoMatch { .. })
	));
}

#[test]
fn test_forward_ref_supports_recursion() {
	let universe = numeric_universe();
	let this = ForwardRef::<DispatchError>::new("fact");
	let recur = this.callable();
	let fact: Fn1 = Rc::new(move |args: &[Value]| {
		let n = args[0].as_int().unwrap_or_default();
		if n <= 1 {
			return Ok(Value::Int(1));
		}
		let rest = recur(&[Value::Int(n - 1)])?;
		Ok(Value::Int(n * rest.as_int().unwrap_or_default()))
	});

	let early = this.callable();
	assert_eq!(
		early(&[Value::Int(1)]),
		Err(DispatchError::Unbound {
			function: "fact".into()
		})
	);

	let f = universe
		.compile::<DispatchError>("fact", [(sig("int"), fact)])
		.unwrap();
	assert!(this.bind(f.callable()));
	assert!(this.is_bound());
	assert!(!this.bind(f.callable()));
	assert_eq!(f.call(&[Value::Int(5)]), Ok(Value::Int(120)));
}

#[test]
fn test_weak_self_reference_does_not_keep_table_alive() {
	let universe = numeric_universe();
	let this = ForwardRef::<DispatchError>::new("countdown");
	let recur = this.callable();
	let countdown: Fn1 = Rc::new(move |args: &[Value]| match args[0].as_int() {
		Some(n) if n > 0 => recur(&[Value::Int(n - 1)]),
		_ => Ok(Value::from("done")),
	});
	let f = universe
		.compile::<DispatchError>("countdown", [(sig("int"), countdown)])
		.unwrap();
	assert!(this.bind(f.weak_callable()));
	assert_eq!(f.call(&[Value::Int(3)]), Ok(Value::from("done")));

	let entry = f.find_weak(&sig("int")).unwrap();
	assert_eq!(entry(&[Value::Int(2)]), Ok(Value::from("done")));
	assert!(f.find_weak(&sig("float")).is_none());

	let outer = this.callable();
	drop(f);
	let released = Err(DispatchError::Released {
		function: "countdown".into(),
	});
	assert_eq!(outer(&[Value::Int(1)]), released);
	assert_eq!(entry(&[Value::Int(1)]), released);
}

#[test]
fn test_value_display() {
	let v = Value::tagged("Pair", [Value::Int(1), Value::Float(2.0)]);
	assert_eq!(v.to_string(), "Pair(1, 2.0)");
	assert!(v.is_tagged("Pair"));
	assert_eq!(Value::seq([Value::Bool(true)]).to_string(), "[true]");
}

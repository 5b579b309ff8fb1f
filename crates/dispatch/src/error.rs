/// Errors raised while building or calling a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
	/// A signature string could not be parsed.
	#[error("invalid signature {signature:?}: {reason}")]
	InvalidSignature {
		signature: String,
		reason: &'static str,
	},

	/// A type name was added to the universe twice.
	#[error("type {name} is already defined")]
	DuplicateType { name: String },

	/// A signature or conversion mentions a type the universe does not know.
	#[error("unknown type {name}")]
	UnknownType { name: String },

	/// The same signature appeared twice in one table.
	#[error("{function}: signature {signature} listed twice")]
	DuplicateSignature { function: String, signature: String },

	/// No entry accepts the arguments, even after conversions.
	#[error(
		"{function}: no signature matches arguments ({}); known signatures: {}",
		args.join(", "),
		signatures.join("; ")
	)]
	NoMatch {
		function: String,
		/// Runtime type of each argument.
		args: Vec<String>,
		signatures: Vec<String>,
	},

	/// A forward reference was invoked before its target was bound.
	#[error("{function} was called before its definition was bound")]
	Unbound { function: String },

	/// A weak reference outlived the dispatcher it points into.
	#[error("{function} was called after its dispatcher was released")]
	Released { function: String },
}

use polyop_dispatch::DispatchError;

/// Coarse classification of a [`RegistryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Conflicting or malformed definitions; never recovered silently.
	Config,
	/// No common type exists for a generic call.
	Type,
	/// No signature matches a call, even after conversions.
	Dispatch,
	/// A behavior cannot be wired up as declared.
	Implementation,
	/// Raised by a leaf implementation while computing a value.
	Evaluation,
}

/// Errors raised by the registry while installing, compiling or calling operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	/// A type name is already installed with a different specification.
	#[error("type {name} is already installed with a different specification")]
	TypeConflict { name: String },

	/// A template for the same base is already installed with a different specification.
	#[error("template {name} is already installed with a different specification")]
	TemplateConflict { name: String },

	/// A signature of an operation already holds a different behavior.
	#[error("{operation}: signature {signature} already has a different behavior")]
	SignatureConflict { operation: String, signature: String },

	/// A type name is malformed or reserved.
	#[error("invalid type name {name:?}: {reason}")]
	InvalidTypeName { name: String, reason: &'static str },

	/// An operation name is reserved by the registry.
	#[error("operation name {name:?} is reserved")]
	ReservedName { name: String },

	/// A refined supertype is not installed.
	#[error("type {name} refines unknown type {supertype}")]
	UnknownSupertype { name: String, supertype: String },

	/// A template names a base type that is not installed.
	#[error("template {template} requires base type {base} to be installed first")]
	MissingTemplateBase { template: String, base: String },

	/// A type declares a conversion from one of its own subtypes.
	#[error("conversion from {from} to its supertype {to} contradicts refinement")]
	ConversionToSupertype { from: String, to: String },

	/// A type or template is referenced but unknown.
	#[error("unknown type {name}")]
	UnknownType { name: String },

	/// A dependency token cannot be parsed.
	#[error("{operation}({signature}): invalid dependency {token:?}: {reason}")]
	InvalidDependency {
		operation: String,
		signature: String,
		token: String,
		reason: &'static str,
	},

	/// Configuration values are out of range.
	#[error("invalid registry configuration: {reason}")]
	InvalidConfig { reason: &'static str },

	/// Configuration text could not be decoded.
	#[error("cannot decode registry configuration: {0}")]
	ConfigDecode(#[from] toml::de::Error),

	/// Every signature of an operation references unknown types.
	#[error("{operation}: no usable signatures; rejected: {}", rejected.join("; "))]
	NoUsableSignatures {
		operation: String,
		rejected: Vec<String>,
	},

	/// No operation with this name is installed.
	#[error("unknown operation {name}")]
	UnknownOperation { name: String },

	/// An implementation asked for a dependency it did not declare.
	#[error("dependency {token:?} was not declared")]
	UndeclaredDependency { token: String },

	/// A partial self-reference names an overload that cannot be produced.
	#[error("{operation}: cannot resolve self reference to signature {signature}")]
	UnresolvedSelfReference { operation: String, signature: String },

	/// A dependency names an overload another operation cannot produce.
	#[error("{operation}: no overload compatible with {signature}")]
	UnresolvedOverload { operation: String, signature: String },

	/// An operation was read while its own build was still running.
	#[error("{operation} was requested while it is being compiled")]
	BuildInProgress { operation: String },

	/// No common type exists for the arguments of a generic call.
	#[error(
		"{operation}: no common type for arguments ({}); inferred {}",
		args.join(", "),
		types.join(", ")
	)]
	NoJoin {
		operation: String,
		args: Vec<String>,
		types: Vec<String>,
	},

	/// A dispatcher callable outlived the registry that compiled it.
	#[error("{operation} was called after its registry was dropped")]
	Detached { operation: String },

	/// Error from the dispatch layer.
	#[error(transparent)]
	Dispatch(#[from] DispatchError),

	/// Error raised by a leaf implementation.
	#[error("{0}")]
	Evaluation(String),
}

impl RegistryError {
	/// Wraps a failure raised inside a leaf implementation.
	pub fn evaluation(message: impl Into<String>) -> Self {
		Self::Evaluation(message.into())
	}

	/// Classifies the error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::TypeConflict { .. }
			| Self::TemplateConflict { .. }
			| Self::SignatureConflict { .. }
			| Self::InvalidTypeName { .. }
			| Self::ReservedName { .. }
			| Self::UnknownSupertype { .. }
			| Self::MissingTemplateBase { .. }
			| Self::ConversionToSupertype { .. }
			| Self::UnknownType { .. }
			| Self::InvalidDependency { .. }
			| Self::InvalidConfig { .. }
			| Self::ConfigDecode(_)
			| Self::NoUsableSignatures { .. }
			| Self::UnknownOperation { .. } => ErrorKind::Config,
			Self::NoJoin { .. } => ErrorKind::Type,
			Self::Dispatch(DispatchError::NoMatch { .. }) => ErrorKind::Dispatch,
			Self::Dispatch(_) => ErrorKind::Implementation,
			Self::UndeclaredDependency { .. }
			| Self::UnresolvedSelfReference { .. }
			| Self::UnresolvedOverload { .. }
			| Self::BuildInProgress { .. }
			| Self::Detached { .. } => ErrorKind::Implementation,
			Self::Evaluation(_) => ErrorKind::Evaluation,
		}
	}

	/// Returns true for static configuration errors.
	pub fn is_config(&self) -> bool {
		self.kind() == ErrorKind::Config
	}
}

//! Registry configuration.

use serde::Deserialize;

use crate::RegistryError;

/// Tunables of one [`crate::Registry`].
///
/// Every field has a default, so an empty TOML document is a valid configuration:
///
/// ```toml
/// label = "numbers"
/// template_param = "T"
/// initial_depth = 0
/// max_depth = 4
/// epsilon = 1e-12
/// predictable = false
/// ```
///
/// `epsilon` and `predictable` are runtime values: behaviors read them through the `config`
/// dependency, and [`crate::Registry::update_config`] recompiles only those behaviors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
	/// Name used in log records.
	pub label: String,
	/// Placeholder standing for the template argument in signatures and template names.
	pub template_param: String,
	/// Nesting depth treated as already observed before any call.
	pub initial_depth: usize,
	/// Hard cap on the nesting depth of instantiated types.
	pub max_depth: Option<usize>,
	/// Relative tolerance for approximate comparisons.
	pub epsilon: f64,
	/// Prefer results whose type depends only on argument types.
	pub predictable: bool,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			label: "polyop".to_string(),
			template_param: "T".to_string(),
			initial_depth: 0,
			max_depth: None,
			epsilon: 1e-12,
			predictable: false,
		}
	}
}

impl RegistryConfig {
	/// Decodes and validates a TOML document.
	pub fn from_toml_str(text: &str) -> Result<Self, RegistryError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks field values that the decoder cannot express.
	pub fn validate(&self) -> Result<(), RegistryError> {
		let param = self.template_param.as_str();
		if param.is_empty() || !param.chars().all(|c| c.is_ascii_alphanumeric()) {
			return Err(RegistryError::InvalidConfig {
				reason: "template_param must be a non-empty alphanumeric name",
			});
		}
		if param == "U" {
			return Err(RegistryError::InvalidConfig {
				reason: "template_param may not be the conversion placeholder U",
			});
		}
		if let Some(cap) = self.max_depth {
			if cap < self.initial_depth {
				return Err(RegistryError::InvalidConfig {
					reason: "max_depth must not be below initial_depth",
				});
			}
		}
		if !self.epsilon.is_finite() || self.epsilon < 0.0 {
			return Err(RegistryError::InvalidConfig {
				reason: "epsilon must be a finite non-negative number",
			});
		}
		Ok(())
	}
}

//! Declarative claim requirements and their evaluation.
//!
//! A requirement tree is built once from the `require` configuration. Claim names combine with AND;
//! the requirements listed for one claim combine with OR. `$and` and `$or` keys compose explicitly,
//! evaluating every sub-requirement against the same claim value.

// std
use std::collections::BTreeMap;
// crates.io
use serde_json::{Map, Number, Value};
// self
use crate::{
	_prelude::*,
	glob,
	template::{Template, TemplateVariables},
};

const OPERATOR_AND: &str = "$and";
const OPERATOR_OR: &str = "$or";

/// Reason a claim set failed its requirements.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
	/// A required claim is absent from the token.
	#[error("claim is not present: {0}")]
	Missing(String),
	/// A claim is present but satisfies none of its requirements.
	#[error("claim is not valid: {0}")]
	Invalid(String),
}

/// Requirement applied to the value found under an object claim's matching key.
#[derive(Debug)]
pub enum Nested {
	/// Acceptable values; any one of them granted satisfies the requirement.
	Values(Vec<Value>),
	/// Requirements evaluated recursively against the nested value.
	Tree(ClaimRequirements),
}

/// Single rule a claim value must satisfy.
#[derive(Debug)]
pub enum Requirement {
	/// Literal value.
	Value {
		/// Required value.
		value: Value,
		/// Requirement on the nested value of an object claim.
		nested: Option<Nested>,
	},
	/// Value produced per request by expanding a template.
	Template {
		/// Template producing the required string.
		template: Template,
		/// Requirement on the nested value of an object claim.
		nested: Option<Nested>,
	},
	/// Every sub-requirement must match.
	All(Vec<Requirement>),
	/// At least one sub-requirement must match.
	Any(Vec<Requirement>),
}
impl Requirement {
	/// Build a leaf requirement; strings with interpolation markers become templates.
	pub fn leaf(value: Value, nested: Option<Nested>) -> Result<Self> {
		match value {
			Value::String(text) if Template::is_template(&text) =>
				Ok(Self::Template { template: Template::new(&text)?, nested }),
			value => Ok(Self::Value { value, nested }),
		}
	}

	/// Whether `claim` satisfies this requirement.
	pub fn evaluate(&self, claim: &Value, variables: &TemplateVariables) -> bool {
		match self {
			Self::Value { value, nested } => matches(value, nested.as_ref(), claim, variables),
			Self::Template { template, nested } => match template.render(variables) {
				Ok(rendered) =>
					matches(&Value::String(rendered), nested.as_ref(), claim, variables),
				Err(err) => {
					tracing::warn!(
						template = template.source(),
						error = %err,
						"failed to expand requirement template"
					);

					false
				},
			},
			Self::All(requirements) =>
				requirements.iter().all(|requirement| requirement.evaluate(claim, variables)),
			Self::Any(requirements) =>
				requirements.iter().any(|requirement| requirement.evaluate(claim, variables)),
		}
	}
}

/// Alternative requirements for one claim; any one satisfies it.
#[derive(Debug, Default)]
pub struct ClaimRequirements(Vec<Requirement>);
impl ClaimRequirements {
	/// Build from a configured value: a list of alternatives, an object of keyed requirements, or a
	/// single scalar.
	pub fn build(value: &Value) -> Result<Self> {
		build_list(value).map(Self)
	}

	/// Whether any requirement is satisfied by `claim`.
	pub fn evaluate(&self, claim: &Value, variables: &TemplateVariables) -> bool {
		self.0.iter().any(|requirement| requirement.evaluate(claim, variables))
	}

	/// Number of alternatives.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether no alternative is configured.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Requirements for every configured claim; all must be satisfied.
#[derive(Debug, Default)]
pub struct Requirements(BTreeMap<String, ClaimRequirements>);
impl Requirements {
	/// Build the requirement tree from the `require` configuration.
	pub fn build(require: &Map<String, Value>) -> Result<Self> {
		require
			.iter()
			.map(|(claim, value)| Ok((claim.clone(), ClaimRequirements::build(value)?)))
			.collect::<Result<_>>()
			.map(Self)
	}

	/// Whether no claim is required.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Check `claims` against every configured claim, reporting the first failure.
	pub fn validate(
		&self,
		claims: &Map<String, Value>,
		variables: &TemplateVariables,
	) -> std::result::Result<(), ClaimError> {
		for (claim, requirements) in &self.0 {
			let Some(value) = claims.get(claim) else {
				return Err(ClaimError::Missing(claim.clone()));
			};

			if !requirements.evaluate(value, variables) {
				return Err(ClaimError::Invalid(claim.clone()));
			}
		}

		Ok(())
	}
}

fn build_list(value: &Value) -> Result<Vec<Requirement>> {
	match value {
		Value::Array(items) => items
			.iter()
			.map(|item| match item {
				Value::Object(entries) => build_entries(entries).map(Requirement::Any),
				item => Requirement::leaf(item.clone(), None),
			})
			.collect(),
		Value::Object(entries) => build_entries(entries),
		value => Ok(vec![Requirement::leaf(value.clone(), None)?]),
	}
}

fn build_entries(entries: &Map<String, Value>) -> Result<Vec<Requirement>> {
	entries
		.iter()
		.map(|(key, value)| match key.as_str() {
			OPERATOR_AND => build_list(value).map(Requirement::All),
			OPERATOR_OR => build_list(value).map(Requirement::Any),
			operator if operator.starts_with('$') => Err(Error::Validation {
				field: "require",
				reason: format!("Unknown operator {operator:?}."),
			}),
			key => Requirement::leaf(Value::String(key.to_owned()), build_nested(value)?),
		})
		.collect()
}

fn build_nested(value: &Value) -> Result<Option<Nested>> {
	Ok(match value {
		Value::Null => None,
		Value::Object(entries) => Some(Nested::Tree(ClaimRequirements(build_entries(entries)?))),
		Value::Array(values) => Some(Nested::Values(values.clone())),
		value => Some(Nested::Values(vec![value.clone()])),
	})
}

fn matches(
	required: &Value,
	nested: Option<&Nested>,
	claim: &Value,
	variables: &TemplateVariables,
) -> bool {
	match claim {
		Value::Array(items) => items.iter().any(|item| matches(required, nested, item, variables)),
		Value::Object(entries) => entries.iter().any(|(key, value)| {
			matches_string(required, key) && matches_nested(nested, value, variables)
		}),
		Value::String(text) => matches_string(required, text),
		Value::Number(number) => matches_number(required, number),
		claim => equal(claim, required),
	}
}

fn matches_nested(nested: Option<&Nested>, value: &Value, variables: &TemplateVariables) -> bool {
	match nested {
		None => true,
		Some(Nested::Tree(requirements)) => requirements.evaluate(value, variables),
		Some(Nested::Values(required)) => {
			let supplied = match value {
				Value::Array(items) => items.as_slice(),
				value => std::slice::from_ref(value),
			};

			required.iter().any(|required| supplied.iter().any(|supplied| equal(required, supplied)))
		},
	}
}

// Either side may carry the wildcard; a bare domain also accepts the `*.` grant of itself.
fn matches_string(required: &Value, claim: &str) -> bool {
	let Value::String(required) = required else {
		return false;
	};

	glob::matches(claim, required)
		|| glob::matches(required, claim)
		|| claim.strip_prefix("*.") == Some(required.as_str())
}

fn matches_number(required: &Value, claim: &Number) -> bool {
	let Value::Number(required) = required else {
		tracing::debug!(
			required = %required,
			claim = %claim,
			"unsupported requirement type for numeric claim"
		);

		return false;
	};

	if required.is_f64() {
		claim.as_f64() == required.as_f64()
	} else {
		equal_integers(required, claim)
	}
}

fn equal_integers(left: &Number, right: &Number) -> bool {
	match (left.as_i64(), right.as_i64()) {
		(Some(left), Some(right)) => left == right,
		_ => left.as_u64().is_some() && left.as_u64() == right.as_u64(),
	}
}

fn equal(left: &Value, right: &Value) -> bool {
	match (left, right) {
		(Value::Number(left), Value::Number(right)) =>
			if left.is_f64() || right.is_f64() {
				left.as_f64() == right.as_f64()
			} else {
				equal_integers(left, right)
			},
		(Value::Array(left), Value::Array(right)) =>
			left.len() == right.len()
				&& left.iter().zip(right).all(|(left, right)| equal(left, right)),
		(Value::Object(left), Value::Object(right)) =>
			left.len() == right.len()
				&& left.iter().all(|(key, left)| {
					right.get(key).is_some_and(|right| equal(left, right))
				}),
		(left, right) => left == right,
	}
}

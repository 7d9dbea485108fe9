//! Method signatures.
//!
//! Methods are addressed by signature, `name(type,type,…)`. Parsing
//! normalizes whitespace so `add( int, int )` and `add(int,int)` address
//! the same method.

use std::fmt;
use std::str::FromStr;

/// Parsed method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
	name: String,
	params: Vec<String>,
}

/// Reason a signature string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
	/// No `(` … `)` parameter list.
	#[error("missing parameter list in '{0}'")]
	MissingParens(String),
	/// Method name is empty or not an identifier.
	#[error("invalid method name in '{0}'")]
	InvalidName(String),
	/// A parameter type is empty, e.g. `f(int,)`.
	#[error("empty parameter type in '{0}'")]
	EmptyParameter(String),
}

impl MethodSignature {
	/// Method name without the parameter list.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Parameter type names.
	pub fn params(&self) -> &[String] {
		&self.params
	}

	/// Number of parameters.
	pub fn arity(&self) -> usize {
		self.params.len()
	}
}

impl FromStr for MethodSignature {
	type Err = SignatureError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();
		let (name, rest) = trimmed
			.split_once('(')
			.ok_or_else(|| SignatureError::MissingParens(s.to_string()))?;
		let inner = rest
			.strip_suffix(')')
			.ok_or_else(|| SignatureError::MissingParens(s.to_string()))?;

		let name = name.trim();
		let valid_name = name
			.chars()
			.next()
			.is_some_and(|c| c.is_alphabetic() || c == '_')
			&& name.chars().all(|c| c.is_alphanumeric() || c == '_');
		if !valid_name {
			return Err(SignatureError::InvalidName(s.to_string()));
		}

		let params = if inner.trim().is_empty() {
			Vec::new()
		} else {
			inner
				.split(',')
				.map(|p| {
					let p: String = p.split_whitespace().collect::<Vec<_>>().join(" ");
					if p.is_empty() {
						Err(SignatureError::EmptyParameter(s.to_string()))
					} else {
						Ok(p)
					}
				})
				.collect::<Result<Vec<_>, _>>()?
		};

		Ok(Self {
			name: name.to_string(),
			params,
		})
	}
}

impl fmt::Display for MethodSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({})", self.name, self.params.join(","))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_no_params() {
		let sig: MethodSignature = "incX()".parse().unwrap();
		assert_eq!(sig.name(), "incX");
		assert_eq!(sig.arity(), 0);
		assert_eq!(sig.to_string(), "incX()");
	}

	#[test]
	fn test_parse_normalizes_whitespace() {
		let sig: MethodSignature = "  add( int , unsigned  int )".parse().unwrap();
		assert_eq!(sig.params(), ["int", "unsigned int"]);
		assert_eq!(sig.to_string(), "add(int,unsigned int)");
	}

	#[test]
	fn test_parse_rejects_malformed() {
		assert_eq!(
			"incX".parse::<MethodSignature>(),
			Err(SignatureError::MissingParens("incX".to_string()))
		);
		assert!(matches!(
			"(int)".parse::<MethodSignature>(),
			Err(SignatureError::InvalidName(_))
		));
		assert!(matches!(
			"9lives()".parse::<MethodSignature>(),
			Err(SignatureError::InvalidName(_))
		));
		assert!(matches!(
			"f(int,)".parse::<MethodSignature>(),
			Err(SignatureError::EmptyParameter(_))
		));
	}

	#[test]
	fn test_error_messages_name_input() {
		let err = "f(int,)".parse::<MethodSignature>().unwrap_err();
		assert_eq!(err.to_string(), "empty parameter type in 'f(int,)'");
		let err: Box<dyn std::error::Error> = Box::new(SignatureError::MissingParens("g".into()));
		assert_eq!(err.to_string(), "missing parameter list in 'g'");
	}
}

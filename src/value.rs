//! The value a caller stores under a key: either a raw byte sequence or a
//! JSON-shaped structured value (null, bool, integer, float, string, array,
//! object). The discriminator byte in the data-file frame (0 = structured,
//! 1 = bytes) mirrors this split.

use crate::error::{Error, Result};
use std::fmt;

/// Discriminator written just before the compressed payload of a frame.
pub const DISCRIMINATOR_STRUCTURED: u8 = 0;
pub const DISCRIMINATOR_BYTES: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Bytes(Vec<u8>),
	Json(serde_json::Value),
}

impl Value {
	pub fn discriminator(&self) -> u8 {
		match self {
			Value::Bytes(_) => DISCRIMINATOR_BYTES,
			Value::Json(_) => DISCRIMINATOR_STRUCTURED,
		}
	}

	/// Canonical textual (UTF-8 JSON) or raw encoding of this value, ready
	/// to be handed to the compression layer.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		match self {
			Value::Bytes(b) => Ok(b.clone()),
			Value::Json(v) => serde_json::to_vec(v)
				.map_err(|e| Error::CorruptPayload(format!("failed to encode value: {}", e))),
		}
	}

	/// Inverse of `to_bytes`, given the discriminator that was stored
	/// alongside the frame.
	pub fn from_bytes(discriminator: u8, bytes: Vec<u8>) -> Result<Value> {
		match discriminator {
			DISCRIMINATOR_BYTES => Ok(Value::Bytes(bytes)),
			DISCRIMINATOR_STRUCTURED => {
				let v: serde_json::Value = serde_json::from_slice(&bytes)
					.map_err(|e| Error::CorruptPayload(format!("failed to decode value: {}", e)))?;
				Ok(Value::Json(v))
			}
			other => Err(Error::CorruptRecord(format!("invalid payload discriminator {}", other))),
		}
	}

	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self {
			Value::Bytes(b) => Some(b),
			Value::Json(_) => None,
		}
	}

	pub fn as_json(&self) -> Option<&serde_json::Value> {
		match self {
			Value::Bytes(_) => None,
			Value::Json(v) => Some(v),
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Bytes(b) => write!(f, "<{} raw bytes>", b.len()),
			Value::Json(v) => write!(f, "{}", v),
		}
	}
}

impl From<Vec<u8>> for Value {
	fn from(b: Vec<u8>) -> Value {
		Value::Bytes(b)
	}
}

impl From<&[u8]> for Value {
	fn from(b: &[u8]) -> Value {
		Value::Bytes(b.to_vec())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Value {
		Value::Json(serde_json::Value::String(s))
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Value {
		Value::Json(serde_json::Value::String(s.to_owned()))
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Value {
		Value::Json(serde_json::Value::Bool(b))
	}
}

impl From<i64> for Value {
	fn from(n: i64) -> Value {
		Value::Json(serde_json::Value::from(n))
	}
}

impl From<f64> for Value {
	fn from(n: f64) -> Value {
		Value::Json(serde_json::Value::from(n))
	}
}

impl From<serde_json::Value> for Value {
	fn from(v: serde_json::Value) -> Value {
		Value::Json(v)
	}
}

impl Value {
	/// Build a structured array value out of other structured values.
	pub fn array(items: impl IntoIterator<Item = Value>) -> Value {
		let array: Vec<serde_json::Value> = items
			.into_iter()
			.map(|v| match v {
				Value::Json(j) => j,
				Value::Bytes(b) => serde_json::Value::Array(
					b.into_iter().map(serde_json::Value::from).collect(),
				),
			})
			.collect();
		Value::Json(serde_json::Value::Array(array))
	}

	/// Build a structured object value out of string-keyed structured values.
	pub fn object(fields: impl IntoIterator<Item = (String, Value)>) -> Value {
		let map: serde_json::Map<String, serde_json::Value> = fields
			.into_iter()
			.map(|(k, v)| {
				let j = match v {
					Value::Json(j) => j,
					Value::Bytes(b) => {
						serde_json::Value::Array(b.into_iter().map(serde_json::Value::from).collect())
					}
				};
				(k, j)
			})
			.collect();
		Value::Json(serde_json::Value::Object(map))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_round_trip() {
		let v = Value::from(vec![1u8, 2, 3, 255]);
		let bytes = v.to_bytes().unwrap();
		let back = Value::from_bytes(v.discriminator(), bytes).unwrap();
		assert_eq!(v, back);
	}

	#[test]
	fn json_round_trip() {
		let v: Value = serde_json::json!({"a": 1, "b": [1, 2, "x"], "c": null}).into();
		let bytes = v.to_bytes().unwrap();
		let back = Value::from_bytes(v.discriminator(), bytes).unwrap();
		assert_eq!(v, back);
	}

	#[test]
	fn bad_discriminator_is_corrupt_record() {
		let err = Value::from_bytes(7, vec![]).unwrap_err();
		assert!(matches!(err, Error::CorruptRecord(_)));
	}
}

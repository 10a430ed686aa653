//! Result algebra shared by every gate component.
//!
//! Components return `std::result::Result<V, E>` where `E` is a closed error
//! enum implementing [`ErrorCode`]. Errors never cross a component boundary
//! as panics or opaque values. Callers that need the wire shape use
//! [`Envelope`], which renders `{ "ok": true, "value": .. }` or
//! `{ "ok": false, "error": { "code": .., .. } }`.

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Stable discriminant carried by every gate error.
///
/// The returned string is part of the public contract: launchers and test
/// suites match on it, so it must never change for an existing variant.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

/// JSON envelope around a component result.
#[derive(Debug)]
pub struct Envelope<'a, V, E>(pub &'a Result<V, E>);

impl<V, E> Envelope<'_, V, E> {
    /// Whether the wrapped result is the success branch.
    pub fn is_ok(&self) -> bool {
        self.0.is_ok()
    }
}

impl<V: Serialize, E: Serialize> Serialize for Envelope<'_, V, E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        match self.0 {
            Ok(value) => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("value", value)?;
            }
            Err(error) => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

/// Process exit codes promised to CLI consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExitCodeContract {
    pub success: i32,
    pub failure: i32,
}

impl ExitCodeContract {
    /// The contract the launcher relies on: success=0, failure=1.
    pub const CANONICAL: ExitCodeContract = ExitCodeContract {
        success: 0,
        failure: 1,
    };

    /// Map a result onto this contract.
    pub fn exit_code<V, E>(&self, result: &Result<V, E>) -> i32 {
        if result.is_ok() {
            self.success
        } else {
            self.failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, serde::Serialize)]
    #[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
    enum SampleError {
        SampleBroken { reason: String },
    }

    #[test]
    fn test_envelope_ok_shape() {
        let result: Result<u32, SampleError> = Ok(7);
        let value = serde_json::to_value(Envelope(&result)).unwrap();
        assert_eq!(value, json!({ "ok": true, "value": 7 }));
    }

    #[test]
    fn test_envelope_err_shape() {
        let result: Result<u32, SampleError> = Err(SampleError::SampleBroken {
            reason: "boom".to_string(),
        });
        let value = serde_json::to_value(Envelope(&result)).unwrap();
        assert_eq!(
            value,
            json!({ "ok": false, "error": { "code": "SAMPLE_BROKEN", "reason": "boom" } })
        );
        assert!(!Envelope(&result).is_ok());
    }

    #[test]
    fn test_exit_code_contract() {
        let ok: Result<(), ()> = Ok(());
        let err: Result<(), ()> = Err(());
        assert_eq!(ExitCodeContract::CANONICAL.exit_code(&ok), 0);
        assert_eq!(ExitCodeContract::CANONICAL.exit_code(&err), 1);
    }
}

use serde_json::Value;

/// Distinguishes "field omitted" from an explicit JSON null so partial
/// updates can tell "keep" apart from "clear".
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn omitted_null_and_string_are_distinct() {
        assert!(matches!(
            classify_nullable(None),
            Ok(NullableValue::Omitted)
        ));
        assert!(matches!(
            classify_nullable(Some(&Value::Null)),
            Ok(NullableValue::Null)
        ));
        let value = json!("CS-1024");
        match classify_nullable(Some(&value)) {
            Ok(NullableValue::String(s)) => assert_eq!(s, "CS-1024"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn non_string_values_are_rejected() {
        let value = json!(42);
        assert!(classify_nullable(Some(&value)).is_err());
    }
}

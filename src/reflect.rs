use thiserror::Error;

use crate::{protocol::Value, worker::Callable};

// pure text extraction over a callable's source representation. callers are
// expected to check is_callable first; the extractors fail fast with a typed
// error instead of returning garbage slices

#[derive(Debug, Error)]
pub enum ReflectError {
    #[error("callable source has no body delimiters: {0:?}")]
    MissingBody(String),
    #[error("callable source has no parameter list: {0:?}")]
    MissingParams(String),
}

/// True iff the value is the "no value" sentinel: absent or explicitly null.
pub fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(value) => value.is_null(),
    }
}

/// True iff the callable's source representation is well formed enough to be
/// reflected: a parameter list before the opening body delimiter, and a
/// closing delimiter after it.
pub fn is_callable(callable: &Callable) -> bool {
    signature_of(callable).is_ok() && body_of(callable).is_ok()
}

/// The callable's parameter-list header, terminated at the opening body
/// delimiter (inclusive).
pub fn signature_of(callable: &Callable) -> Result<&str, ReflectError> {
    let source = callable.source();
    let open = source
        .find('{')
        .ok_or_else(|| ReflectError::MissingBody(source.into()))?;
    if !source[..open].contains('(') {
        return Err(ReflectError::MissingParams(source.into()));
    }
    Ok(&source[..=open])
}

/// The callable's body source text, delimiters stripped.
pub fn body_of(callable: &Callable) -> Result<&str, ReflectError> {
    let source = callable.source();
    let open = source
        .find('{')
        .ok_or_else(|| ReflectError::MissingBody(source.into()))?;
    let close = source
        .rfind('}')
        .filter(|&close| close > open)
        .ok_or_else(|| ReflectError::MissingBody(source.into()))?;
    Ok(&source[open + 1..close])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn callable(source: &str) -> Callable {
        Callable::new(source, |_, _| Ok(Value::Null))
    }

    #[test]
    fn signature_stops_at_body_open() {
        let add = callable("add(a, b) { a + b }");
        assert_eq!(signature_of(&add).unwrap(), "add(a, b) {");
    }

    #[test]
    fn body_strips_outer_delimiters_only() {
        let add = callable("add(a, b) { a + b }");
        assert_eq!(body_of(&add).unwrap(), " a + b ");

        // inner braces belong to the body; only the outermost pair goes
        let branchy = callable("f(x) { if (x) { y } }");
        assert_eq!(body_of(&branchy).unwrap(), " if (x) { y } ");
    }

    #[test]
    fn malformed_source_is_rejected() {
        let garbage = callable("garbage");
        assert!(!is_callable(&garbage));
        assert!(matches!(
            signature_of(&garbage),
            Err(ReflectError::MissingBody(_))
        ));

        let no_params = callable("{ x }");
        assert!(!is_callable(&no_params));
        assert!(matches!(
            signature_of(&no_params),
            Err(ReflectError::MissingParams(_))
        ));

        let unclosed = callable("f(x) {");
        assert!(!is_callable(&unclosed));
        assert!(matches!(body_of(&unclosed), Err(ReflectError::MissingBody(_))));
    }

    #[test]
    fn absent_covers_missing_and_null() {
        assert!(is_absent(None));
        assert!(is_absent(Some(&Value::Null)));
        assert!(!is_absent(Some(&json!(0))));
        assert!(!is_absent(Some(&json!(""))));
    }
}

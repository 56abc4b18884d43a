use crate::error::{Error, Result};

/// Separator between path components of a hierarchical key.
pub const SEPARATOR: char = '.';

/// Validate a dotted key: non-empty, not the literal root key `"."`, and
/// no empty components (`"a..b"`, leading or trailing separator).
///
/// Hierarchical keys are expressed by nesting, so a component never
/// contains the separator by construction.
///
/// # Errors
/// Returns [`Error::InvalidKey`] if the key violates any rule.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key("key must not be empty"));
    }
    if key == "." {
        return Err(Error::invalid_key("the root key cannot be operated on"));
    }
    if key.split(SEPARATOR).any(str::is_empty) {
        return Err(Error::invalid_key(format!(
            "key contains an empty component: {key:?}"
        )));
    }
    Ok(())
}

/// Alias for [`validate_key`] used where a key arrives from stored data
/// (link targets) rather than a caller.
pub fn normalize_key(key: &str) -> Result<&str> {
    validate_key(key)?;
    Ok(key)
}

/// Splice a link target in front of the unconsumed remainder of a walk.
pub fn join_key(target: &str, rest: &str) -> String {
    let mut key = String::with_capacity(target.len() + 1 + rest.len());
    key.push_str(target);
    key.push(SEPARATOR);
    key.push_str(rest);
    key
}

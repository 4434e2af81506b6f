//! Name checks applied before anything reaches the server or the engine CLI.
//!
//! Quoting in [`crate::dialect`] already keeps identifiers safe inside SQL.
//! The replication name also ends up in engine-generated trigger names
//! (`bucardo_kick_<name>`), log file names and the pid directory, so it must
//! be a bare identifier.

use crate::error::{Error, Result};

/// NAMEDATALEN - 1
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Accept `[A-Za-z_][A-Za-z0-9_]*` of at most [`MAX_IDENTIFIER_LEN`] bytes.
///
/// ```
/// use replguard_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("orders_sync").is_ok());
/// assert!(validate_sql_identifier("sync; DROP SCHEMA bucardo").is_err());
/// assert!(validate_sql_identifier("9lives").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> Result<()> {
    let reject = |reason: String| Err(Error::invalid_identifier(name, reason));

    let Some(first) = name.chars().next() else {
        return reject("empty".into());
    };
    if name.len() > MAX_IDENTIFIER_LEN {
        return reject(format!("{} bytes, limit is {MAX_IDENTIFIER_LEN}", name.len()));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return reject(format!("cannot start with {first:?}"));
    }
    if let Some(bad) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return reject(format!("{bad:?} is not allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_plain_names_pass() {
        for name in ["orders", "app_sync", "_staging", "Sync2"] {
            validate_sql_identifier(name).unwrap();
        }
    }

    #[test]
    fn test_length_limit() {
        assert!(validate_sql_identifier(&"s".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        assert!(validate_sql_identifier(&"s".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_names_unsafe_for_paths_or_sql() {
        for name in ["", "a b", "../pid", "public.orders", "x'--", "line\nbreak", "ümlaut"] {
            let err = validate_sql_identifier(name).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Input, "{name:?}");
        }
    }
}

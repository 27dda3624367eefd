/// Longest identifier MySQL accepts for schemas and tables
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MySqlError {
    #[error("MySQL - Invalid connection settings: {message}")]
    InvalidConfig { message: String },
    #[error("MySQL - Invalid {identifier_type}: '{name}' - {reason}")]
    InvalidIdentifier {
        identifier_type: String,
        name: String,
        reason: String,
    },
    #[error("MySQL - {0}")]
    Driver(#[from] sqlx::Error),
}

/// Checks if a string can be interpolated as an unquoted MySQL identifier.
///
/// Database and table names coming from tool arguments must:
/// - Be non-empty and at most 64 characters
/// - Contain only ASCII alphanumeric characters, underscores or `$`
pub fn is_valid_mysql_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Validates an identifier, returning a typed error naming the reason on failure.
pub fn validate_mysql_identifier(name: &str, identifier_type: &str) -> Result<(), MySqlError> {
    if is_valid_mysql_identifier(name) {
        return Ok(());
    }

    let reason = if name.is_empty() {
        "cannot be empty"
    } else if name.len() > MAX_IDENTIFIER_LENGTH {
        "is longer than 64 characters"
    } else {
        "contains invalid characters (only alphanumeric, underscore and $ allowed)"
    };

    Err(MySqlError::InvalidIdentifier {
        identifier_type: identifier_type.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_mysql_identifier("orders"));
        assert!(is_valid_mysql_identifier("sys_config$v2"));
        assert!(is_valid_mysql_identifier("2024_archive"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_mysql_identifier(""));
        assert!(!is_valid_mysql_identifier("orders; DROP TABLE x"));
        assert!(!is_valid_mysql_identifier("db.table"));
        assert!(!is_valid_mysql_identifier("`quoted`"));
        assert!(!is_valid_mysql_identifier(&"a".repeat(65)));
    }

    #[test]
    fn test_validate_reports_reason() {
        let err = validate_mysql_identifier("", "database").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));

        let err = validate_mysql_identifier("bad-name", "table").unwrap_err();
        assert_eq!(
            err.to_string(),
            "MySQL - Invalid table: 'bad-name' - contains invalid characters (only alphanumeric, underscore and $ allowed)"
        );

        assert!(validate_mysql_identifier("good_name", "table").is_ok());
    }
}

//! MySQL identifier quoting.
//!
//! Table and column names cannot be bound as statement parameters, so they
//! are spliced into SQL text inside backticks.

use crate::error::IdentifierError;

/// Longest identifier MySQL accepts for tables and columns.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// Embedded backticks are escaped by doubling them (`` ` `` → ``` `` ```).
///
/// # Examples
///
/// ```
/// use mysqlkit_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("users"), "`users`");
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote an identifier after checking that MySQL can represent it.
///
/// Rejects empty names, names containing NUL, and names longer than
/// [`MAX_IDENTIFIER_LEN`] characters.
///
/// ```
/// use mysqlkit_core::try_quote_ident;
///
/// assert_eq!(try_quote_ident("img").unwrap(), "`img`");
/// assert!(try_quote_ident("").is_err());
/// ```
pub fn try_quote_ident(name: &str) -> Result<String, IdentifierError> {
    let reason = if name.is_empty() {
        Some("is empty")
    } else if name.contains('\0') {
        Some("contains a NUL character")
    } else if name.chars().count() > MAX_IDENTIFIER_LEN {
        Some("exceeds 64 characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(IdentifierError {
            name: name.to_string(),
            reason,
        }),
        None => Ok(quote_ident_mysql(name)),
    }
}

/// Quote a possibly schema-qualified name such as `db.t`, one part at a time.
///
/// ```
/// use mysqlkit_core::try_quote_qualified;
///
/// assert_eq!(try_quote_qualified("db.t").unwrap(), "`db`.`t`");
/// assert!(try_quote_qualified("db.").is_err());
/// ```
pub fn try_quote_qualified(name: &str) -> Result<String, IdentifierError> {
    let parts = name
        .split('.')
        .map(try_quote_ident)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IdentifierError {
            name: name.to_string(),
            reason: e.reason,
        })?;
    Ok(parts.join("."))
}

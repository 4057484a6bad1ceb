//! Statement-altering keyword detection
//!
//! Filter output is built from fixed templates, so these words can only reach
//! a fragment through an identifier. Identifiers are checked on the way in and
//! the rendered fragment is scanned again on the way out.

/// Keywords that turn a predicate into a different statement
pub const STATEMENT_KEYWORDS: [&str; 7] = [
    "UPDATE", "DELETE", "INSERT", "EXEC", "EXECUTE", "DROP", "TRUNCATE",
];

/// Returns the canonical keyword if `word` is one of [`STATEMENT_KEYWORDS`], ignoring case
pub fn statement_keyword(word: &str) -> Option<&'static str> {
    STATEMENT_KEYWORDS
        .iter()
        .copied()
        .find(|kw| kw.eq_ignore_ascii_case(word))
}

/// Find the first whole-token statement keyword in `sql`, ignoring case
///
/// Tokens are maximal runs of `[A-Za-z0-9_]`; text inside single-quoted
/// literals is skipped. `updated_at` or `dropped` are not matches.
pub fn find_statement_keyword(sql: &str) -> Option<&'static str> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            i += 1;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
            i += 1;
        } else if b.is_ascii_alphanumeric() || b == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if let Some(kw) = statement_keyword(&sql[start..i]) {
                return Some(kw);
            }
        } else {
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_match_ignores_case() {
        for kw in STATEMENT_KEYWORDS {
            assert_eq!(statement_keyword(&kw.to_lowercase()), Some(kw));
        }
        assert_eq!(statement_keyword("DrOp"), Some("DROP"));
        assert_eq!(statement_keyword("select"), None);
    }

    #[test]
    fn test_whole_token_only() {
        assert_eq!(find_statement_keyword("updated_at = @p AND dropped = 1"), None);
        assert_eq!(find_statement_keyword("name LIKE @p ESCAPE '\\'"), None);
        assert_eq!(find_statement_keyword("a = 1; dRoP TABLE x"), Some("DROP"));
        assert_eq!(find_statement_keyword("(x)EXEC(y)"), Some("EXEC"));
    }

    #[test]
    fn test_literals_are_skipped() {
        assert_eq!(find_statement_keyword("name = 'drop it'"), None);
        assert_eq!(find_statement_keyword("name = 'it''s' OR delete = 1"), Some("DELETE"));
    }
}

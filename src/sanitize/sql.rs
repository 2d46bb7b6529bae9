use sqlparser::dialect::{
    Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::fmt::Write;

/// Pick the tokenizer dialect for a datastore product name
fn dialect_for(product: &str) -> Box<dyn Dialect> {
    match product.to_ascii_lowercase().as_str() {
        "mysql" | "mariadb" => Box::new(MySqlDialect {}),
        "postgres" | "postgresql" => Box::new(PostgreSqlDialect {}),
        "sqlite" => Box::new(SQLiteDialect {}),
        "mssql" | "sqlserver" => Box::new(MsSqlDialect {}),
        _ => Box::new(GenericDialect {}),
    }
}

/// Replace every literal in `query` with `?` and drop comments.
///
/// Identifiers, keywords, operators and existing placeholders are kept as
/// written. Returns `None` when the statement cannot be tokenized (for example
/// an unterminated string), since reporting it could leak the literal.
pub fn obfuscate_sql(product: &str, query: &str) -> Option<String> {
    let dialect = dialect_for(product);
    let tokens = match Tokenizer::new(dialect.as_ref(), query).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(product, "Dropping query that failed to tokenize: {}", e);
            return None;
        }
    };

    let mut out = String::with_capacity(query.len());
    for token in &tokens {
        match token {
            Token::Number(..)
            | Token::SingleQuotedString(_)
            | Token::DoubleQuotedString(_)
            | Token::DollarQuotedString(_)
            | Token::NationalStringLiteral(_)
            | Token::EscapedStringLiteral(_)
            | Token::HexStringLiteral(_)
            | Token::SingleQuotedByteStringLiteral(_)
            | Token::DoubleQuotedByteStringLiteral(_)
            | Token::RawStringLiteral(_) => out.push('?'),
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => {}
            Token::EOF => break,
            other => {
                let _ = write!(out, "{}", other);
            }
        }
    }

    Some(out)
}

//! SQL generation helpers shared by query and update SQL generators.

use crate::value::Value;
use std::fmt::Write;

/// Dialect details for identifiers, parameters and literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlGenerationHelper {
    open_quote: char,
    close_quote: char,
    parameter_prefix: char,
    statement_terminator: &'static str,
    bool_literals_as_bits: bool,
    unicode_string_prefix: bool,
}

impl SqlGenerationHelper {
    /// SQL Server conventions: `[name]`, `@p`, `N'text'`, bit literals.
    pub const fn sql_server() -> Self {
        Self {
            open_quote: '[',
            close_quote: ']',
            parameter_prefix: '@',
            statement_terminator: ";",
            bool_literals_as_bits: true,
            unicode_string_prefix: true,
        }
    }

    /// ANSI conventions: `"name"`, `@p`, `'text'`, `TRUE`/`FALSE`.
    pub const fn ansi() -> Self {
        Self {
            open_quote: '"',
            close_quote: '"',
            parameter_prefix: '@',
            statement_terminator: ";",
            bool_literals_as_bits: false,
            unicode_string_prefix: false,
        }
    }

    /// Returns the statement terminator.
    pub fn statement_terminator(&self) -> &'static str {
        self.statement_terminator
    }

    /// Returns true when booleans are stored as bits, so that search
    /// conditions and boolean values are distinct in SQL.
    pub fn bool_literals_as_bits(&self) -> bool {
        self.bool_literals_as_bits
    }

    /// Quotes an identifier, escaping embedded closing quotes.
    pub fn delimit_identifier(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len() + 2);
        self.append_delimited(&mut out, name);
        out
    }

    /// Quotes an identifier and prefixes it with its quoted schema.
    pub fn delimit_identifier_with_schema(&self, name: &str, schema: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(schema) = schema {
            self.append_delimited(&mut out, schema);
            out.push('.');
        }
        self.append_delimited(&mut out, name);
        out
    }

    /// Appends a quoted identifier.
    pub fn append_delimited(&self, sql: &mut String, name: &str) {
        sql.push(self.open_quote);
        for c in name.chars() {
            if c == self.close_quote {
                sql.push(c);
            }
            sql.push(c);
        }
        sql.push(self.close_quote);
    }

    /// Returns the placeholder for a parameter name (`p0` -> `@p0`).
    pub fn parameter_name(&self, name: &str) -> String {
        format!("{}{name}", self.parameter_prefix)
    }

    /// Renders a value as a SQL literal.
    pub fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) if self.bool_literals_as_bits => {
                format!("CAST({} AS bit)", u8::from(*b))
            }
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Text(s) => {
                let escaped = s.replace('\'', "''");
                if self.unicode_string_prefix {
                    format!("N'{escaped}'")
                } else {
                    format!("'{escaped}'")
                }
            }
            Value::Bytes(bytes) => {
                let mut out = String::from("0x");
                for b in bytes {
                    let _ = write!(out, "{b:02X}");
                }
                out
            }
            Value::Guid(g) => format!("'{g}'"),
        }
    }
}

impl Default for SqlGenerationHelper {
    fn default() -> Self {
        Self::ansi()
    }
}

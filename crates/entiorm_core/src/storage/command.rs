//! Commands sent to the store.

use crate::value::Value;
use std::fmt;

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    /// Value flows to the store.
    Input,
    /// Value flows back from the store.
    Output,
}

/// A named command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandParameter {
    /// Parameter name including the provider prefix (e.g. `@p0`).
    pub name: String,
    /// Parameter value; `Null` for output parameters.
    pub value: Value,
    /// Parameter direction.
    pub direction: ParameterDirection,
}

impl CommandParameter {
    /// Creates an input parameter.
    pub fn input(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            direction: ParameterDirection::Input,
        }
    }

    /// Creates an output parameter.
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
            direction: ParameterDirection::Output,
        }
    }
}

/// Command text plus its parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationalCommand {
    /// SQL text.
    pub text: String,
    /// Parameters in declaration order.
    pub parameters: Vec<CommandParameter>,
}

impl RelationalCommand {
    /// Creates a command.
    pub fn new(text: impl Into<String>, parameters: Vec<CommandParameter>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Finds a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&CommandParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for RelationalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.parameters {
            writeln!(f, "-- {} = {}", p.name, p.value)?;
        }
        f.write_str(&self.text)
    }
}

//! Command descriptors.

use crate::models::param::{Parameter, ToParams};
use serde::{Deserialize, Serialize};

/// How a command's text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Raw statement text
    #[default]
    Text,
    /// Name of a stored procedure
    StoredProcedure,
}

/// A command ready for a driver: text, kind, bound parameters and the
/// transaction it must run under, if any.
///
/// Built per call and dropped after execution.
#[derive(Debug, Clone)]
pub struct Command<T> {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: Vec<Parameter>,
    pub transaction: Option<T>,
}

impl<T> Command<T> {
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            parameters: Vec::new(),
            transaction: None,
        }
    }

    /// Bind every field of a parameter bag, naming each with `marker`.
    pub fn bind<P: ToParams + ?Sized>(&mut self, bag: &P, marker: &str) {
        self.parameters.extend(
            bag.to_params()
                .into_iter()
                .map(|param| param.with_marker(marker)),
        );
    }

    /// Find a bound parameter by its marked name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

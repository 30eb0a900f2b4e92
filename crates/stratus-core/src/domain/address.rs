//! Logical destinations and cell names.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OperationError;

/// Literal name of the orchestrator's own intake
pub const SELF_DESTINATION: &str = "self";

/// Where an envelope is sent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Back into this orchestrator's own intake
    Local,

    /// A named remote party: pool, `pool.cell`, image server or caller
    Node(String),
}

impl Destination {
    /// Parse a logical name, mapping `"self"` to [`Destination::Local`]
    pub fn parse(name: &str) -> Self {
        if name == SELF_DESTINATION {
            Destination::Local
        } else {
            Destination::Node(name.to_string())
        }
    }

    /// Destination of a cell
    pub fn cell(cell: &CellName) -> Self {
        Destination::Node(cell.to_string())
    }

    /// Whether this destination loops back into the local intake
    pub fn is_local(&self) -> bool {
        matches!(self, Destination::Local)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local => f.write_str(SELF_DESTINATION),
            Destination::Node(name) => f.write_str(name),
        }
    }
}

/// Fully qualified cell name, written `pool.cell` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellName {
    /// Pool the cell belongs to
    pub pool: String,
    /// Cell name inside the pool
    pub cell: String,
}

impl CellName {
    /// Build a cell name from its parts
    pub fn new(pool: impl Into<String>, cell: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            cell: cell.into(),
        }
    }

    /// Parse a dotted `pool.cell` name
    pub fn parse(qualified: &str) -> Result<Self, OperationError> {
        match qualified.split_once('.') {
            Some((pool, cell)) if !pool.is_empty() && !cell.is_empty() && !cell.contains('.') => {
                Ok(Self::new(pool, cell))
            }
            _ => Err(OperationError::Malformed(format!(
                "invalid cell name '{}'",
                qualified
            ))),
        }
    }
}

impl fmt::Display for CellName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pool, self.cell)
    }
}

/// Check a guest or image name against the allowed charset.
///
/// Names are 2..=64 characters of ASCII letters, digits, `-`, `_` and `.`,
/// starting with a letter or digit.
pub fn validate_name(kind: &str, name: &str) -> Result<(), OperationError> {
    let valid_len = (2..=64).contains(&name.len());
    let valid_start = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid_len && valid_start && valid_chars {
        Ok(())
    } else {
        Err(OperationError::Malformed(format!(
            "invalid {} name '{}'",
            kind, name
        )))
    }
}

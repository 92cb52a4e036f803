use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a model element, used to point diagnostics at the part of the
/// project that caused them.
///
/// The model comes from an external loader and carries no text positions, so
/// elements are addressed by their numeric id and an optional part name
/// (`guard`, `expr`, `init_function`, ...). Displayed as `*<id>/<part>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub element: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub part: String,
}

impl Origin {
    /// Point at a whole element.
    pub fn element(element: u32) -> Self {
        Self {
            element,
            part: String::new(),
        }
    }

    /// Point at a named part of an element.
    pub fn part(element: u32, part: impl Into<String>) -> Self {
        Self {
            element,
            part: part.into(),
        }
    }

    /// Same element, different part.
    pub fn with_part(&self, part: impl Into<String>) -> Self {
        Self::part(self.element, part)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.part.is_empty() {
            write!(f, "*{}", self.element)
        } else {
            write!(f, "*{}/{}", self.element, self.part)
        }
    }
}

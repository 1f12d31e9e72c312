//! Collection wrappers.

use std::fmt;

use super::datetime::LocalDateTime;
use crate::models::ConnectionState;

/// Connection state rows rendered as a markdown table.
///
/// ```rust
/// use conduit_core::display::ConnectionStates;
/// use conduit_core::models::ConnectionState;
///
/// let states = ConnectionStates(vec![ConnectionState::ready("aws", true)]);
/// assert!(states.to_string().contains("| aws | ready |"));
/// ```
pub struct ConnectionStates(pub Vec<ConnectionState>);

impl ConnectionStates {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConnectionState> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a ConnectionStates {
    type Item = &'a ConnectionState;
    type IntoIter = std::slice::Iter<'a, ConnectionState>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Keeps a details cell on one table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

impl fmt::Display for ConnectionStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No connections found.");
        }
        writeln!(f, "| Connection | Status | Comments | Last change | Details |")?;
        writeln!(f, "|:-|:-|:-|:-|:-|")?;
        for state in &self.0 {
            writeln!(
                f,
                "| {} | {} | {} | {} | {} |",
                state.name,
                state.status,
                if state.comments_set { "yes" } else { "no" },
                LocalDateTime(&state.last_change),
                cell(state.details.as_deref().unwrap_or(""))
            )?;
        }
        Ok(())
    }
}

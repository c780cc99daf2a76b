//! Folds streamed deltas into the in-flight assistant message.
//!
//! Accumulation is field-wise string concatenation, never replacement: a role emitted once on
//! the first delta persists for the rest of the turn because later deltas concatenate an empty
//! role onto it.  Fold order must match arrival order.

use serde::{Deserialize, Serialize};

use crate::types::{Delta, Message};

/// The running concatenation of every delta received so far in a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Concatenated role fragments.  Informational only.
    pub role: String,

    /// Concatenated content fragments.
    pub content: String,
}

impl Fragment {
    /// Fold a delta into this fragment in place.
    pub fn push(&mut self, delta: &Delta) {
        if let Some(role) = &delta.role {
            self.role.push_str(role);
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }
    }

    /// Fold a sequence of deltas left to right.
    ///
    /// Returns `None` for an empty sequence so callers can tell "no delta arrived" apart from
    /// "deltas arrived but carried no text".
    pub fn fold<'a, I>(deltas: I) -> Option<Fragment>
    where
        I: IntoIterator<Item = &'a Delta>,
    {
        deltas
            .into_iter()
            .fold(None, |acc, delta| Some(accumulate(acc.as_ref(), delta)))
    }

    /// Convert the fragment into a committable assistant message.
    ///
    /// The role is always assistant; the accumulated role string is not authoritative.
    pub fn finalize(&self) -> Message {
        Message::assistant(self.content.clone())
    }
}

impl From<Fragment> for Delta {
    fn from(fragment: Fragment) -> Self {
        Delta {
            role: Some(fragment.role),
            content: Some(fragment.content),
        }
    }
}

/// Combine a previous fragment (or none) with the next delta.
///
/// Total and pure.
pub fn accumulate(previous: Option<&Fragment>, delta: &Delta) -> Fragment {
    let mut next = previous.cloned().unwrap_or_default();
    next.push(delta);
    next
}

//! Play order policies

use serde::{Deserialize, Serialize};

use crate::dependency::{DependencyGraph, TieBreak};
use crate::error::StoryError;

/// How a story teller orders the events of a log
///
/// Every policy yields a permutation of the log that honors its data
/// dependencies. Where two events do not depend on each other, capture order
/// wins unless the policy says otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayOrder {
    /// Exactly as captured
    #[default]
    Capture,
    /// A caller-supplied total order, validated against the dependencies
    Custom(Vec<usize>),
    /// Extra `(before, after)` constraints merged with the dependencies
    Constrained(Vec<(usize, usize)>),
    /// A random dependency-respecting order, reproducible for a given seed
    Shuffled { seed: u64 },
}

impl PlayOrder {
    /// Turn this policy into a concrete order for `graph`
    pub fn resolve(&self, graph: &DependencyGraph) -> Result<Vec<usize>, StoryError> {
        match self {
            Self::Capture => Ok((0..graph.len()).collect()),
            Self::Custom(order) => {
                graph.respects(order)?;
                Ok(order.clone())
            }
            Self::Constrained(constraints) => {
                graph.topological(constraints, TieBreak::CaptureOrder)
            }
            Self::Shuffled { seed } => graph.topological(&[], TieBreak::Seeded(*seed)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Custom(_) => "custom",
            Self::Constrained(_) => "constrained",
            Self::Shuffled { .. } => "shuffled",
        }
    }
}

//! Core types for the reconciler.

use std::collections::BTreeMap;
use std::fmt;

use slumber_core::{DependentResource, ResourceKind, Result};

/// What a reconcile call did to the retained dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
    Unchanged,
}

impl ReconcileAction {
    /// Whether the store was written to for the retained dependent.
    #[must_use]
    pub const fn wrote(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Result of reconciling one kind for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub kind: ResourceKind,
    /// Name of the dependent left in place.
    pub name: String,
    pub action: ReconcileAction,
    /// Duplicates deleted this call.
    pub duplicates_removed: usize,
    /// Duplicates whose deletion failed; retried on the next pass.
    pub duplicates_failed: usize,
}

impl ReconcileOutcome {
    /// Create an outcome with no duplicate handling.
    pub fn new(kind: ResourceKind, name: impl Into<String>, action: ReconcileAction) -> Self {
        Self {
            kind,
            name: name.into(),
            action,
            duplicates_removed: 0,
            duplicates_failed: 0,
        }
    }

    /// Whether nothing needed to change.
    #[must_use]
    pub const fn converged(&self) -> bool {
        !self.action.wrote() && self.duplicates_removed == 0 && self.duplicates_failed == 0
    }
}

/// The rendered desired state of every dependent kind for one instance.
///
/// A kind that failed to render carries its `Render` error instead of a
/// resource; independent kinds are unaffected.
#[derive(Debug, Clone)]
pub struct DesiredSet {
    /// Content hash stamped on the workload, when it could be computed.
    pub content_hash: Option<String>,
    resources: BTreeMap<ResourceKind, Result<DependentResource>>,
}

impl DesiredSet {
    /// Create a desired set.
    #[must_use]
    pub const fn new(
        content_hash: Option<String>,
        resources: BTreeMap<ResourceKind, Result<DependentResource>>,
    ) -> Self {
        Self {
            content_hash,
            resources,
        }
    }

    /// The rendering for `kind`, if it was attempted.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&Result<DependentResource>> {
        self.resources.get(&kind)
    }

    /// Whether `kind` rendered successfully.
    #[must_use]
    pub fn rendered(&self, kind: ResourceKind) -> bool {
        matches!(self.get(kind), Some(Ok(_)))
    }

    /// Render failures keyed by kind, for status.
    #[must_use]
    pub fn render_errors(&self) -> BTreeMap<ResourceKind, String> {
        self.resources
            .iter()
            .filter_map(|(kind, result)| {
                result
                    .as_ref()
                    .err()
                    .map(|e| (*kind, e.to_string()))
            })
            .collect()
    }

    /// Iterate renderings in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &Result<DependentResource>)> {
        self.resources.iter().map(|(kind, result)| (*kind, result))
    }
}

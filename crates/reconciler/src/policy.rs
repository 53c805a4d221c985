//! Status aggregation policies.
//!
//! A policy turns a GlobalObject and the LocalObjects that reference it into
//! an [`Aggregate`]: the phase, member counts, and the reason/message recorded
//! on the `Ready` condition.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use gobj_core::{GlobalObject, LocalObject, Phase};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Outcome of aggregating member health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub phase: Phase,
    /// Observed members reporting healthy.
    pub ready: usize,
    /// LocalObjects referencing the GlobalObject.
    pub observed: usize,
    /// Member ids listed in the GlobalObject spec.
    pub expected: usize,
    /// CamelCase reason for the `Ready` condition.
    pub reason: &'static str,
    pub message: String,
}

/// Decides the aggregate phase of a GlobalObject.
pub trait AggregationPolicy: Send + Sync + Debug {
    /// Short policy name for logs.
    fn name(&self) -> &'static str;

    /// Aggregate the observed members of `global`.
    fn aggregate(&self, global: &GlobalObject, members: &[LocalObject]) -> Aggregate;
}

/// Member ids listed in the spec with no observed LocalObject of that id.
fn missing_members(global: &GlobalObject, members: &[LocalObject]) -> Vec<String> {
    let observed: HashSet<&str> = members.iter().map(|m| m.spec.id.as_str()).collect();
    global
        .spec
        .members
        .iter()
        .filter(|id| !observed.contains(id.as_str()))
        .cloned()
        .collect()
}

fn unhealthy_members(members: &[LocalObject]) -> Vec<&str> {
    members
        .iter()
        .filter(|m| !m.is_healthy())
        .map(|m| m.metadata.name.as_str())
        .sorted()
        .collect()
}

fn healthy_count(members: &[LocalObject]) -> usize {
    members.iter().filter(|m| m.is_healthy()).count()
}

/// `Ready` only when every expected member is present and every observed
/// member is healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllHealthy;

impl AggregationPolicy for AllHealthy {
    fn name(&self) -> &'static str {
        "all-healthy"
    }

    fn aggregate(&self, global: &GlobalObject, members: &[LocalObject]) -> Aggregate {
        let ready = healthy_count(members);
        let observed = members.len();
        let expected = global.spec.members.len();
        let aggregate = |phase, reason, message| Aggregate {
            phase,
            ready,
            observed,
            expected,
            reason,
            message,
        };

        if members.is_empty() {
            return aggregate(
                Phase::Pending,
                "NoMembersObserved",
                format!("waiting for {expected} member(s) to appear"),
            );
        }

        let missing = missing_members(global, members);
        if !missing.is_empty() {
            return aggregate(
                Phase::Degraded,
                "MembersMissing",
                format!("missing members: {}", missing.iter().join(", ")),
            );
        }

        let unhealthy = unhealthy_members(members);
        if !unhealthy.is_empty() {
            return aggregate(
                Phase::Degraded,
                "MembersUnhealthy",
                format!("unhealthy members: {}", unhealthy.iter().join(", ")),
            );
        }

        aggregate(
            Phase::Ready,
            "AllMembersHealthy",
            format!("{ready}/{observed} members healthy"),
        )
    }
}

/// `Ready` once at least `count` observed members are healthy.
#[derive(Debug, Clone, Copy)]
pub struct MinHealthy {
    pub count: usize,
}

impl AggregationPolicy for MinHealthy {
    fn name(&self) -> &'static str {
        "min-healthy"
    }

    fn aggregate(&self, global: &GlobalObject, members: &[LocalObject]) -> Aggregate {
        let ready = healthy_count(members);
        let observed = members.len();
        let expected = global.spec.members.len();
        let (phase, reason) = if members.is_empty() {
            (Phase::Pending, "NoMembersObserved")
        } else if ready >= self.count {
            (Phase::Ready, "EnoughMembersHealthy")
        } else {
            (Phase::Degraded, "InsufficientHealthyMembers")
        };

        Aggregate {
            phase,
            ready,
            observed,
            expected,
            reason,
            message: format!("{ready} healthy, {} required", self.count),
        }
    }
}

/// Policy selection as written in configuration files.
///
/// ```toml
/// [aggregation]
/// policy = "min-healthy"
/// count = 2
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum AggregationConfig {
    #[default]
    AllHealthy,
    MinHealthy { count: usize },
}

impl AggregationConfig {
    /// Instantiate the configured policy.
    pub fn build(self) -> Arc<dyn AggregationPolicy> {
        match self {
            Self::AllHealthy => Arc::new(AllHealthy),
            Self::MinHealthy { count } => Arc::new(MinHealthy { count }),
        }
    }
}

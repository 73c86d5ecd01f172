//! Retention planning
//!
//! A pure function from a snapshot of the live lineage forest to an ordered
//! list of versions to delete. The service executes the plan and re-checks
//! each entry under the version's lock right before deleting it.
//!
//! Rules, applied per root tree:
//! - protected = pinned ∪ model-linked ∪ every ancestor of those
//! - deletable = unprotected, older than `min_age`, and a leaf among the
//!   live versions of its tree (deleting a leaf may expose its parent)
//! - age: every deletable version older than `max_age` goes, repeated
//!   until nothing changes
//! - count: while the tree holds more than `max_versions_per_root` live
//!   versions, the deletable leaf with the oldest
//!   `(last_accessed_at or created_at, created_at)` goes

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::errors::{LineageError, Result};

/// Explicit retention policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Upper bound on live versions per root tree
    pub max_versions_per_root: Option<usize>,
    /// Versions older than this are removed when deletable
    pub max_age: Option<Duration>,
    /// Versions younger than this are never removed
    pub min_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_versions_per_root: None,
            max_age: None,
            min_age: Duration::zero(),
        }
    }
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_versions_per_root(mut self, max: usize) -> Self {
        self.max_versions_per_root = Some(max);
        self
    }

    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(age);
        self
    }

    pub fn with_min_age(mut self, age: Duration) -> Self {
        self.min_age = age;
        self
    }

    /// # Errors
    ///
    /// `InvalidPolicy` for a zero version cap, negative durations, or a
    /// `min_age` above `max_age`.
    pub fn validate(&self) -> Result<()> {
        if self.max_versions_per_root == Some(0) {
            return Err(LineageError::InvalidPolicy {
                reason: "max_versions_per_root must be at least 1".to_string(),
            });
        }
        if self.min_age < Duration::zero() {
            return Err(LineageError::InvalidPolicy {
                reason: "min_age must not be negative".to_string(),
            });
        }
        if let Some(max_age) = self.max_age {
            if max_age < Duration::zero() {
                return Err(LineageError::InvalidPolicy {
                    reason: "max_age must not be negative".to_string(),
                });
            }
            if self.min_age > max_age {
                return Err(LineageError::InvalidPolicy {
                    reason: "min_age exceeds max_age".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One live version as seen by the planner
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionNode {
    pub version_id: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Pinned or model-linked
    pub protected_self: bool,
}

impl RetentionNode {
    fn eviction_key(&self) -> (DateTime<Utc>, DateTime<Utc>, &str) {
        (
            self.last_accessed_at.unwrap_or(self.created_at),
            self.created_at,
            &self.version_id,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPlan {
    /// Children always precede their parents
    pub deletions: Vec<String>,
    /// Versions kept because they or a descendant are pinned or linked
    pub protected: BTreeSet<String>,
}

/// Plan deletions for a snapshot of live versions
///
/// Deterministic for a given input and `now`. A node whose parent is not in
/// the snapshot is treated as a root.
///
/// # Errors
///
/// `InvalidPolicy` when the policy fails validation, `MalformedForest` when
/// parent pointers loop or an id appears twice.
pub fn plan_retention(
    nodes: &[RetentionNode],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<RetentionPlan> {
    policy.validate()?;

    let mut by_id: HashMap<&str, &RetentionNode> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.version_id.as_str(), node).is_some() {
            return Err(LineageError::MalformedForest {
                version_id: node.version_id.clone(),
            });
        }
    }

    // group by root, detecting loops on the way up
    let mut trees: BTreeMap<&str, Vec<&RetentionNode>> = BTreeMap::new();
    for node in nodes {
        let mut current = node;
        let mut steps = 0usize;
        while let Some(parent) = parent_in(current, &by_id) {
            steps += 1;
            if steps > nodes.len() {
                return Err(LineageError::MalformedForest {
                    version_id: node.version_id.clone(),
                });
            }
            current = by_id[parent];
        }
        trees
            .entry(current.version_id.as_str())
            .or_default()
            .push(node);
    }

    let mut protected: BTreeSet<String> = BTreeSet::new();
    for node in nodes.iter().filter(|n| n.protected_self) {
        let mut current = Some(node);
        while let Some(n) = current {
            if !protected.insert(n.version_id.clone()) {
                break;
            }
            current = parent_in(n, &by_id).map(|p| by_id[p]);
        }
    }

    let mut live_children: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        if let Some(parent) = parent_in(node, &by_id) {
            *live_children.entry(parent).or_default() += 1;
        }
    }

    let mut deletions = Vec::new();
    for members in trees.values() {
        let mut live = members.len();
        let mut deleted: BTreeSet<&str> = BTreeSet::new();

        loop {
            let mut candidates: Vec<&RetentionNode> = members
                .iter()
                .copied()
                .filter(|n| {
                    !deleted.contains(n.version_id.as_str())
                        && !protected.contains(&n.version_id)
                        && live_children.get(n.version_id.as_str()).copied().unwrap_or(0) == 0
                        && now - n.created_at >= policy.min_age
                })
                .collect();
            candidates.sort_by(|a, b| a.eviction_key().cmp(&b.eviction_key()));

            let expired: Vec<&RetentionNode> = match policy.max_age {
                Some(max_age) => candidates
                    .iter()
                    .copied()
                    .filter(|n| now - n.created_at > max_age)
                    .collect(),
                None => Vec::new(),
            };

            let batch = if !expired.is_empty() {
                expired
            } else {
                match (policy.max_versions_per_root, candidates.first()) {
                    (Some(max), Some(oldest)) if live > max => vec![*oldest],
                    _ => break,
                }
            };

            for node in batch {
                deleted.insert(node.version_id.as_str());
                live -= 1;
                if let Some(parent) = parent_in(node, &by_id) {
                    if let Some(count) = live_children.get_mut(parent) {
                        *count -= 1;
                    }
                }
                deletions.push(node.version_id.clone());
            }
        }
    }

    Ok(RetentionPlan {
        deletions,
        protected,
    })
}

fn parent_in<'a>(
    node: &'a RetentionNode,
    by_id: &HashMap<&str, &RetentionNode>,
) -> Option<&'a str> {
    node.parent_id
        .as_deref()
        .filter(|p| by_id.contains_key(p))
}

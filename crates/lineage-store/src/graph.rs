//! Lineage Graph
//!
//! Maintains the tree of transformation edges between versions. Every
//! non-root version has exactly one parent edge, so ancestor queries walk a
//! single chain of parent pointers and descendant queries walk child edges.
//!
//! Nothing is cached: each query reads the metadata store afresh.

#![allow(clippy::result_large_err)]

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use lineage_core::errors::{ExError, ExErrorKind};
use lineage_core::model::{
    DatasetVersion, LineageHop, TransformationLineageEdge, TransformationStep,
};
use lineage_core::ports::MetadataStore;
use uuid::Uuid;

use crate::errors::{version_not_found, Result};
use crate::version_store::{now_millis, ChildIter};

pub struct LineageGraph {
    metadata: Arc<dyn MetadataStore>,
}

fn cycle(op: &str, child_id: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::CycleDetected)
        .with_op(op)
        .with_entity_id(child_id)
        .with_message(message)
}

impl LineageGraph {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Record that `child_id` was produced from `parent_id` by `steps`
    ///
    /// # Errors
    ///
    /// - `InvalidParent`: the parent is missing, staged or deleted
    /// - `NotFound`: the child does not exist
    /// - `CycleDetected`: the child already has an ancestor edge, or is the
    ///   parent itself or one of its ancestors
    /// - `InvalidInput`: the step list is invalid
    pub fn record_transformation(
        &self,
        parent_id: &str,
        child_id: &str,
        steps: Vec<TransformationStep>,
        applied_by: &str,
    ) -> Result<String> {
        let edge = self.prepare_edge(parent_id, child_id, steps, applied_by)?;
        self.metadata.insert_edge(&edge)?;
        tracing::debug!(
            edge_id = %edge.edge_id,
            source = %parent_id,
            target = %child_id,
            "recorded transformation"
        );
        Ok(edge.edge_id)
    }

    /// Validate and build an edge without writing it
    ///
    /// Used when the edge must be committed in the same transaction as its
    /// target version.
    pub fn prepare_edge(
        &self,
        parent_id: &str,
        child_id: &str,
        steps: Vec<TransformationStep>,
        applied_by: &str,
    ) -> Result<TransformationLineageEdge> {
        const OP: &str = "record_transformation";

        TransformationStep::validate_all(&steps).map_err(|e| ExError::from(e).with_op(OP))?;

        let parent = self.metadata.get_version(parent_id)?;
        if !parent.as_ref().is_some_and(DatasetVersion::is_committed) {
            return Err(ExError::new(ExErrorKind::InvalidParent)
                .with_op(OP)
                .with_entity_id(parent_id)
                .with_message("Parent version is missing, staged or deleted"));
        }

        let child = self
            .metadata
            .get_version(child_id)?
            .ok_or_else(|| version_not_found(child_id).with_op(OP))?;

        if child_id == parent_id {
            return Err(cycle(OP, child_id, "A version cannot derive from itself"));
        }
        if let Some(existing) = self.metadata.get_parent_edge(child_id)? {
            return Err(cycle(
                OP,
                child_id,
                format!("Version already has parent edge {}", existing.edge_id),
            ));
        }
        if let Some(current) = child.parent_version_id.as_deref() {
            if current != parent_id {
                return Err(cycle(
                    OP,
                    child_id,
                    format!("Version already descends from {}", current),
                ));
            }
        }
        if self
            .ancestor_ids(parent_id)?
            .iter()
            .any(|id| id == child_id)
        {
            return Err(cycle(OP, child_id, "Version is an ancestor of the parent"));
        }

        Ok(TransformationLineageEdge {
            edge_id: Uuid::now_v7().to_string(),
            source_version_id: parent_id.to_string(),
            target_version_id: child_id.to_string(),
            steps,
            applied_at: now_millis(),
            applied_by: applied_by.to_string(),
        })
    }

    /// Hops from the root down to `version_id`, each with the steps that
    /// produced it; the root hop has no steps
    ///
    /// # Errors
    ///
    /// `NotFound` when the version is missing or not committed.
    pub fn ancestor_chain(&self, version_id: &str) -> Result<Vec<LineageHop>> {
        const OP: &str = "ancestor_chain";

        let start = self
            .metadata
            .get_version(version_id)?
            .filter(DatasetVersion::is_committed)
            .ok_or_else(|| version_not_found(version_id).with_op(OP))?;

        let mut hops = Vec::new();
        let mut visited = HashSet::new();
        let mut current = start;
        loop {
            if !visited.insert(current.version_id.clone()) {
                return Err(cycle(OP, version_id, "Parent pointers form a loop"));
            }

            let hop = match self.metadata.get_parent_edge(&current.version_id)? {
                Some(edge) => LineageHop::from_edge(&edge),
                None => LineageHop::root(current.version_id.clone()),
            };
            hops.push(hop);

            let Some(parent_id) = current.parent_version_id.clone() else {
                break;
            };
            current = self.metadata.get_version(&parent_id)?.ok_or_else(|| {
                ExError::new(ExErrorKind::Internal)
                    .with_op(OP)
                    .with_entity_id(parent_id.clone())
                    .with_message("Ancestor record is missing")
            })?;
        }

        hops.reverse();
        Ok(hops)
    }

    /// Ancestor ids from the root to `version_id` inclusive
    pub fn ancestor_ids(&self, version_id: &str) -> Result<Vec<String>> {
        Ok(self
            .ancestor_chain(version_id)?
            .into_iter()
            .map(|hop| hop.version_id)
            .collect())
    }

    /// Every committed version reachable through child edges, excluding
    /// `version_id` itself
    pub fn descendant_versions(&self, version_id: &str) -> Result<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([version_id.to_string()]);

        while let Some(current) = queue.pop_front() {
            for child in ChildIter::new(self.metadata.clone(), current, None) {
                let child = child?;
                if found.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }

        found.remove(version_id);
        Ok(found)
    }
}

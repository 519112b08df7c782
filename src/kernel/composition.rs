use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{info, warn};

use super::Kernel;
use crate::access::Action;
use crate::error::{KernelError, KernelResult};
use crate::models::*;

impl Kernel {
    /// Nest `child_id` inside `parent_id`.
    pub async fn compose_organism(&self, input: ComposeInput) -> KernelResult<CompositionRecord> {
        let parent = self.require_organism(input.parent_id).await?;
        self.authorize(&input.composed_by, &parent, Action::Compose)
            .await?;
        self.ensure_composable(parent.id, input.child_id).await?;

        let record = CompositionRecord {
            parent_id: parent.id,
            child_id: input.child_id,
            composed_at: self.ports.identity.now(),
            composed_by: input.composed_by,
            position: input.position,
        };

        // The check above is a fast path; the store's child uniqueness is authoritative.
        if !self.ports.compositions.save(&record).await? {
            return Err(KernelError::composition(format!(
                "organism {} already has a parent",
                record.child_id
            )));
        }

        self.announce_composed(&record).await;
        Ok(record)
    }

    /// Remove the edge between `parent_id` and `child_id`.
    pub async fn decompose_organism(&self, input: DecomposeInput) -> KernelResult<CompositionRecord> {
        let parent = self.require_organism(input.parent_id).await?;
        self.authorize(&input.decomposed_by, &parent, Action::Decompose)
            .await?;
        let record = self.require_edge(parent.id, input.child_id).await?;

        if !self
            .ports
            .compositions
            .remove(record.parent_id, record.child_id)
            .await?
        {
            return Err(not_a_child(parent.id, input.child_id));
        }

        self.announce_decomposed(&record, &input.decomposed_by).await;
        Ok(record)
    }

    pub(crate) async fn announce_composed(&self, record: &CompositionRecord) {
        info!(parent_id = %record.parent_id, child_id = %record.child_id, composed_by = %record.composed_by, "Organism composed");
        self.emit(
            EventType::OrganismComposed,
            record.parent_id,
            &record.composed_by,
            json!({ "childId": record.child_id, "position": record.position }),
        )
        .await;
    }

    pub(crate) async fn announce_decomposed(&self, record: &CompositionRecord, decomposed_by: &str) {
        info!(parent_id = %record.parent_id, child_id = %record.child_id, decomposed_by = %decomposed_by, "Organism decomposed");
        self.emit(
            EventType::OrganismDecomposed,
            record.parent_id,
            decomposed_by,
            json!({ "childId": record.child_id }),
        )
        .await;
    }

    /// Direct children in composition order. No access filtering.
    pub async fn query_children(&self, organism_id: OrganismId) -> KernelResult<Vec<CompositionRecord>> {
        Ok(self.ports.compositions.find_children(organism_id).await?)
    }

    /// The edge to this organism's parent, if it has one. No access filtering.
    pub async fn query_parent(&self, organism_id: OrganismId) -> KernelResult<Option<CompositionRecord>> {
        Ok(self.ports.compositions.find_parent(organism_id).await?)
    }

    /// The organism and everything nested beneath it, with current states.
    pub async fn subtree(&self, root_id: OrganismId) -> KernelResult<OrganismTreeNode> {
        let root = self.require_organism(root_id).await?;

        let mut organisms = HashMap::new();
        let mut children: HashMap<OrganismId, Vec<OrganismId>> = HashMap::new();
        let mut seen = HashSet::from([root.id]);
        let mut pending = vec![root.id];
        organisms.insert(root.id, root);

        while let Some(id) = pending.pop() {
            for record in self.ports.compositions.find_children(id).await? {
                if !seen.insert(record.child_id) {
                    warn!(child_id = %record.child_id, "Organism reached twice while walking tree, skipping");
                    continue;
                }
                if let Some(child) = self.ports.organisms.find_by_id(record.child_id).await? {
                    organisms.insert(child.id, child);
                    children.entry(id).or_default().push(record.child_id);
                    pending.push(record.child_id);
                }
            }
        }

        let mut states = HashMap::new();
        for id in organisms.keys() {
            if let Some(state) = self.ports.states.find_current_by_organism_id(*id).await? {
                states.insert(*id, state);
            }
        }

        fn build(
            id: OrganismId,
            organisms: &HashMap<OrganismId, Organism>,
            states: &HashMap<OrganismId, OrganismState>,
            children: &HashMap<OrganismId, Vec<OrganismId>>,
        ) -> OrganismTreeNode {
            OrganismTreeNode {
                organism: organisms[&id].clone(),
                current_state: states.get(&id).cloned(),
                children: children
                    .get(&id)
                    .map(|ids| {
                        ids.iter()
                            .map(|child| build(*child, organisms, states, children))
                            .collect()
                    })
                    .unwrap_or_default(),
            }
        }

        Ok(build(root_id, &organisms, &states, &children))
    }

    /// Fail unless `child_id` exists, has no parent, and is not `parent_id`
    /// or one of its ancestors.
    pub(crate) async fn ensure_composable(
        &self,
        parent_id: OrganismId,
        child_id: OrganismId,
    ) -> KernelResult<()> {
        if parent_id == child_id {
            return Err(KernelError::composition(format!(
                "organism {} cannot be composed into itself",
                parent_id
            )));
        }
        self.require_exists(child_id).await?;

        if let Some(existing) = self.ports.compositions.find_parent(child_id).await? {
            return Err(KernelError::composition(format!(
                "organism {} already has a parent ({})",
                child_id, existing.parent_id
            )));
        }

        if self.is_ancestor_or_self(child_id, parent_id).await? {
            return Err(KernelError::composition(format!(
                "composing {} into {} would create a cycle",
                child_id, parent_id
            )));
        }

        Ok(())
    }

    pub(crate) async fn require_edge(
        &self,
        parent_id: OrganismId,
        child_id: OrganismId,
    ) -> KernelResult<CompositionRecord> {
        match self.ports.compositions.find_parent(child_id).await? {
            Some(record) if record.parent_id == parent_id => Ok(record),
            _ => Err(not_a_child(parent_id, child_id)),
        }
    }

    /// Walk parent links upward from `start`, looking for `candidate`.
    ///
    /// The visited set stops the walk if the stored tree already contains a
    /// cycle; that case is reported as a composition error.
    async fn is_ancestor_or_self(
        &self,
        candidate: OrganismId,
        start: OrganismId,
    ) -> KernelResult<bool> {
        let mut visited = HashSet::new();
        let mut cursor = Some(start);

        while let Some(current) = cursor {
            if current == candidate {
                return Ok(true);
            }
            if !visited.insert(current) {
                warn!(organism_id = %current, "Stored composition tree contains a cycle");
                return Err(KernelError::composition(format!(
                    "composition tree already contains a cycle through {}",
                    current
                )));
            }
            cursor = self
                .ports
                .compositions
                .find_parent(current)
                .await?
                .map(|r| r.parent_id);
        }

        Ok(false)
    }
}

fn not_a_child(parent_id: OrganismId, child_id: OrganismId) -> KernelError {
    KernelError::composition(format!(
        "organism {} is not a child of {}",
        child_id, parent_id
    ))
}

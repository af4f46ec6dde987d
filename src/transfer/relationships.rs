//! Relationship mapping and import ordering.
//!
//! Every non-null reference in a collection becomes one edge from the
//! referrer to the referent. Kinds load in their fixed order; within a kind
//! the same-kind parent links are sorted topologically with Kahn's algorithm,
//! ties broken by creation time and then identifier. Parent cycles are broken
//! by dropping the edge whose referrer has the lexicographically largest
//! identifier on the cycle, and each break is reported.

use crate::types::{EntityCollection, EntityKind, RefField};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// One reference from `from` to `to` through `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub field: RefField,
}

/// Directed reference graph over entity identifiers.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, EntityKind>,
    outgoing: HashMap<String, Vec<Edge>>,
    incoming: HashMap<String, Vec<Edge>>,
}

impl DependencyGraph {
    /// Build the graph for a collection. Edges to identifiers outside the
    /// collection are kept so reverse lookups still see them.
    pub fn build(collection: &EntityCollection) -> Self {
        let mut graph = Self::default();
        for entity in collection.entities() {
            graph.nodes.insert(entity.id().to_string(), entity.kind());
            for reference in entity.references() {
                let edge = Edge {
                    from: entity.id().to_string(),
                    to: reference.target_id,
                    field: reference.field,
                };
                graph
                    .incoming
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.clone());
                graph
                    .outgoing
                    .entry(edge.from.clone())
                    .or_default()
                    .push(edge);
            }
        }
        graph
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<EntityKind> {
        self.nodes.get(id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    /// Outgoing edges: what `id` references.
    pub fn references_of(&self, id: &str) -> &[Edge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges: everything that references `id`.
    pub fn referrers_of(&self, id: &str) -> &[Edge] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Referrers of `id` that are of the given kind.
    pub fn referrers_of_kind(&self, id: &str, kind: EntityKind) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .referrers_of(id)
            .iter()
            .filter(|edge| edge.field.owner() == kind)
            .map(|edge| edge.from.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Per-kind write order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportOrder {
    by_kind: BTreeMap<EntityKind, Vec<String>>,
}

impl ImportOrder {
    pub fn order_for(&self, kind: EntityKind) -> &[String] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kinds that have at least one entity, in kind order.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.by_kind
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(kind, _)| *kind)
    }

    /// Every identifier in write order.
    pub fn flat(&self) -> Vec<String> {
        self.by_kind.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parent edge removed to break a same-kind cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleBreak {
    pub kind: EntityKind,
    pub field: RefField,
    /// Referrer whose parent link was dropped from ordering.
    pub entity_id: String,
    pub target_id: String,
    /// Cycle members in walk order.
    pub cycle: Vec<String>,
}

/// Result of mapping a collection's relationships.
#[derive(Debug, Clone, Default)]
pub struct RelationshipMap {
    graph: DependencyGraph,
    order: ImportOrder,
    cycle_breaks: Vec<CycleBreak>,
}

impl RelationshipMap {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn import_order(&self) -> &ImportOrder {
        &self.order
    }

    pub fn order_for(&self, kind: EntityKind) -> &[String] {
        self.order.order_for(kind)
    }

    pub fn flat_order(&self) -> Vec<String> {
        self.order.flat()
    }

    pub fn cycle_breaks(&self) -> &[CycleBreak] {
        &self.cycle_breaks
    }
}

/// Build the dependency graph and import order for a collection.
pub fn map_relationships(collection: &EntityCollection) -> RelationshipMap {
    let graph = DependencyGraph::build(collection);
    let mut order = ImportOrder::default();
    let mut cycle_breaks = Vec::new();

    for kind in EntityKind::ALL {
        let entities = collection.of_kind(kind);
        if entities.is_empty() {
            continue;
        }
        let nodes: Vec<TierNode> = entities
            .iter()
            .map(|entity| TierNode {
                id: entity.id().to_string(),
                created_at: entity.created_at(),
            })
            .collect();
        let members: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let edges: Vec<TierEdge> = entities
            .iter()
            .flat_map(|entity| {
                entity
                    .references()
                    .into_iter()
                    .filter(|r| r.field.is_parent_link() && members.contains(r.target_id.as_str()))
                    .map(|r| TierEdge {
                        child: entity.id().to_string(),
                        parent: r.target_id,
                        field: r.field,
                        removed: false,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let (ids, breaks) = sort_tier(kind, nodes, edges);
        for b in &breaks {
            debug!(
                kind = %kind,
                entity = %b.entity_id,
                target = %b.target_id,
                "Broke parent cycle"
            );
        }
        cycle_breaks.extend(breaks);
        order.by_kind.insert(kind, ids);
    }

    RelationshipMap {
        graph,
        order,
        cycle_breaks,
    }
}

struct TierNode {
    id: String,
    created_at: DateTime<Utc>,
}

struct TierEdge {
    child: String,
    parent: String,
    field: RefField,
    removed: bool,
}

/// Kahn's algorithm over one kind's parent edges.
fn sort_tier(
    kind: EntityKind,
    nodes: Vec<TierNode>,
    mut edges: Vec<TierEdge>,
) -> (Vec<String>, Vec<CycleBreak>) {
    let sort_key: HashMap<String, (DateTime<Utc>, String)> = nodes
        .iter()
        .map(|n| (n.id.clone(), (n.created_at, n.id.clone())))
        .collect();

    let mut in_degree: HashMap<String, usize> =
        nodes.iter().map(|n| (n.id.clone(), 0)).collect();
    let mut children: HashMap<String, Vec<usize>> = HashMap::new();
    let mut parents: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        if let Some(degree) = in_degree.get_mut(&edge.child) {
            *degree += 1;
        }
        children.entry(edge.parent.clone()).or_default().push(idx);
        parents.entry(edge.child.clone()).or_default().push(idx);
    }

    let mut remaining: BTreeSet<(DateTime<Utc>, String)> = sort_key.values().cloned().collect();
    let mut ready: BTreeSet<(DateTime<Utc>, String)> = remaining
        .iter()
        .filter(|(_, id)| in_degree.get(id).copied() == Some(0))
        .cloned()
        .collect();
    let mut emitted: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(nodes.len());
    let mut breaks = Vec::new();

    while !remaining.is_empty() {
        let Some(next) = ready.pop_first() else {
            // Every remaining node waits on a parent: walk parent links to a cycle.
            let Some(cycle_break) =
                break_cycle(kind, &remaining, &emitted, &mut edges, &parents)
            else {
                break;
            };
            if let Some(degree) = in_degree.get_mut(&cycle_break.entity_id) {
                *degree = degree.saturating_sub(1);
                if *degree == 0
                    && let Some(key) = sort_key.get(&cycle_break.entity_id)
                {
                    ready.insert(key.clone());
                }
            }
            breaks.push(cycle_break);
            continue;
        };

        remaining.remove(&next);
        let id = next.1;
        for &idx in children.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if edges[idx].removed {
                continue;
            }
            edges[idx].removed = true;
            let child = &edges[idx].child;
            if let Some(degree) = in_degree.get_mut(child) {
                *degree = degree.saturating_sub(1);
                if *degree == 0
                    && !emitted.contains(child)
                    && let Some(key) = sort_key.get(child)
                {
                    ready.insert(key.clone());
                }
            }
        }
        emitted.insert(id.clone());
        ordered.push(id);
    }

    (ordered, breaks)
}

fn break_cycle(
    kind: EntityKind,
    remaining: &BTreeSet<(DateTime<Utc>, String)>,
    emitted: &HashSet<String>,
    edges: &mut [TierEdge],
    parents: &HashMap<String, Vec<usize>>,
) -> Option<CycleBreak> {
    let (_, start) = remaining.first()?;
    let mut path: Vec<String> = Vec::new();
    let mut path_edges: Vec<usize> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut current = start.clone();

    let cycle_start = loop {
        if let Some(&pos) = position.get(&current) {
            break pos;
        }
        position.insert(current.clone(), path.len());
        let idx = parents
            .get(&current)?
            .iter()
            .copied()
            .find(|&idx| !edges[idx].removed && !emitted.contains(&edges[idx].parent))?;
        path.push(current);
        path_edges.push(idx);
        current = edges[idx].parent.clone();
    };

    let cycle = path[cycle_start..].to_vec();
    let (offset, _) = cycle
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.cmp(b))?;
    let idx = path_edges[cycle_start + offset];
    edges[idx].removed = true;

    Some(CycleBreak {
        kind,
        field: edges[idx].field,
        entity_id: edges[idx].child.clone(),
        target_id: edges[idx].parent.clone(),
        cycle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, Goal, GoalStatus, Task, TaskPriority, TaskStatus, Thought};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    fn goal(id: &str, parent: Option<&str>, day: u32) -> Entity {
        Entity::Goal(Goal {
            id: id.into(),
            title: id.into(),
            description: None,
            status: GoalStatus::Active,
            target_date: None,
            parent_goal_id: parent.map(String::from),
            created_at: at(day),
            updated_at: None,
            version: None,
        })
    }

    fn task(id: &str, parent: Option<&str>, day: u32) -> Entity {
        Entity::Task(Task {
            id: id.into(),
            title: id.into(),
            notes: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
            completed_at: None,
            project_id: None,
            goal_id: None,
            parent_task_id: parent.map(String::from),
            thought_ids: vec![],
            created_at: at(day),
            updated_at: None,
            version: None,
        })
    }

    fn thought(id: &str, tasks: &[&str], day: u32) -> Entity {
        Entity::Thought(Thought {
            id: id.into(),
            content: id.into(),
            tags: vec![],
            task_ids: tasks.iter().map(|s| s.to_string()).collect(),
            project_ids: vec![],
            goal_ids: vec![],
            created_at: at(day),
            updated_at: None,
            version: None,
        })
    }

    #[test]
    fn test_no_references_keeps_creation_order() {
        let collection = EntityCollection::from_entities(vec![
            task("t2", None, 2),
            task("t1", None, 3),
            goal("g1", None, 9),
            task("t3", None, 1),
        ]);
        let map = map_relationships(&collection);
        assert_eq!(map.flat_order(), vec!["g1", "t3", "t2", "t1"]);
        assert!(map.cycle_breaks().is_empty());
    }

    #[test]
    fn test_ties_broken_by_id() {
        let collection =
            EntityCollection::from_entities(vec![task("b", None, 1), task("a", None, 1)]);
        let map = map_relationships(&collection);
        assert_eq!(map.order_for(EntityKind::Task), ["a", "b"]);
    }

    #[test]
    fn test_parent_before_child() {
        // Child created before parent must still load after it.
        let collection = EntityCollection::from_entities(vec![
            task("child", Some("parent"), 1),
            task("grandchild", Some("child"), 2),
            task("parent", None, 5),
        ]);
        let map = map_relationships(&collection);
        assert_eq!(
            map.order_for(EntityKind::Task),
            ["parent", "child", "grandchild"]
        );
    }

    #[test]
    fn test_parent_outside_collection_does_not_block() {
        let collection = EntityCollection::from_entities(vec![task("t1", Some("elsewhere"), 1)]);
        let map = map_relationships(&collection);
        assert_eq!(map.order_for(EntityKind::Task), ["t1"]);
        assert_eq!(map.graph().referrers_of("elsewhere").len(), 1);
    }

    #[test]
    fn test_cycle_broken_at_largest_id() {
        let collection = EntityCollection::from_entities(vec![
            goal("g-a", Some("g-c"), 1),
            goal("g-b", Some("g-a"), 2),
            goal("g-c", Some("g-b"), 3),
        ]);
        let map = map_relationships(&collection);

        let breaks = map.cycle_breaks();
        assert_eq!(breaks.len(), 1);
        assert_eq!(breaks[0].entity_id, "g-c");
        assert_eq!(breaks[0].target_id, "g-b");
        assert_eq!(breaks[0].field, RefField::GoalParent);
        assert_eq!(breaks[0].cycle.len(), 3);

        // With g-c -> g-b dropped, g-c is a root: g-c, g-a, g-b.
        assert_eq!(map.order_for(EntityKind::Goal), ["g-c", "g-a", "g-b"]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let collection = EntityCollection::from_entities(vec![task("t1", Some("t1"), 1)]);
        let map = map_relationships(&collection);
        assert_eq!(map.order_for(EntityKind::Task), ["t1"]);
        assert_eq!(map.cycle_breaks().len(), 1);
        assert_eq!(map.cycle_breaks()[0].cycle, vec!["t1".to_string()]);
    }

    #[test]
    fn test_cycle_with_tail() {
        let collection = EntityCollection::from_entities(vec![
            task("x", Some("y"), 1),
            task("y", Some("x"), 2),
            task("z", Some("y"), 3),
        ]);
        let map = map_relationships(&collection);
        assert_eq!(map.cycle_breaks().len(), 1);
        assert_eq!(map.cycle_breaks()[0].entity_id, "y");
        assert_eq!(map.order_for(EntityKind::Task), ["y", "x", "z"]);
    }

    #[test]
    fn test_referrers_lookup() {
        let collection = EntityCollection::from_entities(vec![
            task("t1", None, 1),
            thought("th1", &["t1"], 2),
            thought("th2", &["t1", "t1"], 3),
        ]);
        let map = map_relationships(&collection);
        let graph = map.graph();

        assert_eq!(graph.references_of("th1").len(), 1);
        assert_eq!(graph.referrers_of("t1").len(), 3);
        assert_eq!(
            graph.referrers_of_kind("t1", EntityKind::Thought),
            vec!["th1", "th2"]
        );
        assert!(graph.referrers_of_kind("t1", EntityKind::Person).is_empty());
        assert_eq!(graph.kind_of("th2"), Some(EntityKind::Thought));
        assert_eq!(graph.node_count(), 3);
    }
}

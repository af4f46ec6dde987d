//! Core types for the notebook transfer engine.
//!
//! Seven record kinds make up a notebook. Each kind is a plain struct and
//! [`Entity`] is the closed union over them, so the reference schema in
//! [`RefField`] can be matched exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// The seven record kinds, declared in import order.
///
/// `Ord` follows declaration order, which is the fixed kind-level dependency
/// order: goals first, people last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Goal,
    Project,
    Task,
    Thought,
    Mood,
    FocusSession,
    Person,
}

impl EntityKind {
    /// All kinds in import order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Goal,
        EntityKind::Project,
        EntityKind::Task,
        EntityKind::Thought,
        EntityKind::Mood,
        EntityKind::FocusSession,
        EntityKind::Person,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Goal => "goal",
            EntityKind::Project => "project",
            EntityKind::Task => "task",
            EntityKind::Thought => "thought",
            EntityKind::Mood => "mood",
            EntityKind::FocusSession => "focus_session",
            EntityKind::Person => "person",
        }
    }

    /// Key of this kind's array in a bundle's `data` object.
    pub fn collection_key(&self) -> &'static str {
        match self {
            EntityKind::Goal => "goals",
            EntityKind::Project => "projects",
            EntityKind::Task => "tasks",
            EntityKind::Thought => "thoughts",
            EntityKind::Mood => "moods",
            EntityKind::FocusSession => "focusSessions",
            EntityKind::Person => "people",
        }
    }

    /// Reference fields owned by this kind.
    pub fn reference_fields(&self) -> impl Iterator<Item = RefField> + '_ {
        RefField::ALL
            .into_iter()
            .filter(move |field| field.owner() == *self)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Accepts singular, plural and collection-key spellings
    /// (`task`, `tasks`, `focus-session`, `focusSessions`, `people`...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "goal" | "goals" => Ok(EntityKind::Goal),
            "project" | "projects" => Ok(EntityKind::Project),
            "task" | "tasks" => Ok(EntityKind::Task),
            "thought" | "thoughts" => Ok(EntityKind::Thought),
            "mood" | "moods" => Ok(EntityKind::Mood),
            "focussession" | "focussessions" | "focus" => Ok(EntityKind::FocusSession),
            "person" | "people" | "persons" => Ok(EntityKind::Person),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// Task workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    OnHold,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Archived)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Active,
    Achieved,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Achieved => "achieved",
            GoalStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, GoalStatus::Achieved | GoalStatus::Abandoned)
    }
}

/// A long-running goal. Goals may nest under a parent goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_goal_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// A project, optionally serving a goal and optionally nested under a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_project_id: Option<String>,
    /// Sibling links. These never constrain import order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_project_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thought_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thought_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goal_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// A mood check-in. `rating` is 1 (worst) through 5 (best).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mood {
    pub id: String,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thought_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// A timed focus session. Always worked against a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// A person in the user's relationship notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thought_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// One notebook record of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Goal(Goal),
    Project(Project),
    Task(Task),
    Thought(Thought),
    Mood(Mood),
    FocusSession(FocusSession),
    Person(Person),
}

/// Dispatch an expression over every variant's inner record.
macro_rules! with_record {
    ($entity:expr, $record:ident => $body:expr) => {
        match $entity {
            Entity::Goal($record) => $body,
            Entity::Project($record) => $body,
            Entity::Task($record) => $body,
            Entity::Thought($record) => $body,
            Entity::Mood($record) => $body,
            Entity::FocusSession($record) => $body,
            Entity::Person($record) => $body,
        }
    };
}

/// How a reference field holds its target(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Whether a reference constrains import order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefRole {
    /// Referent must be written first (earlier kind or same-kind parent).
    Ordering,
    /// Association only; resolved after the referent is written.
    Link,
}

/// Every reference field in the notebook schema.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum RefField {
    GoalParent,
    ProjectGoal,
    ProjectParent,
    ProjectRelated,
    ProjectThoughts,
    TaskProject,
    TaskGoal,
    TaskParent,
    TaskThoughts,
    ThoughtTasks,
    ThoughtProjects,
    ThoughtGoals,
    MoodThoughts,
    FocusTask,
    FocusProject,
    PersonThoughts,
    PersonTasks,
}

impl RefField {
    pub const ALL: [RefField; 17] = [
        RefField::GoalParent,
        RefField::ProjectGoal,
        RefField::ProjectParent,
        RefField::ProjectRelated,
        RefField::ProjectThoughts,
        RefField::TaskProject,
        RefField::TaskGoal,
        RefField::TaskParent,
        RefField::TaskThoughts,
        RefField::ThoughtTasks,
        RefField::ThoughtProjects,
        RefField::ThoughtGoals,
        RefField::MoodThoughts,
        RefField::FocusTask,
        RefField::FocusProject,
        RefField::PersonThoughts,
        RefField::PersonTasks,
    ];

    /// The kind that holds this field.
    pub fn owner(&self) -> EntityKind {
        match self {
            RefField::GoalParent => EntityKind::Goal,
            RefField::ProjectGoal
            | RefField::ProjectParent
            | RefField::ProjectRelated
            | RefField::ProjectThoughts => EntityKind::Project,
            RefField::TaskProject
            | RefField::TaskGoal
            | RefField::TaskParent
            | RefField::TaskThoughts => EntityKind::Task,
            RefField::ThoughtTasks | RefField::ThoughtProjects | RefField::ThoughtGoals => {
                EntityKind::Thought
            }
            RefField::MoodThoughts => EntityKind::Mood,
            RefField::FocusTask | RefField::FocusProject => EntityKind::FocusSession,
            RefField::PersonThoughts | RefField::PersonTasks => EntityKind::Person,
        }
    }

    /// The kind this field points at.
    pub fn target(&self) -> EntityKind {
        match self {
            RefField::GoalParent
            | RefField::ProjectGoal
            | RefField::TaskGoal
            | RefField::ThoughtGoals => EntityKind::Goal,
            RefField::ProjectParent
            | RefField::ProjectRelated
            | RefField::TaskProject
            | RefField::ThoughtProjects
            | RefField::FocusProject => EntityKind::Project,
            RefField::TaskParent
            | RefField::ThoughtTasks
            | RefField::FocusTask
            | RefField::PersonTasks => EntityKind::Task,
            RefField::ProjectThoughts
            | RefField::TaskThoughts
            | RefField::MoodThoughts
            | RefField::PersonThoughts => EntityKind::Thought,
        }
    }

    /// Field name as it appears in bundle JSON.
    pub fn name(&self) -> &'static str {
        match self {
            RefField::GoalParent => "parentGoalId",
            RefField::ProjectGoal => "goalId",
            RefField::ProjectParent => "parentProjectId",
            RefField::ProjectRelated => "relatedProjectIds",
            RefField::ProjectThoughts => "thoughtIds",
            RefField::TaskProject => "projectId",
            RefField::TaskGoal => "goalId",
            RefField::TaskParent => "parentTaskId",
            RefField::TaskThoughts => "thoughtIds",
            RefField::ThoughtTasks => "taskIds",
            RefField::ThoughtProjects => "projectIds",
            RefField::ThoughtGoals => "goalIds",
            RefField::MoodThoughts => "thoughtIds",
            RefField::FocusTask => "taskId",
            RefField::FocusProject => "projectId",
            RefField::PersonThoughts => "thoughtIds",
            RefField::PersonTasks => "taskIds",
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            RefField::ProjectRelated
            | RefField::ProjectThoughts
            | RefField::TaskThoughts
            | RefField::ThoughtTasks
            | RefField::ThoughtProjects
            | RefField::ThoughtGoals
            | RefField::MoodThoughts
            | RefField::PersonThoughts
            | RefField::PersonTasks => Cardinality::Many,
            _ => Cardinality::One,
        }
    }

    /// A required reference cannot be cleared; its entity is skipped instead.
    pub fn is_required(&self) -> bool {
        matches!(self, RefField::FocusTask)
    }

    pub fn role(&self) -> RefRole {
        match self {
            RefField::ProjectRelated | RefField::ProjectThoughts | RefField::TaskThoughts => {
                RefRole::Link
            }
            _ => RefRole::Ordering,
        }
    }

    /// Same-kind ordering reference (parent/child).
    pub fn is_parent_link(&self) -> bool {
        self.role() == RefRole::Ordering && self.owner() == self.target()
    }
}

impl fmt::Display for RefField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner(), self.name())
    }
}

/// A single outgoing reference of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub field: RefField,
    pub target_id: String,
}

/// What to do with one referenced identifier during a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    Keep,
    Replace(String),
    /// Drop the value. Ignored for required fields.
    Clear,
}

enum Slot<'a> {
    Required(&'a String),
    Optional(&'a Option<String>),
    List(&'a Vec<String>),
}

enum SlotMut<'a> {
    Required(&'a mut String),
    Optional(&'a mut Option<String>),
    List(&'a mut Vec<String>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Goal(_) => EntityKind::Goal,
            Entity::Project(_) => EntityKind::Project,
            Entity::Task(_) => EntityKind::Task,
            Entity::Thought(_) => EntityKind::Thought,
            Entity::Mood(_) => EntityKind::Mood,
            Entity::FocusSession(_) => EntityKind::FocusSession,
            Entity::Person(_) => EntityKind::Person,
        }
    }

    pub fn id(&self) -> &str {
        with_record!(self, r => r.id.as_str())
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        with_record!(self, r => r.id = id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        with_record!(self, r => r.created_at)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        with_record!(self, r => r.updated_at)
    }

    pub fn set_updated_at(&mut self, at: Option<DateTime<Utc>>) {
        with_record!(self, r => r.updated_at = at)
    }

    /// Last-modified time, falling back to creation time.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.updated_at().unwrap_or_else(|| self.created_at())
    }

    pub fn version(&self) -> Option<u64> {
        with_record!(self, r => r.version)
    }

    /// Workflow status string for kinds that have one.
    pub fn status(&self) -> Option<&'static str> {
        match self {
            Entity::Goal(g) => Some(g.status.as_str()),
            Entity::Project(p) => Some(p.status.as_str()),
            Entity::Task(t) => Some(t.status.as_str()),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self {
            Entity::Goal(g) => g.status.is_completed(),
            Entity::Project(p) => p.status.is_completed(),
            Entity::Task(t) => t.status.is_completed(),
            _ => false,
        }
    }

    /// Short human-readable label for logs.
    pub fn label(&self) -> String {
        let text = match self {
            Entity::Goal(g) => g.title.as_str(),
            Entity::Project(p) => p.title.as_str(),
            Entity::Task(t) => t.title.as_str(),
            Entity::Thought(t) => t.content.as_str(),
            Entity::Mood(m) => m.note.as_deref().unwrap_or("mood"),
            Entity::FocusSession(f) => f.notes.as_deref().unwrap_or("focus session"),
            Entity::Person(p) => p.name.as_str(),
        };
        let mut label: String = text.chars().take(40).collect();
        if text.chars().count() > 40 {
            label.push_str("...");
        }
        label
    }

    fn slot(&self, field: RefField) -> Option<Slot<'_>> {
        let slot = match (self, field) {
            (Entity::Goal(g), RefField::GoalParent) => Slot::Optional(&g.parent_goal_id),
            (Entity::Project(p), RefField::ProjectGoal) => Slot::Optional(&p.goal_id),
            (Entity::Project(p), RefField::ProjectParent) => {
                Slot::Optional(&p.parent_project_id)
            }
            (Entity::Project(p), RefField::ProjectRelated) => {
                Slot::List(&p.related_project_ids)
            }
            (Entity::Project(p), RefField::ProjectThoughts) => Slot::List(&p.thought_ids),
            (Entity::Task(t), RefField::TaskProject) => Slot::Optional(&t.project_id),
            (Entity::Task(t), RefField::TaskGoal) => Slot::Optional(&t.goal_id),
            (Entity::Task(t), RefField::TaskParent) => Slot::Optional(&t.parent_task_id),
            (Entity::Task(t), RefField::TaskThoughts) => Slot::List(&t.thought_ids),
            (Entity::Thought(t), RefField::ThoughtTasks) => Slot::List(&t.task_ids),
            (Entity::Thought(t), RefField::ThoughtProjects) => Slot::List(&t.project_ids),
            (Entity::Thought(t), RefField::ThoughtGoals) => Slot::List(&t.goal_ids),
            (Entity::Mood(m), RefField::MoodThoughts) => Slot::List(&m.thought_ids),
            (Entity::FocusSession(f), RefField::FocusTask) => Slot::Required(&f.task_id),
            (Entity::FocusSession(f), RefField::FocusProject) => Slot::Optional(&f.project_id),
            (Entity::Person(p), RefField::PersonThoughts) => Slot::List(&p.thought_ids),
            (Entity::Person(p), RefField::PersonTasks) => Slot::List(&p.task_ids),
            _ => return None,
        };
        Some(slot)
    }

    fn slot_mut(&mut self, field: RefField) -> Option<SlotMut<'_>> {
        let slot = match (self, field) {
            (Entity::Goal(g), RefField::GoalParent) => SlotMut::Optional(&mut g.parent_goal_id),
            (Entity::Project(p), RefField::ProjectGoal) => SlotMut::Optional(&mut p.goal_id),
            (Entity::Project(p), RefField::ProjectParent) => {
                SlotMut::Optional(&mut p.parent_project_id)
            }
            (Entity::Project(p), RefField::ProjectRelated) => {
                SlotMut::List(&mut p.related_project_ids)
            }
            (Entity::Project(p), RefField::ProjectThoughts) => SlotMut::List(&mut p.thought_ids),
            (Entity::Task(t), RefField::TaskProject) => SlotMut::Optional(&mut t.project_id),
            (Entity::Task(t), RefField::TaskGoal) => SlotMut::Optional(&mut t.goal_id),
            (Entity::Task(t), RefField::TaskParent) => SlotMut::Optional(&mut t.parent_task_id),
            (Entity::Task(t), RefField::TaskThoughts) => SlotMut::List(&mut t.thought_ids),
            (Entity::Thought(t), RefField::ThoughtTasks) => SlotMut::List(&mut t.task_ids),
            (Entity::Thought(t), RefField::ThoughtProjects) => SlotMut::List(&mut t.project_ids),
            (Entity::Thought(t), RefField::ThoughtGoals) => SlotMut::List(&mut t.goal_ids),
            (Entity::Mood(m), RefField::MoodThoughts) => SlotMut::List(&mut m.thought_ids),
            (Entity::FocusSession(f), RefField::FocusTask) => {
                SlotMut::Required(&mut f.task_id)
            }
            (Entity::FocusSession(f), RefField::FocusProject) => {
                SlotMut::Optional(&mut f.project_id)
            }
            (Entity::Person(p), RefField::PersonThoughts) => SlotMut::List(&mut p.thought_ids),
            (Entity::Person(p), RefField::PersonTasks) => SlotMut::List(&mut p.task_ids),
            _ => return None,
        };
        Some(slot)
    }

    /// Identifiers held in one reference field (empty for unset or foreign fields).
    pub fn reference_ids(&self, field: RefField) -> Vec<&str> {
        match self.slot(field) {
            Some(Slot::Required(id)) if !id.is_empty() => vec![id.as_str()],
            Some(Slot::Required(_)) | None => Vec::new(),
            Some(Slot::Optional(id)) => id.as_deref().into_iter().collect(),
            Some(Slot::List(ids)) => ids.iter().map(String::as_str).collect(),
        }
    }

    /// All non-null outgoing references, in schema order.
    pub fn references(&self) -> Vec<Reference> {
        self.kind()
            .reference_fields()
            .flat_map(|field| {
                self.reference_ids(field)
                    .into_iter()
                    .map(move |id| Reference {
                        field,
                        target_id: id.to_string(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Rewrite every identifier held in `field`. Returns true if anything changed.
    ///
    /// `Clear` on a required field leaves the value in place.
    pub fn map_reference(
        &mut self,
        field: RefField,
        mut update: impl FnMut(&str) -> RefUpdate,
    ) -> bool {
        match self.slot_mut(field) {
            None => false,
            Some(SlotMut::Required(id)) => match update(id) {
                RefUpdate::Replace(new_id) if *id != new_id => {
                    *id = new_id;
                    true
                }
                _ => false,
            },
            Some(SlotMut::Optional(slot)) => {
                let Some(current) = slot.as_deref() else {
                    return false;
                };
                match update(current) {
                    RefUpdate::Keep => false,
                    RefUpdate::Replace(new_id) => {
                        let changed = current != new_id;
                        *slot = Some(new_id);
                        changed
                    }
                    RefUpdate::Clear => {
                        *slot = None;
                        true
                    }
                }
            }
            Some(SlotMut::List(ids)) => {
                let mut changed = false;
                let mut rewritten = Vec::with_capacity(ids.len());
                for id in ids.iter() {
                    match update(id) {
                        RefUpdate::Keep => rewritten.push(id.clone()),
                        RefUpdate::Replace(new_id) => {
                            changed |= *id != new_id;
                            rewritten.push(new_id);
                        }
                        RefUpdate::Clear => changed = true,
                    }
                }
                *ids = rewritten;
                changed
            }
        }
    }

    /// Remove one target identifier from a field.
    pub fn clear_reference(&mut self, field: RefField, target_id: &str) -> bool {
        self.map_reference(field, |id| {
            if id == target_id {
                RefUpdate::Clear
            } else {
                RefUpdate::Keep
            }
        })
    }

    /// Serialize the inner record (without the `kind` tag).
    pub fn to_record_json(&self) -> serde_json::Result<serde_json::Value> {
        with_record!(self, r => serde_json::to_value(r))
    }

    /// Deserialize a bare record of the given kind.
    pub fn from_record_json(kind: EntityKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Goal => Entity::Goal(serde_json::from_value(value)?),
            EntityKind::Project => Entity::Project(serde_json::from_value(value)?),
            EntityKind::Task => Entity::Task(serde_json::from_value(value)?),
            EntityKind::Thought => Entity::Thought(serde_json::from_value(value)?),
            EntityKind::Mood => Entity::Mood(serde_json::from_value(value)?),
            EntityKind::FocusSession => Entity::FocusSession(serde_json::from_value(value)?),
            EntityKind::Person => Entity::Person(serde_json::from_value(value)?),
        })
    }
}

/// The records of a notebook grouped by kind, as carried in a bundle's `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCollection {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
    #[serde(default)]
    pub moods: Vec<Mood>,
    #[serde(default)]
    pub focus_sessions: Vec<FocusSession>,
    #[serde(default)]
    pub people: Vec<Person>,
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut collection = Self::new();
        for entity in entities {
            collection.push(entity);
        }
        collection
    }

    pub fn push(&mut self, entity: Entity) {
        match entity {
            Entity::Goal(g) => self.goals.push(g),
            Entity::Project(p) => self.projects.push(p),
            Entity::Task(t) => self.tasks.push(t),
            Entity::Thought(t) => self.thoughts.push(t),
            Entity::Mood(m) => self.moods.push(m),
            Entity::FocusSession(f) => self.focus_sessions.push(f),
            Entity::Person(p) => self.people.push(p),
        }
    }

    /// Records of one kind, cloned into the union type.
    pub fn of_kind(&self, kind: EntityKind) -> Vec<Entity> {
        match kind {
            EntityKind::Goal => self.goals.iter().cloned().map(Entity::Goal).collect(),
            EntityKind::Project => self.projects.iter().cloned().map(Entity::Project).collect(),
            EntityKind::Task => self.tasks.iter().cloned().map(Entity::Task).collect(),
            EntityKind::Thought => self.thoughts.iter().cloned().map(Entity::Thought).collect(),
            EntityKind::Mood => self.moods.iter().cloned().map(Entity::Mood).collect(),
            EntityKind::FocusSession => self
                .focus_sessions
                .iter()
                .cloned()
                .map(Entity::FocusSession)
                .collect(),
            EntityKind::Person => self.people.iter().cloned().map(Entity::Person).collect(),
        }
    }

    /// All records in kind order.
    pub fn entities(&self) -> Vec<Entity> {
        EntityKind::ALL
            .iter()
            .flat_map(|kind| self.of_kind(*kind))
            .collect()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Goal => self.goals.len(),
            EntityKind::Project => self.projects.len(),
            EntityKind::Task => self.tasks.len(),
            EntityKind::Thought => self.thoughts.len(),
            EntityKind::Mood => self.moods.len(),
            EntityKind::FocusSession => self.focus_sessions.len(),
            EntityKind::Person => self.people.len(),
        }
    }

    pub fn len(&self) -> usize {
        EntityKind::ALL.iter().map(|kind| self.count(*kind)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-kind counts keyed by collection key (`tasks`, `focusSessions`, ...).
    pub fn counts(&self) -> BTreeMap<String, usize> {
        EntityKind::ALL
            .iter()
            .map(|kind| (kind.collection_key().to_string(), self.count(*kind)))
            .collect()
    }

    pub fn ids(&self) -> HashSet<String> {
        self.entities()
            .into_iter()
            .map(|e| e.id().to_string())
            .collect()
    }

    /// Index of all records by identifier.
    pub fn index(&self) -> HashMap<String, Entity> {
        self.entities()
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<Entity> {
        self.entities().into_iter().find(|e| e.id() == id)
    }

    /// Keep only records matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Entity) -> bool) {
        let entities = std::mem::take(self).entities();
        *self = Self::from_entities(entities.into_iter().filter(|e| keep(e)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {}", id),
            notes: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
            completed_at: None,
            project_id: Some("p1".to_string()),
            goal_id: None,
            parent_task_id: None,
            thought_ids: vec!["th1".to_string(), "th2".to_string()],
            created_at: at(1),
            updated_at: None,
            version: None,
        }
    }

    #[test]
    fn test_kind_order_is_declaration_order() {
        let mut kinds = EntityKind::ALL.to_vec();
        kinds.sort();
        assert_eq!(kinds, EntityKind::ALL.to_vec());
        assert!(EntityKind::Goal < EntityKind::Project);
        assert!(EntityKind::Task < EntityKind::Thought);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("tasks".parse::<EntityKind>().unwrap(), EntityKind::Task);
        assert_eq!(
            "focus-session".parse::<EntityKind>().unwrap(),
            EntityKind::FocusSession
        );
        assert_eq!(
            "focusSessions".parse::<EntityKind>().unwrap(),
            EntityKind::FocusSession
        );
        assert_eq!("people".parse::<EntityKind>().unwrap(), EntityKind::Person);
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_ordering_references_never_point_forward() {
        for field in RefField::ALL {
            if field.role() == RefRole::Ordering {
                assert!(
                    field.target() <= field.owner(),
                    "{} points at a later kind",
                    field
                );
            }
        }
    }

    #[test]
    fn test_every_field_has_a_slot() {
        let samples = [
            Entity::Goal(Goal {
                id: "g".into(),
                title: "g".into(),
                description: None,
                status: GoalStatus::Active,
                target_date: None,
                parent_goal_id: None,
                created_at: at(1),
                updated_at: None,
                version: None,
            }),
            Entity::Task(task("t")),
        ];
        for sample in &samples {
            for field in sample.kind().reference_fields() {
                assert!(sample.slot(field).is_some(), "missing slot for {}", field);
            }
        }
    }

    #[test]
    fn test_references_lists_all_targets() {
        let entity = Entity::Task(task("t1"));
        let refs = entity.references();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].field, RefField::TaskProject);
        assert_eq!(refs[0].target_id, "p1");
        assert_eq!(refs[2].target_id, "th2");
    }

    #[test]
    fn test_map_reference_replace_and_clear() {
        let mut entity = Entity::Task(task("t1"));
        assert!(entity.map_reference(RefField::TaskProject, |_| RefUpdate::Replace(
            "p2".to_string()
        )));
        assert_eq!(entity.reference_ids(RefField::TaskProject), vec!["p2"]);

        assert!(entity.clear_reference(RefField::TaskThoughts, "th1"));
        assert_eq!(entity.reference_ids(RefField::TaskThoughts), vec!["th2"]);

        assert!(entity.map_reference(RefField::TaskProject, |_| RefUpdate::Clear));
        assert!(entity.reference_ids(RefField::TaskProject).is_empty());
        assert!(!entity.map_reference(RefField::TaskProject, |_| RefUpdate::Clear));
    }

    #[test]
    fn test_required_reference_is_never_cleared() {
        let mut entity = Entity::FocusSession(FocusSession {
            id: "f1".into(),
            task_id: "t1".into(),
            project_id: None,
            started_at: at(2),
            duration_minutes: 25,
            completed: true,
            notes: None,
            created_at: at(2),
            updated_at: None,
            version: None,
        });
        assert!(!entity.map_reference(RefField::FocusTask, |_| RefUpdate::Clear));
        assert_eq!(entity.reference_ids(RefField::FocusTask), vec!["t1"]);
    }

    #[test]
    fn test_collection_serializes_with_bundle_keys() {
        let mut collection = EntityCollection::new();
        collection.push(Entity::Task(task("t1")));
        let json = serde_json::to_value(&collection).unwrap();
        assert!(json.get("tasks").is_some());
        assert!(json.get("focusSessions").is_some());
        assert_eq!(json["tasks"][0]["projectId"], "p1");
        assert_eq!(collection.counts().get("tasks"), Some(&1));
    }

    #[test]
    fn test_record_json_roundtrip_keeps_kind() {
        let entity = Entity::Task(task("t1"));
        let record = entity.to_record_json().unwrap();
        assert!(record.get("kind").is_none());
        let back = Entity::from_record_json(EntityKind::Task, record).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_retain_filters_across_kinds() {
        let mut collection = EntityCollection::from_entities(vec![
            Entity::Task(task("t1")),
            Entity::Task(task("t2")),
        ]);
        collection.retain(|e| e.id() != "t1");
        assert_eq!(collection.len(), 1);
        assert!(collection.find("t2").is_some());
    }
}

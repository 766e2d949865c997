/// File-backed todo records.
///
/// The whole collection lives in one JSON file. Every load-mutate-save cycle
/// runs under the store's mutex and the file is replaced through a temp file
/// plus rename, so concurrent handlers never interleave partial writes.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};

pub const DATE_TOKEN: &str = "{date}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[serde(alias = "open")]
    Pending,
    #[serde(alias = "in progress", alias = "in-progress")]
    #[value(name = "in_progress")]
    InProgress,
    #[serde(alias = "closed", alias = "done")]
    Completed,
}

impl TodoStatus {
    pub fn label(self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    Medium,
    Low,
}

impl TodoPriority {
    pub fn label(self) -> &'static str {
        match self {
            TodoPriority::High => "high",
            TodoPriority::Medium => "medium",
            TodoPriority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoRecord {
    pub id: u64,
    pub description: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: Option<TodoPriority>,
    #[serde(default, deserialize_with = "optional_date")]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new record. Status always starts as pending.
#[derive(Debug, Clone, Default)]
pub struct NewTodo {
    pub description: String,
    pub priority: Option<TodoPriority>,
    pub due_date: Option<NaiveDate>,
}

/// Only the `Some` fields are applied by an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoPatch {
    pub description: Option<String>,
    pub status: Option<TodoStatus>,
    pub priority: Option<TodoPriority>,
    pub due_date: Option<NaiveDate>,
}

impl TodoPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }
}

/// Equality filters; an empty filter matches every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TodoFilter {
    pub status: Option<TodoStatus>,
    pub priority: Option<TodoPriority>,
    pub due_date: Option<NaiveDate>,
}

impl TodoFilter {
    pub fn matches(&self, record: &TodoRecord) -> bool {
        self.status.is_none_or(|status| record.status == status)
            && self
                .priority
                .is_none_or(|priority| record.priority == Some(priority))
            && self.due_date.is_none_or(|due| record.due_date == Some(due))
    }
}

/// How an update or delete finds its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoSelector {
    Id(u64),
    /// Case-insensitive match on the current description.
    Description(String),
}

impl TodoSelector {
    fn matches(&self, record: &TodoRecord) -> bool {
        match self {
            TodoSelector::Id(id) => record.id == *id,
            TodoSelector::Description(text) => {
                record.description.trim().to_lowercase() == text.trim().to_lowercase()
            }
        }
    }
}

impl std::fmt::Display for TodoSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TodoSelector::Id(id) => write!(f, "id {id}"),
            TodoSelector::Description(text) => write!(f, "'{text}'"),
        }
    }
}

#[derive(Debug)]
enum StoreLocation {
    Fixed(PathBuf),
    /// Expanded per operation; the file rolls over at midnight.
    Dated(String),
}

#[derive(Debug)]
pub struct TodoStore {
    location: StoreLocation,
    lock: Mutex<()>,
}

impl TodoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::Fixed(path.into()),
            lock: Mutex::new(()),
        }
    }

    /// Open the store at `template`; a `{date}` token resolves to the current day.
    pub fn from_template(template: &str) -> Self {
        if !template.contains(DATE_TOKEN) {
            return Self::new(template);
        }
        Self {
            location: StoreLocation::Dated(template.to_string()),
            lock: Mutex::new(()),
        }
    }

    /// File backing the store today.
    pub fn path(&self) -> PathBuf {
        self.path_on(Utc::now().date_naive())
    }

    pub fn path_on(&self, day: NaiveDate) -> PathBuf {
        match &self.location {
            StoreLocation::Fixed(path) => path.clone(),
            StoreLocation::Dated(template) => expand_store_path(template, day),
        }
    }

    /// Consistent snapshot of every record. A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<TodoRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        read_records(&self.path())
    }

    pub fn add(&self, todo: NewTodo) -> Result<TodoRecord> {
        let created = self.mutate(|records| {
            let now = Utc::now();
            let record = TodoRecord {
                id: next_id(records),
                description: todo.description.trim().to_string(),
                status: TodoStatus::Pending,
                priority: todo.priority,
                due_date: todo.due_date,
                created_at: now,
                updated_at: now,
            };
            records.push(record.clone());
            Some(record)
        })?;
        created.context("todo store rejected a new record")
    }

    /// Apply `patch` to the first record matching `selector`; `None` when absent.
    pub fn update(&self, selector: &TodoSelector, patch: &TodoPatch) -> Result<Option<TodoRecord>> {
        self.mutate(|records| {
            let record = records.iter_mut().find(|record| selector.matches(record))?;
            if let Some(description) = patch.description.as_deref() {
                record.description = description.trim().to_string();
            }
            if let Some(status) = patch.status {
                record.status = status;
            }
            if let Some(priority) = patch.priority {
                record.priority = Some(priority);
            }
            if let Some(due_date) = patch.due_date {
                record.due_date = Some(due_date);
            }
            record.updated_at = Utc::now();
            Some(record.clone())
        })
    }

    /// Remove the first record matching `selector`; `None` when absent.
    pub fn delete(&self, selector: &TodoSelector) -> Result<Option<TodoRecord>> {
        self.mutate(|records| {
            let index = records.iter().position(|record| selector.matches(record))?;
            Some(records.remove(index))
        })
    }

    pub fn list(&self, filter: &TodoFilter) -> Result<Vec<TodoRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    /// Load, apply `change`, and write back only when it returns `Some`.
    fn mutate<T>(&self, change: impl FnOnce(&mut Vec<TodoRecord>) -> Option<T>) -> Result<Option<T>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path();
        let mut records = read_records(&path)?;
        let outcome = change(&mut records);
        if outcome.is_some() {
            write_records(&path, &records)?;
        }
        Ok(outcome)
    }
}

fn read_records(path: &Path) -> Result<Vec<TodoRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read todo store '{}'", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse todo store '{}'", path.display()))
}

fn write_records(path: &Path, records: &[TodoRecord]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create todo store directory '{}'", parent.display())
        })?;
    }

    let json = serde_json::to_string_pretty(records).context("failed to serialize todo store")?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, json)
        .with_context(|| format!("failed to write todo store '{}'", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace todo store '{}'", path.display()))
}

fn next_id(records: &[TodoRecord]) -> u64 {
    records.iter().map(|record| record.id).max().unwrap_or(0) + 1
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "todo-list.json".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

pub fn expand_store_path(template: &str, today: NaiveDate) -> PathBuf {
    PathBuf::from(template.replace(DATE_TOKEN, &today.format("%Y-%m-%d").to_string()))
}

/// Accepts `null`, `""`, or a `YYYY-MM-DD` string.
pub(crate) fn optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Some)
            .map_err(|err| serde::de::Error::custom(format!("invalid due_date '{text}': {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> TodoStore {
        TodoStore::new(dir.path().join("todo-list.json"))
    }

    fn new_todo(description: &str) -> NewTodo {
        NewTodo {
            description: description.to_string(),
            ..NewTodo::default()
        }
    }

    #[test]
    fn first_record_gets_id_one_and_pending_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = store.add(new_todo("buy groceries")).unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.status, TodoStatus::Pending);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(store.list(&TodoFilter::default()).unwrap(), vec![record]);
    }

    #[test]
    fn new_ids_continue_from_the_highest_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add(new_todo("one")).unwrap();
        store.add(new_todo("two")).unwrap();
        store.add(new_todo("three")).unwrap();
        store.delete(&TodoSelector::Id(2)).unwrap();

        let record = store.add(new_todo("x")).unwrap();
        assert_eq!(record.id, 4);
    }

    #[test]
    fn update_touches_only_supplied_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let created = store
            .add(NewTodo {
                description: "Call Mom".to_string(),
                priority: Some(TodoPriority::High),
                due_date: None,
            })
            .unwrap();

        let patch = TodoPatch {
            status: Some(TodoStatus::Completed),
            ..TodoPatch::default()
        };
        let updated = store
            .update(&TodoSelector::Description("call mom".to_string()), &patch)
            .unwrap()
            .expect("record should match case-insensitively");
        assert_eq!(updated.status, TodoStatus::Completed);
        assert_eq!(updated.description, "Call Mom");
        assert_eq!(updated.priority, Some(TodoPriority::High));
        assert_eq!(updated.created_at, created.created_at);
    }

    #[test]
    fn missing_records_are_reported_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let patch = TodoPatch {
            status: Some(TodoStatus::Completed),
            ..TodoPatch::default()
        };
        assert!(store.update(&TodoSelector::Id(9), &patch).unwrap().is_none());
        assert!(store.delete(&TodoSelector::Id(9)).unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn filters_apply_equality_on_each_supplied_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let due = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        store
            .add(NewTodo {
                description: "file taxes".to_string(),
                priority: Some(TodoPriority::High),
                due_date: Some(due),
            })
            .unwrap();
        store
            .add(NewTodo {
                description: "water plants".to_string(),
                priority: Some(TodoPriority::Low),
                due_date: None,
            })
            .unwrap();

        let high = TodoFilter {
            priority: Some(TodoPriority::High),
            ..TodoFilter::default()
        };
        let listed = store.list(&high).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].description, "file taxes");

        let dated = TodoFilter {
            due_date: Some(due),
            status: Some(TodoStatus::Pending),
            ..TodoFilter::default()
        };
        assert_eq!(store.list(&dated).unwrap().len(), 1);

        let done = TodoFilter {
            status: Some(TodoStatus::Completed),
            ..TodoFilter::default()
        };
        assert!(store.list(&done).unwrap().is_empty());
    }

    #[test]
    fn unfiltered_list_is_stable_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add(new_todo("a")).unwrap();
        store.add(new_todo("b")).unwrap();
        let first = store.list(&TodoFilter::default()).unwrap();
        let second = store.list(&TodoFilter::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_status_names_and_empty_dates_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"[{"id": 3, "description": "legacy", "status": "open", "priority": "medium",
                 "due_date": "", "created_at": "2024-05-01T10:00:00Z",
                 "updated_at": "2024-05-01T10:00:00Z"},
                {"id": 5, "description": "old", "status": "in progress",
                 "created_at": "2024-05-01T10:00:00Z", "updated_at": "2024-05-01T10:00:00Z"}]"#,
        )
        .unwrap();

        let records = store.load().unwrap();
        assert_eq!(records[0].status, TodoStatus::Pending);
        assert_eq!(records[0].due_date, None);
        assert_eq!(records[1].status, TodoStatus::InProgress);
        assert_eq!(store.add(new_todo("next")).unwrap().id, 6);
    }

    #[test]
    fn writes_replace_the_file_without_leaving_a_temp_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = store.add(new_todo("a")).unwrap();
        store.delete(&TodoSelector::Id(record.id)).unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(store.path().exists());
        assert!(!temp_path(&store.path()).exists());
    }

    #[test]
    fn dated_store_resolves_the_file_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("todo-list-{date}.json").display().to_string();
        let store = TodoStore::from_template(&template);
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let tuesday = monday.succ_opt().unwrap();
        assert_eq!(
            store.path_on(monday),
            dir.path().join("todo-list-2026-10-19.json")
        );
        assert_eq!(
            store.path_on(tuesday),
            dir.path().join("todo-list-2026-10-20.json")
        );
        assert_eq!(store.path(), expand_store_path(&template, Utc::now().date_naive()));

        let fixed = TodoStore::from_template("todos.json");
        assert_eq!(fixed.path_on(monday), PathBuf::from("todos.json"));
    }

    #[test]
    fn date_token_expands_in_store_path() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(
            expand_store_path(".agent-router/todo-list-{date}.json", day),
            PathBuf::from(".agent-router/todo-list-2026-10-16.json")
        );
        assert_eq!(
            expand_store_path("todos.json", day),
            PathBuf::from("todos.json")
        );
    }
}

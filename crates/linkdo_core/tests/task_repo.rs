use linkdo_core::db::open_db_in_memory;
use linkdo_core::model::task::normalize_tags;
use linkdo_core::{
    Edge, EdgeOrigin, EdgeRepository, Position, RepoError, SqliteEdgeRepository,
    SqliteTaskRepository, Task, TaskListQuery, TaskRepository, TaskStatus, WriteOutcome,
};
use std::collections::BTreeMap;

fn task(id: &str, title: &str, tags: &[&str], updated_at: i64) -> Task {
    let mut task = Task::new("ws", id, title);
    task.tags = normalize_tags(tags.iter().copied()).unwrap();
    task.updated_at = updated_at;
    task
}

#[test]
fn insert_and_get_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    let mut stored = task("a", "write docs", &["docs", "writing"], 10);
    stored.description = Some("for the release".to_string());
    stored.status = TaskStatus::InProgress;
    stored.embedding = Some(vec![0.25, -0.5, 1.0]);
    stored.position = Some(Position::new(3.5, -2.0));
    stored.due_date = Some(1_700_000_000_000);
    repo.insert_task(&stored).unwrap();

    let loaded = repo.get_task("ws", "a", false).unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert!(repo.get_task("other-ws", "a", true).unwrap().is_none());
}

#[test]
fn insert_duplicate_key_is_conflict() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    repo.insert_task(&task("a", "first", &[], 1)).unwrap();
    let err = repo.insert_task(&task("a", "second", &[], 2)).unwrap_err();
    assert!(matches!(err, RepoError::Conflict { entity: "task", .. }));

    let mut other_workspace = task("a", "same id elsewhere", &[], 1);
    other_workspace.workspace_id = "ws-2".to_string();
    repo.insert_task(&other_workspace).unwrap();
}

#[test]
fn insert_rejects_invalid_records() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    let err = repo.insert_task(&task("a", "  ", &[], 1)).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[test]
fn upsert_applies_only_strictly_newer_records() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    assert_eq!(
        repo.upsert_task_if_newer(&task("a", "v10", &[], 10)).unwrap(),
        WriteOutcome::Applied
    );
    assert_eq!(
        repo.upsert_task_if_newer(&task("a", "v9", &[], 9)).unwrap(),
        WriteOutcome::Stale
    );
    assert_eq!(
        repo.upsert_task_if_newer(&task("a", "tie", &[], 10)).unwrap(),
        WriteOutcome::Stale
    );
    assert_eq!(repo.get_task("ws", "a", false).unwrap().unwrap().title, "v10");

    assert_eq!(
        repo.upsert_task_if_newer(&task("a", "v11", &[], 11)).unwrap(),
        WriteOutcome::Applied
    );
    assert_eq!(repo.get_task("ws", "a", false).unwrap().unwrap().title, "v11");
}

#[test]
fn upsert_keeps_embedding_for_same_text_and_clears_it_on_text_change() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    let mut original = task("a", "plan sprint", &["team"], 1);
    original.embedding = Some(vec![1.0, 0.0]);
    original.position = Some(Position::new(5.0, 6.0));
    repo.insert_task(&original).unwrap();

    let mut status_only = task("a", "plan sprint", &["team"], 2);
    status_only.status = TaskStatus::Done;
    repo.upsert_task_if_newer(&status_only).unwrap();
    let loaded = repo.get_task("ws", "a", false).unwrap().unwrap();
    assert_eq!(loaded.embedding, Some(vec![1.0, 0.0]));
    assert_eq!(loaded.position, Some(Position::new(5.0, 6.0)));
    assert_eq!(loaded.status, TaskStatus::Done);

    repo.upsert_task_if_newer(&task("a", "plan sprint", &["team", "q3"], 3))
        .unwrap();
    let loaded = repo.get_task("ws", "a", false).unwrap().unwrap();
    assert_eq!(loaded.embedding, None);
    assert_eq!(loaded.position, Some(Position::new(5.0, 6.0)));

    let mut explicit = task("a", "renamed", &[], 4);
    explicit.embedding = Some(vec![0.0, 1.0]);
    explicit.position = Some(Position::new(-1.0, 1.0));
    repo.upsert_task_if_newer(&explicit).unwrap();
    let loaded = repo.get_task("ws", "a", false).unwrap().unwrap();
    assert_eq!(loaded.embedding, Some(vec![0.0, 1.0]));
    assert_eq!(loaded.position, Some(Position::new(-1.0, 1.0)));
}

#[test]
fn list_filters_by_tag_tombstone_and_change_time() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    repo.insert_task(&task("a", "a", &["x", "y"], 1)).unwrap();
    repo.insert_task(&task("b", "b", &["y"], 2)).unwrap();
    let mut gone = task("c", "c", &["x"], 3);
    gone.soft_delete(3);
    repo.insert_task(&gone).unwrap();

    let ids = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.id).collect::<Vec<_>>();

    assert_eq!(ids(repo.list_tasks(&TaskListQuery::live("ws")).unwrap()), vec!["b", "a"]);

    let mut by_tag = TaskListQuery::live("ws");
    by_tag.tag = Some("x".to_string());
    assert_eq!(ids(repo.list_tasks(&by_tag).unwrap()), vec!["a"]);

    let changed = TaskListQuery {
        workspace_id: "ws".to_string(),
        tag: None,
        include_deleted: true,
        updated_after: Some(1),
    };
    assert_eq!(ids(repo.list_tasks(&changed).unwrap()), vec!["c", "b"]);

    assert_eq!(repo.list_tags("ws").unwrap(), vec!["x", "y"]);
    assert!(repo.list_tags("empty").unwrap().is_empty());
}

#[test]
fn set_positions_touches_live_rows_without_advancing_updated_at() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();

    repo.insert_task(&task("a", "a", &[], 7)).unwrap();
    let mut gone = task("b", "b", &[], 8);
    gone.soft_delete(8);
    repo.insert_task(&gone).unwrap();

    let positions = BTreeMap::from([
        ("a".to_string(), Position::new(1.0, 2.0)),
        ("b".to_string(), Position::new(3.0, 4.0)),
        ("missing".to_string(), Position::new(5.0, 6.0)),
    ]);
    assert_eq!(repo.set_positions("ws", &positions).unwrap(), 1);

    let a = repo.get_task("ws", "a", false).unwrap().unwrap();
    assert_eq!(a.position, Some(Position::new(1.0, 2.0)));
    assert_eq!(a.updated_at, 7);
    assert_eq!(repo.get_task("ws", "b", true).unwrap().unwrap().position, None);

    let bad = BTreeMap::from([("a".to_string(), Position::new(f64::NAN, 0.0))]);
    assert!(matches!(
        repo.set_positions("ws", &bad),
        Err(RepoError::Validation(_))
    ));
}

#[test]
fn set_embedding_requires_unchanged_live_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    repo.insert_task(&task("a", "a", &[], 5)).unwrap();

    assert!(!repo.set_embedding("ws", "a", &[1.0, 2.0], 4).unwrap());
    assert!(repo.set_embedding("ws", "a", &[1.0, 2.0], 5).unwrap());

    let loaded = repo.get_task("ws", "a", false).unwrap().unwrap();
    assert_eq!(loaded.embedding, Some(vec![1.0, 2.0]));
    assert_eq!(loaded.updated_at, 5);
}

#[test]
fn tombstone_task_advances_clock_and_requires_live_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    repo.insert_task(&task("a", "a", &[], 100)).unwrap();

    assert_eq!(repo.tombstone_task("ws", "a", 50).unwrap(), 101);
    let loaded = repo.get_task("ws", "a", true).unwrap().unwrap();
    assert!(loaded.deleted);
    assert!(repo.get_task("ws", "a", false).unwrap().is_none());

    let err = repo.tombstone_task("ws", "a", 200).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "task", .. }));
}

#[test]
fn cascade_delete_tombstones_task_and_exactly_its_edges() {
    let conn = open_db_in_memory().unwrap();
    let tasks = SqliteTaskRepository::try_new(&conn).unwrap();
    let edges = SqliteEdgeRepository::try_new(&conn).unwrap();

    for id in ["t", "a", "b", "c"] {
        tasks.insert_task(&task(id, id, &[], 1)).unwrap();
    }
    let ta = Edge::between("ws", "t", "a", 0.5, EdgeOrigin::Inferred, 1);
    let bt = Edge::between("ws", "b", "t", 1.0, EdgeOrigin::Manual, 1);
    let ab = Edge::between("ws", "a", "b", 0.5, EdgeOrigin::Inferred, 1);
    for edge in [&ta, &bt, &ab] {
        edges.upsert_edge_if_newer(edge).unwrap();
    }

    let outcome = tasks.cascade_delete_task("ws", "t", 1_000).unwrap();
    assert_eq!(outcome.edges_tombstoned, 2);
    assert_eq!(outcome.task_updated_at, 1_000);

    assert!(tasks.get_task("ws", "t", true).unwrap().unwrap().deleted);
    assert!(edges.get_edge("ws", &ta.id).unwrap().unwrap().deleted);
    assert!(edges.get_edge("ws", &bt.id).unwrap().unwrap().deleted);
    let untouched = edges.get_edge("ws", &ab.id).unwrap().unwrap();
    assert!(!untouched.deleted);
    assert_eq!(untouched.updated_at, 1);

    let again = tasks.cascade_delete_task("ws", "t", 2_000).unwrap();
    assert_eq!(again.edges_tombstoned, 0);
    assert_eq!(again.task_updated_at, 1_000);

    let err = tasks.cascade_delete_task("ws", "nope", 1).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));
}

#[test]
fn merge_applies_tombstone_and_supersedes_older_edges_together() {
    let conn = open_db_in_memory().unwrap();
    let tasks = SqliteTaskRepository::try_new(&conn).unwrap();
    let edges = SqliteEdgeRepository::try_new(&conn).unwrap();

    for id in ["t", "a", "b"] {
        tasks.insert_task(&task(id, id, &[], 1)).unwrap();
    }
    let older = Edge::between("ws", "t", "a", 0.5, EdgeOrigin::Manual, 5);
    let mut retired = Edge::between("ws", "t", "b", 0.5, EdgeOrigin::Manual, 3);
    retired.deleted = true;
    edges.upsert_edge_if_newer(&older).unwrap();
    edges.upsert_edge_if_newer(&retired).unwrap();

    let mut tombstone = task("t", "t", &[], 20);
    tombstone.deleted = true;
    let merged = tasks.merge_task_if_newer(&tombstone).unwrap();
    assert_eq!(merged.outcome, WriteOutcome::Applied);
    assert_eq!(merged.edges_tombstoned, 2);
    for edge in [&older, &retired] {
        let stored = edges.get_edge("ws", &edge.id).unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.updated_at, 20);
    }

    let stale = tasks.merge_task_if_newer(&tombstone).unwrap();
    assert_eq!(stale.outcome, WriteOutcome::Stale);
    assert_eq!(stale.edges_tombstoned, 0);

    let live = tasks.merge_task_if_newer(&task("a", "a renamed", &[], 30)).unwrap();
    assert_eq!(live.outcome, WriteOutcome::Applied);
    assert_eq!(live.edges_tombstoned, 0);
}

use linkdo_core::db::open_db_in_memory;
use linkdo_core::{
    pair_edge_id, Edge, EdgeListQuery, EdgeOrigin, EdgeRepository, RepoError,
    SqliteEdgeRepository, SqliteTaskRepository, Task, TaskRepository, WriteOutcome,
};
use rusqlite::Connection;

fn seed(conn: &Connection, workspace: &str, ids: &[&str]) {
    let repo = SqliteTaskRepository::try_new(conn).unwrap();
    for id in ids {
        let mut task = Task::new(workspace, *id, format!("task {id}"));
        task.updated_at = 1;
        repo.insert_task(&task).unwrap();
    }
}

#[test]
fn upsert_and_find_by_either_endpoint_order() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws", &["a", "b"]);
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();

    let edge = Edge::between("ws", "b", "a", 0.75, EdgeOrigin::Manual, 5);
    assert_eq!(repo.upsert_edge_if_newer(&edge).unwrap(), WriteOutcome::Applied);

    let found = repo.find_edge_between("ws", "a", "b").unwrap().unwrap();
    assert_eq!(found, edge);
    assert_eq!(found.id, pair_edge_id("a", "b"));
    assert_eq!(repo.get_edge("ws", &edge.id).unwrap().unwrap(), edge);
    assert!(repo.find_edge_between("other", "a", "b").unwrap().is_none());
}

#[test]
fn upsert_is_last_write_wins() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws", &["a", "b"]);
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();

    let mut edge = Edge::between("ws", "a", "b", 0.5, EdgeOrigin::Manual, 10);
    repo.upsert_edge_if_newer(&edge).unwrap();

    edge.weight = 0.1;
    edge.updated_at = 10;
    assert_eq!(repo.upsert_edge_if_newer(&edge).unwrap(), WriteOutcome::Stale);

    edge.deleted = true;
    edge.updated_at = 11;
    assert_eq!(repo.upsert_edge_if_newer(&edge).unwrap(), WriteOutcome::Applied);

    let stored = repo.get_edge("ws", &edge.id).unwrap().unwrap();
    assert!(stored.deleted);
    assert_eq!(stored.weight, 0.1);
    assert!(repo.list_edges(&EdgeListQuery::live("ws")).unwrap().is_empty());
}

#[test]
fn second_id_for_same_pair_is_conflict() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws", &["a", "b"]);
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();

    repo.upsert_edge_if_newer(&Edge::between("ws", "a", "b", 0.5, EdgeOrigin::Manual, 1))
        .unwrap();

    let mut duplicate = Edge::between("ws", "b", "a", 0.5, EdgeOrigin::Manual, 2);
    duplicate.id = "client-generated".to_string();
    let err = repo.upsert_edge_if_newer(&duplicate).unwrap_err();
    assert!(matches!(err, RepoError::Conflict { entity: "edge", .. }));
}

#[test]
fn missing_or_foreign_endpoint_is_missing_reference() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws-1", &["a"]);
    seed(&conn, "ws-2", &["b"]);
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();

    let cross = Edge::between("ws-1", "a", "b", 0.5, EdgeOrigin::Manual, 1);
    let err = repo.upsert_edge_if_newer(&cross).unwrap_err();
    assert!(matches!(err, RepoError::MissingReference { .. }));

    let dangling = Edge::between("ws-1", "a", "ghost", 0.5, EdgeOrigin::Manual, 1);
    assert!(matches!(
        repo.upsert_edge_if_newer(&dangling).unwrap_err(),
        RepoError::MissingReference { .. }
    ));
}

#[test]
fn invalid_weight_is_rejected_before_sql() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws", &["a", "b"]);
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();

    let edge = Edge::between("ws", "a", "b", 1.5, EdgeOrigin::Manual, 1);
    assert!(matches!(
        repo.upsert_edge_if_newer(&edge).unwrap_err(),
        RepoError::Validation(_)
    ));
}

#[test]
fn endpoint_tombstone_skips_newer_edges() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws", &["t", "a", "b", "c"]);
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();
    let tasks = SqliteTaskRepository::try_new(&conn).unwrap();

    let older = Edge::between("ws", "t", "a", 0.5, EdgeOrigin::Manual, 5);
    let newer = Edge::between("ws", "t", "b", 0.5, EdgeOrigin::Manual, 50);
    let unrelated = Edge::between("ws", "a", "c", 0.5, EdgeOrigin::Manual, 5);
    for edge in [&older, &newer, &unrelated] {
        repo.upsert_edge_if_newer(edge).unwrap();
    }

    let mut tombstone = Task::new("ws", "t", "task t");
    tombstone.updated_at = 20;
    tombstone.deleted = true;
    assert_eq!(tasks.merge_task_if_newer(&tombstone).unwrap().edges_tombstoned, 1);
    let stored = repo.get_edge("ws", &older.id).unwrap().unwrap();
    assert!(stored.deleted);
    assert_eq!(stored.updated_at, 20);
    assert!(!repo.get_edge("ws", &newer.id).unwrap().unwrap().deleted);
    assert!(!repo.get_edge("ws", &unrelated.id).unwrap().unwrap().deleted);

    let touching_t = repo
        .list_edges(&EdgeListQuery {
            workspace_id: "ws".to_string(),
            touching: Some("t".to_string()),
            include_deleted: true,
            updated_after: None,
        })
        .unwrap();
    assert_eq!(touching_t.len(), 2);
}

#[test]
fn merge_turns_edges_behind_an_endpoint_tombstone_into_tombstones() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, "ws", &["t", "a", "b"]);
    let tasks = SqliteTaskRepository::try_new(&conn).unwrap();
    tasks.cascade_delete_task("ws", "t", 20).unwrap();
    let repo = SqliteEdgeRepository::try_new(&conn).unwrap();

    let behind = Edge::between("ws", "t", "a", 0.5, EdgeOrigin::Manual, 5);
    assert_eq!(repo.merge_edge_if_newer(&behind).unwrap(), WriteOutcome::Applied);
    let stored = repo.get_edge("ws", &behind.id).unwrap().unwrap();
    assert!(stored.deleted);
    assert_eq!(stored.updated_at, 20);

    let ahead = Edge::between("ws", "a", "t", 0.5, EdgeOrigin::Manual, 25);
    assert_eq!(repo.merge_edge_if_newer(&ahead).unwrap(), WriteOutcome::Applied);
    assert!(!repo.get_edge("ws", &ahead.id).unwrap().unwrap().deleted);

    let untouched = Edge::between("ws", "a", "b", 0.5, EdgeOrigin::Manual, 5);
    repo.merge_edge_if_newer(&untouched).unwrap();
    assert!(!repo.get_edge("ws", &untouched.id).unwrap().unwrap().deleted);
}

//! PostgreSQL backend smoke suite.
//!
//! Runs only when REDBASE_TEST_POSTGRES_URL points at a reachable
//! server, e.g.:
//!
//!   REDBASE_TEST_POSTGRES_URL="host=localhost user=postgres password=postgres dbname=redbase" \
//!       cargo test --test postgres_test

use redbase::{Aggregate, Db, Dialect, Error, Options, TypeId};

fn open() -> Option<Db> {
    let url = std::env::var("REDBASE_TEST_POSTGRES_URL").ok()?;
    let db = Db::open_with(
        &url,
        Options {
            driver: Dialect::Postgres,
            ..Options::default()
        },
    )
    .expect("postgres connection failed");
    db.key().delete_all().expect("flush failed");
    Some(db)
}

#[test]
fn test_postgres_round_trip() {
    let Some(db) = open() else { return };

    db.str().set("name", "alice").unwrap();
    assert_eq!(db.str().get("name").unwrap().unwrap(), "alice");
    assert_eq!(db.str().incr("count", 5).unwrap(), 5);

    for elem in ["a", "b", "c"] {
        db.list().push_back("queue", elem).unwrap();
    }
    assert_eq!(db.list().len("queue").unwrap(), 3);
    assert_eq!(db.list().pop_front("queue").unwrap(), "a");

    db.hash().set_many("user", &[("name", "bob"), ("age", "25")]).unwrap();
    assert_eq!(db.hash().len("user").unwrap(), 2);

    db.set().add("tags", &["x", "y"]).unwrap();
    assert!(db.set().exists("tags", "x").unwrap());

    db.zset()
        .add_many("board", &[("one", 1.0), ("two", 2.0)])
        .unwrap();
    assert_eq!(db.zset().get_rank("board", "two", false).unwrap(), 1);
}

#[test]
fn test_postgres_type_conflict() {
    let Some(db) = open() else { return };

    db.str().set("pg:k", "v").unwrap();
    assert_eq!(db.list().push_back("pg:k", "x"), Err(Error::KeyType));
    assert_eq!(db.str().get("pg:k").unwrap().unwrap(), "v");
}

#[test]
fn test_postgres_scan_and_patterns() {
    let Some(db) = open() else { return };

    for i in 0..5 {
        db.str().set(&format!("scan:{i}"), "x").unwrap();
    }
    db.str().set("other", "x").unwrap();

    let mut seen = Vec::new();
    let mut cursor = 0;
    loop {
        let page = db.key().scan(cursor, "scan:*", TypeId::Any, 2).unwrap();
        if page.keys.is_empty() {
            break;
        }
        cursor = page.cursor;
        seen.extend(page.keys.into_iter().map(|k| k.key));
    }
    assert_eq!(seen.len(), 5);

    db.hash()
        .set_many("h", &[("f1", "1"), ("f2", "2"), ("g1", "3")])
        .unwrap();
    let page = db.hash().scan("h", 0, "f*", 10).unwrap();
    assert_eq!(page.items.len(), 2);
}

#[test]
fn test_postgres_store_ops() {
    let Some(db) = open() else { return };

    db.set().add("s1", &["one", "two"]).unwrap();
    db.set().add("s2", &["two", "thr"]).unwrap();
    assert_eq!(db.set().inter_store("s:dest", &["s1", "s2"]).unwrap(), 1);

    db.zset().add("z1", "one", 1.0).unwrap();
    db.zset().add("z2", "one", 2.0).unwrap();
    let n = db
        .zset()
        .inter_store("z:dest", &["z1", "z2"], None, Aggregate::Sum)
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(db.zset().get_score("z:dest", "one").unwrap(), 3.0);
}

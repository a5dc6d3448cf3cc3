//! End-to-end scenarios across repositories.

use std::time::Duration;

use rb_core::now_ms;
use redbase::{Aggregate, Db, Error, TypeId};

fn open() -> Db {
    Db::open(":memory:").unwrap()
}

#[test]
fn test_type_conflict_preserves_value() {
    let db = open();
    db.str().set("k", "v").unwrap();
    assert_eq!(db.list().push_front("k", "x"), Err(Error::KeyType));
    assert_eq!(db.str().get("k").unwrap().unwrap(), "v");
    assert_eq!(db.key().get("k").unwrap().ktype, TypeId::String);
}

#[test]
fn test_sinter_three_keys() {
    let db = open();
    db.set().add("a", &["one", "two", "thr"]).unwrap();
    db.set().add("b", &["two", "thr", "fou"]).unwrap();
    db.set().add("c", &["one", "two", "thr", "fou"]).unwrap();

    let mut items: Vec<String> = db
        .set()
        .inter(&["a", "b", "c"])
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect();
    items.sort();
    assert_eq!(items, vec!["thr", "two"]);
}

#[test]
fn test_zrange_by_score_rev() {
    let db = open();
    db.zset()
        .add_many(
            "k",
            &[("one", 10.0), ("two", 20.0), ("thr", 30.0), ("2nd", 20.0)],
        )
        .unwrap();

    let items: Vec<String> = db
        .zset()
        .range_with("k")
        .by_score(0.0, 50.0)
        .rev()
        .run()
        .unwrap()
        .iter()
        .map(|it| it.elem.to_string())
        .collect();
    assert_eq!(items, vec!["thr", "two", "2nd", "one"]);
}

#[test]
fn test_ltrim() {
    let db = open();
    for elem in ["a", "b", "c", "d", "e"] {
        db.list().push_back("k", elem).unwrap();
    }
    db.list().trim("k", 1, 3).unwrap();

    let items: Vec<String> = db
        .list()
        .range("k", 0, -1)
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(items, vec!["b", "c", "d"]);
    assert_eq!(db.list().len("k").unwrap(), 3);
}

#[test]
fn test_rename_semantics() {
    let db = open();
    db.str().set("a", "1").unwrap();
    db.str().set("b", "2").unwrap();
    db.key().rename("a", "b").unwrap();

    assert_eq!(db.str().get("a").unwrap(), None);
    assert_eq!(db.key().get("a"), Err(Error::NotFound));
    assert_eq!(db.str().get("b").unwrap().unwrap(), "1");
}

#[test]
fn test_expiration_lifecycle() {
    let db = open();
    db.str().set("k", "v").unwrap();
    db.key().expire("k", Duration::from_millis(100)).unwrap();

    // Still visible before the deadline.
    assert_eq!(db.str().get("k").unwrap().unwrap(), "v");

    std::thread::sleep(Duration::from_millis(150));
    assert!(!db.key().exists("k").unwrap());
    assert_eq!(db.str().get("k").unwrap(), None);

    // A new write recreates the key from scratch.
    db.str().set("k", "w").unwrap();
    assert_eq!(db.str().get("k").unwrap().unwrap(), "w");
    let key = db.key().get("k").unwrap();
    assert_eq!(key.version, 1);
    assert_eq!(key.etime, None);
}

#[test]
fn test_len_matches_contents_per_type() {
    let db = open();
    for elem in ["a", "b", "c"] {
        db.list().push_back("l", elem).unwrap();
    }
    db.hash().set_many("h", &[("f1", "1"), ("f2", "2")]).unwrap();
    db.set().add("s", &["x", "y", "z"]).unwrap();
    db.zset()
        .add_many("z", &[("one", 1.0), ("two", 2.0)])
        .unwrap();

    assert_eq!(db.list().len("l").unwrap(), db.list().range("l", 0, -1).unwrap().len());
    assert_eq!(db.hash().len("h").unwrap(), db.hash().items("h").unwrap().len());
    assert_eq!(db.set().len("s").unwrap(), db.set().items("s").unwrap().len());
    assert_eq!(db.zset().len("z").unwrap(), db.zset().range("z", 0, -1).unwrap().len());

    db.list().pop_back("l").unwrap();
    db.hash().delete("h", &["f1"]).unwrap();
    db.set().pop("s").unwrap();
    db.zset().delete_by_rank("z", 0, 0).unwrap();

    assert_eq!(db.list().len("l").unwrap(), 2);
    assert_eq!(db.hash().len("h").unwrap(), 1);
    assert_eq!(db.set().len("s").unwrap(), 2);
    assert_eq!(db.zset().len("z").unwrap(), 1);
}

#[test]
fn test_version_strictly_increases() {
    let db = open();
    db.list().push_back("q", "a").unwrap();
    let mut last = db.key().get("q").unwrap().version;
    for elem in ["b", "c", "d"] {
        db.list().push_back("q", elem).unwrap();
        let version = db.key().get("q").unwrap().version;
        assert!(version > last);
        last = version;
    }
    db.list().pop_front("q").unwrap();
    assert!(db.key().get("q").unwrap().version > last);
}

#[test]
fn test_scan_sees_each_live_key_once() {
    let db = open();
    for i in 0..25 {
        db.str().set(&format!("k{i:02}"), "x").unwrap();
    }
    db.str().set("dead", "x").unwrap();
    db.key().expire_at("dead", now_ms() - 1).unwrap();

    let mut seen = Vec::new();
    let mut cursor = 0;
    loop {
        let page = db.key().scan(cursor, "*", TypeId::Any, 7).unwrap();
        if page.keys.is_empty() {
            break;
        }
        cursor = page.cursor;
        seen.extend(page.keys.into_iter().map(|k| k.key));
    }
    assert_eq!(seen.len(), 25);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 25);
    assert!(!seen.contains(&"dead".to_string()));
}

#[test]
fn test_zinterstore_aggregate_validation() {
    let db = open();
    db.zset().add("k1", "one", 1.0).unwrap();
    db.zset().add("k2", "one", 2.0).unwrap();

    assert_eq!("min".parse::<Aggregate>().unwrap(), Aggregate::Min);
    assert_eq!("avg".parse::<Aggregate>(), Err(Error::SyntaxError));

    let n = db
        .zset()
        .inter_store("dest", &["k1", "k2"], None, "max".parse().unwrap())
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(db.zset().get_score("dest", "one").unwrap(), 2.0);
}

#[test]
fn test_rpoplpush_queue_rotation() {
    let db = open();
    for elem in ["a", "b", "c"] {
        db.list().push_back("q", elem).unwrap();
    }
    db.update(|tx| {
        let moved = tx.list().pop_back_push_front("q", "backup")?;
        tx.hash().set("audit", "last", moved)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(db.list().len("q").unwrap(), 2);
    assert_eq!(db.list().get("backup", 0).unwrap(), "c");
    assert_eq!(db.hash().get("audit", "last").unwrap().unwrap(), "c");
}

#[test]
fn test_expired_key_reusable_across_types() {
    let db = open();
    db.str().set("k", "v").unwrap();
    db.key().expire_at("k", now_ms() - 1).unwrap();

    // The expired string key can be reborn as a list.
    db.list().push_back("k", "a").unwrap();
    assert_eq!(db.key().get("k").unwrap().ktype, TypeId::List);
    assert_eq!(db.key().get("k").unwrap().version, 1);
}

#[test]
fn test_delete_then_recreate() {
    let db = open();
    db.set().add("tags", &["a", "b"]).unwrap();
    assert_eq!(db.key().delete(&["tags"]).unwrap(), 1);
    assert_eq!(db.set().len("tags").unwrap(), 0);

    db.set().add("tags", &["c"]).unwrap();
    assert_eq!(db.set().len("tags").unwrap(), 1);
    assert_eq!(db.key().get("tags").unwrap().version, 1);
}

#[test]
fn test_file_backed_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("redbase.db");
    let path = path.to_str().unwrap();

    {
        let db = Db::open(path).unwrap();
        db.str().set("name", "alice").unwrap();
        db.zset().add("board", "one", 1.0).unwrap();
        db.close();
    }

    let db = Db::open(path).unwrap();
    assert_eq!(db.str().get("name").unwrap().unwrap(), "alice");
    assert_eq!(db.zset().get_score("board", "one").unwrap(), 1.0);
}

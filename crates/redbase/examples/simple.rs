//! A basic example of using RedBase with the SQLite backend.

use redbase::{Db, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Open a database.
    let db = Db::open("data.db")?;

    // Set some string keys.
    db.str().set("name", "alice")?;
    db.str().set("age", 25)?;

    // Check if the keys exist.
    let count = db.key().count(&["name", "age", "city"])?;
    println!("count: {count}");

    // Get a key.
    let name = db.str().get("name")?;
    println!("name: {}", name.unwrap());

    // Compose operations in one transaction.
    db.update(|tx| {
        tx.list().push_back("queue", "first")?;
        tx.list().push_back("queue", "second")?;
        Ok(())
    })?;
    println!("queue length: {}", db.list().len("queue")?);

    db.close();
    Ok(())
}

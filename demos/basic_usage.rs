use pagetree::{Database, DbOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("demo.db");

    let mut db = Database::open(&path)?;
    for (key, value) in [(3, "three"), (1, "one"), (2, "two"), (5, "five"), (4, "four")] {
        db.put(key, value.as_bytes())?;
    }
    for key in 0..=6 {
        match db.get(key)? {
            Some(value) => println!("{key} => {}", String::from_utf8_lossy(&value)),
            None => println!("{key} not found"),
        }
    }
    db.close()?;

    // Reopen, the tree root is found through the meta page
    let mut options = DbOptions::new(&path);
    options.page_cache_pages = 64;
    let db = Database::with_options(options)?;
    let stats = db.check_integrity()?;
    println!(
        "{} keys in {} leaves, height {}, {} pages",
        stats.num_keys,
        stats.num_leaves,
        stats.height,
        db.page_count()
    );
    db.close()?;
    Ok(())
}

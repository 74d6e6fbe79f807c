#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pagetree::{utils::EscapedBytes, Database, DbOptions, Key, MAX_VALUE_LEN};
use std::collections::BTreeMap;

#[macro_use]
extern crate log;

/// Keys from a small range so puts overwrite and gets hit
#[derive(Debug, Copy, Clone)]
struct SmallKey(Key);

impl<'a> Arbitrary<'a> for SmallKey {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        if u.ratio(1u8, 8u8)? {
            Ok(SmallKey(u.arbitrary()?))
        } else {
            Ok(SmallKey(u.int_in_range(-128..=128)?))
        }
    }

    fn size_hint(depth: usize) -> (usize, Option<usize>) {
        <(u8, u8, Key) as Arbitrary>::size_hint(depth)
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Put(SmallKey, Vec<u8>),
    Get(SmallKey),
    Reopen { page_cache_pages: u8, persist_root: bool },
    Check,
}

struct World {
    dir: tempfile::TempDir,
    db: Option<Database>,
    persist_root: bool,
    model: BTreeMap<Key, Vec<u8>>,
}

impl World {
    fn options(&self, page_cache_pages: usize) -> DbOptions {
        let mut options = DbOptions::new(self.dir.path().join("db"));
        options.disable_fsync = true;
        options.persist_root = self.persist_root;
        options.page_cache_pages = page_cache_pages;
        options
    }

    fn apply(&mut self, op: Op) {
        let db = self.db.as_mut().unwrap();
        match op {
            Op::Put(SmallKey(key), mut value) => {
                trace!("put {key} {}", EscapedBytes(&value));
                db.put(key, &value).unwrap();
                value.truncate(MAX_VALUE_LEN);
                self.model.insert(key, value);
            }
            Op::Get(SmallKey(key)) => {
                assert_eq!(db.get(key).unwrap().as_ref(), self.model.get(&key), "{key}");
            }
            Op::Reopen {
                page_cache_pages,
                persist_root,
            } => {
                self.db.take().unwrap().close().unwrap();
                // a file only keeps its meta page layout, dropping it starts from scratch
                if persist_root != self.persist_root {
                    std::fs::remove_file(self.dir.path().join("db")).unwrap();
                    self.persist_root = persist_root;
                    self.model.clear();
                } else if !persist_root {
                    self.model.clear();
                }
                let options = self.options(page_cache_pages as usize);
                self.db = Some(Database::with_options(options).unwrap());
            }
            Op::Check => {
                let stats = db.check_integrity().unwrap();
                assert_eq!(stats.num_keys, self.model.len());
            }
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let _ = env_logger::try_init();
    let mut world = World {
        dir: tempfile::tempdir().unwrap(),
        db: None,
        persist_root: true,
        model: BTreeMap::new(),
    };
    world.db = Some(Database::with_options(world.options(0)).unwrap());
    for op in ops {
        world.apply(op);
    }
    let db = world.db.take().unwrap();
    let stats = db.check_integrity().unwrap();
    assert_eq!(stats.num_keys, world.model.len());
    for (key, value) in &world.model {
        assert_eq!(db.get(*key).unwrap().as_ref(), Some(value));
    }
    db.close().unwrap();
});

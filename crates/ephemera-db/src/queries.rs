use crate::Database;
use crate::models::CollectionRow;
use anyhow::Result;
use ephemera_types::models::CollectionKind;
use rusqlite::Connection;

impl Database {
    /// Load the stored collection for `identity`. `None` means nothing was ever saved.
    pub fn load_collection(
        &self,
        identity: &str,
        kind: CollectionKind,
    ) -> Result<Option<CollectionRow>> {
        let key = kind.storage_key(identity);
        self.with_conn(|conn| query_collection(conn, &key))
    }

    /// Replace the stored collection in one transaction and return its new revision.
    /// A failed save leaves the previous body untouched.
    pub fn save_collection(&self, identity: &str, kind: CollectionKind, body: &str) -> Result<i64> {
        let key = kind.storage_key(identity);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO collections (key, identity, kind, body) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    body = excluded.body,
                    revision = collections.revision + 1,
                    updated_at = datetime('now')",
                rusqlite::params![key, identity, kind.as_str(), body],
            )?;
            let revision: i64 = tx.query_row(
                "SELECT revision FROM collections WHERE key = ?1",
                [&key],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(revision)
        })
    }

    /// Every identity that has at least one stored collection, alphabetically.
    pub fn identities(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT identity FROM collections ORDER BY identity")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_collection(conn: &Connection, key: &str) -> Result<Option<CollectionRow>> {
    let mut stmt = conn.prepare(
        "SELECT key, identity, kind, body, revision, updated_at FROM collections WHERE key = ?1",
    )?;

    let row = stmt
        .query_row([key], |row| {
            Ok(CollectionRow {
                key: row.get(0)?,
                identity: row.get(1)?,
                kind: row.get(2)?,
                body: row.get(3)?,
                revision: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Maps "no rows" to `None` and everything else into anyhow.
trait OptionalRow<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalRow<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collection_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_collection("0xabc", CollectionKind::Messages).unwrap().is_none());
    }

    #[test]
    fn save_replaces_body_and_bumps_revision() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.save_collection("0xabc", CollectionKind::Messages, "[]").unwrap(), 1);
        assert_eq!(
            db.save_collection("0xabc", CollectionKind::Messages, "[1]").unwrap(),
            2
        );

        let row = db.load_collection("0xabc", CollectionKind::Messages).unwrap().unwrap();
        assert_eq!(row.key, "messages:0xabc");
        assert_eq!(row.identity, "0xabc");
        assert_eq!(row.kind, "messages");
        assert_eq!(row.body, "[1]");
        assert_eq!(row.revision, 2);
    }

    #[test]
    fn identities_and_kinds_are_partitioned() {
        let db = Database::open_in_memory().unwrap();
        db.save_collection("alice", CollectionKind::Messages, "\"a\"").unwrap();
        db.save_collection("alice", CollectionKind::Contacts, "\"c\"").unwrap();
        db.save_collection("bob", CollectionKind::Messages, "\"b\"").unwrap();

        let alice = db.load_collection("alice", CollectionKind::Messages).unwrap().unwrap();
        let bob = db.load_collection("bob", CollectionKind::Messages).unwrap().unwrap();
        assert_eq!(alice.body, "\"a\"");
        assert_eq!(bob.body, "\"b\"");
        assert!(db.load_collection("bob", CollectionKind::Contacts).unwrap().is_none());
        assert_eq!(db.identities().unwrap(), vec!["alice".to_string(), "bob".to_string()]);
    }
}

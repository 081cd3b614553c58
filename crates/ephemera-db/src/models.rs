/// Row of the `collections` table.
/// `body` is the JSON-encoded collection; the DB layer never parses it.
pub struct CollectionRow {
    pub key: String,
    pub identity: String,
    pub kind: String,
    pub body: String,
    pub revision: i64,
    pub updated_at: String,
}

//! Index records, queries and batches

/// One physical index record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub table_name: String,
    pub hash_value: String,
    pub range_value: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    /// `hash_value \0 range_value`
    pub fn key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.hash_value.len() + 1 + self.range_value.len());
        key.extend_from_slice(self.hash_value.as_bytes());
        key.push(0);
        key.extend_from_slice(&self.range_value);
        key
    }

    /// The forward marker entry whose value is a single zero byte
    pub fn is_metric_marker(&self) -> bool {
        self.value == [0]
    }
}

/// A forward range scan over one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub table_name: String,
    pub hash_value: String,
    pub range_value_prefix: Vec<u8>,
    /// Rows whose value differs are skipped when non-empty
    pub value_equal: Vec<u8>,
}

impl Query {
    /// `hash_value \0`
    pub fn row_prefix(&self) -> Vec<u8> {
        let mut p = Vec::with_capacity(self.hash_value.len() + 1);
        p.extend_from_slice(self.hash_value.as_bytes());
        p.push(0);
        p
    }

    /// `hash_value \0 range_value_prefix`
    pub fn start_key(&self) -> Vec<u8> {
        let mut p = self.row_prefix();
        p.extend_from_slice(&self.range_value_prefix);
        p
    }
}

/// Puts and deletes to apply together
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub(crate) puts: Vec<Entry>,
    pub(crate) deletes: Vec<Entry>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: Entry) {
        self.puts.push(entry);
    }

    pub fn delete(&mut self, entry: Entry) {
        self.deletes.push(entry);
    }

    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Rows matched by one query, copied out of the backend
#[derive(Debug, Default)]
pub struct ReadBatch {
    rows: Vec<Entry>,
}

impl ReadBatch {
    pub(crate) fn new(rows: Vec<Entry>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.rows.iter()
    }
}

impl IntoIterator for ReadBatch {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ReadBatch {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

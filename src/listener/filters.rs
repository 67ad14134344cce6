use std::collections::HashSet;
use std::fmt;

use crate::DmlEvent;
use crate::RowKey;

/// Predicate over one dispatched change record.
pub trait RowFilter: Send + Sync {
    fn test(
        &self,
        message_id: Option<i64>,
        dml: &DmlEvent,
    ) -> bool;
}

impl<F> RowFilter for F
where
    F: Fn(Option<i64>, &DmlEvent) -> bool + Send + Sync,
{
    fn test(
        &self,
        message_id: Option<i64>,
        dml: &DmlEvent,
    ) -> bool {
        self(message_id, dml)
    }
}

/// Table name match shared by the key filters; `None` accepts any table.
fn table_matches(
    table_name: Option<&str>,
    dml: &DmlEvent,
) -> bool {
    table_name.map_or(true, |t| dml.is_table(t))
}

/// Membership test of a single-column primary key.
#[derive(Clone)]
pub struct UniquePrimaryKey {
    table_name: Option<String>,
    keys: HashSet<RowKey>,
}

impl UniquePrimaryKey {
    pub fn new(
        table_name: Option<&str>,
        id: impl Into<RowKey>,
    ) -> Self {
        Self::with_ids(table_name, [id])
    }

    pub fn with_ids<I, K>(
        table_name: Option<&str>,
        ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        Self {
            table_name: table_name.map(str::to_string),
            keys: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Distinct keys, which is how many rows the filter waits for
    pub fn row_count(&self) -> usize {
        self.keys.len()
    }
}

impl RowFilter for UniquePrimaryKey {
    fn test(
        &self,
        _message_id: Option<i64>,
        dml: &DmlEvent,
    ) -> bool {
        if !table_matches(self.table_name.as_deref(), dml) {
            return false;
        }
        match dml.ids() {
            [id] => self.keys.contains(&RowKey::from(id)),
            _ => false,
        }
    }
}

impl fmt::Debug for UniquePrimaryKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("UniquePrimaryKey")
            .field("table_name", &self.table_name)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Membership test of a composite primary key.
///
/// Keys are compared as tuples, so values containing any separator character
/// never collide with a different tuple.
#[derive(Clone)]
pub struct UnionPrimaryKey {
    table_name: Option<String>,
    keys: HashSet<Vec<RowKey>>,
    arity: usize,
}

impl UnionPrimaryKey {
    pub fn new<K: Into<RowKey>>(
        table_name: Option<&str>,
        id: impl IntoIterator<Item = K>,
    ) -> Self {
        Self::with_ids(table_name, [id])
    }

    /// The arity is taken from the first tuple; tuples of another arity can
    /// never match and are discarded.
    pub fn with_ids<I, T, K>(
        table_name: Option<&str>,
        ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let mut arity = None;
        let mut keys = HashSet::new();
        for id in ids {
            let tuple: Vec<RowKey> = id.into_iter().map(Into::into).collect();
            let expected = *arity.get_or_insert(tuple.len());
            if tuple.len() == expected {
                keys.insert(tuple);
            }
        }
        Self {
            table_name: table_name.map(str::to_string),
            keys,
            arity: arity.unwrap_or(0),
        }
    }

    pub fn row_count(&self) -> usize {
        self.keys.len()
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl RowFilter for UnionPrimaryKey {
    fn test(
        &self,
        _message_id: Option<i64>,
        dml: &DmlEvent,
    ) -> bool {
        if !table_matches(self.table_name.as_deref(), dml) {
            return false;
        }
        let ids = dml.ids();
        if ids.len() != self.arity {
            return false;
        }
        let tuple: Vec<RowKey> = ids.iter().map(RowKey::from).collect();
        self.keys.contains(&tuple)
    }
}

impl fmt::Debug for UnionPrimaryKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("UnionPrimaryKey")
            .field("table_name", &self.table_name)
            .field("arity", &self.arity)
            .field("keys", &self.keys)
            .finish()
    }
}

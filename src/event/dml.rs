use std::fmt;
use std::sync::OnceLock;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// One decoded change record.
///
/// Field names follow the server's JSON payload (`tableName`, `pkNames`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmlEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub table_name: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pk_names: Vec<String>,
    /// Source commit time (unit: milliseconds)
    #[serde(default)]
    pub es: Option<i64>,
    /// Capture time (unit: milliseconds)
    #[serde(default)]
    pub ts: Option<i64>,
    /// INSERT / UPDATE / DELETE or a DDL tag
    #[serde(default, rename = "type")]
    pub dml_type: Option<String>,
    /// Before-image, only the changed columns
    #[serde(default)]
    pub old: Option<Map<String, Value>>,
    /// After-image
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependents: Vec<Dependent>,
    #[serde(default)]
    pub adapter_name: Option<String>,

    #[serde(skip)]
    ids: OnceLock<Vec<Value>>,
}

/// Downstream index touched by a change record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub effect: Option<bool>,
    #[serde(default)]
    pub es_index: Option<String>,
}

impl DmlEvent {
    /// Primary key values in `pk_names` order, computed once.
    ///
    /// A column present in the before-image wins over the after-image, so an
    /// update of the key itself still reports the row's previous identity.
    pub fn ids(&self) -> &[Value] {
        self.ids.get_or_init(|| {
            self.pk_names
                .iter()
                .map(|pk| {
                    self.old
                        .as_ref()
                        .and_then(|old| old.get(pk))
                        .or_else(|| self.data.as_ref().and_then(|data| data.get(pk)))
                        .cloned()
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
    }

    /// First primary key value
    pub fn id(&self) -> Option<&Value> {
        self.ids().first()
    }

    pub fn id_string(&self) -> Option<String> {
        self.id().and_then(|v| RowKey::from(v).into_inner())
    }

    pub fn id_i64(&self) -> Option<i64> {
        match self.id()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Primary key tuple as comparable keys
    pub fn row_keys(&self) -> Vec<RowKey> {
        self.ids().iter().map(RowKey::from).collect()
    }

    /// Whether any dependent index was actually changed by this record
    pub fn is_effect(&self) -> bool {
        self.dependents.iter().any(|d| d.effect == Some(true))
    }

    pub fn is_table(
        &self,
        table_name: &str,
    ) -> bool {
        self.table_name.eq_ignore_ascii_case(table_name)
    }
}

impl fmt::Display for DmlEvent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "DmlEvent{{table={}, type={}, ids={:?}, effect={}, adapter={}}}",
            self.table_name,
            self.dml_type.as_deref().unwrap_or("-"),
            self.ids(),
            self.is_effect(),
            self.adapter_name.as_deref().unwrap_or("-"),
        )
    }
}

/// Normalized primary key value.
///
/// Strings keep their raw text, other JSON scalars use their JSON rendering
/// and `null` is its own key, so `42` and `"42"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Option<String>);

impl RowKey {
    pub fn null() -> Self {
        RowKey(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

impl From<&Value> for RowKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => RowKey(None),
            Value::String(s) => RowKey(Some(s.clone())),
            other => RowKey(Some(other.to_string())),
        }
    }
}

impl From<Value> for RowKey {
    fn from(value: Value) -> Self {
        RowKey::from(&value)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        RowKey(Some(value.to_string()))
    }
}

impl From<String> for RowKey {
    fn from(value: String) -> Self {
        RowKey(Some(value))
    }
}

impl From<&String> for RowKey {
    fn from(value: &String) -> Self {
        RowKey(Some(value.clone()))
    }
}

macro_rules! row_key_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for RowKey {
                fn from(value: $t) -> Self {
                    RowKey(Some(value.to_string()))
                }
            }
        )*
    };
}

row_key_from_int!(i32, i64, u32, u64, usize);

impl<T: Into<RowKey>> From<Option<T>> for RowKey {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(RowKey::null)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

//! Result rows and serde-based row mapping

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::query::SqlValue;

/// One result row: column names and values in select-list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value);
        self
    }

    /// Append a column in place
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push((column.into(), value.into()));
    }

    /// Value of the first column named `column` (case-insensitive)
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Value at a zero-based column position
    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Column names in order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether every column is NULL
    pub fn is_all_null(&self) -> bool {
        self.columns.iter().all(|(_, value)| value.is_null())
    }

    /// Split into the columns before `column` and the columns from it onwards
    ///
    /// Used for two-shape join mapping where the second shape starts at a
    /// known key column. Returns `None` when the column is absent.
    pub fn split_at(&self, column: &str) -> Option<(Row, Row)> {
        let index = self
            .columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(column))?;
        let (left, right) = self.columns.split_at(index);
        Some((
            Row {
                columns: left.to_vec(),
            },
            Row {
                columns: right.to_vec(),
            },
        ))
    }

    /// Map the row into `T` by column name
    ///
    /// Duplicate column names keep the first occurrence.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut object = serde_json::Map::with_capacity(self.columns.len());
        for (name, value) in &self.columns {
            object
                .entry(name.clone())
                .or_insert_with(|| value.to_json());
        }
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| Error::Mapping(format!("cannot map row into target shape: {}", e)))
    }

    /// Map a joined row into two shapes split at `split_on`
    ///
    /// The second shape is `None` when its columns are all NULL, as produced
    /// by an outer join with no match.
    pub fn decode_pair<A, B>(&self, split_on: &str) -> Result<(A, Option<B>)>
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
    {
        let (left, right) = self.split_at(split_on).ok_or_else(|| {
            Error::Mapping(format!("split column '{}' not found in row", split_on))
        })?;
        let first = left.decode()?;
        let second = if right.is_all_null() {
            None
        } else {
            Some(right.decode()?)
        };
        Ok((first, second))
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: i64,
        name: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Owner {
        owner_id: i64,
        email: Option<String>,
    }

    fn joined(owner: Option<(i64, &str)>) -> Row {
        let row = Row::new().with("id", 1_i64).with("name", "widget");
        match owner {
            Some((id, email)) => row.with("owner_id", id).with("email", email),
            None => row
                .with("owner_id", SqlValue::Null)
                .with("email", SqlValue::Null),
        }
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let row = Row::new().with("Name", "a");
        assert_eq!(row.get("name"), Some(&SqlValue::from("a")));
        assert_eq!(row.get_index(0), Some(&SqlValue::from("a")));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_decode() {
        let row = Row::new()
            .with("id", 7_i64)
            .with("name", "widget")
            .with("extra", true);
        let item: Item = row.decode().unwrap();
        assert_eq!(
            item,
            Item {
                id: 7,
                name: "widget".into()
            }
        );
    }

    #[test]
    fn test_decode_mismatch_is_mapping_error() {
        let row = Row::new().with("id", "not a number").with("name", "x");
        assert!(matches!(row.decode::<Item>(), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_decode_pair() {
        let (item, owner): (Item, Option<Owner>) =
            joined(Some((3, "a@example.com"))).decode_pair("owner_id").unwrap();
        assert_eq!(item.id, 1);
        assert_eq!(
            owner,
            Some(Owner {
                owner_id: 3,
                email: Some("a@example.com".into())
            })
        );

        let (_, owner): (Item, Option<Owner>) = joined(None).decode_pair("owner_id").unwrap();
        assert_eq!(owner, None);
    }

    #[test]
    fn test_split_at_missing_column() {
        assert!(joined(None).split_at("nope").is_none());
        assert!(joined(None).decode_pair::<Item, Owner>("nope").is_err());
    }

    #[test]
    fn test_serialize_as_object() {
        let row = Row::new().with("id", 1_i64).with("name", "a");
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"id":1,"name":"a"}"#
        );
    }
}

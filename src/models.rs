use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::store::Row;

/// Accepts a JSON string or number and keeps it exactly as sent
fn string_or_number<'de, D>(deserializer: D) -> Result<JsonValue, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        value @ (JsonValue::String(_) | JsonValue::Number(_)) => Ok(value),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    string_or_number(deserializer).map(Some)
}

/// Serialize a request body into a store row
fn to_row<T: Serialize>(value: &T) -> Row {
    match serde_json::to_value(value) {
        Ok(JsonValue::Object(map)) => map,
        _ => Row::new(),
    }
}

/// A user on the ordered roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct User {
    #[schema(value_type = i64)]
    pub id: JsonValue,
    /// 1-based position, dense across all users
    pub order: i64,
    pub checked: bool,
    /// Caller-supplied fields (name, etc.)
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, JsonValue>,
}

impl TryFrom<Row> for User {
    type Error = serde_json::Error;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        serde_json::from_value(JsonValue::Object(row))
    }
}

/// Body of `POST /users`. `id` and `order` are assigned by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NewUser {
    #[serde(default, skip_serializing)]
    #[schema(ignore)]
    pub id: Option<JsonValue>,
    #[serde(default, skip_serializing)]
    #[schema(ignore)]
    pub order: Option<JsonValue>,
    #[serde(default)]
    pub checked: bool,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, JsonValue>,
}

impl NewUser {
    /// Row to insert at the given position
    pub fn into_row(self, order: i64) -> Row {
        let mut row = to_row(&self);
        row.insert("order".to_string(), JsonValue::from(order));
        row
    }
}

/// Body of `PUT`/`PATCH /users/{id}`. Only supplied fields are written; `id` is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UserUpdate {
    #[serde(default, skip_serializing)]
    #[schema(ignore)]
    pub id: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, JsonValue>,
}

impl UserUpdate {
    pub fn into_row(self) -> Row {
        to_row(&self)
    }
}

/// One attendance session for a group on a given day.
///
/// `date`, `group` and `day` are strings or numbers, returned as they were sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AttendanceRecord {
    #[schema(value_type = i64)]
    pub id: JsonValue,
    #[schema(value_type = String)]
    pub date: JsonValue,
    #[schema(value_type = String)]
    pub group: JsonValue,
    #[schema(value_type = String)]
    pub day: JsonValue,
    /// Attendance detail payload
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, JsonValue>,
}

impl TryFrom<Row> for AttendanceRecord {
    type Error = serde_json::Error;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        serde_json::from_value(JsonValue::Object(row))
    }
}

/// Body of `POST /attendanceHistory`
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NewAttendance {
    #[serde(default, skip_serializing)]
    #[schema(ignore)]
    pub id: Option<JsonValue>,
    #[serde(deserialize_with = "string_or_number")]
    #[schema(value_type = String)]
    pub date: JsonValue,
    #[serde(deserialize_with = "string_or_number")]
    #[schema(value_type = String)]
    pub group: JsonValue,
    #[serde(deserialize_with = "string_or_number")]
    #[schema(value_type = String)]
    pub day: JsonValue,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, JsonValue>,
}

impl NewAttendance {
    pub fn into_row(self) -> Row {
        to_row(&self)
    }
}

/// Body of `PUT /attendanceHistory/{id}`. `id` is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AttendanceUpdate {
    #[serde(default, skip_serializing)]
    #[schema(ignore)]
    pub id: Option<JsonValue>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub date: Option<JsonValue>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub group: Option<JsonValue>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub day: Option<JsonValue>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, JsonValue>,
}

impl AttendanceUpdate {
    pub fn into_row(self) -> Row {
        to_row(&self)
    }
}

/// Response type for successful DELETE operations
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

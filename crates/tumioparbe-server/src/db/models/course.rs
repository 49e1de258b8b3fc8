//! Course and batch models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A course offered by the tuition center.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Stored image path or URL
    pub image: String,
    /// One-time admission fee
    pub admission_fee: Decimal,
    /// Default monthly tuition, used when the batch has no override
    pub monthly_fee: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A class group within a course.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Batch {
    pub id: i64,
    #[serde(rename = "course")]
    pub course_id: i64,
    pub name: String,
    pub timing: String,
    pub group_link: String,
    pub class_link: String,
    /// Overrides the course monthly fee when set
    pub tuition_fee: Option<Decimal>,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Batch representation with its course name and active enrollment count.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub batch: Batch,
    pub course_name: String,
    pub student_count: i64,
}

/// Course representation with nested batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseView {
    #[serde(flatten)]
    pub course: Course,
    pub batches: Vec<BatchView>,
    pub batch_count: i64,
    pub student_count: i64,
}

/// Course create/update payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseInput {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub admission_fee: Option<Decimal>,

    #[serde(default)]
    pub monthly_fee: Option<Decimal>,

    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Batch create/update payload.
///
/// `tuition_fee` distinguishes "absent" from an explicit `null`, which clears
/// the override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchInput {
    #[serde(default)]
    pub course: Option<i64>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub timing: Option<String>,

    #[serde(default)]
    pub group_link: Option<String>,

    #[serde(default)]
    pub class_link: Option<String>,

    #[serde(default, with = "double_option")]
    pub tuition_fee: Option<Option<Decimal>>,

    #[serde(default)]
    pub is_visible: Option<bool>,
}

/// Request to move students between batches of the same course.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub destination_batch_id: Option<i64>,

    #[serde(default)]
    pub student_ids: Vec<i64>,
}

/// Id/name pair used in transfer responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

/// Result of a batch transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub source_batch: NamedRef,
    pub destination_batch: NamedRef,
    pub transferred_students: Vec<NamedRef>,
    pub count: usize,
}

/// Serde helper telling an absent field apart from an explicit `null`.
pub(crate) mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_batch_input_tuition_fee_states() {
        let absent: BatchInput = serde_json::from_str(r#"{"name": "Morning"}"#).unwrap();
        assert_eq!(absent.tuition_fee, None);

        let cleared: BatchInput = serde_json::from_str(r#"{"tuition_fee": null}"#).unwrap();
        assert_eq!(cleared.tuition_fee, Some(None));

        let set: BatchInput = serde_json::from_str(r#"{"tuition_fee": "1200.00"}"#).unwrap();
        assert_eq!(set.tuition_fee, Some(Some(dec!(1200.00))));
    }

    #[test]
    fn test_batch_serializes_course_id_as_course() {
        let batch = Batch {
            id: 3,
            course_id: 9,
            name: "Evening".to_string(),
            timing: "6pm".to_string(),
            group_link: String::new(),
            class_link: String::new(),
            tuition_fee: None,
            is_visible: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["course"], 9);
        assert!(value.get("course_id").is_none());
    }
}

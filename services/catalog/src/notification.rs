use crate::record::{is_reserved, CatalogRecord};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised while validating a notification at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotificationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Malformed notification: {0}")]
    Malformed(String),
}

/// "Object created" notification emitted by the blob store
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCreatedNotification {
    /// Object key inside the bucket
    pub bucket_key: String,
    /// Object size in bytes
    pub size: u64,
    /// Content fingerprint
    pub e_tag: String,
    /// Any other attributes the blob store attached to the object
    pub extra: BTreeMap<String, Value>,
}

impl ObjectCreatedNotification {
    pub fn new(bucket_key: impl Into<String>, size: u64, e_tag: impl Into<String>) -> Self {
        Self {
            bucket_key: bucket_key.into(),
            size,
            e_tag: e_tag.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Decode the `s3.object` element of an event record.
    ///
    /// Every required field is checked here so that a bad record turns into
    /// an explicit error instead of an empty attribute further down.
    pub fn from_object(object: &Value) -> Result<Self, NotificationError> {
        let fields = object.as_object().ok_or_else(|| {
            NotificationError::Malformed(format!("expected an object, found {}", type_name(object)))
        })?;

        let bucket_key = match fields.get("key") {
            None | Some(Value::Null) => return Err(NotificationError::MissingField("key")),
            Some(Value::String(key)) => key.clone(),
            Some(other) => {
                return Err(NotificationError::InvalidField {
                    field: "key",
                    message: format!("expected a string, found {}", type_name(other)),
                })
            }
        };

        let size = match fields.get("size") {
            None | Some(Value::Null) => return Err(NotificationError::MissingField("size")),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| NotificationError::InvalidField {
                field: "size",
                message: format!("expected a non-negative integer, found {n}"),
            })?,
            Some(other) => {
                return Err(NotificationError::InvalidField {
                    field: "size",
                    message: format!("expected an integer, found {}", type_name(other)),
                })
            }
        };

        let e_tag = match fields.get("eTag") {
            None | Some(Value::Null) => return Err(NotificationError::MissingField("eTag")),
            Some(Value::String(tag)) => tag.clone(),
            Some(other) => {
                return Err(NotificationError::InvalidField {
                    field: "eTag",
                    message: format!("expected a string, found {}", type_name(other)),
                })
            }
        };

        let notification = Self {
            bucket_key,
            size,
            e_tag,
            extra: extra_attributes(fields),
        };
        notification.validate()?;

        Ok(notification)
    }

    /// Check the invariants a catalog record depends on
    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.bucket_key.is_empty() {
            return Err(NotificationError::InvalidField {
                field: "key",
                message: "key must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Normalize into the catalog record that will be upserted
    pub fn to_record(&self) -> CatalogRecord {
        CatalogRecord::new(self.bucket_key.clone(), self.e_tag.clone(), self.size)
            .with_extra(self.extra.clone())
    }
}

fn extra_attributes(fields: &Map<String, Value>) -> BTreeMap<String, Value> {
    fields
        .iter()
        .filter(|(name, _)| !is_reserved(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// S3 event notification envelope as published by S3-compatible stores
///
/// Records are kept undecoded so that one bad record is rejected on its own
/// instead of failing the whole envelope.
#[derive(Debug, Deserialize)]
pub struct S3EventEnvelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<Value>,
}

/// Whether an event name denotes object creation.
///
/// AWS publishes `ObjectCreated:Put`, MinIO `s3:ObjectCreated:Put`.
/// Records without an event name are treated as creations.
pub fn is_created_event(record: &Value) -> bool {
    match record.get("eventName").and_then(Value::as_str) {
        Some(name) => name.trim_start_matches("s3:").starts_with("ObjectCreated"),
        None => true,
    }
}

/// Extract the `s3.object` element of every creation record in a payload.
///
/// A record that lacks `s3.object` yields `null` so it is reported as
/// malformed by the ingestion handler at its own position.
pub fn created_objects(payload: &[u8]) -> Result<Vec<Value>, NotificationError> {
    let envelope: S3EventEnvelope = serde_json::from_slice(payload)
        .map_err(|e| NotificationError::Malformed(format!("invalid event envelope: {e}")))?;

    let objects = envelope
        .records
        .into_iter()
        .filter(|record| {
            let created = is_created_event(record);
            if !created {
                let event_name = record
                    .get("eventName")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                debug!(event_name = %event_name, "Ignoring non-creation event");
            }
            created
        })
        .map(|record| record.pointer("/s3/object").cloned().unwrap_or(Value::Null))
        .collect();

    Ok(objects)
}

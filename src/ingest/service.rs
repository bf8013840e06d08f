use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::{
        models::{Device, PowerReading},
        store::Store,
    },
    errors::{Error, Result},
    telemetry::{
        alerts::{self, Alert},
        normalize::{self, OptionalFields},
    },
};

/// Upper bound on the number of readings in one bulk submission.
pub const MAX_BULK_READINGS: usize = 100;

/// A persisted reading together with the alerts it raised.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub reading: PowerReading,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmittedReading {
    pub index: usize,
    pub reading_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RejectedReading {
    pub index: usize,
    pub error: String,
}

/// Per-element results of a bulk submission, both lists in input order.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub submitted: Vec<SubmittedReading>,
    pub errors: Vec<RejectedReading>,
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn Store>,
    optional_fields: OptionalFields,
}

impl IngestService {
    pub fn new(store: Arc<dyn Store>, optional_fields: OptionalFields) -> Self {
        Self { store, optional_fields }
    }

    /// Validate, normalize and persist one payload for an authenticated
    /// device, then derive its alerts.
    ///
    /// Validation runs before the store is touched, so a rejected payload
    /// never leaves a partial write behind.
    pub async fn submit(&self, device: &Device, payload: &Value) -> Result<Ingested> {
        let raw = normalize::validate(payload)?;
        let reading = normalize::normalize(&raw, self.optional_fields);

        let stored = self.store.insert_reading(&device.device_id, &reading).await?;
        let alerts = alerts::evaluate(&reading);

        if !alerts.is_empty() {
            let kinds: Vec<String> = alerts.iter().map(|a| a.alert_type.to_string()).collect();
            warn!(device_id = %device.device_id, alerts = ?kinds, "Reading breached thresholds");
        }

        Ok(Ingested { reading: stored, alerts })
    }

    /// Run [`submit`](Self::submit) for every element in order.
    ///
    /// The batch as a whole is rejected up front when empty or larger than
    /// [`MAX_BULK_READINGS`]; after that, a failing element is recorded
    /// against its index and never aborts its siblings.
    pub async fn submit_bulk(&self, device: &Device, payloads: &[Value]) -> Result<BulkOutcome> {
        if payloads.is_empty() {
            return Err(Error::validation(
                "Readings array is required and must not be empty",
            ));
        }
        if payloads.len() > MAX_BULK_READINGS {
            return Err(Error::validation(format!(
                "Maximum {MAX_BULK_READINGS} readings per bulk submission"
            )));
        }

        let mut outcome = BulkOutcome::default();
        for (index, payload) in payloads.iter().enumerate() {
            match self.submit(device, payload).await {
                Ok(ingested) => outcome.submitted.push(SubmittedReading {
                    index,
                    reading_id: ingested.reading.id,
                    timestamp: ingested.reading.timestamp,
                }),
                Err(e) => outcome.errors.push(RejectedReading {
                    index,
                    error: element_error(e),
                }),
            }
        }

        info!(
            device_id = %device.device_id,
            submitted = outcome.submitted.len(),
            rejected = outcome.errors.len(),
            "Bulk submission processed"
        );
        Ok(outcome)
    }
}

/// Message reported to the device for a failed element. Store details stay
/// in the server log.
fn element_error(err: Error) -> String {
    match err {
        Error::StoreUnavailable(_) => "Failed to store reading".to_owned(),
        other => other.to_string(),
    }
}

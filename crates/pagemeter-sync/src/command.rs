//! Command envelope dispatch
//!
//! Billing operations arrive from the outer system as self-describing
//! envelopes: a command name plus a JSON payload. The transport layer
//! has already verified the caller's signature by the time an envelope
//! reaches [`CommandDispatcher`]; this module only routes and executes.
//! Unknown commands and malformed payloads reject that envelope alone.

use pagemeter_billing::{CounterEdit, GenerateOptions, ReviewBook, ReviewRef};
use pagemeter_common::{
    BillingPeriod, DeviceId, MeterError, Oid, PartnerId, Result, ReviewId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

/// One routed billing command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct GeneratePayload {
    partner: PartnerId,
    period: BillingPeriod,
    #[serde(default = "default_true")]
    group_by_location: bool,
    #[serde(default = "default_true")]
    unbilled_only: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    review: ReviewId,
    version: u64,
}

#[derive(Debug, Deserialize)]
struct EditPayload {
    review: ReviewId,
    version: u64,
    device: DeviceId,
    oid: Oid,
    edit: CounterEdit,
}

#[derive(Debug, Deserialize)]
struct GetPayload {
    review: ReviewId,
}

/// Routes envelopes onto the review workflow
pub struct CommandDispatcher {
    book: Arc<ReviewBook>,
}

impl CommandDispatcher {
    pub fn new(book: Arc<ReviewBook>) -> Self {
        Self { book }
    }

    #[instrument(skip(self, envelope), fields(command = %envelope.command))]
    pub fn dispatch(&self, envelope: &CommandEnvelope) -> Result<Value> {
        info!("Dispatching billing command");
        match envelope.command.as_str() {
            "generate_review" => {
                let payload: GeneratePayload = serde_json::from_value(envelope.data.clone())?;
                if payload.period.from >= payload.period.to {
                    return Err(MeterError::Validation(
                        "billing period start must precede its end".into(),
                    ));
                }
                let rf = self.book.generate(
                    payload.partner,
                    payload.period,
                    GenerateOptions {
                        group_by_location: payload.group_by_location,
                        unbilled_only: payload.unbilled_only,
                    },
                )?;
                let review = self.book.get(rf.id).ok_or_else(|| {
                    MeterError::Internal("generated review vanished".into())
                })?;
                Ok(json!({
                    "review": rf.id,
                    "version": rf.version,
                    "reference": review.reference,
                    "lines": review.lines.len(),
                }))
            }
            "get_review" => {
                let payload: GetPayload = serde_json::from_value(envelope.data.clone())?;
                let review = self.book.get(payload.review).ok_or_else(|| {
                    MeterError::Referential(format!("unknown review {}", payload.review))
                })?;
                Ok(serde_json::to_value(&review)?)
            }
            "edit_counter" => {
                let payload: EditPayload = serde_json::from_value(envelope.data.clone())?;
                let rf = ReviewRef {
                    id: payload.review,
                    version: payload.version,
                };
                let next =
                    self.book
                        .set_counter_value(&rf, payload.device, &payload.oid, payload.edit)?;
                Ok(json!({ "review": next.id, "version": next.version }))
            }
            "confirm_review" => {
                let payload: RefPayload = serde_json::from_value(envelope.data.clone())?;
                let next = self.book.confirm(&ReviewRef {
                    id: payload.review,
                    version: payload.version,
                })?;
                Ok(json!({ "review": next.id, "version": next.version }))
            }
            "cancel_review" => {
                let payload: RefPayload = serde_json::from_value(envelope.data.clone())?;
                let next = self.book.cancel(&ReviewRef {
                    id: payload.review,
                    version: payload.version,
                })?;
                Ok(json!({ "review": next.id, "version": next.version }))
            }
            "invoice_review" => {
                let payload: RefPayload = serde_json::from_value(envelope.data.clone())?;
                let (lines, next) = self.book.invoice(&ReviewRef {
                    id: payload.review,
                    version: payload.version,
                })?;
                Ok(json!({
                    "review": next.id,
                    "version": next.version,
                    "invoice_lines": serde_json::to_value(&lines)?,
                }))
            }
            other => Err(MeterError::Validation(format!(
                "unknown command '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_data_defaults_to_null() {
        let envelope: CommandEnvelope =
            serde_json::from_str(r#"{"command": "get_review"}"#).unwrap();
        assert_eq!(envelope.command, "get_review");
        assert!(envelope.data.is_null());
    }
}

//! Boundary schema for inbound billing events.
//!
//! Deliveries arrive either straight from Stripe or through workflow tools that
//! wrap the event in an array or a `{ "body": ... }` object. The payload is
//! normalised once here and turned into a [`BillingEvent`]; nothing past this
//! module looks at raw JSON.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::billing::error::BillingError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        customer: Option<String>,
        customer_email: Option<String>,
        client_reference_id: Option<String>,
    },
    SubscriptionChanged {
        customer: String,
        subscription_id: String,
        status: String,
    },
    SubscriptionDeleted {
        customer: String,
        subscription_id: String,
    },
    InvoicePaid {
        customer: Option<String>,
        customer_email: Option<String>,
        subscription_id: Option<String>,
        billing_reason: Option<String>,
        period_start: Option<i64>,
        period_end: Option<i64>,
    },
    Ignored {
        event_type: String,
    },
}

impl BillingEvent {
    pub fn customer_id(&self) -> Option<&str> {
        match self {
            BillingEvent::CheckoutCompleted { customer, .. }
            | BillingEvent::InvoicePaid { customer, .. } => customer.as_deref(),
            BillingEvent::SubscriptionChanged { customer, .. }
            | BillingEvent::SubscriptionDeleted { customer, .. } => Some(customer),
            BillingEvent::Ignored { .. } => None,
        }
    }

    pub fn customer_email(&self) -> Option<&str> {
        match self {
            BillingEvent::CheckoutCompleted { customer_email, .. }
            | BillingEvent::InvoicePaid { customer_email, .. } => customer_email.as_deref(),
            _ => None,
        }
    }

    pub fn client_reference_id(&self) -> Option<&str> {
        match self {
            BillingEvent::CheckoutCompleted {
                client_reference_id,
                ..
            } => client_reference_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    pub event: BillingEvent,
    /// The normalised event object, kept for retry bookkeeping.
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    #[serde(default, deserialize_with = "expandable_id")]
    customer: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    client_reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    #[serde(deserialize_with = "required_expandable_id")]
    customer: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    #[serde(default, deserialize_with = "expandable_id")]
    customer: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    subscription: Option<String>,
    #[serde(default)]
    parent: Option<InvoiceParent>,
    #[serde(default)]
    billing_reason: Option<String>,
    #[serde(default)]
    period_start: Option<i64>,
    #[serde(default)]
    period_end: Option<i64>,
    #[serde(default)]
    lines: Option<InvoiceLines>,
}

/// Newer API versions move the subscription under `parent`.
#[derive(Debug, Deserialize)]
struct InvoiceParent {
    #[serde(default)]
    subscription_details: Option<SubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionDetails {
    #[serde(default, deserialize_with = "expandable_id")]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLine {
    #[serde(default)]
    period: Option<LinePeriod>,
}

#[derive(Debug, Deserialize)]
struct LinePeriod {
    start: i64,
    end: i64,
}

/// Accepts `"cus_123"`, `{ "id": "cus_123", ... }` or null.
fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::Object(map)) => map
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

fn required_expandable_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    expandable_id(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing object id"))
}

/// Unwraps the delivery shapes produced by intermediaries.
pub fn normalize_payload(raw: Value) -> Result<Value, BillingError> {
    match raw {
        Value::Array(items) => {
            let first = items
                .into_iter()
                .next()
                .ok_or_else(|| BillingError::InvalidPayload("empty event array".into()))?;
            normalize_payload(first)
        }
        Value::Object(mut map) if !map.contains_key("type") && map.contains_key("body") => {
            match map.remove("body") {
                Some(Value::String(text)) => {
                    let inner = serde_json::from_str(&text)
                        .map_err(|err| BillingError::InvalidPayload(err.to_string()))?;
                    normalize_payload(inner)
                }
                Some(inner) => normalize_payload(inner),
                None => Err(BillingError::InvalidPayload("empty body wrapper".into())),
            }
        }
        Value::Object(map) => Ok(Value::Object(map)),
        _ => Err(BillingError::InvalidPayload(
            "event payload must be a JSON object".into(),
        )),
    }
}

fn object<T: for<'de> Deserialize<'de>>(value: Value, event_type: &str) -> Result<T, BillingError> {
    serde_json::from_value(value)
        .map_err(|err| BillingError::InvalidPayload(format!("{event_type}: {err}")))
}

pub fn parse_event(raw: Value) -> Result<ParsedEvent, BillingError> {
    let payload = normalize_payload(raw)?;
    let envelope: StripeEventEnvelope = serde_json::from_value(payload.clone())
        .map_err(|err| BillingError::InvalidPayload(err.to_string()))?;

    if envelope.id.trim().is_empty() {
        return Err(BillingError::InvalidPayload("event id is empty".into()));
    }

    let event_type = envelope.event_type.as_str();
    let data = envelope.data.object;
    let event = match event_type {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session: CheckoutSessionObject = object(data, event_type)?;
            BillingEvent::CheckoutCompleted {
                customer: session.customer,
                customer_email: session
                    .customer_email
                    .or_else(|| session.customer_details.and_then(|d| d.email)),
                client_reference_id: session.client_reference_id,
            }
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.paused"
        | "customer.subscription.resumed" => {
            let sub: SubscriptionObject = object(data, event_type)?;
            BillingEvent::SubscriptionChanged {
                customer: sub.customer,
                subscription_id: sub.id,
                status: sub.status,
            }
        }
        "customer.subscription.deleted" => {
            let sub: SubscriptionObject = object(data, event_type)?;
            BillingEvent::SubscriptionDeleted {
                customer: sub.customer,
                subscription_id: sub.id,
            }
        }
        "invoice.paid" | "invoice.payment_succeeded" => {
            let invoice: InvoiceObject = object(data, event_type)?;
            let line_period = invoice
                .lines
                .and_then(|lines| lines.data.into_iter().find_map(|line| line.period));
            let (period_start, period_end) = match line_period {
                Some(period) => (Some(period.start), Some(period.end)),
                None => (invoice.period_start, invoice.period_end),
            };
            BillingEvent::InvoicePaid {
                customer: invoice.customer,
                customer_email: invoice.customer_email,
                subscription_id: invoice.subscription.or_else(|| {
                    invoice
                        .parent
                        .and_then(|p| p.subscription_details)
                        .and_then(|d| d.subscription)
                }),
                billing_reason: invoice.billing_reason,
                period_start,
                period_end,
            }
        }
        other => BillingEvent::Ignored {
            event_type: other.to_string(),
        },
    };

    Ok(ParsedEvent {
        id: envelope.id,
        event_type: envelope.event_type,
        created: envelope.created,
        event,
        payload,
    })
}

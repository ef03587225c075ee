//! Typed BSS domain events.
//!
//! Maps envelope type strings of the form `<domain>.<aggregate>.<event>.v<N>`
//! (for example `com.droid.bss.order.statusChanged.v1`) onto [`DomainEvent`]
//! variants with typed payloads. Types this layer does not know decode to
//! [`DomainEvent::Other`] with the raw data.

mod router;

use std::fmt;
use std::str::FromStr;

use bss_core::Envelope;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use router::{DomainEventRouter, Notifier, RouterConfig};

/// Domain-layer decode failure.
#[derive(Debug, Error)]
pub enum DomainDecodeError {
    /// The type string does not have the `<aggregate>.<event>` shape.
    #[error("malformed event type {0:?}")]
    EventType(String),
    /// A known event type carried a payload of the wrong shape.
    #[error("invalid payload for {event_type}: {source}")]
    Payload {
        /// Envelope type.
        event_type: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Parsed envelope type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventType {
    /// Reverse-DNS prefix, possibly empty (`com.droid.bss`).
    pub domain: String,
    /// Aggregate name (`customer`, `order`, ...).
    pub aggregate: String,
    /// Event name within the aggregate (`created`, `statusChanged`, ...).
    pub action: String,
    /// Schema version from a trailing `v<N>` segment.
    pub version: Option<u32>,
}

impl FromStr for EventType {
    type Err = DomainDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments: Vec<&str> = s.split('.').collect();
        let version = segments
            .last()
            .and_then(|last| last.strip_prefix('v'))
            .and_then(|n| n.parse::<u32>().ok());
        if version.is_some() {
            let _ = segments.pop();
        }
        if segments.len() < 2 || segments.iter().any(|seg| seg.is_empty()) {
            return Err(DomainDecodeError::EventType(s.to_owned()));
        }
        let action = segments.pop().unwrap_or_default().to_owned();
        let aggregate = segments.pop().unwrap_or_default().to_owned();
        Ok(Self {
            domain: segments.join("."),
            aggregate,
            action,
            version,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.domain.is_empty() {
            write!(f, "{}.", self.domain)?;
        }
        write!(f, "{}.{}", self.aggregate, self.action)?;
        if let Some(v) = self.version {
            write!(f, ".v{v}")?;
        }
        Ok(())
    }
}

/// Customer lifecycle payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    /// Customer id.
    #[serde(alias = "customer_id", alias = "id")]
    pub customer_id: String,
    /// Given name.
    #[serde(default, alias = "first_name", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default, alias = "last_name", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One order line.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Product id.
    #[serde(alias = "product_id")]
    pub product_id: String,
    /// Ordered quantity.
    #[serde(default)]
    pub quantity: u32,
    /// Price per unit.
    #[serde(default, alias = "unit_price")]
    pub unit_price: f64,
}

/// Order lifecycle payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    /// Order id.
    #[serde(alias = "order_id", alias = "id")]
    pub order_id: String,
    /// Ordering customer.
    #[serde(default, alias = "customer_id", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Order status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Order total.
    #[serde(default, alias = "total_amount", skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    /// Order lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItem>,
}

/// Payment lifecycle payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Payment id.
    #[serde(default, alias = "payment_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Paying customer.
    #[serde(default, alias = "customer_id", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Settled invoice.
    #[serde(default, alias = "invoice_id", skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    /// Amount.
    pub amount: f64,
    /// ISO currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Payment method (`card`, `transfer`, ...).
    #[serde(default, alias = "payment_method", skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    /// Failure or refund reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Invoice lifecycle payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePayload {
    /// Invoice id.
    #[serde(alias = "invoice_id", alias = "id")]
    pub invoice_id: String,
    /// Invoiced order.
    #[serde(default, alias = "order_id", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Billed customer.
    #[serde(default, alias = "customer_id", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Invoice amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Due date as sent by the producer.
    #[serde(default, alias = "due_date", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Invoice status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Status transition of a customer or an order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// Id of the entity that changed.
    #[serde(alias = "customerId", alias = "customer_id", alias = "orderId", alias = "order_id")]
    pub id: String,
    /// Status before the change.
    #[serde(
        default,
        alias = "previous_status",
        alias = "oldStatus",
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_status: Option<String>,
    /// Status after the change.
    #[serde(alias = "new_status", alias = "status")]
    pub new_status: String,
}

/// A decoded domain event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum DomainEvent {
    /// `customer.created`
    CustomerCreated(CustomerPayload),
    /// `customer.updated`
    CustomerUpdated(CustomerPayload),
    /// `customer.statusChanged`
    CustomerStatusChanged(StatusChange),
    /// `customer.terminated`
    CustomerTerminated(CustomerPayload),
    /// `order.created`
    OrderCreated(OrderPayload),
    /// `order.updated`
    OrderUpdated(OrderPayload),
    /// `order.statusChanged`
    OrderStatusChanged(StatusChange),
    /// `order.completed`
    OrderCompleted(OrderPayload),
    /// `order.cancelled`
    OrderCancelled(OrderPayload),
    /// `payment.created`
    PaymentCreated(PaymentPayload),
    /// `payment.completed`
    PaymentCompleted(PaymentPayload),
    /// `payment.failed`
    PaymentFailed(PaymentPayload),
    /// `payment.refunded`
    PaymentRefunded(PaymentPayload),
    /// `invoice.created`
    InvoiceCreated(InvoicePayload),
    /// `invoice.issued`
    InvoiceIssued(InvoicePayload),
    /// `invoice.paid`
    InvoicePaid(InvoicePayload),
    /// `invoice.overdue`
    InvoiceOverdue(InvoicePayload),
    /// Any type not listed above; carries the raw data.
    Other(Value),
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, DomainDecodeError> {
    envelope.data_as().map_err(|source| DomainDecodeError::Payload {
        event_type: envelope.event_type.clone(),
        source,
    })
}

impl DomainEvent {
    /// Decode the envelope's data according to its parsed type.
    ///
    /// Only unversioned and `v1` types map to typed variants; later versions
    /// fall through to [`DomainEvent::Other`].
    pub fn decode(event_type: &EventType, envelope: &Envelope) -> Result<Self, DomainDecodeError> {
        if event_type.version.is_some_and(|v| v != 1) {
            return Ok(Self::Other(envelope.data.clone()));
        }
        let event = match (event_type.aggregate.as_str(), event_type.action.as_str()) {
            ("customer", "created") => Self::CustomerCreated(payload(envelope)?),
            ("customer", "updated") => Self::CustomerUpdated(payload(envelope)?),
            ("customer", "statusChanged") => Self::CustomerStatusChanged(payload(envelope)?),
            ("customer", "terminated") => Self::CustomerTerminated(payload(envelope)?),
            ("order", "created") => Self::OrderCreated(payload(envelope)?),
            ("order", "updated") => Self::OrderUpdated(payload(envelope)?),
            ("order", "statusChanged") => Self::OrderStatusChanged(payload(envelope)?),
            ("order", "completed") => Self::OrderCompleted(payload(envelope)?),
            ("order", "cancelled") => Self::OrderCancelled(payload(envelope)?),
            ("payment", "created") => Self::PaymentCreated(payload(envelope)?),
            ("payment", "completed") => Self::PaymentCompleted(payload(envelope)?),
            ("payment", "failed") => Self::PaymentFailed(payload(envelope)?),
            ("payment", "refunded") => Self::PaymentRefunded(payload(envelope)?),
            ("invoice", "created") => Self::InvoiceCreated(payload(envelope)?),
            ("invoice", "issued") => Self::InvoiceIssued(payload(envelope)?),
            ("invoice", "paid") => Self::InvoicePaid(payload(envelope)?),
            ("invoice", "overdue") => Self::InvoiceOverdue(payload(envelope)?),
            _ => Self::Other(envelope.data.clone()),
        };
        Ok(event)
    }

    /// Aggregate this event belongs to, `None` for [`DomainEvent::Other`].
    pub fn aggregate(&self) -> Option<&'static str> {
        Some(match self {
            Self::CustomerCreated(_)
            | Self::CustomerUpdated(_)
            | Self::CustomerStatusChanged(_)
            | Self::CustomerTerminated(_) => "customer",
            Self::OrderCreated(_)
            | Self::OrderUpdated(_)
            | Self::OrderStatusChanged(_)
            | Self::OrderCompleted(_)
            | Self::OrderCancelled(_) => "order",
            Self::PaymentCreated(_)
            | Self::PaymentCompleted(_)
            | Self::PaymentFailed(_)
            | Self::PaymentRefunded(_) => "payment",
            Self::InvoiceCreated(_)
            | Self::InvoiceIssued(_)
            | Self::InvoicePaid(_)
            | Self::InvoiceOverdue(_) => "invoice",
            Self::Other(_) => return None,
        })
    }

    /// User-facing notice for events worth surfacing, if any.
    pub fn notification(&self) -> Option<Notification> {
        let notice = match self {
            Self::CustomerCreated(c) => Notification::info("Customer created", format!("Customer {} was created", c.customer_id)),
            Self::CustomerTerminated(c) => {
                Notification::warning("Customer terminated", format!("Customer {} was terminated", c.customer_id))
            }
            Self::OrderCompleted(o) => Notification::success("Order completed", format!("Order {} was completed", o.order_id)),
            Self::OrderCancelled(o) => Notification::warning("Order cancelled", format!("Order {} was cancelled", o.order_id)),
            Self::PaymentCompleted(p) => Notification::success("Payment received", format!("Payment of {} received", money(p))),
            Self::PaymentFailed(p) => {
                let reason = p.reason.as_deref().unwrap_or("unknown reason");
                Notification::error("Payment failed", format!("Payment of {} failed: {reason}", money(p)))
            }
            Self::PaymentRefunded(p) => Notification::info("Payment refunded", format!("Payment of {} refunded", money(p))),
            Self::InvoiceIssued(i) => Notification::info("Invoice issued", format!("Invoice {} was issued", i.invoice_id)),
            Self::InvoicePaid(i) => Notification::success("Invoice paid", format!("Invoice {} was paid", i.invoice_id)),
            Self::InvoiceOverdue(i) => Notification::warning("Invoice overdue", format!("Invoice {} is overdue", i.invoice_id)),
            _ => return None,
        };
        Some(notice)
    }
}

fn money(payment: &PaymentPayload) -> String {
    match &payment.currency {
        Some(currency) => format!("{:.2} {currency}", payment.amount),
        None => format!("{:.2}", payment.amount),
    }
}

/// Envelope attributes carried next to a decoded event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Envelope id.
    pub id: String,
    /// Producer URI.
    pub source: String,
    /// Parsed envelope type.
    #[serde(serialize_with = "serialize_display")]
    pub event_type: EventType,
    /// Occurrence time, when present and RFC 3339.
    pub time: Option<DateTime<FixedOffset>>,
}

fn serialize_display<S: serde::Serializer>(value: &EventType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A domain event with its envelope metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedEvent {
    /// Envelope attributes.
    pub meta: EventMeta,
    /// Decoded event.
    pub event: DomainEvent,
}

impl TypedEvent {
    /// Decode an envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, DomainDecodeError> {
        let event_type: EventType = envelope.event_type.parse()?;
        let event = DomainEvent::decode(&event_type, envelope)?;
        let time = envelope.time.as_deref().and_then(|t| match DateTime::parse_from_rfc3339(t) {
            Ok(time) => Some(time),
            Err(e) => {
                debug!(event_id = %envelope.id, time = t, error = %e, "ignoring unparseable event time");
                None
            }
        });
        Ok(Self {
            meta: EventMeta {
                id: envelope.id.clone(),
                source: envelope.source.clone(),
                event_type,
                time,
            },
            event,
        })
    }
}

/// Severity of a [`Notification`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Neutral.
    Info,
    /// Positive outcome.
    Success,
    /// Needs attention.
    Warning,
    /// Failure.
    Error,
}

/// Toast-style notice derived from a domain event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Severity.
    pub level: NotificationLevel,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
}

impl Notification {
    fn new(level: NotificationLevel, title: &str, message: String) -> Self {
        Self {
            level,
            title: title.to_owned(),
            message,
        }
    }

    fn info(title: &str, message: String) -> Self {
        Self::new(NotificationLevel::Info, title, message)
    }

    fn success(title: &str, message: String) -> Self {
        Self::new(NotificationLevel::Success, title, message)
    }

    fn warning(title: &str, message: String) -> Self {
        Self::new(NotificationLevel::Warning, title, message)
    }

    fn error(title: &str, message: String) -> Self {
        Self::new(NotificationLevel::Error, title, message)
    }
}

pub mod rabbitmq;

pub use rabbitmq::RabbitMq;

use async_trait::async_trait;
use lapin::types::AMQPValue;

use crate::storage::StoreError;
use crate::util::UnixMillis;

/// Per-message header carrying the due-time as Unix epoch milliseconds.
pub const DELIVER_AT_HEADER: &str = "x-future-deliver-at";

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("rabbitmq error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("deliver-at header does not exist")]
    MissingDeliverAt,

    #[error("invalid deliver-at header format")]
    InvalidDeliverAt,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// One-shot publish of a payload to the outbound destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), BusError>;
}

/// Publisher used when no egress is configured: logs and drops the payload.
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), BusError> {
        tracing::warn!(bytes = payload.len(), "no egress configured, dropping due payload");
        Ok(())
    }
}

/// Normalises the deliver-at header to milliseconds. The value is accepted
/// as a signed 64-bit integer, an unsigned 64-bit integer, or an ASCII
/// decimal string; anything else is malformed.
pub fn parse_deliver_at(value: &AMQPValue) -> Result<UnixMillis, BusError> {
    match value {
        AMQPValue::LongLongInt(ms) => Ok(clamp_millis(*ms)),
        AMQPValue::Timestamp(ms) => Ok(*ms),
        AMQPValue::LongString(raw) => {
            let text =
                std::str::from_utf8(raw.as_bytes()).map_err(|_| BusError::InvalidDeliverAt)?;
            let ms = text.parse::<i64>().map_err(|_| BusError::InvalidDeliverAt)?;
            Ok(clamp_millis(ms))
        }
        _ => Err(BusError::InvalidDeliverAt),
    }
}

// instants before the epoch are already due
fn clamp_millis(ms: i64) -> UnixMillis {
    ms.max(0) as UnixMillis
}

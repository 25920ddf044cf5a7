use async_trait::async_trait;

use crate::{
    domain::{DeliveryReceipt, RawMessage},
    Result,
};

/// Campaign-API port (login + bulk fetch).
///
/// The HTTP implementation lives in the `otpcast-source` adapter crate; tests
/// use in-memory fakes.
#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<String>;

    async fn fetch_messages(&self, token: &str, start_date: &str) -> Result<Vec<RawMessage>>;
}

/// Delivery port: send one rendered message to one destination.
///
/// A delivery attempt is authoritative per destination; any capability
/// fallback happens inside the adapter, never a retry beyond it.
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    async fn deliver(&self, chat_id: &str, text: &str, copy_value: &str)
        -> Result<DeliveryReceipt>;
}

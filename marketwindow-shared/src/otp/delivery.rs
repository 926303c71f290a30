/// One-time code delivery
///
/// Codes leave the server through an [`OtpDelivery`] implementation. The
/// server ships [`LogDelivery`], which only records that a code went out (with
/// the destination masked and the code omitted). [`MemoryDelivery`] keeps the
/// messages so tests can read the code a user would have received.
///
/// # Example
///
/// ```
/// use marketwindow_shared::models::otp::OtpPurpose;
/// use marketwindow_shared::otp::delivery::{MemoryDelivery, OtpDelivery, OtpMessage};
/// use uuid::Uuid;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let delivery = MemoryDelivery::new();
/// let shop_id = Uuid::new_v4();
///
/// delivery.deliver(&OtpMessage {
///     subject_id: shop_id,
///     purpose: OtpPurpose::ShopVerification,
///     destination: "+233201234567".to_string(),
///     code: "123456".to_string(),
///     expires_in_minutes: 10,
/// }).await.unwrap();
///
/// assert_eq!(delivery.last_code_for(shop_id).as_deref(), Some("123456"));
/// # }
/// ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::models::otp::OtpPurpose;

/// A code on its way to a user
#[derive(Debug, Clone)]
pub struct OtpMessage {
    pub subject_id: Uuid,
    pub purpose: OtpPurpose,
    pub destination: String,
    pub code: String,
    pub expires_in_minutes: i64,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("No destination available")]
    NoDestination,

    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// Sends a code to its destination
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn deliver(&self, message: &OtpMessage) -> Result<(), DeliveryError>;
}

/// Masks a destination for logs, keeping the last few characters
///
/// ```
/// use marketwindow_shared::otp::delivery::mask_destination;
///
/// assert_eq!(mask_destination("+233201234567"), "*********4567");
/// assert_eq!(mask_destination("shop@example.com"), "s***@example.com");
/// ```
pub fn mask_destination(destination: &str) -> String {
    if let Some((local, domain)) = destination.split_once('@') {
        let first = local.chars().next().map(String::from).unwrap_or_default();
        return format!("{}***@{}", first, domain);
    }

    let chars: Vec<char> = destination.chars().collect();
    let keep = chars.len().min(4);
    let hidden = chars.len() - keep;
    let mut masked = "*".repeat(hidden);
    masked.extend(&chars[hidden..]);
    masked
}

/// Logs deliveries without sending anything
#[derive(Debug, Default, Clone)]
pub struct LogDelivery;

impl LogDelivery {
    pub fn new() -> Self {
        LogDelivery
    }
}

#[async_trait]
impl OtpDelivery for LogDelivery {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, message: &OtpMessage) -> Result<(), DeliveryError> {
        if message.destination.trim().is_empty() {
            return Err(DeliveryError::NoDestination);
        }

        tracing::info!(
            subject_id = %message.subject_id,
            purpose = %message.purpose,
            destination = %mask_destination(&message.destination),
            expires_in_minutes = message.expires_in_minutes,
            "One-time code dispatched"
        );

        Ok(())
    }
}

/// Keeps delivered messages in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryDelivery {
    sent: Arc<Mutex<Vec<OtpMessage>>>,
}

impl MemoryDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages delivered so far, oldest first
    pub fn messages(&self) -> Vec<OtpMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent code sent for a subject
    pub fn last_code_for(&self, subject_id: Uuid) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|m| m.subject_id == subject_id)
            .map(|m| m.code.clone())
    }
}

#[async_trait]
impl OtpDelivery for MemoryDelivery {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, message: &OtpMessage) -> Result<(), DeliveryError> {
        if message.destination.trim().is_empty() {
            return Err(DeliveryError::NoDestination);
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());

        Ok(())
    }
}

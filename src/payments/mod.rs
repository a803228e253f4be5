pub mod payfast;
pub mod paypal;

pub use payfast::{forwarded_client, IpAllowlist, ItnNotification, ItnStatus};
pub use paypal::{PayPalEvent, PayPalVerifier, SaleCompleted, WebhookEnvelope};

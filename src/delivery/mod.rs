//! Delivery — transports, the gateway in front of them, and provider webhooks.

pub mod gateway;
pub mod sendgrid;
pub mod smtp;
pub mod transport;
pub mod twilio;
pub mod webhook;

pub use gateway::{DeliveryGateway, DeliveryResult};
pub use sendgrid::{SendGridConfig, SendGridTransport};
pub use smtp::{SmtpConfig, SmtpEmailTransport};
pub use transport::{CallTransport, EmailTransport, OutboundEmail, TransportReceipt};
pub use twilio::{TwilioCallTransport, TwilioConfig};
pub use webhook::{WebhookEvent, WebhookEventKind, WebhookProcessor};

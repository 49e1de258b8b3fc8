//! Outbound HTTP clients for the payment gateway and the SMS provider.

pub mod bkash;
pub mod sms;

pub use bkash::{BkashClient, BkashResponse};
pub use sms::{SmsClient, SmsSendResult};

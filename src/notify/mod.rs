//! Operator notifications: SMTP transport and escalation rendering.

pub mod email;
pub mod escalation;

pub use email::{MailError, Mailer, SmtpMailer};
pub use escalation::EscalationService;

//! Outbound notifications. Natours only sends transactional email.

pub mod email;

pub use email::{mailer_from_config, send_template, EmailError, LogMailer, Mailer, SmtpMailer, Template};

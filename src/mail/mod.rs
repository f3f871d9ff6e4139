//! Email delivery abstraction.
//!
//! The account flows only ever talk to [`EmailSender`]; the default
//! [`LogEmailSender`] logs the payload and reports success, which is what
//! local development and the test suite want. A real SMTP or API-backed
//! sender slots in behind the same trait.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// One outbound message.
#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can log it.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "email send stub"
        );
        Ok(())
    }
}

/// Builds account emails and hands them to the configured sender.
#[derive(Clone)]
pub struct Mailer {
    sender: Arc<dyn EmailSender>,
    public_host: String,
}

impl Mailer {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>, public_host: String) -> Self {
        Self {
            sender,
            public_host,
        }
    }

    /// Send the email-verification link for a freshly issued code.
    pub fn send_verification_code(&self, to: &str, code: &str) -> Result<()> {
        let host = &self.public_host;
        let body = format!(
            "Someone is trying to register an account for you on the echo \
             server at {host}.\n\n\
             If this was not you, you can safely ignore this email.\n\n\
             If this was you, please follow this link to verify your email \
             address: https://{host}/users/verify/{code}\n"
        );
        self.sender.send(&EmailMessage {
            to: to.to_string(),
            subject: "Verify Your Email".to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    impl EmailSender for CapturingSender {
        fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn verification_mail_carries_the_link() {
        let sender = Arc::new(CapturingSender {
            sent: Mutex::new(Vec::new()),
        });
        let mailer = Mailer::new(sender.clone(), "example.com".to_string());

        assert!(mailer
            .send_verification_code("user@example.com", "code123")
            .is_ok());

        let sent = sender.sent.lock().ok();
        let message = sent.as_ref().and_then(|sent| sent.first());
        assert!(message.is_some_and(|message| {
            message.to == "user@example.com"
                && message
                    .body
                    .contains("https://example.com/users/verify/code123")
        }));
    }

    #[test]
    fn log_sender_always_succeeds() {
        let message = EmailMessage {
            to: "user@example.com".to_string(),
            subject: "subject".to_string(),
            body: "body".to_string(),
        };
        assert!(LogEmailSender.send(&message).is_ok());
    }
}

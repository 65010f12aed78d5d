use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::config::{MailConfig, SmtpSecurity};

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid sender address '{address}': {reason}")]
    SenderAddress { address: String, reason: String },
    #[error("invalid recipient address '{address}': {reason}")]
    RecipientAddress { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP transport setup failed: {0}")]
    Transport(String),
    #[error("SMTP send failed: {0}")]
    Send(#[from] lettre::transport::smtp::Error),
}

fn build_message(cfg: &MailConfig, subject: &str, body: String) -> Result<Message, MailError> {
    let mut builder = Message::builder().from(cfg.email_from.parse().map_err(|e| {
        MailError::SenderAddress { address: cfg.email_from.clone(), reason: format!("{e}") }
    })?);

    // One envelope, every recipient on the To line.
    for addr in &cfg.recipients {
        builder = builder.to(addr.parse().map_err(|e| MailError::RecipientAddress {
            address: addr.clone(),
            reason: format!("{e}"),
        })?);
    }

    Ok(builder
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(body)?)
}

fn build_transport(cfg: &MailConfig) -> Result<SmtpTransport, MailError> {
    let credentials = cfg
        .use_auth()
        .then(|| Credentials::new(cfg.smtp_user.clone(), cfg.smtp_pass.clone()));

    let builder = match cfg.security {
        SmtpSecurity::None => SmtpTransport::builder_dangerous(&cfg.smtp_host).port(cfg.smtp_port),
        SmtpSecurity::Ssl => {
            let tls = TlsParameters::new(cfg.smtp_host.clone())
                .map_err(|e| MailError::Transport(format!("TLS parameter error: {e}")))?;
            SmtpTransport::relay(&cfg.smtp_host)
                .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
                .port(cfg.smtp_port)
                .tls(Tls::Wrapper(tls))
        }
        SmtpSecurity::Starttls => SmtpTransport::relay(&cfg.smtp_host)
            .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
            .port(cfg.smtp_port),
    };

    let builder = match credentials {
        Some(creds) => builder.credentials(creds),
        None => builder,
    };
    Ok(builder.build())
}

/// Sends one HTML message to every configured recipient in a single
/// envelope. One attempt only; callers decide what a failure means.
pub fn send_html(cfg: &MailConfig, subject: &str, body: String) -> Result<(), MailError> {
    let email = build_message(cfg, subject, body)?;
    let mailer = build_transport(cfg)?;
    mailer.send(&email)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_cfg(recipients: &[&str]) -> MailConfig {
        MailConfig {
            smtp_host: "smtp.example.org".to_string(),
            smtp_port: 587,
            smtp_user: "alerts@example.org".to_string(),
            smtp_pass: "hunter2".to_string(),
            email_from: "alerts@example.org".to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            security: SmtpSecurity::Starttls,
        }
    }

    #[test]
    fn message_carries_every_recipient() {
        let cfg = mail_cfg(&["ops@example.org", "admin@example.org"]);
        let message = build_message(&cfg, "Disk usage alert - central", "<html></html>".to_string())
            .unwrap();
        let rcpts: Vec<String> =
            message.envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(rcpts, vec!["ops@example.org", "admin@example.org"]);
    }

    #[test]
    fn bad_recipient_is_named_in_the_error() {
        let cfg = mail_cfg(&["ops@example.org", "not-an-address"]);
        let err = build_message(&cfg, "subject", String::new()).unwrap_err();
        match err {
            MailError::RecipientAddress { address, .. } => assert_eq!(address, "not-an-address"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

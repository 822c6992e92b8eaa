use crate::config::{MailCfg, MailMode};
use anyhow::anyhow;

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send {
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()>;
}

/// Writes the message to the log instead of delivering it.
pub struct LogMailer {
    from: String,
}

impl Mailer for LogMailer {
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        tracing::info!(
            from = %self.from,
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "mail delivered to log"
        );
        Ok(())
    }
}

pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        Err(anyhow!("mail delivery is disabled (to {})", mail.to))
    }
}

pub fn from_config(cfg: &MailCfg) -> Box<dyn Mailer> {
    match cfg.mode {
        MailMode::Log => Box::new(LogMailer {
            from: cfg.from.clone(),
        }),
        MailMode::Disabled => Box::new(DisabledMailer),
    }
}

pub fn otp_mail(to: &str, otp: &str, ttl_minutes: i64) -> OutgoingMail {
    OutgoingMail {
        to: to.to_string(),
        subject: "Password Reset Verification Code".to_string(),
        body: format!(
            "You have requested to reset your password. Your verification code is {}. \
             It expires in {} minutes. If you did not request this, ignore this email.",
            otp, ttl_minutes
        ),
    }
}

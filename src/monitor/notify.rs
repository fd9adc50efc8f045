//! Outbound alert mail.
//!
//! Best-effort sink: failures are logged and swallowed so the monitoring
//! pipeline never stalls on mail delivery.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;

/// SMTP-backed alert sink. Without SMTP configuration every send is a
/// logged no-op.
pub struct Notifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
}

impl Notifier {
    /// Build the sink from configuration.
    pub fn from_config(cfg: &Config) -> Self {
        let Some(host) = cfg.smtp_host.as_deref() else {
            tracing::info!("SMTP not configured, alert mail disabled");
            return Self::disabled();
        };

        let mut builder = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
            Ok(builder) => builder.port(cfg.smtp_port),
            Err(e) => {
                tracing::warn!(host, error = %e, "invalid SMTP relay, alert mail disabled");
                return Self::disabled();
            }
        };

        if let (Some(user), Some(pass)) = (cfg.smtp_user.clone(), cfg.smtp_pass.clone()) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        let from = cfg
            .smtp_from
            .as_deref()
            .or(cfg.smtp_user.as_deref())
            .and_then(|addr| addr.parse::<Mailbox>().ok());
        let Some(from) = from else {
            tracing::warn!("no usable SMTP from address, alert mail disabled");
            return Self::disabled();
        };

        Self {
            transport: Some(builder.build()),
            from: Some(from),
        }
    }

    /// A sink that drops everything. Used when SMTP is unconfigured and
    /// by tests.
    pub fn disabled() -> Self {
        Self {
            transport: None,
            from: None,
        }
    }

    /// Send one alert. Failures are logged and swallowed.
    pub async fn send(&self, recipient: &str, subject: &str, body: &str) {
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            tracing::debug!(recipient, subject, "alert mail disabled, dropping notification");
            return;
        };

        let to: Mailbox = match recipient.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                tracing::warn!(recipient, error = %e, "invalid alert recipient");
                return;
            }
        };

        let message = match Message::builder()
            .from(from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
        {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(recipient, error = %e, "failed to build alert mail");
                return;
            }
        };

        match transport.send(message).await {
            Ok(_) => tracing::info!(recipient, subject, "alert mail sent"),
            Err(e) => tracing::warn!(recipient, error = %e, "failed to send alert mail"),
        }
    }
}

/// Subject and body for a target that just went down.
pub fn down_alert(name: &str, address: &str) -> (String, String) {
    (
        format!("[ALERT] {} is down", name),
        format!("{} ({}) is unreachable.", name, address),
    )
}

/// Subject and body for a target that came back up.
pub fn recovered_alert(name: &str, address: &str, minutes: i64) -> (String, String) {
    (
        format!("[RECOVERED] {} is back up", name),
        format!(
            "{} ({}) is reachable again.\nTotal downtime: {} minutes.",
            name, address, minutes
        ),
    )
}

/// Subject and body for a certificate nearing expiry.
pub fn tls_expiry_alert(name: &str, days_remaining: i64) -> (String, String) {
    (
        format!("[ALERT] TLS certificate for {} expires soon", name),
        format!(
            "The TLS certificate for {} expires in {} days.",
            name, days_remaining
        ),
    )
}

/// Subject and body for a domain registration nearing expiry.
pub fn domain_expiry_alert(name: &str, days_remaining: i64) -> (String, String) {
    (
        format!("[ALERT] Domain registration for {} expires soon", name),
        format!(
            "The domain registration for {} expires in {} days.",
            name, days_remaining
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_down_alert_names_target() {
        let (subject, body) = down_alert("API", "https://api.example.com");
        assert!(subject.contains("API"));
        assert!(subject.contains("down"));
        assert!(body.contains("https://api.example.com"));
    }

    #[test]
    fn test_recovered_alert_carries_duration() {
        let (subject, body) = recovered_alert("API", "https://api.example.com", 17);
        assert!(subject.contains("RECOVERED"));
        assert!(body.contains("17 minutes"));
    }

    #[test]
    fn test_expiry_alerts_carry_days() {
        let (_, tls_body) = tls_expiry_alert("API", 12);
        assert!(tls_body.contains("12 days"));
        let (_, domain_body) = domain_expiry_alert("API", 9);
        assert!(domain_body.contains("9 days"));
    }

    #[tokio::test]
    async fn test_disabled_sink_swallows_sends() {
        let notifier = Notifier::disabled();
        // Must not panic or error
        notifier.send("ops@example.com", "subject", "body").await;
    }
}

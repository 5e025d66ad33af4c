//! Email service for reservation notifications.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;

use crate::{
    config::{EmailConfig, EmailTransportConfig},
    errors::Error,
    types::{Timestamp, display},
};

pub const SUBJECT_STARTED: &str = "Reservation is active";
pub const SUBJECT_EXPIRED: &str = "Reservation expired";

/// What a notification mail says about a reservation.
#[derive(Debug, Clone)]
pub struct ReservationMailInfo<'a> {
    pub username: &'a str,
    pub environment_name: &'a str,
    pub start: Timestamp,
    pub end: Timestamp,
    pub subject: Option<&'a str>,
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(email_config: &EmailConfig) -> Result<Self, Error> {
        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
        })
    }

    pub async fn send_reservation_started(&self, to_email: &str, info: &ReservationMailInfo<'_>) -> Result<(), Error> {
        let body = started_body(info);
        self.send_email(to_email, SUBJECT_STARTED, &body).await
    }

    pub async fn send_reservation_expired(&self, to_email: &str, info: &ReservationMailInfo<'_>) -> Result<(), Error> {
        let body = expired_body(info);
        self.send_email(to_email, SUBJECT_EXPIRED, &body).await
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = to_email.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

/// Minimal escaping for values interpolated into the HTML bodies.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn started_body(info: &ReservationMailInfo<'_>) -> String {
    wrap(
        SUBJECT_STARTED,
        &format!(
            r#"<p>Hello {user},</p>

        <p>your reservation of <strong>{environment}</strong> has started. Access credentials are now available in your personal view.</p>

        {details}"#,
            user = escape_html(info.username),
            environment = escape_html(info.environment_name),
            details = details(info),
        ),
    )
}

fn expired_body(info: &ReservationMailInfo<'_>) -> String {
    wrap(
        SUBJECT_EXPIRED,
        &format!(
            r#"<p>Hello {user},</p>

        <p>your reservation of <strong>{environment}</strong> has ended. The credentials handed out for it are no longer valid.</p>

        {details}"#,
            user = escape_html(info.username),
            environment = escape_html(info.environment_name),
            details = details(info),
        ),
    )
}

fn details(info: &ReservationMailInfo<'_>) -> String {
    let subject = info
        .subject
        .filter(|s| !s.is_empty())
        .map(|s| format!("<tr><td>Subject</td><td>{}</td></tr>", escape_html(s)))
        .unwrap_or_default();

    format!(
        "<table>\n            <tr><td>From</td><td>{}</td></tr>\n            <tr><td>Until</td><td>{}</td></tr>\n            {subject}\n        </table>",
        display(info.start),
        display(info.end),
    )
}

fn wrap(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>

        {content}

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn info() -> ReservationMailInfo<'static> {
        let start = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(9, 0, 0).unwrap();
        ReservationMailInfo {
            username: "alice",
            environment_name: "Lab <West>",
            start,
            end: start + chrono::Duration::hours(3),
            subject: Some("release test"),
        }
    }

    #[test]
    fn test_started_body() {
        let body = started_body(&info());

        assert!(body.contains("<title>Reservation is active</title>"));
        assert!(body.contains("Hello alice,"));
        assert!(body.contains("Lab &lt;West&gt;"));
        assert!(body.contains("2026-10-19 09:00"));
        assert!(body.contains("2026-10-19 12:00"));
        assert!(body.contains("release test"));
    }

    #[test]
    fn test_expired_body_without_subject() {
        let mut info = info();
        info.subject = None;
        let body = expired_body(&info);

        assert!(body.contains("<title>Reservation expired</title>"));
        assert!(body.contains("no longer valid"));
        assert!(!body.contains("Subject"));
    }

    #[tokio::test]
    async fn test_file_transport_writes_mail() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.path().to_string_lossy().to_string(),
            },
            ..Default::default()
        };
        let service = EmailService::new(&config).unwrap();

        service.send_reservation_started("alice@example.com", &info()).await.unwrap();

        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.path().to_string_lossy().to_string(),
            },
            ..Default::default()
        };
        let service = EmailService::new(&config).unwrap();

        assert!(service.send_reservation_expired("not an address", &info()).await.is_err());
    }
}

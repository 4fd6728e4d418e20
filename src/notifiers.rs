//! Notification channels: email and push services

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::Value;

use crate::config::NOTIFY_TIMEOUT_SECS;
use crate::error::SyncError;
use crate::store::ChannelRecord;

pub const TEST_TITLE: &str = "Grocylink - Test";
pub const TEST_MESSAGE: &str = "Dies ist eine Testnachricht von Grocylink.";

/// The configuration of a channel, resolved from its stored record
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelConfig {
    Email {
        smtp_host: String,
        smtp_port: u16,
        /// Upgrade the connection with STARTTLS
        use_tls: bool,
        username: Option<String>,
        password: Option<String>,
        from_email: String,
        to_email: String,
    },
    Pushover { api_token: String, user_key: String, priority: i64 },
    Telegram { bot_token: String, chat_id: String },
    Slack { webhook_url: String },
    Discord { webhook_url: String },
    Gotify { server_url: String, app_token: String, priority: i64 },
}

impl ChannelConfig {
    /// Resolve the configuration of a channel of the given type (`pushover`, `telegram`, etc.)
    pub fn parse(kind: &str, config: &BTreeMap<String, Value>) -> Result<Self, SyncError> {
        Ok(match kind {
            "email" => {
                let username = optional(config, "username");
                let from_email = match optional(config, "from_email").or_else(|| username.clone()) {
                    None => return Err(SyncError::configuration("Missing 'from_email' in the channel configuration")),
                    Some(from) => from,
                };
                let smtp_port = integer(config, "smtp_port", 587);
                ChannelConfig::Email {
                    smtp_host: required(config, "smtp_host")?,
                    smtp_port: u16::try_from(smtp_port)
                        .map_err(|_| SyncError::configuration(format!("Invalid SMTP port {}", smtp_port)))?,
                    use_tls: boolean(config, "use_tls", true),
                    username,
                    password: optional(config, "password"),
                    from_email,
                    to_email: required(config, "to_email")?,
                }
            },
            "pushover" => ChannelConfig::Pushover {
                api_token: required(config, "api_token")?,
                user_key: required(config, "user_key")?,
                priority: integer(config, "priority", 0),
            },
            "telegram" => ChannelConfig::Telegram {
                bot_token: required(config, "bot_token")?,
                chat_id: required(config, "chat_id")?,
            },
            "slack" => ChannelConfig::Slack {
                webhook_url: required(config, "webhook_url")?,
            },
            "discord" => ChannelConfig::Discord {
                webhook_url: required(config, "webhook_url")?,
            },
            "gotify" => ChannelConfig::Gotify {
                server_url: required(config, "server_url")?,
                app_token: required(config, "app_token")?,
                priority: integer(config, "priority", 5),
            },
            other => return Err(SyncError::configuration(format!("Unsupported channel type '{}'", other))),
        })
    }

    /// The HTTP request that delivers a message on this channel. `None` for channels that do not use HTTP
    pub fn outgoing(&self, title: &str, message: &str) -> Option<OutgoingMessage> {
        let outgoing = match self {
            ChannelConfig::Email { .. } => return None,
            ChannelConfig::Pushover { api_token, user_key, priority } => OutgoingMessage {
                url: "https://api.pushover.net/1/messages.json".to_string(),
                headers: Vec::new(),
                body: Body::Form(vec![
                    ("token".to_string(), api_token.clone()),
                    ("user".to_string(), user_key.clone()),
                    ("title".to_string(), title.to_string()),
                    ("message".to_string(), message.to_string()),
                    ("priority".to_string(), priority.to_string()),
                ]),
            },
            ChannelConfig::Telegram { bot_token, chat_id } => OutgoingMessage {
                url: format!("https://api.telegram.org/bot{}/sendMessage", bot_token),
                headers: Vec::new(),
                body: Body::Json(serde_json::json!({
                    "chat_id": chat_id,
                    "text": format!("<b>{}</b>\n\n{}", title, message),
                    "parse_mode": "HTML",
                })),
            },
            ChannelConfig::Slack { webhook_url } => OutgoingMessage {
                url: webhook_url.clone(),
                headers: Vec::new(),
                body: Body::Json(serde_json::json!({ "text": format!("*{}*\n{}", title, message) })),
            },
            ChannelConfig::Discord { webhook_url } => OutgoingMessage {
                url: webhook_url.clone(),
                headers: Vec::new(),
                body: Body::Json(serde_json::json!({ "content": format!("**{}**\n{}", title, message) })),
            },
            ChannelConfig::Gotify { server_url, app_token, priority } => OutgoingMessage {
                url: format!("{}/message", server_url.trim_end_matches('/')),
                headers: vec![("X-Gotify-Key".to_string(), app_token.clone())],
                body: Body::Json(serde_json::json!({
                    "title": title,
                    "message": message,
                    "priority": priority,
                })),
            },
        };
        Some(outgoing)
    }
}

fn required(config: &BTreeMap<String, Value>, key: &str) -> Result<String, SyncError> {
    match config.get(key) {
        Some(Value::String(s)) if s.is_empty() == false => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(SyncError::configuration(format!("Missing '{}' in the channel configuration", key))),
    }
}

fn optional(config: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    match config.get(key) {
        Some(Value::String(s)) if s.is_empty() == false => Some(s.clone()),
        _ => None,
    }
}

fn boolean(config: &BTreeMap<String, Value>, key: &str, default: bool) -> bool {
    match config.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(default),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        _ => default,
    }
}

fn integer(config: &BTreeMap<String, Value>, key: &str, default: i64) -> i64 {
    match config.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}


#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// An HTTP POST request
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}


/// A notification channel, ready to be used
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub config: ChannelConfig,
}

impl Channel {
    pub fn from_record(record: &ChannelRecord) -> Result<Self, SyncError> {
        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            enabled: record.enabled,
            config: ChannelConfig::parse(&record.kind, &record.config)?,
        })
    }
}


/// Sends messages to channels
pub struct Notifier {
    http: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }

    pub async fn send(&self, channel: &Channel, title: &str, message: &str) -> Result<(), SyncError> {
        let outgoing = match channel.config.outgoing(title, message) {
            Some(outgoing) => outgoing,
            None => return send_email(&channel.config, title, message).await,
        };
        let mut request = self.http.post(&outgoing.url);
        for (name, value) in &outgoing.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &outgoing.body {
            Body::Json(json) => request.json(json),
            Body::Form(fields) => request.form(fields),
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() == false {
            return Err(SyncError::connection(format!("Channel '{}' answered {}", channel.name, status)));
        }
        log::debug!("Notification sent via {}", channel.name);
        Ok(())
    }

    /// Sends a fixed test message
    pub async fn test(&self, channel: &Channel) -> Result<(), SyncError> {
        self.send(channel, TEST_TITLE, TEST_MESSAGE).await
    }
}

/// The email a channel of type `email` sends
pub fn email_message(from: &str, to: &str, title: &str, message: &str) -> Result<Message, SyncError> {
    let from: Mailbox = from.parse()
        .map_err(|err| SyncError::configuration(format!("Invalid sender address '{}': {}", from, err)))?;
    let to: Mailbox = to.parse()
        .map_err(|err| SyncError::configuration(format!("Invalid recipient address '{}': {}", to, err)))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(title)
        .header(ContentType::TEXT_PLAIN)
        .body(message.to_string())
        .map_err(|err| SyncError::configuration(format!("Unable to build the email: {}", err)))
}

async fn send_email(config: &ChannelConfig, title: &str, message: &str) -> Result<(), SyncError> {
    let (smtp_host, smtp_port, use_tls, username, password, from_email, to_email) = match config {
        ChannelConfig::Email { smtp_host, smtp_port, use_tls, username, password, from_email, to_email } =>
            (smtp_host, *smtp_port, *use_tls, username, password, from_email, to_email),
        _ => return Err(SyncError::configuration("Not an email channel")),
    };
    let email = email_message(from_email, to_email, title, message)?;

    let mut transport = if use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
            .map_err(|err| SyncError::connection(format!("SMTP server {}: {}", smtp_host, err)))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host.as_str())
    };
    transport = transport
        .port(smtp_port)
        .timeout(Some(Duration::from_secs(NOTIFY_TIMEOUT_SECS)));
    if let (Some(username), Some(password)) = (username, password) {
        transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
    }

    transport.build().send(email).await
        .map_err(|err| SyncError::connection(format!("SMTP server {}: {}", smtp_host, err)))?;
    log::debug!("Email sent to {}", to_email);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn channel_configs_are_resolved() {
        let gotify = ChannelConfig::parse("gotify", &config(&[
            ("server_url", Value::from("https://push.example.com/")),
            ("app_token", Value::from("AbCd")),
            ("priority", Value::from("8")),
        ])).unwrap();
        let outgoing = gotify.outgoing("Title", "Body").unwrap();
        assert_eq!(outgoing.url, "https://push.example.com/message");
        assert_eq!(outgoing.headers, vec![("X-Gotify-Key".to_string(), "AbCd".to_string())]);
        assert_eq!(outgoing.body, Body::Json(serde_json::json!({"title": "Title", "message": "Body", "priority": 8})));

        let telegram = ChannelConfig::parse("telegram", &config(&[
            ("bot_token", Value::from("123:abc")),
            ("chat_id", Value::from(-42)),
        ])).unwrap();
        assert_eq!(telegram, ChannelConfig::Telegram { bot_token: "123:abc".to_string(), chat_id: "-42".to_string() });
    }

    #[test]
    fn email_channels_are_resolved() {
        let email = ChannelConfig::parse("email", &config(&[
            ("smtp_host", Value::from("smtp.example.com")),
            ("smtp_port", Value::from("465")),
            ("use_tls", Value::from(false)),
            ("username", Value::from("grocy@example.com")),
            ("password", Value::from("secret")),
            ("to_email", Value::from("john@example.com")),
        ])).unwrap();
        assert_eq!(email, ChannelConfig::Email {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 465,
            use_tls: false,
            username: Some("grocy@example.com".to_string()),
            password: Some("secret".to_string()),
            from_email: "grocy@example.com".to_string(),
            to_email: "john@example.com".to_string(),
        });
        assert!(email.outgoing("Title", "Body").is_none());

        // Defaults: port 587 with STARTTLS, no authentication
        let email = ChannelConfig::parse("email", &config(&[
            ("smtp_host", Value::from("localhost")),
            ("from_email", Value::from("grocy@example.com")),
            ("to_email", Value::from("john@example.com")),
        ])).unwrap();
        match email {
            ChannelConfig::Email { smtp_port, use_tls, username, password, .. } => {
                assert_eq!(smtp_port, 587);
                assert!(use_tls);
                assert_eq!(username, None);
                assert_eq!(password, None);
            },
            other => panic!("unexpected config {:?}", other),
        }

        // Without a username, the sender must be given
        assert!(ChannelConfig::parse("email", &config(&[
            ("smtp_host", Value::from("localhost")),
            ("to_email", Value::from("john@example.com")),
        ])).is_err());
        assert!(ChannelConfig::parse("email", &config(&[
            ("smtp_host", Value::from("localhost")),
            ("smtp_port", Value::from(70000)),
            ("from_email", Value::from("grocy@example.com")),
            ("to_email", Value::from("john@example.com")),
        ])).is_err());
    }

    #[test]
    fn emails_are_built() {
        let email = email_message("grocy@example.com", "john@example.com", "Grocy Warning", "[Expired] Milk").unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: Grocy Warning"));
        assert!(raw.contains("To: john@example.com"));
        assert!(raw.contains("[Expired] Milk"));

        assert!(matches!(email_message("not an address", "john@example.com", "t", "m"), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn invalid_channels_are_rejected() {
        assert!(ChannelConfig::parse("slack", &config(&[])).is_err());
        assert!(ChannelConfig::parse("slack", &config(&[("webhook_url", Value::from(""))])).is_err());
        let err = ChannelConfig::parse("matrix", &config(&[])).unwrap_err();
        assert!(err.to_string().contains("Unsupported channel type"));
    }
}

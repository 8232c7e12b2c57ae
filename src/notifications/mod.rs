/// Security notifications
///
/// Every event is written to `notification_log` before delivery is attempted.
/// Delivery to Telegram and email happens on a background worker and is
/// best-effort.
pub mod dispatcher;
pub mod location;
pub mod telegram;

pub use dispatcher::{DeliveryChannel, Dispatch, Notifier, Recipient};
pub use location::LocationLookup;
pub use telegram::TelegramChannel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of notification kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum NotificationEvent {
    #[serde(rename = "new_device_login")]
    NewDeviceLogin {
        ip: String,
        location: String,
        device: String,
    },
    #[serde(rename = "2fa_enabled")]
    TwoFactorEnabled,
    #[serde(rename = "2fa_disabled")]
    TwoFactorDisabled,
    #[serde(rename = "password_changed")]
    PasswordChanged { ip: String },
    #[serde(rename = "device_trusted")]
    DeviceTrusted { device: String },
    #[serde(rename = "device_revoked")]
    DeviceRevoked { device: String },
    #[serde(rename = "suspicious_login")]
    SuspiciousLogin { ip: String, reason: String },
    /// Anything else, including admin broadcasts
    #[serde(rename = "other")]
    Other { kind: String, message: String },
}

impl NotificationEvent {
    /// Value stored in `notification_log.kind`
    pub fn kind(&self) -> &str {
        match self {
            NotificationEvent::NewDeviceLogin { .. } => "new_device_login",
            NotificationEvent::TwoFactorEnabled => "2fa_enabled",
            NotificationEvent::TwoFactorDisabled => "2fa_disabled",
            NotificationEvent::PasswordChanged { .. } => "password_changed",
            NotificationEvent::DeviceTrusted { .. } => "device_trusted",
            NotificationEvent::DeviceRevoked { .. } => "device_revoked",
            NotificationEvent::SuspiciousLogin { .. } => "suspicious_login",
            NotificationEvent::Other { kind, .. } => kind,
        }
    }

    /// Event payload for the audit row
    pub fn details(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Rendered notification
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub title: String,
    /// Telegram HTML subset
    pub html_body: String,
    pub text_body: String,
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render an event into a message
pub fn render(event: &NotificationEvent, at: DateTime<Utc>) -> Message {
    let time = at.format("%Y-%m-%d %H:%M UTC").to_string();

    let (title, lines): (&str, Vec<String>) = match event {
        NotificationEvent::NewDeviceLogin { ip, location, device } => (
            "New sign-in to your account",
            vec![
                format!("IP: {}", ip),
                format!("Location: {}", location),
                format!("Device: {}", device),
                format!("Time: {}", time),
                String::new(),
                "If this wasn't you, change your password, review trusted devices and enable 2FA."
                    .to_string(),
            ],
        ),
        NotificationEvent::TwoFactorEnabled => (
            "Two-factor authentication enabled",
            vec!["Your account is now protected by a second factor.".to_string()],
        ),
        NotificationEvent::TwoFactorDisabled => (
            "Two-factor authentication disabled",
            vec!["If you did not do this, secure your account immediately.".to_string()],
        ),
        NotificationEvent::PasswordChanged { ip } => (
            "Password changed",
            vec![
                "The password for your account was changed.".to_string(),
                format!("IP: {}", ip),
                format!("Time: {}", time),
            ],
        ),
        NotificationEvent::DeviceTrusted { device } => (
            "New trusted device",
            vec![
                format!("Device: {}", device),
                "Valid for 30 days. Sign-ins from this device skip the second factor.".to_string(),
            ],
        ),
        NotificationEvent::DeviceRevoked { device } => (
            "Trusted device revoked",
            vec![format!("{} no longer has trusted access to your account.", device)],
        ),
        NotificationEvent::SuspiciousLogin { ip, reason } => (
            "Suspicious sign-in attempt",
            vec![
                format!("IP: {}", ip),
                format!("Reason: {}", reason),
                format!("Time: {}", time),
            ],
        ),
        NotificationEvent::Other { message, .. } if !message.is_empty() => {
            ("Notification", vec![message.clone()])
        }
        NotificationEvent::Other { .. } => (
            "Security notification",
            vec!["There is new activity on your account.".to_string()],
        ),
    };

    let text_body = format!("{}\n\n{}", title, lines.join("\n"));
    let html_body = format!(
        "<b>{}</b>\n\n{}",
        escape_html(title),
        lines
            .iter()
            .map(|line| escape_html(line))
            .collect::<Vec<_>>()
            .join("\n")
    );

    Message {
        title: title.to_string(),
        html_body,
        text_body,
    }
}

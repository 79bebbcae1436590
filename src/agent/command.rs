//! Structured replies and their parsing
//!
//! Responders are asked for JSON of the form
//! `{"type": "...", "textResponse": "...", "params": {...}}`. Models do not
//! always comply, especially with web search enabled, so parsing falls back
//! step by step and finally treats the raw text as a plain chat reply.

use serde::Deserialize;

use crate::{Error, Result};

/// Action requested alongside a reply
///
/// Executing the action is up to the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponderCommand {
    /// Plain conversation, nothing to execute
    #[default]
    Chat,
    OpenApp {
        app_name: String,
    },
    ToggleWifi {
        enabled: bool,
    },
    SetTimer {
        duration_secs: u64,
    },
    /// Unrecognized or incomplete command
    Unknown,
}

impl ResponderCommand {
    /// Wire name of the command type
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::OpenApp { .. } => "open_app",
            Self::ToggleWifi { .. } => "toggle_wifi",
            Self::SetTimer { .. } => "set_timer",
            Self::Unknown => "unknown",
        }
    }
}

/// A responder's answer to one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text to speak
    pub text: String,
    pub command: ResponderCommand,
}

impl Reply {
    /// Plain chat reply
    #[must_use]
    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            command: ResponderCommand::Chat,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReply {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text_response: String,
    #[serde(default)]
    params: RawParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParams {
    app_name: Option<String>,
    wifi_status: Option<String>,
    duration_seconds: Option<f64>,
}

impl RawReply {
    fn into_reply(self) -> Reply {
        let command = match self.kind.as_deref().map(str::trim) {
            None | Some("chat") => ResponderCommand::Chat,
            Some("open_app") => self
                .params
                .app_name
                .filter(|name| !name.trim().is_empty())
                .map_or(ResponderCommand::Unknown, |app_name| {
                    ResponderCommand::OpenApp { app_name }
                }),
            Some("toggle_wifi") => match self.params.wifi_status.as_deref() {
                Some("on") => ResponderCommand::ToggleWifi { enabled: true },
                Some("off") => ResponderCommand::ToggleWifi { enabled: false },
                _ => ResponderCommand::Unknown,
            },
            Some("set_timer") => self
                .params
                .duration_seconds
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map_or(ResponderCommand::Unknown, |secs| {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let duration_secs = secs.round() as u64;
                    ResponderCommand::SetTimer { duration_secs }
                }),
            Some(other) => {
                tracing::debug!(kind = other, "unrecognized command type");
                ResponderCommand::Unknown
            }
        };

        Reply {
            text: self.text_response,
            command,
        }
    }
}

/// Parse raw model output into a reply
///
/// Tries, in order: the outermost `{...}` span, the text with code fences
/// removed, and finally the raw text as a chat reply.
///
/// # Errors
///
/// Returns [`Error::Responder`] if the model output is empty
pub fn parse_reply(raw: &str) -> Result<Reply> {
    if raw.trim().is_empty() {
        return Err(Error::Responder("empty response".to_string()));
    }

    if let Some(json) = outermost_object(raw)
        && let Ok(parsed) = serde_json::from_str::<RawReply>(json)
    {
        return Ok(parsed.into_reply());
    }

    let unfenced = raw.replace("```json", "").replace("```", "");
    if let Ok(parsed) = serde_json::from_str::<RawReply>(unfenced.trim()) {
        return Ok(parsed.into_reply());
    }

    tracing::debug!("reply is not JSON, using raw text");
    Ok(Reply::chat(raw))
}

fn outermost_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let reply =
            parse_reply(r#"{"type":"chat","textResponse":"Chào bạn! Hôm nay là thứ Hai."}"#)
                .unwrap();
        assert_eq!(reply, Reply::chat("Chào bạn! Hôm nay là thứ Hai."));
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let raw = "Here you go:\n{\"type\":\"open_app\",\"textResponse\":\"Đang mở YouTube\",\"params\":{\"appName\":\"YouTube\"}}\nDone.";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.text, "Đang mở YouTube");
        assert_eq!(
            reply.command,
            ResponderCommand::OpenApp {
                app_name: "YouTube".into()
            }
        );
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"type\":\"toggle_wifi\",\"textResponse\":\"Đã tắt\",\"params\":{\"wifiStatus\":\"off\"}}\n```";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.command, ResponderCommand::ToggleWifi { enabled: false });
    }

    #[test]
    fn timer_duration_is_parsed() {
        let raw = r#"{"type":"set_timer","textResponse":"OK","params":{"durationSeconds":300}}"#;
        assert_eq!(
            parse_reply(raw).unwrap().command,
            ResponderCommand::SetTimer { duration_secs: 300 }
        );
    }

    #[test]
    fn incomplete_command_is_unknown() {
        let raw = r#"{"type":"open_app","textResponse":"Mở gì ạ?"}"#;
        assert_eq!(parse_reply(raw).unwrap().command, ResponderCommand::Unknown);

        let raw = r#"{"type":"launch_rocket","textResponse":"Không được"}"#;
        assert_eq!(parse_reply(raw).unwrap().command, ResponderCommand::Unknown);
    }

    #[test]
    fn prose_falls_back_to_chat() {
        let raw = "Hôm nay trời nắng, khoảng 32 độ.";
        assert_eq!(parse_reply(raw).unwrap(), Reply::chat(raw));
    }

    #[test]
    fn broken_json_falls_back_to_raw_text() {
        let raw = "{\"type\": \"chat\", \"textResponse\": ";
        assert_eq!(parse_reply(raw).unwrap(), Reply::chat(raw));
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(parse_reply("  \n"), Err(Error::Responder(_))));
    }
}

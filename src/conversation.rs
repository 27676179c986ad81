use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::{Display, EnumString};

/// Role of a message in the request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message sent to the chat-completion endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One (user, assistant) exchange from the UI history.
///
/// Serialized as a two-element array so the browser can send
/// `[["hi", "hello"], ["next", null]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn(pub Option<String>, pub Option<String>);

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self(Some(user.into()), Some(assistant.into()))
    }

    pub fn user(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn assistant(&self) -> Option<&str> {
        self.1.as_deref()
    }
}

/// Lossy UTF-8 normalization. Invalid sequences become U+FFFD.
pub fn sanitize(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

/// Replace `\uXXXX` escapes that encode an unpaired UTF-16 surrogate with
/// `\uFFFD`, so JSON produced from broken browser strings still parses.
/// Paired surrogates and every other escape are left as they are.
pub fn repair_surrogate_escapes(json: &str) -> Cow<'_, str> {
    let bytes = json.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        // `\\`, `\"` and friends: skip the escaped character
        if bytes.get(i + 1) != Some(&b'u') {
            i += 2;
            continue;
        }
        let Some(unit) = escaped_unit(bytes, i + 2) else {
            i += 2;
            continue;
        };
        match unit {
            0xD800..=0xDBFF => {
                let paired = bytes.get(i + 6) == Some(&b'\\')
                    && bytes.get(i + 7) == Some(&b'u')
                    && matches!(escaped_unit(bytes, i + 8), Some(0xDC00..=0xDFFF));
                if paired {
                    i += 12;
                    continue;
                }
            }
            0xDC00..=0xDFFF => {}
            _ => {
                i += 6;
                continue;
            }
        }

        out.push_str(&json[copied..i]);
        out.push_str("\\uFFFD");
        i += 6;
        copied = i;
    }

    if copied == 0 {
        return Cow::Borrowed(json);
    }
    out.push_str(&json[copied..]);
    Cow::Owned(out)
}

/// The four hex digits of a `\u` escape starting at `start`
fn escaped_unit(bytes: &[u8], start: usize) -> Option<u16> {
    let digits = bytes.get(start..start + 4)?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u16::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
}

/// Build the request payload: system prompt, then each turn's non-empty
/// halves in order, then the new user message.
pub fn assemble(history: &[Turn], system_prompt: &str, new_message: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(Message::new(Role::System, sanitize(system_prompt)));

    for turn in history {
        if let Some(user) = turn.user().filter(|s| !s.is_empty()) {
            messages.push(Message::new(Role::User, sanitize(user)));
        }
        if let Some(assistant) = turn.assistant().filter(|s| !s.is_empty()) {
            messages.push(Message::new(Role::Assistant, sanitize(assistant)));
        }
    }

    messages.push(Message::new(Role::User, sanitize(new_message)));
    messages
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn sanitize_is_idempotent(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let once = sanitize(&bytes);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn sanitize_keeps_valid_text(text in any::<String>()) {
            prop_assert_eq!(sanitize(&text), text);
        }

        #[test]
        fn repaired_strings_always_parse(units in proptest::collection::vec(any::<u16>(), 0..16)) {
            let escaped: String = units.iter().map(|u| format!("\\u{:04x}", u)).collect();
            let json = format!("\"{}\"", escaped);
            let repaired = repair_surrogate_escapes(&json);
            prop_assert!(serde_json::from_str::<String>(&repaired).is_ok());
        }

        #[test]
        fn assembled_length_counts_non_empty_halves(
            history in proptest::collection::vec(
                (proptest::option::of(".{0,4}"), proptest::option::of(".{0,4}")),
                0..8,
            ),
            message in ".{0,8}",
        ) {
            let turns: Vec<Turn> = history.iter().cloned().map(|(u, a)| Turn(u, a)).collect();
            let halves = history
                .iter()
                .flat_map(|(u, a)| [u, a])
                .filter(|h| h.as_deref().is_some_and(|s| !s.is_empty()))
                .count();

            let messages = assemble(&turns, "sys", &message);
            prop_assert_eq!(messages.len(), halves + 2);
            prop_assert_eq!(messages.last().cloned(), Some(Message::new(Role::User, message)));
        }
    }
}

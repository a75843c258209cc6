//! Decides what to do with an inbound event

use arc_chat::ChatId;

use crate::napcat::InboundEvent;

const RESET_COMMAND: &str = "/arcreset";

/// Outcome of routing one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Not for us
    Ignore,
    /// Answer with a fixed text, no model involved
    Reply { chat: ChatId, text: String },
    /// Delete `target`'s history and report back to `reply_to`
    Reset { reply_to: ChatId, target: ChatId },
    /// Run an exchange
    Converse { chat: ChatId, text: String },
}

/// Message routing rules
#[derive(Debug, Clone)]
pub struct Router {
    group_prefix: String,
    admins: Vec<String>,
}

impl Router {
    pub fn new(group_prefix: impl Into<String>, admins: Vec<String>) -> Self {
        Self {
            group_prefix: group_prefix.into(),
            admins,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }

    pub fn route(&self, event: &InboundEvent) -> Route {
        if event.post_type != "message" {
            return Route::Ignore;
        }
        let Some(user_id) = event.sender_id() else {
            return Route::Ignore;
        };

        match event.message_type.as_str() {
            "private" => self.route_private(event, user_id),
            "group" => match event.group_id.as_deref() {
                Some(group_id) => self.route_group(event, user_id, group_id),
                None => Route::Ignore,
            },
            _ => Route::Ignore,
        }
    }

    fn route_private(&self, event: &InboundEvent, user_id: &str) -> Route {
        let chat = ChatId::private(user_id);
        let text = event.text();
        let text = text.trim();

        if text.starts_with(RESET_COMMAND) {
            return Route::Reset {
                reply_to: chat.clone(),
                target: chat,
            };
        }
        if text.is_empty() {
            return Route::Ignore;
        }

        Route::Converse {
            chat,
            text: text.to_string(),
        }
    }

    fn route_group(&self, event: &InboundEvent, user_id: &str, group_id: &str) -> Route {
        let chat = ChatId::group(group_id);
        let raw = event.raw_message.trim();

        if let Some(args) = raw.strip_prefix(RESET_COMMAND) {
            let Some(target) = args.split_whitespace().next() else {
                return Route::Reply {
                    chat,
                    text: format!("Usage: {RESET_COMMAND} <group_id>"),
                };
            };
            if !self.is_admin(user_id) {
                return Route::Reply {
                    chat,
                    text: "Only administrators can reset group chat histories.".to_string(),
                };
            }
            return Route::Reset {
                reply_to: chat,
                target: ChatId::group(target),
            };
        }

        if self.group_prefix.is_empty() || !raw.starts_with(&self.group_prefix) {
            return Route::Ignore;
        }
        let content = raw.trim_start_matches(self.group_prefix.as_str()).trim();
        if content.is_empty() {
            return Route::Ignore;
        }

        Route::Converse {
            chat,
            text: format!("[user {}-{}] {}", user_id, event.nickname(), content),
        }
    }
}

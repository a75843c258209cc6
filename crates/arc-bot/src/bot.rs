//! Glue between the NapCat connection and the conversation runtime

use std::sync::Arc;

use arc_chat::{ChatId, Conversation, Dispatcher, Pacing, SegmentSink, deliver_reply};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::napcat::InboundEvent;
use crate::router::{Route, Router};

pub struct Bot {
    router: Router,
    conversation: Conversation,
    sink: Arc<dyn SegmentSink>,
    dispatcher: Dispatcher,
    pacing: Pacing,
}

impl Bot {
    pub fn new(
        router: Router,
        conversation: Conversation,
        sink: Arc<dyn SegmentSink>,
        dispatcher: Dispatcher,
        pacing: Pacing,
    ) -> Self {
        Self {
            router,
            conversation,
            sink,
            dispatcher,
            pacing,
        }
    }

    /// Route an event and run it on the dispatcher. Returns `None` when the
    /// event needs no work.
    pub fn handle(self: &Arc<Self>, event: InboundEvent) -> Option<JoinHandle<()>> {
        let route = self.router.route(&event);
        if route == Route::Ignore {
            return None;
        }

        let bot = Arc::clone(self);
        Some(self.dispatcher.spawn(async move { bot.execute(route).await }))
    }

    pub async fn execute(&self, route: Route) {
        match route {
            Route::Ignore => {}
            Route::Reply { chat, text } => self.say(&chat, &text).await,
            Route::Reset { reply_to, target } => {
                let text = match self.conversation.reset(&target).await {
                    Ok(removed) => reset_reply(&target, removed),
                    Err(e) => {
                        warn!(chat = %target, error = %e, "Reset failed");
                        format!("Could not reset chat history: {e}")
                    }
                };
                self.say(&reply_to, &text).await;
            }
            Route::Converse { chat, text } => {
                info!(chat = %chat, chars = text.chars().count(), "Incoming message");
                let reply = self.conversation.converse(chat.clone(), text);
                let sent = deliver_reply(self.sink.as_ref(), &chat, reply, self.pacing).await;
                info!(chat = %chat, segments = sent, "Reply delivered");
            }
        }
    }

    async fn say(&self, chat: &ChatId, text: &str) {
        if let Err(e) = self.sink.deliver(chat, text).await {
            warn!(chat = %chat, error = %e, "Failed to send reply");
        }
    }
}

fn reset_reply(target: &ChatId, removed: bool) -> String {
    match (target, removed) {
        (ChatId::Private(_), true) => "Your chat history has been reset.".to_string(),
        (ChatId::Private(_), false) => "You have no chat history.".to_string(),
        (ChatId::Group(id), true) => format!("Chat history of group {id} has been reset."),
        (ChatId::Group(id), false) => format!("Group {id} has no chat history to reset."),
    }
}

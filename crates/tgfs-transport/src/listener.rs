//! Control listener: a background loop reacting to operator commands.
//!
//! - `/start`, `/bind`: bind the sender's chat (persisted, then published)
//! - `/id`, `/chatid`, `/whoami`: reply with the sender's chat id
//!
//! The listener is the only writer of the chat binding. It never touches the
//! manifest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tgfs_config::{log_listener_debug, log_listener_error, log_listener_info};

use crate::binding::BindingPublisher;
use crate::{ControlChannel, ControlUpdate, Result};

pub const BIND_OK_REPLY: &str = "Chat ID saved. Bot is ready!";
pub const BIND_ERR_REPLY: &str = "Error saving chat ID.";

/// Delay after a failed poll before retrying
const RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Granularity at which a backoff checks for shutdown
const STOP_CHECK: Duration = Duration::from_millis(50);

/// Commands understood by the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Bind,
    Identify,
}

impl ControlCommand {
    /// Parse the first word of a message, accepting `/cmd@botname`.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.strip_prefix('/')?;
        let name = word.split('@').next().unwrap_or(word);
        match name.to_ascii_lowercase().as_str() {
            "start" | "bind" => Some(ControlCommand::Bind),
            "id" | "chatid" | "whoami" => Some(ControlCommand::Identify),
            _ => None,
        }
    }
}

pub struct ControlListener<C: ControlChannel> {
    channel: Arc<C>,
    publisher: BindingPublisher,
    poll_timeout: Duration,
    offset: Option<i64>,
}

impl<C: ControlChannel + 'static> ControlListener<C> {
    pub fn new(channel: Arc<C>, publisher: BindingPublisher, poll_timeout: Duration) -> Self {
        Self {
            channel,
            publisher,
            poll_timeout,
            offset: None,
        }
    }

    /// Poll once and handle every update received. Returns the update count.
    pub fn poll_once(&mut self) -> Result<usize> {
        let updates = self.channel.poll_updates(self.offset, self.poll_timeout)?;
        for update in &updates {
            self.offset = Some(self.offset.unwrap_or(0).max(update.update_id + 1));
            self.handle(update);
        }
        Ok(updates.len())
    }

    fn handle(&self, update: &ControlUpdate) {
        let Some(command) = update.text.as_deref().and_then(ControlCommand::parse) else {
            return;
        };
        log_listener_debug!("Command received", chat = update.chat.0, command = format!("{:?}", command));

        let reply = match command {
            ControlCommand::Bind => match self.publisher.publish(update.chat) {
                Ok(()) => {
                    log_listener_info!("Chat bound", chat = update.chat.0);
                    BIND_OK_REPLY.to_string()
                }
                Err(e) => {
                    log_listener_error!(
                        "Failed to persist chat binding",
                        chat = update.chat.0,
                        error = e.to_string()
                    );
                    BIND_ERR_REPLY.to_string()
                }
            },
            ControlCommand::Identify => format!("Chat ID: {}", update.chat),
        };

        if let Err(e) = self.channel.reply(update.chat, &reply) {
            log_listener_debug!("Reply failed", chat = update.chat.0, error = e.to_string());
        }
    }

    /// Run on a background thread until the returned handle is shut down.
    pub fn spawn(mut self) -> std::io::Result<ListenerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let join = thread::Builder::new()
            .name("tgfs-listener".to_string())
            .spawn(move || {
                log_listener_info!("Control listener started");
                while !flag.load(Ordering::Relaxed) {
                    if let Err(e) = self.poll_once() {
                        log_listener_error!("Poll failed", error = e.to_string());
                        sleep_unless_stopped(&flag, RETRY_BACKOFF);
                    }
                }
                log_listener_info!("Control listener stopped");
            })?;
        Ok(ListenerHandle {
            stop,
            join: Some(join),
        })
    }
}

fn sleep_unless_stopped(flag: &AtomicBool, total: Duration) {
    let mut waited = Duration::ZERO;
    while waited < total && !flag.load(Ordering::Relaxed) {
        thread::sleep(STOP_CHECK);
        waited += STOP_CHECK;
    }
}

/// Owner of a running listener thread. Dropping it stops and joins the thread.
pub struct ListenerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Signal the loop to stop and wait for it. An in-flight long poll is
    /// allowed to finish first.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log_listener_error!("Control listener panicked");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ChatBinding;
    use crate::{ChatId, MemoryTransport};

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse("/start"), Some(ControlCommand::Bind));
        assert_eq!(ControlCommand::parse("/bind now"), Some(ControlCommand::Bind));
        assert_eq!(
            ControlCommand::parse("/start@tgfs_bot"),
            Some(ControlCommand::Bind)
        );
        assert_eq!(ControlCommand::parse("/ID"), Some(ControlCommand::Identify));
        assert_eq!(ControlCommand::parse("/whoami"), Some(ControlCommand::Identify));
        assert_eq!(ControlCommand::parse("start"), None);
        assert_eq!(ControlCommand::parse("/help"), None);
        assert_eq!(ControlCommand::parse(""), None);
    }

    #[test]
    fn test_bind_publishes_and_replies() {
        let channel = Arc::new(MemoryTransport::new());
        let (reader, publisher) = ChatBinding::in_memory(None);
        let mut listener = ControlListener::new(channel.clone(), publisher, Duration::ZERO);

        channel.push_update(ChatId(-42), "/start");
        assert_eq!(listener.poll_once().unwrap(), 1);

        assert_eq!(reader.current(), Some(ChatId(-42)));
        assert_eq!(
            channel.replies(),
            vec![(ChatId(-42), BIND_OK_REPLY.to_string())]
        );
    }

    #[test]
    fn test_identify_does_not_bind() {
        let channel = Arc::new(MemoryTransport::new());
        let (reader, publisher) = ChatBinding::in_memory(None);
        let mut listener = ControlListener::new(channel.clone(), publisher, Duration::ZERO);

        channel.push_update(ChatId(8), "/id");
        channel.push_update(ChatId(8), "hello there");
        assert_eq!(listener.poll_once().unwrap(), 2);

        assert_eq!(reader.current(), None);
        assert_eq!(channel.replies(), vec![(ChatId(8), "Chat ID: 8".to_string())]);

        // Offset advanced past both updates.
        assert_eq!(listener.poll_once().unwrap(), 0);
    }
}

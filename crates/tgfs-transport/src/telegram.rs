//! Telegram Bot API transport.
//!
//! Blob handles are message ids in the bound chat. The Bot API cannot look a
//! message up by id, so `fetch_blob` forwards the message inside the same
//! chat to learn its document's `file_id`, deletes the forwarded copy, and
//! then downloads the file.

use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use tgfs_config::{log_transport_debug, log_transport_warn, TelegramConfig};

use crate::binding::ChatBinding;
use crate::{
    ChatId, ControlChannel, ControlUpdate, ObjectHandle, ObjectTransport, PinnedMessage, Result,
    TransportError,
};

/// Extra time granted to a long-poll request beyond its server-side timeout
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    document: Option<TgDocument>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(default)]
    pinned_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct TgDocument {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    channel_post: Option<TgMessage>,
}

/// Bot API client bound to one chat
pub struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
    binding: ChatBinding,
}

impl TelegramTransport {
    pub fn new(
        token: impl Into<String>,
        api_base: impl Into<String>,
        binding: ChatBinding,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            binding,
        })
    }

    pub fn from_config(config: &TelegramConfig, binding: ChatBinding) -> Result<Self> {
        Self::new(
            config.token.clone(),
            config.api_base.clone(),
            binding,
            config.request_timeout(),
        )
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    fn decode<T: DeserializeOwned>(method: &str, body: &[u8]) -> Result<T> {
        let response: ApiResponse<T> = serde_json::from_slice(body)?;
        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(TransportError::Api {
                method: method.to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no result".to_string()),
            }),
        }
    }

    fn call<T: DeserializeOwned>(&self, method: &str, payload: serde_json::Value) -> Result<T> {
        log_transport_debug!("Bot API call", method = method);
        // Error statuses still carry a JSON body with `ok: false`.
        let body = self
            .client
            .post(self.method_url(method))
            .json(&payload)
            .send()?
            .bytes()?;
        Self::decode(method, &body)
    }

    fn download(&self, file_path: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.file_url(file_path))
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }

    /// Resolve a message id to its document's `file_id`.
    fn resolve_document(&self, chat: ChatId, handle: ObjectHandle) -> Result<String> {
        let forwarded: TgMessage = self
            .call(
                "forwardMessage",
                json!({
                    "chat_id": chat.0,
                    "from_chat_id": chat.0,
                    "message_id": handle.0,
                    "disable_notification": true,
                }),
            )
            .map_err(|e| not_found_or(e, handle))?;

        if !self.delete_message(chat, ObjectHandle(forwarded.message_id)) {
            log_transport_warn!(
                "Failed to delete forwarded copy",
                handle = handle.0,
                copy = forwarded.message_id
            );
        }

        forwarded
            .document
            .map(|d| d.file_id)
            .ok_or(TransportError::NotFound { handle })
    }

    fn delete_message(&self, chat: ChatId, handle: ObjectHandle) -> bool {
        match self.call::<bool>(
            "deleteMessage",
            json!({ "chat_id": chat.0, "message_id": handle.0 }),
        ) {
            Ok(deleted) => deleted,
            Err(e) => {
                log_transport_debug!("deleteMessage failed", handle = handle.0, error = e.to_string());
                false
            }
        }
    }
}

/// Map Bot API "message does not exist" answers to `NotFound`.
fn not_found_or(err: TransportError, handle: ObjectHandle) -> TransportError {
    match &err {
        TransportError::Api { description, .. } if is_missing_message(description) => {
            TransportError::NotFound { handle }
        }
        _ => err,
    }
}

fn is_missing_message(description: &str) -> bool {
    let d = description.to_ascii_lowercase();
    d.contains("message to forward not found")
        || d.contains("message not found")
        || d.contains("message_id_invalid")
        || d.contains("message to copy not found")
}

impl ObjectTransport for TelegramTransport {
    fn current_chat(&self) -> Option<ChatId> {
        self.binding.current()
    }

    fn send_blob(&self, data: &[u8], name: &str) -> Result<ObjectHandle> {
        let chat = self.require_chat()?;
        let part = multipart::Part::bytes(data.to_vec())
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .text("chat_id", chat.0.to_string())
            .text("disable_notification", "true")
            .part("document", part);

        let body = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()?
            .bytes()?;
        let message: TgMessage = Self::decode("sendDocument", &body)?;
        log_transport_debug!(
            "Blob sent",
            handle = message.message_id,
            size = data.len()
        );
        Ok(ObjectHandle(message.message_id))
    }

    fn fetch_blob(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        let chat = self.require_chat()?;
        if handle.is_none() {
            return Err(TransportError::NotFound { handle });
        }
        let file_id = self.resolve_document(chat, handle)?;
        let file: TgFile = self.call("getFile", json!({ "file_id": file_id }))?;
        let file_path = file.file_path.ok_or_else(|| TransportError::Api {
            method: "getFile".to_string(),
            description: "file has no download path".to_string(),
        })?;
        self.download(&file_path)
    }

    fn delete_blob(&self, handle: ObjectHandle) -> bool {
        match self.current_chat() {
            Some(chat) if handle.is_some() => self.delete_message(chat, handle),
            _ => false,
        }
    }

    fn pin(&self, handle: ObjectHandle) -> Result<()> {
        let chat = self.require_chat()?;
        self.call::<bool>(
            "pinChatMessage",
            json!({
                "chat_id": chat.0,
                "message_id": handle.0,
                "disable_notification": true,
            }),
        )
        .map_err(|e| not_found_or(e, handle))?;
        Ok(())
    }

    fn unpin(&self, handle: ObjectHandle) -> Result<()> {
        let chat = self.require_chat()?;
        self.call::<bool>(
            "unpinChatMessage",
            json!({ "chat_id": chat.0, "message_id": handle.0 }),
        )
        .map_err(|e| not_found_or(e, handle))?;
        Ok(())
    }

    fn pinned_message(&self) -> Result<Option<PinnedMessage>> {
        let chat = self.require_chat()?;
        let info: TgChat = self.call("getChat", json!({ "chat_id": chat.0 }))?;
        Ok(info.pinned_message.map(|m| PinnedMessage {
            handle: ObjectHandle(m.message_id),
            text: m.text,
            has_document: m.document.is_some(),
        }))
    }
}

impl ControlChannel for TelegramTransport {
    fn poll_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<ControlUpdate>> {
        let mut payload = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }

        let body = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(timeout + POLL_GRACE)
            .json(&payload)
            .send()?
            .bytes()?;
        let updates: Vec<TgUpdate> = Self::decode("getUpdates", &body)?;

        // Updates without a message still have to be returned so the caller
        // can advance its offset past them.
        Ok(updates
            .into_iter()
            .map(|u| {
                let message = u.message.or(u.channel_post);
                ControlUpdate {
                    update_id: u.update_id,
                    chat: ChatId(message.as_ref().map(|m| m.chat.id).unwrap_or(0)),
                    text: message.and_then(|m| m.text),
                }
            })
            .collect())
    }

    fn reply(&self, chat: ChatId, text: &str) -> Result<()> {
        self.call::<TgMessage>("sendMessage", json!({ "chat_id": chat.0, "text": text }))?;
        Ok(())
    }
}

//! Outbound message delivery seam.

use crate::message::{split_message, MESSAGE_LIMIT};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
    #[error("Invalid chat id: {0}")]
    InvalidChat(String),
}

/// Delivers one HTML message to one chat.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn send_html(&self, chat_id: i64, html: &str) -> Result<(), DispatchError>;
}

/// Send `text` in ordered parts, stopping at the first failure.
pub async fn send_split(
    dispatcher: &dyn AlertDispatcher,
    chat_id: i64,
    text: &str,
) -> Result<usize, DispatchError> {
    let parts = split_message(text, MESSAGE_LIMIT);
    for part in &parts {
        dispatcher.send_html(chat_id, part).await?;
    }
    Ok(parts.len())
}

/// Numeric chat id; channels use the `-100…` form.
pub fn parse_chat_id(raw: &str) -> Result<i64, DispatchError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| DispatchError::InvalidChat(raw.to_string()))
}

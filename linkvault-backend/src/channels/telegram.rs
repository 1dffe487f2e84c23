use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButtonKind, Me, MessageEntityKind, MessageKind};
use teloxide::RequestError;
use tokio::sync::oneshot;

use crate::channels::dispatcher::MessageDispatcher;
use crate::channels::types::IncomingMessage;
use crate::parser::RichAnnotations;

const GET_ME_ATTEMPTS: u32 = 5;

/// Convert a teloxide message into the platform-independent form
pub fn to_incoming(msg: &Message) -> IncomingMessage {
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default().to_string();

    let entity_urls = msg
        .entities()
        .or_else(|| msg.caption_entities())
        .unwrap_or_default()
        .iter()
        .filter_map(|entity| match &entity.kind {
            MessageEntityKind::TextLink { url } => Some(url.to_string()),
            _ => None,
        })
        .collect();

    let button_urls = msg
        .reply_markup()
        .map(|markup| {
            markup
                .inline_keyboard
                .iter()
                .flatten()
                .filter_map(|button| match &button.kind {
                    InlineKeyboardButtonKind::Url(url) => Some(url.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    IncomingMessage {
        text,
        channel: msg.chat.username().map(str::to_string),
        date: Some(msg.date),
        is_reply: msg.reply_to_message().is_some(),
        is_service: !matches!(msg.kind, MessageKind::Common(_)),
        annotations: RichAnnotations {
            entity_urls,
            button_urls,
        },
    }
}

/// `get_me` with cooperative waits when Telegram asks us to slow down
async fn get_me_with_backoff(bot: &Bot) -> Result<Me, String> {
    let mut attempt = 0;
    loop {
        match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(RequestError::RetryAfter(wait)) if attempt + 1 < GET_ME_ATTEMPTS => {
                log::warn!("[telegram] Rate limited on get_me, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
            Err(RequestError::Network(e)) if attempt + 1 < GET_ME_ATTEMPTS => {
                let wait = Duration::from_secs(2u64.pow(attempt + 1));
                log::warn!("[telegram] Network error on get_me ({}), retrying in {:?}", e, wait);
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(format!("get_me failed: {}", e)),
        }
        attempt += 1;
    }
}

/// Run the channel-post listener until shutdown or a fatal error
pub async fn start_telegram_listener(
    bot_token: String,
    dispatcher: Arc<MessageDispatcher>,
    shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), String> {
    let bot = Bot::new(bot_token);
    let me = get_me_with_backoff(&bot).await?;
    log::info!("[telegram] Listening as @{}", me.username());

    let handler = Update::filter_channel_post().endpoint(
        |msg: Message, dispatcher: Arc<MessageDispatcher>| async move {
            let incoming = to_incoming(&msg);
            let outcome = dispatcher.dispatch(incoming).await;
            log::debug!("[telegram] Post {} -> {:?}", msg.id.0, outcome);
            respond(())
        },
    );

    let mut tg_dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .default_handler(|_| async {})
        .build();

    let shutdown_token = tg_dispatcher.shutdown_token();
    tokio::spawn(async move {
        if shutdown_rx.await.is_ok() {
            log::info!("[telegram] Shutdown requested");
            match shutdown_token.shutdown() {
                Ok(done) => done.await,
                Err(e) => log::warn!("[telegram] Dispatcher was not running: {:?}", e),
            }
        }
    });

    tg_dispatcher.dispatch().await;
    log::info!("[telegram] Listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_post(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_channel_post_collects_entity_and_button_urls() {
        let msg = channel_post(
            r#"{
                "message_id": 42,
                "date": 1714521600,
                "chat": {"id": -1001234567890, "title": "Share Hub", "username": "share_hub", "type": "channel"},
                "sender_chat": {"id": -1001234567890, "title": "Share Hub", "username": "share_hub", "type": "channel"},
                "text": "电影F 点这里",
                "entities": [
                    {"type": "bold", "offset": 0, "length": 3},
                    {"type": "text_link", "offset": 4, "length": 3, "url": "https://pan.quark.cn/s/f6"}
                ],
                "reply_markup": {"inline_keyboard": [[
                    {"text": "百度", "url": "https://pan.baidu.com/s/1f6"},
                    {"text": "回调", "callback_data": "noop"}
                ]]}
            }"#,
        );
        let incoming = to_incoming(&msg);
        assert_eq!(incoming.text, "电影F 点这里");
        assert_eq!(incoming.channel.as_deref(), Some("share_hub"));
        assert_eq!(incoming.annotations.entity_urls, vec!["https://pan.quark.cn/s/f6"]);
        assert_eq!(incoming.annotations.button_urls, vec!["https://pan.baidu.com/s/1f6"]);
        assert!(!incoming.is_reply);
        assert!(!incoming.is_service);
        assert_eq!(incoming.date.map(|d| d.timestamp()), Some(1714521600));
    }

    #[test]
    fn test_plain_post_has_no_annotations() {
        let msg = channel_post(
            r#"{
                "message_id": 43,
                "date": 1714521600,
                "chat": {"id": -1001234567890, "title": "Share Hub", "username": "share_hub", "type": "channel"},
                "text": "电影G https://pan.quark.cn/s/g7"
            }"#,
        );
        let incoming = to_incoming(&msg);
        assert!(incoming.annotations.entity_urls.is_empty());
        assert!(incoming.annotations.button_urls.is_empty());
    }
}

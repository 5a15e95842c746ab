//! Telegram adapter (teloxide).
//!
//! Translates commands and button presses into `ntb-core` actions and sends the
//! rendered replies back.

use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
};

use ntb_core::reply::{InlineKeyboard, Reply};

pub mod handlers;
pub mod router;

fn markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback_data.clone()))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Send a rendered reply as an HTML message.
pub async fn send_reply(bot: &Bot, chat_id: ChatId, reply: &Reply) -> ResponseResult<Message> {
    let req = bot
        .send_message(chat_id, reply.html.clone())
        .parse_mode(ParseMode::Html);

    match reply.keyboard.as_ref().filter(|k| !k.is_empty()) {
        Some(kb) => req.reply_markup(markup(kb)).await,
        None => req.await,
    }
}

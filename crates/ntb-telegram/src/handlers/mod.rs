//! Telegram update handlers.
//!
//! Handlers only translate updates into [`Action`]s. Authorization, pacing, caching and
//! error wording are all decided by the core gateway.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, ChatId, Message},
};

use ntb_core::{
    domain::UserId,
    gateway::{render_outcome, Action},
};

use crate::{router::AppState, send_reply};

mod callback;
mod commands;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);

    let action = match msg.text() {
        Some(text) if text.starts_with('/') => commands::parse_action(text),
        Some(_) => Some(Action::Help),
        None => None,
    };
    let Some(action) = action else {
        return Ok(());
    };

    dispatch(&bot, msg.chat.id, user_id, action, &state).await;
    Ok(())
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user_id = UserId(q.from.id.0 as i64);
    let chat_id = q.message.as_ref().map(|m| m.chat.id);
    let data = q.data.clone().unwrap_or_default();

    // Always answer the callback so the button stops spinning.
    let _ = bot.answer_callback_query(cb_id).await;

    let Some(chat_id) = chat_id else {
        return Ok(());
    };
    let Some(action) = callback::parse_action(&data) else {
        tracing::debug!(user_id = user_id.0, data = %data, "ignoring unknown callback");
        return Ok(());
    };

    dispatch(&bot, chat_id, user_id, action, &state).await;
    Ok(())
}

async fn dispatch(bot: &Bot, chat_id: ChatId, user_id: UserId, action: Action, state: &AppState) {
    let outcome = state.gateway.handle_action(user_id, action).await;
    let reply = render_outcome(outcome);

    if let Err(e) = send_reply(bot, chat_id, &reply).await {
        tracing::warn!(user_id = user_id.0, error = %e, "failed to send reply");
    }
}

use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use ntb_core::{config::Config, gateway::Gateway};

use crate::handlers;

/// Shared by every handler invocation.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

pub async fn run_polling(cfg: Arc<Config>, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }
    tracing::info!(
        allowed_users = gateway.gate().len(),
        admin = cfg.admin_id.0,
        "access control ready"
    );

    let state = Arc::new(AppState::new(gateway));

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}

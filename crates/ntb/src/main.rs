use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ntb_core::{
    access::{AccessGate, FileAllowListStore},
    clock::SystemClock,
    config::Config,
    gateway::Gateway,
    reclaimer::SessionReclaimer,
    session::SessionPool,
};
use ntb_notion::{NotionClientFactory, NotionConfig};

#[tokio::main]
async fn main() -> Result<(), ntb_core::Error> {
    ntb_core::logging::init("ntb")?;

    let cfg = Arc::new(Config::load()?);

    let gate = Arc::new(AccessGate::load(
        cfg.admin_id,
        Box::new(FileAllowListStore::new(&cfg.allowlist_file)),
    )?);

    let factory = Arc::new(NotionClientFactory::new(NotionConfig::from_config(&cfg)));
    let pool = Arc::new(SessionPool::new(
        factory,
        Arc::new(SystemClock),
        cfg.session_settings(),
    ));

    let reclaimer = Arc::new(SessionReclaimer::new(pool.clone(), cfg.reclaim_config()));
    let cancel = CancellationToken::new();
    let reclaim_task = reclaimer.spawn(cancel.clone());

    let gateway = Arc::new(Gateway::new(gate, pool, cfg.query_page_limit));
    let result = ntb_telegram::router::run_polling(cfg, gateway).await;

    cancel.cancel();
    if let Err(e) = reclaim_task.await {
        tracing::warn!(error = %e, "session reclaimer task failed");
    }

    result.map_err(|e| ntb_core::Error::External(format!("telegram bot failed: {e}")))
}

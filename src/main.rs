use anyhow::Result;
use dotenv;
use env_logger;
use log::info;
use rusqlite::Connection;
use std::env;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use funnelbot::bot;
use funnelbot::config::BotConfig;
use funnelbot::dispatch::{self, DispatchContext};
use funnelbot::funnel;
use funnelbot::scheduler::SchedulerService;
use funnelbot::{store, users};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    info!("Starting Funnel Telegram Bot");

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Get bot token from environment
    let bot_token = env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN must be set");

    // Get database path from environment
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    info!("Initializing database at: {}", database_url);

    // Create database connection and schemas
    let conn = Connection::open(&database_url)?;
    store::init_scheduler_schema(&conn)?;
    users::init_user_schema(&conn)?;

    // Wrap connection in Arc<Mutex> for sharing across async tasks
    let shared_conn = Arc::new(Mutex::new(conn));

    let config = BotConfig::from_env();
    if config.test_mode {
        info!("Test mode is ON: every user gets the accelerated cadence");
    }

    // Everything is built here and injected; no ambient globals
    let scheduler = Arc::new(SchedulerService::new(
        Arc::clone(&shared_conn),
        config.clone(),
    ));
    let registry = Arc::new(funnel::build_registry());

    // Initialize the bot
    let bot = Bot::new(bot_token);

    // Background dispatch loop: polls the store for due actions and runs
    // the registered funnel handlers
    let ctx = Arc::new(DispatchContext {
        bot: bot.clone(),
        conn: Arc::clone(&shared_conn),
        scheduler: Arc::clone(&scheduler),
    });
    tokio::spawn(dispatch::run_dispatch_loop(
        ctx,
        registry,
        config.poll_interval_secs,
        config.dispatch_batch_size,
    ));

    info!("Bot initialized, starting dispatcher");

    // Set up the dispatcher with shared connection and scheduler
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint({
            let conn = Arc::clone(&shared_conn);
            let scheduler = Arc::clone(&scheduler);
            move |bot: Bot, msg: Message| {
                let conn = Arc::clone(&conn);
                let scheduler = Arc::clone(&scheduler);
                async move { bot::message_handler(bot, msg, conn, scheduler).await }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let conn = Arc::clone(&shared_conn);
            let scheduler = Arc::clone(&scheduler);
            move |bot: Bot, q: CallbackQuery| {
                let conn = Arc::clone(&conn);
                let scheduler = Arc::clone(&scheduler);
                async move { bot::callback_handler(bot, q, conn, scheduler).await }
            }
        }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

// src/main.rs
use std::process;
use std::sync::Arc;

use clap::Parser;

use minnow::cgi::DefaultCgi;
use minnow::config::Config;
use minnow::db::{DbConn, ResourcePool};
use minnow::error::MinnowResult;
use minnow::log::Logger;
use minnow::pool::ThreadPool;
use minnow::server::Server;

const LOG_PATH: &str = "./ServerLog/server.log";
const LOG_SPLIT_LINES: u64 = 800_000;
const LOG_QUEUE_SIZE: usize = 800;
const MAX_REQUESTS: usize = 10_000;

fn main() {
    if let Err(e) = run() {
        eprintln!("minnow: {}", e);
        process::exit(1);
    }
}

fn run() -> MinnowResult<()> {
    let config = Config::parse();

    let logger = if config.logging_enabled() {
        let queue_size = if config.async_log() { LOG_QUEUE_SIZE } else { 0 };
        Arc::new(Logger::new(LOG_PATH, LOG_SPLIT_LINES, queue_size)?)
    } else {
        Arc::new(Logger::disabled())
    };

    let db_pool = Arc::new(ResourcePool::new(
        (0..config.sql_num).map(DbConn::new).collect(),
    )?);

    let cgi = Arc::new(DefaultCgi::new(config.root.clone(), logger.clone()));
    let pool = ThreadPool::new(
        config.model(),
        db_pool,
        config.thread_num,
        MAX_REQUESTS,
        logger.clone(),
    )?;

    let (lfd_mode, cfd_mode) = config.trigger_modes();
    let mut server = Server::new(
        config.port,
        config.opt_linger == 1,
        lfd_mode,
        cfd_mode,
        config.model(),
        config.root.clone(),
        pool,
        cgi,
        logger,
    )?;
    server.run();
    Ok(())
}

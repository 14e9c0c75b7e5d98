// src/config.rs
use std::path::PathBuf;

use clap::Parser;

use crate::pool::ActorModel;
use crate::syscalls::TriggerMode;

/// Command-line configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "minnow", about = "Single-process event-driven HTTP/1.1 server", version)]
pub struct Config {
    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 9007)]
    pub port: u16,

    /// Log write mode: 0 synchronous, 1 asynchronous
    #[arg(short = 'l', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub log_write: u8,

    /// Trigger combination for listen and connection sockets:
    /// 0 LT+LT, 1 LT+ET, 2 ET+LT, 3 ET+ET
    #[arg(short = 'm', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub trigger_mode: u8,

    /// Graceful close on the listening socket: 0 off, 1 SO_LINGER on
    #[arg(short = 'o', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub opt_linger: u8,

    /// Database connection pool size
    #[arg(short = 's', long, default_value_t = 8)]
    pub sql_num: usize,

    /// Worker thread count
    #[arg(short = 't', long, default_value_t = num_cpus::get())]
    pub thread_num: usize,

    /// Disable logging entirely: 0 enabled, 1 disabled
    #[arg(short = 'c', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub close_log: u8,

    /// Concurrency model: 0 proactor, 1 reactor
    #[arg(short = 'a', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub actor_model: u8,

    /// Document root directory
    #[arg(long, default_value = "./root")]
    pub root: PathBuf,
}

impl Config {
    /// (listen socket mode, connection socket mode)
    pub fn trigger_modes(&self) -> (TriggerMode, TriggerMode) {
        match self.trigger_mode {
            0 => (TriggerMode::Level, TriggerMode::Level),
            1 => (TriggerMode::Level, TriggerMode::Edge),
            2 => (TriggerMode::Edge, TriggerMode::Level),
            _ => (TriggerMode::Edge, TriggerMode::Edge),
        }
    }

    pub fn model(&self) -> ActorModel {
        if self.actor_model == 1 {
            ActorModel::Reactor
        } else {
            ActorModel::Proactor
        }
    }

    pub fn logging_enabled(&self) -> bool {
        self.close_log == 0
    }

    pub fn async_log(&self) -> bool {
        self.log_write == 1
    }
}

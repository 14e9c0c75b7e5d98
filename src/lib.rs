// src/lib.rs
pub mod cgi;
pub mod config;
pub mod conn;
pub mod db;
pub mod error;
pub mod log;
pub mod pool;
pub mod queue;
pub mod server;
pub mod sync;
pub mod syscalls;
pub mod timer;

pub use cgi::{CgiHandler, DefaultCgi};
pub use config::Config;
pub use conn::HttpConn;
pub use db::{DbConn, ResourcePool};
pub use error::{MinnowError, MinnowResult};
pub use log::Logger;
pub use pool::{ActorModel, ThreadPool};
pub use server::Server;

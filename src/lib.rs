pub mod api;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod format;
pub mod models;
pub mod parser;
pub mod projector;
pub mod rpc;
pub mod scanner;
pub mod subscriber;

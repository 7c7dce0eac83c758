pub mod app;
pub mod atomic;
pub mod collect;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod export;
pub mod infer;
pub mod master;
pub mod normalize;
pub mod output;
pub mod quality;
pub mod store;
pub mod upsert;
pub mod watch;

pub mod graph;
pub mod execution;
pub mod events;
pub mod join;
pub mod instance;
pub mod agenda;
pub mod engine;
pub mod storage;
pub mod redis_storage;

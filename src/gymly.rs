pub(crate) mod api;
pub(crate) mod auth;
pub(crate) mod cli;
pub(crate) mod config;
pub(crate) mod database;
pub(crate) mod error;
pub(crate) mod jwt;
pub(crate) mod notify;
pub(crate) mod push;
pub(crate) mod state;
pub(crate) mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub(crate) type GymlyBoxError = Box<dyn std::error::Error + Send + Sync>;
pub(crate) type BoxResult<T> = Result<T, GymlyBoxError>;

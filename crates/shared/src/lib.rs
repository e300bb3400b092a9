pub mod config;
pub mod engine;
pub mod intent;
pub mod keys;
pub mod kv;
pub mod notify;
pub mod provider;
pub mod reminders;
pub mod session;
pub mod timezone;

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod notify;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod priority;
pub mod queue;
pub mod routes;
pub mod schedule;
pub mod settings;
pub mod slots;
pub mod state;
pub mod store;
pub mod worker;

pub mod auth;
pub mod channels;
pub mod health;
pub mod messages;
pub mod rules;

pub mod admin;
pub mod affiliates;
pub mod root;
pub mod webhooks;

pub mod api;
pub mod bot;
pub mod fetch;
pub mod types;

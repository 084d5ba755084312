pub mod archive;
pub mod config;
pub mod descriptor;
pub mod history;
pub mod listing;
pub mod naming;
pub mod paths;
pub mod reconcile;
pub mod store;
pub mod warn;

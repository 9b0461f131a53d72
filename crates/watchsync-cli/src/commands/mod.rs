pub mod cache;
pub mod login;
pub mod setup;
pub mod status;
pub mod sync;

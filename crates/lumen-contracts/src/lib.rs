pub mod errors;
pub mod events;
pub mod jobs;
pub mod media;
pub mod models;
pub mod search;
pub mod settings;

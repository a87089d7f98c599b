pub mod audio_models;
pub mod channel;
pub mod config;
pub mod error;
pub mod recording_result;
pub mod results;
pub mod state;

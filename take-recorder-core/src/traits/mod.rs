pub mod audio_source;
pub mod status_subscriber;
pub mod track_store;

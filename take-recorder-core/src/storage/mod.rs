pub mod metadata;
pub mod retention;
pub mod wav_writer;

pub mod sample;
pub mod wav_format;
pub mod wav_reader;

pub mod machine;
pub mod recording_session;
pub mod take_recorder;

pub mod remote_control;

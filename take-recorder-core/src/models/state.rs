/// Externally visible phase of a recording session.
///
/// Transitions:
/// ```text
/// idle ⇄ configured ⇄ listening ⇄ recording
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Configured,
    Listening,
    Recording,
}

//! Events streamed out of [`crate::Supervisor::handle`].

/// One unit of output from a turn. Sent over an `mpsc` channel rather than
/// returned as an `impl Stream`, matching how the rest of this workspace
/// streams generated text out of a background task.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A chunk of assistant text (streamed token-by-token where the
    /// underlying LLM call supports it, or emitted whole otherwise).
    Text(String),
    /// The supervisor needs the user to answer before it can continue;
    /// `step_id` identifies which pending step the answer resolves.
    NeedInput { prompt: String, step_id: String },
}

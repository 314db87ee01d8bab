//! Typed events emitted by the streaming agent variant.

/// One event in a streamed agent turn.
///
/// Consumers receive these over an mpsc channel; dropping the receiver
/// signals cancellation of interest (the turn itself still completes).
#[derive(Clone, Debug)]
pub enum AgentEvent {
    /// Incremental assistant text. Only emitted until the first
    /// tool-call-bearing response arrives.
    TextDelta { delta: String },
    /// A tool call is about to execute.
    ToolStart { call_id: String, name: String },
    /// A tool call finished; `ok` is false when the result is an error text.
    ToolEnd { call_id: String, name: String, ok: bool },
    /// Out-of-band progress (e.g. a compaction fired).
    Status { message: String },
    /// Terminal event carrying the full final content and turn stats.
    Completed {
        content: String,
        iterations: usize,
        compactions: usize,
    },
}

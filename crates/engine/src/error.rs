use thiserror::Error;

/// Failure taxonomy for one orchestration invocation.
///
/// Everything here is fatal to the invocation except what never reaches it:
/// a tool's own execution failure is caught at the loop boundary and folded
/// into the trace as an error observation so the model can attempt recovery,
/// and a missing custom-agent URL yields an instructional reply instead of
/// an error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Model output matched neither the finish marker nor an action pair.
    #[error("could not parse model output: {0:?}")]
    Parse(String),

    /// A parsed action named a tool that is not in the registry.
    #[error("model requested unknown tool {0:?}")]
    ToolNotFound(String),

    /// The loop hit its iteration cap without a final answer.
    #[error("agent loop gave up after {0} iterations without a final answer")]
    MaxIterations(usize),

    /// The completion provider (or external agent service) call failed.
    #[error("provider call failed: {0}")]
    Provider(#[source] anyhow::Error),

    /// The caller abandoned the invocation; observed at a checkpoint.
    #[error("invocation cancelled")]
    Cancelled,

    /// The invocation cannot run with the current configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

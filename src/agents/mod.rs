//! The agent committee.
//!
//! Three kinds of agent take part in an analysis run:
//!
//! - **Generation units** fill the run's prompt template with a query and ask
//!   the model for one candidate answer. A unit never fails; errors become part
//!   of its result.
//! - **Batch runner** launches N units concurrently, waits for all of them and
//!   keeps the successes, ordered by unit index. A batch fails only when no unit
//!   succeeded.
//! - **Synthesizer** and **final responder** each make a single model call:
//!   one distils a batch into a synthesis, the other turns the last synthesis
//!   into the answer.
//!
//! Every component takes a [`RunContext`](crate::pipeline::RunContext), which
//! carries the provider, the checkpoint sink, the event channel and the cancel
//! signal for the run.

pub mod batch;
pub mod error;
pub mod final_responder;
pub mod synthesizer;
pub mod unit;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{
    BatchConfig, BatchOutcome, BatchRunner, DEFAULT_AGENT_TEMPERATURE, DEFAULT_NUM_AGENTS,
};
pub use error::{AgentError, AgentResult};
pub use final_responder::{FinalResponder, DEFAULT_FINAL_TEMPERATURE};
pub use synthesizer::{Synthesizer, DEFAULT_EVALUATOR_TEMPERATURE};
pub use unit::{GenerationResult, GenerationUnit, UnitFailure};

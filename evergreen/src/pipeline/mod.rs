//! Orchestration: the fixed phase plan, the per-stage runner, the phase
//! scheduler and the pipeline driver.
//!
//! Execution phases run strictly in order. Inside a phase, every member
//! stage is spawned at once and reads only results committed by earlier
//! phases. The first hard failure aborts the run; soft validation issues
//! from generative stages are carried on the results instead.

mod driver;
mod fanout;
mod generation;
mod runner;
mod scheduler;
mod topology;


pub use driver::{Pipeline, PipelineBuilder};
pub use fanout::{fan_out, BranchFailure, Joined, Metered};
pub use generation::{fingerprint, retry_prompt, Generated, GenerationLoop, GenerationPolicy};
pub use runner::StageRunner;
pub use scheduler::{PhaseReport, PhaseScheduler, PhaseState, RunReport};
pub use topology::{PhasePlan, STANDARD_PLAN};

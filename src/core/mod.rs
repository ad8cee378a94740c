/// Core module contains the grading logic. It talks to the outside world
/// only through the traits in [`traits`].
pub mod compiler;
pub mod domain;
pub mod errors;
pub mod intake;
pub mod orchestrator;
pub mod pipeline;
pub mod response;
pub mod tool_output;
pub mod traits;

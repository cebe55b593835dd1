pub mod driver;
pub mod errors;
pub mod extraction;
pub mod intake;
pub mod messaging;
pub mod orchestrator;
pub mod poller;
pub mod portal;

pub mod bus;
pub mod capture;
pub mod correlator;
pub mod detector;
pub mod dispatcher;
pub mod encryption;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod trigger;
pub mod worker;

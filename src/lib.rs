pub mod adjuster;
pub mod args;
pub mod breakdown;
pub mod engine;
pub mod errors;
pub mod reader;
pub mod stats;
pub mod store;
pub mod validator;

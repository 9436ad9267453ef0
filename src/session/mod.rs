pub mod parser;
pub mod runner;
pub mod state;

pub mod connection;
pub mod operations;
pub mod writer;

pub use writer::run_writer;

pub mod convert;
pub mod decoder;
pub mod scanner;

pub use scanner::listen_for_ruuvitags;

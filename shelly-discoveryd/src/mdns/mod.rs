pub mod classify;
pub mod scanner;

//! different utility modules used throughout the project
/// terminal logger initialization from a loglevel string
pub mod logger;
/// wall clock bookkeeping and statistics tables
pub mod timer;

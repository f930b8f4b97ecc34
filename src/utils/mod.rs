pub mod error;
pub mod logfile;
pub mod logger;
pub mod monitor;
pub mod validation;

pub mod printer;

pub use printer::{JsonGui, PrintGui, SilentGui};

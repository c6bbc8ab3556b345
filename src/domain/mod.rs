pub mod forecast;
pub mod schedule;
pub mod types;

pub use forecast::*;
pub use schedule::*;
pub use types::*;

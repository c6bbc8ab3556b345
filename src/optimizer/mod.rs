pub mod constraints;
pub mod cost;
pub mod economic;
pub mod qp;
pub mod sqp;

pub use constraints::*;
pub use cost::*;
pub use economic::*;
pub use sqp::*;

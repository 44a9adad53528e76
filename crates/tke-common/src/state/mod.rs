//! Desired and observed state documents

mod desired;
mod observed;
mod validation;

pub use desired::*;
pub use observed::*;
pub use validation::Ipv4Cidr;

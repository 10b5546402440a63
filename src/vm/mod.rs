//! Virtual memory: user address spaces over the simulated MMU, demand
//! loading from executable images, and the physical-frame manager with
//! its eviction policies.

pub mod addr_space;
pub mod core_map;
pub mod executable;

pub use addr_space::{AddressSpace, LoadPolicy};
pub use core_map::{CoreMap, ReplacementPolicy};
pub use executable::Executable;

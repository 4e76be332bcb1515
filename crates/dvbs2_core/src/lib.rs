//! Physical layer definitions shared by every stage of the DVB-S2 receiver.

pub mod pl_parameters;
pub mod pls_info;

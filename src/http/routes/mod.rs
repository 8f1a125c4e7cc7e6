//! Route groups mapping §6's external interfaces onto the Pipeline Engine,
//! Task Registry, and Session Store — one module per resource family,
//! mirroring the teacher's `factory::api` handler grouping.

pub mod research;
pub mod sessions;

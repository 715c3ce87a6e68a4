use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod common;
pub mod encoder;
pub mod feature_hash;
pub mod io;
pub mod spec;
pub mod stats;
pub mod transform;

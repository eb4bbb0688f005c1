/// Hashing primitives for the local chain.
pub mod hash;

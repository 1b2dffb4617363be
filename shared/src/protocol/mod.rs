//! Text formats exchanged with the guest stack sampler
//!
//! The sampler's kernel module exposes one circular buffer per CPU. Each
//! buffer holds a line-oriented dump of captured samples, parsed by [`dump`].

pub mod dump;

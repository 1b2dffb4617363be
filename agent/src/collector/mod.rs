//! Collection of the inputs a session needs before sampling starts

pub mod symbols;

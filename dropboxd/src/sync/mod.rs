pub mod mirror;
pub mod paths;
pub mod traverse;

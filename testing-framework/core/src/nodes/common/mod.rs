pub mod binary;
pub mod lifecycle;
pub mod node;

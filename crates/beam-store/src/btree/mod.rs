pub mod lookup;
pub mod mutate;
pub mod node;

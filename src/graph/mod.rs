pub mod graph;
pub mod pwl;

pub use graph::{GraphNode, NetworkGraph};
pub use pwl::{extract_breakpoints, Breakpoint, PiecewiseLinear};

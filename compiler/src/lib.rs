// dfgopt — Dataflow-graph middle-end for a spatial-computing compiler
//
// Library root. The graph model and the propagation engine come first; the
// rewrite passes, the pipeline and the JSON/DOT surfaces build on them.

pub mod certify;
pub mod config;
pub mod diag;
pub mod dot;
pub mod error;
pub mod graph;
pub mod id;
pub mod load;
pub mod operator;
pub mod pass;
pub mod passes;
pub mod pipeline;
pub mod propagate;
pub mod registry;
pub mod types;

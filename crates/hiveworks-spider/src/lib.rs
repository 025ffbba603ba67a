//! Native Spider registry: the build-time substitute for the source's
//! dynamic module loader (see module docs on [`registry::SpiderRegistry`]).

pub mod registry;

pub use registry::{SpiderFactory, SpiderRegistry};

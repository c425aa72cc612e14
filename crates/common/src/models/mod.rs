mod edge;

pub use edge::EdgeInfo;

//! Chart rendering for the gold collections.

mod charts;

pub use charts::{render_svg, ChartKind, ChartSpec};

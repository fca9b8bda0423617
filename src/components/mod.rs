// ============================================================================
// COMPONENTS - interactive editing state owned by a mask session
// ============================================================================
//
//   history.rs - bounded undo/redo over whole mask snapshots
//   tools.rs   - tool modes, brush properties, brush / lasso / box input
// ============================================================================

pub mod history;
pub mod tools;

pub use history::HistoryStack;
pub use tools::{LassoFiller, LassoOp, PaintEngine, RectSelection, StrokeSession, ToolMode, ToolProperties};

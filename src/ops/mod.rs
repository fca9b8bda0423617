// ============================================================================
// OPS - operations on a whole mask
// ============================================================================
//
//   segment.rs - segmentation backends and box-prompt merging
//   export.rs  - binary mask export at original resolution
// ============================================================================

pub mod export;
pub mod segment;

//! Ordered-cursor composition: union, intersection, and difference
//! over two `Cursor`s with lock-result combination (§4.9, C9).

mod cursor;
mod merge;

pub use cursor::{Cursor, VecCursor};
pub use merge::{MergeCursor, MergeMode};

//! C5 — ingestion sources. Each source turns external input into `LogEvent`s
//! and hands them to a shared write-behind buffer; none of them touch the
//! index directly (§4.5).

pub mod cloud_pull;
pub mod file_tail;
pub mod http_push;
pub mod syslog;

use std::sync::Arc;

use crate::buffer::WriteBehindBuffer;

/// What every source pushes into. A type alias rather than a trait: sources
/// only ever need the buffer's `enqueue`, matching the teacher's preference
/// for concrete shared state (`AppState`) over source-side abstraction.
pub type Sink = Arc<WriteBehindBuffer>;

//! Data file storage: naming, the dual-destination writer and its workers.
pub mod destination;
pub mod dual_writer;
pub mod naming;
pub mod record;
pub mod retention;
pub mod supervisor;
pub mod sync;

pub use dual_writer::DualWriter;
pub use record::LogRecord;

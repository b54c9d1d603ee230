//! Input side: records and the streams that produce them

mod record;
mod sqlite;
mod stream;

pub use record::Record;
pub use sqlite::{SqliteStream, SqliteStreamBuilder};
pub use stream::{ChainStream, RecordIter, ResourceStream, SourceError, VecStream};

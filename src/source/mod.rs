mod driver;

pub use driver::{IntoSource, Source, Yielder};
pub(crate) use driver::{SourceDriver, SourceSpec};

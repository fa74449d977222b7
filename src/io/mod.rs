//! File access: object store resolution, Parquet footer reading, and retrying opens.

mod opener;
mod store;
mod tree_file;

pub use opener::{FileOpener, ObjectStoreOpener, RetryPolicy, RetryingOpener};
pub use store::{create_s3_store, parse_location, parse_s3_uri, FileLocation, StoreRegistry};
pub use tree_file::{FooterRead, ParquetTreeFile, TreeFile, TreeInfo, FOOTER_TAIL_LEN, TREE_NAME_KEY};

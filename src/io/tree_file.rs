//! Opened data files and the trees they contain.
//!
//! A tree is a named table of entries. Parquet files carry a single tree,
//! named by the `tree_name` key-value metadata entry when the writer set one
//! and by the root schema name otherwise. Only the footer is ever read.

use anyhow::{Context, Result};
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};

/// Key-value metadata entry naming the tree stored in a Parquet file.
pub const TREE_NAME_KEY: &str = "tree_name";

/// Footer tail: 4-byte little-endian metadata length followed by the magic.
pub const FOOTER_TAIL_LEN: usize = 8;

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";
const PARQUET_MAGIC_ENCRYPTED: &[u8; 4] = b"PARE";

/// A named tree and its entry count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeInfo {
    pub name: String,
    pub num_entries: u64,
}

/// An opened data file.
pub trait TreeFile: Send + Sync + std::fmt::Debug {
    /// Path or URI the file was opened from.
    fn path(&self) -> &str;

    /// Names of all trees in the file.
    fn tree_names(&self) -> Vec<String>;

    /// Look up a tree by name.
    fn tree(&self, name: &str) -> Option<TreeInfo>;

    fn has_tree(&self, name: &str) -> bool {
        self.tree(name).is_some()
    }
}

/// Parquet file described by its footer metadata.
#[derive(Debug)]
pub struct ParquetTreeFile {
    path: String,
    tree: TreeInfo,
    num_row_groups: usize,
}

impl ParquetTreeFile {
    /// Build from decoded footer metadata.
    pub fn from_metadata(path: impl Into<String>, metadata: &ParquetMetaData) -> Result<Self> {
        let file_meta = metadata.file_metadata();

        let tagged = file_meta.key_value_metadata().and_then(|kvs| {
            kvs.iter()
                .find(|kv| kv.key == TREE_NAME_KEY)
                .and_then(|kv| kv.value.clone())
        });
        let name = tagged.unwrap_or_else(|| file_meta.schema_descr().root_schema().name().to_string());

        let num_entries = u64::try_from(file_meta.num_rows())
            .with_context(|| format!("Negative row count {}", file_meta.num_rows()))?;

        Ok(Self {
            path: path.into(),
            tree: TreeInfo { name, num_entries },
            num_row_groups: metadata.num_row_groups(),
        })
    }

    /// Decode from a buffer holding (at least) the end of the file.
    ///
    /// Returns [`FooterRead::NeedSuffix`] with the required suffix length when
    /// `tail` is too short to contain the whole footer.
    pub fn from_tail(path: &str, tail: &[u8]) -> Result<FooterRead> {
        let metadata_len = footer_metadata_len(tail)?;
        let needed = metadata_len + FOOTER_TAIL_LEN;
        if tail.len() < needed {
            return Ok(FooterRead::NeedSuffix(needed));
        }

        let start = tail.len() - needed;
        let end = tail.len() - FOOTER_TAIL_LEN;
        let metadata = ParquetMetaDataReader::decode_metadata(&tail[start..end])
            .with_context(|| format!("Failed to decode Parquet footer of {}", path))?;

        Ok(FooterRead::Complete(Self::from_metadata(path, &metadata)?))
    }

    pub fn num_row_groups(&self) -> usize {
        self.num_row_groups
    }
}

/// Outcome of decoding a footer from a file suffix.
#[derive(Debug)]
pub enum FooterRead {
    Complete(ParquetTreeFile),
    /// The suffix must be at least this many bytes.
    NeedSuffix(usize),
}

/// Metadata length from the last eight bytes of a Parquet file.
fn footer_metadata_len(tail: &[u8]) -> Result<usize> {
    if tail.len() < FOOTER_TAIL_LEN {
        anyhow::bail!("File too short for a Parquet footer ({} bytes)", tail.len());
    }
    let footer = &tail[tail.len() - FOOTER_TAIL_LEN..];
    let magic = &footer[4..];
    if magic == PARQUET_MAGIC_ENCRYPTED {
        anyhow::bail!("Encrypted Parquet footers are not supported");
    }
    if magic != PARQUET_MAGIC {
        anyhow::bail!("Missing Parquet magic in footer");
    }
    let len = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    Ok(len as usize)
}

impl TreeFile for ParquetTreeFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn tree_names(&self) -> Vec<String> {
        vec![self.tree.name.clone()]
    }

    fn tree(&self, name: &str) -> Option<TreeInfo> {
        (self.tree.name == name).then(|| self.tree.clone())
    }
}

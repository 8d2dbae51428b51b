//! Tempfile-backed staging artifacts for extracted row data.
//!
//! Extraction streams rows into a local file which is then bulk-applied to
//! the target. The file lives in the system temp directory and is removed
//! when the [`StagingFile`] is dropped, so a failed load cannot leak disk.

use std::path::Path;

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::DbsyncResult;

/// Number of lines per chunk when splitting a batch extract for loading.
pub const SPLIT_LINES: usize = 100_000;

/// A staging artifact holding extracted rows, one tab-separated row per line.
#[derive(Debug)]
pub struct StagingFile {
    file: NamedTempFile,
}

impl StagingFile {
    /// Creates an empty staging file named after the table for debuggability.
    pub fn create(table_name: &str) -> DbsyncResult<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("dbsync_{table_name}_"))
            .suffix(".tsv")
            .tempfile()?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Splits the staging file into chunks of at most [`SPLIT_LINES`] lines.
    ///
    /// Loading an entire batch extract in one statement holds target locks
    /// for too long; chunking keeps each load statement bounded. The returned
    /// files are themselves temporary and cleaned up on drop.
    pub async fn split(&self, lines_per_chunk: usize) -> DbsyncResult<Vec<StagingFile>> {
        let reader = BufReader::new(File::open(self.path()).await?);
        let mut lines = reader.lines();

        let mut chunks = Vec::new();
        let mut current: Option<(StagingFile, BufWriter<File>, usize)> = None;

        while let Some(line) = lines.next_line().await? {
            if current
                .as_ref()
                .is_none_or(|(_, _, count)| *count >= lines_per_chunk)
            {
                if let Some((chunk, mut writer, _)) = current.take() {
                    writer.flush().await?;
                    chunks.push(chunk);
                }

                let chunk = StagingFile::create("chunk")?;
                let writer = BufWriter::new(File::create(chunk.path()).await?);
                current = Some((chunk, writer, 0));
            }

            let (_, writer, count) = current.as_mut().unwrap();
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            *count += 1;
        }

        if let Some((chunk, mut writer, _)) = current.take() {
            writer.flush().await?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }
}

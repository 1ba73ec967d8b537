//! FASTQ readers and writers, gzip-aware by file extension

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bio::io::fastq;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::error::Result;

pub type FastqRecords = fastq::Records<BufReader<Box<dyn Read>>>;

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Record iterator over a plain or `.gz` FASTQ file
pub fn records<P: AsRef<Path>>(path: P) -> Result<FastqRecords> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(fastq::Reader::new(reader).records())
}

/// FASTQ output staged in a temporary file next to its destination,
/// gzip-compressed when the destination ends in `.gz`.
///
/// Only [`StagedFastq::persist`] moves the file into place; dropping it
/// unpersisted deletes the partial output.
pub struct StagedFastq {
    writer: fastq::Writer<Box<dyn Write>>,
    temp: NamedTempFile,
    path: PathBuf,
}

impl StagedFastq {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let temp = NamedTempFile::new_in(dir)?;
        let file = BufWriter::new(temp.reopen()?);
        let out: Box<dyn Write> = if is_gzip(path) {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        Ok(Self {
            writer: fastq::Writer::new(out),
            temp,
            path: path.to_path_buf(),
        })
    }

    pub fn write_record(&mut self, record: &fastq::Record) -> Result<()> {
        self.writer.write_record(record)?;
        Ok(())
    }

    /// Finish the stream and rename it to the destination path
    pub fn persist(self) -> Result<()> {
        let StagedFastq { mut writer, temp, path } = self;
        writer.flush()?;
        drop(writer);
        temp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

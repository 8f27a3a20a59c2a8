//! Externally stored sorted runs.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;

use tempfile;

/// Read/write buffer size used for run files when none is configured.
pub const DEFAULT_RW_BUF_SIZE: usize = 8 * 1024;

/// A sorted element sequence spilled to backing storage.
///
/// Runs are write-once and read-forward-only: a run is created in one shot
/// from an already ordered element stream and is then consumed strictly from
/// its head, which matches block-sequential I/O and is why merges always
/// produce a new run instead of mutating one in place. The backing file is
/// scratch storage and is reclaimed as soon as the run is dropped.
pub trait SortedRun<T>: Sized {
    /// Error produced by the backing storage or by (de)serialization.
    type Error: Error + From<io::Error> + 'static;

    /// Writes an ordered element stream into a fresh run inside `dir`.
    ///
    /// The input yields `Result` items so that a k-way merge over existing
    /// runs can feed it directly; the first source error aborts the write.
    fn create<I>(dir: &Path, items: I, buf_size: Option<usize>) -> Result<Self, Self::Error>
    where
        I: IntoIterator<Item = Result<T, Self::Error>>,
    {
        let tmp_file = tempfile::tempfile_in(dir)?;

        let mut run_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file.try_clone()?),
            None => io::BufWriter::new(tmp_file.try_clone()?),
        };
        let len = Self::dump(&mut run_writer, items)?;
        run_writer.flush()?;

        let mut run_reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, tmp_file.try_clone()?),
            None => io::BufReader::new(tmp_file.try_clone()?),
        };
        run_reader.rewind()?;
        let byte_len = tmp_file.metadata()?.len();

        Ok(Self::open(run_reader.take(byte_len), len))
    }

    /// Serializes `items` through `writer`, returning how many were written.
    fn dump<I>(writer: &mut io::BufWriter<fs::File>, items: I) -> Result<u64, Self::Error>
    where
        I: IntoIterator<Item = Result<T, Self::Error>>;

    /// Wraps an already written byte range as a readable run of `len` elements.
    fn open(reader: io::Take<io::BufReader<fs::File>>, len: u64) -> Self;

    /// Number of elements not yet pulled.
    fn remaining(&self) -> u64;

    /// Removes and returns the run head, or `None` once the run is exhausted.
    fn pull(&mut self) -> Result<Option<T>, Self::Error>;
}

/// Storage error for [`RmpRun`].
#[derive(Debug)]
pub enum RmpRunError {
    /// Scratch file creation or raw I/O failure.
    IO(io::Error),
    /// Element serialization failure.
    Encode(rmp_serde::encode::Error),
    /// Element deserialization failure.
    Decode(rmp_serde::decode::Error),
}

impl fmt::Display for RmpRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RmpRunError::IO(err) => write!(f, "run I/O error: {}", err),
            RmpRunError::Encode(err) => write!(f, "run serialization error: {}", err),
            RmpRunError::Decode(err) => write!(f, "run deserialization error: {}", err),
        }
    }
}

impl Error for RmpRunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match self {
            RmpRunError::IO(err) => err,
            RmpRunError::Encode(err) => err,
            RmpRunError::Decode(err) => err,
        })
    }
}

impl From<io::Error> for RmpRunError {
    fn from(err: io::Error) -> Self {
        RmpRunError::IO(err)
    }
}

impl From<rmp_serde::encode::Error> for RmpRunError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RmpRunError::Encode(err)
    }
}

impl From<rmp_serde::decode::Error> for RmpRunError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RmpRunError::Decode(err)
    }
}

/// MessagePack run implementation, the default backing format.
/// For more information see https://msgpack.org/.
pub struct RmpRun<T> {
    reader: io::Take<io::BufReader<fs::File>>,
    remaining: u64,

    item_type: PhantomData<T>,
}

impl<T> SortedRun<T> for RmpRun<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type Error = RmpRunError;

    fn dump<I>(writer: &mut io::BufWriter<fs::File>, items: I) -> Result<u64, RmpRunError>
    where
        I: IntoIterator<Item = Result<T, RmpRunError>>,
    {
        let mut len = 0;
        for item in items {
            rmp_serde::encode::write(writer, &item?)?;
            len += 1;
        }

        Ok(len)
    }

    fn open(reader: io::Take<io::BufReader<fs::File>>, len: u64) -> Self {
        RmpRun {
            reader,
            remaining: len,
            item_type: PhantomData,
        }
    }

    fn remaining(&self) -> u64 {
        self.remaining
    }

    fn pull(&mut self) -> Result<Option<T>, RmpRunError> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let item = rmp_serde::decode::from_read(&mut self.reader)?;
        self.remaining -= 1;

        Ok(Some(item))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{RmpRun, SortedRun};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_roundtrip(tmp_dir: tempfile::TempDir) {
        let saved = Vec::from_iter(0..100);

        let mut run: RmpRun<i32> =
            SortedRun::create(tmp_dir.path(), saved.iter().cloned().map(Ok), None).unwrap();
        assert_eq!(run.remaining(), 100);

        let mut restored = Vec::new();
        while let Some(item) = run.pull().unwrap() {
            restored.push(item);
        }

        assert_eq!(restored, saved);
        assert_eq!(run.remaining(), 0);
    }

    #[rstest]
    fn test_remaining_tracks_pulls(tmp_dir: tempfile::TempDir) {
        let mut run: RmpRun<u64> =
            SortedRun::create(tmp_dir.path(), (0..5u64).map(Ok), Some(64)).unwrap();

        assert_eq!(run.remaining(), 5);
        run.pull().unwrap();
        run.pull().unwrap();
        assert_eq!(run.remaining(), 3);
    }

    #[rstest]
    fn test_pull_past_end(tmp_dir: tempfile::TempDir) {
        let mut run: RmpRun<i32> = SortedRun::create(tmp_dir.path(), vec![Ok(1)], None).unwrap();

        assert_eq!(run.pull().unwrap(), Some(1));
        assert_eq!(run.pull().unwrap(), None);
        assert_eq!(run.pull().unwrap(), None);
    }

    #[rstest]
    fn test_empty_run(tmp_dir: tempfile::TempDir) {
        let mut run: RmpRun<i32> =
            SortedRun::create(tmp_dir.path(), std::iter::empty(), None).unwrap();

        assert_eq!(run.remaining(), 0);
        assert_eq!(run.pull().unwrap(), None);
    }
}

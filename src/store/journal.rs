use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{Collection, Record};

/// A resolved write, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    Put(Record),
    Remove { collection: Collection, id: Ulid },
}

/// The ops of one unit of work. Always persisted and replayed whole.
pub type CommitOps = Vec<JournalOp>;

fn codec_error(e: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// `[u32 len][bincode CommitOps][u32 crc32]`, little endian.
fn write_commit(writer: &mut impl Write, ops: &[JournalOp]) -> io::Result<()> {
    let payload = bincode::serialize(ops).map_err(codec_error)?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf`, or report `false` if the file ends first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact commit. `None` at the end of the file and at the first torn
/// or corrupt frame; nothing after that point is trusted.
fn read_commit(reader: &mut impl Read) -> io::Result<Option<CommitOps>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

/// Every intact commit at `path`, oldest first. A missing file is empty.
pub fn load(path: &Path) -> io::Result<Vec<CommitOps>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut commits = Vec::new();
    while let Some(ops) = read_commit(&mut reader)? {
        commits.push(ops);
    }
    Ok(commits)
}

/// Append-only commit log behind a journaled store.
///
/// Commits are buffered with [`Journal::record`] and made durable in
/// batches by [`Journal::sync`]. [`Journal::snapshot`] replaces the whole
/// log with a single commit holding the current state.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    commits_since_snapshot: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(Self::append_handle(path)?),
            path: path.to_path_buf(),
            commits_since_snapshot: 0,
        })
    }

    fn append_handle(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    pub fn record(&mut self, ops: &[JournalOp]) -> io::Result<()> {
        write_commit(&mut self.writer, ops)?;
        self.commits_since_snapshot += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Write `state` to a sibling temp file, then rename it over the log.
    /// On failure the old log stays in place and keeps taking commits.
    pub fn snapshot(&mut self, state: &[JournalOp]) -> io::Result<()> {
        self.sync()?;
        let tmp = self.path.with_extension("journal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            write_commit(&mut writer, state)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.writer = BufWriter::new(Self::append_handle(&self.path)?);
        self.commits_since_snapshot = 0;
        Ok(())
    }

    pub fn commits_since_snapshot(&self) -> u64 {
        self.commits_since_snapshot
    }
}

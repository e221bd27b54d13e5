use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Upper bound on a single encoded record. A larger length prefix can only
/// come from a torn or corrupt write.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
/// Returns the number of bytes written.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + u64::from(len))
}

/// Read `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next valid record and its encoded size, or `None` at end of log or at the
/// first damaged record.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut payload)? || !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, 8 + len as u64)))
}

/// Valid events in order, plus the length of the prefix that holds them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, size)) = decode_record(&mut reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

/// Append-only log of reservation events.
///
/// A crash can leave a torn last record; replay stops at the first record
/// whose length, checksum or payload does not verify. Opening the log cuts
/// such a tail off, and a failed flush rolls the file back to the last
/// committed record, so later appends never land behind unreadable bytes.
pub struct Wal {
    /// `None` once a rollback failed: the file tail is unknown and every
    /// later append is refused.
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by fsynced records.
    committed_len: u64,
    pending_len: u64,
    pending_records: u64,
}

fn poisoned() -> io::Error {
    io::Error::other("log poisoned by a failed rollback")
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                "discarding {} unreadable bytes at the end of {}",
                file_len - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len: valid_len,
            pending_len: 0,
            pending_records: 0,
        })
    }

    /// Append one event and fsync. Tests only; the store batches with
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(poisoned)?;
        self.pending_len += encode_record(writer, event)?;
        self.pending_records += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(poisoned)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Drop everything appended since the last successful `flush_sync`,
    /// from the buffer and from the file. If the file cannot be cut back the
    /// log is poisoned.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_records);
        self.pending_len = 0;
        self.pending_records = 0;

        let Some(failed) = self.writer.take() else {
            return Err(poisoned());
        };
        // `into_parts` hands back the file without writing the buffer.
        let (file, _unwritten) = failed.into_parts();
        match file.set_len(self.committed_len).and_then(|()| file.sync_all()) {
            Ok(()) => {
                self.writer = Some(BufWriter::new(file));
                Ok(())
            }
            Err(e) => {
                error!("rollback of {} failed, log poisoned: {e}", self.path.display());
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub fn is_poisoned(&self) -> bool {
        self.writer.is_none()
    }

    #[cfg(test)]
    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot next to the log and fsync it. Slow; the log itself
    /// is untouched until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        // The snapshot was built from live state, so it replaces a poisoned tail too.
        self.writer = Some(BufWriter::new(file));
        self.appends_since_compact = 0;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// All valid events in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

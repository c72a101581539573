use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Upper bound on a single encoded record. A larger length prefix can only
/// come from a torn or corrupt write.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a single event to [len][bincode][crc32] format, returning the
/// number of bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next record and its encoded size. `Ok(None)` means the valid
/// prefix of the log ends here.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, 8 + len as u64)))
}

/// Every event up to the first truncated or corrupt entry, plus the byte
/// length of that valid prefix.
fn read_valid_prefix(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, size)) = decode_next(&mut reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

/// Append-only write-ahead log of booking events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) is detected via the length prefix
///   and CRC check and cut off before the log is reopened for appending.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length as of the last successful `flush_sync`.
    durable_len: u64,
    /// Bytes buffered or written since then.
    pending_len: u64,
    durable_appends: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`, discarding any torn tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(_, wal)| wal)
    }

    /// Replay the valid prefix of the log, truncate whatever follows it, and
    /// reopen for appending. New records never land behind garbage.
    pub fn recover(path: &Path) -> io::Result<(Vec<Event>, Self)> {
        let (events, valid_len) = read_valid_prefix(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                "WAL {}: discarding {} bytes after last valid record",
                path.display(),
                on_disk - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            durable_len: valid_len,
            pending_len: 0,
            durable_appends: 0,
        };
        Ok((events, wal))
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.durable_appends = self.appends_since_compact;
        Ok(())
    }

    /// Discard everything appended since the last successful `flush_sync`,
    /// both still-buffered bytes and bytes that already reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts drops the buffer without writing it out.
        let _ = stale.into_parts();
        self.writer.get_ref().set_len(self.durable_len)?;
        self.writer.get_ref().sync_all()?;
        self.pending_len = 0;
        self.appends_since_compact = self.durable_appends;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file next to the WAL and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the WAL and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_len = 0;
        self.appends_since_compact = 0;
        self.durable_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning every event up to the first
    /// truncated or corrupt entry. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_valid_prefix(path).map(|(events, _)| events)
    }
}

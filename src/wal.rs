use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode one event as `[u32 len][bincode payload][u32 crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only write-ahead log, one file per tenant.
///
/// Entry framing: `[u32: len][bincode: Event][u32: crc32]`. A torn tail
/// entry (crash mid-write) fails the length or CRC check and replay stops
/// there, discarding only the incomplete record.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one event without flushing. Group commit: the writer task
    /// batches several appends, then calls `flush_sync` once.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered entries and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write the compacted event list to a sibling temp file and fsync it.
    /// Slow I/O happens here, outside any engine lock.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Atomically swap the temp compact file over the live WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        // Flush anything still buffered for the old file before it is replaced
        self.flush_sync()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact event from the WAL at `path`. Missing file = empty
    /// log. Stops at the first torn or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                break; // torn entry
            }
            let mut crc_buf = [0u8; 4];
            if reader.read_exact(&mut crc_buf).is_err() {
                break;
            }
            if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
                break; // corrupt tail
            }
            match bincode::deserialize(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn test_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("creneau_test_wal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn block_event() -> Event {
        Event::BlockAdded {
            block: BlockedInterval {
                id: Ulid::new(),
                center_id: Ulid::new(),
                date: NaiveDate::from_ymd_opt(2026, 4, 7).unwrap(),
                staff_id: None,
                range: TimeRange::new(600, 630),
                reason: "entretien".into(),
                recurrence: None,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = test_path("roundtrip.wal");
        let e1 = block_event();
        let e2 = block_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&e1).unwrap();
            wal.append(&e2).unwrap();
        }
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events, vec![e1, e2]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = test_path("missing.wal");
        let _ = std::fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = test_path("torn.wal");
        let e1 = block_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&e1).unwrap();
        }
        // Simulate a crash mid-append: length prefix with no payload
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&100u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events, vec![e1]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = test_path("crc.wal");
        let e1 = block_event();
        let e2 = block_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&e1).unwrap();
            wal.append(&e2).unwrap();
        }
        // Flip a byte in the last CRC
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events, vec![e1]);
    }

    #[test]
    fn compact_rewrites_file() {
        let path = test_path("compact.wal");
        let keep = block_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..10 {
                wal.append(&block_event()).unwrap();
            }
            Wal::write_compact_file(wal.path(), std::slice::from_ref(&keep)).unwrap();
            wal.swap_compact_file().unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events, vec![keep]);
    }
}

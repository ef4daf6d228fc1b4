use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single record. A length prefix above this is treated as
/// corruption instead of being allocated.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Write one record as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact record. `Ok(None)` at a clean end of file or at the
/// first torn/corrupt record.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, (len + 8) as u64))),
        Err(_) => Ok(None),
    }
}

/// Result of reading a log back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the intact prefix.
    pub valid_bytes: u64,
    /// Bytes after the last intact record (a torn write or corruption).
    pub discarded_bytes: u64,
}

/// Append-only write-ahead log of reservation events.
///
/// A crash can leave a torn record at the tail; replay stops there and
/// ignores the remainder.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(Self::open_append(path)?),
            path: path.to_path_buf(),
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn staging_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    /// Buffer a record. Nothing is durable until `sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)
    }

    /// Flush buffered records and fsync the file.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.sync()
    }

    /// Replace the log with `events`: write a staging file, fsync it, then
    /// rename it over the live file and reopen for appending.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let staging = self.staging_path();
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            for event in events {
                write_record(&mut out, event)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        // Buffered appends belong to the old file; make sure none are pending.
        self.writer.flush()?;
        fs::rename(&staging, &self.path)?;
        self.writer = BufWriter::new(Self::open_append(&self.path)?);
        Ok(())
    }

    /// Read every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        let mut consumed = 0u64;
        while let Some((event, size)) = read_record(&mut reader)? {
            replay.events.push(event);
            consumed += size;
        }
        replay.valid_bytes = consumed;
        replay.discarded_bytes = total.saturating_sub(consumed);
        Ok(replay)
    }

    /// Cut the file back to `len` bytes so new records are not written
    /// behind a torn tail that replay would stop at.
    pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("banya_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(start: Ms) -> Event {
        Event::ReservationCreated {
            reservation: Reservation {
                id: Ulid::new(),
                facility_id: Ulid::new(),
                span: Span::new(start, start + 3_600_000),
                client: ClientContact {
                    name: "Ivan".into(),
                    phone: "+7 900 000 00 00".into(),
                    email: None,
                    notes: None,
                },
                guests: 2,
                total_cost: 1000,
                status_id: DEFAULT_STATUS_ID,
                add_ons: AddOns::default(),
                created_at: start,
                updated_at: start,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            created(0),
            Event::ReservationDeleted {
                id: Ulid::new(),
                facility_id: Ulid::new(),
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert_eq!(replay.discarded_bytes, 0);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.wal");
        let event = created(0);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8, 0, 0, 0, 1, 2]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event.clone()]);
        assert_eq!(replay.discarded_bytes, 6);

        // Appends after truncation are readable again.
        Wal::truncate(&path, replay.valid_bytes).unwrap();
        let next = created(10_000_000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&next).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event, next]);
        assert_eq!(replay.discarded_bytes, 0);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let payload = bincode::serialize(&created(0)).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.discarded_bytes, payload.len() as u64 + 8);
    }

    #[test]
    fn absurd_length_prefix_is_corruption() {
        let path = tmp_path("absurd_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.discarded_bytes, 4);
    }

    #[test]
    fn rewrite_shrinks_and_accepts_appends() {
        let path = tmp_path("rewrite.wal");
        let keep = created(0);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keep).unwrap();
        for i in 1..20 {
            let e = created(i * 10_000_000);
            wal.append(&e).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.rewrite(std::slice::from_ref(&keep)).unwrap();
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "rewritten log should be smaller: {after} < {before}");

        let next = created(999_000_000);
        wal.append(&next).unwrap();
        drop(wal);

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![keep, next]);
    }
}

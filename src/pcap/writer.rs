//! Classic PCAP writer.
//!
//! Output is always little-endian, microsecond-resolution PCAP (version 2.4),
//! optionally gzip-compressed.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;

use super::{Compression, PacketRecord};
use crate::error::{Error, PcapError};
use crate::merge::RecordSink;

/// Magic number of a microsecond-resolution PCAP file.
const PCAP_MAGIC: u32 = 0xa1b2_c3d4;

const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;

/// Writer buffer size (64KB).
const BUFFER_SIZE: usize = 65536;

/// Destination byte stream for a capture file.
pub enum OutputStream {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputStream {
    /// Create `path`, compressing when its extension is `.gz`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| {
            Error::Pcap(PcapError::Create {
                path: path.display().to_string(),
                source,
            })
        })?;
        let buffered = BufWriter::with_capacity(BUFFER_SIZE, file);

        Ok(match Compression::from_extension(path) {
            Compression::Gzip => {
                OutputStream::Gzip(GzEncoder::new(buffered, flate2::Compression::default()))
            }
            Compression::None => OutputStream::Plain(buffered),
        })
    }

    /// Flush everything, including the gzip trailer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputStream::Plain(mut w) => w.flush(),
            OutputStream::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::Plain(w) => w.write(buf),
            OutputStream::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::Plain(w) => w.flush(),
            OutputStream::Gzip(w) => w.flush(),
        }
    }
}

/// Writes packet records to a classic PCAP stream.
///
/// The link type and snap length are fixed when the writer is created.
pub struct PcapWriter<W: Write> {
    inner: W,
    packets_written: u64,
}

impl PcapWriter<OutputStream> {
    /// Create a capture file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, link_type: u32, snaplen: u32) -> Result<Self, Error> {
        let stream = OutputStream::create(path)?;
        Self::new(stream, link_type, snaplen)
    }

    /// Flush all buffered output and close the file.
    pub fn finish(self) -> Result<u64, Error> {
        let count = self.packets_written;
        self.inner.finish()?;
        Ok(count)
    }
}

impl<W: Write> PcapWriter<W> {
    /// Write the global header and return a writer for records.
    pub fn new(mut inner: W, link_type: u32, snaplen: u32) -> Result<Self, Error> {
        let mut header = [0u8; 24];
        header[0..4].copy_from_slice(&PCAP_MAGIC.to_le_bytes());
        header[4..6].copy_from_slice(&VERSION_MAJOR.to_le_bytes());
        header[6..8].copy_from_slice(&VERSION_MINOR.to_le_bytes());
        // thiszone and sigfigs stay zero
        header[16..20].copy_from_slice(&snaplen.to_le_bytes());
        header[20..24].copy_from_slice(&link_type.to_le_bytes());
        inner.write_all(&header)?;

        Ok(Self {
            inner,
            packets_written: 0,
        })
    }

    /// Number of records written so far.
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Append one record.
    pub fn write_packet(&mut self, record: &PacketRecord) -> Result<(), Error> {
        let secs = u32::try_from(record.timestamp.secs).map_err(|_| {
            Error::Pcap(PcapError::TimestampOverflow {
                secs: record.timestamp.secs,
            })
        })?;

        let mut header = [0u8; 16];
        header[0..4].copy_from_slice(&secs.to_le_bytes());
        header[4..8].copy_from_slice(&record.timestamp.micros.to_le_bytes());
        header[8..12].copy_from_slice(&record.captured_length().to_le_bytes());
        header[12..16].copy_from_slice(&record.original_length.to_le_bytes());

        self.inner.write_all(&header)?;
        self.inner.write_all(&record.data)?;
        self.packets_written += 1;
        Ok(())
    }

    /// Consume the writer, returning the underlying stream unflushed.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> RecordSink for PcapWriter<W> {
    fn write_record(&mut self, record: &PacketRecord) -> Result<(), Error> {
        self.write_packet(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcap::{PcapReader, Timestamp};
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    #[test]
    fn test_header_layout() {
        let writer = PcapWriter::new(Vec::new(), 113, 262144).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &[0xd4, 0xc3, 0xb2, 0xa1]);
        assert_eq!(&bytes[4..8], &[2, 0, 4, 0]);
        assert_eq!(&bytes[16..20], &262144u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &113u32.to_le_bytes());
    }

    #[test]
    fn test_written_records_read_back() {
        let mut writer = PcapWriter::new(Vec::new(), 1, 65535).unwrap();
        let first = PacketRecord::new(Timestamp::new(100, 42), 60, vec![0xab; 20]);
        let second = PacketRecord::new(Timestamp::new(101, 0), 4, vec![1, 2, 3, 4]);
        writer.write_packet(&first).unwrap();
        writer.write_packet(&second).unwrap();
        assert_eq!(writer.packets_written(), 2);

        let reader = PcapReader::from_reader(Cursor::new(writer.into_inner())).unwrap();
        assert_eq!(reader.link_type(), 1);
        let packets: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(packets, vec![first, second]);
    }

    #[test]
    fn test_timestamp_overflow() {
        let mut writer = PcapWriter::new(Vec::new(), 1, 65535).unwrap();
        let record = PacketRecord::new(Timestamp::new(u64::from(u32::MAX) + 1, 0), 1, vec![0]);
        let err = writer.write_packet(&record).unwrap_err();
        assert!(matches!(
            err,
            Error::Pcap(PcapError::TimestampOverflow { .. })
        ));
        assert_eq!(writer.packets_written(), 0);
    }

    #[test]
    fn test_gzip_output_by_extension() {
        let temp = NamedTempFile::with_suffix(".pcap.gz").unwrap();
        let mut writer = PcapWriter::create(temp.path(), 1, 65535).unwrap();
        writer
            .write_packet(&PacketRecord::new(Timestamp::new(1, 1), 3, vec![7, 8, 9]))
            .unwrap();
        assert_eq!(writer.finish().unwrap(), 1);

        let raw = std::fs::read(temp.path()).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let mut reader = PcapReader::open(temp.path()).unwrap();
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(&packet.data[..], &[7, 8, 9]);
    }

    #[test]
    fn test_create_in_missing_directory() {
        let err = PcapWriter::create("/nonexistent/dir/out.pcap", 1, 65535)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Pcap(PcapError::Create { .. })));
    }
}

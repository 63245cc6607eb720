//! PCAP/PCAPNG file reader with transparent gzip decompression.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError as ParserError, PcapNGReader};

use super::{Compression, PacketRecord, PcapFormat, Timestamp};
use crate::error::{Error, PcapError};
use crate::merge::CaptureReader;

/// Buffer size for reading capture files. Holds a maximum-snaplen record.
const BUFFER_SIZE: usize = 1 << 20;

/// Link type assumed until a header says otherwise (Ethernet).
const DEFAULT_LINK_TYPE: u32 = 1;

/// Snap length assumed until a header says otherwise.
const DEFAULT_SNAPLEN: u32 = 65535;

/// Snap length reported for interfaces declaring "no limit" (libpcap's maximum).
const UNLIMITED_SNAPLEN: u32 = 262144;

type Input = BufReader<Box<dyn Read + Send>>;

/// Reader for PCAP and PCAPNG captures.
///
/// The capture header (and, for PCAPNG, the first interface description) is
/// read when the reader is opened, so [`link_type`](Self::link_type) and
/// [`snaplen`](Self::snaplen) are valid before the first packet is read.
pub struct PcapReader {
    inner: ReaderInner,
    state: ReaderState,
    pending: Option<PacketRecord>,
}

enum ReaderInner {
    Legacy(LegacyPcapReader<Input>),
    Ng(PcapNGReader<Input>),
}

/// Header-derived state, updated as header blocks are read.
#[derive(Debug)]
struct ReaderState {
    format: PcapFormat,
    link_type: u32,
    snaplen: u32,
    frame_number: u64,
    /// Set once the first PCAPNG interface has fixed `link_type` and `snaplen`
    interface_seen: bool,
    interfaces: Vec<Interface>,
}

/// A PCAPNG interface description.
#[derive(Debug, Clone, Copy)]
struct Interface {
    units_per_second: u64,
    offset_secs: i64,
}

/// One block's worth of progress through the capture.
enum Step {
    Packet(PacketRecord),
    Header,
    Skip,
    Eof,
}

impl PcapReader {
    /// Open a capture file for reading.
    ///
    /// Automatically detects and decompresses gzipped files.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| {
            Error::Pcap(PcapError::Open {
                path: path.display().to_string(),
                source,
            })
        })?;
        Self::from_reader(file)
    }

    /// Read a capture from any byte stream.
    pub fn from_reader<R: Read + Send + 'static>(source: R) -> Result<Self, Error> {
        let mut raw = BufReader::with_capacity(BUFFER_SIZE, source);
        let compression = Compression::detect(raw.fill_buf()?);

        let decoded: Box<dyn Read + Send> = match compression {
            Compression::Gzip => Box::new(GzDecoder::new(raw)),
            Compression::None => Box::new(raw),
        };
        let mut input = BufReader::with_capacity(BUFFER_SIZE, decoded);

        // Peek at the magic number without consuming it
        let format = PcapFormat::detect(input.fill_buf()?)?;
        tracing::debug!(%compression, ?format, "Detected capture format");

        let inner = if format.is_pcapng() {
            let reader = PcapNGReader::new(BUFFER_SIZE, input).map_err(|e| {
                Error::Pcap(PcapError::InvalidFormat {
                    reason: format!("Failed to parse PCAPNG header: {e}"),
                })
            })?;
            ReaderInner::Ng(reader)
        } else {
            let reader = LegacyPcapReader::new(BUFFER_SIZE, input).map_err(|e| {
                Error::Pcap(PcapError::InvalidFormat {
                    reason: format!("Failed to parse PCAP header: {e}"),
                })
            })?;
            ReaderInner::Legacy(reader)
        };

        let mut reader = Self {
            inner,
            state: ReaderState {
                format,
                link_type: DEFAULT_LINK_TYPE,
                snaplen: DEFAULT_SNAPLEN,
                frame_number: 0,
                interface_seen: false,
                interfaces: Vec::new(),
            },
            pending: None,
        };
        reader.prime()?;
        Ok(reader)
    }

    /// Read blocks until the link type is known.
    fn prime(&mut self) -> Result<(), Error> {
        loop {
            match self.advance()? {
                Step::Header | Step::Eof => return Ok(()),
                Step::Packet(record) => {
                    self.pending = Some(record);
                    return Ok(());
                }
                Step::Skip => continue,
            }
        }
    }

    fn advance(&mut self) -> Result<Step, Error> {
        match &mut self.inner {
            ReaderInner::Legacy(reader) => advance_legacy(reader, &mut self.state),
            ReaderInner::Ng(reader) => advance_ng(reader, &mut self.state),
        }
    }

    /// Get the container format.
    pub fn format(&self) -> PcapFormat {
        self.state.format
    }

    /// Get the link type of the capture (e.g., 1 = Ethernet).
    pub fn link_type(&self) -> u32 {
        self.state.link_type
    }

    /// Get the snapshot length of the capture.
    pub fn snaplen(&self) -> u32 {
        self.state.snaplen
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` at end of file.
    pub fn next_packet(&mut self) -> Result<Option<PacketRecord>, Error> {
        if let Some(record) = self.pending.take() {
            return Ok(Some(record));
        }
        loop {
            match self.advance()? {
                Step::Packet(record) => return Ok(Some(record)),
                Step::Eof => return Ok(None),
                Step::Header | Step::Skip => continue,
            }
        }
    }
}

impl CaptureReader for PcapReader {
    fn next_record(&mut self) -> Result<Option<PacketRecord>, Error> {
        self.next_packet()
    }

    fn link_type(&self) -> u32 {
        self.state.link_type
    }

    fn snaplen(&self) -> u32 {
        self.state.snaplen
    }
}

/// Iterator adapter for PcapReader.
impl Iterator for PcapReader {
    type Item = Result<PacketRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

fn invalid(reason: String) -> Error {
    Error::Pcap(PcapError::InvalidFormat { reason })
}

/// Copy at most `caplen` bytes; block payloads may carry padding.
fn captured(data: &[u8], caplen: u32) -> Bytes {
    let len = (caplen as usize).min(data.len());
    Bytes::copy_from_slice(&data[..len])
}

/// Read the next block from a legacy PCAP reader.
fn advance_legacy<R: Read>(
    reader: &mut LegacyPcapReader<R>,
    state: &mut ReaderState,
) -> Result<Step, Error> {
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let step = match block {
                    PcapBlockOwned::LegacyHeader(header) => {
                        state.link_type = header.network.0 as u32;
                        state.snaplen = header.snaplen;
                        Step::Header
                    }
                    PcapBlockOwned::Legacy(packet) => {
                        state.frame_number += 1;
                        let micros = if state.format.is_nanosecond() {
                            packet.ts_usec / 1000
                        } else {
                            packet.ts_usec
                        };
                        Step::Packet(PacketRecord::new(
                            Timestamp::new(u64::from(packet.ts_sec), micros),
                            packet.origlen,
                            captured(packet.data, packet.caplen),
                        ))
                    }
                    _ => Step::Skip,
                };
                reader.consume(offset);
                return Ok(step);
            }
            Err(ParserError::Eof) => return Ok(Step::Eof),
            Err(ParserError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| invalid(format!("Refill error: {e}")))?;
            }
            Err(e) => {
                return Err(invalid(format!(
                    "Parse error after frame {}: {e}",
                    state.frame_number
                )))
            }
        }
    }
}

/// Read the next block from a PCAPNG reader.
fn advance_ng<R: Read>(
    reader: &mut PcapNGReader<R>,
    state: &mut ReaderState,
) -> Result<Step, Error> {
    use pcap_parser::pcapng::Block;

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let step = match block {
                    PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                        // Interface ids are scoped to their section, the
                        // capture's link type and snaplen are not
                        state.interfaces.clear();
                        Step::Skip
                    }
                    PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                        state.add_interface(&idb)?;
                        Step::Header
                    }
                    PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                        let interface = state.interfaces.get(epb.if_id as usize).ok_or_else(|| {
                            invalid(format!("Packet references unknown interface {}", epb.if_id))
                        })?;
                        state.frame_number += 1;
                        let units = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                        Step::Packet(PacketRecord::new(
                            interface.timestamp(units),
                            epb.origlen,
                            captured(epb.data, epb.caplen),
                        ))
                    }
                    PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                        state.frame_number += 1;
                        // Simple packets carry no timestamp
                        let caplen = spb.origlen.min(state.snaplen);
                        Step::Packet(PacketRecord::new(
                            Timestamp::ZERO,
                            spb.origlen,
                            captured(spb.data, caplen),
                        ))
                    }
                    _ => Step::Skip,
                };
                reader.consume(offset);
                return Ok(step);
            }
            Err(ParserError::Eof) => return Ok(Step::Eof),
            Err(ParserError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| invalid(format!("Refill error: {e}")))?;
            }
            Err(e) => {
                return Err(invalid(format!(
                    "Parse error after frame {}: {e}",
                    state.frame_number
                )))
            }
        }
    }
}

impl ReaderState {
    /// Register a PCAPNG interface.
    ///
    /// The first interface of the file sets the capture's link type and
    /// snaplen. A later interface with another link type cannot be written
    /// to a single-link-type output, so it ends the read.
    fn add_interface(
        &mut self,
        idb: &pcap_parser::pcapng::InterfaceDescriptionBlock,
    ) -> Result<(), Error> {
        let link_type = idb.linktype.0 as u32;
        let units_per_second = ts_units_per_second(idb.if_tsresol)
            .ok_or_else(|| invalid(format!("Unsupported if_tsresol {:#04x}", idb.if_tsresol)))?;

        if !self.interface_seen {
            self.interface_seen = true;
            self.link_type = link_type;
            self.snaplen = match idb.snaplen {
                0 => UNLIMITED_SNAPLEN,
                snaplen => snaplen,
            };
        } else if link_type != self.link_type {
            return Err(invalid(format!(
                "Interface {} has link type {}, capture uses {}",
                self.interfaces.len(),
                link_type,
                self.link_type
            )));
        }

        self.interfaces.push(Interface {
            units_per_second,
            offset_secs: idb.if_tsoffset,
        });
        Ok(())
    }
}

/// Timestamp units per second for a PCAPNG `if_tsresol` value.
///
/// The high bit selects a power of two, otherwise a power of ten.
fn ts_units_per_second(tsresol: u8) -> Option<u64> {
    let exponent = u32::from(tsresol & 0x7f);
    if tsresol & 0x80 != 0 {
        2u64.checked_pow(exponent)
    } else {
        10u64.checked_pow(exponent)
    }
}

impl Interface {
    fn timestamp(&self, units: u64) -> Timestamp {
        let secs = units / self.units_per_second;
        let frac = units % self.units_per_second;
        let micros = (u128::from(frac) * 1_000_000 / u128::from(self.units_per_second)) as u32;
        let secs = (secs as i128 + i128::from(self.offset_secs)).clamp(0, u64::MAX as i128);
        Timestamp::new(secs as u64, micros)
    }
}

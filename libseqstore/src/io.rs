//! Read ingestion: the shim between FASTA/FASTQ files on disk and the
//! corrected-read records the builders consume.
//!
//! Quality trimming and error correction happen upstream; this module only
//! parses sequences. Input may be gzip-compressed — the format is sniffed
//! from the magic bytes, not the file name. Parsing runs on a producer
//! thread feeding a bounded channel so ingestion never buffers more than a
//! window of records.

use std::fs::File;
use std::io;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crossbeam_channel as channel;
use flate2::bufread::MultiGzDecoder;
use log::debug;
use needletail::parse_fastx_reader;

use crate::dna::Sequence;
use crate::error::SeqstoreError;
use crate::{ReadRecord, Result};

/// The compression format of a file.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
enum CompressionFormat {
    Gzip,
    #[default]
    None,
}

/// Detects the compression format by reading the magic bytes at the start
/// of the file.
fn detect_compression_format<R: Read + Seek>(reader: &mut R) -> io::Result<CompressionFormat> {
    let original_position = reader.stream_position()?;
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0; 2];
    let format = match reader.read_exact(&mut magic) {
        Ok(()) if magic == [0x1f, 0x8b] => CompressionFormat::Gzip,
        _ => CompressionFormat::None,
    };

    reader.seek(SeekFrom::Start(original_position))?;
    Ok(format)
}

/// Opens a file and returns a reader, transparently decompressing gzip.
pub fn open_file<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn Read + Send>> {
    let mut buf = File::open(&path).map(BufReader::new)?;
    let compression_format = detect_compression_format(&mut buf)?;

    let reader: Box<dyn Read + Send> = match compression_format {
        CompressionFormat::Gzip => Box::new(MultiGzDecoder::new(buf)),
        CompressionFormat::None => Box::new(buf),
    };

    Ok(reader)
}

/// A message that can be sent in a channel.
enum Message {
    /// A parsed read sequence, still in ASCII.
    Data(Vec<u8>),
}

/// Load corrected-read records from FASTA/FASTQ files. With
/// `interleaved_pairs`, consecutive records within each file form mate
/// pairs; a trailing unpaired record is an input error.
pub fn load_read_records<P: AsRef<Path>>(
    paths: &[P],
    interleaved_pairs: bool,
) -> Result<Vec<ReadRecord>> {
    let mut records = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let (sender, receiver) = channel::bounded(10000);
        let reader = open_file(path)?;

        // Producer: parse records and send them to the channel.
        let producer = std::thread::spawn(move || -> Result<()> {
            let mut fastx_reader = parse_fastx_reader(reader).map_err(|e| {
                SeqstoreError::Input(format!("error parsing input file: {e}"))
            })?;
            while let Some(record) = fastx_reader.next() {
                match record {
                    Ok(rec) => {
                        let msg = Message::Data(rec.seq().into_owned());
                        if sender.send(msg).is_err() {
                            break; // Exit if the receiver is dropped.
                        }
                    }
                    Err(e) => {
                        return Err(SeqstoreError::Input(format!(
                            "error parsing input file: {e}"
                        )));
                    }
                }
            }
            drop(sender);
            Ok(())
        });

        let mut pending: Option<Sequence> = None;
        for Message::Data(ascii) in receiver {
            let seq = Sequence::from_ascii(&ascii)?;
            if interleaved_pairs {
                match pending.take() {
                    Some(read) => records.push(ReadRecord {
                        read,
                        mate: Some(seq),
                    }),
                    None => pending = Some(seq),
                }
            } else {
                records.push(ReadRecord {
                    read: seq,
                    mate: None,
                });
            }
        }

        producer
            .join()
            .map_err(|e| SeqstoreError::Input(format!("reader thread panicked: {e:?}")))??;

        if let Some(odd) = pending {
            return Err(SeqstoreError::Input(format!(
                "{}: interleaved pair input has a trailing unpaired read of {} bases",
                path.display(),
                odd.len()
            )));
        }
        debug!("loaded {} records so far from {}", records.len(), path.display());
    }
    Ok(records)
}

/// Load a reference FASTA as one concatenated seed sequence. The seed must
/// be plain `ACGT`; reference preprocessing (N handling, indexing) is the
/// caller's business.
pub fn load_reference<P: AsRef<Path>>(path: P) -> Result<Sequence> {
    let reader = open_file(&path)?;
    let mut fastx_reader = parse_fastx_reader(reader)
        .map_err(|e| SeqstoreError::Input(format!("error parsing reference: {e}")))?;
    let mut seq = Sequence::new();
    while let Some(record) = fastx_reader.next() {
        let record =
            record.map_err(|e| SeqstoreError::Input(format!("error parsing reference: {e}")))?;
        let part = Sequence::from_ascii(&record.seq())?;
        seq.extend(&part);
    }
    Ok(seq)
}

//! Audit trail of sequence numbers, one decimal wire sequence number per line. This is meant
//!  for analyzing a transfer after the fact and is independent of `tracing` output:
//!
//! * `seqnum.log` - the logical sequence number of every packet the sender transmits, including
//!    retransmissions and END
//! * `ack.log` - the logical sequence number of every ACK the sender receives (END echoes are
//!    not ACKs and not logged)
//! * `arrival.log` - the wire sequence number of every valid DATA packet that arrives at the
//!    receiver, in or out of order

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
#[cfg(test)] use mockall::automock;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SequenceEvent {
    Sent,
    Acknowledged,
    Arrived,
}

#[cfg_attr(test, automock)]
pub trait SequenceLog: Send {
    fn record(&mut self, event: SequenceEvent, seq_num: u64) -> anyhow::Result<()>;
}

pub struct NoSequenceLog;

impl SequenceLog for NoSequenceLog {
    fn record(&mut self, _event: SequenceEvent, _seq_num: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes each kind of event to its own writer, flushing after every line so the logs are
///  complete even if the process is killed. Events without a writer are skipped.
pub struct WriteSequenceLog<W: Write + Send> {
    sent: Option<W>,
    acknowledged: Option<W>,
    arrived: Option<W>,
}

impl WriteSequenceLog<BufWriter<File>> {
    pub const SENT_FILE_NAME: &'static str = "seqnum.log";
    pub const ACKNOWLEDGED_FILE_NAME: &'static str = "ack.log";
    pub const ARRIVED_FILE_NAME: &'static str = "arrival.log";

    pub fn sender_files(dir: &Path) -> anyhow::Result<Self> {
        Ok(WriteSequenceLog {
            sent: Some(BufWriter::new(File::create(dir.join(Self::SENT_FILE_NAME))?)),
            acknowledged: Some(BufWriter::new(File::create(dir.join(Self::ACKNOWLEDGED_FILE_NAME))?)),
            arrived: None,
        })
    }

    pub fn receiver_files(dir: &Path) -> anyhow::Result<Self> {
        Ok(WriteSequenceLog {
            sent: None,
            acknowledged: None,
            arrived: Some(BufWriter::new(File::create(dir.join(Self::ARRIVED_FILE_NAME))?)),
        })
    }
}

impl<W: Write + Send> WriteSequenceLog<W> {
    pub fn new(sent: Option<W>, acknowledged: Option<W>, arrived: Option<W>) -> WriteSequenceLog<W> {
        WriteSequenceLog { sent, acknowledged, arrived }
    }

    pub fn into_writers(self) -> (Option<W>, Option<W>, Option<W>) {
        (self.sent, self.acknowledged, self.arrived)
    }
}

impl<W: Write + Send> SequenceLog for WriteSequenceLog<W> {
    fn record(&mut self, event: SequenceEvent, seq_num: u64) -> anyhow::Result<()> {
        let writer = match event {
            SequenceEvent::Sent => &mut self.sent,
            SequenceEvent::Acknowledged => &mut self.acknowledged,
            SequenceEvent::Arrived => &mut self.arrived,
        };

        if let Some(writer) = writer {
            writeln!(writer, "{}", seq_num)?;
            writer.flush()?;
        }
        Ok(())
    }
}

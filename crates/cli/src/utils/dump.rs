//! APDU dump: a terminal whose connections log every exchange to a file

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::Arc,
};

use bytes::Bytes;
use gpman::{Connection, GlobalPlatform, ReaderInfo, Terminal};
use gpman_pcsc::{PcscConnection, PcscTerminal};
use parking_lot::Mutex;
use tracing::warn;

/// Shared dump file, one per run
#[derive(Debug, Clone)]
pub(crate) struct DumpSink(Arc<Mutex<File>>);

impl DumpSink {
    fn create(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self(Arc::new(Mutex::new(file))))
    }

    fn write(&self, prefix: &str, data: &str) {
        let mut file = self.0.lock();
        if let Err(e) = writeln!(file, "{prefix} {data}") {
            warn!(error = %e, "failed to write APDU dump");
        }
    }
}

/// Connection that copies every command and response into the dump
#[derive(Debug)]
pub(crate) struct DumpConnection<C> {
    inner: C,
    sink: Option<DumpSink>,
}

impl<C: Connection> Connection for DumpConnection<C> {
    fn begin_exclusive(&mut self) -> gpman::Result<()> {
        self.inner.begin_exclusive()
    }

    fn end_exclusive(&mut self) -> gpman::Result<()> {
        self.inner.end_exclusive()
    }

    fn disconnect(&mut self) -> gpman::Result<()> {
        self.inner.disconnect()
    }

    fn transmit(&mut self, command: &[u8]) -> gpman::Result<Bytes> {
        if let Some(sink) = &self.sink {
            sink.write(">>", &hex::encode_upper(command));
        }
        let response = self.inner.transmit(command)?;
        if let Some(sink) = &self.sink {
            sink.write("<<", &hex::encode_upper(&response));
        }
        Ok(response)
    }

    fn atr(&self) -> gpman::Result<Bytes> {
        self.inner.atr()
    }
}

/// The PC/SC terminal with optional APDU dumping
#[derive(Debug)]
pub(crate) struct CliTerminal {
    pcsc: PcscTerminal,
    dump: Option<DumpSink>,
}

impl CliTerminal {
    pub(crate) fn new(pcsc: PcscTerminal, dump: Option<&Path>) -> std::io::Result<Self> {
        let dump = dump.map(DumpSink::create).transpose()?;
        Ok(Self { pcsc, dump })
    }
}

impl Terminal for CliTerminal {
    type Card = GlobalPlatform<DumpConnection<PcscConnection>>;

    fn list_readers(&mut self) -> gpman::Result<Vec<ReaderInfo>> {
        self.pcsc.list_readers()
    }

    fn connect(&mut self, reader: &str) -> gpman::Result<Self::Card> {
        let inner = self.pcsc.open(reader).map_err(|e| e.during("connect"))?;
        if let Some(sink) = &self.dump {
            sink.write("#", reader);
            if let Ok(atr) = inner.atr() {
                sink.write("# ATR", &hex::encode_upper(&atr));
            }
        }
        Ok(GlobalPlatform::new(DumpConnection {
            inner,
            sink: self.dump.clone(),
        }))
    }
}

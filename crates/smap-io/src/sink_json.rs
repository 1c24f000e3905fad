use anyhow::{Context, Result};
use smap_core::Record;
use std::io::Write;

const OPEN: &[u8] = b"{\"objects\":[\n";
const SEPARATOR: &[u8] = b",\n";
const CLOSE: &[u8] = b"\n]}\n";

/// Writes records as one JSON document, `{"objects":[ ... ]}`, one record at
/// a time so output never has to be held in memory.
pub struct JsonArraySink<W: Write> {
    out: W,
    pretty: bool,
    written: u64,
}

impl<W: Write> JsonArraySink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            pretty: false,
            written: 0,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        let lead = if self.written == 0 { OPEN } else { SEPARATOR };
        self.out.write_all(lead).context("write output")?;
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.out, record)
        } else {
            serde_json::to_writer(&mut self.out, record)
        }
        .context("serialize record")?;
        self.written += 1;
        Ok(())
    }

    /// Close the document and hand back the writer.
    pub fn finish(mut self) -> Result<W> {
        if self.written == 0 {
            self.out.write_all(OPEN).context("write output")?;
        }
        self.out.write_all(CLOSE).context("write output")?;
        self.out.flush().context("flush output")?;
        Ok(self.out)
    }
}

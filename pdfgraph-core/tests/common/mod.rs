//! Shared helpers for integration tests: a byte-exact builder for synthetic
//! PDF files and a tracing subscriber for debugging failures.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Routes library events to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Row of an xref section
#[derive(Debug, Clone, Copy)]
pub enum Row {
    /// In use at the offset recorded for this object number
    InUse,
    Free { next: u32, generation: u16 },
    Compressed { stream: u32, index: u32 },
}

/// Appends objects and xref sections while tracking exact offsets.
pub struct PdfBuilder {
    data: Vec<u8>,
    offsets: BTreeMap<u32, (u64, u16)>,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            data: format!("%PDF-{version}\n").into_bytes(),
            offsets: BTreeMap::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.data.len() as u64
    }

    /// Offset of the latest definition of `number`
    pub fn offset(&self, number: u32) -> u64 {
        self.offsets[&number].0
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn object(&mut self, number: u32, body: &str) -> &mut Self {
        self.object_with_generation(number, 0, body)
    }

    pub fn object_with_generation(&mut self, number: u32, generation: u16, body: &str) -> &mut Self {
        self.offsets.insert(number, (self.position(), generation));
        self.raw(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes())
    }

    /// Stream object; `/Length` is appended to `dict_entries`.
    pub fn stream(&mut self, number: u32, dict_entries: &str, data: &[u8]) -> &mut Self {
        self.offsets.insert(number, (self.position(), 0));
        let head = format!(
            "{number} 0 obj\n<< {dict_entries} /Length {} >>\nstream\n",
            data.len()
        );
        self.raw(head.as_bytes());
        self.raw(data);
        self.raw(b"\nendstream\nendobj\n")
    }

    /// Object stream holding `(number, body)` members.
    pub fn object_stream(&mut self, number: u32, members: &[(u32, &str)]) -> &mut Self {
        let mut header = String::new();
        let mut body = String::new();
        for (member, text) in members {
            header.push_str(&format!("{member} {} ", body.len()));
            body.push_str(text);
            body.push(' ');
        }
        let content = format!("{header}{body}");
        let entries = format!("/Type /ObjStm /N {} /First {}", members.len(), header.len());
        self.stream(number, &entries, content.as_bytes())
    }

    /// Classic `xref` section for `rows`, then the trailer and `startxref`.
    /// Returns the section offset.
    pub fn xref_table(&mut self, rows: &[(u32, Row)], trailer: &str) -> u64 {
        let start = self.position();
        let mut text = String::from("xref\n");
        for run in runs(rows) {
            text.push_str(&format!("{} {}\n", run[0].0, run.len()));
            for (number, row) in run {
                let line = match row {
                    Row::InUse => {
                        let (offset, generation) = self.offsets[number];
                        format!("{offset:010} {generation:05} n \n")
                    }
                    Row::Free { next, generation } => format!("{next:010} {generation:05} f \n"),
                    Row::Compressed { .. } => panic!("classic tables cannot hold compressed rows"),
                };
                text.push_str(&line);
            }
        }
        text.push_str(&format!("trailer\n<< {trailer} >>\n"));
        self.raw(text.as_bytes());
        self.startxref(start);
        start
    }

    /// Uncompressed xref stream (`/W [1 4 2]`) as object `number`, then
    /// `startxref`. Returns the section offset.
    pub fn xref_stream(&mut self, number: u32, rows: &[(u32, Row)], extra: &str) -> u64 {
        let start = self.position();
        self.offsets.insert(number, (start, 0));

        let mut data = Vec::new();
        let mut index = Vec::new();
        for run in runs(rows) {
            index.push(format!("{} {}", run[0].0, run.len()));
            for (number, row) in run {
                let (kind, field2, field3) = match row {
                    Row::InUse => {
                        let (offset, generation) = self.offsets[number];
                        (1u8, offset as u32, generation)
                    }
                    Row::Free { next, generation } => (0, *next, *generation),
                    Row::Compressed { stream, index } => (2, *stream, *index as u16),
                };
                data.push(kind);
                data.extend_from_slice(&field2.to_be_bytes());
                data.extend_from_slice(&field3.to_be_bytes());
            }
        }
        let size = rows.iter().map(|(n, _)| n + 1).max().unwrap_or(1).max(number + 1);
        let entries = format!(
            "/Type /XRef /Size {size} /W [1 4 2] /Index [{}] {extra}",
            index.join(" ")
        );
        self.stream(number, &entries, &data);
        self.startxref(start);
        start
    }

    pub fn startxref(&mut self, offset: u64) -> &mut Self {
        self.raw(format!("startxref\n{offset}\n%%EOF\n").as_bytes())
    }

    pub fn finish(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// `InUse` rows for `numbers`
pub fn in_use(numbers: impl IntoIterator<Item = u32>) -> Vec<(u32, Row)> {
    numbers.into_iter().map(|n| (n, Row::InUse)).collect()
}

/// Head of the free list
pub fn free_head() -> (u32, Row) {
    (
        0,
        Row::Free {
            next: 0,
            generation: 65535,
        },
    )
}

/// Rows grouped into runs of consecutive object numbers, in the given order
fn runs(rows: &[(u32, Row)]) -> Vec<Vec<&(u32, Row)>> {
    let mut runs: Vec<Vec<&(u32, Row)>> = Vec::new();
    for row in rows {
        match runs.last_mut() {
            Some(run) if run[run.len() - 1].0 + 1 == row.0 => run.push(row),
            _ => runs.push(vec![row]),
        }
    }
    runs
}

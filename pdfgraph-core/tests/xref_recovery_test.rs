//! Tests for opening damaged files through xref recovery

mod common;

use common::{free_head, in_use, init_tracing, PdfBuilder};
use pdfgraph::objects::ObjectId;
use pdfgraph::parser::{ParseError, ParseOptions, XRefEntry};
use pdfgraph::recovery::XRefRecovery;
use pdfgraph::{PdfError, PdfFile};
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;

fn text(file: &mut PdfFile, number: u32) -> Option<String> {
    file.objects_mut()
        .resolve(ObjectId::new(number, 0))
        .as_string()
        .map(|s| s.to_text())
}

/// Objects of a one-page document, without any xref data
fn page_objects(b: &mut PdfBuilder) {
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>");
}

/// Create a corrupted PDF without xref table or trailer
fn create_corrupted_pdf_no_xref() -> NamedTempFile {
    let mut b = PdfBuilder::new("1.4");
    page_objects(&mut b);
    b.raw(b"%%EOF");

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&b.finish()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_missing_xref_is_rebuilt_from_catalog() {
    init_tracing();
    let file = create_corrupted_pdf_no_xref();

    let mut pdf = PdfFile::open(file.path()).unwrap();
    assert!(pdf.is_recovered());
    assert_eq!(pdf.catalog().unwrap(), ObjectId::new(1, 0));
    assert_eq!(pdf.trailer().size().unwrap(), 4);
    assert_eq!(pdf.page_count().unwrap(), 1);
}

#[test]
fn test_strict_mode_reports_broken_chain() {
    let file = create_corrupted_pdf_no_xref();
    let result = PdfFile::open_with_options(file.path(), ParseOptions::strict());
    assert!(matches!(result, Err(PdfError::Parse(_))));
}

#[test]
fn test_truncated_xref_stream_is_recovered() {
    init_tracing();
    let mut b = PdfBuilder::new("1.5");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object_stream(3, &[(4, "(packed)")]);

    // Seven rows of seven bytes declared, far fewer present
    let xref = b.position();
    b.stream(
        5,
        "/Type /XRef /Size 7 /W [1 4 2] /Root 1 0 R",
        &[1, 0, 0, 0, 9, 0, 0, 1, 0, 0],
    );
    b.startxref(xref);
    let data = b.finish();

    let strict = PdfFile::with_options(Cursor::new(data.clone()), ParseOptions::strict());
    assert!(matches!(
        strict,
        Err(PdfError::Parse(ParseError::InvalidXRef(_)))
    ));

    let mut file = PdfFile::from_source(Cursor::new(data)).unwrap();
    assert!(file.is_recovered());
    assert_eq!(file.catalog().unwrap(), ObjectId::new(1, 0));
    assert_eq!(text(&mut file, 4).as_deref(), Some("packed"));
    assert_eq!(file.page_count().unwrap(), 0);
}

#[test]
fn test_bad_startxref_uses_trailer_keyword() {
    let mut b = PdfBuilder::new("1.4");
    page_objects(&mut b);
    let mut rows = vec![free_head()];
    rows.extend(in_use(1..=3));
    b.xref_table(&rows, "/Size 4 /Root 1 0 R /Info 7 0 R");
    b.object(7, "<< /Producer (test) >>");
    b.startxref(3);

    let mut file = PdfFile::from_source(Cursor::new(b.finish())).unwrap();
    assert!(file.is_recovered());
    assert_eq!(file.info(), Some(ObjectId::new(7, 0)));
    assert_eq!(file.trailer().size().unwrap(), 8);
    assert_eq!(file.page_count().unwrap(), 1);
}

#[test]
fn test_wrong_offsets_relocate_lazily() {
    let mut b = PdfBuilder::new("1.4");
    page_objects(&mut b);
    b.object(4, "(relocated)");
    let xref = b.position();
    let mut table = String::from("xref\n0 5\n0000000000 65535 f \n");
    for number in 1..=4 {
        table.push_str(&format!("{:010} 00000 n \n", b.offset(number) + 2));
    }
    table.push_str("trailer\n<< /Size 5 /Root 1 0 R >>\n");
    b.raw(table.as_bytes()).startxref(xref);
    let data = b.finish();

    let mut file = PdfFile::from_source(Cursor::new(data.clone())).unwrap();
    assert!(!file.is_recovered());
    assert_eq!(text(&mut file, 4).as_deref(), Some("relocated"));
    assert_eq!(file.page_count().unwrap(), 1);

    let mut strict = PdfFile::with_options(Cursor::new(data), ParseOptions::strict()).unwrap();
    assert!(strict
        .objects_mut()
        .try_resolve(ObjectId::new(4, 0))
        .is_err());
    assert!(strict.objects_mut().resolve(ObjectId::new(4, 0)).is_null());
}

#[test]
fn test_scan_prefers_direct_definitions() {
    let mut b = PdfBuilder::new("1.5");
    b.object_stream(1, &[(2, "(packed two)"), (3, "(packed three)")])
        .object(3, "(direct three)");
    let recovered = XRefRecovery::new(&ParseOptions::lenient()).scan_bytes(&b.finish());

    assert!(matches!(
        recovered.entries.get(&2),
        Some(XRefEntry::Compressed { stream_number: 1, index: 0 })
    ));
    assert!(matches!(
        recovered.entries.get(&3),
        Some(XRefEntry::InUse { .. })
    ));
    assert_eq!(recovered.stats.object_streams, 1);
}

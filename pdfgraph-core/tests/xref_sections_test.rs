//! Tests for reading multi-section cross-reference data: incremental
//! updates, `/Prev` loops, hybrid files, xref streams and linearized files.

mod common;

use common::{free_head, in_use, init_tracing, PdfBuilder, Row};
use pdfgraph::objects::ObjectId;
use pdfgraph::parser::{ParseOptions, XRefEntry, XRefReader};
use pdfgraph::PdfFile;
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn open_strict(data: Vec<u8>) -> PdfFile {
    init_tracing();
    PdfFile::with_options(Cursor::new(data), ParseOptions::strict()).unwrap()
}

fn text(file: &mut PdfFile, number: u32) -> Option<String> {
    file.objects_mut()
        .resolve(ObjectId::new(number, 0))
        .as_string()
        .map(|s| s.to_text())
}

fn base_rows(last: u32) -> Vec<(u32, Row)> {
    let mut rows = vec![free_head()];
    rows.extend(in_use(1..=last));
    rows
}

/// Catalog, empty page tree and one string object
fn base_file() -> (PdfBuilder, u64) {
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "(old)");
    let first = b.xref_table(&base_rows(3), "/Size 4 /Root 1 0 R /Info 9 0 R");
    (b, first)
}

#[test]
fn test_newest_section_wins() {
    let (mut b, first) = base_file();
    b.object(3, "(new)");
    b.xref_table(&in_use([3]), &format!("/Size 4 /Root 1 0 R /Prev {first}"));

    let mut file = open_strict(b.finish());
    assert!(!file.is_recovered());
    assert_eq!(text(&mut file, 3).as_deref(), Some("new"));
    assert_eq!(file.page_count().unwrap(), 0);
    // Keys of older trailers survive when the newer trailer lacks them
    assert_eq!(file.info(), Some(ObjectId::new(9, 0)));
}

#[test]
fn test_free_entry_in_update_hides_object() {
    let (mut b, first) = base_file();
    b.xref_table(
        &[(
            3,
            Row::Free {
                next: 0,
                generation: 1,
            },
        )],
        &format!("/Size 4 /Root 1 0 R /Prev {first}"),
    );

    let mut file = open_strict(b.finish());
    assert!(file.objects().is_free(ObjectId::new(3, 0)));
    assert!(file.objects_mut().resolve(ObjectId::new(3, 0)).is_null());
}

#[test]
fn test_prev_loop_terminates() {
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "(old)");
    let first = b.position();
    b.xref_table(&base_rows(3), &format!("/Size 4 /Root 1 0 R /Prev {first}"));
    b.object(3, "(new)");
    let second = b.position();
    b.xref_table(
        &in_use([3]),
        &format!("/Size 4 /Root 1 0 R /Prev {first} /XRefStm {second}"),
    );

    let mut file = open_strict(b.finish());
    assert_eq!(text(&mut file, 3).as_deref(), Some("new"));
    assert_eq!(file.page_count().unwrap(), 0);
}

#[test]
fn test_section_limit_stops_chain() {
    let (mut b, first) = base_file();
    b.object(3, "(new)");
    b.xref_table(&in_use([3]), &format!("/Size 4 /Root 1 0 R /Prev {first}"));
    let data = b.finish();

    let options = ParseOptions {
        max_xref_sections: 1,
        ..ParseOptions::strict()
    };
    let mut source = Cursor::new(data);
    let table = XRefReader::new(&mut source, &options).read().unwrap();
    assert!(table.get(1).is_none());
    assert!(matches!(table.get(3), Some(XRefEntry::InUse { .. })));
}

#[test]
fn test_xref_stream_with_object_stream() {
    let mut b = PdfBuilder::new("1.5");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object_stream(3, &[(4, "(four)"), (5, "<< /Five 5 >>")]);
    let mut rows = base_rows(3);
    rows.push((4, Row::Compressed { stream: 3, index: 0 }));
    rows.push((5, Row::Compressed { stream: 3, index: 1 }));
    rows.push((6, Row::InUse));
    b.xref_stream(6, &rows, "/Root 1 0 R");

    let mut file = open_strict(b.finish());
    assert_eq!(text(&mut file, 4).as_deref(), Some("four"));
    assert_eq!(
        file.objects_mut()
            .resolve(ObjectId::new(5, 0))
            .as_dict()
            .and_then(|d| d.get_integer("Five")),
        Some(5)
    );
    assert_eq!(file.catalog().unwrap(), ObjectId::new(1, 0));
}

#[test]
fn test_hybrid_file_reads_xref_stream() {
    let mut b = PdfBuilder::new("1.5");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object_stream(4, &[(3, "(hidden from old readers)")]);
    let stream_rows = vec![
        (
            2,
            Row::Free {
                next: 0,
                generation: 1,
            },
        ),
        (3, Row::Compressed { stream: 4, index: 0 }),
        (4, Row::InUse),
        (5, Row::InUse),
    ];
    let stm = b.xref_stream(5, &stream_rows, "");
    b.xref_table(&base_rows(2), &format!("/Size 6 /Root 1 0 R /XRefStm {stm}"));

    let mut file = open_strict(b.finish());
    assert_eq!(text(&mut file, 3).as_deref(), Some("hidden from old readers"));
    // The classic table is newer than its supplemental stream
    assert!(!file.objects().is_free(ObjectId::new(2, 0)));
    assert_eq!(file.page_count().unwrap(), 0);
}

#[test]
fn test_linearized_first_page_table() {
    let linearization =
        |t: u64| format!("<< /Linearized 1 /L 0 /T {t:010} /O 0 /N 0 /H [0 0] >>");
    let first_page_section = |t: u64| {
        let mut b = PdfBuilder::new("1.4");
        b.object(1, &linearization(t)).object(4, "(first page)");
        b
    };

    // Position the first-page table lands at, independent of /T's value
    let section = first_page_section(0).position();
    // /T points past the `xref` keyword, at the subsection header
    let mut b = first_page_section(section + 5);
    b.xref_table(&in_use([4]), "/Size 5");
    b.object(2, "<< /Type /Catalog /Pages 3 0 R >>")
        .object(3, "<< /Type /Pages /Kids [] /Count 0 >>");
    b.xref_table(&base_rows(3), "/Size 5 /Root 2 0 R");

    let mut file = open_strict(b.finish());
    assert_eq!(file.catalog().unwrap(), ObjectId::new(2, 0));
    assert_eq!(text(&mut file, 4).as_deref(), Some("first page"));
}

#[test]
fn test_off_by_one_subsection() {
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    let xref = b.position();
    let rows = format!(
        "xref\n1 3\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\n",
        b.offset(1),
        b.offset(2)
    );
    b.raw(rows.as_bytes()).startxref(xref);

    let mut file = open_strict(b.finish());
    assert_eq!(file.page_count().unwrap(), 0);
}

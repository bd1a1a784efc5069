//! Saving documents, in full and as incremental updates

mod common;

use common::{free_head, in_use, PdfBuilder, Row};
use pdfgraph::objects::{Object, ObjectId, PdfString};
use pdfgraph::structure::NameTreeKind;
use pdfgraph::PdfFile;
use pretty_assertions::assert_eq;
use std::io::Cursor;
use tempfile::NamedTempFile;

fn classic_source() -> Vec<u8> {
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>")
        .object(4, "<< /Title (Draft) >>")
        .object(5, "(scratch)");
    let mut rows = vec![free_head()];
    rows.extend(in_use(1..=5));
    b.xref_table(&rows, "/Size 6 /Root 1 0 R /Info 4 0 R");
    b.finish()
}

fn open(bytes: &[u8]) -> PdfFile {
    PdfFile::from_source(Cursor::new(bytes.to_vec())).unwrap()
}

fn title(file: &mut PdfFile) -> Option<String> {
    let info = file.info()?;
    file.objects_mut()
        .resolve(info)
        .as_dict()?
        .get("Title")?
        .as_string()
        .map(|s| s.to_text())
}

#[test]
fn test_incremental_update_appends_changes() {
    let source = classic_source();
    let mut file = open(&source);
    let original_xref = file.startxref().unwrap();

    let info = file.info().unwrap();
    file.objects_mut()
        .get_mut(info)
        .and_then(Object::as_dict_mut)
        .unwrap()
        .set("Title", PdfString::from_text("Final"));
    let note = file.objects_mut().register(Object::from("added"));
    assert!(file.objects_mut().unregister(ObjectId::new(5, 0)));

    let mut out = Vec::new();
    file.save_incremental(&mut out).unwrap();

    assert!(out.starts_with(&source));
    let appended = String::from_utf8_lossy(&out[source.len()..]).into_owned();
    assert!(appended.contains(&format!("/Prev {original_xref}")));
    assert!(appended.contains("4 0 obj"));
    assert!(appended.contains("6 0 obj"));
    // Untouched objects are not repeated
    assert!(!appended.contains("2 0 obj"));
    assert!(!appended.contains("3 0 obj"));

    let mut reopened = open(&out);
    assert!(!reopened.is_recovered());
    assert!(reopened.startxref().unwrap() > source.len() as u64);
    assert_eq!(title(&mut reopened).as_deref(), Some("Final"));
    assert_eq!(
        reopened.objects_mut().resolve(note).as_string().map(|s| s.to_text()),
        Some("added".to_string())
    );
    assert!(reopened.objects().is_free(ObjectId::new(5, 0)));
    assert!(reopened.objects_mut().resolve(ObjectId::new(5, 0)).is_null());
    assert_eq!(reopened.trailer().size().unwrap(), 7);
    assert_eq!(reopened.page_count().unwrap(), 1);
}

#[test]
fn test_incremental_update_with_new_name_tree() {
    let source = classic_source();
    let mut file = open(&source);

    let tree = file.name_tree(NameTreeKind::Dests).unwrap();
    let page = file.pages().unwrap()[0];
    tree.insert(
        file.objects_mut(),
        PdfString::from("chapter1"),
        Object::Array(vec![Object::Reference(page), Object::name("Fit")].into()),
        false,
    )
    .unwrap();

    let mut out = Vec::new();
    file.save_incremental(&mut out).unwrap();

    let mut reopened = open(&out);
    let tree = reopened.name_tree(NameTreeKind::Dests).unwrap();
    assert!(!reopened.objects().is_virtual(tree.root()));
    let dest = tree
        .get(reopened.objects_mut(), &PdfString::from("chapter1"))
        .unwrap();
    assert_eq!(
        dest.as_array().and_then(|a| a.first()).cloned(),
        Some(Object::Reference(page))
    );
}

#[test]
fn test_unchanged_document_appends_empty_section() {
    let source = classic_source();
    let mut file = open(&source);

    let mut out = Vec::new();
    file.save_incremental(&mut out).unwrap();

    let mut reopened = open(&out);
    assert!(!reopened.is_recovered());
    assert_eq!(title(&mut reopened).as_deref(), Some("Draft"));
    assert_eq!(reopened.page_count().unwrap(), 1);
}

#[test]
fn test_recovered_source_gets_complete_section() {
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .raw(b"%%EOF\n");
    let source = b.finish();

    let mut file = open(&source);
    assert!(file.is_recovered());
    let extra = file.objects_mut().register(Object::Integer(99));

    let mut out = Vec::new();
    file.save_incremental(&mut out).unwrap();
    let appended = String::from_utf8_lossy(&out[source.len()..]).into_owned();
    assert!(!appended.contains("/Prev"));

    let mut reopened = open(&out);
    assert!(!reopened.is_recovered());
    assert_eq!(reopened.page_count().unwrap(), 1);
    assert_eq!(reopened.objects_mut().resolve(extra), &Object::Integer(99));
}

#[test]
fn test_full_save_expands_object_streams() {
    let mut b = PdfBuilder::new("1.5");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object_stream(3, &[(4, "(four)"), (5, "<< /Five 5 >>")]);
    let mut rows = vec![free_head()];
    rows.extend(in_use(1..=3));
    rows.push((4, Row::Compressed { stream: 3, index: 0 }));
    rows.push((5, Row::Compressed { stream: 3, index: 1 }));
    rows.push((6, Row::InUse));
    b.xref_stream(6, &rows, "/Root 1 0 R");
    let mut file = open(&b.finish());

    let mut out = Vec::new();
    file.save(&mut out).unwrap();
    let text = String::from_utf8_lossy(&out).into_owned();
    assert!(!text.contains("/ObjStm"));
    assert!(!text.contains("/XRef"));
    assert!(!text.contains("/W ["));

    let mut reopened = open(&out);
    assert!(!reopened.is_recovered());
    assert_eq!(
        reopened
            .objects_mut()
            .resolve(ObjectId::new(4, 0))
            .as_string()
            .map(|s| s.to_text()),
        Some("four".to_string())
    );
    assert_eq!(
        reopened
            .objects_mut()
            .resolve(ObjectId::new(5, 0))
            .as_dict()
            .and_then(|d| d.get_integer("Five")),
        Some(5)
    );
    assert!(reopened.objects().is_free(ObjectId::new(3, 0)));
    assert!(reopened.objects().is_free(ObjectId::new(6, 0)));
}

#[test]
fn test_save_to_path_round_trip() {
    let mut file = open(&classic_source());
    file.objects_mut().unregister(ObjectId::new(5, 0));
    let target = NamedTempFile::new().unwrap();

    file.save_to_path(target.path()).unwrap();

    let mut reopened = PdfFile::open(target.path()).unwrap();
    assert!(!reopened.is_recovered());
    assert_eq!(title(&mut reopened).as_deref(), Some("Draft"));
    assert_eq!(reopened.page_count().unwrap(), 1);
    assert_eq!(reopened.objects().free_ids(), vec![ObjectId::new(5, 1)]);
}

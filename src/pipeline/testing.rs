//! Fixture PDFs for unit tests.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Build a PDF with one text page per entry of `page_texts`.
pub fn multipage_pdf(page_texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids: Vec<ObjectId> = Vec::new();
    for text in page_texts {
        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(page_texts.len() as i64),
    });
    for page_id in &page_ids {
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
            dict.set("Parent", pages_id);
        }
    }

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("fixture pdf saves");
    buffer
}

/// Raw content stream of 1-based `page` in `doc`.
pub fn page_content(doc: &Document, page: u32) -> Vec<u8> {
    let id = doc.get_pages()[&page];
    doc.get_page_content(id).expect("page content")
}

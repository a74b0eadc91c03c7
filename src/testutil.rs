//! Test support: build small synthetic PDFs with real text content.
//!
//! Unit and integration tests need PDFs whose extracted text is known
//! exactly, without shipping binary fixtures. Pages are laid out with a
//! standard Type1 font and one text operation per line, which round-trips
//! cleanly through `lopdf`'s text extractor.
//!
//! Hidden from docs: this is fixture tooling, not part of the library API,
//! but integration tests need it linked into the public crate.

#![doc(hidden)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;

/// Build a PDF at `path` with one page per entry in `pages`; each entry's
/// lines become separate text operations on that page.
pub fn build_pdf(path: &Path, pages: &[&str]) {
    let mut doc = build_document(pages);
    doc.save(path).expect("failed to save synthetic PDF");
}

/// Build the in-memory document; callers that need to post-process (e.g.
/// corrupt a page) can save it themselves.
pub fn build_document(pages: &[&str]) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page_text in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 11.into()]),
            Operation::new("Td", vec![40.into(), 780.into()]),
        ];
        for (i, line) in page_text.lines().enumerate() {
            if i > 0 {
                operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            }
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(line)],
            ));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content encode"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// A realistic statement page: header, account line, period line, and enough
/// transaction filler for content-sampling checks.
pub fn statement_page(bank: &str, account: &str, period: &str, page_tag: &str) -> String {
    format!(
        "{bank}\n\
         Account Number: {account}\n\
         Statement Period: {period}\n\
         TRANSACTION HISTORY {page_tag}\n\
         01 APR 2024 Opening Balance 1,250.00\n\
         05 APR 2024 Direct Deposit 3,500.00\n\
         10 APR 2024 ATM Withdrawal -100.00\n\
         30 APR 2024 Closing Balance 4,650.00"
    )
}

/// A continuation page: no account-number label, just running transactions.
/// Real statements print the full account only on their opening page.
pub fn continuation_page(bank: &str, last4: &str, page_tag: &str) -> String {
    format!(
        "{bank} - Continued\n\
         Transactions for the account ending in {last4} {page_tag}\n\
         12 APR 2024 Grocery Store -156.78\n\
         18 APR 2024 Online Transfer -1,200.00\n\
         25 APR 2024 Interest Earned 12.45\n\
         Final balance with adjustments 5,115.67"
    )
}

//! Concatenating the rendered pages into the final document.

use std::{
    fs,
    path::{Path, PathBuf},
};

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::{error::BoxError, Error, Result};

pub trait DocumentMerger {
    /// Appends the pages of every document in `documents`, in order, into one document
    /// at `output`. Returns the number of pages written.
    fn merge(&self, documents: &[PathBuf], output: &Path) -> Result<usize>;
}

/// Merges PDFs in memory with lopdf. The result is first written next to `output` and
/// then moved into place, so a failed merge never leaves a half written output.
#[derive(Default)]
pub struct PdfMerger;

impl DocumentMerger for PdfMerger {
    fn merge(&self, documents: &[PathBuf], output: &Path) -> Result<usize> {
        let failed = |path: &Path, source: BoxError| Error::MergeFailed {
            output: output.to_owned(),
            path: path.to_owned(),
            source,
        };

        if documents.is_empty() {
            return Err(failed(output, "there is nothing to merge".into()));
        }

        let (mut merged, pages) = merge_documents(documents, output)?;

        let partial = partial_path(output);
        if let Err(e) = merged.save(&partial) {
            fs::remove_file(&partial).ok();
            return Err(failed(&partial, e.into()));
        }
        if let Err(e) = fs::rename(&partial, output) {
            fs::remove_file(&partial).ok();
            return Err(failed(output, e.into()));
        }

        log::info!("Output PDF with {} pages saved to {}", pages, output.display());
        Ok(pages)
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Bounds the walk up a page tree, in case it is cyclic.
const MAX_TREE_DEPTH: usize = 64;

fn merge_documents(documents: &[PathBuf], output: &Path) -> Result<(Document, usize)> {
    let failed = |path: &Path, source: BoxError| Error::MergeFailed {
        output: output.to_owned(),
        path: path.to_owned(),
        source,
    };

    let mut merged = Document::with_version("1.5");
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut max_id = 1;

    for path in documents {
        log::debug!("Adding {} to the merger", path.display());
        let mut doc = Document::load(path).map_err(|e| failed(path, e.into()))?;
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(failed(path, "the document has no pages".into()));
        }
        for page_id in page_ids {
            let page = doc
                .get_dictionary(page_id)
                .map_err(|e| failed(path, e.into()))?;
            pages.push((page_id, flatten_page(&doc, page)));
        }

        // the page trees and catalogs are replaced by new ones
        for (id, object) in doc.objects {
            match type_of(&object) {
                Some(b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline") => (),
                _ => {
                    merged.objects.insert(id, object);
                }
            }
        }
    }

    let tree_id = (max_id, 0);
    let catalog_id = (max_id + 1, 0);

    let count = pages.len();
    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    for (id, mut page) in pages {
        page.set("Parent", tree_id);
        merged.objects.insert(id, Object::Dictionary(page));
    }

    let mut tree = Dictionary::new();
    tree.set("Type", Object::Name(b"Pages".to_vec()));
    tree.set("Kids", kids);
    tree.set("Count", count as i64);
    merged.objects.insert(tree_id, Object::Dictionary(tree));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", tree_id);
    merged.objects.insert(catalog_id, Object::Dictionary(catalog));

    merged.trailer.set("Root", catalog_id);
    merged.max_id = catalog_id.0;
    merged.renumber_objects();
    merged.compress();

    Ok((merged, count))
}

/// A copy of `page` carrying every attribute it inherits, so it keeps its size and
/// resources when moved into another page tree.
fn flatten_page(doc: &Document, page: &Dictionary) -> Dictionary {
    let mut flat = page.clone();
    for key in INHERITABLE {
        if flat.has(key) {
            continue;
        }
        if let Some(value) = inherited(doc, page, key) {
            flat.set(key, value);
        }
    }
    flat
}

/// The closest value of `key` among the ancestors of `page`.
fn inherited<'a>(
    doc: &'a Document,
    page: &'a Dictionary,
    key: &[u8],
) -> Option<Object> {
    let mut node = page;
    for _ in 0..MAX_TREE_DEPTH {
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
    }
    None
}

fn type_of(object: &Object) -> Option<&[u8]> {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        Object::Stream(stream) => &stream.dict,
        _ => return None,
    };
    dict.get(b"Type").and_then(Object::as_name).ok()
}

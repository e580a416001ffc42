// NOTE: every test will complain about the functions it doesn't use
#![allow(unused)]

use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use flipbook::{
    config::{Config, PageGeometry, PageOrder},
    extract::FrameExtractor,
    merge::DocumentMerger,
    probe::DurationProbe,
    render::{Page, PageRenderer},
    Result,
};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// Returns cargo's tmpdir
pub fn cargo_tmpdir() -> PathBuf {
    PathBuf::from(option_env!("CARGO_TARGET_TMPDIR").expect("no cargo tmpdir???"))
}

/// A directory with a fake video and templates, and a config using it as the root.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("could not create temporary directory");
        let root = dir.path().canonicalize().expect("tempdir should exist");
        for file in ["video.mkv", "page.typ", "blank.typ"] {
            std::fs::write(root.join(file), "").expect("could not write fixture file");
        }

        let config = Config {
            video: root.join("video.mkv"),
            geometry: PageGeometry {
                width_in: 8.5,
                height_in: 11.0,
                margin_in: 0.25,
            },
            page_template: root.join("page.typ"),
            blank_template: root.join("blank.typ"),
            root: root.clone(),
            output: root.join("output.pdf"),
            fps: NonZeroU32::new(1).unwrap(),
            scratch_dir: root.join("tmp"),
            keep_scratch: false,
            page_order: PageOrder::ImageFirst,
            upscale: None,
        };

        Self { dir, config }
    }
}

pub struct FixedProbe(pub f64);

impl DurationProbe for FixedProbe {
    fn duration(&self, _video: &Path) -> Result<f64> {
        Ok(self.0)
    }
}

/// Writes `frames` empty frame files, or fails like ffmpeg would.
#[derive(Clone, Default)]
pub struct FakeExtractor {
    pub frames: usize,
    pub fail: bool,
    pub calls: Arc<Mutex<usize>>,
}

impl FakeExtractor {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl FrameExtractor for FakeExtractor {
    fn extract(&self, video: &Path, _fps: NonZeroU32, dest: &Path) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(flipbook::Error::ExtractionFailed {
                video: video.to_owned(),
                source: flipbook::command::run(&mut std::process::Command::new("false"))
                    .unwrap_err(),
            });
        }
        for i in 1..=self.frames {
            std::fs::write(dest.join(format!("frame_{i:04}.png")), "").unwrap();
        }
        Ok(())
    }
}

/// Remembers every page and writes a placeholder in its place.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    pub pages: Arc<Mutex<Vec<Page>>>,
    pub fail_at: Option<usize>,
}

impl RecordingRenderer {
    pub fn pages(&self) -> Vec<Page> {
        self.pages.lock().unwrap().clone()
    }
}

impl PageRenderer for RecordingRenderer {
    fn render(&self, _root: &Path, page: &Page) -> Result<()> {
        let mut pages = self.pages.lock().unwrap();
        if Some(pages.len()) == self.fail_at {
            return Err(flipbook::Error::RenderFailed {
                template: page.template.clone(),
                output: page.output.clone(),
                source: flipbook::command::run(&mut std::process::Command::new("false"))
                    .unwrap_err(),
            });
        }
        std::fs::write(&page.output, "").unwrap();
        pages.push(page.clone());
        Ok(())
    }
}

/// Remembers the order it was given and writes a placeholder output.
#[derive(Clone, Default)]
pub struct RecordingMerger {
    pub documents: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingMerger {
    pub fn documents(&self) -> Vec<PathBuf> {
        self.documents.lock().unwrap().clone()
    }
}

impl DocumentMerger for RecordingMerger {
    fn merge(&self, documents: &[PathBuf], output: &Path) -> Result<usize> {
        *self.documents.lock().unwrap() = documents.to_vec();
        std::fs::write(output, "").unwrap();
        Ok(documents.len())
    }
}

pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Writes a PDF with a single empty page that is `width` points wide.
pub fn single_page_pdf(path: &Path, width: i64) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set("Contents", Object::Reference(content_id));
    page.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(100),
        ]),
    );
    let page_id = doc.add_object(Object::Dictionary(page));

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
    pages.set("Count", Object::Integer(1));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.save(path).expect("could not save the test pdf");
}

/// Writes a PDF with a single page that inherits its size and resources from the page
/// tree. The page uses the font `/F0`, whose base font is named `font`.
pub fn inherited_page_pdf(path: &Path, width: i64, font: &str) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));

    let mut font_dict = Dictionary::new();
    font_dict.set("Type", Object::Name(b"Font".to_vec()));
    font_dict.set("Subtype", Object::Name(b"Type1".to_vec()));
    font_dict.set("BaseFont", Object::Name(font.as_bytes().to_vec()));
    let font_id = doc.add_object(Object::Dictionary(font_dict));

    let mut fonts = Dictionary::new();
    fonts.set("F0", Object::Reference(font_id));
    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(fonts));

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set("Contents", Object::Reference(content_id));
    let page_id = doc.add_object(Object::Dictionary(page));

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
    pages.set("Count", Object::Integer(1));
    pages.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(100),
        ]),
    );
    pages.set("Resources", Object::Dictionary(resources));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.save(path).expect("could not save the test pdf");
}

/// The value of `key` that applies to the page, looking up the page tree if the page
/// doesn't have its own.
fn effective<'a>(doc: &'a Document, page: ObjectId, key: &[u8]) -> &'a Object {
    let mut node = doc.get_dictionary(page).expect("page is a dictionary");
    loop {
        if let Ok(value) = node.get(key) {
            return value;
        }
        let parent = node
            .get(b"Parent")
            .and_then(Object::as_reference)
            .expect("the key is somewhere in the page tree");
        node = doc.get_dictionary(parent).expect("parent is a dictionary");
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).expect("dangling reference"),
        other => other,
    }
}

/// The effective widths of all pages of the PDF, in page order.
pub fn effective_page_widths(path: &Path) -> Vec<i64> {
    let doc = Document::load(path).expect("could not load the merged pdf");
    doc.get_pages()
        .into_values()
        .map(|id| {
            let media_box = resolve(&doc, effective(&doc, id, b"MediaBox"))
                .as_array()
                .expect("media box is an array");
            assert_eq!(4, media_box.len(), "malformed media box {media_box:?}");
            media_box[2].as_i64().expect("width is an integer")
        })
        .collect()
}

/// The base font behind `/F0` on every page of the PDF, in page order.
pub fn effective_page_fonts(path: &Path) -> Vec<String> {
    let doc = Document::load(path).expect("could not load the merged pdf");
    doc.get_pages()
        .into_values()
        .map(|id| {
            let resources = resolve(&doc, effective(&doc, id, b"Resources"))
                .as_dict()
                .expect("resources is a dictionary");
            let fonts = resolve(&doc, resources.get(b"Font").expect("page has fonts"))
                .as_dict()
                .expect("fonts is a dictionary");
            let font = resolve(&doc, fonts.get(b"F0").expect("page has /F0"))
                .as_dict()
                .expect("font is a dictionary");
            let name = font
                .get(b"BaseFont")
                .and_then(Object::as_name)
                .expect("font has a base font");
            String::from_utf8_lossy(name).into_owned()
        })
        .collect()
}

/// The widths of all pages of the PDF, in page order.
pub fn page_widths(path: &Path) -> Vec<i64> {
    let doc = Document::load(path).expect("could not load the merged pdf");
    doc.get_pages()
        .into_values()
        .map(|id| {
            let page = doc.get_dictionary(id).expect("page is a dictionary");
            let media_box = page
                .get(b"MediaBox")
                .and_then(Object::as_array)
                .expect("page has a media box");
            media_box[2].as_i64().expect("width is an integer")
        })
        .collect()
}

/// A multipart field the stub server received.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// A request the stub server received.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub fields: Vec<Field>,
}

impl Request {
    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

/// An HTTP server on localhost answering every multipart request with the same
/// response.
pub struct StubServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl StubServer {
    pub fn start(status: u16, body: impl Into<String>) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("could not bind");
        listener
            .set_nonblocking(true)
            .expect("could not make the listener non-blocking");
        let url = format!("http://{}", listener.local_addr().unwrap());

        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            status: StatusCode::from_u16(status).expect("a valid status code"),
            body: body.into(),
            requests: Arc::clone(&requests),
        };

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("could not start the stub runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)
                    .expect("could not hand the listener to tokio");
                let app = Router::new().fallback(record).with_state(state);
                axum::serve(listener, app).await.expect("the stub server died");
            });
        });

        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut fields = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        fields.push(Field {
            name,
            file_name,
            content_type,
            data,
        });
    }

    state.requests.lock().unwrap().push(Request {
        method,
        path: uri.path().to_string(),
        headers,
        fields,
    });

    (
        state.status,
        [(header::CONTENT_TYPE, "application/json")],
        state.body.clone(),
    )
}

/// Writes a real PNG of the given size.
pub fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]))
        .save(path)
        .expect("could not save the test png");
}

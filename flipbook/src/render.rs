//! Rendering single pages from Typst templates.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Component, Path, PathBuf},
    process::Command,
};

use crate::{command, config::PageGeometry, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    /// A page showing a frame
    Image,
    /// The page between two frames, only carrying the timestamp
    Blank,
}

/// One page to render, with the named inputs to give the template.
#[derive(Clone, Debug)]
pub struct Page {
    pub kind: PageKind,
    pub template: PathBuf,
    pub output: PathBuf,
    pub inputs: BTreeMap<&'static str, String>,
}

impl Page {
    /// `image_src` must be resolvable by the template, e.g., root-relative.
    pub fn image(
        template: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        image_src: &str,
        timestamp: &str,
        geometry: &PageGeometry,
    ) -> Self {
        let mut page = Self::blank(template, output, timestamp, geometry);
        page.kind = PageKind::Image;
        page.inputs.insert("imageSrc", image_src.to_string());
        page
    }

    pub fn blank(
        template: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        timestamp: &str,
        geometry: &PageGeometry,
    ) -> Self {
        let mut inputs = BTreeMap::new();
        inputs.insert("timestamp", timestamp.to_string());
        inputs.insert("width", inches(geometry.width_in));
        inputs.insert("height", inches(geometry.height_in));
        inputs.insert("margin", inches(geometry.margin_in));
        Self {
            kind: PageKind::Blank,
            template: template.into(),
            output: output.into(),
            inputs,
        }
    }
}

/// Compiles one page into a one page document.
pub trait PageRenderer {
    /// `root` is what absolute paths inside the template are resolved against.
    fn render(&self, root: &Path, page: &Page) -> Result<()>;
}

pub struct TypstRenderer {
    program: OsString,
}

impl Default for TypstRenderer {
    fn default() -> Self {
        Self::new("typst")
    }
}

impl TypstRenderer {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, root: &Path, page: &Page) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("compile").arg(&page.template).arg("--root").arg(root);
        for (key, value) in &page.inputs {
            cmd.arg("--input").arg(format!("{key}={value}"));
        }
        cmd.arg(&page.output);
        cmd
    }
}

impl PageRenderer for TypstRenderer {
    fn render(&self, root: &Path, page: &Page) -> Result<()> {
        command::run(&mut self.command(root, page)).map_err(|source| {
            Error::RenderFailed {
                template: page.template.clone(),
                output: page.output.clone(),
                source,
            }
        })?;
        Ok(())
    }
}

/// A length the templates understand, e.g., `8.5in`.
pub fn inches(value: f64) -> String {
    format!("{value}in")
}

/// The path as seen from inside a Typst project at `root`, e.g.,
/// `/tmp/images/frame_0001.png`. Both should be absolute or both relative to the same
/// directory. None if `path` is outside of `root` or is not UTF-8.
pub fn root_relative(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut result = String::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        result.push('/');
        result.push_str(part.to_str()?);
    }
    if result.is_empty() {
        return None;
    }
    Some(result)
}

//! The working directory holding everything a run produces except the output document.

use std::{
    io,
    path::{Path, PathBuf},
};

use flipbook_common::utils::fsutils;

use crate::{Error, Result};

const FRAMES_DIR: &str = "images";
const UPSCALED_DIR: &str = "upscaled";
const PAGES_DIR: &str = "pdfs";

/// Owns the scratch directory. It is removed when this is closed or dropped, unless it
/// should be kept.
#[derive(Debug)]
pub struct Scratch {
    root: PathBuf,
    keep: bool,
    done: bool,
}

impl Scratch {
    /// Creates the directory and its subdirectories. Fails if something already exists
    /// at `root`, and then leaves it untouched.
    pub fn create(root: impl Into<PathBuf>, keep: bool) -> Result<Self> {
        let root = root.into();
        fsutils::create_new_dir(&root).map_err(|source| Error::ScratchSetup {
            path: root.clone(),
            source,
        })?;

        let scratch = Self {
            root,
            keep,
            done: false,
        };
        for dir in [scratch.frames(), scratch.upscaled(), scratch.pages()] {
            fsutils::create_new_dir(&dir)
                .map_err(|source| Error::ScratchSetup { path: dir, source })?;
        }

        log::debug!("Created the scratch directory at {}", scratch.root.display());
        Ok(scratch)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn upscaled(&self) -> PathBuf {
        self.root.join(UPSCALED_DIR)
    }

    pub fn pages(&self) -> PathBuf {
        self.root.join(PAGES_DIR)
    }

    /// Removes the directory, or leaves it if it should be kept.
    pub fn close(mut self) -> io::Result<()> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> io::Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;

        if self.keep {
            log::info!("Keeping the temporary files in {}", self.root.display());
            return Ok(());
        }

        log::info!("Removing the temporary files in {}", self.root.display());
        fsutils::remove_dir_tree(&self.root)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::error!(
                "Failed to remove the scratch directory at '{}': {}",
                self.root.display(),
                e
            );
        }
    }
}

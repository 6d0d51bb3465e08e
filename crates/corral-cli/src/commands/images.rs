//! `corral images`: list image tarballs available to `run`.

use clap::Args;
use corral_common::config::RuntimeLayout;
use corral_image::ImageStore;

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the images directory cannot be read.
pub fn execute(_args: &ImagesArgs, layout: &RuntimeLayout) -> anyhow::Result<()> {
    let store = ImageStore::open(layout.images_dir());
    let images = store.list()?;
    if images.is_empty() {
        println!("No images in {}", store.root().display());
        return Ok(());
    }
    for image in images {
        println!("{image}");
    }
    Ok(())
}

//! Container workspace lifecycle.
//!
//! A workspace is the overlay a container runs on:
//!
//! ```text
//! containers/<name>/lowerLayer/<image>   read-only, unpacked image
//! containers/<name>/upperLayer           writable layer
//! containers/<name>/workLayer            overlay scratch
//! containers/<name>/mnt                  merged mount, the container root
//! ```
//!
//! plus an optional `host:container` bind mount inside the merged root.
//! Teardown mirrors creation: everything is unmounted before any directory
//! is removed, and directories go in reverse creation order.

use std::path::{Component, Path, PathBuf};

use corral_common::config::RuntimeLayout;
use corral_common::error::{CorralError, Result};
use corral_common::types::VolumeSpec;
use corral_image::{ImageStore, extract_layer};

use super::mount::{bind_mount, unmount_if_mounted};
use super::overlayfs::{OverlayConfig, mount_overlay, unmount_overlay};
use crate::mountinfo::MountTable;

/// Directories of a mounted workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Overlay layout.
    pub overlay: OverlayConfig,
    /// Bind-mounted volume, when one was requested and well formed.
    pub volume: Option<VolumeSpec>,
}

impl Workspace {
    /// The merged root the container switches into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.overlay.merged_dir
    }
}

/// Creates and destroys container workspaces under one runtime root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    layout: RuntimeLayout,
    images: ImageStore,
}

impl WorkspaceManager {
    /// Creates a manager for the given layout.
    #[must_use]
    pub fn new(layout: RuntimeLayout) -> Self {
        let images = ImageStore::open(layout.images_dir());
        Self { layout, images }
    }

    /// Builds the workspace of container `name` from `image`.
    ///
    /// A `volume` that is not `hostPath:containerPath` is ignored with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is missing, a directory cannot be
    /// created, or a mount fails. Steps already completed are left in
    /// place for [`WorkspaceManager::destroy`].
    pub fn create(&self, name: &str, image: &str, volume: Option<&str>) -> Result<Workspace> {
        let overlay = OverlayConfig {
            lower_dirs: vec![self.prepare_lower(name, image)?],
            upper_dir: create_dir(self.layout.upper_dir(name))?,
            work_dir: create_dir(self.layout.work_dir(name))?,
            merged_dir: create_dir(self.layout.merged_dir(name))?,
        };
        mount_overlay(&overlay)?;

        let volume = volume.and_then(|raw| match raw.parse::<VolumeSpec>() {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!(volume = raw, error = %e, "ignoring malformed volume");
                None
            }
        });
        if let Some(spec) = &volume {
            mount_volume(&overlay.merged_dir, spec)?;
        }

        tracing::info!(container = name, image, "workspace created");
        Ok(Workspace { overlay, volume })
    }

    /// Unpacks `image` into the lower layer of `name` unless already there.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is missing or cannot be unpacked.
    pub fn prepare_lower(&self, name: &str, image: &str) -> Result<PathBuf> {
        let lower = self.layout.lower_dir(name, image);
        if lower.is_dir() {
            tracing::debug!(lower = %lower.display(), "reusing lower layer");
            return Ok(lower);
        }
        let archive = self.images.archive(image)?;
        let layer = extract_layer(&archive, &lower)?;
        Ok(layer.path)
    }

    /// Tears down the workspace of container `name`.
    ///
    /// Every step runs even when an earlier one failed; the first failure
    /// is returned at the end. Tearing down a workspace that was never
    /// created does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first unmount or removal failure.
    pub fn destroy(&self, name: &str, volume: Option<&str>) -> Result<()> {
        self.destroy_with(name, volume, MountTable::read())
    }

    /// [`WorkspaceManager::destroy`] against an already read mount table.
    ///
    /// Without a table every unmount is attempted, and a path that turns
    /// out not to be mounted is skipped.
    fn destroy_with(&self, name: &str, volume: Option<&str>, mounts: Result<MountTable>) -> Result<()> {
        let merged = self.layout.merged_dir(name);
        let mut teardown = Teardown::default();
        let mounts = match mounts {
            Ok(mounts) => Some(mounts),
            Err(e) => {
                teardown.fail("read mount table", e);
                None
            }
        };
        let mounted = |path: &Path| mounts.as_ref().is_none_or(|m| is_mounted(m, path));

        if let Some(spec) = volume.and_then(|raw| raw.parse::<VolumeSpec>().ok()) {
            let target = volume_target(&merged, &spec);
            if mounted(&target) {
                teardown.step("unmount volume", || unmount_if_mounted(&target).map(|_| ()));
            }
        }
        if mounted(&merged) {
            teardown.step("unmount overlay", || unmount_overlay(&merged));
        }
        teardown.step("remove merged dir", || remove_dir(&merged, false));
        teardown.step("remove work dir", || remove_dir(&self.layout.work_dir(name), true));
        teardown.step("remove upper dir", || remove_dir(&self.layout.upper_dir(name), true));
        teardown.step("remove lower dir", || remove_dir(&self.layout.lower_root(name), true));

        teardown.finish()?;
        tracing::info!(container = name, "workspace destroyed");
        Ok(())
    }
}

/// Runs best-effort steps and remembers the first failure.
#[derive(Default)]
struct Teardown {
    first: Option<CorralError>,
}

impl Teardown {
    fn step(&mut self, what: &str, f: impl FnOnce() -> Result<()>) {
        if let Err(e) = f() {
            self.fail(what, e);
        }
    }

    fn fail(&mut self, what: &str, e: CorralError) {
        tracing::error!(step = what, error = %e, "workspace teardown step failed");
        self.first.get_or_insert(e);
    }

    fn finish(self) -> Result<()> {
        self.first.map_or(Ok(()), Err)
    }
}

fn create_dir(path: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&path).map_err(|e| CorralError::io(&path, e))?;
    Ok(path)
}

/// Removes `path` if present. Without `recursive` only an empty directory
/// is removed, so a mount that is still attached is never traversed.
fn remove_dir(path: &Path, recursive: bool) -> Result<()> {
    let removed = if recursive {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_dir(path)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}

/// Where a volume lands inside the merged root. Only normal components
/// are kept, so the target never leaves `merged`.
fn volume_target(merged: &Path, spec: &VolumeSpec) -> PathBuf {
    spec.container_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .fold(merged.to_path_buf(), |target, part| target.join(part))
}

fn mount_volume(merged: &Path, spec: &VolumeSpec) -> Result<()> {
    create_dir(spec.host_path.clone())?;
    let target = create_dir(volume_target(merged, spec))?;
    bind_mount(&spec.host_path, &target)?;
    tracing::info!(volume = %spec, "volume mounted");
    Ok(())
}

/// Mount table lookup tolerant of symlinked runtime roots.
fn is_mounted(mounts: &MountTable, path: &Path) -> bool {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    mounts.is_mount_point(&canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(images: &Path, name: &str) {
        std::fs::create_dir_all(images).expect("mkdir");
        let file = std::fs::File::create(images.join(format!("{name}.tar"))).expect("create");
        let mut builder = tar::Builder::new(file);
        let data = b"#!/bin/sh\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/sh", &data[..])
            .expect("append");
        builder.finish().expect("finish");
    }

    #[test]
    fn lower_layer_is_extracted_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(tmp.path());
        write_image(&layout.images_dir(), "busybox");
        let manager = WorkspaceManager::new(layout.clone());

        let lower = manager.prepare_lower("web", "busybox").expect("extract");
        assert_eq!(lower, layout.lower_dir("web", "busybox"));
        assert!(lower.join("bin/sh").is_file());

        std::fs::write(lower.join("touched"), b"").expect("write");
        let again = manager.prepare_lower("web", "busybox").expect("reuse");
        assert!(again.join("touched").exists());
    }

    #[test]
    fn missing_image_fails_before_any_directory_exists() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(tmp.path());
        let manager = WorkspaceManager::new(layout.clone());

        let err = manager.create("web", "ghost", None).expect_err("no image");
        assert!(err.is_not_found());
        assert!(!layout.upper_dir("web").exists());
    }

    #[test]
    fn destroy_of_never_created_workspace_is_noop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let manager = WorkspaceManager::new(RuntimeLayout::new(tmp.path()));
        manager.destroy("never", Some("/a:/b")).expect("noop");
    }

    #[test]
    fn destroy_removes_unmounted_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(tmp.path());
        for dir in [
            layout.lower_dir("web", "busybox"),
            layout.upper_dir("web"),
            layout.work_dir("web"),
            layout.merged_dir("web"),
        ] {
            std::fs::create_dir_all(&dir).expect("mkdir");
        }
        std::fs::write(layout.upper_dir("web").join("scratch"), b"x").expect("write");

        WorkspaceManager::new(layout.clone())
            .destroy("web", None)
            .expect("destroy");

        let leftovers: Vec<_> = std::fs::read_dir(layout.container_dir("web"))
            .expect("read")
            .flatten()
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[test]
    fn non_empty_merged_dir_is_reported_and_others_still_removed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(tmp.path());
        std::fs::create_dir_all(layout.merged_dir("web").join("etc")).expect("mkdir");
        std::fs::create_dir_all(layout.upper_dir("web")).expect("mkdir");

        let err = WorkspaceManager::new(layout.clone())
            .destroy("web", None)
            .expect_err("merged not empty");
        assert!(matches!(err, CorralError::Io { .. }));
        assert!(layout.merged_dir("web").exists());
        assert!(!layout.upper_dir("web").exists());
    }

    #[test]
    fn volume_target_is_relative_to_merged_root() {
        let spec: VolumeSpec = "/host/data:/srv/data".parse().expect("spec");
        assert_eq!(
            volume_target(Path::new("/c/mnt"), &spec),
            Path::new("/c/mnt/srv/data")
        );
    }

    #[test]
    fn volume_target_never_climbs_out_of_merged_root() {
        let spec = VolumeSpec {
            host_path: PathBuf::from("/tmp/x"),
            container_path: PathBuf::from("/../../../../etc"),
        };
        let target = volume_target(Path::new("/c/mnt"), &spec);
        assert_eq!(target, Path::new("/c/mnt/etc"));
    }

    #[test]
    fn unreadable_mount_table_still_runs_every_step() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(tmp.path());
        for dir in [
            layout.lower_dir("web", "busybox"),
            layout.upper_dir("web"),
            layout.work_dir("web"),
            layout.merged_dir("web"),
        ] {
            std::fs::create_dir_all(&dir).expect("mkdir");
        }
        let unreadable = Err(CorralError::Config {
            message: "mountinfo unavailable".into(),
        });

        let err = WorkspaceManager::new(layout.clone())
            .destroy_with("web", Some("/host:/data"), unreadable)
            .expect_err("table error is reported");
        assert!(err.to_string().contains("mountinfo unavailable"));
        assert!(!layout.merged_dir("web").exists());
        assert!(!layout.work_dir("web").exists());
        assert!(!layout.upper_dir("web").exists());
        assert!(!layout.lower_root("web").exists());
    }

    #[test]
    #[ignore = "requires root"]
    fn create_then_destroy_leaves_nothing_mounted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(tmp.path());
        write_image(&layout.images_dir(), "busybox");
        let host = tmp.path().join("host-data");
        let volume = format!("{}:/data", host.display());
        let manager = WorkspaceManager::new(layout.clone());

        let ws = manager
            .create("web", "busybox", Some(&volume))
            .expect("create");
        assert!(ws.root().join("bin/sh").is_file());
        std::fs::write(ws.root().join("data/file"), b"shared").expect("write");
        assert!(host.join("file").is_file());

        manager.destroy("web", Some(&volume)).expect("destroy");
        let mounts = MountTable::read().expect("mounts");
        assert!(!mounts
            .entries()
            .iter()
            .any(|m| m.mount_point.starts_with(layout.container_dir("web"))));
        assert_eq!(
            std::fs::read_dir(layout.container_dir("web"))
                .expect("read")
                .count(),
            0
        );
    }
}

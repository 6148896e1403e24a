//! Registry of known faces: one reference embedding per identity.
//!
//! A registry is built once, either from a directory of `name_regnum.ext`
//! images or from a [`Roster`] plus an image folder. Building never fails
//! because of a single bad image: the image is skipped and reported in
//! [`RegistryBuild::skipped`]. Only an unavailable embedding provider
//! aborts a build.

use crate::identity::{Identity, IdentityError};
use crate::provider::{EmbedError, FaceEmbedder};
use crate::roster::Roster;
use crate::types::Embedding;
use image::RgbImage;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to store image {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Provider(#[from] EmbedError),
}

/// Why an input image did not make it into the registry.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("unreadable image: {0}")]
    UnreadableImage(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("cannot derive identity: {0}")]
    AmbiguousIdentity(#[from] IdentityError),
    #[error("image file not found")]
    MissingImage,
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug)]
pub struct SkippedImage {
    /// File path, or identity key for in-memory inputs.
    pub source: String,
    pub reason: SkipReason,
}

/// Outcome of a registry build: the registry plus everything left out.
#[derive(Debug, Default)]
pub struct RegistryBuild {
    pub registry: Registry,
    pub skipped: Vec<SkippedImage>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<Identity, Embedding>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the reference embedding for `identity`.
    pub fn insert(&mut self, identity: Identity, embedding: Embedding) -> Option<Embedding> {
        self.entries.insert(identity, embedding)
    }

    pub fn get(&self, identity: &Identity) -> Option<&Embedding> {
        self.entries.get(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &Embedding)> {
        self.entries.iter()
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.entries.keys()
    }

    /// Build a registry from already-decoded images.
    pub fn build<E, I>(images: I, embedder: &mut E) -> Result<RegistryBuild, RegistryError>
    where
        E: FaceEmbedder + ?Sized,
        I: IntoIterator<Item = (Identity, RgbImage)>,
    {
        let mut build = RegistryBuild::default();
        for (identity, image) in images {
            let source = identity.key();
            build.enroll(identity, &image, source, embedder)?;
        }
        Ok(build)
    }

    /// Build a registry from every `name_regnum.{png,jpg,jpeg}` file in `dir`.
    pub fn from_directory<E>(dir: &Path, embedder: &mut E) -> Result<RegistryBuild, RegistryError>
    where
        E: FaceEmbedder + ?Sized,
    {
        let mut build = RegistryBuild::default();

        for path in image_files(dir)? {
            let source = path.display().to_string();
            let identity = match Identity::from_path(&path) {
                Ok(identity) => identity,
                Err(e) => {
                    build.skip(source, e.into());
                    continue;
                }
            };
            let image = match load_rgb(&path) {
                Ok(image) => image,
                Err(reason) => {
                    build.skip(source, reason);
                    continue;
                }
            };
            build.enroll(identity, &image, source, embedder)?;
        }

        tracing::info!(
            dir = %dir.display(),
            registered = build.registry.len(),
            skipped = build.skipped.len(),
            "built registry from image directory"
        );
        Ok(build)
    }

    /// Build a registry from a validated roster; images are resolved
    /// relative to `image_dir`.
    pub fn from_roster<E>(
        roster: &Roster,
        image_dir: &Path,
        embedder: &mut E,
    ) -> Result<RegistryBuild, RegistryError>
    where
        E: FaceEmbedder + ?Sized,
    {
        let mut build = RegistryBuild::default();

        for row in roster.rows() {
            let path = image_dir.join(&row.image_filename);
            let source = path.display().to_string();
            if !path.is_file() {
                build.skip(source, SkipReason::MissingImage);
                continue;
            }
            let image = match load_rgb(&path) {
                Ok(image) => image,
                Err(reason) => {
                    build.skip(source, reason);
                    continue;
                }
            };
            build.enroll(row.identity.clone(), &image, source, embedder)?;
        }

        tracing::info!(
            dir = %image_dir.display(),
            rows = roster.len(),
            registered = build.registry.len(),
            skipped = build.skipped.len(),
            "built registry from roster"
        );
        Ok(build)
    }
}

impl RegistryBuild {
    fn enroll<E>(
        &mut self,
        identity: Identity,
        image: &RgbImage,
        source: String,
        embedder: &mut E,
    ) -> Result<(), RegistryError>
    where
        E: FaceEmbedder + ?Sized,
    {
        let embeddings = match embedder.embed(image) {
            Ok(embeddings) => embeddings,
            Err(e @ EmbedError::Unavailable(_)) => return Err(e.into()),
            Err(e) => {
                self.skip(source, SkipReason::EmbeddingFailed(e.to_string()));
                return Ok(());
            }
        };

        let face_count = embeddings.len();
        // Only the first face is kept; providers order faces by preference.
        let Some(embedding) = embeddings.into_iter().next() else {
            self.skip(source, SkipReason::NoFaceDetected);
            return Ok(());
        };
        if face_count > 1 {
            tracing::debug!(%identity, faces = face_count, "multiple faces in registration image, keeping first");
        }

        if self.registry.insert(identity.clone(), embedding).is_some() {
            tracing::warn!(%identity, source = %source, "identity registered twice, later image replaces earlier");
        }
        Ok(())
    }

    fn skip(&mut self, source: String, reason: SkipReason) {
        tracing::warn!(source = %source, reason = %reason, "skipping registration image");
        self.skipped.push(SkippedImage { source, reason });
    }
}

/// Whether `path` has a registrable image extension (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Image files directly inside `dir`, in sorted order.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let io_err = |source: std::io::Error| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_rgb(path: &Path) -> Result<RgbImage, SkipReason> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| SkipReason::UnreadableImage(e.to_string()))
}

/// Identities registered in `dir`, derived from file names only.
///
/// No embeddings are computed, so this is cheap enough for reporting.
/// Files whose names do not parse as `name_regnum` are ignored.
pub fn registered_identities(dir: &Path) -> Result<BTreeSet<Identity>, RegistryError> {
    let mut identities = BTreeSet::new();
    for path in image_files(dir)? {
        match Identity::from_path(&path) {
            Ok(identity) => {
                identities.insert(identity);
            }
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "ignoring unparseable file name"),
        }
    }
    Ok(identities)
}

/// Store a student photo in the registry directory as `name_regnum.jpg`,
/// replacing any earlier photo of the same identity.
pub fn register_image(
    dir: &Path,
    identity: &Identity,
    image: &RgbImage,
) -> Result<PathBuf, RegistryError> {
    fs::create_dir_all(dir).map_err(|source| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(format!("{}.jpg", identity.key()));
    image
        .save_with_format(&path, image::ImageFormat::Jpeg)
        .map_err(|source| RegistryError::Store {
            path: path.clone(),
            source,
        })?;
    remove_stale(dir, identity, &path)?;

    tracing::info!(%identity, path = %path.display(), "registered student photo");
    Ok(path)
}

/// Copy an existing image file into the registry directory under the
/// identity's key, keeping its (lower-cased) extension.
pub fn store_image_file(
    dir: &Path,
    identity: &Identity,
    source_path: &Path,
) -> Result<PathBuf, RegistryError> {
    let ext = source_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "jpg".to_string());

    fs::create_dir_all(dir).map_err(|source| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(format!("{}.{ext}", identity.key()));
    fs::copy(source_path, &path).map_err(|source| RegistryError::Io {
        path: path.clone(),
        source,
    })?;
    remove_stale(dir, identity, &path)?;
    Ok(path)
}

/// Remove every other photo of `identity`; only called once `keep` is on disk.
fn remove_stale(dir: &Path, identity: &Identity, keep: &Path) -> Result<(), RegistryError> {
    for path in image_files(dir)? {
        if path != keep && Identity::from_path(&path).ok().as_ref() == Some(identity) {
            fs::remove_file(&path).map_err(|source| RegistryError::Io {
                path: path.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// One face per image, embedding = the top-left pixel; black means no face.
    struct PixelEmbedder;

    impl FaceEmbedder for PixelEmbedder {
        fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
            let Rgb([r, g, b]) = *image.get_pixel(0, 0);
            if (r, g, b) == (0, 0, 0) {
                return Ok(Vec::new());
            }
            Ok(vec![Embedding::new(vec![r as f32, g as f32, b as f32])])
        }
    }

    struct DeadEmbedder;

    impl FaceEmbedder for DeadEmbedder {
        fn embed(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
            Err(EmbedError::Unavailable("model not loaded".into()))
        }
    }

    fn solid(r: u8, g: u8, b: u8) -> RgbImage {
        RgbImage::from_pixel(4, 4, Rgb([r, g, b]))
    }

    fn id(key: &str) -> Identity {
        Identity::from_key(key).unwrap()
    }

    #[test]
    fn test_build_skips_faceless_images() {
        let images = vec![(id("Alice_101"), solid(10, 0, 0)), (id("Bob_102"), solid(0, 0, 0))];
        let build = Registry::build(images, &mut PixelEmbedder).unwrap();
        assert_eq!(build.registry.len(), 1);
        assert!(build.registry.contains(&id("Alice_101")));
        assert_eq!(build.skipped.len(), 1);
        assert!(matches!(build.skipped[0].reason, SkipReason::NoFaceDetected));
    }

    #[test]
    fn test_build_last_write_wins() {
        let images = vec![(id("Alice_101"), solid(10, 0, 0)), (id("Alice_101"), solid(20, 0, 0))];
        let build = Registry::build(images, &mut PixelEmbedder).unwrap();
        assert_eq!(build.registry.len(), 1);
        assert_eq!(build.registry.get(&id("Alice_101")).unwrap().values, vec![20.0, 0.0, 0.0]);
    }

    #[test]
    fn test_build_aborts_when_provider_unavailable() {
        let images = vec![(id("Alice_101"), solid(10, 0, 0))];
        let err = Registry::build(images, &mut DeadEmbedder).unwrap_err();
        assert!(matches!(err, RegistryError::Provider(EmbedError::Unavailable(_))));
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a_1.JPG")));
        assert!(is_image_file(Path::new("a_1.jpeg")));
        assert!(!is_image_file(Path::new("a_1.gif")));
        assert!(!is_image_file(Path::new("a_1")));
    }

    #[test]
    fn test_register_image_replaces_previous_photo() {
        let dir = tempfile::TempDir::new().unwrap();
        let alice = id("Alice_101");
        let old = dir.path().join("Alice_101.png");
        solid(10, 0, 0).save(&old).unwrap();

        let path = register_image(dir.path(), &alice, &solid(200, 0, 0)).unwrap();
        assert_eq!(path, dir.path().join("Alice_101.jpg"));
        assert!(!old.exists());

        let ids = registered_identities(dir.path()).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![alice]);
    }

    #[test]
    fn test_registered_identities_ignores_bad_names() {
        let dir = tempfile::TempDir::new().unwrap();
        solid(1, 1, 1).save(dir.path().join("Bob_102.png")).unwrap();
        solid(1, 1, 1).save(dir.path().join("nobody.png")).unwrap();
        std::fs::write(dir.path().join("notes_1.txt"), "x").unwrap();

        let ids = registered_identities(dir.path()).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&id("Bob_102")));
    }

    #[test]
    fn test_store_image_file_keeps_extension() {
        let src = tempfile::TempDir::new().unwrap();
        let dest = tempfile::TempDir::new().unwrap();
        let photo = src.path().join("IMG_0042.PNG");
        solid(30, 0, 0).save_with_format(&photo, image::ImageFormat::Png).unwrap();

        let path = store_image_file(dest.path(), &id("Mary_Jane_204"), &photo).unwrap();
        assert_eq!(path, dest.path().join("Mary_Jane_204.png"));
        assert_eq!(image::open(&path).unwrap().to_rgb8(), solid(30, 0, 0));
    }

    #[test]
    fn test_roster_missing_image_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        solid(10, 0, 0).save(dir.path().join("alice.png")).unwrap();
        let roster = Roster::from_reader(
            "Name,Register Number,Image Filename\nAlice,101,alice.png\nBob,102,bob.png\n".as_bytes(),
        )
        .unwrap();

        let build = Registry::from_roster(&roster, dir.path(), &mut PixelEmbedder).unwrap();
        assert_eq!(build.registry.identities().collect::<Vec<_>>(), vec![&id("Alice_101")]);
        assert_eq!(build.skipped.len(), 1);
        assert!(matches!(build.skipped[0].reason, SkipReason::MissingImage));
        assert!(build.skipped[0].source.ends_with("bob.png"));
    }

    #[test]
    fn test_failed_store_keeps_current_photo() {
        let dir = tempfile::TempDir::new().unwrap();
        let alice = id("Alice_101");
        let current = dir.path().join("Alice_101.png");
        solid(10, 0, 0).save(&current).unwrap();

        let missing = dir.path().join("no-such-photo.jpg");
        assert!(matches!(
            store_image_file(dir.path(), &alice, &missing),
            Err(RegistryError::Io { .. })
        ));
        assert!(current.exists());
        assert!(registered_identities(dir.path()).unwrap().contains(&alice));
    }

    #[test]
    fn test_store_over_same_extension_keeps_file() {
        let src = tempfile::TempDir::new().unwrap();
        let dest = tempfile::TempDir::new().unwrap();
        let photo = src.path().join("new.png");
        solid(40, 0, 0).save(&photo).unwrap();
        solid(10, 0, 0).save(dest.path().join("Alice_101.png")).unwrap();

        let path = store_image_file(dest.path(), &id("Alice_101"), &photo).unwrap();
        assert_eq!(image::open(&path).unwrap().to_rgb8(), solid(40, 0, 0));
    }
}

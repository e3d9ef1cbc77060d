//! Archive validation and extraction.

use crate::compression::Compression;
use crate::error::{ErrorKind, Result};
use crate::format::{Archive, Format};
use crate::path::validate as validate_path;
use exn::ResultExt;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tar::EntryType;
use tracing::instrument;

/// File type bits of a Unix mode.
const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

/// Summary of a successful extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Number of regular files written.
    pub files: usize,
    /// Number of directories created (explicit entries and intermediate parents).
    pub directories: usize,
    /// Sum of the uncompressed sizes of all written files.
    pub bytes: u64,
}

/// A structurally valid package held in memory.
///
/// Construct with [`Package::open`], which sniffs the format and validates
/// every entry *before* anything is written; [`Package::extract_to`] then
/// writes it out. Splitting the two means an invalid package never leaves
/// partial output behind.
#[derive(Debug)]
pub struct Package<'a> {
    /// Tar content as fetched, or zip content with any compression layer
    /// already removed (zip needs random access).
    data: Cow<'a, [u8]>,
    format: Format,
    entries: Vec<PathBuf>,
}

impl<'a> Package<'a> {
    /// Sniff and validate a package.
    ///
    /// Validation requires that:
    /// - a known archive signature is present (see [`Format::sniff`]),
    /// - the archive can be read to the end without corruption,
    /// - every entry path is relative and stays inside the package root,
    /// - every entry is a regular file or a directory,
    /// - no path is used both as a file and as a directory, and
    /// - an entry named `manifest` exists at the package root.
    #[instrument(level = "debug", skip(bytes), fields(size = bytes.len()))]
    pub fn open(bytes: &'a [u8], manifest: &str) -> Result<Self> {
        let format = Format::sniff(bytes)?;
        let mut layout = Layout::default();
        let data = match format.archive {
            Archive::Tar => {
                let reader = format.compression.wrap_reader(Cursor::new(bytes))?;
                let mut archive = tar::Archive::new(reader);
                for entry in archive.entries().or_raise(|| ErrorKind::InvalidData)? {
                    let entry = entry.or_raise(|| ErrorKind::InvalidData)?;
                    let raw = entry.path().or_raise(|| ErrorKind::InvalidData)?.into_owned();
                    let path = validate_path(&raw)?;
                    let is_dir = match entry.header().entry_type() {
                        EntryType::Regular | EntryType::Continuous => false,
                        EntryType::Directory => true,
                        // Extended headers are consumed by the tar crate itself and
                        // never surface here; anything else is a link or a device.
                        _ => exn::bail!(ErrorKind::UnsupportedEntry(raw)),
                    };
                    layout.insert(path, is_dir)?;
                }
                Cow::Borrowed(bytes)
            },
            Archive::Zip => {
                let data = match format.compression {
                    Compression::None => Cow::Borrowed(bytes),
                    compression => Cow::Owned(decompress(compression, bytes)?),
                };
                {
                    let mut archive = zip::ZipArchive::new(Cursor::new(&*data)).or_raise(|| ErrorKind::InvalidData)?;
                    for index in 0..archive.len() {
                        let file = archive.by_index(index).or_raise(|| ErrorKind::InvalidData)?;
                        let raw = PathBuf::from(file.name());
                        let path = validate_path(&raw)?;
                        // Only archives written on Unix record a file type.
                        let file_type = file.unix_mode().map(|mode| mode & S_IFMT);
                        if !matches!(file_type, None | Some(0 | S_IFREG | S_IFDIR)) {
                            exn::bail!(ErrorKind::UnsupportedEntry(raw));
                        }
                        layout.insert(path, file.is_dir())?;
                    }
                }
                data
            },
        };
        if !layout.files.contains(Path::new(manifest)) {
            exn::bail!(ErrorKind::MissingManifest(manifest.to_string()));
        }
        Ok(Self {
            data,
            format,
            entries: layout.entries,
        })
    }

    /// Detected format of the package.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Validated, normalized entry paths in archive order (directories included).
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Extract every entry below `destination`, which must already exist.
    ///
    /// Intermediate directories are created as needed, so archives that omit
    /// explicit directory entries extract correctly.
    #[instrument(level = "debug", skip(self), fields(format = %self.format, destination = %destination.display()))]
    pub fn extract_to(&self, destination: &Path) -> Result<Extracted> {
        let mut stats = Extracted::default();
        match self.format.archive {
            Archive::Tar => {
                let reader = self.format.compression.wrap_reader(Cursor::new(&*self.data))?;
                let mut archive = tar::Archive::new(reader);
                for entry in archive.entries().or_raise(|| ErrorKind::InvalidData)? {
                    let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
                    let relative = validate_path(entry.path().or_raise(|| ErrorKind::InvalidData)?)?;
                    let is_dir = entry.header().entry_type().is_dir();
                    extract_entry(destination, &relative, is_dir, &mut entry, &mut stats)?;
                }
            },
            Archive::Zip => {
                let mut archive = zip::ZipArchive::new(Cursor::new(&*self.data)).or_raise(|| ErrorKind::InvalidData)?;
                for index in 0..archive.len() {
                    let mut file = archive.by_index(index).or_raise(|| ErrorKind::InvalidData)?;
                    let relative = validate_path(file.name())?;
                    let is_dir = file.is_dir();
                    extract_entry(destination, &relative, is_dir, &mut file, &mut stats)?;
                }
            },
        }
        tracing::debug!(files = stats.files, directories = stats.directories, bytes = stats.bytes, "Package extracted");
        Ok(stats)
    }
}

/// Files and directories a package creates, directories including those
/// implied by a file's parents.
#[derive(Debug, Default)]
struct Layout {
    files: HashSet<PathBuf>,
    directories: HashSet<PathBuf>,
    entries: Vec<PathBuf>,
}

impl Layout {
    fn insert(&mut self, path: PathBuf, is_dir: bool) -> Result<()> {
        // `ancestors()` ends with the empty path, which is the package root.
        for parent in path.ancestors().skip(1).filter(|parent| !parent.as_os_str().is_empty()) {
            if self.files.contains(parent) {
                exn::bail!(ErrorKind::Conflict(path));
            }
            self.directories.insert(parent.to_path_buf());
        }
        let conflict = match is_dir {
            true => self.files.contains(&path),
            false => self.directories.contains(&path),
        };
        if conflict {
            exn::bail!(ErrorKind::Conflict(path));
        }
        match is_dir {
            true => self.directories.insert(path.clone()),
            false => self.files.insert(path.clone()),
        };
        self.entries.push(path);
        Ok(())
    }
}

fn decompress(compression: Compression, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    compression.wrap_reader(bytes)?.read_to_end(&mut data).or_raise(|| ErrorKind::InvalidData)?;
    Ok(data)
}

fn extract_entry<R: Read>(
    destination: &Path,
    relative: &Path,
    is_dir: bool,
    entry: &mut R,
    stats: &mut Extracted,
) -> Result<()> {
    if is_dir {
        stats.directories += create_dirs(destination, relative)?;
        return Ok(());
    }
    if let Some(parent) = relative.parent() {
        stats.directories += create_dirs(destination, parent)?;
    }
    stats.bytes += write_file(entry, &destination.join(relative), relative)?;
    stats.files += 1;
    Ok(())
}

/// Create `relative` (and any missing parents) below `root`, returning how
/// many directories did not previously exist.
fn create_dirs(root: &Path, relative: &Path) -> Result<usize> {
    let mut created = 0;
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => created += 1,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => {},
            Err(e) if is_conflict(&e) => exn::bail!(ErrorKind::Conflict(relative.to_path_buf())),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
        }
    }
    Ok(created)
}

fn write_file<R: Read>(entry: &mut R, target: &Path, relative: &Path) -> Result<u64> {
    let file = match File::create(target) {
        Ok(file) => file,
        Err(e) if is_conflict(&e) => exn::bail!(ErrorKind::Conflict(relative.to_path_buf())),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
    };
    let mut writer = BufWriter::new(file);
    // A failing read here means the archive stream itself is corrupt, which
    // validation could not see without decompressing every payload.
    let copied = io::copy(entry, &mut writer).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            exn::Exn::from(ErrorKind::InvalidData)
        },
        _ => exn::Exn::from(ErrorKind::Io),
    })?;
    writer.flush().or_raise(|| ErrorKind::Io)?;
    Ok(copied)
}

/// A path the package uses as a file is already a directory, or the other way round.
fn is_conflict(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AlreadyExists | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use rstest::rstest;
    use tempfile::TempDir;
    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    const MANIFEST: &str = "imsmanifest.xml";

    fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            append(&mut builder, path, data);
        }
        builder.into_inner().unwrap()
    }

    fn zipball(files: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
        let options = SimpleFileOptions::default().compression_method(method);
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, data) in files {
            match path.ends_with('/') {
                true => writer.add_directory(*path, options).unwrap(),
                false => {
                    writer.start_file(*path, options).unwrap();
                    writer.write_all(data).unwrap();
                },
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[rstest]
    #[case::plain(false)]
    #[case::gzipped(true)]
    fn test_round_trip(#[case] compressed: bool) {
        let manifest = b"<manifest identifier=\"m\"/>".to_vec();
        let page = b"<html><body>a</body></html>".to_vec();
        let mut bytes = tarball(&[(MANIFEST, &manifest[..]), ("res/a.html", &page[..])]);
        if compressed {
            bytes = gzip(&bytes);
        }

        let package = Package::open(&bytes, MANIFEST).unwrap();
        assert_eq!(package.entries(), &[PathBuf::from(MANIFEST), PathBuf::from("res/a.html")]);

        let dir = TempDir::new().unwrap();
        let stats = package.extract_to(dir.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.bytes, (manifest.len() + page.len()) as u64);
        assert_eq!(fs::read(dir.path().join(MANIFEST)).unwrap(), manifest);
        assert_eq!(fs::read(dir.path().join("res/a.html")).unwrap(), page);
    }

    #[test]
    fn test_explicit_directory_entries() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "res/", io::empty()).unwrap();
        append(&mut builder, MANIFEST, b"m");
        append(&mut builder, "res/deep/b.css", b"body{}");
        let bytes = builder.into_inner().unwrap();

        let dir = TempDir::new().unwrap();
        let stats = Package::open(&bytes, MANIFEST).unwrap().extract_to(dir.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 2);
        assert!(dir.path().join("res/deep/b.css").is_file());
    }

    #[rstest]
    #[case::stored(CompressionMethod::Stored, false)]
    #[case::deflated(CompressionMethod::Deflated, false)]
    #[case::gzipped(CompressionMethod::Stored, true)]
    fn test_zip_round_trip(#[case] method: CompressionMethod, #[case] compressed: bool) {
        let manifest = b"<manifest identifier=\"m\"/>".to_vec();
        let page = b"<html><body>a</body></html>".to_vec();
        let mut bytes = zipball(
            &[(MANIFEST, &manifest[..]), ("res/", &b""[..]), ("res/a.html", &page[..])],
            method,
        );
        if compressed {
            bytes = gzip(&bytes);
        }

        let package = Package::open(&bytes, MANIFEST).unwrap();
        assert_eq!(package.format().archive, Archive::Zip);
        assert_eq!(
            package.entries(),
            &[PathBuf::from(MANIFEST), PathBuf::from("res"), PathBuf::from("res/a.html")]
        );

        let dir = TempDir::new().unwrap();
        let stats = package.extract_to(dir.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.bytes, (manifest.len() + page.len()) as u64);
        assert_eq!(fs::read(dir.path().join(MANIFEST)).unwrap(), manifest);
        assert_eq!(fs::read(dir.path().join("res/a.html")).unwrap(), page);
    }

    #[test]
    fn test_zip_missing_manifest() {
        let bytes = zipball(&[("res/a.html", &b"a"[..])], CompressionMethod::Stored);
        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingManifest(MANIFEST.to_string()));
    }

    #[test]
    fn test_zip_unsafe_path() {
        let bytes = zipball(&[(MANIFEST, &b"m"[..]), ("../evil.sh", &b"x"[..])], CompressionMethod::Stored);
        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::UnsafePath(PathBuf::from("../evil.sh")));
    }

    #[test]
    fn test_zip_symlink_rejected() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(MANIFEST, SimpleFileOptions::default()).unwrap();
        writer.write_all(b"m").unwrap();
        writer.add_symlink("escape", "/etc/passwd", SimpleFileOptions::default()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedEntry(PathBuf::from("escape")));
    }

    #[test]
    fn test_zip_corrupt_central_directory() {
        let bytes = zipball(&[(MANIFEST, &b"m"[..])], CompressionMethod::Stored);
        // Keep the local header, drop the central directory.
        let err = Package::open(&bytes[..40], MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
        assert!(err.is_invalid_package());
    }

    #[rstest]
    #[case::file_then_children(&[(MANIFEST, &b"m"[..]), ("res", &b"x"[..]), ("res/a.html", &b"a"[..])], "res/a.html")]
    #[case::children_then_file(&[(MANIFEST, &b"m"[..]), ("res/a.html", &b"a"[..]), ("res", &b"x"[..])], "res")]
    fn test_file_directory_conflict(#[case] files: &[(&str, &[u8])], #[case] conflicting: &str) {
        let err = Package::open(&tarball(files), MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::Conflict(PathBuf::from(conflicting)));
        assert!(err.is_invalid_package());

        let err = Package::open(&zipball(files, CompressionMethod::Stored), MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::Conflict(PathBuf::from(conflicting)));
    }

    #[test]
    fn test_file_over_explicit_directory_conflicts() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, MANIFEST, b"m");
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "res/", io::empty()).unwrap();
        append(&mut builder, "res", b"x");
        let bytes = builder.into_inner().unwrap();

        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::Conflict(PathBuf::from("res")));
    }

    #[test]
    fn test_extract_into_conflicting_destination() {
        let bytes = tarball(&[(MANIFEST, &b"m"[..]), ("res/a.html", &b"a"[..])]);
        let package = Package::open(&bytes, MANIFEST).unwrap();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("res"), b"in the way").unwrap();

        let err = package.extract_to(dir.path()).unwrap_err();
        assert_eq!(*err, ErrorKind::Conflict(PathBuf::from("res")));
        assert!(err.is_invalid_package());
    }

    #[test]
    fn test_missing_manifest() {
        let bytes = tarball(&[("res/a.html", &b"a"[..])]);
        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingManifest(MANIFEST.to_string()));
        assert!(err.is_invalid_package());
    }

    #[test]
    fn test_manifest_must_be_at_root() {
        let bytes = tarball(&[("nested/imsmanifest.xml", &b"m"[..])]);
        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert!(matches!(*err, ErrorKind::MissingManifest(_)));
    }

    #[test]
    fn test_not_an_archive() {
        let err = Package::open(b"plain document", MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::UnrecognizedFormat);
    }

    #[test]
    fn test_symlink_rejected() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, MANIFEST, b"m");
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder.append_link(&mut header, "escape", "/etc/passwd").unwrap();
        let bytes = builder.into_inner().unwrap();

        let err = Package::open(&bytes, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedEntry(PathBuf::from("escape")));
    }

    #[test]
    fn test_truncated_archive_is_invalid() {
        let bytes = tarball(&[(MANIFEST, &b"m"[..]), ("b.bin", &[7u8; 8192][..])]);
        // Cut inside the payload of the second entry.
        let truncated = &bytes[..512 * 3 + 1000];
        let err = Package::open(truncated, MANIFEST).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
        assert!(err.is_invalid_package());
    }
}

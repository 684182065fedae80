use crate::error::{ExtractionError, Result};
use crate::module::ModuleVersion;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// A module archive available locally, plus the digest it must hash to
#[derive(Debug, Clone)]
pub struct ModuleSource {
    module: ModuleVersion,
    archive: PathBuf,
    sha256: String,
}

impl ModuleSource {
    /// Describe an existing archive, hashing it to record the expected digest
    pub fn from_archive(module: ModuleVersion, archive: impl Into<PathBuf>) -> Result<Self> {
        let archive = archive.into();
        let sha256 = sha256_file(&archive)?;
        Ok(Self {
            module,
            archive,
            sha256,
        })
    }

    /// Describe an archive with a known digest (`sha256:<hex>`)
    pub fn with_digest(
        module: ModuleVersion,
        archive: impl Into<PathBuf>,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            module,
            archive: archive.into(),
            sha256: sha256.into(),
        }
    }

    /// Module identity contained in the archive
    pub fn module(&self) -> &ModuleVersion {
        &self.module
    }

    /// Path of the archive
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Expected digest, formatted as `sha256:<hex>`
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

/// Hash a file, returning `sha256:<hex>`
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Builds module archives in the module zip layout
pub struct ModuleArchive;

impl ModuleArchive {
    /// Write a synthetic module archive into `dest_dir`
    ///
    /// The archive holds `manifest`, a LICENSE, a README and `files` source files of
    /// `file_size` bytes spread over eight package directories, all under the
    /// module's `path@version/` prefix.
    pub fn synthesize(
        dest_dir: &Path,
        module: &ModuleVersion,
        manifest: &str,
        files: usize,
        file_size: usize,
    ) -> Result<ModuleSource> {
        std::fs::create_dir_all(dest_dir)?;
        let archive_path = dest_dir.join(format!("{}.zip", module.escaped_version()));

        let file = std::fs::File::create(&archive_path)?;
        let mut writer = ::zip::ZipWriter::new(file);
        let options = ::zip::write::FileOptions::default()
            .compression_method(::zip::CompressionMethod::Deflated);
        let prefix = module.archive_prefix();

        let zip_err = |e: ::zip::result::ZipError| ExtractionError::InvalidArchive {
            archive: archive_path.clone(),
            reason: format!("failed to write archive: {e}"),
        };

        writer
            .start_file(format!("{prefix}{manifest}"), options)
            .map_err(zip_err)?;
        writer.write_all(format!("module {}\n\ngo 1.21\n", module.path()).as_bytes())?;

        writer
            .start_file(format!("{prefix}LICENSE"), options)
            .map_err(zip_err)?;
        writer.write_all(b"Copyright fixture authors. All rights reserved.\n")?;

        writer
            .start_file(format!("{prefix}README.md"), options)
            .map_err(zip_err)?;
        writer.write_all(format!("# {module}\n").as_bytes())?;

        for i in 0..files {
            writer
                .start_file(format!("{prefix}pkg{}/file{i}.go", i % 8), options)
                .map_err(zip_err)?;
            writer.write_all(&source_body(i, file_size))?;
        }

        writer.finish().map_err(zip_err)?;

        let source = ModuleSource::from_archive(module.clone(), archive_path.clone())?;
        info!(
            %module,
            archive = ?archive_path,
            files = files + 3,
            digest = source.sha256(),
            "synthesized module archive"
        );
        Ok(source)
    }
}

fn source_body(index: usize, size: usize) -> Vec<u8> {
    let header = format!("package pkg{}\n\n// file {index}\n", index % 8);
    let mut body = header.into_bytes();
    let filler = format!("var v{index} = {index}\n");
    while body.len() < size {
        body.extend_from_slice(filler.as_bytes());
    }
    body.truncate(size.max(1));
    body
}

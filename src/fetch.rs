//! Remote data store client.
//!
//! Mirrors the download-cache layout of the atlases and the structural
//! template under the input directory, and only hits the network when a file
//! of that layout is missing.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use zip::ZipArchive;

use crate::config::{Dimension, Resolution};
use crate::error::{PipelineError, Result};

const ICBM152_URL: &str =
    "https://www.bic.mni.mcgill.ca/~vfonov/icbm/2009/mni_icbm152_nlin_sym_09a_nifti.zip";
const ICBM152_DIR: &str = "icbm152_2009";
const ICBM152_SUBDIR: &str = "mni_icbm152_nlin_sym_09a";
const DIFUMO_DIR: &str = "difumo_atlases";

/// OSF project holding the archive of each dictionary size.
fn difumo_osf_id(dim: Dimension) -> &'static str {
    match dim.get() {
        64 => "pqu9r",
        128 => "wjvd5",
        256 => "3vrct",
        512 => "9b76y",
        _ => "34792",
    }
}

pub fn difumo_url(dim: Dimension) -> String {
    format!("https://osf.io/{}/download", difumo_osf_id(dim))
}

// ---------------------------------------------------------------------------
// Cache layout
// ---------------------------------------------------------------------------

/// Local files of one DiFuMo atlas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifumoFiles {
    pub maps: PathBuf,
    pub labels: PathBuf,
}

impl DifumoFiles {
    pub fn under(data_dir: &Path, dim: Dimension, res: Resolution) -> Self {
        let root = data_dir.join(DIFUMO_DIR).join(dim.to_string());
        DifumoFiles {
            maps: root.join(format!("{}mm", res.mm())).join("maps.nii.gz"),
            labels: root.join(format!("labels_{dim}_dictionary.csv")),
        }
    }

    fn all(&self) -> [&Path; 2] {
        [&self.maps, &self.labels]
    }
}

/// Local tissue probability maps of the ICBM152 2009 template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icbm152Files {
    pub gm: PathBuf,
    pub wm: PathBuf,
    pub csf: PathBuf,
}

impl Icbm152Files {
    pub fn under(data_dir: &Path) -> Self {
        let root = data_dir.join(ICBM152_DIR).join(ICBM152_SUBDIR);
        let tissue = |t: &str| root.join(format!("mni_icbm152_{t}_tal_nlin_sym_09a.nii"));
        Icbm152Files {
            gm: tissue("gm"),
            wm: tissue("wm"),
            csf: tissue("csf"),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.gm, &self.wm, &self.csf]
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Cache-first downloader.
///
/// Offline fetchers never open a connection and report uncached files as
/// missing files.
pub struct Fetcher {
    client: Option<reqwest::blocking::Client>,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| PipelineError::fetch("http client", e))?;
        Ok(Fetcher {
            client: Some(client),
        })
    }

    pub fn offline() -> Self {
        Fetcher { client: None }
    }

    /// Make sure the maps and labels of one atlas are on disk.
    pub fn difumo(&self, data_dir: &Path, dim: Dimension, res: Resolution) -> Result<DifumoFiles> {
        let files = DifumoFiles::under(data_dir, dim, res);
        self.ensure(&difumo_url(dim), &data_dir.join(DIFUMO_DIR), &files.all())?;
        Ok(files)
    }

    /// Make sure the GM/WM/CSF maps of the template are on disk.
    pub fn icbm152(&self, data_dir: &Path) -> Result<Icbm152Files> {
        let files = Icbm152Files::under(data_dir);
        self.ensure(ICBM152_URL, &data_dir.join(ICBM152_DIR), &files.all())?;
        Ok(files)
    }

    fn ensure(&self, url: &str, dest_dir: &Path, expected: &[&Path]) -> Result<()> {
        let missing: Vec<&Path> = expected.iter().copied().filter(|p| !p.is_file()).collect();
        if missing.is_empty() {
            debug!("using cached files in {}", dest_dir.display());
            return Ok(());
        }
        let Some(client) = &self.client else {
            let source = io::Error::new(io::ErrorKind::NotFound, "not in the offline cache");
            return Err(PipelineError::io(missing[0], source));
        };

        info!("downloading {url}");
        let bytes = download(client, url)?;
        fs::create_dir_all(dest_dir).map_err(|e| PipelineError::io(dest_dir, e))?;
        let written = extract_zip(&bytes, dest_dir).map_err(|e| match e {
            ExtractError::Io(path, source) => PipelineError::io(&path, source),
            ExtractError::Zip(z) => PipelineError::fetch(url, format!("bad archive: {z}")),
        })?;
        info!("extracted {written} files to {}", dest_dir.display());

        if let Some(still) = expected.iter().find(|p| !p.is_file()) {
            return Err(PipelineError::fetch(
                url,
                format!("archive does not contain {}", still.display()),
            ));
        }
        Ok(())
    }
}

fn download(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .map_err(|e| PipelineError::fetch(url, e))?;
    if !response.status().is_success() {
        return Err(PipelineError::fetch(
            url,
            format!("HTTP {}", response.status()),
        ));
    }
    let bytes = response.bytes().map_err(|e| PipelineError::fetch(url, e))?;
    Ok(bytes.to_vec())
}

enum ExtractError {
    Io(PathBuf, io::Error),
    Zip(zip::result::ZipError),
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        ExtractError::Zip(e)
    }
}

/// Unpack an in-memory zip under `dest_dir`. Entries that would land
/// outside of it are skipped. Returns the number of files written.
fn extract_zip(bytes: &[u8], dest_dir: &Path) -> std::result::Result<usize, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let outpath = match entry.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => continue,
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| ExtractError::Io(outpath.clone(), e))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::Io(parent.to_path_buf(), e))?;
        }
        let mut outfile =
            File::create(&outpath).map_err(|e| ExtractError::Io(outpath.clone(), e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| ExtractError::Io(outpath.clone(), e))?;
        written += 1;
    }
    Ok(written)
}

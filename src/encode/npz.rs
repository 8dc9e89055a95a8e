//! Compressed NumPy array bundles (`np.savez_compressed` layout).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::audio::features::{Spectrogram, SpectrogramPair};
use crate::error::{PrepareError, PrepareResult};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

/// Serialize a 2-D `f32` array as an `.npy` (format 1.0, little endian, C order).
pub fn npy_bytes(array: &Spectrogram) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        array.rows, array.cols
    );
    // magic (6) + version (2) + header length (2) + header, padded to 64 with a trailing newline
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(NPY_MAGIC.len() + 4 + header.len() + array.data.len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in &array.data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Write named arrays into a Deflate-compressed `.npz` archive.
///
/// Entries carry a fixed timestamp so identical inputs produce identical files.
pub fn write_npz(path: &Path, arrays: &[(&str, &Spectrogram)]) -> PrepareResult<()> {
    let file = File::create(path).map_err(|e| PrepareError::io(path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for (name, array) in arrays {
        zip.start_file(format!("{name}.npy"), options)
            .map_err(|e| PrepareError::encode(path, e))?;
        zip.write_all(&npy_bytes(array))
            .map_err(|e| PrepareError::io(path, e))?;
    }

    let mut inner = zip.finish().map_err(|e| PrepareError::encode(path, e))?;
    inner.flush().map_err(|e| PrepareError::io(path, e))?;
    Ok(())
}

/// Persist a pair as `spec` (mel) and `lspec` (linear).
pub fn write_spectrograms(path: &Path, pair: &SpectrogramPair) -> PrepareResult<()> {
    write_npz(path, &[("spec", &pair.mel), ("lspec", &pair.linear)])?;
    log::debug!(
        "Wrote {} (mel {:?}, linear {:?})",
        path.display(),
        pair.mel.shape(),
        pair.linear.shape()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sample(rows: usize, cols: usize) -> Spectrogram {
        Spectrogram {
            rows,
            cols,
            data: (0..rows * cols).map(|i| i as f32 * 0.5 - 1.0).collect(),
        }
    }

    #[test]
    fn npy_header_is_aligned() {
        let bytes = npy_bytes(&sample(80, 101));
        assert_eq!(&bytes[..6], NPY_MAGIC);
        assert_eq!(&bytes[6..8], &[1, 0]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<f4', 'fortran_order': False, 'shape': (80, 101), }"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 80 * 101 * 4);
    }

    #[test]
    fn npz_contains_named_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mels.npz");
        let pair = SpectrogramPair {
            mel: sample(3, 4),
            linear: sample(5, 4),
        };
        write_spectrograms(&path, &pair).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["lspec.npy", "spec.npy"]);

        let mut entry = archive.by_name("spec.npy").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, npy_bytes(&pair.mel));
    }

    #[test]
    fn output_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.npz");
        let b = dir.path().join("b.npz");
        let pair = SpectrogramPair {
            mel: sample(2, 2),
            linear: sample(3, 2),
        };
        write_spectrograms(&a, &pair).unwrap();
        write_spectrograms(&b, &pair).unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }
}

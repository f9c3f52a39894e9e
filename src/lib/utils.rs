//! Utility functions.
use std::io::{BufReader, Read};
use std::path::Path;

use fgoxide::io::Io;

use crate::fastq::FastqReader;

pub mod built_info {
    use lazy_static::lazy_static;
    include!(concat!(env!("OUT_DIR"), "/built.rs"));

    /// Get a software version string including
    ///   - Git commit hash
    ///   - Git dirty info (whether the repo had uncommitted changes)
    ///   - Cargo package version if no git info found
    fn get_software_version() -> String {
        let prefix = if let Some(s) = GIT_COMMIT_HASH {
            format!("{}-{}", PKG_VERSION, s[0..8].to_owned())
        } else {
            // This shouldn't happen
            PKG_VERSION.to_string()
        };
        let suffix = match GIT_DIRTY {
            Some(true) => "-dirty",
            _ => "",
        };
        format!("{}{}", prefix, suffix)
    }

    lazy_static! {
        /// Version of the software with git hash
        pub static ref VERSION: String = get_software_version();
    }
}

/// The extensions stripped from an input's file name to name its outputs, outermost first.
const INPUT_EXTENSIONS: &[&str] = &[".gz", ".fastq", ".fq"];

pub fn s(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

/// Open a FASTQ file for reading, decompressing it if the name ends in `.gz`.
///
/// The reader is not `Send`, so open it on the thread that consumes it.
pub fn open_fastq<P: AsRef<Path>>(
    path: P,
) -> Result<FastqReader<BufReader<Box<dyn Read>>>, fgoxide::FgError> {
    let reader = Io::default().new_reader(&path)?;
    Ok(FastqReader::new(reader))
}

/// The file name of `path` with FASTQ and compression extensions removed, used to name the
/// per-input outputs.
pub fn input_stem<P: AsRef<Path>>(path: P) -> String {
    let mut name = path
        .as_ref()
        .file_name()
        .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
    for ext in INPUT_EXTENSIONS {
        if let Some(stripped) = name.strip_suffix(ext) {
            name = stripped.to_string();
        }
    }
    name
}


#[cfg(test)]
mod test {
    use rstest::rstest;
    use tempfile::tempdir;

    use super::{input_stem, open_fastq};
    use crate::utils::test_commons::{fixture_reads, write_fastq};

    #[rstest]
    #[case("/data/sample_R1.fastq.gz", "sample_R1")]
    #[case("sample_R2.fq", "sample_R2")]
    #[case("reads.txt", "reads.txt")]
    #[case("lane1.fastq", "lane1")]
    fn test_input_stem(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(input_stem(path), expected);
    }

    #[rstest]
    #[case("reads.fastq")]
    #[case("reads.fastq.gz")]
    fn test_open_fastq(#[case] name: &str) {
        let dir = tempdir().unwrap();
        let reads = fixture_reads();
        let path = write_fastq(&reads, dir.path().join(name));
        let read_back: Vec<_> = open_fastq(&path).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(read_back, reads);
    }
}

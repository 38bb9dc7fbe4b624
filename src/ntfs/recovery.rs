//! Data-run recovery writer
//!
//! Materializes a file from its extent map by copying raw clusters off the
//! volume, in run order, into an output file. Sparse runs become zeros and
//! the output is padded with zeros to exactly the declared file size.

use crate::error::{Result, UndeleteError};
use crate::ntfs::structs::DataRun;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

#[cfg(windows)]
use crate::ntfs::winapi;

/// The copy buffer covers this many clusters.
pub const RECOVERY_CHUNK_CLUSTERS: u64 = 16;

/// Validate the recovery arguments, returning the normalized drive letter.
///
/// Each check fails before any I/O happens.
pub fn check_recovery_args(
    drive: &str,
    cluster_size: u64,
    file_size: u64,
    output_path: &Path,
) -> Result<char> {
    let letter = crate::ntfs::normalize_drive(drive)?;
    if cluster_size == 0 {
        return Err(UndeleteError::InvalidArgument(
            "cluster size must be positive".to_string(),
        ));
    }
    if file_size == 0 {
        return Err(UndeleteError::InvalidArgument(
            "target file size is zero".to_string(),
        ));
    }
    if output_path.as_os_str().is_empty() {
        return Err(UndeleteError::InvalidArgument(
            "output path is required".to_string(),
        ));
    }
    Ok(letter)
}

/// Copy `file_size` bytes described by `runs` from `volume` into `out`.
///
/// Runs are consumed strictly in order. A sparse run, or any run whose LCN
/// is not positive, is written as zeros without touching the volume. Runs
/// with a non-positive length are skipped. When the runs map fewer bytes
/// than `file_size`, the tail is zero-padded; on success the output has
/// received exactly `file_size` bytes.
///
/// A volume read of zero bytes mid-run is a fatal error: the run map points
/// past the end of the volume.
pub fn copy_runs<R, W>(
    volume: &mut R,
    out: &mut W,
    runs: &[DataRun],
    cluster_size: u64,
    file_size: u64,
) -> Result<()>
where
    R: Read + Seek,
    W: Write,
{
    let buffer_len = (cluster_size * RECOVERY_CHUNK_CLUSTERS) as usize;
    let mut buffer = vec![0u8; buffer_len];
    let zeros = vec![0u8; buffer_len];

    let mut remaining = file_size;
    for run in runs {
        if remaining == 0 {
            break;
        }
        if run.length <= 0 {
            continue;
        }

        let run_bytes = run.length as u64 * cluster_size;
        let to_copy = run_bytes.min(remaining);

        if run.sparse || run.lcn <= 0 {
            write_zeros(out, &zeros, to_copy)?;
        } else {
            let offset = run.lcn as u64 * cluster_size;
            volume
                .seek(SeekFrom::Start(offset))
                .map_err(|source| UndeleteError::Io {
                    step: "SetFilePointerEx",
                    source,
                })?;

            let mut processed = 0u64;
            while processed < to_copy {
                let chunk = (to_copy - processed).min(buffer_len as u64) as usize;
                let read = volume
                    .read(&mut buffer[..chunk])
                    .map_err(|source| UndeleteError::Io {
                        step: "ReadFile",
                        source,
                    })?;
                if read == 0 {
                    return Err(UndeleteError::Io {
                        step: "ReadFile",
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "unexpected end of volume data while reading run",
                        ),
                    });
                }

                out.write_all(&buffer[..read])
                    .map_err(|source| UndeleteError::Io {
                        step: "WriteFile",
                        source,
                    })?;
                processed += read as u64;
            }
        }

        remaining -= to_copy;
    }

    // Declared size exceeds the mapped clusters; pad to the exact length.
    write_zeros(out, &zeros, remaining)
}

fn write_zeros<W: Write>(out: &mut W, zeros: &[u8], mut count: u64) -> Result<()> {
    while count > 0 {
        let chunk = count.min(zeros.len() as u64) as usize;
        out.write_all(&zeros[..chunk])
            .map_err(|source| UndeleteError::Io {
                step: "WriteFile",
                source,
            })?;
        count -= chunk as u64;
    }
    Ok(())
}

/// Recover a file from its run map into `output_path` on the local
/// filesystem.
///
/// Opens the volume read-only and the output with create/truncate
/// semantics; both handles are released on every exit path, errors
/// included. On success the output file is exactly `file_size` bytes long.
#[cfg(windows)]
pub fn recover_data_runs(
    drive: &str,
    runs: &[DataRun],
    cluster_size: u64,
    file_size: u64,
    output_path: &Path,
) -> Result<()> {
    let letter = check_recovery_args(drive, cluster_size, file_size, output_path)?;

    let volume = winapi::open_volume(letter)?;
    let mut reader = winapi::VolumeReader::new(volume);

    let mut out = std::fs::File::create(output_path).map_err(|source| {
        UndeleteError::OutputOpen(output_path.display().to_string(), source)
    })?;

    copy_runs(&mut reader, &mut out, runs, cluster_size, file_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CLUSTER: u64 = 4096;

    // A volume image where every cluster is filled with a byte derived from
    // its own LCN, so reads are easy to attribute.
    fn build_volume(clusters: u64) -> Vec<u8> {
        let mut image = vec![0u8; (clusters * CLUSTER) as usize];
        for lcn in 0..clusters {
            let fill = (lcn % 251) as u8;
            let start = (lcn * CLUSTER) as usize;
            image[start..start + CLUSTER as usize].fill(fill);
        }
        image
    }

    fn run(lcn: i64, length: i64, sparse: bool) -> DataRun {
        DataRun {
            vcn_start: 0,
            lcn,
            length,
            sparse,
        }
    }

    #[test]
    fn recovers_exact_cluster_bytes() {
        let image = build_volume(256);
        let mut volume = Cursor::new(&image);
        let mut out = Vec::new();

        let runs = [run(100, 2, false), run(200, 1, false)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, 3 * CLUSTER).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&image[(100 * CLUSTER) as usize..(102 * CLUSTER) as usize]);
        expected.extend_from_slice(&image[(200 * CLUSTER) as usize..(201 * CLUSTER) as usize]);
        assert_eq!(out, expected);
    }

    #[test]
    fn sparse_run_writes_zeros_without_volume_reads() {
        // An empty volume image: any read attempt would fail the test
        let mut volume = Cursor::new(Vec::new());
        let mut out = Vec::new();

        let runs = [run(0, 2, true)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, 2 * CLUSTER).unwrap();

        assert_eq!(out.len(), (2 * CLUSTER) as usize);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn nonpositive_lcn_treated_as_sparse() {
        let mut volume = Cursor::new(Vec::new());
        let mut out = Vec::new();

        let runs = [run(-5, 1, false)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, CLUSTER).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn pads_to_declared_file_size() {
        let image = build_volume(8);
        let mut volume = Cursor::new(&image);
        let mut out = Vec::new();

        let runs = [run(1, 1, false)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, 5000).unwrap();

        assert_eq!(out.len(), 5000);
        assert_eq!(&out[..CLUSTER as usize], &image[CLUSTER as usize..(2 * CLUSTER) as usize]);
        assert!(out[CLUSTER as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn file_size_truncates_final_run() {
        let image = build_volume(8);
        let mut volume = Cursor::new(&image);
        let mut out = Vec::new();

        // Two clusters mapped, but the file only claims 4100 bytes
        let runs = [run(2, 2, false)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, 4100).unwrap();
        assert_eq!(out.len(), 4100);
    }

    #[test]
    fn data_then_sparse_tail() {
        let image = build_volume(1024);
        let mut volume = Cursor::new(&image);
        let mut out = Vec::new();

        let runs = [run(1000, 3, false), run(1000, 2, true)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, 5 * CLUSTER).unwrap();

        assert_eq!(out.len(), (5 * CLUSTER) as usize);
        assert_eq!(
            &out[..(3 * CLUSTER) as usize],
            &image[(1000 * CLUSTER) as usize..(1003 * CLUSTER) as usize]
        );
        assert!(out[(3 * CLUSTER) as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_length_runs_are_skipped() {
        let image = build_volume(8);
        let mut volume = Cursor::new(&image);
        let mut out = Vec::new();

        let runs = [run(3, 0, false), run(4, -2, false), run(1, 1, false)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, CLUSTER).unwrap();
        assert_eq!(out, &image[CLUSTER as usize..(2 * CLUSTER) as usize]);
    }

    #[test]
    fn short_volume_is_unexpected_eof() {
        // Volume ends before the run does
        let image = build_volume(4);
        let mut volume = Cursor::new(&image);
        let mut out = Vec::new();

        let runs = [run(3, 2, false)];
        let err = copy_runs(&mut volume, &mut out, &runs, CLUSTER, 2 * CLUSTER).unwrap_err();
        match err {
            UndeleteError::Io { step, source } => {
                assert_eq!(step, "ReadFile");
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn writes_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovered.bin");

        let image = build_volume(8);
        let mut volume = Cursor::new(&image);
        let mut out = std::fs::File::create(&path).unwrap();

        let runs = [run(2, 1, false)];
        copy_runs(&mut volume, &mut out, &runs, CLUSTER, 5000).unwrap();
        drop(out);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 5000);
        assert_eq!(
            &written[..CLUSTER as usize],
            &image[(2 * CLUSTER) as usize..(3 * CLUSTER) as usize]
        );
    }

    mod preconditions {
        use super::*;

        #[test]
        fn empty_drive_rejected() {
            let err =
                check_recovery_args("", CLUSTER, 100, Path::new("out.bin")).unwrap_err();
            assert!(matches!(err, UndeleteError::InvalidArgument(_)));
        }

        #[test]
        fn zero_cluster_size_rejected() {
            let err = check_recovery_args("C", 0, 100, Path::new("out.bin")).unwrap_err();
            assert!(matches!(err, UndeleteError::InvalidArgument(_)));
        }

        #[test]
        fn zero_file_size_rejected() {
            let err = check_recovery_args("C", CLUSTER, 0, Path::new("out.bin")).unwrap_err();
            assert!(matches!(err, UndeleteError::InvalidArgument(_)));
        }

        #[test]
        fn empty_output_path_rejected() {
            let err = check_recovery_args("C", CLUSTER, 100, Path::new("")).unwrap_err();
            assert!(matches!(err, UndeleteError::InvalidArgument(_)));
        }

        #[test]
        fn valid_arguments_normalize_drive() {
            let letter = check_recovery_args("d", CLUSTER, 100, Path::new("out.bin")).unwrap();
            assert_eq!(letter, 'D');
        }
    }
}

use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File stem for a recording started at `at`, e.g. "240218-09-30-00".
pub fn recording_stem<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%y%m%d-%H-%M-%S").to_string()
}

/// Output path for a recording started at `at`.
///
/// Names have one-second resolution. If a file with that name already exists
/// (a second recording started within the same second) a `-1`, `-2`, ...
/// suffix is appended instead of overwriting it.
pub fn recording_path<Tz: TimeZone>(dir: &Path, at: &DateTime<Tz>, ext: &str) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    let stem = recording_stem(at);
    let path = dir.join(format!("{stem}.{ext}"));
    if !path.exists() {
        return path;
    }

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}-{n}.{ext}"));
        if !candidate.exists() {
            warn!(
                taken = %path.display(),
                path = %candidate.display(),
                "recording name already used this second, adding suffix"
            );
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at() -> DateTime<Utc> {
        // 2026-02-18T09:30:05Z
        Utc.with_ymd_and_hms(2026, 2, 18, 9, 30, 5).unwrap()
    }

    #[test]
    fn stem_format() {
        assert_eq!(recording_stem(&at()), "260218-09-30-05");
    }

    #[test]
    fn path_in_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("Record");
        let path = recording_path(&out, &at(), "avi");
        assert_eq!(path, out.join("260218-09-30-05.avi"));
    }

    #[test]
    fn same_second_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("260218-09-30-05.avi"), b"").unwrap();
        let second = recording_path(dir.path(), &at(), "avi");
        assert_eq!(second, dir.path().join("260218-09-30-05-1.avi"));

        std::fs::write(&second, b"").unwrap();
        let third = recording_path(dir.path(), &at(), "avi");
        assert_eq!(third, dir.path().join("260218-09-30-05-2.avi"));
    }
}

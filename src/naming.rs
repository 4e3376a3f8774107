use std::path::Path;

use log::{debug, error, info};

use crate::task::Task;
use crate::util::has_extension;

/// Appends a sniffed extension to the task's file name and storage path when
/// the name carries none. Best effort: any failure leaves the task untouched.
pub fn fix_extension(task: &mut Task, staged_path: &Path) {
    if has_extension(task.file_name()) {
        return;
    }
    match infer::get_from_path(staged_path) {
        Ok(Some(kind)) => {
            let ext = kind.extension();
            info!(
                "Detected {} for {}; appending .{ext}",
                kind.mime_type(),
                task.file_name()
            );
            task.file.name = format!("{}.{ext}", task.file.name);
            task.storage_path = format!("{}.{ext}", task.storage_path);
        }
        Ok(None) => debug!("Unknown content type for {:?}", staged_path),
        Err(err) => error!("Failed to detect mime type: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RemoteFile;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    fn task(name: &str) -> Task {
        Task::new(
            RemoteFile {
                location: "https://example.com/x".into(),
                size: 12,
                name: name.into(),
                supports_ranges: true,
            },
            "local",
            format!("pics/{name}"),
            1,
            2,
        )
    }

    #[test]
    fn appends_detected_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = tmp.path().join("staged");
        std::fs::write(&staged, PNG_HEADER).unwrap();

        let mut task = task("image");
        fix_extension(&mut task, &staged);
        assert_eq!(task.file_name(), "image.png");
        assert_eq!(task.storage_path, "pics/image.png");
    }

    #[test]
    fn keeps_existing_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = tmp.path().join("staged");
        std::fs::write(&staged, PNG_HEADER).unwrap();

        let mut task = task("image.bin");
        fix_extension(&mut task, &staged);
        assert_eq!(task.file_name(), "image.bin");
        assert_eq!(task.storage_path, "pics/image.bin");
    }

    #[test]
    fn unknown_content_leaves_name() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = tmp.path().join("staged");
        std::fs::write(&staged, b"just some words").unwrap();

        let mut task = task("notes");
        fix_extension(&mut task, &staged);
        assert_eq!(task.file_name(), "notes");
        assert_eq!(task.storage_path, "pics/notes");
    }

    #[test]
    fn unreadable_file_leaves_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mut task = task("ghost");
        fix_extension(&mut task, &tmp.path().join("missing"));
        assert_eq!(task.file_name(), "ghost");
    }
}

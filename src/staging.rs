use std::fs::{File, OpenOptions};
use std::io::{self, Read};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt as WindowsFileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[cfg(target_os = "linux")]
use nix::errno::Errno;
#[cfg(target_os = "linux")]
use nix::fcntl::{fallocate, FallocateFlags};
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Invoked with `(bytes_done, total_bytes)` as staged data lands on disk.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Local file receiving a download through positional writes.
///
/// Writes to disjoint regions may run concurrently. The byte counter and the
/// callback threshold live behind one mutex so that the callback fires at most
/// once per write and at most once per interval boundary, which caps a transfer
/// at roughly one hundred callbacks.
pub struct StagingFile {
    file: File,
    path: PathBuf,
    size: u64,
    callback_interval: u64,
    progress_callback: Option<ProgressCallback>,
    counter: Mutex<WriteCounter>,
}

struct WriteCounter {
    done: u64,
    next_callback_at: u64,
}

impl StagingFile {
    pub fn open(
        path: &Path,
        declared_size: u64,
        progress_callback: Option<ProgressCallback>,
    ) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(path)?;
        preallocate(&file, declared_size)?;

        let callback_interval = (declared_size / 100).max(1);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size: declared_size,
            callback_interval,
            progress_callback,
            counter: Mutex::new(WriteCounter {
                done: 0,
                next_callback_at: callback_interval,
            }),
        })
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        write_all_at(&self.file, buf, offset)?;
        let written = buf.len();

        let mut counter = self.counter.lock().unwrap_or_else(|err| err.into_inner());
        counter.done += written as u64;
        if counter.done >= counter.next_callback_at {
            if let Some(callback) = &self.progress_callback {
                callback(counter.done, self.size);
            }
            counter.next_callback_at = (counter.done / self.callback_interval + 1)
                .saturating_mul(self.callback_interval);
        }
        Ok(written)
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    pub fn close(self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn written(&self) -> u64 {
        self.counter
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .done
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn callback_interval(&self) -> u64 {
        self.callback_interval
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], position: u64) -> io::Result<()> {
    file.write_all_at(buf, position)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut position: u64) -> io::Result<()> {
    while !buf.is_empty() {
        let written = file.seek_write(buf, position)?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write staged data",
            ));
        }
        buf = &buf[written..];
        position += written as u64;
    }
    Ok(())
}

fn preallocate(file: &File, size: u64) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        if size > 0 {
            if let Err(err) = fallocate(
                file.as_raw_fd(),
                FallocateFlags::FALLOC_FL_KEEP_SIZE,
                0,
                size as i64,
            ) {
                if err != Errno::ENOTSUP && err != Errno::EINVAL {
                    return Err(io::Error::from(err));
                }
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (file, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counting_callback() -> (ProgressCallback, Arc<AtomicU64>, Arc<Mutex<Vec<u64>>>) {
        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let seen_clone = seen.clone();
        let callback: ProgressCallback = Arc::new(move |done, _total| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            seen_clone.lock().unwrap().push(done);
        });
        (callback, calls, seen)
    }

    #[test]
    fn open_truncates_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        std::fs::write(&path, b"old contents").unwrap();
        let staged = StagingFile::open(&path, 4, None).unwrap();
        staged.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing/staged");
        assert!(StagingFile::open(&path, 4, None).is_err());
    }

    #[test]
    fn positional_writes_land_at_offsets() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        let staged = StagingFile::open(&path, 6, None).unwrap();
        staged.write_at(b"def", 3).unwrap();
        staged.write_at(b"abc", 0).unwrap();
        assert_eq!(staged.written(), 6);

        let mut buf = [0u8; 6];
        assert_eq!(staged.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"abcdef");
        staged.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn callback_fires_once_per_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        let (callback, calls, seen) = counting_callback();
        let staged = StagingFile::open(&path, 1000, Some(callback)).unwrap();
        assert_eq!(staged.callback_interval(), 10);

        let chunk = [7u8; 3];
        let mut offset = 0u64;
        while offset + 3 <= 997 {
            staged.write_at(&chunk, offset).unwrap();
            offset += 3;
        }
        let total = staged.written();
        assert_eq!(total, offset);
        assert_eq!(calls.load(Ordering::SeqCst), total / 10);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn callback_never_exceeds_one_hundred_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        let (callback, calls, _) = counting_callback();
        let staged = StagingFile::open(&path, 10_000, Some(callback)).unwrap();
        for offset in 0..10_000u64 {
            staged.write_at(&[1], offset).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn oversized_write_skips_to_next_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        let (callback, calls, seen) = counting_callback();
        let staged = StagingFile::open(&path, 1000, Some(callback)).unwrap();
        staged.write_at(&[0u8; 35], 0).unwrap();
        staged.write_at(&[0u8; 1], 35).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        staged.write_at(&[0u8; 4], 36).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec![35, 40]);
    }

    #[test]
    fn tiny_declared_size_uses_unit_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        let (callback, calls, _) = counting_callback();
        let staged = StagingFile::open(&path, 0, Some(callback)).unwrap();
        assert_eq!(staged.callback_interval(), 1);
        staged.write_at(b"ab", 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_writers_keep_counter_consistent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged");
        let (callback, calls, seen) = counting_callback();
        let total: u64 = 8 * 1000;
        let staged = Arc::new(StagingFile::open(&path, total, Some(callback)).unwrap());

        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let staged = staged.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let offset = worker * 1000 + i * 10;
                        staged.write_at(&[worker as u8; 10], offset).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(staged.written(), total);
        assert_eq!(calls.load(Ordering::SeqCst), 100);
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

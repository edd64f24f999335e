use super::{SampleStore, StoreError};
use chrono::Utc;
use common::{Reading, Sample, SampleId};
use getset::Getters;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Name written into the first line of every store file.
pub const LAYOUT_NAME: &str = "telemetry-samples";

/// Current on-disk layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// First line of the store file. `next_id` is the identity high-water mark at
/// the time the file was (re)written, so ids are never reused even after every
/// sample has been forwarded and deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LayoutHeader {
    layout: String,
    version: u32,
    next_id: u64,
}

impl LayoutHeader {
    fn current(next_id: SampleId) -> Self {
        Self {
            layout: LAYOUT_NAME.to_string(),
            version: LAYOUT_VERSION,
            next_id: next_id.into(),
        }
    }

    fn to_line(&self) -> Result<Vec<u8>, StoreError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.layout != LAYOUT_NAME {
            return Err(StoreError::UnknownLayout(self.layout.clone()));
        }
        if self.version != LAYOUT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: self.version,
                expected: LAYOUT_VERSION,
            });
        }
        Ok(())
    }
}

struct StoreState {
    // Append-mode handle; every write lands at the end of the file.
    file: File,
    // Length of the file up to the last complete record.
    len: u64,
    pending: BTreeMap<SampleId, Sample>,
    next_id: SampleId,
    // Set when a failed append could not be rolled back; the tail of the file
    // is unknown until the next full rewrite.
    needs_rewrite: bool,
}

/// Sample store backed by a single local file.
///
/// # Layout
/// One JSON header line followed by one JSON record per line, in insertion
/// order. Appends are a single write of a full line followed by `fsync`.
/// Deletes rewrite the surviving records into a sibling file which then
/// atomically replaces the original, so a crash leaves either the old or the
/// new contents.
///
/// # Recovery
/// A final line without a trailing newline that does not parse is the
/// remains of an interrupted append; it is truncated on open. Any other
/// unparsable line is reported as corruption.
#[derive(Getters)]
pub struct FileSampleStore {
    #[getset(get = "pub")]
    path: PathBuf,
    state: Mutex<StoreState>,
    // Counter for the number of appends (used for statistics)
    num_appends: AtomicU64,
    // Counter for the number of file rewrites (used for statistics)
    num_compactions: AtomicU64,
}

impl fmt::Debug for FileSampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSampleStore")
            .field("path", &self.path)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl FileSampleStore {
    /// Open the store at `path`, creating and provisioning the file if it
    /// does not exist yet. Safe to call on every startup.
    #[instrument]
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::EmptyPath);
        }

        let compaction_path = compaction_path(path);
        if compaction_path.exists() {
            warn!(
                path = %compaction_path.display(),
                "Removing leftover file from an interrupted delete"
            );
            fs::remove_file(&compaction_path).map_err(StoreError::io(&compaction_path))?;
        }

        let mut file = File::options()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                error!("Failed to open sample store {}: {}", path.display(), e);
                StoreError::io(path)(e)
            })?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(StoreError::io(path))?;

        let state = if contents.is_empty() {
            debug!(path = %path.display(), "Sample store is empty, provisioning layout");
            provision(path, file)?
        } else {
            debug!(path = %path.display(), bytes = contents.len(), "Loading existing sample store");
            load(path, file, &contents)?
        };

        info!(
            path = %path.display(),
            pending = state.pending.len(),
            next_id = %state.next_id,
            "Sample store ready"
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
            num_appends: AtomicU64::new(0),
            num_compactions: AtomicU64::new(0),
        })
    }

    /// Number of samples waiting to be forwarded.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn num_appends(&self) -> u64 {
        self.num_appends.load(Ordering::SeqCst)
    }

    pub fn num_compactions(&self) -> u64 {
        self.num_compactions.load(Ordering::SeqCst)
    }

    /// Flush everything to disk and release the file. Consumes the store, so
    /// it can only happen once.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn close(self) -> Result<(), StoreError> {
        let num_appends = self.num_appends();
        let num_compactions = self.num_compactions();
        let state = self.state.into_inner();

        state.file.sync_all().map_err(StoreError::io(&self.path))?;

        info!(
            pending = state.pending.len(),
            num_appends, num_compactions, "Sample store closed"
        );
        Ok(())
    }

    /// Close a store that has been shared between tasks. Fails if any other
    /// handle is still alive, since its owner could still issue operations.
    pub fn close_shared(self: Arc<Self>) -> Result<(), StoreError> {
        match Arc::try_unwrap(self) {
            Ok(store) => store.close(),
            Err(shared) => Err(StoreError::InFlight(Arc::strong_count(&shared) - 1)),
        }
    }

    fn compact(&self, state: &mut StoreState) -> Result<(), StoreError> {
        let tmp = compaction_path(&self.path);

        let mut contents = LayoutHeader::current(state.next_id).to_line()?;
        for sample in state.pending.values() {
            serde_json::to_writer(&mut contents, sample)?;
            contents.push(b'\n');
        }

        match rewrite(&tmp, &self.path, &contents) {
            Ok(file) => {
                state.file = file;
                state.len = contents.len() as u64;
                state.needs_rewrite = false;
            }
            Err(e) => {
                error!("Failed to rewrite sample store {}: {}", self.path.display(), e);
                let _ = fs::remove_file(&tmp);
                return Err(StoreError::io(&self.path)(e));
            }
        }

        self.num_compactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Drop whatever part of a failed append made it to disk. If even that
    /// fails, the file is rewritten from `pending` before the next write.
    fn discard_partial(&self, state: &mut StoreState) {
        if let Err(e) = state.file.set_len(state.len) {
            error!(
                "Failed to truncate {} after a failed append: {}",
                self.path.display(),
                e
            );
            state.needs_rewrite = true;
        }
    }

    fn repair(&self, state: &mut StoreState) -> Result<(), StoreError> {
        if state.needs_rewrite {
            warn!(path = %self.path.display(), "Rewriting sample store with an unknown tail");
            self.compact(state)?;
        }
        Ok(())
    }
}

impl SampleStore for FileSampleStore {
    #[instrument(skip(self))]
    fn append(&self, reading: Reading) -> Result<Sample, StoreError> {
        // serde_json writes NaN and infinities as `null`, which never loads back.
        if !reading.cpu_load().is_finite() {
            return Err(StoreError::NonFinite {
                field: "cpu_load",
                value: reading.cpu_load(),
            });
        }

        let mut state = self.state.lock();
        self.repair(&mut state)?;

        let id = state.next_id;
        state.next_id = id.next();
        let sample = Sample::from_reading(id, reading, Utc::now());

        let mut line = serde_json::to_vec(&sample)?;
        line.push(b'\n');

        if let Err(e) = write_durably(&mut state.file, &line) {
            error!("Failed to append {} to {}: {}", id, self.path.display(), e);
            self.discard_partial(&mut state);
            return Err(StoreError::io(&self.path)(e));
        }

        state.len += line.len() as u64;
        state.pending.insert(id, sample.clone());
        self.num_appends.fetch_add(1, Ordering::SeqCst);

        debug!(%id, pending = state.pending.len(), "Sample appended");
        Ok(sample)
    }

    fn list_all(&self) -> Result<Vec<Sample>, StoreError> {
        Ok(self.state.lock().pending.values().cloned().collect())
    }

    #[instrument(skip_all, fields(requested = samples.len()))]
    fn delete_batch(&self, samples: &[Sample]) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        self.repair(&mut state)?;

        let removed: Vec<Sample> = samples
            .iter()
            .filter_map(|sample| state.pending.remove(&sample.id()))
            .collect();

        if removed.is_empty() {
            debug!("Nothing to delete");
            return Ok(0);
        }

        if let Err(e) = self.compact(&mut state) {
            for sample in removed {
                state.pending.insert(sample.id(), sample);
            }
            return Err(e);
        }

        debug!(
            removed = removed.len(),
            pending = state.pending.len(),
            "Samples deleted"
        );
        Ok(removed.len())
    }
}

fn compaction_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

/// Write `contents` to `tmp` and move it over `path`. The returned handle
/// stays valid across the rename.
fn rewrite(tmp: &Path, path: &Path, contents: &[u8]) -> io::Result<File> {
    let mut file = File::options()
        .read(true)
        .append(true)
        .create(true)
        .open(tmp)?;
    file.set_len(0)?;
    write_durably(&mut file, contents)?;
    fs::rename(tmp, path)?;
    Ok(file)
}

fn write_durably(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_data()
}

fn provision(path: &Path, mut file: File) -> Result<StoreState, StoreError> {
    let next_id = SampleId(1);
    let header = LayoutHeader::current(next_id).to_line()?;

    file.set_len(0).map_err(StoreError::io(path))?;
    write_durably(&mut file, &header).map_err(StoreError::io(path))?;

    Ok(StoreState {
        file,
        len: header.len() as u64,
        pending: BTreeMap::new(),
        next_id,
        needs_rewrite: false,
    })
}

fn load(path: &Path, mut file: File, contents: &[u8]) -> Result<StoreState, StoreError> {
    let chunks: Vec<&[u8]> = contents.split_inclusive(|b| *b == b'\n').collect();
    let last = chunks.len() - 1;

    let (header_chunk, header_terminated) = split_terminator(chunks[0]);
    let header: LayoutHeader = match serde_json::from_slice(header_chunk) {
        Ok(header) => header,
        // Interrupted while provisioning: nothing else can have been written.
        Err(_) if last == 0 && !header_terminated => {
            warn!(path = %path.display(), "Discarding incomplete layout header");
            return provision(path, file);
        }
        Err(e) => return Err(StoreError::corrupt(path, 1, e)),
    };
    header.check()?;

    let mut pending = BTreeMap::new();
    let mut len = chunks[0].len() as u64;
    let mut missing_terminator = !header_terminated;

    for (idx, chunk) in chunks.iter().enumerate().skip(1) {
        let (record, terminated) = split_terminator(chunk);

        if record.iter().all(u8::is_ascii_whitespace) {
            len += chunk.len() as u64;
            continue;
        }

        match serde_json::from_slice::<Sample>(record) {
            Ok(sample) => {
                if pending.insert(sample.id(), sample).is_some() {
                    return Err(StoreError::corrupt(path, idx + 1, "duplicate sample id"));
                }
                len += chunk.len() as u64;
                missing_terminator = !terminated;
            }
            Err(_) if idx == last && !terminated => {
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    bytes = chunk.len(),
                    "Truncating incomplete record left by an interrupted append"
                );
                file.set_len(len).map_err(StoreError::io(path))?;
            }
            Err(e) => return Err(StoreError::corrupt(path, idx + 1, e)),
        }
    }

    // A complete record whose newline never made it to disk.
    if missing_terminator {
        write_durably(&mut file, b"\n").map_err(StoreError::io(path))?;
        len += 1;
    }

    let next_id = pending
        .keys()
        .next_back()
        .map(SampleId::next)
        .unwrap_or_default()
        .max(SampleId(header.next_id))
        .max(SampleId(1));

    Ok(StoreState {
        file,
        len,
        pending,
        next_id,
        needs_rewrite: false,
    })
}

fn split_terminator(chunk: &[u8]) -> (&[u8], bool) {
    match chunk.split_last() {
        Some((b'\n', body)) => (body, true),
        _ => (chunk, false),
    }
}

#[cfg(test)]
mod single_thread_tests {
    use super::*;
    use crate::store::setup_store;
    use pretty_assertions_sorted::assert_eq;

    fn reading(n: u64) -> Reading {
        Reading::new(n as f32, n * 1024)
    }

    fn ids(samples: &[Sample]) -> Vec<u64> {
        samples.iter().map(|s| s.id().0).collect()
    }

    #[test]
    fn append_then_list_preserves_order() {
        let (store, _temp_dir) = setup_store();

        let appended: Vec<Sample> = (1..=5)
            .map(|n| store.append(reading(n)).expect("append"))
            .collect();

        let listed = store.list_all().unwrap();
        assert_eq!(listed, appended);
        assert_eq!(ids(&listed), vec![1, 2, 3, 4, 5]);
        assert_eq!(listed[2].mem_free(), 3 * 1024);
        assert_eq!(store.num_appends(), 5);
    }

    #[test]
    fn new_store_is_empty() {
        let (store, _temp_dir) = setup_store();
        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn delete_removes_exactly_the_batch() {
        let (store, _temp_dir) = setup_store();
        let samples: Vec<Sample> = (1..=5).map(|n| store.append(reading(n)).unwrap()).collect();

        let batch = vec![samples[1].clone(), samples[3].clone()];
        let removed = store.delete_batch(&batch).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(ids(&store.list_all().unwrap()), vec![1, 3, 5]);
        assert_eq!(store.num_compactions(), 1);
    }

    #[test]
    fn empty_and_absent_deletes_are_noops() {
        let (store, _temp_dir) = setup_store();
        let first = store.append(reading(1)).unwrap();
        let second = store.append(reading(2)).unwrap();

        assert_eq!(store.delete_batch(&[]).unwrap(), 0);
        assert_eq!(store.num_compactions(), 0);

        assert_eq!(store.delete_batch(&[first.clone()]).unwrap(), 1);
        // Deleting the same sample again must not fail.
        assert_eq!(store.delete_batch(&[first.clone()]).unwrap(), 0);
        assert_eq!(store.delete_batch(&[first, second]).unwrap(), 1);

        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(store.num_compactions(), 2);
    }

    #[test]
    fn pending_samples_survive_reopen() {
        let (store, temp_dir) = setup_store();
        let path = store.path().clone();
        let samples: Vec<Sample> = (1..=3).map(|n| store.append(reading(n)).unwrap()).collect();
        store.delete_batch(&samples[..1]).unwrap();
        store.close_shared().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        assert_eq!(reopened.list_all().unwrap(), samples[1..].to_vec());

        drop(temp_dir);
    }

    #[test]
    fn ids_are_never_reused_after_full_drain() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        let samples: Vec<Sample> = (1..=3).map(|n| store.append(reading(n)).unwrap()).collect();
        store.delete_batch(&samples).unwrap();
        store.close_shared().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        let next = reopened.append(reading(4)).unwrap();
        assert_eq!(next.id(), SampleId(4));
    }

    #[test]
    fn opening_twice_is_idempotent() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.close_shared().unwrap();

        let before = fs::read(&path).unwrap();
        FileSampleStore::open(&path).unwrap().close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.append(reading(1)).unwrap();
        store.append(reading(2)).unwrap();
        store.close_shared().unwrap();

        let mut file = File::options().append(true).open(&path).unwrap();
        file.write_all(br#"{"id":3,"cpu_lo"#).unwrap();
        drop(file);

        let reopened = FileSampleStore::open(&path).unwrap();
        assert_eq!(ids(&reopened.list_all().unwrap()), vec![1, 2]);

        reopened.append(reading(3)).unwrap();
        reopened.close().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        assert_eq!(ids(&reopened.list_all().unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn complete_record_without_newline_is_kept() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.append(reading(1)).unwrap();
        store.close_shared().unwrap();

        // Strip the final newline.
        let contents = fs::read(&path).unwrap();
        fs::write(&path, &contents[..contents.len() - 1]).unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        reopened.append(reading(2)).unwrap();
        reopened.close().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        assert_eq!(ids(&reopened.list_all().unwrap()), vec![1, 2]);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.append(reading(1)).unwrap();
        store.close_shared().unwrap();

        let mut file = File::options().append(true).open(&path).unwrap();
        file.write_all(b"garbage\n").unwrap();
        drop(file);

        let result = FileSampleStore::open(&path);
        assert!(matches!(result, Err(StoreError::Corrupt { line: 3, .. })));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("other.db");
        fs::write(&path, b"{\"layout\":\"something-else\",\"version\":1,\"next_id\":1}\n").unwrap();

        let result = FileSampleStore::open(&path);
        assert!(matches!(result, Err(StoreError::UnknownLayout(name)) if name == "something-else"));

        fs::write(&path, b"{\"layout\":\"telemetry-samples\",\"version\":9,\"next_id\":1}\n").unwrap();
        let result = FileSampleStore::open(&path);
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedVersion { found: 9, expected: 1 })
        ));
    }

    #[test]
    fn throw_bad_file_test() {
        let result = FileSampleStore::open(Path::new("/dev/null/foo/bar/baz/test.db"));
        assert!(matches!(result, Err(StoreError::Io { .. })));

        let result = FileSampleStore::open(Path::new(""));
        assert!(matches!(result, Err(StoreError::EmptyPath)));
    }

    #[test]
    fn close_fails_while_handles_are_outstanding() {
        let (store, _temp_dir) = setup_store();
        let task_handle: Arc<dyn SampleStore> = store.clone();

        let result = Arc::clone(&store).close_shared();
        assert!(matches!(result, Err(StoreError::InFlight(_))));

        drop(task_handle);
        store.close_shared().unwrap();
    }

    #[test]
    fn non_finite_cpu_load_is_rejected_and_store_still_reopens() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();

        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let result = store.append(Reading::new(bad, 1));
            assert!(matches!(
                result,
                Err(StoreError::NonFinite {
                    field: "cpu_load",
                    ..
                })
            ));
        }
        store.append(Reading::new(5.0, 2)).unwrap();
        store.close_shared().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        let samples = reopened.list_all().unwrap();
        assert_eq!(ids(&samples), vec![1]);
        assert_eq!(samples[0].reading(), Reading::new(5.0, 2));
    }

    #[test]
    fn unrolled_back_append_is_repaired_before_the_next_write() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.append(reading(1)).unwrap();

        // A write that died halfway and whose truncation also failed.
        let mut file = File::options().append(true).open(&path).unwrap();
        file.write_all(br#"{"id":2,"cpu_lo"#).unwrap();
        drop(file);
        store.state.lock().needs_rewrite = true;

        store.append(reading(2)).unwrap();
        assert_eq!(store.num_compactions(), 1);
        assert!(!store.state.lock().needs_rewrite);
        store.close_shared().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        assert_eq!(ids(&reopened.list_all().unwrap()), vec![1, 2]);
    }

    #[test]
    fn pending_repair_runs_even_for_an_empty_delete() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.append(reading(1)).unwrap();

        let mut file = File::options().append(true).open(&path).unwrap();
        file.write_all(b"garbage").unwrap();
        drop(file);
        store.state.lock().needs_rewrite = true;

        assert_eq!(store.delete_batch(&[]).unwrap(), 0);
        store.close_shared().unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        assert_eq!(ids(&reopened.list_all().unwrap()), vec![1]);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn leftover_compaction_file_is_removed() {
        let (store, _temp_dir) = setup_store();
        let path = store.path().clone();
        store.append(reading(1)).unwrap();
        store.close_shared().unwrap();

        let leftover = compaction_path(&path);
        fs::write(&leftover, b"partial").unwrap();

        let reopened = FileSampleStore::open(&path).unwrap();
        assert!(!leftover.exists());
        assert_eq!(ids(&reopened.list_all().unwrap()), vec![1]);
    }
}

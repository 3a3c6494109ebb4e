// src/queue/spool.rs

//! Directory-backed durable queues.
//!
//! Layout: `<root>/<queue>/<seq>-<pid>.json`, one file per entry.
//!
//! - push writes `.tmp-<seq>-<pid>`, fsyncs it, then renames it into place,
//!   so readers never observe a half-written entry.
//! - pop lists the directory, sorts by name (oldest `seq` first) and claims
//!   an entry by renaming it to `.claim-...`. Rename is atomic, so exactly
//!   one reader (in any process) wins a given entry; losers move on to the
//!   next one.
//! - `seq` is nanoseconds since the epoch, bumped to stay strictly
//!   increasing within one manager. Entries from different processes are
//!   ordered by wall clock.
//! - a claim that does not complete (IO error, dropped future) is renamed
//!   back into place. Claims left behind by a crashed reader are restored
//!   by [`SpoolQueueManager::open`] once their owner is gone or they are
//!   older than [`STALE_CLAIM_AFTER`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::node::NodeData;
use crate::queue::{QueueError, QueueFuture, QueueManager, validate_queue_name};

const ENTRY_EXT: &str = ".json";
const CLAIM_PREFIX: &str = ".claim-";

/// Age after which a claim is considered abandoned even if its owner
/// process still exists.
pub const STALE_CLAIM_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct SpoolQueueManager {
    root: PathBuf,
    poll_interval: Duration,
    /// Last sequence number handed out. Held across the write + rename so
    /// that entries become visible in push order.
    last_seq: Mutex<u64>,
}

impl SpoolQueueManager {
    /// Open (and create if needed) a spool rooted at `root`.
    pub fn open(root: impl AsRef<Path>, poll_interval: Duration) -> Result<Self, QueueError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let restored = restore_stale_claims(&root, STALE_CLAIM_AFTER)?;
        debug!(root = %root.display(), restored, "opened queue spool");

        Ok(Self {
            root,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            last_seq: Mutex::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn queue_dir(&self, queue: &str) -> Result<PathBuf, QueueError> {
        validate_queue_name(queue)?;
        let dir = self.root.join(queue);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Try to take the oldest entry of `dir` without waiting.
    async fn try_claim(&self, dir: &Path) -> Result<Option<NodeData>, QueueError> {
        for name in sorted_entries(dir).await? {
            let entry = dir.join(&name);
            let claimed = dir.join(format!("{CLAIM_PREFIX}{}-{}", std::process::id(), name));

            match fs::rename(&entry, &claimed).await {
                Ok(()) => {}
                // Another reader won this one.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            let mut guard = ClaimGuard::new(claimed.clone(), entry);

            // Rename keeps the push-time mtime; restart the clock for
            // stale-claim detection.
            let file = fs::OpenOptions::new().write(true).open(&claimed).await?;
            file.into_std().await.set_modified(SystemTime::now())?;

            let raw = fs::read_to_string(&claimed).await?;
            return match serde_json::from_str::<NodeData>(&raw) {
                Ok(data) => {
                    fs::remove_file(&claimed).await?;
                    guard.release();
                    trace!(entry = %name, "claimed spool entry");
                    Ok(Some(data))
                }
                Err(e) => {
                    let parked = dir.join(format!(".corrupt-{name}"));
                    warn!(
                        entry = %name,
                        parked = %parked.display(),
                        error = %e,
                        "undecodable spool entry; parking it"
                    );
                    fs::rename(&claimed, &parked).await?;
                    guard.release();
                    Err(e.into())
                }
            };
        }

        Ok(None)
    }
}

/// Renames a claimed entry back to its visible name unless released.
///
/// Covers early returns on IO errors and pop futures dropped mid-claim.
struct ClaimGuard {
    claimed: PathBuf,
    entry: PathBuf,
    armed: bool,
}

impl ClaimGuard {
    fn new(claimed: PathBuf, entry: PathBuf) -> Self {
        Self {
            claimed,
            entry,
            armed: true,
        }
    }

    fn release(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::rename(&self.claimed, &self.entry) {
            Ok(()) => debug!(entry = %self.entry.display(), "claim abandoned; entry restored"),
            Err(e) => warn!(
                claim = %self.claimed.display(),
                error = %e,
                "failed to restore abandoned claim"
            ),
        }
    }
}

/// Split `.claim-<pid>-<entry>` into the owner pid and the entry name.
fn parse_claim(file_name: &str) -> Option<(u32, &str)> {
    let rest = file_name.strip_prefix(CLAIM_PREFIX)?;
    let (pid, name) = rest.split_once('-')?;
    Some((pid.parse().ok()?, name))
}

#[cfg(target_os = "linux")]
fn owner_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn owner_alive(_pid: u32) -> bool {
    true
}

/// Put back every claim under `root` whose owner is gone or that is older
/// than `stale_after`. Returns how many entries were restored.
fn restore_stale_claims(root: &Path, stale_after: Duration) -> Result<usize, QueueError> {
    let mut restored = 0;

    for queue in std::fs::read_dir(root)? {
        let queue = queue?;
        if !queue.file_type()?.is_dir() {
            continue;
        }

        for entry in std::fs::read_dir(queue.path())? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some((pid, name)) = file_name.to_str().and_then(parse_claim) else {
                continue;
            };

            let age = entry
                .metadata()?
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if owner_alive(pid) && age < stale_after {
                continue;
            }

            match std::fs::rename(entry.path(), queue.path().join(name)) {
                Ok(()) => {
                    warn!(
                        queue = %queue.file_name().to_string_lossy(),
                        entry = %name,
                        owner_pid = pid,
                        "restored abandoned spool claim"
                    );
                    restored += 1;
                }
                // Completed or restored by someone else in the meantime.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(restored)
}

/// Visible entry file names in `dir`, oldest first.
async fn sorted_entries(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut names = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = rd.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') && name.ends_with(ENTRY_EXT) {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

impl QueueManager for SpoolQueueManager {
    fn push<'a>(&'a self, queue: &'a str, data: NodeData) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.queue_dir(queue).await?;
            let bytes = serde_json::to_vec(&data)?;

            let mut last = self.last_seq.lock().await;
            let seq = now_nanos().max(last.saturating_add(1));
            *last = seq;

            let stem = format!("{seq:020}-{:010}", std::process::id());
            let tmp = dir.join(format!(".tmp-{stem}"));
            let dest = dir.join(format!("{stem}{ENTRY_EXT}"));

            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &dest).await?;

            trace!(queue, entry = %stem, "spooled entry");
            Ok(())
        })
    }

    fn pop<'a>(&'a self, queue: &'a str, timeout: Duration) -> QueueFuture<'a, Option<NodeData>> {
        Box::pin(async move {
            let dir = self.queue_dir(queue).await?;
            let deadline = Instant::now() + timeout;

            loop {
                if let Some(data) = self.try_claim(&dir).await? {
                    return Ok(Some(data));
                }

                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        })
    }

    fn len<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, usize> {
        Box::pin(async move {
            validate_queue_name(queue)?;
            Ok(sorted_entries(&self.root.join(queue)).await?.len())
        })
    }
}

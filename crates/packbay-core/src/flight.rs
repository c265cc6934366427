//! Single-flight download coordination and the streaming tee.
//!
//! For any tarball filename at most one upstream fetch is active at a time.
//! The first requester becomes the owner: it streams the upstream body both
//! to its client and into a `.part` file, renames the file on completion
//! (the commit point), runs integrity verification, and broadcasts the
//! outcome. Every other requester waits on that broadcast and then serves
//! the completed file from disk; if the owner failed, a waiter takes over
//! with a fresh fetch.
//!
//! The disk writer always outlives the client: a disconnected client socket
//! downgrades the tee to disk-only rather than aborting the download.

use crate::client::RegistryClient;
use crate::error::ProxyError;
use crate::tarball::{partial_path, tarball_path, version_from_filename};
use crate::verify::IntegrityVerifier;
use crate::Result;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};

/// Broadcast result of one flight. `Err` carries a display string so it is
/// cheaply cloneable to any number of waiters.
type FlightOutcome = std::result::Result<(), String>;
type FlightReceiver = watch::Receiver<Option<FlightOutcome>>;
type FlightSender = watch::Sender<Option<FlightOutcome>>;

const STREAM_CHANNEL_CAPACITY: usize = 16;
const FILE_BUF_SIZE: usize = 64 * 1024;

/// Bound on the miss → wait → retry cycle a single request will tolerate
/// before giving up (for example when every fresh fetch fails verification).
const MAX_ATTEMPTS: usize = 3;

/// How a tarball request is satisfied.
pub enum TarballDelivery {
    /// Complete file already on disk.
    File(PathBuf),
    /// Live tee of an in-progress download. The stream terminates with an
    /// `Err` item if the upstream fetch fails mid-flight.
    Stream(mpsc::Receiver<io::Result<Bytes>>),
}

/// Result of a server-initiated (no client sink) download.
#[derive(Debug, Clone)]
pub struct EnsureOutcome {
    /// The file was already present; no fetch happened.
    pub already_cached: bool,
    pub size: u64,
    pub version: Option<String>,
}

enum Role {
    Waiter(FlightReceiver),
    Owner(FlightSender),
}

enum TeeResult {
    /// Bytes were fetched upstream and committed.
    Fetched(u64),
    /// Another flight committed the file between this request's disk miss
    /// and its registration; no fetch happened.
    AlreadyPresent(u64),
}

/// Coordinates tarball downloads across concurrent requests.
#[derive(Debug)]
pub struct DownloadCoordinator {
    cache_dir: PathBuf,
    client: RegistryClient,
    verifier: IntegrityVerifier,
    inflight: Mutex<HashMap<String, FlightReceiver>>,
}

impl DownloadCoordinator {
    #[must_use]
    pub fn new(cache_dir: PathBuf, client: RegistryClient, verifier: IntegrityVerifier) -> Self {
        Self {
            cache_dir,
            client,
            verifier,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Satisfy a client request for `filename`, either from disk or by
    /// becoming/joining a flight.
    pub async fn deliver(self: &Arc<Self>, name: &str, filename: &str) -> Result<TarballDelivery> {
        for _ in 0..MAX_ATTEMPTS {
            let path = tarball_path(&self.cache_dir, filename);
            if tokio::fs::metadata(&path).await.is_ok() {
                return Ok(TarballDelivery::File(path));
            }

            match self.join_flight(filename).await {
                Role::Waiter(mut rx) => {
                    // Success or failure, loop back: on success the disk
                    // check hits; on failure this request falls through to
                    // its own download.
                    let _ = wait_outcome(&mut rx).await;
                }
                Role::Owner(tx) => {
                    let (sink_tx, sink_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
                    let this = Arc::clone(self);
                    let name = name.to_string();
                    let filename = filename.to_string();
                    tokio::spawn(async move {
                        let _ = this.owner_download(&name, &filename, Some(sink_tx), tx).await;
                    });
                    return Ok(TarballDelivery::Stream(sink_rx));
                }
            }
        }
        Err(ProxyError::DownloadFailed {
            filename: filename.to_string(),
            reason: "repeated download attempts failed".to_string(),
        })
    }

    /// Download-and-verify without a client sink (precache). Waits for
    /// completion and reports the cached size.
    pub async fn ensure_cached(self: &Arc<Self>, name: &str, filename: &str) -> Result<EnsureOutcome> {
        let path = tarball_path(&self.cache_dir, filename);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            return Ok(EnsureOutcome {
                already_cached: true,
                size: meta.len(),
                version: version_from_filename(filename),
            });
        }

        for _ in 0..MAX_ATTEMPTS {
            match self.join_flight(filename).await {
                Role::Waiter(mut rx) => {
                    let _ = wait_outcome(&mut rx).await;
                    if let Ok(meta) = tokio::fs::metadata(&path).await {
                        return Ok(EnsureOutcome {
                            already_cached: false,
                            size: meta.len(),
                            version: version_from_filename(filename),
                        });
                    }
                }
                Role::Owner(tx) => {
                    let size = self.owner_download(name, filename, None, tx).await?;
                    return Ok(EnsureOutcome {
                        already_cached: false,
                        size,
                        version: version_from_filename(filename),
                    });
                }
            }
        }
        Err(ProxyError::DownloadFailed {
            filename: filename.to_string(),
            reason: "repeated download attempts failed".to_string(),
        })
    }

    /// Register in (or join) the single-flight map.
    async fn join_flight(&self, filename: &str) -> Role {
        let mut map = self.inflight.lock().await;
        if let Some(rx) = map.get(filename) {
            Role::Waiter(rx.clone())
        } else {
            let (tx, rx) = watch::channel(None);
            map.insert(filename.to_string(), rx);
            Role::Owner(tx)
        }
    }

    /// The owner's whole lifecycle: tee, verify, deregister, broadcast.
    /// Deregistration and the broadcast happen on every exit path, so the
    /// map never leaks an entry.
    async fn owner_download(
        &self,
        name: &str,
        filename: &str,
        sink: Option<mpsc::Sender<io::Result<Bytes>>>,
        tx: FlightSender,
    ) -> Result<u64> {
        let result = self.run_tee(name, filename, sink).await;

        if let Ok(TeeResult::Fetched(_)) = &result {
            if let Some(version) = version_from_filename(filename) {
                let path = tarball_path(&self.cache_dir, filename);
                let outcome = self.verifier.verify_download(name, &version, &path).await;
                if outcome.threat {
                    tracing::warn!(
                        package = name,
                        version,
                        "threat detected after download; cached file removed"
                    );
                }
            } else {
                tracing::warn!(filename, "no resolvable version in filename, skipping verification");
            }
        }

        let mut map = self.inflight.lock().await;
        map.remove(filename);
        drop(map);

        let _ = tx.send(Some(
            result.as_ref().map(|_| ()).map_err(ToString::to_string),
        ));
        result.map(|tee| match tee {
            TeeResult::Fetched(size) | TeeResult::AlreadyPresent(size) => size,
        })
    }

    /// Stream the upstream body to the optional client sink and a `.part`
    /// file, committing with a rename.
    async fn run_tee(
        &self,
        name: &str,
        filename: &str,
        mut sink: Option<mpsc::Sender<io::Result<Bytes>>>,
    ) -> Result<TeeResult> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let part = partial_path(&self.cache_dir, filename);
        let final_path = tarball_path(&self.cache_dir, filename);
        let url = self.client.tarball_url(name, filename);

        // A concurrent flight may have committed the file between this
        // request's disk miss and its registration.
        if let Ok(meta) = tokio::fs::metadata(&final_path).await {
            if let Some(tx) = sink.take() {
                forward_file(&final_path, tx).await;
            }
            return Ok(TeeResult::AlreadyPresent(meta.len()));
        }

        let stream = match self.client.open_tarball_stream(&url).await {
            Ok(stream) => stream,
            Err(err) => {
                notify_sink(&mut sink, &err).await;
                return Err(err);
            }
        };
        let mut stream = Box::pin(stream);

        let mut file = match tokio::fs::File::create(&part).await {
            Ok(file) => file,
            Err(err) => {
                let err = ProxyError::from(err);
                notify_sink(&mut sink, &err).await;
                return Err(err);
            }
        };

        let mut total = 0u64;
        while let Some(next) = stream.next().await {
            match next {
                Ok(chunk) => {
                    if let Err(err) = file.write_all(&chunk).await {
                        let err = ProxyError::from(err);
                        abort_partial(&part).await;
                        notify_sink(&mut sink, &err).await;
                        return Err(err);
                    }
                    total += chunk.len() as u64;
                    if let Some(tx) = &sink {
                        if tx.send(Ok(chunk)).await.is_err() {
                            // Client went away mid-stream; keep writing so
                            // later requesters hit the cache.
                            tracing::debug!(filename, "client disconnected, cache write continues");
                            sink = None;
                        }
                    }
                }
                Err(err) => {
                    let err = ProxyError::DownloadFailed {
                        filename: filename.to_string(),
                        reason: err.to_string(),
                    };
                    abort_partial(&part).await;
                    notify_sink(&mut sink, &err).await;
                    return Err(err);
                }
            }
        }

        if let Err(err) = file.flush().await {
            let err = ProxyError::from(err);
            abort_partial(&part).await;
            notify_sink(&mut sink, &err).await;
            return Err(err);
        }
        drop(file);

        if let Err(err) = tokio::fs::rename(&part, &final_path).await {
            let err = ProxyError::from(err);
            abort_partial(&part).await;
            notify_sink(&mut sink, &err).await;
            return Err(err);
        }

        tracing::info!(package = name, filename, bytes = total, "tarball cached");
        Ok(TeeResult::Fetched(total))
    }

    #[cfg(test)]
    async fn inflight_len(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

/// Wait until the owner broadcasts an outcome. A dropped sender counts as a
/// failed flight.
async fn wait_outcome(rx: &mut FlightReceiver) -> FlightOutcome {
    loop {
        let current = rx.borrow().clone();
        if let Some(outcome) = current {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return Err("download task dropped before completion".to_string());
        }
    }
}

async fn notify_sink(sink: &mut Option<mpsc::Sender<io::Result<Bytes>>>, err: &ProxyError) {
    if let Some(tx) = sink.take() {
        let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
    }
}

/// Pump a committed cache file into a client sink. I/O errors are sent to
/// the sink; a gone client just stops the pump.
async fn forward_file(path: &Path, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            return;
        }
    };
    let mut buf = vec![0u8; FILE_BUF_SIZE];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                break;
            }
        }
    }
}

async fn abort_partial(part: &Path) {
    if let Err(err) = tokio::fs::remove_file(part).await {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::error!(path = %part.display(), error = %err, "failed to remove partial download");
        }
    }
}

/// Stream a completed cache file as body chunks.
#[must_use]
pub fn stream_file(path: PathBuf) -> mpsc::Receiver<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        forward_file(&path, tx).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use packbay_store::Store;
    use tempfile::tempdir;

    fn coordinator(dir: &Path) -> Arc<DownloadCoordinator> {
        let store = Arc::new(Store::open(dir.join("db")).unwrap());
        // Port 9 (discard) is unroutable: any actual fetch fails fast.
        let client = RegistryClient::new("http://127.0.0.1:9").unwrap();
        let audit = AuditLog::new(Arc::clone(&store));
        let verifier = IntegrityVerifier::new(client.clone(), store, audit);
        Arc::new(DownloadCoordinator::new(
            dir.join("cache"),
            client,
            verifier,
        ))
    }

    #[tokio::test]
    async fn test_cache_hit_needs_no_upstream() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("left-pad-1.3.0.tgz"), b"tar bytes").unwrap();

        match coordinator.deliver("left-pad", "left-pad-1.3.0.tgz").await.unwrap() {
            TarballDelivery::File(path) => {
                assert_eq!(std::fs::read(path).unwrap(), b"tar bytes");
            }
            TarballDelivery::Stream(_) => panic!("expected a disk hit"),
        }
        assert_eq!(coordinator.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn test_failed_flight_reports_error_and_clears_map() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());

        match coordinator.deliver("left-pad", "left-pad-1.3.0.tgz").await.unwrap() {
            TarballDelivery::Stream(mut rx) => {
                let first = rx.recv().await.expect("stream should yield an item");
                assert!(first.is_err(), "unreachable upstream must surface an error");
            }
            TarballDelivery::File(_) => panic!("nothing is cached"),
        }

        // The owner task deregisters on failure; poll briefly for it.
        for _ in 0..50 {
            if coordinator.inflight_len().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(coordinator.inflight_len().await, 0);
        assert!(!dir.path().join("cache/left-pad-1.3.0.tgz.part").exists());
    }

    #[tokio::test]
    async fn test_ensure_cached_reports_existing_file() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("left-pad-1.3.0.tgz"), b"123456").unwrap();

        let outcome = coordinator
            .ensure_cached("left-pad", "left-pad-1.3.0.tgz")
            .await
            .unwrap();
        assert!(outcome.already_cached);
        assert_eq!(outcome.size, 6);
        assert_eq!(outcome.version.as_deref(), Some("1.3.0"));
    }

    #[tokio::test]
    async fn test_stream_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut rx = stream_file(path);
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_stream_file_missing_yields_error() {
        let dir = tempdir().unwrap();
        let mut rx = stream_file(dir.path().join("absent.tgz"));
        let first = rx.recv().await.unwrap();
        assert!(first.is_err());
    }
}

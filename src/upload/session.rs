//! Upload Session and Session Registry
//!
//! One `UploadSession` tracks a single in-flight chunked upload: the next
//! expected chunk index, the ordered chunk digests, and the exclusive
//! destination writer. The `SessionRegistry` is the process-wide map from
//! upload key to session; membership mutation happens under a plain mutex
//! that is never held across await points, while per-session state is
//! guarded by an async mutex held for the duration of one chunk request.
//!
//! The registry also owns the timeout supervisor: a cancellable watchdog
//! task per session that abandons the upload after the inactivity window,
//! deleting the partial file and dropping the registry entry.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as MembershipLock;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::upload::types::{UploadError, UploadKey};

/// Shared handle to one session, locked per chunk request.
pub type SessionHandle = Arc<Mutex<UploadSession>>;

// ============================================================================
// Upload Session
// ============================================================================

/// State of one in-flight chunked upload.
pub struct UploadSession {
    key: UploadKey,
    path: PathBuf,
    next_chunk: u64,
    chunk_hashes: Vec<String>,
    bytes_written: u64,
    writer: Option<File>,
    timeout: Option<JoinHandle<()>>,
    /// Bumped on every accepted chunk; a watchdog only fires if the epoch it
    /// captured is still current.
    epoch: u64,
    closed: bool,
}

impl UploadSession {
    fn new(key: UploadKey, path: PathBuf) -> Self {
        Self {
            key,
            path,
            next_chunk: 0,
            chunk_hashes: Vec::new(),
            bytes_written: 0,
            writer: None,
            timeout: None,
            epoch: 0,
            closed: false,
        }
    }

    /// Open the destination in truncate mode. Called once, after the
    /// registry slot is reserved, so a conflicting chunk 0 can never
    /// truncate an active upload's file.
    pub async fn open_writer(&mut self) -> Result<(), UploadError> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        self.writer = Some(file);
        Ok(())
    }

    /// Append one body frame to the destination.
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<(), UploadError> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write_all(data).await?;
                Ok(())
            }
            None => Err(UploadError::Storage("destination writer closed".into())),
        }
    }

    /// Flush pending writes once all bytes of a chunk have arrived.
    pub async fn flush(&mut self) -> Result<(), UploadError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }

    /// Record an accepted chunk: append its digest and advance the
    /// expected index.
    pub fn record_chunk(&mut self, hash: String, bytes: u64) {
        self.chunk_hashes.push(hash);
        self.bytes_written += bytes;
        self.next_chunk += 1;
        debug_assert_eq!(self.chunk_hashes.len() as u64, self.next_chunk);
    }

    pub fn key(&self) -> &UploadKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_chunk(&self) -> u64 {
        self.next_chunk
    }

    pub fn chunk_hashes(&self) -> &[String] {
        &self.chunk_hashes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the session was torn down (finalized, errored, or abandoned).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.cancel_timeout();
    }
}

// ============================================================================
// Session Registry
// ============================================================================

/// Process-wide registry of active upload sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: MembershipLock<HashMap<UploadKey, SessionHandle>>,
    timeout: Duration,
}

impl SessionRegistry {
    /// Create a registry with the given inactivity window.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: MembershipLock::new(HashMap::new()),
                timeout,
            }),
        }
    }

    /// Start a fresh session for `key` (chunk 0 only).
    ///
    /// Rejects with `ConflictingSession` if one is already active; the
    /// check and insert happen under one map lock. The initial watchdog is
    /// armed immediately so a client that dies mid-first-chunk cannot leak
    /// the session.
    pub fn begin(&self, key: UploadKey, path: PathBuf) -> Result<SessionHandle, UploadError> {
        let mut sessions = self.inner.sessions.lock();
        if sessions.contains_key(&key) {
            return Err(UploadError::ConflictingSession);
        }

        let entry = Arc::new(Mutex::new(UploadSession::new(key.clone(), path)));
        sessions.insert(key, entry.clone());
        // Nobody else can reach the entry while the membership lock is held,
        // so the try_lock cannot fail.
        if let Ok(mut session) = entry.try_lock() {
            self.reschedule(&entry, &mut session);
        }
        Ok(entry)
    }

    /// Look up the active session for `key` (chunk index > 0).
    pub fn resume(&self, key: &UploadKey) -> Option<SessionHandle> {
        self.inner.sessions.lock().get(key).cloned()
    }

    /// Tear a session down: cancel its watchdog, close the writer, and drop
    /// the registry entry. The destination file is left alone; callers that
    /// need it gone delete it themselves.
    pub fn close(&self, entry: &SessionHandle, session: &mut UploadSession) {
        session.closed = true;
        session.cancel_timeout();
        session.writer.take();
        let mut sessions = self.inner.sessions.lock();
        if sessions.get(&session.key).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            sessions.remove(&session.key);
        }
    }

    /// Replace the session's abandonment watchdog with a freshly armed one.
    /// Called on every accepted chunk.
    pub fn reschedule(&self, entry: &SessionHandle, session: &mut UploadSession) {
        session.cancel_timeout();
        session.epoch += 1;

        let registry = self.clone();
        let weak = Arc::downgrade(entry);
        let key = session.key.clone();
        let epoch = session.epoch;
        let timeout = self.inner.timeout;

        session.timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(entry) = weak.upgrade() else {
                return;
            };
            registry.abandon(&key, &entry, epoch).await;
        }));
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Watchdog body: abandon the session if nothing advanced it since the
    /// watchdog was armed. Idempotent against cancellation races via the
    /// epoch and closed checks.
    async fn abandon(&self, key: &UploadKey, entry: &SessionHandle, epoch: u64) {
        let mut session = entry.lock().await;
        if session.closed || session.epoch != epoch {
            return;
        }
        session.closed = true;
        session.writer.take();
        session.timeout.take();

        tracing::warn!(file = %key, "chunked upload timed out, abandoning session");
        // The key stays registered until the partial file is gone. A chunk 0
        // arriving in this window gets a conflict instead of starting a
        // successor whose freshly created file this unlink would remove.
        if let Err(e) = tokio::fs::remove_file(&session.path).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::error!(file = %key, error = %e, "could not delete partial file");
            }
        }

        let mut sessions = self.inner.sessions.lock();
        if sessions.get(key).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            sessions.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> UploadKey {
        UploadKey::new("deadbeef", "fw_v1.0.0.bin")
    }

    #[tokio::test]
    async fn begin_rejects_conflicting_session() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Duration::from_secs(60));

        let _entry = registry.begin(key(), dir.path().join("fw.bin")).unwrap();
        assert!(matches!(
            registry.begin(key(), dir.path().join("fw.bin")),
            Err(UploadError::ConflictingSession)
        ));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn resume_unknown_key_is_none() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        assert!(registry.resume(&key()).is_none());
    }

    #[tokio::test]
    async fn close_frees_the_key_for_a_fresh_session() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Duration::from_secs(60));

        let entry = registry.begin(key(), dir.path().join("fw.bin")).unwrap();
        {
            let mut session = entry.lock().await;
            registry.close(&entry, &mut session);
            assert!(session.is_closed());
        }
        assert!(registry.resume(&key()).is_none());
        assert!(registry.begin(key(), dir.path().join("fw.bin")).is_ok());
    }

    #[tokio::test]
    async fn record_chunk_keeps_hashes_aligned_with_index() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Duration::from_secs(60));

        let entry = registry.begin(key(), dir.path().join("fw.bin")).unwrap();
        let mut session = entry.lock().await;
        session.open_writer().await.unwrap();
        session.write_frame(b"abc").await.unwrap();
        session.record_chunk("h0".into(), 3);

        assert_eq!(session.next_chunk(), 1);
        assert_eq!(session.bytes_written(), 3);
        assert_eq!(session.chunk_hashes(), &["h0".to_string()]);
    }

    #[tokio::test]
    async fn watchdog_abandons_stalled_session_and_deletes_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fw.bin");
        let registry = SessionRegistry::new(Duration::from_millis(50));

        let entry = registry.begin(key(), path.clone()).unwrap();
        {
            let mut session = entry.lock().await;
            session.open_writer().await.unwrap();
            session.write_frame(b"partial").await.unwrap();
            session.flush().await.unwrap();
        }
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(registry.resume(&key()).is_none());
        assert!(!path.exists());

        // The key is free for a fresh upload afterwards.
        assert!(registry.begin(key(), path).is_ok());
    }

    #[tokio::test]
    async fn successor_file_survives_a_restart_after_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fw.bin");
        let registry = SessionRegistry::new(Duration::from_millis(50));

        let entry = registry.begin(key(), path.clone()).unwrap();
        {
            let mut session = entry.lock().await;
            session.open_writer().await.unwrap();
            session.write_frame(b"stalled").await.unwrap();
            session.flush().await.unwrap();
        }

        // Wait for the watchdog to free the key, then restart immediately.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while registry.resume(&key()).is_some() {
            assert!(tokio::time::Instant::now() < deadline, "watchdog never fired");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let successor = registry.begin(key(), path.clone()).unwrap();
        {
            let mut session = successor.lock().await;
            session.open_writer().await.unwrap();
            session.write_frame(b"fresh").await.unwrap();
            session.flush().await.unwrap();
            registry.close(&successor, &mut session);
        }

        // No leftover abandonment work may unlink the successor's file.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn reschedule_pushes_the_deadline_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fw.bin");
        let registry = SessionRegistry::new(Duration::from_millis(150));

        let entry = registry.begin(key(), path.clone()).unwrap();

        // Keep touching the session before the window elapses.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(75)).await;
            let mut session = entry.lock().await;
            registry.reschedule(&entry, &mut session);
        }
        assert!(registry.resume(&key()).is_some());

        // Let it lapse.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(registry.resume(&key()).is_none());
    }

    #[tokio::test]
    async fn stale_watchdog_does_not_touch_a_successor_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fw.bin");
        let registry = SessionRegistry::new(Duration::from_millis(100));

        let entry = registry.begin(key(), path.clone()).unwrap();
        {
            let mut session = entry.lock().await;
            registry.close(&entry, &mut session);
        }

        // Same key, fresh session, started before the first watchdog's
        // deadline would have hit.
        let successor = registry.begin(key(), path.clone()).unwrap();
        {
            let mut session = successor.lock().await;
            session.open_writer().await.unwrap();
            session.write_frame(b"live").await.unwrap();
            session.flush().await.unwrap();
            // Keep the successor alive past the stale deadline.
            registry.reschedule(&successor, &mut session);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        {
            let mut session = successor.lock().await;
            registry.reschedule(&successor, &mut session);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(registry.resume(&key()).is_some());
        assert!(path.exists());
    }
}

// Job Lifecycle Tracker
//
// Process-wide registry of temp artifacts per job. Every path is registered
// the moment its file is created; `cleanup` removes whatever still exists.
// `JobGuard` ties cleanup to scope, so success, error, cancellation and
// client disconnect all end in the same place.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{Container, JobState};

/// Unique token naming one job and its temp directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

/// Role of a temp artifact within its job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    Video,
    Audio,
    Output,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Output => "output",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub job_id: JobId,
    pub dir: PathBuf,
    pub video_temp_path: Option<PathBuf>,
    pub audio_temp_path: Option<PathBuf>,
    pub output_temp_path: Option<PathBuf>,
    pub state: JobState,
    pub created_at: OffsetDateTime,
}

impl DownloadJob {
    fn slot(&mut self, role: ArtifactRole) -> &mut Option<PathBuf> {
        match role {
            ArtifactRole::Video => &mut self.video_temp_path,
            ArtifactRole::Audio => &mut self.audio_temp_path,
            ArtifactRole::Output => &mut self.output_temp_path,
        }
    }

    fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        [
            &self.video_temp_path,
            &self.audio_temp_path,
            &self.output_temp_path,
        ]
        .into_iter()
        .flatten()
    }
}

/// Counts for the health probe
#[derive(Debug, Clone, Serialize)]
pub struct JobsSnapshot {
    pub active: usize,
    pub by_state: BTreeMap<String, usize>,
}

pub struct JobTracker {
    root: PathBuf,
    max_age: Duration,
    jobs: Mutex<HashMap<JobId, DownloadJob>>,
}

impl JobTracker {
    /// Create a tracker rooted at `root`; the directory is created if missing
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_age,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a job: sweep expired jobs, create the job directory, register it
    pub fn create_job(self: &Arc<Self>) -> io::Result<JobGuard> {
        self.sweep_expired(self.max_age);

        let job_id = JobId::new();
        let dir = self.root.join(job_id.to_string());
        std::fs::create_dir(&dir)?;

        let job = DownloadJob {
            job_id,
            dir,
            video_temp_path: None,
            audio_temp_path: None,
            output_temp_path: None,
            state: JobState::Created,
            created_at: OffsetDateTime::now_utc(),
        };
        self.jobs.lock().insert(job_id, job);
        debug!(%job_id, "job created");

        Ok(JobGuard {
            tracker: Arc::clone(self),
            job_id,
        })
    }

    /// Path for an artifact of this job; unique per job and role
    pub fn artifact_path(&self, job_id: JobId, role: ArtifactRole, container: Container) -> PathBuf {
        self.root
            .join(job_id.to_string())
            .join(format!("{}.{}", role.as_str(), container.extension()))
    }

    /// Record ownership of paths. Returns false if the job is unknown
    /// (already cleaned up), in which case the caller must not keep the files.
    pub fn register(&self, job_id: JobId, paths: &[(ArtifactRole, PathBuf)]) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&job_id) else {
            return false;
        };
        for (role, path) in paths {
            *job.slot(*role) = Some(path.clone());
        }
        true
    }

    /// Delete one artifact now and stop tracking it
    pub fn release(&self, job_id: JobId, role: ArtifactRole) {
        let path = self
            .jobs
            .lock()
            .get_mut(&job_id)
            .and_then(|job| job.slot(role).take());
        if let Some(path) = path {
            remove_file_logged(job_id, &path);
        }
    }

    pub fn mark_state(&self, job_id: JobId, state: JobState) {
        if let Some(job) = self.jobs.lock().get_mut(&job_id) {
            debug!(%job_id, from = ?job.state, to = ?state, "job state");
            job.state = state;
        }
    }

    pub fn get(&self, job_id: JobId) -> Option<DownloadJob> {
        self.jobs.lock().get(&job_id).cloned()
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs.lock().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every artifact of a job and forget it. Idempotent; deletion
    /// errors are logged and never propagated.
    pub fn cleanup(&self, job_id: JobId) {
        let job = self.jobs.lock().remove(&job_id);
        let dir = self.root.join(job_id.to_string());

        if let Some(job) = &job {
            for path in job.paths() {
                remove_file_logged(job_id, path);
            }
        }

        // Anything left behind by a tool (e.g. ffmpeg temp) goes with the directory
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(%job_id, "failed to remove job directory: {}", e),
        }

        if let Some(job) = job {
            debug!(%job_id, state = ?job.state, "job cleaned up");
        }
    }

    /// Force cleanup of jobs older than `max_age`; returns how many were removed
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let now = OffsetDateTime::now_utc();
        let expired: Vec<JobId> = self
            .jobs
            .lock()
            .values()
            .filter(|job| (now - job.created_at) >= max_age)
            .map(|job| job.job_id)
            .collect();

        for job_id in &expired {
            warn!(%job_id, "sweeping expired job");
            self.cleanup(*job_id);
        }
        expired.len()
    }

    /// Remove job directories on disk that no live job owns and that are
    /// older than the max age (left over from a previous process)
    pub fn sweep_stale_dirs(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(job_id) = name.to_str().and_then(JobId::parse) else {
                continue;
            };
            if self.contains(job_id) || !entry.file_type()?.is_dir() {
                continue;
            }

            let age = entry
                .metadata()?
                .modified()?
                .elapsed()
                .unwrap_or_default();
            if age >= self.max_age {
                match std::fs::remove_dir_all(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(%job_id, "failed to remove stale directory: {}", e),
                }
            }
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> JobsSnapshot {
        let jobs = self.jobs.lock();
        let mut by_state = BTreeMap::new();
        for job in jobs.values() {
            *by_state.entry(format!("{:?}", job.state).to_uppercase()).or_insert(0) += 1;
        }
        JobsSnapshot {
            active: jobs.len(),
            by_state,
        }
    }

    /// Periodic background sweep
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = tracker.sweep_expired(tracker.max_age);
                if swept > 0 {
                    info!(swept, "background sweep removed expired jobs");
                }
            }
        })
    }
}

fn remove_file_logged(job_id: JobId, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(%job_id, path = %path.display(), "removed temp artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(%job_id, path = %path.display(), "failed to remove temp artifact: {}", e),
    }
}

/// Scoped ownership of a job; cleanup runs when the guard is dropped
pub struct JobGuard {
    tracker: Arc<JobTracker>,
    job_id: JobId,
}

impl JobGuard {
    pub fn id(&self) -> JobId {
        self.job_id
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn mark(&self, state: JobState) {
        self.tracker.mark_state(self.job_id, state);
    }

    pub fn artifact_path(&self, role: ArtifactRole, container: Container) -> PathBuf {
        self.tracker.artifact_path(self.job_id, role, container)
    }

    /// Register an artifact before its file is created. The file is deleted
    /// when the returned handle drops, unless it was kept.
    ///
    /// Fails when the job is no longer tracked (swept or cleaned up).
    pub fn begin_artifact(
        &self,
        role: ArtifactRole,
        container: Container,
    ) -> io::Result<PendingArtifact<'_>> {
        let path = self.artifact_path(role, container);
        if !self.tracker.register(self.job_id, &[(role, path.clone())]) {
            warn!(job_id = %self.job_id, role = role.as_str(), "artifact for untracked job");
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("job {} is no longer tracked", self.job_id),
            ));
        }
        Ok(PendingArtifact {
            job: self,
            role,
            path,
            kept: false,
        })
    }
}

/// An artifact being written; partial output never outlives a failed stage
pub struct PendingArtifact<'a> {
    job: &'a JobGuard,
    role: ArtifactRole,
    path: PathBuf,
    kept: bool,
}

impl PendingArtifact<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The artifact is complete; ownership stays with the job
    pub fn keep(mut self) -> PathBuf {
        self.kept = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingArtifact<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.job.tracker.release(self.job.job_id, self.role);
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Some(job) = self.tracker.get(self.job_id) {
            if !job.state.is_terminal() {
                // dropped mid-flight: error, cancellation or client disconnect
                self.tracker.mark_state(self.job_id, JobState::Failed);
            }
        }
        self.tracker.cleanup(self.job_id);
    }
}

impl fmt::Debug for JobGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGuard").field("job_id", &self.job_id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &Path) -> Arc<JobTracker> {
        Arc::new(JobTracker::new(dir.join("jobs"), Duration::from_secs(3600)).unwrap())
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"data").unwrap();
    }

    #[test]
    fn test_guard_drop_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());

        let guard = tracker.create_job().unwrap();
        let job_id = guard.id();
        let video = guard.artifact_path(ArtifactRole::Video, Container::Mp4);
        let audio = guard.artifact_path(ArtifactRole::Audio, Container::M4a);
        touch(&video);
        touch(&audio);
        assert!(tracker.register(
            job_id,
            &[(ArtifactRole::Video, video.clone()), (ArtifactRole::Audio, audio.clone())]
        ));

        drop(guard);

        assert!(!video.exists());
        assert!(!audio.exists());
        assert!(!tracker.contains(job_id));
        assert_eq!(std::fs::read_dir(tracker.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());
        let guard = tracker.create_job().unwrap();
        let job_id = guard.id();

        tracker.cleanup(job_id);
        tracker.cleanup(job_id);
        assert!(!tracker.register(job_id, &[]));
        drop(guard);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_release_deletes_single_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());
        let guard = tracker.create_job().unwrap();
        let video = guard.artifact_path(ArtifactRole::Video, Container::Mp4);
        let output = guard.artifact_path(ArtifactRole::Output, Container::Mp4);
        touch(&video);
        touch(&output);
        tracker.register(
            guard.id(),
            &[(ArtifactRole::Video, video.clone()), (ArtifactRole::Output, output.clone())],
        );

        tracker.release(guard.id(), ArtifactRole::Video);
        assert!(!video.exists());
        assert!(output.exists());
        assert!(tracker.get(guard.id()).unwrap().video_temp_path.is_none());
    }

    #[test]
    fn test_pending_artifact_removed_unless_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());
        let guard = tracker.create_job().unwrap();

        let partial = guard.begin_artifact(ArtifactRole::Audio, Container::M4a).unwrap();
        touch(partial.path());
        let partial_path = partial.path().to_path_buf();
        drop(partial);
        assert!(!partial_path.exists());
        assert!(tracker.get(guard.id()).unwrap().audio_temp_path.is_none());

        let done = guard.begin_artifact(ArtifactRole::Video, Container::Mp4).unwrap();
        touch(done.path());
        let kept = done.keep();
        assert!(kept.exists());
        assert_eq!(tracker.get(guard.id()).unwrap().video_temp_path, Some(kept.clone()));

        drop(guard);
        assert!(!kept.exists());
    }

    #[test]
    fn test_artifact_for_swept_job_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());
        let guard = tracker.create_job().unwrap();

        assert_eq!(tracker.sweep_expired(Duration::ZERO), 1);

        let err = guard
            .begin_artifact(ArtifactRole::Video, Container::Mp4)
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!guard.artifact_path(ArtifactRole::Video, Container::Mp4).exists());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_sweep_expired_and_state_marking() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());
        let guard = tracker.create_job().unwrap();
        guard.mark(JobState::Fetching);
        assert_eq!(tracker.snapshot().by_state.get("FETCHING"), Some(&1));

        assert_eq!(tracker.sweep_expired(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.sweep_expired(Duration::ZERO), 1);
        assert!(tracker.is_empty());
        assert!(!tracker.root().join(guard.id().to_string()).exists());
    }

    #[test]
    fn test_stale_dirs_removed_only_when_untracked() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker =
            Arc::new(JobTracker::new(tmp.path().join("jobs"), Duration::ZERO).unwrap());
        let live = JobTracker::create_job(&tracker).unwrap();

        let orphan = tracker.root().join(JobId::new().to_string());
        std::fs::create_dir(&orphan).unwrap();
        touch(&orphan.join("video.mp4"));
        touch(&tracker.root().join("cookies.txt"));

        assert_eq!(tracker.sweep_stale_dirs().unwrap(), 1);
        assert!(!orphan.exists());
        assert!(tracker.root().join(live.id().to_string()).exists());
        assert!(tracker.root().join("cookies.txt").exists());
    }

    #[test]
    fn test_concurrent_jobs_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = tracker(tmp.path());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let guard = tracker.create_job().unwrap();
                    let path = guard.artifact_path(ArtifactRole::Output, Container::Mp4);
                    touch(&path);
                    tracker.register(guard.id(), &[(ArtifactRole::Output, path)]);
                    guard.id()
                })
            })
            .collect();

        let ids: Vec<JobId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 8);
        assert!(tracker.is_empty());
        assert_eq!(std::fs::read_dir(tracker.root()).unwrap().count(), 0);
    }
}

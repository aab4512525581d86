//! Worker layer: long operations off the control thread.
//!
//! The host keeps one control thread; series assembly, surface building,
//! simplification and export run as blocking tasks on the tokio pool. Each
//! job streams [`JobEvent`]s over an unbounded channel (poll or await them)
//! and carries a [`CancelFlag`] honored at the operators' checkpoints. The
//! shared session wraps the volume in a `RwLock`, so read-only inspection
//! can run concurrently while mutations are exclusive, and edits commit (and
//! push their undo commands) strictly in completion order.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::core::error::Error;
use crate::core::progress::{CancelFlag, TaskCtx};
use crate::core::types::Result;
use crate::edit::EditSession;
use crate::io;
use crate::surface::simplify::{self, SimplifyOptions};
use crate::surface::{self, ExtractOptions, Mesh};
use crate::volume::VoxelVolume;
use crate::volume::series::{self, FilterReport, SeriesSlice};

/// Host-visible lifecycle of a job.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    Progress { percent: u8, stage: String },
    Completed,
    Failed(String),
    Cancelled,
}

/// Handle to a running job.
pub struct JobHandle<T> {
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: CancelFlag,
    join: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Request cancellation; the job stops at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain all events currently available without blocking.
    pub fn poll_events(&mut self) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Await the next event, `None` once the job is done and drained.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Await the job's result.
    pub async fn join(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(join_error) => {
                log::error!("worker task failed: {join_error}");
                Err(Error::Io(std::io::Error::other(join_error)))
            }
        }
    }
}

/// Run a blocking operation as a job. The closure gets a [`TaskCtx`] wired
/// to the handle's event channel and cancel flag.
pub fn spawn<T, F>(name: &'static str, f: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&TaskCtx) -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelFlag::new();

    let progress_tx = tx.clone();
    let ctx = TaskCtx::with_progress(move |percent, stage| {
        let _ = progress_tx.send(JobEvent::Progress {
            percent,
            stage: stage.to_string(),
        });
    })
    .with_cancel(cancel.clone());

    let join = tokio::task::spawn_blocking(move || {
        log::debug!("job '{name}' started");
        let outcome = f(&ctx);
        let event = match &outcome {
            Ok(_) => JobEvent::Completed,
            Err(Error::Cancelled) => JobEvent::Cancelled,
            Err(e) => JobEvent::Failed(e.to_string()),
        };
        let _ = tx.send(event);
        outcome
    });

    JobHandle { events: rx, cancel, join }
}

/// The edit session shared between the control thread and workers.
#[derive(Clone)]
pub struct SharedSession(Arc<RwLock<EditSession>>);

impl SharedSession {
    pub fn new(volume: VoxelVolume) -> Self {
        Self(Arc::new(RwLock::new(EditSession::new(volume))))
    }

    /// Read access from async context.
    pub async fn read<R>(&self, f: impl FnOnce(&EditSession) -> R) -> R {
        f(&*self.0.read().await)
    }

    /// Exclusive access from async context; one mutation in flight per
    /// volume.
    pub async fn edit<R>(&self, f: impl FnOnce(&mut EditSession) -> R) -> R {
        f(&mut *self.0.write().await)
    }

    /// Run a mutating tool call as a job. The write lock is held for the
    /// duration, so mutations serialize and their undo commands are recorded
    /// in completion order.
    pub fn edit_job<R, F>(&self, name: &'static str, f: F) -> JobHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut EditSession, &TaskCtx) -> Result<R> + Send + 'static,
    {
        let shared = self.0.clone();
        spawn(name, move |ctx| {
            let mut session = shared.blocking_write();
            f(&mut session, ctx)
        })
    }

    /// Build the surface mesh of the current mask; readers may run
    /// concurrently with each other.
    pub fn build_surface_job(&self, opts: ExtractOptions) -> JobHandle<Mesh> {
        let shared = self.0.clone();
        spawn("surface build", move |ctx| {
            let session = shared.blocking_read();
            surface::build_surface(session.volume(), &opts, ctx)
        })
    }

    /// Save the volume container in the background.
    pub fn save_volume_job(&self, path: PathBuf) -> JobHandle<()> {
        let shared = self.0.clone();
        spawn("volume save", move |ctx| {
            let session = shared.blocking_read();
            io::container::save_volume(session.volume(), &path, ctx)
        })
    }
}

/// Assemble a decoded series into a volume in the background.
pub fn assemble_series_job(
    records: Vec<std::result::Result<SeriesSlice, String>>,
) -> JobHandle<(VoxelVolume, FilterReport)> {
    spawn("series load", move |ctx| series::assemble_series(records, ctx))
}

/// Decimate a mesh in the background. The input mesh is owned by the job; a
/// cancelled run simply drops it.
pub fn simplify_job(mesh: Mesh, opts: SimplifyOptions) -> JobHandle<Mesh> {
    spawn("simplify", move |ctx| simplify::simplify(&mesh, &opts, ctx))
}

/// Export a mesh as binary STL in the background.
pub fn export_stl_job(mesh: Arc<Mesh>, path: PathBuf) -> JobHandle<()> {
    spawn("stl export", move |ctx| io::stl::save_stl(&mesh, &path, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{UVec3, Vec3};

    fn block_volume() -> VoxelVolume {
        let mut v = VoxelVolume::new(UVec3::splat(12), Vec3::ONE, Vec3::ZERO).unwrap();
        v.mask_mut().fill(0);
        for z in 3..9 {
            for y in 3..9 {
                for x in 3..9 {
                    v.set_visible(x, y, z, true).unwrap();
                }
            }
        }
        v
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_surface_job_completes_with_events() {
        let session = SharedSession::new(block_volume());
        let mut job = session.build_surface_job(ExtractOptions::default());

        let mesh = {
            let mut last = None;
            let handle = &mut job;
            while let Some(event) = handle.next_event().await {
                last = Some(event);
            }
            assert_eq!(last, Some(JobEvent::Completed));
            job.join().await.unwrap()
        };
        assert!(mesh.is_closed());
        assert!(mesh.triangle_count() > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_job_reports_cancelled() {
        let session = SharedSession::new(block_volume());
        let job = session.build_surface_job(ExtractOptions::default());
        job.cancel();

        // Cancellation may land before the first checkpoint or after
        // completion; both terminal states are legal, mid-mutation is not.
        let result = job.join().await;
        match result {
            Err(Error::Cancelled) | Ok(_) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_edit_jobs_serialize_and_keep_undo_order() {
        let session = SharedSession::new(block_volume());

        let first = session.edit_job("erase", |s, _| s.erase(UVec3::new(4, 4, 4), 2));
        first.join().await.unwrap();

        let second = session.edit_job("smooth", |s, ctx| s.total_smoothing(ctx));
        second.join().await.unwrap();

        session
            .edit(|s| {
                assert_eq!(s.undo(), Some("total smoothing"));
                assert_eq!(s.undo(), Some("voxel eraser"));
                assert!(s.undo().is_none());
            })
            .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_assemble_series_job() {
        use crate::volume::Modality;
        use crate::volume::series::SliceGeometry;

        let geometry = SliceGeometry {
            rows: 2,
            cols: 2,
            pixel_spacing: [1.0, 1.0],
            slice_spacing: 1.0,
        };
        let records = (0..3)
            .map(|i| {
                Ok(SeriesSlice {
                    geometry,
                    position: i as f32,
                    modality: Modality::Ct,
                    pixels: vec![i as i16; 4],
                })
            })
            .collect();

        let job = assemble_series_job(records);
        let (volume, report) = job.join().await.unwrap();
        assert_eq!(volume.dims(), UVec3::new(2, 2, 3));
        assert_eq!(report.accepted, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_job_writes_file() {
        let session = SharedSession::new(block_volume());
        let mesh = session.build_surface_job(ExtractOptions::default());
        let mesh = Arc::new(mesh.join().await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.stl");
        export_stl_job(mesh.clone(), path.clone()).join().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(
            bytes.len(),
            80 + 4 + mesh.triangle_count() * io::stl::TRIANGLE_RECORD_SIZE
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_job_reports_failure() {
        let session = SharedSession::new(VoxelVolume::empty());
        let mut job = session.build_surface_job(ExtractOptions::default());

        let mut events = Vec::new();
        while let Some(event) = job.next_event().await {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(JobEvent::Failed(_))));
        assert!(job.join().await.is_err());
    }
}

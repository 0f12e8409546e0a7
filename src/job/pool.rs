//! Worker pool
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use log::{debug, error};

use tokio::{
    sync::{
        Mutex,
        mpsc::{self, Receiver as Rx, Sender as Tx},
        watch::{self, Receiver as WatchRx},
    },
    task::JoinHandle,
};

use uuid::Uuid;

use crate::{
    error::JobError,
    input::RawInput,
    job::{JobRecord, JobStatus, pipeline::Pipeline},
};

/// Queued unit of work
struct Submission {
    job: JobRecord,
    input: RawInput,
    artifacts: Vec<PathBuf>,
}

/// Artifact paths owned by in-flight jobs
#[derive(Debug, Default)]
struct Claims(HashSet<PathBuf>);

impl Claims {
    /// Names the artifacts of `input` after the first stem no in-flight job
    /// already owns: basename, then file name, then numbered file name.
    fn reserve(&mut self, input: &RawInput, prefix: Option<&Path>) -> (RawInput, Vec<PathBuf>) {
        let name = input.uncompressed_name().to_string();
        let mut nth = 0;

        loop {
            let stem = match nth {
                0 => input.artifact_stem(),
                1 => name.clone(),
                nth => format!("{}.{}", name, nth),
            };

            let input = input.with_artifact_stem(&stem);
            let artifacts = vec![
                input.canonical_artifact(prefix),
                input.location_artifact(prefix),
            ];

            if artifacts.iter().all(|path| !self.0.contains(path)) {
                self.0.extend(artifacts.iter().cloned());
                return (input, artifacts);
            }

            nth += 1;
        }
    }

    fn release(&mut self, artifacts: &[PathBuf]) {
        for path in artifacts {
            self.0.remove(path);
        }
    }
}

/// Caller side of a submitted job: status polling only
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    filename: String,
    rx: WatchRx<JobStatus>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Latest [JobStatus] snapshot
    pub fn status(&self) -> JobStatus {
        self.rx.borrow().clone()
    }

    /// Waits for a terminal [JobStatus]. Returns the latest snapshot
    /// if the job was abandoned.
    pub async fn wait(&mut self) -> JobStatus {
        loop {
            if self.rx.borrow_and_update().is_terminal() {
                break;
            }
            if self.rx.changed().await.is_err() {
                break;
            }
        }
        self.rx.borrow().clone()
    }
}

/// N workers draining a shared queue. Each job is processed end to end
/// by a single worker, on a blocking thread. Jobs in flight never share
/// an artifact path.
pub struct WorkerPool {
    tx: Option<Tx<Submission>>,
    workers: Vec<JoinHandle<()>>,
    claims: Arc<StdMutex<Claims>>,
    prefix: Option<PathBuf>,
}

impl WorkerPool {
    /// Deploys `workers` workers. Must be called within a tokio runtime.
    pub fn new(pipeline: Pipeline, workers: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Submission>(queue_size.max(1));
        let rx: Arc<Mutex<Rx<Submission>>> = Arc::new(Mutex::new(rx));
        let claims = Arc::new(StdMutex::new(Claims::default()));
        let prefix = pipeline.prefix().map(|p| p.to_path_buf());
        let pipeline = Arc::new(pipeline);

        let workers = (0..workers.max(1))
            .map(|nth| {
                let rx = rx.clone();
                let claims = claims.clone();
                let pipeline = pipeline.clone();

                tokio::spawn(async move {
                    loop {
                        let submission = rx.lock().await.recv().await;

                        let Some(Submission {
                            mut job,
                            input,
                            artifacts,
                        }) = submission
                        else {
                            debug!("worker #{} - queue closed", nth);
                            break;
                        };

                        debug!("worker #{} - accepted {}", nth, job.id());

                        let pipeline = pipeline.clone();

                        let ret = tokio::task::spawn_blocking(move || {
                            match pipeline.process(&mut job, &input) {
                                Ok(location) => {
                                    debug!("{} - succeeded: {}", job.id(), location.display())
                                },
                                Err(e) => debug!("{} - failed: {}", job.id(), e),
                            }
                        })
                        .await;

                        if let Err(e) = ret {
                            error!("worker #{} - job aborted: {}", nth, e);
                        }

                        claims
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .release(&artifacts);
                    }
                })
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            claims,
            prefix,
        }
    }

    /// Queues a new job. Its artifacts are renamed when they collide
    /// with those of a job in flight.
    pub async fn submit(&self, input: RawInput) -> Result<JobHandle, JobError> {
        let tx = self.tx.as_ref().ok_or(JobError::PoolClosed)?;

        let (input, artifacts) = self
            .claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reserve(&input, self.prefix.as_deref());

        let (status_tx, status_rx) = watch::channel(JobStatus::queued());
        let job = JobRecord::new(input.filename()).with_publisher(status_tx);

        let handle = JobHandle {
            id: job.id(),
            filename: input.filename().to_string(),
            rx: status_rx,
        };

        debug!("{} - queued {}", handle.id, handle.filename);

        if tx
            .send(Submission {
                job,
                input,
                artifacts: artifacts.clone(),
            })
            .await
            .is_err()
        {
            self.claims
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .release(&artifacts);
            return Err(JobError::PoolClosed);
        }

        Ok(handle)
    }

    /// Closes the queue, then waits for pending jobs to complete
    pub async fn shutdown(mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("worker failure: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Claims, WorkerPool};
    use crate::{
        fallback::client::Disabled,
        input::{FormatKind, RawInput},
        job::{ResultStatus, State, pipeline::Pipeline},
        settings::Settings,
    };
    use std::{path::Path, sync::Arc};

    const GGA: &str =
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47,1700000000000";

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.nmea");
        std::fs::write(&good, format!("{}\n", GGA)).unwrap();

        let bad = dir.path().join("bad.dat");
        std::fs::write(&bad, "nothing to see\n").unwrap();

        let pipeline = Pipeline::new(&Settings::default(), Arc::new(Disabled));
        let pool = WorkerPool::new(pipeline, 2, 8);

        let mut good = pool.submit(RawInput::new(&good)).await.unwrap();
        let mut bad = pool.submit(RawInput::new(&bad)).await.unwrap();
        assert_ne!(good.id(), bad.id());

        let status = good.wait().await;
        assert_eq!(status.state, State::Succeeded);
        let result = status.result.unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.result_file.as_deref(), Some("good.location.jsonl"));

        let status = bad.wait().await;
        assert_eq!(status.state, State::Failed);
        assert_eq!(status.result.unwrap().status, ResultStatus::Error);
        assert!(!status.output.is_empty());

        pool.shutdown().await;
    }

    #[test]
    fn test_claims() {
        let mut claims = Claims::default();

        let (obs, obs_artifacts) = claims.reserve(&RawInput::new("/data/x.obs"), None);
        assert_eq!(obs.location_artifact(None), Path::new("/data/x.location.jsonl"));

        let (nmea, nmea_artifacts) = claims.reserve(&RawInput::new("/data/x.nmea.gz"), None);
        assert_eq!(nmea.canonical_artifact(None), Path::new("/data/x.nmea.jsonl"));
        assert_eq!(
            nmea.location_artifact(None),
            Path::new("/data/x.nmea.location.jsonl")
        );

        // same name, other directory, shared prefix
        let prefix = Some(Path::new("/out"));
        let (first, _) = claims.reserve(&RawInput::new("/a/y.nmea"), prefix);
        let (second, _) = claims.reserve(&RawInput::new("/b/y.nmea"), prefix);
        let (third, _) = claims.reserve(&RawInput::new("/c/y.nmea"), prefix);
        assert_eq!(first.location_artifact(prefix), Path::new("/out/y.location.jsonl"));
        assert_eq!(
            second.location_artifact(prefix),
            Path::new("/out/y.nmea.location.jsonl")
        );
        assert_eq!(
            third.location_artifact(prefix),
            Path::new("/out/y.nmea.2.location.jsonl")
        );

        // released paths are reused
        claims.release(&obs_artifacts);
        claims.release(&nmea_artifacts);
        let (again, _) = claims.reserve(&RawInput::new("/data/x.nmea"), None);
        assert_eq!(again.location_artifact(None), Path::new("/data/x.location.jsonl"));
    }

    #[tokio::test]
    async fn test_same_stem_jobs() {
        let dir = tempfile::tempdir().unwrap();

        let nmea = dir.path().join("x.nmea");
        std::fs::write(&nmea, format!("{}\n", GGA)).unwrap();

        let txt = dir.path().join("x.txt");
        std::fs::write(&txt, format!("{}\n{}\n", GGA, GGA)).unwrap();

        let pipeline = Pipeline::new(&Settings::default(), Arc::new(Disabled));
        let pool = WorkerPool::new(pipeline, 2, 8);

        // both queued before any worker runs
        let mut first = pool.submit(RawInput::new(&nmea)).await.unwrap();
        let mut second = pool
            .submit(RawInput::new(&txt).with_format(FormatKind::Nmea))
            .await
            .unwrap();

        let status = first.wait().await;
        assert_eq!(status.state, State::Succeeded);
        assert_eq!(
            status.result.unwrap().result_file.as_deref(),
            Some("x.location.jsonl")
        );

        let status = second.wait().await;
        assert_eq!(status.state, State::Succeeded);
        assert_eq!(
            status.result.unwrap().result_file.as_deref(),
            Some("x.txt.location.jsonl")
        );

        pool.shutdown().await;

        let lines = |name: &str| {
            std::fs::read_to_string(dir.path().join(name))
                .unwrap()
                .lines()
                .count()
        };

        assert_eq!(lines("x.location.jsonl"), 1);
        assert_eq!(lines("x.txt.location.jsonl"), 2);
    }
}

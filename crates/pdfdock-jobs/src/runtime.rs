//! Process-wide wiring: store, dispatcher, task backend and signer built once
//! from [`Settings`].

use crate::backend::{self, TaskBackend};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::processor::Registry;
use crate::service::JobService;
use crate::settings::Settings;
use crate::signer::DownloadSigner;
use crate::store::JobStore;
use std::sync::Arc;

pub struct Runtime {
    settings: Settings,
    store: JobStore,
    dispatcher: Dispatcher,
    backend: Arc<dyn TaskBackend>,
    signer: DownloadSigner,
}

impl Runtime {
    /// Build everything, choosing the task backend from `settings`.
    pub async fn init(settings: Settings, registry: Registry) -> Result<Self> {
        settings.validate()?;
        let store = JobStore::open(&settings.jobs_dir).await?;
        let dispatcher = Dispatcher::new(store.clone(), registry).with_timeout(settings.job_timeout());
        let backend = backend::init_backend(&settings, dispatcher.clone()).await;
        Ok(Self::assemble(settings, store, dispatcher, backend))
    }

    /// Like [`Runtime::init`] but with a caller-supplied backend.
    pub async fn with_backend(
        settings: Settings,
        registry: Registry,
        backend: Arc<dyn TaskBackend>,
    ) -> Result<Self> {
        settings.validate()?;
        let store = JobStore::open(&settings.jobs_dir).await?;
        let dispatcher = Dispatcher::new(store.clone(), registry).with_timeout(settings.job_timeout());
        Ok(Self::assemble(settings, store, dispatcher, backend))
    }

    fn assemble(
        settings: Settings,
        store: JobStore,
        dispatcher: Dispatcher,
        backend: Arc<dyn TaskBackend>,
    ) -> Self {
        if settings.uses_dev_secret() {
            tracing::warn!("PDFDOCK_SECRET_KEY is not set, download tokens use the development secret");
        }
        tracing::info!(
            jobs_dir = %settings.jobs_dir.display(),
            strategy = backend.strategy().as_str(),
            operations = ?dispatcher.registry().operations(),
            "runtime ready"
        );
        let signer = DownloadSigner::new(&settings.secret_key);
        Self {
            settings,
            store,
            dispatcher,
            backend,
            signer,
        }
    }

    pub fn service(&self) -> JobService {
        JobService::new(
            self.store.clone(),
            Arc::clone(&self.backend),
            self.signer.clone(),
            self.settings.max_upload_bytes,
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn backend(&self) -> &Arc<dyn TaskBackend> {
        &self.backend
    }

    /// Consumer for the shared Redis queue, for a dedicated worker process.
    #[cfg(feature = "redis")]
    pub async fn queue_worker(
        &self,
    ) -> Result<backend::queue::QueueWorker<backend::redis::RedisQueue>> {
        let url = self.settings.redis_url.as_deref().ok_or_else(|| {
            crate::error::JobError::ConfigError("PDFDOCK_REDIS_URL is required for a queue worker".into())
        })?;
        let queue = backend::redis::RedisQueue::connect(url, &self.settings.queue_name).await?;
        Ok(backend::queue::QueueWorker::new(queue, self.dispatcher.clone())
            .with_lease(self.settings.worker_lease()))
    }

    /// Stop the task backend, draining local work.
    pub async fn shutdown(&self) -> Result<()> {
        self.backend.shutdown().await
    }
}

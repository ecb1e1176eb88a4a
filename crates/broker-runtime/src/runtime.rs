//! # Broker Runtime
//!
//! Owns the paging manager for the lifetime of the process and wires the
//! transaction coordinator and large-message receiver to it.
//!
//! ## Startup Sequence
//!
//! 1. Open (and lock) the paging directory
//! 2. Load address settings
//! 3. Start the paging manager: reload stores, transaction records, bodies
//! 4. Rebuild prepared XA branches for recovery
//! 5. Spawn the reclamation worker
//!
//! ## Shutdown Sequence
//!
//! 1. Stop the reclamation worker
//! 2. Run a final reclamation pass so cursor checkpoints are current
//! 3. Stop the paging manager (waits for in-flight transactions)

use anyhow::{Context, Result};
use mq_01_paging::{
    FilePagingStoreFactory, PagingManager, SendContext, TransactionCoordinator,
};
use mq_02_large_message::{
    ChunkReceiver, CreditWindow, InVmChunkSink, LargeMessageConsumer, LargeMessageProducer,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::workers::spawn_reclaimer;

pub struct BrokerRuntime {
    config: BrokerConfig,
    manager: Arc<PagingManager>,
    coordinator: Arc<TransactionCoordinator>,
    receiver: Arc<ChunkReceiver>,
    shutdown_tx: watch::Sender<bool>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerRuntime {
    pub async fn start(config: BrokerConfig) -> Result<Self> {
        info!("===========================================");
        info!("  Courier-MQ Broker Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let factory = FilePagingStoreFactory::open(&config.data_dir).with_context(|| {
            format!("Failed to open paging directory {}", config.data_dir.display())
        })?;
        let settings = config
            .load_address_settings()
            .context("Failed to load address settings")?;

        let manager = PagingManager::new(
            config.paging.clone(),
            Arc::new(factory),
            Arc::new(settings),
        )
        .context("Failed to create paging manager")?;
        manager.start().context("Failed to start paging")?;
        let manager = Arc::new(manager);

        let coordinator = Arc::new(TransactionCoordinator::new(manager.clone()));
        let receiver = Arc::new(ChunkReceiver::new(manager.clone()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reclaimer =
            spawn_reclaimer(manager.clone(), config.paging.reclaim_interval, shutdown_rx);

        info!("Data Dir: {:?}", config.data_dir);
        info!("Addresses: {}", manager.addresses().len());
        info!("In-doubt Transactions: {}", coordinator.recover().len());
        Ok(Self {
            config,
            manager,
            coordinator,
            receiver,
            shutdown_tx,
            reclaimer: Mutex::new(Some(reclaimer)),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PagingManager> {
        &self.manager
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    pub fn receiver(&self) -> &Arc<ChunkReceiver> {
        &self.receiver
    }

    /// A producer sending to this broker in-process under `ctx`.
    pub fn in_vm_producer(
        &self,
        ctx: SendContext,
    ) -> Result<LargeMessageProducer<InVmChunkSink>> {
        let window = CreditWindow::new(self.config.large_messages.confirmation_window_size);
        let sink = InVmChunkSink::new(self.receiver.clone(), window.clone(), ctx);
        LargeMessageProducer::new(self.config.large_messages.clone(), Arc::new(sink), window)
            .context("Invalid large message configuration")
    }

    pub fn consumer(&self) -> LargeMessageConsumer {
        LargeMessageConsumer::new(self.manager.large_bodies().clone(), &self.config.large_messages)
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        self.shutdown_tx.send_replace(true);
        if let Some(worker) = self.reclaimer.lock().await.take() {
            if let Err(e) = worker.await {
                warn!("[runtime] Reclaimer ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.manager.reclaim_all() {
            warn!("[runtime] Final reclamation pass failed: {}", e);
        }
        self.manager
            .stop()
            .await
            .context("Paging did not stop cleanly")?;

        info!("Shutdown complete");
        Ok(())
    }
}

//! # Background Workers
//!
//! The reclamation pass runs on a fixed interval until shutdown is signalled.

use mq_01_paging::PagingManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn the periodic reclamation worker.
pub fn spawn_reclaimer(
    manager: Arc<PagingManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => run_pass(&manager),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[runtime] Reclaimer shutdown signal received");
                        return;
                    }
                }
            }
        }
    })
}

fn run_pass(manager: &PagingManager) {
    if !manager.is_started() {
        return;
    }
    match manager.reclaim_all() {
        Ok(report) if !report.is_empty() => debug!(
            "[runtime] Reclaimed {} pages ({} bytes){}",
            report.deleted_pages.len(),
            report.freed_bytes,
            if report.left_paging { ", address left paging" } else { "" }
        ),
        Ok(_) => {}
        Err(e) => warn!("[runtime] Reclamation pass failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_01_paging::{
        AddressFullPolicy, AddressSettings, AddressSettingsRepository, InMemoryPagingStoreFactory,
        PagingApi, PagingConfig, SendContext,
    };
    use shared_types::{Address, Message, QueueName};

    #[tokio::test(start_paused = true)]
    async fn test_reclaimer_deletes_consumed_pages() {
        let settings = AddressSettings::new()
            .with_max_size(100)
            .with_page_size(400)
            .with_policy(AddressFullPolicy::Page);
        let manager = PagingManager::new(
            PagingConfig::default(),
            Arc::new(InMemoryPagingStoreFactory::new()),
            Arc::new(AddressSettingsRepository::new(settings)),
        )
        .unwrap();
        manager.start().unwrap();
        let manager = Arc::new(manager);

        let a = Address::new("a").unwrap();
        let sub = manager
            .bind_queue(a.clone(), QueueName::new("q").unwrap())
            .unwrap();
        for _ in 0..3 {
            let m = Message::new(manager.next_message_id(), a.clone(), vec![1; 300]);
            manager.send(m, &SendContext::detached()).await.unwrap();
        }
        while let Some(d) = sub.next_deliverable().unwrap() {
            sub.acknowledge(d.id).unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let worker = spawn_reclaimer(manager.clone(), Duration::from_millis(100), rx);
        tokio::time::sleep(Duration::from_millis(250)).await;

        let store = manager.store(&a).unwrap();
        assert_eq!(store.page_count(), 0);
        assert!(!store.is_paging());

        tx.send(true).unwrap();
        worker.await.unwrap();
    }
}

//! # XA Recovery Across Restarts
//!
//! A prepared branch must outlive the broker process: after a restart the
//! coordinator reports its xid, and the branch can still be committed or
//! rolled back with exactly the effect it would have had before the crash.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{paging_config, pattern};
    use broker_runtime::BrokerRuntime;
    use mq_01_paging::{PagingApi, PagingError, SendContext};
    use mq_02_large_message::{
        CreditWindow, InVmChunkSink, LargeMessageHeader, LargeMessageProducer,
    };
    use shared_types::{Address, Message, QueueName, Xid};
    use std::io::Cursor;
    use std::sync::Arc;

    fn orders() -> (Address, QueueName) {
        (
            Address::new("orders").unwrap(),
            QueueName::new("orders.q").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_prepared_branch_rolled_back_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (address, queue) = orders();
        let xid = Xid::random();

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let manager = runtime.manager().clone();
        manager.bind_queue(address.clone(), queue.clone()).unwrap();

        let branch = runtime.coordinator().start(xid.clone()).unwrap();
        for _ in 0..3 {
            let id = manager.next_message_id();
            branch
                .send(Message::new(id, address.clone(), b"item".to_vec()))
                .unwrap();
        }
        runtime.coordinator().end(&xid).unwrap();
        runtime.coordinator().prepare(&xid).unwrap();
        runtime.shutdown().await.unwrap();
        drop(branch);
        drop(manager);
        drop(runtime);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        assert_eq!(runtime.coordinator().recover(), vec![xid.clone()]);

        runtime.coordinator().rollback(&xid).unwrap();
        assert!(runtime.coordinator().recover().is_empty());
        let sub = runtime.manager().subscription(&address, &queue).unwrap();
        assert!(sub.next_deliverable().unwrap().is_none());

        // A decided branch is forgotten.
        assert!(matches!(
            runtime.coordinator().rollback(&xid),
            Err(PagingError::UnknownTransaction { .. })
        ));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_prepared_branch_committed_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (address, queue) = orders();
        let xid = Xid::random();

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let manager = runtime.manager().clone();
        manager.bind_queue(address.clone(), queue.clone()).unwrap();
        let branch = runtime.coordinator().start(xid.clone()).unwrap();
        let mut ids = Vec::new();
        for i in 0..3u8 {
            let id = manager.next_message_id();
            ids.push(id);
            branch
                .send(Message::new(id, address.clone(), vec![i; 16]))
                .unwrap();
        }
        runtime.coordinator().prepare(&xid).unwrap();
        runtime.shutdown().await.unwrap();
        drop(branch);
        drop(manager);
        drop(runtime);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        runtime
            .coordinator()
            .commit(&xid, false, &SendContext::detached())
            .await
            .unwrap();

        let sub = runtime.manager().subscription(&address, &queue).unwrap();
        let mut seen = Vec::new();
        while let Some(delivery) = sub.next_deliverable().unwrap() {
            seen.push(delivery.message.id);
            sub.acknowledge(delivery.id).unwrap();
        }
        assert_eq!(seen, ids);
        assert!(runtime.manager().next_message_id() > ids[2]);
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_prepared_large_message_body_kept_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::new("archive").unwrap();
        let queue = QueueName::new("archive.q").unwrap();
        let xid = Xid::random();
        let body = pattern(6_000);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let sub = runtime
            .manager()
            .bind_queue(address.clone(), queue.clone())
            .unwrap();
        let branch = runtime.coordinator().start(xid.clone()).unwrap();

        let ctx = SendContext::detached();
        let config = runtime.config().large_messages.clone();
        let window = CreditWindow::new(config.confirmation_window_size);
        let sink = InVmChunkSink::new(runtime.receiver().clone(), window.clone(), ctx.clone())
            .with_transaction(branch.clone());
        let sink = Arc::new(sink);
        let producer = LargeMessageProducer::new(config, sink.clone(), window).unwrap();
        producer
            .send(
                LargeMessageHeader::new(address.clone()).with_property("name", "backup.tar"),
                Cursor::new(body.clone()),
                &ctx,
            )
            .await
            .unwrap();

        let received = sink.received();
        assert_eq!(received.len(), 1);
        assert!(received[0].admitted.is_none());
        assert!(sub.next_deliverable().unwrap().is_none());

        runtime.coordinator().prepare(&xid).unwrap();
        runtime.shutdown().await.unwrap();
        drop(producer);
        drop(sink);
        drop(sub);
        drop(branch);
        drop(runtime);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        assert_eq!(
            runtime.manager().large_bodies().list().unwrap(),
            vec![received[0].message_id]
        );
        runtime
            .coordinator()
            .commit(&xid, false, &SendContext::detached())
            .await
            .unwrap();

        let sub = runtime.manager().subscription(&address, &queue).unwrap();
        let delivery = sub.next_deliverable().unwrap().unwrap();
        assert_eq!(delivery.message.id, received[0].message_id);
        assert_eq!(runtime.consumer().read_body(&delivery.message).unwrap(), body);
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rolled_back_large_message_leaves_no_body() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::new("archive").unwrap();
        let xid = Xid::random();

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let branch = runtime.coordinator().start(xid.clone()).unwrap();
        let ctx = SendContext::detached();
        let config = runtime.config().large_messages.clone();
        let window = CreditWindow::new(config.confirmation_window_size);
        let sink = InVmChunkSink::new(runtime.receiver().clone(), window.clone(), ctx.clone())
            .with_transaction(branch);
        let producer = LargeMessageProducer::new(config, Arc::new(sink), window).unwrap();
        producer
            .send(LargeMessageHeader::new(address), Cursor::new(pattern(4_000)), &ctx)
            .await
            .unwrap();
        assert_eq!(runtime.manager().large_bodies().list().unwrap().len(), 1);

        runtime.coordinator().prepare(&xid).unwrap();
        runtime.coordinator().rollback(&xid).unwrap();
        assert!(runtime.manager().large_bodies().list().unwrap().is_empty());
        runtime.shutdown().await.unwrap();
    }
}

//! # Paging and Large Message Flows
//!
//! A producer streams bodies through the in-VM sink into an address that is
//! already paging. Messages must come back in send order, with their bodies
//! intact, from a freshly restarted broker.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{paging_config, pattern};
    use broker_runtime::BrokerRuntime;
    use mq_01_paging::{PagingApi, SendContext};
    use mq_02_large_message::LargeMessageHeader;
    use shared_types::{Address, MessageBody, QueueName};
    use std::io::Cursor;

    // =========================================================================
    // LARGE MESSAGES ON A PAGING ADDRESS
    // =========================================================================

    #[tokio::test]
    async fn test_large_message_paged_and_read_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::new("media").unwrap();
        let queue = QueueName::new("media.thumbnails").unwrap();
        let body = pattern(10_000);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        runtime
            .manager()
            .bind_queue(address.clone(), queue.clone())
            .unwrap();
        let ctx = SendContext::detached();
        let receipt = runtime
            .in_vm_producer(ctx.clone())
            .unwrap()
            .send(
                LargeMessageHeader::new(address.clone()).with_property("kind", "png"),
                Cursor::new(body.clone()),
                &ctx,
            )
            .await
            .unwrap();
        assert!(receipt.is_chunked());
        assert_eq!(receipt.length(), 10_000);
        assert!(runtime.manager().store(&address).unwrap().is_paging());
        runtime.shutdown().await.unwrap();
        drop(runtime);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let sub = runtime.manager().subscription(&address, &queue).unwrap();
        let delivery = sub.next_deliverable().unwrap().unwrap();
        assert!(delivery.message.body.large_ref().is_some());
        assert_eq!(
            delivery.message.properties.get("kind").map(String::as_str),
            Some("png")
        );
        assert_eq!(runtime.consumer().read_body(&delivery.message).unwrap(), body);

        assert!(sub.acknowledge(delivery.id).unwrap());
        runtime.manager().reclaim_all().unwrap();
        assert!(runtime.manager().large_bodies().list().unwrap().is_empty());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_inline_and_large_messages_keep_send_order() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::new("mixed").unwrap();
        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let sub = runtime
            .manager()
            .bind_queue(address.clone(), QueueName::new("mixed.q").unwrap())
            .unwrap();

        let ctx = SendContext::detached();
        let producer = runtime.in_vm_producer(ctx.clone()).unwrap();
        let bodies = [pattern(100), pattern(3_000), pattern(200), pattern(5_000)];
        for body in &bodies {
            producer
                .send(
                    LargeMessageHeader::new(address.clone()),
                    Cursor::new(body.clone()),
                    &ctx,
                )
                .await
                .unwrap();
        }

        for (i, expected) in bodies.iter().enumerate() {
            let delivery = sub.next_deliverable().unwrap().unwrap();
            let large = delivery.message.body.large_ref().is_some();
            assert_eq!(large, expected.len() >= 1024, "message {}", i);
            if !large {
                assert_eq!(delivery.message.body, MessageBody::Inline(expected.clone()));
            }
            assert_eq!(&runtime.consumer().read_body(&delivery.message).unwrap(), expected);
            sub.acknowledge(delivery.id).unwrap();
        }
        assert!(sub.next_deliverable().unwrap().is_none());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unacknowledged_message_redelivered_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::new("orders").unwrap();
        let queue = QueueName::new("orders.audit").unwrap();

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let manager = runtime.manager().clone();
        let sub = manager.bind_queue(address.clone(), queue.clone()).unwrap();
        for _ in 0..3 {
            let message = shared_types::Message::new(
                manager.next_message_id(),
                address.clone(),
                b"order".to_vec(),
            );
            manager.send(message, &SendContext::detached()).await.unwrap();
        }
        let first = sub.next_deliverable().unwrap().unwrap();
        sub.acknowledge(first.id).unwrap();
        let second = sub.next_deliverable().unwrap().unwrap();
        runtime.shutdown().await.unwrap();
        drop(sub);
        drop(manager);
        drop(runtime);

        let runtime = BrokerRuntime::start(paging_config(dir.path())).await.unwrap();
        let sub = runtime.manager().subscription(&address, &queue).unwrap();
        let again = sub.next_deliverable().unwrap().unwrap();
        assert_eq!(again.message.id, second.message.id);
        sub.acknowledge(again.id).unwrap();
        assert!(sub.next_deliverable().unwrap().is_some());
        runtime.shutdown().await.unwrap();
    }
}

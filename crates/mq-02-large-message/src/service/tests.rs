//! # Large Message Service Tests

use super::*;
use crate::adapters::in_vm::InVmChunkSink;
use crate::domain::{ChunkFrame, LargeMessageConfig, LargeMessageError, LargeMessageHeader, TransferId};
use crate::ports::inbound::LargeMessageReceiverApi;
use crate::ports::outbound::ChunkSink;
use async_trait::async_trait;
use mq_01_paging::{
    AddressFullPolicy, AddressSettings, AddressSettingsRepository, AdmitOutcome,
    InMemoryPagingStoreFactory, PagingApi, PagingConfig, PagingError, PagingManager,
    QueueSubscription, SendContext, SessionHandle, TransactionCoordinator,
};
use parking_lot::Mutex;
use rand::Rng;
use shared_types::{Address, Message, QueueName};
use std::io::Cursor;
use std::sync::Arc;

// =============================================================================
// FIXTURES
// =============================================================================

fn addr(name: &str) -> Address {
    Address::new(name).unwrap()
}

fn config() -> LargeMessageConfig {
    LargeMessageConfig::default()
        .with_min_large_message_size(1000)
        .with_chunk_size(256)
        .with_confirmation_window_size(1024)
        .with_consumer_buffer_limit(64 * 1024)
}

fn random_body(len: usize) -> Vec<u8> {
    let mut body = vec![0u8; len];
    rand::thread_rng().fill(&mut body[..]);
    body
}

struct Broker {
    manager: Arc<PagingManager>,
    receiver: Arc<ChunkReceiver>,
}

impl Broker {
    fn start(settings: AddressSettings) -> Self {
        let manager = PagingManager::new(
            PagingConfig::default(),
            Arc::new(InMemoryPagingStoreFactory::new()),
            Arc::new(AddressSettingsRepository::new(settings)),
        )
        .unwrap();
        manager.start().unwrap();
        let manager = Arc::new(manager);
        Self {
            receiver: Arc::new(ChunkReceiver::new(manager.clone())),
            manager,
        }
    }

    fn bind(&self, address: &Address) -> QueueSubscription {
        self.manager
            .bind_queue(address.clone(), QueueName::new("q").unwrap())
            .unwrap()
    }

    fn sink(&self, window: &CreditWindow, ctx: SendContext) -> InVmChunkSink {
        InVmChunkSink::new(self.receiver.clone(), window.clone(), ctx)
    }

    fn consumer(&self) -> LargeMessageConsumer {
        LargeMessageConsumer::new(self.manager.large_bodies().clone(), &config())
    }

    fn body_files(&self) -> usize {
        self.manager.large_bodies().list().unwrap().len()
    }

    /// Fill `address` to exactly 1000 resident bytes.
    async fn fill(&self, address: &Address) {
        for _ in 0..2 {
            let m = Message::new(self.manager.next_message_id(), address.clone(), vec![0; 500]);
            self.manager.send(m, &SendContext::detached()).await.unwrap();
        }
    }
}

fn blocking() -> AddressSettings {
    AddressSettings::new()
        .with_max_size(1000)
        .with_policy(AddressFullPolicy::Block)
}

fn producer<S: ChunkSink>(sink: Arc<S>, window: &CreditWindow) -> Arc<LargeMessageProducer<S>> {
    Arc::new(LargeMessageProducer::new(config(), sink, window.clone()).unwrap())
}

/// Records frames and never returns credit.
#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<ChunkFrame>>,
}

impl RecordingSink {
    fn data_frames(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, ChunkFrame::Data { .. }))
            .count()
    }
}

#[async_trait]
impl ChunkSink for RecordingSink {
    async fn send_inline(
        &self,
        _header: LargeMessageHeader,
        _body: Vec<u8>,
    ) -> crate::domain::LargeMessageResult<()> {
        Ok(())
    }

    async fn send_frame(
        &self,
        _transfer: TransferId,
        frame: ChunkFrame,
    ) -> crate::domain::LargeMessageResult<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

// =============================================================================
// PRODUCER
// =============================================================================

#[tokio::test]
async fn test_large_body_round_trips_through_chunks() {
    let broker = Broker::start(AddressSettings::new());
    let a = addr("media");
    let sub = broker.bind(&a);
    let window = CreditWindow::new(1024);
    let sink = Arc::new(broker.sink(&window, SendContext::detached()));
    let producer = producer(sink.clone(), &window);

    let body = random_body(5000);
    let header = LargeMessageHeader::new(a.clone()).with_property("kind", "video");
    let receipt = producer
        .send(header, Cursor::new(body.clone()), &SendContext::detached())
        .await
        .unwrap();

    assert!(matches!(
        receipt,
        SendReceipt::Chunked {
            chunks: 20,
            length: 5000,
            ..
        }
    ));
    assert_eq!(window.in_flight(), 0);

    let delivery = sub.next_deliverable().unwrap().unwrap();
    assert!(delivery.message.is_large());
    assert_eq!(delivery.message.properties["kind"], "video");
    assert_eq!(broker.consumer().read_body(&delivery.message).unwrap(), body);

    sub.acknowledge(delivery.id).unwrap();
    assert_eq!(broker.body_files(), 0);
}

#[tokio::test]
async fn test_small_body_goes_inline() {
    let broker = Broker::start(AddressSettings::new());
    let a = addr("small");
    let sub = broker.bind(&a);
    let window = CreditWindow::new(1024);
    let sink = Arc::new(broker.sink(&window, SendContext::detached()));
    let producer = producer(sink.clone(), &window);

    let receipt = producer
        .send(
            LargeMessageHeader::new(a.clone()),
            Cursor::new(vec![9; 999]),
            &SendContext::detached(),
        )
        .await
        .unwrap();

    assert_eq!(receipt, SendReceipt::Inline { length: 999 });
    let delivery = sub.next_deliverable().unwrap().unwrap();
    assert!(!delivery.message.is_large());
    assert_eq!(broker.body_files(), 0);
}

#[tokio::test]
async fn test_declared_length_forces_chunking() {
    let sink = Arc::new(RecordingSink::default());
    let window = CreditWindow::new(1024);
    let producer = producer(sink.clone(), &window);

    let header = LargeMessageHeader::new(addr("a")).with_declared_length(4096);
    let receipt = producer
        .send(header, Cursor::new(vec![1; 10]), &SendContext::detached())
        .await
        .unwrap();

    assert!(receipt.is_chunked());
    assert_eq!(receipt.length(), 10);
    let frames = sink.frames.lock();
    assert!(matches!(frames[0], ChunkFrame::Begin { .. }));
    assert_eq!(frames[2], ChunkFrame::End { total_length: 10 });
}

#[tokio::test]
async fn test_exhausted_window_suspends_producer() {
    let sink = Arc::new(RecordingSink::default());
    let window = CreditWindow::new(512);
    let producer = producer(sink.clone(), &window);

    let task = {
        let producer = producer.clone();
        tokio::spawn(async move {
            let ctx = SendContext::detached();
            producer
                .send(
                    LargeMessageHeader::new(addr("a")),
                    Cursor::new(vec![2; 2000]),
                    &ctx,
                )
                .await
        })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    assert!(!task.is_finished());
    assert_eq!(sink.data_frames(), 2);
    assert_eq!(window.in_flight(), 512);

    while !task.is_finished() {
        window.confirm(256);
        tokio::task::yield_now().await;
    }
    let receipt = task.await.unwrap().unwrap();
    assert!(matches!(
        receipt,
        SendReceipt::Chunked {
            chunks: 8,
            length: 2000,
            ..
        }
    ));
    assert_eq!(sink.data_frames(), 8);
}

#[tokio::test]
async fn test_closed_session_cancels_waiting_producer() {
    let sink = Arc::new(RecordingSink::default());
    let window = CreditWindow::new(256);
    let producer = producer(sink.clone(), &window);
    let session = SessionHandle::new();

    let task = {
        let producer = producer.clone();
        let ctx = session.context();
        tokio::spawn(async move {
            producer
                .send(
                    LargeMessageHeader::new(addr("a")),
                    Cursor::new(vec![2; 2000]),
                    &ctx,
                )
                .await
        })
    };
    tokio::task::yield_now().await;
    session.close();

    assert!(matches!(
        task.await.unwrap(),
        Err(LargeMessageError::Cancelled)
    ));
    assert_eq!(sink.frames.lock().last(), Some(&ChunkFrame::Cancel));
}

// =============================================================================
// RECEIVER
// =============================================================================

#[tokio::test]
async fn test_non_contiguous_chunk_fails_transfer() {
    let broker = Broker::start(AddressSettings::new());
    let ctx = SendContext::detached();
    let transfer = TransferId::random();
    let header = LargeMessageHeader::new(addr("a"));

    broker
        .receiver
        .receive_frame(transfer, ChunkFrame::Begin { header }, None, &ctx)
        .await
        .unwrap();
    broker
        .receiver
        .receive_frame(
            transfer,
            ChunkFrame::Data {
                offset: 0,
                payload: vec![1; 100],
            },
            None,
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(broker.body_files(), 1);

    let gap = broker
        .receiver
        .receive_frame(
            transfer,
            ChunkFrame::Data {
                offset: 150,
                payload: vec![1; 100],
            },
            None,
            &ctx,
        )
        .await;
    assert!(matches!(gap, Err(LargeMessageError::ProtocolViolation { .. })));
    assert_eq!(broker.receiver.active_transfers(), 0);
    assert_eq!(broker.body_files(), 0);
}

#[tokio::test]
async fn test_end_with_wrong_length_is_rejected() {
    let broker = Broker::start(AddressSettings::new());
    let ctx = SendContext::detached();
    let transfer = TransferId::random();
    let receiver = &broker.receiver;

    receiver
        .receive_frame(
            transfer,
            ChunkFrame::Begin {
                header: LargeMessageHeader::new(addr("a")).with_declared_length(10),
            },
            None,
            &ctx,
        )
        .await
        .unwrap();
    let end = receiver
        .receive_frame(transfer, ChunkFrame::End { total_length: 10 }, None, &ctx)
        .await;

    assert!(matches!(end, Err(LargeMessageError::ProtocolViolation { .. })));
    assert_eq!(broker.body_files(), 0);
}

#[tokio::test]
async fn test_unknown_transfer_is_protocol_violation() {
    let broker = Broker::start(AddressSettings::new());
    let result = broker
        .receiver
        .receive_frame(
            TransferId::random(),
            ChunkFrame::Data {
                offset: 0,
                payload: vec![1],
            },
            None,
            &SendContext::detached(),
        )
        .await;
    assert!(matches!(result, Err(LargeMessageError::ProtocolViolation { .. })));
}

#[tokio::test]
async fn test_blocked_address_suspends_next_chunk() {
    let broker = Broker::start(blocking());
    let a = addr("a");
    let sub = broker.bind(&a);
    broker.fill(&a).await;

    let ctx = SendContext::detached();
    let transfer = TransferId::random();
    broker
        .receiver
        .receive_frame(
            transfer,
            ChunkFrame::Begin {
                header: LargeMessageHeader::new(a.clone()),
            },
            None,
            &ctx,
        )
        .await
        .unwrap();

    let chunk = {
        let receiver = broker.receiver.clone();
        tokio::spawn(async move {
            receiver
                .receive_frame(
                    transfer,
                    ChunkFrame::Data {
                        offset: 0,
                        payload: vec![5; 100],
                    },
                    None,
                    &SendContext::detached(),
                )
                .await
        })
    };
    tokio::task::yield_now().await;
    assert!(!chunk.is_finished());

    let first = sub.next_deliverable().unwrap().unwrap();
    sub.acknowledge(first.id).unwrap();
    assert!(chunk.await.unwrap().unwrap().is_none());

    let done = broker
        .receiver
        .receive_frame(transfer, ChunkFrame::End { total_length: 100 }, None, &ctx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.length, 100);
    assert_eq!(done.admitted, Some(AdmitOutcome::Accepted));
}

#[tokio::test]
async fn test_cancel_while_chunk_blocked_deletes_body() {
    let broker = Broker::start(blocking());
    let a = addr("a");
    let sub = broker.bind(&a);
    broker.fill(&a).await;

    let ctx = SendContext::detached();
    let transfer = TransferId::random();
    broker
        .receiver
        .receive_frame(
            transfer,
            ChunkFrame::Begin {
                header: LargeMessageHeader::new(a.clone()),
            },
            None,
            &ctx,
        )
        .await
        .unwrap();

    let chunk = {
        let receiver = broker.receiver.clone();
        tokio::spawn(async move {
            receiver
                .receive_frame(
                    transfer,
                    ChunkFrame::Data {
                        offset: 0,
                        payload: vec![5; 100],
                    },
                    None,
                    &SendContext::detached(),
                )
                .await
        })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!chunk.is_finished());
    assert_eq!(broker.body_files(), 1);

    broker
        .receiver
        .receive_frame(transfer, ChunkFrame::Cancel, None, &ctx)
        .await
        .unwrap();
    assert!(matches!(
        chunk.await.unwrap(),
        Err(LargeMessageError::Cancelled)
    ));
    assert_eq!(broker.receiver.active_transfers(), 0);
    assert_eq!(broker.body_files(), 0);

    // Space freed afterwards finds nothing to resume.
    let first = sub.next_deliverable().unwrap().unwrap();
    sub.acknowledge(first.id).unwrap();
    tokio::task::yield_now().await;
    assert_eq!(broker.body_files(), 0);
}

#[tokio::test]
async fn test_session_close_mid_transfer_deletes_body() {
    let broker = Broker::start(blocking());
    let a = addr("a");
    let _sub = broker.bind(&a);
    broker.fill(&a).await;

    let session = SessionHandle::new();
    let window = CreditWindow::new(1024);
    let sink = Arc::new(broker.sink(&window, session.context()));
    let producer = producer(sink, &window);

    let task = {
        let producer = producer.clone();
        let a = a.clone();
        tokio::spawn(async move {
            let ctx = SendContext::detached();
            producer
                .send(LargeMessageHeader::new(a), Cursor::new(vec![3; 3000]), &ctx)
                .await
        })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!task.is_finished());
    assert_eq!(broker.receiver.active_transfers(), 1);
    assert_eq!(broker.body_files(), 1);

    session.close();
    let result = task.await.unwrap();
    assert!(matches!(
        result,
        Err(LargeMessageError::Paging(PagingError::Closed { .. }))
    ));
    assert_eq!(broker.receiver.active_transfers(), 0);
    assert_eq!(broker.body_files(), 0);
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[tokio::test]
async fn test_transactional_large_message_visible_after_commit() {
    let broker = Broker::start(AddressSettings::new());
    let a = addr("a");
    let sub = broker.bind(&a);
    let coordinator = TransactionCoordinator::new(broker.manager.clone());
    let handle = coordinator.begin_local();

    let window = CreditWindow::new(1024);
    let sink = Arc::new(
        broker
            .sink(&window, SendContext::detached())
            .with_transaction(handle.clone()),
    );
    let producer = producer(sink.clone(), &window);
    let body = random_body(3000);
    producer
        .send(
            LargeMessageHeader::new(a.clone()),
            Cursor::new(body.clone()),
            &SendContext::detached(),
        )
        .await
        .unwrap();

    assert_eq!(sink.received()[0].admitted, None);
    assert!(sub.next_deliverable().unwrap().is_none());

    coordinator
        .commit_local(&handle, &SendContext::detached())
        .await
        .unwrap();
    let delivery = sub.next_deliverable().unwrap().unwrap();
    assert_eq!(broker.consumer().read_body(&delivery.message).unwrap(), body);
}

#[tokio::test]
async fn test_rollback_deletes_spooled_body() {
    let broker = Broker::start(AddressSettings::new());
    let a = addr("a");
    let sub = broker.bind(&a);
    let coordinator = TransactionCoordinator::new(broker.manager.clone());
    let handle = coordinator.begin_local();

    let window = CreditWindow::new(1024);
    let sink = Arc::new(
        broker
            .sink(&window, SendContext::detached())
            .with_transaction(handle.clone()),
    );
    producer(sink, &window)
        .send(
            LargeMessageHeader::new(a),
            Cursor::new(vec![4; 2500]),
            &SendContext::detached(),
        )
        .await
        .unwrap();
    assert_eq!(broker.body_files(), 1);

    coordinator.rollback_local(&handle).unwrap();
    assert_eq!(broker.body_files(), 0);
    assert!(sub.next_deliverable().unwrap().is_none());
}

// =============================================================================
// CONSUMER
// =============================================================================

#[tokio::test]
async fn test_body_over_buffer_limit_must_stream() {
    let broker = Broker::start(AddressSettings::new());
    let a = addr("a");
    let sub = broker.bind(&a);
    let window = CreditWindow::new(1024);
    let sink = Arc::new(broker.sink(&window, SendContext::detached()));
    let body = random_body(70 * 1024);
    producer(sink, &window)
        .send(
            LargeMessageHeader::new(a),
            Cursor::new(body.clone()),
            &SendContext::detached(),
        )
        .await
        .unwrap();

    let delivery = sub.next_deliverable().unwrap().unwrap();
    let consumer = broker.consumer();
    assert!(matches!(
        consumer.read_body(&delivery.message),
        Err(LargeMessageError::BodyTooLarge { .. })
    ));

    let out = Arc::new(Mutex::new(Vec::new()));
    let written = consumer
        .save_to_stream(&delivery.message, Box::new(SharedWriter(out.clone())))
        .unwrap();
    assert_eq!(written, body.len() as u64);
    assert_eq!(*out.lock(), body);
}

#[test]
fn test_streamer_frames_inline_body() {
    let bodies = Arc::new(mq_01_paging::LargeBodyStore::new(Arc::new(
        mq_01_paging::InMemorySequentialFileFactory::new("large"),
    )));
    let streamer = BodyStreamer::new(bodies, 4);
    let message = Message::new(shared_types::MessageId(1), addr("a"), b"abcdefghij".to_vec());

    let frames: Vec<_> = streamer
        .stream(&message)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(frames.len(), 5);
    assert!(matches!(frames[0], ChunkFrame::Begin { .. }));
    assert_eq!(
        frames[3],
        ChunkFrame::Data {
            offset: 8,
            payload: b"ij".to_vec()
        }
    );
    assert_eq!(frames[4], ChunkFrame::End { total_length: 10 });
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//! # Delivery Flows
//!
//! Broadcast is best effort (full mailboxes are skipped); unicast reports
//! every failure.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ebus::{
        Bus, BusConfig, BusError, Envelope, EventKind, MessageType, Node, Received, Status, Wait,
        BROADCAST_INDEX,
    };

    use crate::integration::Recorder;

    fn bus_with_depth(mailbox_depth: usize) -> Bus {
        Bus::new(BusConfig {
            mailbox_depth,
            ..BusConfig::default()
        })
        .unwrap()
    }

    fn register_all(bus: &Bus, names: &[&str]) -> Vec<Node> {
        names
            .iter()
            .map(|name| bus.register(name, Recorder::new()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_notification_reaches_destination() {
        let bus = bus_with_depth(4);
        let a = bus.register("A", Recorder::new()).unwrap();
        let mut b = bus.register("B", Recorder::new()).unwrap();

        a.notify("B", Envelope::new(0x10, &[1, 2]).unwrap())
            .unwrap();

        let received = b.receive(Wait::NoWait).await.unwrap();
        assert_eq!(received.status(), Status::Success);
        let Received::Message(message) = received else {
            panic!("notification must come back as a plain message");
        };
        assert_eq!(message.kind(), MessageType::Notification);
        assert_eq!(message.event_id(), 0x10);
        assert_eq!(message.payload(), &[1, 2]);
        assert_eq!(message.source(), a.index());
        assert_eq!(message.destination(), b.index());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_other_node() {
        let bus = bus_with_depth(4);
        let mut nodes = register_all(&bus, &["A", "B", "C", "D", "E"]);

        let sent = nodes[0]
            .broadcast(Envelope::new(0x8001, &[7]).unwrap())
            .unwrap();
        assert_eq!(sent.destination(), BROADCAST_INDEX);

        for node in nodes.iter_mut().skip(1) {
            let received = node.receive(Wait::NoWait).await.unwrap();
            assert_eq!(received.envelope().sequence(), sent.sequence());
            assert_eq!(received.envelope().kind(), MessageType::Broadcast);
        }
        assert!(matches!(
            nodes[0].receive(Wait::NoWait).await,
            Err(BusError::Timeout)
        ));

        let stats = bus.snapshot().stats;
        assert_eq!(stats.delivered, 4);
        assert_eq!(stats.broadcast_dropped, 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_saturated_mailbox() {
        let bus = bus_with_depth(1);
        let mut nodes = register_all(&bus, &["A", "B", "C", "D"]);

        // Fill C.
        nodes[0].notify("C", Envelope::event(1)).unwrap();

        assert!(nodes[0].broadcast(Envelope::event(2)).is_ok());

        for i in [1, 3] {
            let received = nodes[i].receive(Wait::NoWait).await.unwrap();
            assert_eq!(received.envelope().event_id(), 2);
        }
        let received = nodes[2].receive(Wait::NoWait).await.unwrap();
        assert_eq!(received.envelope().event_id(), 1);
        assert!(matches!(
            nodes[2].receive(Wait::NoWait).await,
            Err(BusError::Timeout)
        ));
        assert_eq!(bus.snapshot().stats.broadcast_dropped, 1);
    }

    #[tokio::test]
    async fn test_notify_saturated_destination() {
        let bus = bus_with_depth(2);
        let a = bus.register("A", Recorder::new()).unwrap();
        let mut b = bus.register("B", Recorder::new()).unwrap();

        a.notify("B", Envelope::event(1)).unwrap();
        a.notify("B", Envelope::event(2)).unwrap();
        let third = a.notify("B", Envelope::event(3));
        assert!(matches!(third, Err(BusError::QueueFull { ref node }) if node == "B"));
        assert_eq!(Status::from(&third), Status::QueueFull);

        let mut ids = Vec::new();
        while let Ok(received) = b.receive(Wait::NoWait).await {
            ids.push(received.envelope().event_id());
        }
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(bus.snapshot().stats.unicast_rejected, 1);
    }

    #[tokio::test]
    async fn test_receive_timeout_on_empty_mailbox() {
        let bus = bus_with_depth(2);
        let mut a = bus.register("A", Recorder::new()).unwrap();

        let result = a.receive(Wait::For(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(BusError::Timeout)));
        assert!(matches!(
            a.receive(Wait::from_millis(0)).await,
            Err(BusError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_delivery() {
        let bus = bus_with_depth(2);
        let a = bus.register("A", Recorder::new()).unwrap();
        let mut b = bus.register("B", Recorder::new()).unwrap();

        let waiter = tokio::spawn(async move {
            let received = b.receive(Wait::Forever).await;
            (b, received)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        a.notify("B", Envelope::event(0x42)).unwrap();

        let (_b, received) = waiter.await.unwrap();
        assert_eq!(received.unwrap().envelope().event_id(), 0x42);
    }

    #[tokio::test]
    async fn test_drain_dispatches_messages_to_handler() {
        let bus = bus_with_depth(8);
        let a = bus.register("A", Recorder::new()).unwrap();
        let b_events = Recorder::new();
        let mut b = bus.register("B", b_events.clone()).unwrap();

        a.notify("B", Envelope::event(1)).unwrap();
        a.broadcast(Envelope::event(2)).unwrap();

        assert_eq!(b.drain().await.unwrap(), 2);
        assert_eq!(b_events.count(EventKind::Received), 2);
        assert_eq!(b.drain().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_get_unique_sequences() {
        let bus = bus_with_depth(100);
        let mut sink = bus.register("sink", Recorder::new()).unwrap();

        let mut tasks = Vec::new();
        for t in 0..4 {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                let node = bus.register(&format!("src{t}"), Recorder::new()).unwrap();
                for i in 0..25u16 {
                    node.notify("sink", Envelope::event(i)).unwrap();
                }
                node
            }));
        }
        let mut senders = Vec::new();
        for task in tasks {
            senders.push(task.await.unwrap());
        }

        let mut sequences = Vec::new();
        while let Ok(received) = sink.receive(Wait::NoWait).await {
            sequences.push(received.envelope().sequence());
        }
        assert_eq!(sequences.len(), 100);
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 100);
    }
}

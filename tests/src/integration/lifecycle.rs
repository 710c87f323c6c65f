//! # Node and Bus Lifecycle
//!
//! Slot reuse, stale handles, teardown and the operator snapshot.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ebus::{Bus, BusConfig, BusError, Envelope, Received, Status, Wait, WaitState};

    use crate::integration::Recorder;

    fn small_bus() -> Bus {
        Bus::new(BusConfig {
            max_nodes: 3,
            ..BusConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_reused_slot_does_not_resolve_stale_handle() {
        let bus = small_bus();
        let a = bus.register("A", Recorder::new()).unwrap();
        let _b = bus.register("B", Recorder::new()).unwrap();
        let stale = a.handle();
        let slot = a.index();

        bus.deregister(a);
        let c = bus.register("C", Recorder::new()).unwrap();
        assert_eq!(c.index(), slot);

        assert!(!stale.is_alive());
        let current = bus.find_by_index(slot).unwrap();
        assert_eq!(current.name(), "C");
        assert_ne!(current, stale);
        assert!(bus.find_by_name("A").is_none());
    }

    #[test]
    fn test_stale_handle_cannot_receive_responses() {
        let bus = small_bus();
        let a = bus.register("A", Recorder::new()).unwrap();
        let b = bus.register("B", Recorder::new()).unwrap();
        let stale = a.handle();
        drop(a);
        let _c = bus.register("C", Recorder::new()).unwrap();

        let result = b.respond(&stale, Envelope::event(1));
        assert!(matches!(result, Err(BusError::NodeNotFound(_))));
        assert_eq!(Status::from(&result), Status::NodeNotFound);
    }

    #[test]
    fn test_deregister_releases_outstanding_waits() {
        let bus = small_bus();
        let a = bus.register("A", Recorder::new()).unwrap();
        let _b = bus.register("B", Recorder::new()).unwrap();

        a.indicate_async("B", Envelope::event(1)).unwrap();
        assert_eq!(bus.snapshot().outstanding(), 1);

        a.deregister();
        assert_eq!(bus.snapshot().outstanding(), 0);
        assert_eq!(bus.node_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_invalidates_every_node() {
        let bus = small_bus();
        let mut a = bus.register("A", Recorder::new()).unwrap();
        let b = bus.register("B", Recorder::new()).unwrap();
        let b_ref = b.handle();

        assert_eq!(bus.shutdown(), 2);
        assert!(!bus.is_initialized());
        assert_eq!(bus.node_count(), 0);
        assert!(!b_ref.is_alive());

        assert!(matches!(
            a.notify("B", Envelope::event(1)),
            Err(BusError::NotInitialized)
        ));
        assert!(matches!(
            b.indicate_async("A", Envelope::event(1)),
            Err(BusError::NotInitialized)
        ));
        assert!(matches!(
            a.receive(Wait::NoWait).await,
            Err(BusError::NotInitialized)
        ));
        assert!(bus.find_by_name("A").is_none());

        // Dropping invalidated nodes after teardown is harmless.
        drop(b);
        assert_eq!(bus.shutdown(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_tracks_request_lifecycle() {
        let bus = small_bus();
        let mut a = bus.register("A", Recorder::new()).unwrap();
        let mut b = bus.register("B", Recorder::echoing()).unwrap();

        let sent = a.indicate_async("B", Envelope::event(0x8004)).unwrap();
        let snapshot = bus.snapshot();
        let node_a = snapshot.nodes.iter().find(|n| n.name == "A").unwrap();
        assert_eq!(node_a.waits.len(), 1);
        assert_eq!(node_a.waits[0].state, WaitState::Sent);
        assert_eq!(node_a.waits[0].sequence, sent.sequence());
        let node_b = snapshot.nodes.iter().find(|n| n.name == "B").unwrap();
        assert_eq!(node_b.queued, 1);

        let text = snapshot.to_string();
        assert!(text.contains(&format!("Seq=0x{:04X}", sent.sequence())));
        assert!(text.contains("Active slots: 1/"));

        assert!(matches!(
            b.receive(Wait::NoWait).await,
            Ok(Received::Handled(_))
        ));
        let snapshot = bus.snapshot();
        let node_a = snapshot.nodes.iter().find(|n| n.name == "A").unwrap();
        assert_eq!(node_a.waits[0].state, WaitState::Received);
        assert_eq!(node_a.queued, 1);

        a.receive(Wait::NoWait).await.unwrap();
        assert_eq!(bus.snapshot().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_parked_node_tasks() {
        let bus = small_bus();
        let mut tasks = Vec::new();
        for name in ["A", "B"] {
            let mut node = bus.register(name, Recorder::new()).unwrap();
            tasks.push(tokio::spawn(async move { node.receive(Wait::Forever).await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(bus.shutdown(), 2);
        for task in tasks {
            let result = tokio::time::timeout(Duration::from_millis(500), task)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(BusError::NotInitialized)));
        }
    }

    #[tokio::test]
    async fn test_response_cannot_cross_buses() {
        let first = small_bus();
        let a = first.register("A", Recorder::new()).unwrap();
        let _b = first.register("B", Recorder::new()).unwrap();
        let second = small_bus();
        let mut x = second.register("X", Recorder::new()).unwrap();
        let y = second.register("Y", Recorder::new()).unwrap();

        let sent = a.indicate_async("B", Envelope::event(0x8004)).unwrap();
        let result = y.respond(&a.handle(), Envelope::reply_to(&sent, &[]).unwrap());
        assert!(matches!(result, Err(BusError::InvalidArgument(_))));
        assert_eq!(Status::from(&result), Status::InvalidArgument);

        assert_eq!(a.pending_waits()[0].state, WaitState::Sent);
        assert!(matches!(
            x.receive(Wait::NoWait).await,
            Err(BusError::Timeout)
        ));
    }
}

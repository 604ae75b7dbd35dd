//! TrafficLightController tests (paused Tokio clock)

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast::error::TryRecvError, mpsc};
    use tokio::time::Instant;
    use traffic_harness::{
        ActivationBarrier, ControllerConfig, ControllerError, ControllerMode, FixtureConfig,
        LightCommand, LightPublisher, LightState, TrafficLightController,
    };

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn auto_config() -> ControllerConfig {
        ControllerConfig {
            mode: ControllerMode::Auto,
            base_interval_secs: 1.0,
            fixtures: vec![FixtureConfig::new("fixture_1").with_durations(5.0, 1.0, 4.0)],
            event_capacity: 64,
        }
    }

    fn manual_config() -> ControllerConfig {
        ControllerConfig {
            mode: ControllerMode::Manual,
            fixtures: vec![FixtureConfig::new("a"), FixtureConfig::new("b")],
            ..auto_config()
        }
    }

    // -----------------------------------------------------------------------
    // Auto mode
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn auto_mode_emits_example_timeline() {
        let publisher = LightPublisher::new(64);
        let mut events = publisher.subscribe();
        let barrier = Arc::new(ActivationBarrier::new());
        let start = Instant::now();

        let task = TrafficLightController::spawn(auto_config(), publisher, None, barrier);

        for (state, at) in [
            (LightState::Yellow, secs(5)),
            (LightState::Red, secs(6)),
            (LightState::Green, secs(10)),
            (LightState::Yellow, secs(15)),
        ] {
            let event = events.recv().await.unwrap();
            assert_eq!(event.fixture_id.as_str(), "fixture_1");
            assert_eq!((event.state, event.at), (state, at));
            assert!(start.elapsed() >= at);
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_released_after_initial_snapshot() {
        let publisher = LightPublisher::new(8);
        let barrier = Arc::new(ActivationBarrier::new());
        assert!(!publisher.current().is_initialized());

        let task =
            TrafficLightController::spawn(auto_config(), publisher.clone(), None, barrier.clone());
        barrier.wait_async().await;

        let snap = publisher.current();
        assert!(snap.is_initialized());
        assert_eq!(snap.seq, 0);
        assert_eq!(snap.state_of(&"fixture_1".into()), Some(LightState::Green));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_tracks_transitions() {
        let publisher = LightPublisher::new(8);
        let mut lights = publisher.snapshot();
        let barrier = Arc::new(ActivationBarrier::new());
        let task = TrafficLightController::spawn(auto_config(), publisher.clone(), None, barrier);

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        let snap = lights.borrow_and_update().clone();
        assert_eq!(snap.state_of(&"fixture_1".into()), Some(LightState::Red));
        assert_eq!(snap.seq, 2);
        assert_eq!(snap.at, secs(6));
        assert_eq!(publisher.stats().transitions, 2);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_subscriber_loses_oldest_events() {
        let publisher = LightPublisher::new(2);
        let mut events = publisher.subscribe();
        let barrier = Arc::new(ActivationBarrier::new());
        let task = TrafficLightController::spawn(auto_config(), publisher, None, barrier);

        tokio::time::sleep(secs(31)).await;
        assert!(matches!(
            events.try_recv(),
            Err(TryRecvError::Lagged(_))
        ));
        // After the lag report the newest events are still there.
        let newest = events.try_recv().unwrap();
        assert!(newest.at >= secs(25));
        task.abort();
    }

    // -----------------------------------------------------------------------
    // Fatal configuration
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn bad_config_never_releases_barrier() {
        let publisher = LightPublisher::new(8);
        let barrier = Arc::new(ActivationBarrier::new());
        let mut cfg = auto_config();
        cfg.fixtures.clear();

        let result = TrafficLightController::spawn(cfg, publisher.clone(), None, barrier.clone())
            .await
            .unwrap();
        assert_eq!(result, Err(ControllerError::NoFixtures));
        assert!(!barrier.is_set());
        assert!(!publisher.current().is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_phase_is_rejected_before_release() {
        let publisher = LightPublisher::new(8);
        let barrier = Arc::new(ActivationBarrier::new());
        let mut cfg = auto_config();
        cfg.fixtures = vec![FixtureConfig::new("fixture_1").with_durations(1e19, 1.0, 1.0)];

        let result = TrafficLightController::spawn(cfg, publisher, None, barrier.clone())
            .await
            .expect("controller task must not panic");
        assert!(matches!(
            result,
            Err(ControllerError::InvalidDuration { state: LightState::Green, .. })
        ));
        assert!(!barrier.is_set());
    }

    #[test]
    fn manual_mode_requires_command_channel() {
        let err = TrafficLightController::new(&manual_config(), LightPublisher::new(8), None)
            .err()
            .unwrap();
        assert_eq!(err, ControllerError::MissingCommandChannel);
    }

    // -----------------------------------------------------------------------
    // Manual mode
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn manual_mode_holds_without_commands() {
        let publisher = LightPublisher::new(8);
        let mut events = publisher.subscribe();
        let barrier = Arc::new(ActivationBarrier::new());
        let (_tx, rx) = mpsc::channel(4);
        let task =
            TrafficLightController::spawn(manual_config(), publisher.clone(), Some(rx), barrier.clone());

        barrier.wait_async().await;
        tokio::time::sleep(secs(3600)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(publisher.current().seq, 0);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_commands_advance_fixtures() {
        let publisher = LightPublisher::new(8);
        let mut events = publisher.subscribe();
        let barrier = Arc::new(ActivationBarrier::new());
        let (tx, rx) = mpsc::channel(4);
        let task =
            TrafficLightController::spawn(manual_config(), publisher.clone(), Some(rx), barrier);

        tx.send(LightCommand::Advance { fixture: "a".into() }).await.unwrap();
        let ev = events.recv().await.unwrap();
        assert_eq!((ev.fixture_id.as_str(), ev.state), ("a", LightState::Yellow));

        tx.send(LightCommand::Advance { fixture: "nope".into() }).await.unwrap();
        tx.send(LightCommand::AdvanceAll).await.unwrap();
        let ev_a = events.recv().await.unwrap();
        let ev_b = events.recv().await.unwrap();
        assert_eq!((ev_a.fixture_id.as_str(), ev_a.state), ("a", LightState::Red));
        assert_eq!((ev_b.fixture_id.as_str(), ev_b.state), ("b", LightState::Green));

        let stats = publisher.stats();
        assert_eq!(stats.mode, ControllerMode::Manual);
        assert_eq!(stats.commands_handled, 2);
        assert_eq!(stats.commands_ignored, 1);
        assert_eq!(stats.transitions, 3);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_degrades_and_holds_state() {
        let publisher = LightPublisher::new(8);
        let barrier = Arc::new(ActivationBarrier::new());
        let (tx, rx) = mpsc::channel(4);
        let task =
            TrafficLightController::spawn(manual_config(), publisher.clone(), Some(rx), barrier);

        tx.send(LightCommand::Advance { fixture: "b".into() }).await.unwrap();
        drop(tx);
        tokio::time::sleep(secs(1)).await;

        let stats = publisher.stats();
        assert!(stats.degraded);
        assert!(!task.is_finished(), "controller must keep running");
        let snap = publisher.current();
        assert_eq!(snap.state_of(&"a".into()), Some(LightState::Green));
        assert_eq!(snap.state_of(&"b".into()), Some(LightState::Green));

        tokio::time::sleep(secs(600)).await;
        assert_eq!(publisher.current(), snap);
        task.abort();
    }
}

//! SpawnCoordinator tests

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};
    use traffic_harness::agent::{AgentSpec, RunningAgent};
    use traffic_harness::types::AgentConfig;
    use traffic_harness::{
        ActivationBarrier, AgentLauncher, ControllerConfig, DriveCommand, FixtureConfig,
        LightPublisher, LightSnapshot, LightState, Node, NodeId, Pose, SpawnCoordinator,
        SpawnError, StaticRoadGraph, TaskLauncher, TrafficLightController, Vec3,
        VehicleController,
    };

    fn pose(x: f32, y: f32, heading: f32) -> Pose {
        Pose::new(Vec3::new(x, y, 0.0), heading)
    }

    fn graph() -> Arc<StaticRoadGraph> {
        Arc::new(
            StaticRoadGraph::from_nodes([
                Node::new("N1", pose(0.0, 0.0, 0.0)).governed_by("fixture_1"),
                Node::new("N7", pose(16.6, 2.0, 1.5708)),
                Node::new("N9", pose(-3.0, 8.5, 3.1416)),
            ])
            .unwrap(),
        )
    }

    fn launcher(max_agents: Option<usize>) -> Arc<TaskLauncher> {
        Arc::new(TaskLauncher::new(&AgentConfig {
            sample_hz: 100.0,
            cruise_throttle: 0.1,
            max_agents,
        }))
    }

    struct Harness {
        coordinator: SpawnCoordinator,
        barrier: Arc<ActivationBarrier>,
        publisher: LightPublisher,
    }

    fn make_harness(launcher: Arc<dyn AgentLauncher>) -> Harness {
        let barrier = Arc::new(ActivationBarrier::new());
        let publisher = LightPublisher::new(16);
        let coordinator =
            SpawnCoordinator::new(graph(), barrier.clone(), launcher, publisher.snapshot());
        Harness {
            coordinator,
            barrier,
            publisher,
        }
    }

    fn n(id: &str) -> NodeId {
        NodeId::new(id)
    }

    struct FailingLauncher;

    impl AgentLauncher for FailingLauncher {
        fn launch(&self, _spec: AgentSpec) -> Result<RunningAgent, String> {
            Err("vehicle model missing".into())
        }
    }

    // -----------------------------------------------------------------------
    // Success path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn spawned_agent_has_node_pose() {
        let h = make_harness(launcher(None));
        h.barrier.set();

        let agent = h.coordinator.spawn_on_node(&n("N7")).await.unwrap();
        assert_eq!(agent.node_id(), &n("N7"));
        assert_eq!(agent.pose(), pose(16.6, 2.0, 1.5708));
        assert!(agent.is_running());
        assert_eq!(h.coordinator.occupied_nodes(), vec![n("N7")]);
    }

    #[tokio::test]
    async fn controller_receives_start_pose() {
        let seen: Arc<Mutex<Option<Pose>>> = Arc::default();

        struct Recorder(Arc<Mutex<Option<Pose>>>);
        impl VehicleController for Recorder {
            fn on_start(&mut self, pose: &Pose) {
                *self.0.lock().unwrap() = Some(*pose);
            }
            fn step(&mut self, _: &LightSnapshot, _: Option<LightState>) -> DriveCommand {
                DriveCommand::new(0.2, 0.0)
            }
        }

        let recorded = seen.clone();
        let launcher = TaskLauncher::new(&AgentConfig::default())
            .with_factory(move |_| Box::new(Recorder(recorded.clone())));
        let h = make_harness(Arc::new(launcher));
        h.barrier.set();

        let agent = h.coordinator.spawn_on_node(&n("N9")).await.unwrap();
        let mut status = agent.status_receiver().unwrap();
        status.wait_for(|s| s.steps > 0).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(pose(-3.0, 8.5, 3.1416)));
        assert_eq!(agent.status().last_command, DriveCommand::new(0.2, 0.0));
    }

    #[tokio::test]
    async fn agent_ids_are_unique() {
        let h = make_harness(launcher(None));
        h.barrier.set();

        let (n1, n7) = (n("N1"), n("N7"));
        let (a, b) = tokio::join!(
            h.coordinator.spawn_on_node(&n1),
            h.coordinator.spawn_on_node(&n7),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.id(), b.id());
        assert_eq!(h.coordinator.occupied_nodes(), vec![n("N1"), n("N7")]);
    }

    // -----------------------------------------------------------------------
    // Barrier gating
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn spawn_blocks_until_barrier_set() {
        let h = make_harness(launcher(None));
        let target = n("N1");
        let mut spawning = task::spawn(h.coordinator.spawn_on_node(&target));

        assert_pending!(spawning.poll());
        assert_pending!(spawning.poll());
        assert!(h.coordinator.is_occupied(&target), "node reserved while waiting");

        h.barrier.set();
        assert!(spawning.is_woken());
        let agent = assert_ready!(spawning.poll()).unwrap();
        assert_eq!(agent.node_id(), &target);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_completes_after_delayed_release() {
        let h = make_harness(launcher(None));
        let barrier = h.barrier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            barrier.set();
        });

        let start = tokio::time::Instant::now();
        let agent = h.coordinator.spawn_on_node(&n("N1")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(h.barrier.is_set());
        assert!(agent.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn first_snapshot_is_initialised() {
        let h = make_harness(launcher(None));
        let controller = TrafficLightController::spawn(
            ControllerConfig {
                fixtures: vec![FixtureConfig::new("fixture_1").with_durations(5.0, 1.0, 4.0)],
                ..ControllerConfig::default()
            },
            h.publisher.clone(),
            None,
            h.barrier.clone(),
        );

        let agent = h.coordinator.spawn_on_node(&n("N1")).await.unwrap();
        let mut status = agent.status_receiver().unwrap();
        status.wait_for(|s| s.steps > 0).await.unwrap();

        let status = agent.status();
        let first = status.first_snapshot.unwrap();
        assert!(first.is_initialized());
        assert_eq!(first.state_of(&"fixture_1".into()), Some(LightState::Green));
        // GREEN on the governing light: cruise.
        assert_eq!(status.last_command, DriveCommand::new(0.1, 0.0));

        // RED from t=6s: the stop-line logic holds the vehicle.
        tokio::time::sleep(Duration::from_millis(6_100)).await;
        assert_eq!(agent.last_command(), DriveCommand::halt());
        controller.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_timeout_releases_node() {
        let h = make_harness(launcher(None));

        let err = h
            .coordinator
            .spawn_on_node_within(&n("N1"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SpawnError::BarrierTimeout {
                node: n("N1"),
                secs: 2.0
            }
        );
        assert!(h.coordinator.occupied_nodes().is_empty());
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unknown_node_fails_without_waiting() {
        let h = make_harness(launcher(None));
        // Barrier never set: the lookup fails first.
        let err = h.coordinator.spawn_on_node(&n("N404")).await.unwrap_err();
        assert_eq!(err, SpawnError::UnknownNode(n("N404")));
        assert_eq!(err.node(), &n("N404"));
        assert!(h.coordinator.occupied_nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn occupied_node_is_rejected() {
        let h = make_harness(launcher(None));
        h.barrier.set();

        let first = h.coordinator.spawn_on_node(&n("N1")).await.unwrap();
        let mut status = first.status_receiver().unwrap();
        status.wait_for(|s| s.steps > 0).await.unwrap();
        let steps_before = first.status().steps;

        let err = h.coordinator.spawn_on_node(&n("N1")).await.unwrap_err();
        assert_eq!(err, SpawnError::NodeOccupied(n("N1")));

        // The agent already on the node is untouched.
        assert!(first.is_running());
        assert_eq!(first.node_id(), &n("N1"));
        assert_eq!(first.pose(), pose(0.0, 0.0, 0.0));
        assert_eq!(h.coordinator.occupied_nodes(), vec![n("N1")]);

        tokio::time::advance(Duration::from_millis(100)).await;
        status
            .wait_for(|s| s.steps > steps_before)
            .await
            .unwrap();
        assert!(first.status().steps > steps_before);
        assert!(!first.status().halted);
    }

    #[tokio::test]
    async fn pending_spawn_holds_its_node() {
        let h = make_harness(launcher(None));
        let target = n("N7");
        let mut first = task::spawn(h.coordinator.spawn_on_node(&target));
        assert_pending!(first.poll());

        let mut second = task::spawn(h.coordinator.spawn_on_node(&target));
        let err = assert_ready!(second.poll()).unwrap_err();
        assert_eq!(err, SpawnError::NodeOccupied(target.clone()));

        h.barrier.set();
        assert!(assert_ready!(first.poll()).is_ok());
    }

    #[tokio::test]
    async fn construction_failure_releases_node() {
        let h = make_harness(Arc::new(FailingLauncher));
        h.barrier.set();

        let err = h.coordinator.spawn_on_node(&n("N1")).await.unwrap_err();
        assert_eq!(
            err,
            SpawnError::Construction {
                node: n("N1"),
                reason: "vehicle model missing".into()
            }
        );
        assert!(!h.coordinator.is_occupied(&n("N1")));
    }

    #[tokio::test]
    async fn capacity_limit_surfaces_as_construction_error() {
        let launcher = launcher(Some(1));
        let h = make_harness(launcher.clone());
        h.barrier.set();

        let first = h.coordinator.spawn_on_node(&n("N1")).await.unwrap();
        assert_eq!(launcher.live_agents(), 1);

        let err = h.coordinator.spawn_on_node(&n("N7")).await.unwrap_err();
        assert!(
            matches!(&err, SpawnError::Construction { reason, .. } if reason.contains("capacity")),
            "{err}"
        );
        assert!(!h.coordinator.is_occupied(&n("N7")));

        first.shutdown().await;
        assert_eq!(launcher.live_agents(), 0);
        assert!(h.coordinator.spawn_on_node(&n("N7")).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn shutdown_halts_and_frees_node() {
        let h = make_harness(launcher(None));
        h.barrier.set();

        let agent = h.coordinator.spawn_on_node(&n("N7")).await.unwrap();
        let last = agent.shutdown().await;
        assert!(last.halted);
        assert_eq!(last.last_command, DriveCommand::halt());
        assert!(h.coordinator.occupied_nodes().is_empty());

        let again = h.coordinator.spawn_on_node(&n("N7")).await.unwrap();
        assert_eq!(again.node_id(), &n("N7"));
    }

    #[tokio::test]
    async fn dropping_handle_frees_node() {
        let h = make_harness(launcher(None));
        h.barrier.set();

        let agent = h.coordinator.spawn_on_node(&n("N1")).await.unwrap();
        assert!(h.coordinator.is_occupied(&n("N1")));
        drop(agent);
        assert!(!h.coordinator.is_occupied(&n("N1")));
    }
}

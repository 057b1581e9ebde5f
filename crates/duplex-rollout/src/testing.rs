//! Scripted collaborators shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use duplex_core::ports::*;
use duplex_core::*;
use duplex_health::{ConvergenceWaiter, StatusSource};

use crate::events::{DeployEvent, EventSink};
use crate::flipper::TrafficFlipper;
use crate::orchestrator::DeploymentOrchestrator;
use crate::resolver::ActiveEnvironmentResolver;

pub fn environments() -> Environments {
    let env = |color: Color| Environment {
        color,
        group: format!("prod-{color}"),
        targets: BTreeMap::from([("api".to_string(), format!("arn:tg/{color}-api"))]),
    };
    Environments::new(env(Color::Blue), env(Color::Green))
}

/// A two-slot world where every port reads and writes the same state.
pub struct World {
    declared: Mutex<Option<Color>>,
    hang_source: AtomicBool,
    capacities: Mutex<BTreeMap<Color, Capacity>>,
    groups_fail: AtomicBool,
    missing_groups: Mutex<Vec<Color>>,
    health_script: Mutex<VecDeque<TargetHealthState>>,
    deploy_exit: Mutex<i32>,
    switch_exit: Mutex<i32>,
    companion_fails: AtomicBool,
    pub deploys: Mutex<Vec<DeployParams>>,
    pub forwards: AtomicU32,
    pub rollbacks: AtomicU32,
    pub scale_downs: Mutex<Vec<(Color, Capacity)>>,
    pub samples: AtomicU32,
    pub companion_restarts: AtomicU32,
    pub events: Mutex<Vec<DeployEvent>>,
}

impl World {
    pub fn new(blue: u32, green: u32) -> Arc<Self> {
        let cap = |desired| Capacity {
            desired,
            min: desired.min(1),
            max: desired.max(2),
        };
        Arc::new(Self {
            declared: Mutex::new(None),
            hang_source: AtomicBool::new(false),
            capacities: Mutex::new(BTreeMap::from([
                (Color::Blue, cap(blue)),
                (Color::Green, cap(green)),
            ])),
            groups_fail: AtomicBool::new(false),
            missing_groups: Mutex::new(Vec::new()),
            health_script: Mutex::new(VecDeque::from([TargetHealthState::Healthy])),
            deploy_exit: Mutex::new(0),
            switch_exit: Mutex::new(0),
            companion_fails: AtomicBool::new(false),
            deploys: Mutex::new(Vec::new()),
            forwards: AtomicU32::new(0),
            rollbacks: AtomicU32::new(0),
            scale_downs: Mutex::new(Vec::new()),
            samples: AtomicU32::new(0),
            companion_restarts: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
        })
    }

    /// `None` makes the declared source fail.
    pub fn declare(&self, color: Option<Color>) {
        *self.declared.lock().unwrap() = color;
    }

    pub fn hang_source(&self) {
        self.hang_source.store(true, Ordering::SeqCst);
    }

    pub fn fail_group_lookups(&self) {
        self.groups_fail.store(true, Ordering::SeqCst);
    }

    pub fn remove_group(&self, color: Color) {
        self.missing_groups.lock().unwrap().push(color);
    }

    pub fn capacity(&self, color: Color) -> Capacity {
        self.capacities.lock().unwrap()[&color]
    }

    /// Target health reported by successive samples; the last repeats.
    pub fn script_health(&self, states: &[TargetHealthState]) {
        *self.health_script.lock().unwrap() = states.iter().copied().collect();
    }

    pub fn fail_deploys(&self, code: i32) {
        *self.deploy_exit.lock().unwrap() = code;
    }

    pub fn fail_switches(&self, code: i32) {
        *self.switch_exit.lock().unwrap() = code;
    }

    pub fn fail_companion(&self) {
        self.companion_fails.store(true, Ordering::SeqCst);
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.lock().unwrap().len()
    }

    pub fn resolver(self: &Arc<Self>) -> ActiveEnvironmentResolver {
        ActiveEnvironmentResolver::new(self.clone(), self.clone(), environments())
    }

    pub fn flipper(self: &Arc<Self>) -> TrafficFlipper {
        TrafficFlipper::new(self.resolver(), self.clone(), Color::Blue)
    }

    pub fn sink(self: &Arc<Self>) -> EventSink {
        let world = self.clone();
        Arc::new(move |event: &DeployEvent| world.events.lock().unwrap().push(event.clone()))
    }

    pub fn orchestrator(self: &Arc<Self>) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(
            self.resolver(),
            self.clone(),
            ConvergenceWaiter::new(self.clone()),
            self.flipper(),
        )
        .with_companion(self.clone())
        .with_scale_down(self.clone())
        .with_events(self.sink())
    }

    fn action_output(code: i32) -> ActionOutput {
        ActionOutput {
            exit_code: Some(code),
            stdout: "ok\n".to_string(),
            stderr: if code == 0 { String::new() } else { "boom\n".to_string() },
        }
    }
}

#[async_trait]
impl ActiveColorSource for World {
    async fn declared_active(&self) -> InfraResult<Color> {
        if self.hang_source.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let declared = *self.declared.lock().unwrap();
        declared.ok_or_else(|| InfraError::Parse {
            what: "terraform output".to_string(),
            message: "no active_color".to_string(),
        })
    }
}

#[async_trait]
impl ResourceQuery for World {
    async fn describe_group(&self, group: &str) -> InfraResult<Option<GroupInfo>> {
        if self.groups_fail.load(Ordering::SeqCst) {
            return Err(InfraError::Other("throttled".to_string()));
        }
        let color = match group {
            "prod-blue" => Color::Blue,
            "prod-green" => Color::Green,
            _ => return Ok(None),
        };
        if self.missing_groups.lock().unwrap().contains(&color) {
            return Ok(None);
        }
        let capacity = self.capacity(color);
        Ok(Some(GroupInfo {
            name: group.to_string(),
            capacity,
            instance_ids: (0..capacity.desired).map(|i| format!("i-{color}-{i}")).collect(),
        }))
    }

    async fn describe_instances(&self, _ids: &[String]) -> InfraResult<Vec<InstanceInfo>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl StatusSource for World {
    async fn sample(&self, env: &Environment) -> InfraResult<EnvironmentStatus> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let state = {
            let mut script = self.health_script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            }
        }
        .unwrap_or(TargetHealthState::Initial);

        let now = Utc::now();
        let capacity = self.capacity(env.color);
        let instances: Vec<_> = (0..capacity.desired)
            .map(|i| {
                InstanceSnapshot::from_info(
                    InstanceInfo {
                        id: format!("i-{}-{i}", env.color),
                        instance_type: "t3.micro".to_string(),
                        lifecycle: Lifecycle::OnDemand,
                        state: "running".to_string(),
                        launch_time: now,
                        zone: "us-east-1a".to_string(),
                    },
                    0.0094,
                    now,
                )
            })
            .collect();
        let health = env
            .targets
            .keys()
            .map(|name| {
                let entries = instances
                    .iter()
                    .map(|i| TargetHealth {
                        target_id: i.id.clone(),
                        port: Some(80),
                        state,
                    })
                    .collect();
                (name.clone(), entries)
            })
            .collect();

        Ok(EnvironmentStatus {
            color: env.color,
            exists: true,
            capacity,
            instances,
            health,
            sampled_at: now,
        })
    }
}

#[async_trait]
impl DeployTrigger for World {
    async fn deploy(
        &self,
        params: &DeployParams,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> InfraResult<ActionOutput> {
        self.deploys.lock().unwrap().push(params.clone());
        on_line(&format!("deploying {}", params.target));
        let code = *self.deploy_exit.lock().unwrap();
        if code == 0 {
            self.capacities
                .lock()
                .unwrap()
                .insert(params.target, params.preserve);
        }
        Ok(Self::action_output(code))
    }
}

#[async_trait]
impl TrafficSwitch for World {
    async fn forward(&self) -> InfraResult<ActionOutput> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        let code = *self.switch_exit.lock().unwrap();
        if code == 0 {
            self.declare(Some(Color::Green));
        }
        Ok(Self::action_output(code))
    }

    async fn rollback(&self) -> InfraResult<ActionOutput> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        let code = *self.switch_exit.lock().unwrap();
        if code == 0 {
            self.declare(Some(Color::Blue));
        }
        Ok(Self::action_output(code))
    }
}

#[async_trait]
impl ScaleDownAction for World {
    async fn scale_down(&self, inactive: Color, preserve: &Capacity) -> InfraResult<ActionOutput> {
        self.scale_downs.lock().unwrap().push((inactive, *preserve));
        self.capacities
            .lock()
            .unwrap()
            .insert(inactive, Capacity::default());
        Ok(Self::action_output(0))
    }
}

#[async_trait]
impl CompanionRestarter for World {
    async fn restart(&self) -> InfraResult<CompanionRestart> {
        self.companion_restarts.fetch_add(1, Ordering::SeqCst);
        if self.companion_fails.load(Ordering::SeqCst) {
            return Err(InfraError::Other("access denied".to_string()));
        }
        Ok(CompanionRestart::Restarted {
            instance_id: "i-beat".to_string(),
        })
    }
}

#[async_trait]
impl ArtifactRegistry for World {
    async fn artifact_exists(&self, repository: &str, tag: &str) -> InfraResult<bool> {
        Ok(tag != "missing" && repository != "unpublished")
    }
}

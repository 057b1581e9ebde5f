//! Domain types shared across the Duplex crates.
//!
//! Everything here is an identifier or a point-in-time snapshot. Nothing
//! in this module talks to the outside world; the traits in
//! [`crate::ports`] do that.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hours used to project an hourly cost to a month.
pub const HOURS_PER_MONTH: f64 = 730.0;

// ── Colors ─────────────────────────────────────────────────────────

/// One of the two deployment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    /// The other slot.
    pub fn complement(self) -> Color {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a deployment color: {0:?} (expected blue or green)")]
pub struct ParseColorError(pub String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Color::Blue),
            "green" => Ok(Color::Green),
            _ => Err(ParseColorError(s.to_string())),
        }
    }
}

/// Which slot is currently receiving production traffic.
///
/// `Unknown` is a legitimate resolution (both or neither slot has
/// capacity) and must block any action that would otherwise have to
/// guess a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "color", rename_all = "lowercase")]
pub enum ActiveEnvironment {
    Resolved(Color),
    Unknown,
}

impl ActiveEnvironment {
    pub fn color(self) -> Option<Color> {
        match self {
            ActiveEnvironment::Resolved(c) => Some(c),
            ActiveEnvironment::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, ActiveEnvironment::Unknown)
    }
}

impl fmt::Display for ActiveEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveEnvironment::Resolved(c) => write!(f, "{c}"),
            ActiveEnvironment::Unknown => f.write_str("unknown"),
        }
    }
}

// ── Environments ───────────────────────────────────────────────────

/// Static description of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub color: Color,
    /// Resource group (auto-scaling group) backing this slot.
    pub group: String,
    /// Traffic-target descriptor name → target identifier (target group ARN).
    pub targets: BTreeMap<String, String>,
}

/// The fixed blue/green pair. Never created or destroyed at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environments {
    blue: Environment,
    green: Environment,
}

impl Environments {
    pub fn new(mut blue: Environment, mut green: Environment) -> Self {
        blue.color = Color::Blue;
        green.color = Color::Green;
        Self { blue, green }
    }

    pub fn get(&self, color: Color) -> &Environment {
        match color {
            Color::Blue => &self.blue,
            Color::Green => &self.green,
        }
    }
}

// ── Target health ──────────────────────────────────────────────────

/// Health of one registered target within one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetHealthState {
    /// Passing checks and receiving traffic.
    Healthy,
    Unhealthy,
    /// Registered, first checks still pending.
    Initial,
    /// Ready but the descriptor is not attached to live traffic.
    Unused,
    Draining,
}

impl TargetHealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetHealthState::Healthy => "healthy",
            TargetHealthState::Unhealthy => "unhealthy",
            TargetHealthState::Initial => "initial",
            TargetHealthState::Unused => "unused",
            TargetHealthState::Draining => "draining",
        }
    }
}

impl fmt::Display for TargetHealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetHealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(TargetHealthState::Healthy),
            // Load balancers report "unavailable" when checks are disabled
            // or the target cannot be reached; neither counts as settled.
            "unhealthy" | "unavailable" => Ok(TargetHealthState::Unhealthy),
            "initial" => Ok(TargetHealthState::Initial),
            "unused" => Ok(TargetHealthState::Unused),
            // Deregistering after failing checks; still on its way out.
            "draining" | "unhealthy.draining" => Ok(TargetHealthState::Draining),
            other => Err(format!("unknown target health state: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target_id: String,
    pub port: Option<u16>,
    pub state: TargetHealthState,
}

// ── Instances ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    OnDemand,
    Spot,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::OnDemand => f.write_str("on-demand"),
            Lifecycle::Spot => f.write_str("spot"),
        }
    }
}

/// Instance as reported by the inventory, before cost/uptime are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub instance_type: String,
    pub lifecycle: Lifecycle,
    /// Provider running-state ("pending", "running", ...).
    pub state: String,
    pub launch_time: DateTime<Utc>,
    pub zone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Uptime {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl Uptime {
    /// Uptime between `launched` and `now`, clamped at zero for clock skew.
    pub fn between(launched: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let total_minutes = (now - launched).num_minutes().max(0);
        Self {
            days: total_minutes / (24 * 60),
            hours: (total_minutes / 60) % 24,
            minutes: total_minutes % 60,
        }
    }
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d {}h {}m", self.days, self.hours, self.minutes)
    }
}

/// Derived, read-only view of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub instance_type: String,
    pub lifecycle: Lifecycle,
    pub state: String,
    pub launch_time: DateTime<Utc>,
    pub zone: String,
    /// USD per hour; 0.0 when pricing was unavailable.
    pub hourly_cost: f64,
    pub uptime: Uptime,
}

impl InstanceSnapshot {
    pub fn from_info(info: InstanceInfo, hourly_cost: f64, now: DateTime<Utc>) -> Self {
        let uptime = Uptime::between(info.launch_time, now);
        Self {
            id: info.id,
            instance_type: info.instance_type,
            lifecycle: info.lifecycle,
            state: info.state,
            launch_time: info.launch_time,
            zone: info.zone,
            hourly_cost,
            uptime,
        }
    }
}

// ── Capacity ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capacity {
    pub desired: u32,
    pub min: u32,
    pub max: u32,
}

impl Capacity {
    /// Used when the active group cannot be found while preserving its scale.
    pub const FALLBACK: Capacity = Capacity {
        desired: 1,
        min: 1,
        max: 2,
    };
}

/// A resource group as described by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub capacity: Capacity,
    pub instance_ids: Vec<String>,
}

// ── Environment snapshot ───────────────────────────────────────────

/// A fresh sample of one slot. Produced per poll and then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub color: Color,
    pub exists: bool,
    pub capacity: Capacity,
    pub instances: Vec<InstanceSnapshot>,
    /// Descriptor name → per-target health.
    pub health: BTreeMap<String, Vec<TargetHealth>>,
    pub sampled_at: DateTime<Utc>,
}

impl EnvironmentStatus {
    /// Snapshot for a slot whose resource group does not exist.
    pub fn missing(color: Color, sampled_at: DateTime<Utc>) -> Self {
        Self {
            color,
            exists: false,
            capacity: Capacity::default(),
            instances: Vec::new(),
            health: BTreeMap::new(),
            sampled_at,
        }
    }

    pub fn desired_capacity(&self) -> u32 {
        self.capacity.desired
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn total_hourly_cost(&self) -> f64 {
        self.instances.iter().map(|i| i.hourly_cost).sum()
    }

    pub fn total_monthly_cost(&self) -> f64 {
        self.total_hourly_cost() * HOURS_PER_MONTH
    }
}

// ── External action payloads ───────────────────────────────────────

/// Captured result of an external action (deploy, flip, scale-down).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ActionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Parameters handed to the external deploy trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployParams {
    pub target: Color,
    /// Scale of the currently serving slot, passed through so the deploy
    /// does not reset it.
    pub preserve: Capacity,
    pub image_tag: Option<String>,
}

/// What a companion restart did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionRestart {
    Restarted { instance_id: String },
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn complement_flips_color() {
        assert_eq!(Color::Blue.complement(), Color::Green);
        assert_eq!(Color::Green.complement(), Color::Blue);
    }

    #[test]
    fn color_parses_case_insensitively() {
        assert_eq!("GREEN".parse::<Color>().unwrap(), Color::Green);
        assert_eq!(" blue ".parse::<Color>().unwrap(), Color::Blue);
        assert!("purple".parse::<Color>().is_err());
    }

    #[test]
    fn active_environment_exposes_color() {
        assert_eq!(ActiveEnvironment::Resolved(Color::Blue).color(), Some(Color::Blue));
        assert_eq!(ActiveEnvironment::Unknown.color(), None);
        assert_eq!(ActiveEnvironment::Unknown.to_string(), "unknown");
    }

    #[test]
    fn health_state_maps_unavailable_to_unhealthy() {
        assert_eq!(
            "unavailable".parse::<TargetHealthState>().unwrap(),
            TargetHealthState::Unhealthy
        );
        assert_eq!(
            "unhealthy.draining".parse::<TargetHealthState>().unwrap(),
            TargetHealthState::Draining
        );
        assert!("weird".parse::<TargetHealthState>().is_err());
    }

    #[test]
    fn uptime_breaks_down_minutes() {
        let launched = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 59).unwrap();
        let uptime = Uptime::between(launched, now);
        assert_eq!(uptime, Uptime { days: 1, hours: 3, minutes: 4 });
        assert_eq!(uptime.to_string(), "1d 3h 4m");
    }

    #[test]
    fn uptime_clamps_future_launch() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let launched = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(Uptime::between(launched, now), Uptime::default());
    }

    #[test]
    fn monthly_cost_projects_hourly() {
        let now = Utc::now();
        let mut status = EnvironmentStatus::missing(Color::Blue, now);
        for (id, cost) in [("i-1", 0.01), ("i-2", 0.02)] {
            status.instances.push(InstanceSnapshot::from_info(
                InstanceInfo {
                    id: id.to_string(),
                    instance_type: "t3.micro".to_string(),
                    lifecycle: Lifecycle::Spot,
                    state: "running".to_string(),
                    launch_time: now,
                    zone: "us-east-1a".to_string(),
                },
                cost,
                now,
            ));
        }
        assert!((status.total_hourly_cost() - 0.03).abs() < 1e-9);
        assert!((status.total_monthly_cost() - 0.03 * HOURS_PER_MONTH).abs() < 1e-9);
    }

    #[test]
    fn environments_pin_colors() {
        let env = |color| Environment {
            color,
            group: "g".to_string(),
            targets: BTreeMap::new(),
        };
        // Swapped on purpose: the pair fixes the color by slot.
        let envs = Environments::new(env(Color::Green), env(Color::Blue));
        assert_eq!(envs.get(Color::Blue).color, Color::Blue);
        assert_eq!(envs.get(Color::Green).color, Color::Green);
    }
}

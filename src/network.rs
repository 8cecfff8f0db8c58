//! TDA-MAC frame scheduling.
//!
//! Pure configuration/state types plus transition functions; the actual
//! acoustic discovery and frame exchange are behind [`TdaMacProtocol`] so
//! the cadence logic is unit-testable without a modem.

use heapless::{String, Vec};

use crate::modem::Nm3Packet;

/// Backend-delivered network configuration. `node_addresses` is
/// the authoritative node set for the next full discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub nm3_gateway_stay_awake: bool,
    pub nm3_sensor_stay_awake: bool,
    pub cycle_limit: u16,
    pub partials_per_full_discovery: u16,
    pub guard_interval_ms: u16,
    pub frame_interval_s: u32,
    pub link_quality_threshold: u8,
    pub node_addresses: Vec<u8, 16>,
}

impl NetworkConfig {
    pub const fn empty() -> Self {
        Self {
            nm3_gateway_stay_awake: false,
            nm3_sensor_stay_awake: false,
            cycle_limit: 0,
            partials_per_full_discovery: 0,
            guard_interval_ms: 0,
            frame_interval_s: 0,
            link_quality_threshold: 0,
            node_addresses: Vec::new(),
        }
    }
}

/// Outcome of a TDA-MAC frame: all packets returned by `gather` are
/// enqueued as messages; the topology/config/gather-info JSON is enqueued
/// as a topology record.
pub struct GatherResult {
    pub packets: Vec<Nm3Packet, 16>,
    pub info_json: String<512>,
}

/// Non-blocking TDA-MAC collaborator; the protocol internals are out of
/// scope here.
pub trait TdaMacProtocol {
    type Error;

    async fn reinit(&mut self, nodes: &[u8]) -> Result<(), Self::Error>;
    /// Full or partial discovery; the caller (frame scheduler) decides
    /// which cadence applies before calling this.
    async fn discover(&mut self) -> Result<(), Self::Error>;
    async fn install_schedule(&mut self, guard_interval_ms: u16) -> Result<(), Self::Error>;
    async fn gather(
        &mut self,
        time_till_next_frame_ms: u32,
        sensor_stay_awake: bool,
    ) -> Result<GatherResult, Self::Error>;
    fn topology_json(&self) -> String<768>;
}

/// Mutable scheduling state threaded across supervisor iterations.
#[derive(Debug, Clone)]
pub struct NetworkRunState {
    pub cycle_counter: u16,
    pub partials_counter: u16,
    pub next_frame_wall_s: u32,
    pub is_configured: bool,
    pub do_full: bool,
    pub do_partial: bool,
    pub config_stale: bool,
}

impl NetworkRunState {
    pub const fn new() -> Self {
        Self {
            cycle_counter: 0,
            partials_counter: 0,
            next_frame_wall_s: 0,
            is_configured: false,
            do_full: false,
            do_partial: false,
            config_stale: true,
        }
    }

    pub fn should_run_frame(&self, now: u32) -> bool {
        now >= self.next_frame_wall_s
    }

    pub fn needs_reconfiguration(&self, cfg: &NetworkConfig) -> bool {
        self.cycle_counter >= cfg.cycle_limit
    }

    pub fn needs_full_rediscovery(&self, cfg: &NetworkConfig) -> bool {
        self.needs_reconfiguration(cfg) && self.partials_counter >= cfg.partials_per_full_discovery
    }

    pub fn on_discovery_success(&mut self, now: u32, was_full: bool) {
        self.cycle_counter = 0;
        if was_full {
            self.partials_counter = 0;
        } else {
            self.partials_counter = self.partials_counter.saturating_add(1);
        }
        self.is_configured = true;
        self.next_frame_wall_s = now;
    }

    pub fn on_frame_run(&mut self, cfg: &NetworkConfig) {
        self.cycle_counter = self.cycle_counter.saturating_add(1);
        self.next_frame_wall_s = self.next_frame_wall_s.wrapping_add(cfg.frame_interval_s);
    }

    pub fn mark_config_stale(&mut self) {
        self.config_stale = true;
    }

    pub fn clear_config_stale(&mut self) {
        self.config_stale = false;
    }

    /// Changing the node set forces a full rediscovery on the *next*
    /// tick; applying an unchanged config is a no-op (idempotent).
    pub fn apply_config(&mut self, new: &NetworkConfig, old: &NetworkConfig) {
        if new.node_addresses != old.node_addresses {
            self.do_full = true;
            self.partials_counter = 0;
        }
    }
}

impl Default for NetworkRunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Ties the run-state transitions to the `TdaMacProtocol` collaborator and
/// enqueues results: discover/gather, then format, then enqueue for
/// shipment.
pub struct FrameScheduler {
    pub config: NetworkConfig,
    pub state: NetworkRunState,
}

impl FrameScheduler {
    pub const fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            state: NetworkRunState::new(),
        }
    }

    pub fn apply_config(&mut self, new_config: NetworkConfig) {
        self.state.apply_config(&new_config, &self.config);
        self.config = new_config;
    }

    /// Reconfiguration gate: runs full or partial discovery as dictated
    /// by the cycle/partial counters, then installs the schedule. Skips
    /// entirely with an empty node set, same as `run_frame_if_due`, so a
    /// stale `do_full` flag can't fire discovery against nobody.
    pub async fn reconfigure_if_due<P: TdaMacProtocol>(&mut self, modem: &mut P, now: u32) -> Result<(), P::Error> {
        if self.config.node_addresses.is_empty()
            || !(self.state.needs_reconfiguration(&self.config) || self.state.do_full)
        {
            return Ok(());
        }
        let was_full = self.state.do_full || self.state.needs_full_rediscovery(&self.config);
        if was_full {
            modem.reinit(&self.config.node_addresses).await?;
        }
        modem.discover().await?;
        modem.install_schedule(self.config.guard_interval_ms).await?;
        self.state.do_full = false;
        self.state.on_discovery_success(now, was_full);
        Ok(())
    }

    /// Frame execution: runs the frame when node_addresses is non-empty
    /// and `should_run_frame` is true.
    pub async fn run_frame_if_due<P: TdaMacProtocol>(
        &mut self,
        modem: &mut P,
        now: u32,
    ) -> Result<Option<GatherResult>, P::Error> {
        if self.config.node_addresses.is_empty() || !self.state.should_run_frame(now) {
            return Ok(None);
        }
        let time_till_next_frame_ms =
            (self.state.next_frame_wall_s.wrapping_add(self.config.frame_interval_s).wrapping_sub(now)) * 1000;
        let result = modem
            .gather(time_till_next_frame_ms, self.config.nm3_sensor_stay_awake)
            .await?;
        self.state.on_frame_run(&self.config);
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nodes: &[u8], cycle_limit: u16, partials_per_full: u16) -> NetworkConfig {
        let mut v = Vec::new();
        for &n in nodes {
            v.push(n).unwrap();
        }
        NetworkConfig {
            nm3_gateway_stay_awake: false,
            nm3_sensor_stay_awake: false,
            cycle_limit,
            partials_per_full_discovery: partials_per_full,
            guard_interval_ms: 500,
            frame_interval_s: 3600,
            link_quality_threshold: 4,
            node_addresses: v,
        }
    }

    #[test]
    fn full_rediscovery_needed_once_cycle_and_partial_limits_reached() {
        let mut state = NetworkRunState::new();
        let cfg = config(&[1, 2, 3], 1, 2);
        state.cycle_counter = 1;
        state.partials_counter = 2;
        assert!(state.needs_reconfiguration(&cfg));
        assert!(state.needs_full_rediscovery(&cfg));
    }

    #[test]
    fn partial_rediscovery_when_below_partial_limit() {
        let mut state = NetworkRunState::new();
        let cfg = config(&[1, 2], 1, 3);
        state.cycle_counter = 1;
        state.partials_counter = 1;
        assert!(state.needs_reconfiguration(&cfg));
        assert!(!state.needs_full_rediscovery(&cfg));
    }

    #[test]
    fn node_set_change_forces_full_on_next_tick() {
        let mut state = NetworkRunState::new();
        state.partials_counter = 2;
        let old = config(&[7], 24, 4);
        let new = config(&[7, 8], 24, 4);
        state.apply_config(&new, &old);
        assert!(state.do_full);
        assert_eq!(state.partials_counter, 0);
    }

    #[test]
    fn applying_unchanged_config_is_idempotent() {
        let mut state = NetworkRunState::new();
        state.do_full = false;
        state.partials_counter = 3;
        let cfg = config(&[7], 24, 4);
        state.apply_config(&cfg, &cfg);
        assert!(!state.do_full);
        assert_eq!(state.partials_counter, 3);
    }

    #[test]
    fn frame_runs_only_after_interval_elapses() {
        let mut state = NetworkRunState::new();
        let cfg = config(&[1], 24, 4);
        state.next_frame_wall_s = 1_000;
        assert!(!state.should_run_frame(999));
        assert!(state.should_run_frame(1_000));
        state.on_frame_run(&cfg);
        assert_eq!(state.next_frame_wall_s, 1_000 + cfg.frame_interval_s);
        assert_eq!(state.cycle_counter, 1);
    }

    struct StubModem {
        full_calls: u32,
        discover_calls: u32,
    }

    impl TdaMacProtocol for StubModem {
        type Error = ();
        async fn reinit(&mut self, _nodes: &[u8]) -> Result<(), ()> {
            self.full_calls += 1;
            Ok(())
        }
        async fn discover(&mut self) -> Result<(), ()> {
            self.discover_calls += 1;
            Ok(())
        }
        async fn install_schedule(&mut self, _guard_interval_ms: u16) -> Result<(), ()> {
            Ok(())
        }
        async fn gather(&mut self, _time_till_next_frame_ms: u32, _sensor_stay_awake: bool) -> Result<GatherResult, ()> {
            Ok(GatherResult { packets: Vec::new(), info_json: String::new() })
        }
        fn topology_json(&self) -> String<768> {
            String::new()
        }
    }

    #[test]
    fn reconfigure_runs_full_discovery_on_first_configuration() {
        futures_lite_block_on(async {
            let mut sched = FrameScheduler::new(config(&[1, 2], 0, 4));
            let mut modem = StubModem { full_calls: 0, discover_calls: 0 };
            sched.reconfigure_if_due(&mut modem, 10).await.unwrap();
            assert_eq!(modem.full_calls, 1);
            assert_eq!(modem.discover_calls, 1);
            assert!(sched.state.is_configured);
        });
    }

    #[test]
    fn reconfigure_skips_with_no_nodes_even_when_do_full_is_set() {
        futures_lite_block_on(async {
            let mut sched = FrameScheduler::new(config(&[], 0, 4));
            sched.state.do_full = true;
            let mut modem = StubModem { full_calls: 0, discover_calls: 0 };
            sched.reconfigure_if_due(&mut modem, 10).await.unwrap();
            assert_eq!(modem.full_calls, 0);
            assert_eq!(modem.discover_calls, 0);
            assert!(sched.state.do_full);
        });
    }

    // Minimal same-thread async block-on: no runtime dependency needed for
    // these host unit tests since every future here resolves immediately.
    fn futures_lite_block_on<F: core::future::Future>(fut: F) -> F::Output {
        use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(fut);
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
        }
    }
}

//! Duty-cycle agents and the idle strategy.
//!
//! An agent exposes a non-blocking `do_work`; the runner calls it in a loop
//! on a dedicated thread and idles with spin -> yield -> park escalation when
//! no work was done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;

pub trait Agent: Send {
    /// One duty cycle. Returns the amount of work done; zero lets the idle
    /// strategy escalate.
    fn do_work(&mut self) -> usize;

    /// Called once when the runner stops.
    fn on_close(&mut self) {}
}

enum IdlePhase {
    Spinning(u64),
    Yielding(u64),
    Parking(u64),
}

/// Spin, then yield, then park with exponential backoff up to a bound.
pub struct BackoffIdleStrategy {
    max_spins: u64,
    max_yields: u64,
    min_park_ns: u64,
    max_park_ns: u64,
    phase: IdlePhase,
}

impl BackoffIdleStrategy {
    pub fn new(max_spins: u64, max_yields: u64, min_park_ns: u64, max_park_ns: u64) -> Self {
        Self {
            max_spins,
            max_yields,
            min_park_ns,
            max_park_ns,
            phase: IdlePhase::Spinning(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.idle_max_spins,
            config.idle_max_yields,
            config.idle_min_park_ns,
            config.idle_max_park_ns,
        )
    }

    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        match self.phase {
            IdlePhase::Spinning(spins) => {
                std::hint::spin_loop();
                if spins + 1 >= self.max_spins {
                    self.phase = IdlePhase::Yielding(0);
                } else {
                    self.phase = IdlePhase::Spinning(spins + 1);
                }
            }
            IdlePhase::Yielding(yields) => {
                std::thread::yield_now();
                if yields + 1 >= self.max_yields {
                    self.phase = IdlePhase::Parking(self.min_park_ns);
                } else {
                    self.phase = IdlePhase::Yielding(yields + 1);
                }
            }
            IdlePhase::Parking(park_ns) => {
                std::thread::sleep(Duration::from_nanos(park_ns));
                self.phase = IdlePhase::Parking((park_ns * 2).min(self.max_park_ns));
            }
        }
    }

    pub fn reset(&mut self) {
        self.phase = IdlePhase::Spinning(0);
    }
}

/// Runs an agent on its own thread until closed.
pub struct AgentRunner {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AgentRunner {
    pub fn start(
        name: &str,
        mut agent: impl Agent + 'static,
        mut idle: BackoffIdleStrategy,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::info!("agent started");
                while !flag.load(Ordering::Relaxed) {
                    let work_count = agent.do_work();
                    idle.idle(work_count);
                }
                agent.on_close();
                tracing::info!("agent stopped");
            })?;
        Ok(Self { shutdown, handle })
    }

    /// Signal the agent to stop and wait for it.
    pub fn close(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            tracing::error!("agent thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        cycles: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Agent for CountingAgent {
        fn do_work(&mut self) -> usize {
            self.cycles.fetch_add(1, Ordering::Relaxed);
            0
        }

        fn on_close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn runner_cycles_agent_and_closes() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let runner = AgentRunner::start(
            "test-agent",
            CountingAgent {
                cycles: Arc::clone(&cycles),
                closed: Arc::clone(&closed),
            },
            BackoffIdleStrategy::new(1, 1, 1, 1_000),
        )
        .unwrap();

        while cycles.load(Ordering::Relaxed) < 10 {
            std::thread::yield_now();
        }
        runner.close();
        assert!(closed.load(Ordering::Relaxed));
    }

    #[test]
    fn idle_strategy_resets_on_work() {
        let mut idle = BackoffIdleStrategy::new(2, 2, 1, 8);
        for _ in 0..10 {
            idle.idle(0);
        }
        assert!(matches!(idle.phase, IdlePhase::Parking(_)));
        idle.idle(1);
        assert!(matches!(idle.phase, IdlePhase::Spinning(0)));
    }
}

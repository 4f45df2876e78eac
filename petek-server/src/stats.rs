//! Server-side aggregation of the core's counter hooks, plus request
//! latencies, rendered on demand by the `STATS` command.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use petek::{MetricsSink, SpinEpisode, Transition};

const TRANSITION_KINDS: [(Transition, &str); 7] = [
    (Transition::InsertEmpty, "insert into empty      "),
    (Transition::InsertTombstone, "insert over tombstone  "),
    (Transition::Update, "update                 "),
    (Transition::Remove, "delete                 "),
    (Transition::UpdateAbortSwapped, "update abort (swapped) "),
    (Transition::UpdateAbortDeleted, "update abort (deleted) "),
    (Transition::RemoveAbort, "delete abort           "),
];

#[derive(Default)]
struct SpinLog {
    spins: Vec<u32>,
    sleeps: Vec<u32>,
    times_ms: Vec<f64>,
    successful: u64,
    aborted: u64,
}

/// Append-mostly aggregation; everything lives behind cold-path mutexes,
/// never touched on the table's lock-free hot paths (the sink callbacks
/// run after each op completes).
pub struct ServerStats {
    transitions: [Mutex<Vec<f64>>; 7],
    spin: Mutex<SpinLog>,
    latencies_ms: Mutex<Vec<f64>>,
    set_ops: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            transitions: Default::default(),
            spin: Mutex::new(SpinLog::default()),
            latencies_ms: Mutex::new(Vec::new()),
            set_ops: AtomicU64::new(0),
        }
    }

    fn slot(transition: Transition) -> usize {
        TRANSITION_KINDS
            .iter()
            .position(|(kind, _)| *kind == transition)
            .expect("every transition kind has a slot")
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.latencies_ms.lock().push(as_ms(elapsed));
    }

    pub fn record_set(&self) {
        self.set_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the full report. Drains nothing; `STATS` is cumulative.
    pub fn report(&self) -> String {
        let mut out = String::new();

        let latencies = self.latencies_ms.lock().clone();
        out.push_str("Requests:\n");
        if latencies.is_empty() {
            out.push_str("  none served yet\n");
        } else {
            let mut sorted = latencies;
            sorted.sort_by(|a, b| a.total_cmp(b));
            let total: f64 = sorted.iter().sum();
            let _ = writeln!(
                out,
                "  count={} | mean={:.4}ms | p50={:.4}ms | p95={:.4}ms | p99={:.4}ms | p999={:.4}ms | max={:.4}ms",
                format_count(sorted.len() as f64),
                total / sorted.len() as f64,
                percentile(&sorted, 50),
                percentile(&sorted, 95),
                percentile(&sorted, 99),
                permille(&sorted, 999),
                sorted.last().copied().unwrap_or(0.0),
            );
        }

        out.push_str("Transitions:\n");
        for (index, (_, label)) in TRANSITION_KINDS.iter().enumerate() {
            let times = self.transitions[index].lock();
            if times.is_empty() {
                let _ = writeln!(out, "  {label}: count=0");
                continue;
            }
            let mut sorted = times.clone();
            drop(times);
            sorted.sort_by(|a, b| a.total_cmp(b));
            let total: f64 = sorted.iter().sum();
            let _ = writeln!(
                out,
                "  {label}: count={} | min={:.4}ms | mean={:.4}ms | p50={:.4}ms | p95={:.4}ms | p99={:.4}ms | max={:.4}ms",
                format_count(sorted.len() as f64),
                sorted.first().copied().unwrap_or(0.0),
                total / sorted.len() as f64,
                percentile(&sorted, 50),
                percentile(&sorted, 95),
                percentile(&sorted, 99),
                sorted.last().copied().unwrap_or(0.0),
            );
        }

        let spin = self.spin.lock();
        let set_ops = self.set_ops.load(Ordering::Relaxed);
        out.push_str("Spinning:\n");
        if spin.spins.is_empty() {
            out.push_str("  no requests spun\n");
        } else {
            let episodes = spin.spins.len() as f64;
            let spun_rate = if set_ops > 0 {
                episodes / set_ops as f64 * 100.0
            } else {
                0.0
            };
            let success_rate = spin.successful as f64 / episodes * 100.0;
            let abort_rate = spin.aborted as f64 / episodes * 100.0;
            let _ = writeln!(
                out,
                "  episodes={} ({spun_rate:.1}% of SETs) | success={success_rate:.1}% | abort={abort_rate:.1}%",
                format_count(episodes),
            );

            let mut spins: Vec<f64> = spin.spins.iter().map(|&s| s as f64).collect();
            spins.sort_by(|a, b| a.total_cmp(b));
            let _ = writeln!(
                out,
                "  spins: min={} | p50={} | p99={} | max={}",
                format_count(spins[0]),
                format_count(percentile(&spins, 50)),
                format_count(percentile(&spins, 99)),
                format_count(spins[spins.len() - 1]),
            );

            let mut times = spin.times_ms.clone();
            times.sort_by(|a, b| a.total_cmp(b));
            let total_sleeps: u64 = spin.sleeps.iter().map(|&c| c as u64).sum();
            let _ = writeln!(
                out,
                "  time: p50={:.3}ms | p99={:.3}ms | max={:.3}ms | cooldowns={}",
                percentile(&times, 50),
                percentile(&times, 99),
                times[times.len() - 1],
                format_count(total_sleeps as f64),
            );
        }

        out
    }
}

impl MetricsSink for ServerStats {
    fn on_transition(&self, transition: Transition, elapsed: Duration) {
        self.transitions[Self::slot(transition)]
            .lock()
            .push(as_ms(elapsed));
    }

    fn on_spin_episode(&self, episode: SpinEpisode) {
        let mut spin = self.spin.lock();
        spin.spins.push(episode.spins);
        spin.sleeps.push(episode.sleeps);
        spin.times_ms.push(as_ms(episode.elapsed));
        if episode.success {
            spin.successful += 1;
        } else {
            spin.aborted += 1;
        }
    }
}

fn as_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

fn percentile(sorted: &[f64], pct: usize) -> f64 {
    sorted[sorted.len() * pct / 100]
}

fn permille(sorted: &[f64], pm: usize) -> f64 {
    sorted[(sorted.len() * pm / 1000).min(sorted.len() - 1)]
}

/// Human-scale counts: `850`, `12.34K`, `1.20M`.
fn format_count(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{n:.0}")
    }
}

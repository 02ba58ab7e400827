//! Realtime worker thread (C6): a dedicated OS thread woken on an absolute
//! schedule, running at [`mgurdy_protocol::WORKER_INTERVAL_US`] intervals.
//! Grounded on the original's `mg_worker_thread`/`mg_worker_run` in
//! `worker.c`: `SCHED_FIFO` priority, locked/pre-faulted memory, and
//! `clock_nanosleep(TIMER_ABSTIME)` against a freshly recomputed deadline
//! each iteration rather than an accumulating one, to avoid drift from a
//! slow tick compounding across iterations.
//!
//! Scheduling and memory-locking failures are logged and otherwise ignored:
//! a non-realtime kernel or missing capabilities should degrade the worker's
//! timing, not stop it from running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mgurdy_protocol::wire::{KeyTelemetry, WheelTelemetry};
use mgurdy_protocol::{KEY_REPORT_INTERVAL, WHEEL_REPORT_INTERVAL, WORKER_INTERVAL_US};

use crate::telemetry::TelemetrySink;

/// Handle to a spawned worker thread. Dropping or calling [`Self::stop`]
/// requests a stop and joins the thread.
pub struct WorkerHandle {
    should_stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

/// Spawn the worker thread, invoking `tick` once per interval until the
/// handle is stopped or dropped.
pub fn spawn<F>(mut tick: F) -> WorkerHandle
where
    F: FnMut() + Send + 'static,
{
    let should_stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&should_stop);

    let thread = std::thread::Builder::new()
        .name("mgcore-worker".into())
        .spawn(move || {
            platform::configure_realtime();

            let mut deadline = platform::now();
            platform::add_us(&mut deadline, WORKER_INTERVAL_US);

            while !stop_flag.load(Ordering::Acquire) {
                if !platform::sleep_until(&deadline) {
                    tracing::error!("error sleeping in worker thread, terminating");
                    break;
                }

                tick();

                deadline = platform::now();
                platform::add_us(&mut deadline, WORKER_INTERVAL_US);
            }
        })
        .expect("failed to spawn worker thread");

    WorkerHandle { should_stop, thread: Some(thread) }
}

/// Decimates wheel/key telemetry to a fraction of the tick rate so
/// diagnostics don't compete with the realtime output path. Mirrors the
/// original's `position_to_websockets`: wheel samples are only published
/// when something actually changed, at most once every
/// [`WHEEL_REPORT_INTERVAL`] ticks; key samples publish unconditionally
/// every [`KEY_REPORT_INTERVAL`] ticks.
#[derive(Default)]
pub struct TelemetryDecimator {
    tick: u64,
    last_wheel: Option<WheelTelemetry>,
}

impl TelemetryDecimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tick(&mut self, wheel: WheelTelemetry, keys: impl FnOnce() -> KeyTelemetry, sink: &mut dyn TelemetrySink) {
        self.tick += 1;

        if self.tick % WHEEL_REPORT_INTERVAL as u64 == 0 && self.last_wheel != Some(wheel) {
            sink.wheel(wheel);
            self.last_wheel = Some(wheel);
        }

        if self.tick % KEY_REPORT_INTERVAL as u64 == 0 {
            sink.keys(keys());
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::mem::MaybeUninit;

    pub type Deadline = libc::timespec;

    const MAX_SAFE_STACK: usize = 8 * 1024;

    pub fn now() -> Deadline {
        let mut ts = MaybeUninit::<libc::timespec>::uninit();
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr());
            ts.assume_init()
        }
    }

    pub fn add_us(ts: &mut Deadline, us: u64) {
        let total_nsec = ts.tv_nsec as i64 + (us as i64 % 1_000_000) * 1_000;
        let extra_sec = (us as i64 / 1_000_000) + total_nsec / 1_000_000_000;
        ts.tv_sec += extra_sec as _;
        ts.tv_nsec = (total_nsec % 1_000_000_000) as _;
    }

    pub fn sleep_until(deadline: &Deadline) -> bool {
        let ret = unsafe { libc::clock_nanosleep(libc::CLOCK_MONOTONIC, libc::TIMER_ABSTIME, deadline, std::ptr::null_mut()) };
        ret == 0
    }

    pub fn configure_realtime() {
        unsafe {
            let param = libc::sched_param { sched_priority: mgurdy_protocol::WORKER_PRIO };
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == -1 {
                tracing::warn!(error = %std::io::Error::last_os_error(), "failed to set worker thread priority");
            }
            if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) == -1 {
                tracing::warn!(error = %std::io::Error::last_os_error(), "failed to lock memory");
            }
        }
        stack_prefault();
    }

    /// Touch the whole safety margin of stack once up front so the worker
    /// doesn't take a page fault for it mid-tick later.
    #[inline(never)]
    fn stack_prefault() {
        let dummy = [0u8; MAX_SAFE_STACK];
        std::hint::black_box(&dummy);
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use std::time::{Duration, Instant};

    pub type Deadline = Instant;

    pub fn now() -> Deadline {
        Instant::now()
    }

    pub fn add_us(ts: &mut Deadline, us: u64) {
        *ts += Duration::from_micros(us);
    }

    pub fn sleep_until(deadline: &Deadline) -> bool {
        let now = Instant::now();
        if *deadline > now {
            std::thread::sleep(*deadline - now);
        }
        true
    }

    pub fn configure_realtime() {
        tracing::debug!("realtime scheduling is not available on this platform");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_telemetry_decimated_by_interval() {
        let mut decimator = TelemetryDecimator::new();
        let mut sink = crate::telemetry::CollectingTelemetrySink::default();
        let sample = WheelTelemetry { position: 1, speed: 2, chien_volume: 0, chien_speed: 0 };

        for _ in 0..(WHEEL_REPORT_INTERVAL - 1) {
            decimator.on_tick(sample, || KeyTelemetry { records: vec![] }, &mut sink);
        }
        assert!(sink.wheel_samples.is_empty(), "should not publish before the interval elapses");

        decimator.on_tick(sample, || KeyTelemetry { records: vec![] }, &mut sink);
        assert_eq!(sink.wheel_samples.len(), 1);
    }

    #[test]
    fn test_wheel_telemetry_skipped_when_unchanged() {
        let mut decimator = TelemetryDecimator::new();
        let mut sink = crate::telemetry::CollectingTelemetrySink::default();
        let sample = WheelTelemetry { position: 1, speed: 2, chien_volume: 0, chien_speed: 0 };

        for _ in 0..WHEEL_REPORT_INTERVAL {
            decimator.on_tick(sample, || KeyTelemetry { records: vec![] }, &mut sink);
        }
        for _ in 0..WHEEL_REPORT_INTERVAL {
            decimator.on_tick(sample, || KeyTelemetry { records: vec![] }, &mut sink);
        }
        assert_eq!(sink.wheel_samples.len(), 1, "unchanged sample should only publish once");
    }

    #[test]
    fn test_worker_handle_stops_cleanly() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let handle = spawn(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.stop();
        assert!(counter.load(Ordering::Relaxed) > 0);
    }
}

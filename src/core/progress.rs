//! Progress reporting for the per-version pipeline.
//!
//! The pipeline only talks to [`ProgressObserver`]; presentation lives in
//! [`ConsoleProgress`]. On a terminal a [`ProgressTicker`] redraws the status
//! line every 500 ms from its own thread. The ticker is owned by a guard and
//! joined on drop, so it never outlives the version it reports on.

use colored::*;
use std::io::{self, IsTerminal, Write};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
const PLAIN_LINE_INTERVAL: Duration = Duration::from_secs(1);

pub trait ProgressObserver: Send + Sync {
    /// `total` is `None` while the amount of work is not known yet.
    fn on_progress(&self, stage: &str, done: usize, total: Option<usize>);
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _stage: &str, _done: usize, _total: Option<usize>) {}
}

#[derive(Debug, Default)]
struct ProgressState {
    stage: String,
    done: usize,
    total: Option<usize>,
    last_line: Option<Instant>,
}

/// Single status line for one version.
pub struct ConsoleProgress {
    version: String,
    interactive: bool,
    state: Mutex<ProgressState>,
}

impl ConsoleProgress {
    pub fn new(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: version.to_string(),
            interactive: io::stdout().is_terminal(),
            state: Mutex::new(ProgressState::default()),
        })
    }

    pub fn render(&self) -> String {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        format_line(&self.version, &state.stage, state.done, state.total)
    }

    pub fn redraw(&self) {
        let line = self.render();
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\r\x1b[2K{line}");
        let _ = stdout.flush();
    }

    /// Start the redraw thread. Returns `None` when stdout is not a terminal.
    pub fn start_ticker(self: &Arc<Self>) -> Option<ProgressTicker> {
        if !self.interactive {
            return None;
        }
        let progress = Arc::clone(self);
        Some(ProgressTicker::start(TICK_INTERVAL, move || progress.redraw()))
    }

    pub fn finish(&self) {
        if self.interactive {
            self.redraw();
            println!();
        }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, stage: &str, done: usize, total: Option<usize>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let stage_changed = state.stage != stage;
        state.stage.clear();
        state.stage.push_str(stage);
        state.done = done;
        state.total = total;

        if self.interactive {
            // The ticker handles periodic redraws.
            if stage_changed {
                drop(state);
                self.redraw();
            }
            return;
        }

        let due = state
            .last_line
            .is_none_or(|last| last.elapsed() >= PLAIN_LINE_INTERVAL);
        if stage_changed || due {
            state.last_line = Some(Instant::now());
            println!("{}", format_line(&self.version, stage, done, total));
        }
    }
}

fn format_line(version: &str, stage: &str, done: usize, total: Option<usize>) -> String {
    let counter = match total {
        Some(0) => String::new(),
        Some(total) => format!(" {done}/{total} ({}%)", done * 100 / total),
        None if done > 0 => format!(" {done}"),
        None => String::new(),
    };
    format!("{} {}{}", format!("[{version}]").blue(), stage, counter.bright_black())
}

/// Background redraw loop, stopped and joined when dropped.
pub struct ProgressTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn start(interval: Duration, tick: impl Fn() + Send + 'static) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Observer that keeps every event for assertions.
    #[derive(Default)]
    pub struct RecordingProgress {
        pub events: Mutex<Vec<(String, usize, Option<usize>)>>,
    }

    impl RecordingProgress {
        pub fn stages(&self) -> Vec<String> {
            let events = self.events.lock().unwrap();
            let mut stages: Vec<String> = Vec::new();
            for (stage, _, _) in events.iter() {
                if stages.last() != Some(stage) {
                    stages.push(stage.clone());
                }
            }
            stages
        }
    }

    impl ProgressObserver for RecordingProgress {
        fn on_progress(&self, stage: &str, done: usize, total: Option<usize>) {
            self.events
                .lock()
                .unwrap()
                .push((stage.to_string(), done, total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_format_line() {
        colored::control::set_override(false);
        assert_eq!(
            format_line("1.21", "extracting client jar", 50, Some(200)),
            "[1.21] extracting client jar 50/200 (25%)"
        );
        assert_eq!(format_line("1.21", "finished", 0, None), "[1.21] finished");
        assert_eq!(format_line("1.21", "linking", 0, Some(0)), "[1.21] linking");
    }

    #[test]
    fn test_ticker_ticks_and_stops_on_drop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = ProgressTicker::start(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(100));
        drop(ticker);

        let after_drop = ticks.load(Ordering::SeqCst);
        assert!(after_drop > 0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn test_console_progress_tracks_latest_state() {
        colored::control::set_override(false);
        let progress = ConsoleProgress::new("24w14a");
        progress.on_progress("downloading assets", 3, Some(10));
        assert_eq!(progress.render(), "[24w14a] downloading assets 3/10 (30%)");
    }
}

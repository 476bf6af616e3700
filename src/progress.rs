use log::info;
use std::cell::{Cell, RefCell};
use std::time::Instant;

/// Receives progress of a long running stage.
pub trait ProgressObserver {
    fn start(&self, _label: &str, _total: Option<u64>) {}
    fn advance(&self, n: u64);
    fn finish(&self) {}
}

/// Ignores all progress.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn advance(&self, _n: u64) {}
}

/// Logs a line every `every` units with the running rate.
pub struct LogProgress {
    every: u64,
    label: RefCell<String>,
    total: Cell<Option<u64>>,
    count: Cell<u64>,
    next_report: Cell<u64>,
    started: Cell<Instant>,
}

impl LogProgress {
    pub fn new(every: u64) -> Self {
        let every = every.max(1);
        Self {
            every,
            label: RefCell::new(String::new()),
            total: Cell::new(None),
            count: Cell::new(0),
            next_report: Cell::new(every),
            started: Cell::new(Instant::now()),
        }
    }

    fn rate(&self) -> f64 {
        let secs = self.started.get().elapsed().as_secs_f64().max(1e-9);
        self.count.get() as f64 / secs
    }

    fn report(&self) {
        match self.total.get() {
            Some(total) => info!(
                "{}: {}/{} ({:.1}/s)",
                self.label.borrow(),
                self.count.get(),
                total,
                self.rate()
            ),
            None => info!(
                "{}: {} ({:.1}/s)",
                self.label.borrow(),
                self.count.get(),
                self.rate()
            ),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn start(&self, label: &str, total: Option<u64>) {
        *self.label.borrow_mut() = label.to_string();
        self.total.set(total);
        self.count.set(0);
        self.next_report.set(self.every);
        self.started.set(Instant::now());
    }

    fn advance(&self, n: u64) {
        self.count.set(self.count.get() + n);
        if self.count.get() >= self.next_report.get() {
            self.report();
            self.next_report.set(self.count.get() + self.every);
        }
    }

    fn finish(&self) {
        self.report();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_across_advances() {
        let progress = LogProgress::new(2);
        progress.start("test", Some(5));
        for _ in 0..5 {
            progress.advance(1);
        }
        progress.finish();
        assert_eq!(progress.count.get(), 5);

        progress.start("again", None);
        assert_eq!(progress.count.get(), 0);
    }
}

//! Session-scoped notification batching.
//!
//! Entries recorded during a session are collected and flushed as one block
//! when the batch guard is dropped, so a failing session still reports what
//! it did. Outside a batch, entries go straight to the log.

use std::sync::Mutex;

#[derive(Default)]
pub struct Notifier {
    batch: Mutex<Option<Vec<String>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch. Entries recorded until the guard drops are flushed
    /// together.
    pub fn begin(&self) -> NotificationBatch<'_> {
        *self.batch.lock().expect("poisoned mutex") = Some(Vec::new());
        NotificationBatch { notifier: self }
    }

    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        match &mut *self.batch.lock().expect("poisoned mutex") {
            Some(batch) => batch.push(entry),
            None => log::info!("{entry}"),
        }
    }

    fn flush(&self) {
        if let Some(entries) = self.batch.lock().expect("poisoned mutex").take() {
            if !entries.is_empty() {
                log::info!(target: "vigil::notify", "{}", entries.join("\n"));
            }
        }
    }
}

/// Guard for one notification batch; flushes on drop, panics included.
pub struct NotificationBatch<'a> {
    notifier: &'a Notifier,
}

impl Drop for NotificationBatch<'_> {
    fn drop(&mut self) {
        self.notifier.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_collects_until_dropped() {
        let notifier = Notifier::new();
        {
            let _batch = notifier.begin();
            notifier.record("one");
            notifier.record("two");
            assert_eq!(
                notifier.batch.lock().unwrap().as_ref().map(|b| b.len()),
                Some(2)
            );
        }
        // flushed and closed
        assert!(notifier.batch.lock().unwrap().is_none());
    }

    #[test]
    fn recording_without_batch_does_not_accumulate() {
        let notifier = Notifier::new();
        notifier.record("immediate");
        assert!(notifier.batch.lock().unwrap().is_none());
    }
}

/// Receives progress events while a feed is loaded and validated.
pub trait ProgressHandler: Send + Sync {
    /// Called before a table is read.
    fn on_start_table(&self, file: &str);

    /// Called after a table has been read, with the number of rows kept.
    fn on_finish_table(&self, file: &str, rows: usize);

    /// Called before a validation pass runs.
    fn on_start_pass(&self, pass: &str);

    fn on_finish_pass(&self, pass: &str);

    /// Total number of tables the loader will attempt.
    fn set_total_tables(&self, count: usize) {
        let _ = count;
    }

    fn set_total_passes(&self, count: usize) {
        let _ = count;
    }
}

/// Ignores every event.
pub struct NoOpProgressHandler;

impl ProgressHandler for NoOpProgressHandler {
    fn on_start_table(&self, _file: &str) {}
    fn on_finish_table(&self, _file: &str, _rows: usize) {}
    fn on_start_pass(&self, _pass: &str) {}
    fn on_finish_pass(&self, _pass: &str) {}
}

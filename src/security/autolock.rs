use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-shot inactivity timer. Arming again replaces the pending countdown;
/// dropping the timer cancels it.
#[derive(Debug, Default)]
pub struct AutoLockTimer {
    task: Option<JoinHandle<()>>,
}

impl AutoLockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, after: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_expire();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for AutoLockTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

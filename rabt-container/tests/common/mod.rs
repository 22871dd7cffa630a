#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use rabt_container::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber when `RUST_LOG` is set.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Records its label into a shared log when disposed.
pub struct Tracked {
    pub label: String,
    pub log: Log,
}

impl Tracked {
    pub fn new(label: impl Into<String>, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            log: log.clone(),
        })
    }
}

impl Dispose for Tracked {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        self.log.lock().push(self.label.clone());
        Ok(())
    }
}

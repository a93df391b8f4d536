use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::clock::Clock;
use crate::config::Config;
use crate::engine::Engine;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Shared by every worker. The engine is swapped wholesale when a workspace
/// is selected, which also starts a fresh credential table.
pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub workspace: RwLock<Option<PathBuf>>,
    pub engine: RwLock<Option<Arc<Engine>>>,
}

impl AppState {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            workspace: RwLock::new(None),
            engine: RwLock::new(None),
        }
    }

    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.engine
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn workspace(&self) -> Option<PathBuf> {
        self.workspace
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn open_workspace(&self, path: PathBuf) -> anyhow::Result<()> {
        let engine = Engine::open(&self.config, &path, self.clock.clone())?;
        *self.engine.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(engine));
        *self.workspace.write().unwrap_or_else(|p| p.into_inner()) = Some(path);
        Ok(())
    }
}
